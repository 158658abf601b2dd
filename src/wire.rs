use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::auth::CrewCalAuthSource;
use crate::engine::{DayCell, Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::session::{SessionManager, UserRole, ViewerContext};
use crate::sql::{self, Command};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M";

pub struct CrewCalHandler {
    sessions: Arc<SessionManager>,
    query_parser: Arc<CrewCalQueryParser>,
}

impl CrewCalHandler {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self {
            sessions,
            query_parser: Arc::new(CrewCalQueryParser),
        }
    }

    /// Workspace engine and viewer for this connection, from its startup parameters.
    fn resolve<C: ClientInfo>(&self, client: &C) -> PgWireResult<(Arc<Engine>, ViewerContext)> {
        let metadata = client.metadata();
        let workspace = metadata
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        let viewer_id = metadata
            .get("user")
            .cloned()
            .ok_or_else(|| user_error("28000", "no user in startup parameters".into()))?;
        let role = UserRole::from_application_name(metadata.get("application_name").map(String::as_str));

        let engine = self
            .sessions
            .workspace(&workspace)
            .map_err(|e| user_error("08006", format!("workspace error: {e}")))?;
        Ok((engine, ViewerContext::new(viewer_id, role)))
    }

    async fn run(&self, engine: &Engine, ctx: &ViewerContext, query: &str) -> PgWireResult<Vec<Response>> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(engine, ctx, cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        ctx: &ViewerContext,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertBookings { drafts } => {
                let created = engine
                    .create_bookings(&ctx.viewer_id, drafts)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![booking_rows(created)])
            }
            Command::UpdateBookingStatus { ids, status } => {
                for id in &ids {
                    let owner = engine
                        .resolve_owner(id)
                        .await
                        .and_then(|owner| owner.ok_or(EngineError::NotFound(*id)))
                        .map_err(engine_err)?;
                    if !ctx.can_change_status(&owner) {
                        return Err(permission_denied(&owner));
                    }
                }
                let changes: Vec<(Ulid, BookingStatus)> = ids.into_iter().map(|id| (id, status)).collect();
                let updated = engine.update_statuses(&changes).await.map_err(engine_err)?;
                Ok(vec![booking_rows(updated)])
            }
            Command::SelectBookings { owner_id, date } => {
                let owner = self.visible_owner(ctx, owner_id)?;
                let bookings = match date {
                    Some(d) => engine.bookings_on(&owner, d).await,
                    None => engine.list_bookings(&owner).await,
                }
                .map_err(engine_err)?;
                Ok(vec![booking_rows(bookings)])
            }
            Command::SelectCalendar { owner_id, start, end } => {
                let owner = self.visible_owner(ctx, owner_id)?;
                let days = engine
                    .calendar_days_within(&owner, start, end)
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(calendar_schema());
                let rows: Vec<PgWireResult<_>> = days
                    .markers()
                    .into_iter()
                    .map(|(date, status)| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&date.to_string())?;
                        encoder.encode_field(&status.as_str())?;
                        encoder.encode_field(&(days.dominant(date) == Some(status)))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectMonth { owner_id, year, month } => {
                let owner = self.visible_owner(ctx, owner_id)?;
                let cells = engine
                    .month_view(&owner, year, month)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![month_rows(cells)])
            }
            Command::SelectNotifications { read } => {
                let inbox: Vec<Notification> = engine
                    .notify
                    .inbox(&ctx.viewer_id)
                    .into_iter()
                    .filter(|n| read.is_none_or(|r| n.read == r))
                    .collect();
                Ok(vec![notification_rows(inbox)])
            }
            Command::MarkNotificationsRead { id } => {
                let count = match id {
                    Some(id) => usize::from(engine.notify.mark_read(&ctx.viewer_id, id)),
                    None => engine.notify.mark_all_read(&ctx.viewer_id),
                };
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(count))])
            }
            Command::DeleteNotification { id } => {
                let count = usize::from(engine.notify.dismiss(&ctx.viewer_id, id));
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(count))])
            }
        }
    }

    fn visible_owner(&self, ctx: &ViewerContext, owner_id: Option<String>) -> PgWireResult<OwnerId> {
        let owner = owner_id.unwrap_or_else(|| ctx.viewer_id.clone());
        if !ctx.can_view(&owner) {
            return Err(permission_denied(&owner));
        }
        Ok(owner)
    }
}

// ── Result schemas ───────────────────────────────────────────────

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn bool_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::BOOL, FieldFormat::Text)
}

fn booking_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("owner_id"),
        text_field("title"),
        text_field("start"),
        text_field("end"),
        text_field("status"),
        text_field("production_id"),
        text_field("production_type"),
        text_field("pa_type"),
        text_field("location"),
        text_field("description"),
    ]
}

fn calendar_schema() -> Vec<FieldInfo> {
    vec![text_field("date"), text_field("status"), bool_field("dominant")]
}

fn month_schema() -> Vec<FieldInfo> {
    vec![
        text_field("date"),
        text_field("booking_id"),
        text_field("title"),
        text_field("status"),
    ]
}

fn notification_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("kind"),
        text_field("title"),
        text_field("description"),
        text_field("booking_id"),
        text_field("metadata"),
        text_field("created_at"),
        bool_field("read"),
    ]
}

/// Result columns for a statement, as far as the statement can be parsed.
fn schema_for(stmt: &str) -> Vec<FieldInfo> {
    match sql::parse_sql(stmt) {
        Ok(Command::InsertBookings { .. })
        | Ok(Command::UpdateBookingStatus { .. })
        | Ok(Command::SelectBookings { .. }) => booking_schema(),
        Ok(Command::SelectCalendar { .. }) => calendar_schema(),
        Ok(Command::SelectMonth { .. }) => month_schema(),
        Ok(Command::SelectNotifications { .. }) => notification_schema(),
        _ => vec![],
    }
}

fn booking_rows(bookings: Vec<Booking>) -> Response {
    let schema = Arc::new(booking_schema());
    let rows: Vec<PgWireResult<_>> = bookings
        .into_iter()
        .map(|b| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&b.id.to_string())?;
            encoder.encode_field(&b.owner_id)?;
            encoder.encode_field(&b.title)?;
            encoder.encode_field(&b.start.format(TIMESTAMP_FORMAT).to_string())?;
            encoder.encode_field(&b.end.format(TIMESTAMP_FORMAT).to_string())?;
            encoder.encode_field(&b.status.as_str())?;
            encoder.encode_field(&b.details.production_id)?;
            encoder.encode_field(&b.details.production_type.map(|t| t.as_str()))?;
            encoder.encode_field(&b.details.pa_type.map(|t| t.as_str()))?;
            encoder.encode_field(&b.details.location)?;
            encoder.encode_field(&b.details.description)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

/// One row per (day, booking); empty days still get a row so the grid is complete.
fn month_rows(cells: Vec<DayCell>) -> Response {
    let schema = Arc::new(month_schema());
    let mut rows: Vec<PgWireResult<_>> = Vec::new();
    for cell in cells {
        let date = cell.date.to_string();
        if cell.bookings.is_empty() {
            rows.push(month_row(&schema, &date, None));
        }
        for b in &cell.bookings {
            rows.push(month_row(&schema, &date, Some(b)));
        }
    }
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn month_row(
    schema: &Arc<Vec<FieldInfo>>,
    date: &str,
    booking: Option<&Booking>,
) -> PgWireResult<pgwire::messages::data::DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&date)?;
    encoder.encode_field(&booking.map(|b| b.id.to_string()))?;
    encoder.encode_field(&booking.map(|b| b.title.as_str()))?;
    encoder.encode_field(&booking.map(|b| b.status.as_str()))?;
    Ok(encoder.take_row())
}

fn notification_rows(inbox: Vec<Notification>) -> Response {
    let schema = Arc::new(notification_schema());
    let rows: Vec<PgWireResult<_>> = inbox
        .into_iter()
        .map(|n| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&n.id.to_string())?;
            encoder.encode_field(&n.kind.as_str())?;
            encoder.encode_field(&n.title)?;
            encoder.encode_field(&n.description)?;
            encoder.encode_field(&n.booking_id.map(|id| id.to_string()))?;
            encoder.encode_field(&n.metadata.to_string())?;
            encoder.encode_field(&n.created_at.format(TIMESTAMP_FORMAT).to_string())?;
            encoder.encode_field(&n.read)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

#[async_trait]
impl SimpleQueryHandler for CrewCalHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let (engine, ctx) = self.resolve(client)?;
        self.run(&engine, &ctx, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct CrewCalQueryParser;

#[async_trait]
impl QueryParser for CrewCalQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(schema_for(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for CrewCalHandler {
    type Statement = String;
    type QueryParser = CrewCalQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let (engine, ctx) = self.resolve(client)?;
        let sql = substitute_params(portal);
        let mut responses = self.run(&engine, &ctx, &sql).await?;
        if responses.is_empty() {
            return Ok(Response::EmptyQuery);
        }
        Ok(responses.remove(0))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        // Placeholders make the statement unparsable; describe it with dummy values bound.
        let sample = bind_placeholders(&target.statement, |_| "''".to_string());
        Ok(DescribeStatementResponse::new(param_types, schema_for(&sample)))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(schema_for(&substitute_params(target))))
    }
}

/// `$N` placeholders outside quoted literals and identifiers: byte span and N.
fn placeholders(sql: &str) -> Vec<(std::ops::Range<usize>, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        match quote {
            // A doubled quote re-enters the literal on the next byte.
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == b'\'' || c == b'"' => quote = Some(c),
            None if c == b'$' => {
                let digits = bytes[i + 1..].iter().take_while(|b| b.is_ascii_digit()).count();
                if let Ok(n) = sql[i + 1..i + 1 + digits].parse::<usize>() {
                    found.push((i..i + 1 + digits, n));
                    i += digits;
                }
            }
            None => {}
        }
        i += 1;
    }
    found
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    placeholders(sql).into_iter().map(|(_, n)| n).max().unwrap_or(0)
}

/// Replace each `$N` placeholder with `value_for(N - 1)`, leaving quoted text alone.
fn bind_placeholders(sql: &str, value_for: impl Fn(usize) -> String) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut last = 0;
    for (span, n) in placeholders(sql) {
        result.push_str(&sql[last..span.start]);
        result.push_str(&value_for(n.saturating_sub(1)));
        last = span.end;
    }
    result.push_str(&sql[last..]);
    result
}

/// Substitute bound parameter values (text format) as quoted literals.
fn substitute_params(portal: &Portal<String>) -> String {
    let params = &portal.parameters;
    bind_placeholders(&portal.statement.statement, |i| match params.get(i) {
        Some(Some(bytes)) => {
            let text = String::from_utf8_lossy(bytes);
            format!("'{}'", text.replace('\'', "''"))
        }
        _ => "NULL".to_string(),
    })
}

// ── Factory ──────────────────────────────────────────────────────

pub struct CrewCalFactory {
    handler: Arc<CrewCalHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<CrewCalAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl CrewCalFactory {
    pub fn new(sessions: Arc<SessionManager>, password: String) -> Self {
        let auth_source = CrewCalAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(CrewCalHandler::new(sessions)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for CrewCalFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    sessions: Arc<SessionManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = CrewCalFactory::new(sessions, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

fn permission_denied(owner: &str) -> PgWireError {
    user_error("42501", format!("permission denied for calendar of {owner}"))
}

fn engine_err(e: EngineError) -> PgWireError {
    let code = match e {
        EngineError::Persistence { .. } => "58030",
        _ => "P0001",
    };
    user_error(code, e.to_string())
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_params_finds_highest() {
        assert_eq!(count_params("SELECT * FROM bookings"), 0);
        assert_eq!(count_params("UPDATE bookings SET status = $2 WHERE id = $1"), 2);
        assert_eq!(count_params("VALUES ($1, $10, $3)"), 10);
        assert_eq!(count_params("costs $ and $x"), 0);
        assert_eq!(count_params("VALUES ('Costs $4', $1)"), 1);
    }

    #[test]
    fn bind_placeholders_by_number() {
        let ten = (1..=10).map(|n| format!("${n}")).collect::<Vec<_>>().join(",");
        assert_eq!(bind_placeholders(&ten, |i| i.to_string()), "0,1,2,3,4,5,6,7,8,9");
        assert_eq!(
            bind_placeholders("WHERE id = $1", |_| "'x'".to_string()),
            "WHERE id = 'x'"
        );
    }

    #[test]
    fn bind_placeholders_leaves_quoted_text() {
        let sql = "INSERT INTO bookings (title, date) VALUES ('Costs $1', $1)";
        assert_eq!(
            bind_placeholders(sql, |_| "'2025-07-07'".to_string()),
            "INSERT INTO bookings (title, date) VALUES ('Costs $1', '2025-07-07')"
        );
        let escaped = "SELECT * FROM bookings WHERE owner_id = 'o''neil $2' AND date = $1";
        assert_eq!(
            bind_placeholders(escaped, |_| "'2025-07-07'".to_string()),
            "SELECT * FROM bookings WHERE owner_id = 'o''neil $2' AND date = '2025-07-07'"
        );
        assert_eq!(bind_placeholders("SELECT \"$1\" FROM t", |_| "x".into()), "SELECT \"$1\" FROM t");
    }

    #[test]
    fn schema_follows_command() {
        assert_eq!(schema_for("SELECT * FROM bookings").len(), 11);
        assert_eq!(
            schema_for("SELECT * FROM calendar WHERE start = '2025-07-01' AND \"end\" = '2025-07-31'").len(),
            3
        );
        assert_eq!(schema_for("SELECT * FROM month_view WHERE month = '2025-07'").len(), 4);
        assert_eq!(schema_for("SELECT * FROM notifications").len(), 8);
        assert!(schema_for("UPDATE notifications SET read = true").is_empty());
        assert!(schema_for("not sql").is_empty());
    }
}
