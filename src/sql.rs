use chrono::NaiveDate;
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::limits::MAX_IN_CLAUSE_IDS;
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertBookings {
        drafts: Vec<BookingDraft>,
    },
    UpdateBookingStatus {
        ids: Vec<Ulid>,
        status: BookingStatus,
    },
    SelectBookings {
        owner_id: Option<String>,
        date: Option<NaiveDate>,
    },
    SelectCalendar {
        owner_id: Option<String>,
        start: NaiveDate,
        end: NaiveDate,
    },
    SelectMonth {
        owner_id: Option<String>,
        year: i32,
        month: u32,
    },
    SelectNotifications {
        read: Option<bool>,
    },
    MarkNotificationsRead {
        id: Option<Ulid>,
    },
    DeleteNotification {
        id: Ulid,
    },
}

/// Column order assumed by `INSERT INTO bookings VALUES (...)` without a column list.
const BOOKING_COLUMNS: [&str; 6] = ["title", "date", "start_time", "end_time", "status", "end_date"];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    if table != "bookings" {
        return Err(SqlError::UnknownTable(table));
    }

    let columns: Vec<String> = if insert.columns.is_empty() {
        BOOKING_COLUMNS.iter().map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };

    let rows = extract_all_insert_rows(insert)?;
    let mut drafts = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        // Positional rows may leave off trailing columns; named rows must match exactly.
        let arity_ok = if insert.columns.is_empty() {
            row.len() <= columns.len()
        } else {
            row.len() == columns.len()
        };
        if !arity_ok {
            return Err(SqlError::WrongArity("bookings", columns.len(), row.len()));
        }
        let draft = parse_booking_row(&columns, row)
            .map_err(|e| if rows.len() > 1 { SqlError::Parse(format!("row {i}: {e}")) } else { e })?;
        drafts.push(draft);
    }
    Ok(Command::InsertBookings { drafts })
}

fn parse_booking_row(columns: &[String], row: &[Expr]) -> Result<BookingDraft, SqlError> {
    let mut title = String::new();
    let (mut date, mut start_time, mut end_time) = (None, None, None);
    let mut status = BookingStatus::Held;
    let mut end_date = None;
    let mut details = BookingDetails::default();

    for (column, expr) in columns.iter().zip(row) {
        match column.as_str() {
            "title" => title = parse_string_or_null(expr)?.unwrap_or_default(),
            "date" => date = Some(parse_date_expr(expr)?),
            "start_time" => start_time = Some(parse_string_expr(expr)?),
            "end_time" => end_time = Some(parse_string_expr(expr)?),
            "status" => {
                if let Some(s) = parse_string_or_null(expr)? {
                    status = s.parse().map_err(SqlError::Parse)?;
                }
            }
            "end_date" => {
                end_date = match parse_string_or_null(expr)? {
                    Some(s) => Some(parse_date(&s)?),
                    None => None,
                }
            }
            "production_id" => details.production_id = parse_string_or_null(expr)?,
            "production_type" => {
                details.production_type = match parse_string_or_null(expr)? {
                    Some(s) => Some(s.parse().map_err(SqlError::Parse)?),
                    None => None,
                }
            }
            "pa_type" => {
                details.pa_type = match parse_string_or_null(expr)? {
                    Some(s) => Some(s.parse().map_err(SqlError::Parse)?),
                    None => None,
                }
            }
            "location" => details.location = parse_string_or_null(expr)?,
            "description" => details.description = parse_string_or_null(expr)?,
            other => return Err(SqlError::UnknownColumn(other.to_string())),
        }
    }

    let date = date.ok_or(SqlError::MissingColumn("date"))?;
    let draft = BookingDraft::new(
        title,
        date,
        start_time.ok_or(SqlError::MissingColumn("start_time"))?,
        end_time.ok_or(SqlError::MissingColumn("end_time"))?,
        status,
    )
    .with_details(details);
    Ok(match end_date {
        Some(d) => draft.ending_on(d),
        None => draft,
    })
}

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let [assignment] = assignments else {
        return Err(SqlError::Unsupported("UPDATE must set exactly one column".into()));
    };
    let column = match &assignment.target {
        AssignmentTarget::ColumnName(name) => object_name_last(name),
        _ => None,
    }
    .ok_or_else(|| SqlError::Parse("unsupported assignment target".into()))?;

    match (table.as_str(), column.as_str()) {
        ("bookings", "status") => {
            let status = parse_string_expr(&assignment.value)?
                .parse()
                .map_err(SqlError::Parse)?;
            let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
            let ids = extract_id_list(sel)?;
            Ok(Command::UpdateBookingStatus { ids, status })
        }
        ("notifications", "read") => {
            if !parse_bool(&assignment.value)? {
                return Err(SqlError::Unsupported("notifications cannot be marked unread".into()));
            }
            let id = match selection {
                Some(sel) => Some(extract_where_id(sel)?),
                None => None,
            };
            Ok(Command::MarkNotificationsRead { id })
        }
        ("bookings", other) | ("notifications", other) => {
            Err(SqlError::Unsupported(format!("cannot update column {other}")))
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let sel = delete.selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    let id = extract_where_id(sel)?;

    match table.as_str() {
        "notifications" => Ok(Command::DeleteNotification { id }),
        "bookings" => Err(SqlError::Unsupported("bookings cannot be deleted".into())),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Equality filters collected from a WHERE clause of ANDed comparisons.
#[derive(Default)]
struct Filters {
    owner_id: Option<String>,
    date: Option<NaiveDate>,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    month: Option<(i32, u32)>,
    read: Option<bool>,
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        extract_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "bookings" => Ok(Command::SelectBookings {
            owner_id: filters.owner_id,
            date: filters.date,
        }),
        "calendar" => Ok(Command::SelectCalendar {
            owner_id: filters.owner_id,
            start: filters.start.ok_or(SqlError::MissingFilter("start"))?,
            end: filters.end.ok_or(SqlError::MissingFilter("end"))?,
        }),
        "month_view" => {
            let (year, month) = filters.month.ok_or(SqlError::MissingFilter("month"))?;
            Ok(Command::SelectMonth {
                owner_id: filters.owner_id,
                year,
                month,
            })
        }
        "notifications" => Ok(Command::SelectNotifications { read: filters.read }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn extract_filters(expr: &Expr, filters: &mut Filters) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => extract_filters(inner, filters)?,
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                extract_filters(left, filters)?;
                extract_filters(right, filters)?;
            }
            ast::BinaryOperator::Eq => match expr_column_name(left).as_deref() {
                Some("owner_id") => filters.owner_id = Some(parse_string_expr(right)?),
                Some("date") => filters.date = Some(parse_date_expr(right)?),
                Some("start") => filters.start = Some(parse_date_expr(right)?),
                Some("end") => filters.end = Some(parse_date_expr(right)?),
                Some("month") => filters.month = Some(parse_month_expr(right)?),
                Some("read") => filters.read = Some(parse_bool(right)?),
                Some(other) => return Err(SqlError::UnknownColumn(other.to_string())),
                None => return Err(SqlError::Unsupported(format!("filter {expr}"))),
            },
            ast::BinaryOperator::GtEq => {
                if expr_column_name(left).as_deref() == Some("start") {
                    filters.start = Some(parse_date_expr(right)?);
                }
            }
            ast::BinaryOperator::LtEq => {
                if expr_column_name(left).as_deref() == Some("end") {
                    filters.end = Some(parse_date_expr(right)?);
                }
            }
            _ => return Err(SqlError::Unsupported(format!("operator {op}"))),
        },
        _ => return Err(SqlError::Unsupported(format!("filter {expr}"))),
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_all_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows.clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(sel: &Expr) -> Result<Ulid, SqlError> {
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("id") => parse_ulid_expr(right),
        _ => Err(SqlError::MissingFilter("id")),
    }
}

/// `id = '...'` or `id IN ('...', ...)`.
fn extract_id_list(sel: &Expr) -> Result<Vec<Ulid>, SqlError> {
    match sel {
        Expr::InList {
            expr,
            list,
            negated: false,
        } if expr_column_name(expr).as_deref() == Some("id") => {
            if list.len() > MAX_IN_CLAUSE_IDS {
                return Err(SqlError::TooManyIds(list.len()));
            }
            list.iter().map(parse_ulid_expr).collect()
        }
        other => Ok(vec![extract_where_id(other)?]),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string_expr(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
}

fn parse_string_expr(expr: &Expr) -> Result<String, SqlError> {
    parse_string_or_null(expr)?.ok_or_else(|| SqlError::Parse("unexpected NULL".into()))
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(Some(s.clone())),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_date(s: &str) -> Result<NaiveDate, SqlError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))
}

fn parse_date_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    parse_date(&parse_string_expr(expr)?)
}

/// `'YYYY-MM'`.
fn parse_month_expr(expr: &Expr) -> Result<(i32, u32), SqlError> {
    let s = parse_string_expr(expr)?;
    let bad = || SqlError::Parse(format!("bad month {s:?}, expected YYYY-MM"));
    let (year, month) = s.trim().split_once('-').ok_or_else(bad)?;
    let year: i32 = year.parse().map_err(|_| bad())?;
    let month: u32 = month.parse().map_err(|_| bad())?;
    if !(1..=12).contains(&month) {
        return Err(bad());
    }
    Ok((year, month))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str),
    MissingFilter(&'static str),
    TooManyIds(usize),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(col) => write!(f, "missing column: {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::TooManyIds(n) => {
                write!(f, "too many ids in IN list: {n} (max {MAX_IN_CLAUSE_IDS})")
            }
        }
    }
}

impl std::error::Error for SqlError {}
