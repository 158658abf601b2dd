use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::info;

use crate::compactor;
use crate::engine::{Engine, EngineError};
use crate::limits::*;
use crate::model::{Notification, OwnerId};
use crate::notify::NotifyHub;
use crate::repository::{BookingRepository, InMemoryRepository, WalRepository};

/// Which side of the marketplace the viewer is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserRole {
    Assistant,
    Production,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Assistant => "assistant",
            UserRole::Production => "production",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            UserRole::Assistant => UserRole::Production,
            UserRole::Production => UserRole::Assistant,
        }
    }

    /// `production` (any case) selects the production role, anything else the assistant role.
    pub fn from_application_name(name: Option<&str>) -> Self {
        match name {
            Some(n) if n.trim().eq_ignore_ascii_case("production") => UserRole::Production,
            _ => UserRole::Assistant,
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who is looking at the calendar.
///
/// Assistants see and edit only their own calendar. Productions browse any
/// calendar and may change the status of any booking, but blocks they add
/// still land on their own calendar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewerContext {
    pub viewer_id: OwnerId,
    pub role: UserRole,
}

impl ViewerContext {
    pub fn new(viewer_id: impl Into<OwnerId>, role: UserRole) -> Self {
        Self {
            viewer_id: viewer_id.into(),
            role,
        }
    }

    pub fn toggle_role(&mut self) {
        self.role = self.role.toggled();
    }

    pub fn can_view(&self, owner_id: &str) -> bool {
        self.role == UserRole::Production || owner_id == self.viewer_id
    }

    pub fn can_change_status(&self, owner_id: &str) -> bool {
        self.can_view(owner_id)
    }
}

#[derive(Debug)]
pub enum SessionError {
    Workspace(std::io::Error),
    Engine(EngineError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Workspace(e) => write!(f, "workspace error: {e}"),
            SessionError::Engine(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<std::io::Error> for SessionError {
    fn from(e: std::io::Error) -> Self {
        SessionError::Workspace(e)
    }
}

impl From<EngineError> for SessionError {
    fn from(e: EngineError) -> Self {
        SessionError::Engine(e)
    }
}

type SessionKey = (String, OwnerId);

/// Map key and log file stem for a workspace name.
fn workspace_key(name: &str) -> std::io::Result<String> {
    let invalid = |msg: &str| std::io::Error::new(std::io::ErrorKind::InvalidInput, msg.to_string());
    if name.is_empty() {
        return Err(invalid("empty workspace name"));
    }
    if name.len() > MAX_WORKSPACE_NAME_LEN {
        return Err(invalid("workspace name too long"));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(invalid("workspace name may only use letters, digits, '_' and '-'"));
    }
    Ok(name.to_ascii_lowercase())
}

/// Manages per-workspace engines. Each workspace gets its own Engine, repository and compactor.
/// Workspace = database name from the pgwire connection.
pub struct SessionManager {
    engines: DashMap<String, Arc<Engine>>,
    /// `None` keeps every workspace in memory.
    data_dir: Option<PathBuf>,
    compact_threshold: u64,
    open_sessions: Arc<DashMap<SessionKey, usize>>,
}

impl SessionManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir: Some(data_dir),
            compact_threshold,
            open_sessions: Arc::new(DashMap::new()),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            engines: DashMap::new(),
            data_dir: None,
            compact_threshold: 0,
            open_sessions: Arc::new(DashMap::new()),
        }
    }

    /// Get or lazily create the engine for a workspace.
    ///
    /// Names are ASCII letters, digits, `_` and `-`, compared without case, so
    /// every accepted name maps to exactly one log file.
    pub fn workspace(&self, name: &str) -> std::io::Result<Arc<Engine>> {
        let key = workspace_key(name)?;
        if let Some(engine) = self.engines.get(&key) {
            return Ok(engine.value().clone());
        }
        if self.engines.len() >= MAX_WORKSPACES {
            return Err(std::io::Error::other("too many workspaces"));
        }

        let entry = match self.engines.entry(key.clone()) {
            Entry::Occupied(e) => return Ok(e.get().clone()),
            Entry::Vacant(e) => e,
        };

        let repository: Arc<dyn BookingRepository> = match &self.data_dir {
            Some(dir) => Arc::new(WalRepository::open(dir.join(format!("{key}.wal")))?),
            None => Arc::new(InMemoryRepository::new()),
        };
        let engine = Arc::new(Engine::new(repository, Arc::new(NotifyHub::new())));

        if self.data_dir.is_some() {
            let compactor_engine = engine.clone();
            let threshold = self.compact_threshold;
            tokio::spawn(async move {
                compactor::run_compactor(compactor_engine, threshold).await;
            });
        }

        entry.insert(engine.clone());
        info!("workspace {name} opened");
        metrics::gauge!(crate::observability::WORKSPACES_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }

    pub fn workspace_count(&self) -> usize {
        self.engines.len()
    }

    /// Start a session: resolve the workspace and load the viewer's calendar.
    pub async fn open_session(
        &self,
        workspace: &str,
        ctx: ViewerContext,
    ) -> Result<Session, SessionError> {
        let engine = self.workspace(workspace)?;
        engine.preload(&ctx.viewer_id).await?;

        let key = (workspace_key(workspace)?, ctx.viewer_id.clone());
        *self.open_sessions.entry(key.clone()).or_insert(0) += 1;
        metrics::gauge!(crate::observability::SESSIONS_ACTIVE).increment(1.0);
        info!("session opened: {} as {} in {workspace}", ctx.viewer_id, ctx.role);

        Ok(Session {
            key,
            ctx,
            engine,
            open_sessions: self.open_sessions.clone(),
        })
    }

    /// Open sessions for one viewer in one workspace.
    pub fn session_count(&self, workspace: &str, viewer_id: &str) -> usize {
        let Ok(key) = workspace_key(workspace) else { return 0 };
        self.open_sessions
            .get(&(key, viewer_id.to_string()))
            .map_or(0, |e| *e.value())
    }
}

/// One viewer's session in a workspace. Must be ended with [`Session::close`].
pub struct Session {
    key: SessionKey,
    ctx: ViewerContext,
    engine: Arc<Engine>,
    open_sessions: Arc<DashMap<SessionKey, usize>>,
}

impl Session {
    pub fn ctx(&self) -> &ViewerContext {
        &self.ctx
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn toggle_role(&mut self) -> UserRole {
        self.ctx.toggle_role();
        self.ctx.role
    }

    /// Live notifications for the viewer.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.engine.notify.subscribe(&self.ctx.viewer_id)
    }

    /// End the session. When it was the viewer's last one, their calendar and
    /// live channel are dropped from memory; the inbox survives. Wire
    /// connections never open sessions: any still reading the calendar reload it
    /// from the repository on next use. A calendar with unsaved bookings stays.
    pub fn close(self) {
        let last = match self.open_sessions.get_mut(&self.key) {
            Some(mut count) => {
                *count = count.saturating_sub(1);
                *count == 0
            }
            None => true,
        };
        if last {
            self.open_sessions.remove_if(&self.key, |_, count| *count == 0);
            self.engine.unload(&self.ctx.viewer_id);
            self.engine.notify.remove(&self.ctx.viewer_id);
        }
        metrics::gauge!(crate::observability::SESSIONS_ACTIVE).decrement(1.0);
        info!("session closed: {} in {}", self.ctx.viewer_id, self.key.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use chrono::NaiveDate;
    use std::fs;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("crewcal_test_session").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn draft(title: &str) -> BookingDraft {
        BookingDraft::new(
            title,
            NaiveDate::from_ymd_opt(2025, 7, 7).unwrap(),
            "09:00",
            "17:00",
            BookingStatus::Held,
        )
    }

    #[test]
    fn role_from_application_name() {
        assert_eq!(UserRole::from_application_name(Some("production")), UserRole::Production);
        assert_eq!(UserRole::from_application_name(Some(" Production ")), UserRole::Production);
        assert_eq!(UserRole::from_application_name(Some("psql")), UserRole::Assistant);
        assert_eq!(UserRole::from_application_name(None), UserRole::Assistant);
    }

    #[test]
    fn viewer_permissions() {
        let mut ctx = ViewerContext::new("sara", UserRole::Assistant);
        assert!(ctx.can_view("sara"));
        assert!(!ctx.can_view("abc-studios"));
        assert!(!ctx.can_change_status("abc-studios"));

        ctx.toggle_role();
        assert_eq!(ctx.role, UserRole::Production);
        assert!(ctx.can_view("abc-studios"));
        assert!(ctx.can_change_status("abc-studios"));
    }

    #[tokio::test]
    async fn workspace_isolation() {
        let sm = SessionManager::in_memory();
        let a = sm.workspace("studio_a").unwrap();
        let b = sm.workspace("studio_b").unwrap();

        a.create_booking("sara", draft("Commercial")).await.unwrap();
        assert_eq!(a.list_bookings("sara").await.unwrap().len(), 1);
        assert!(b.list_bookings("sara").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn workspace_lazy_creation() {
        let dir = test_data_dir("lazy");
        let sm = SessionManager::new(dir.clone(), 1000);

        let entries: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert!(entries.is_empty());

        let _engine = sm.workspace("my_db").unwrap();
        assert!(dir.join("my_db.wal").exists());
    }

    #[tokio::test]
    async fn workspace_same_engine_returned() {
        let sm = SessionManager::in_memory();
        let e1 = sm.workspace("foo").unwrap();
        let e2 = sm.workspace("foo").unwrap();
        assert!(Arc::ptr_eq(&e1, &e2));
        assert_eq!(sm.workspace_count(), 1);
    }

    #[tokio::test]
    async fn workspace_name_rejects_unsafe_characters() {
        let dir = test_data_dir("unsafe_names");
        let sm = SessionManager::new(dir.clone(), 1000);

        for name in ["../evil", "../..", "studio.a", "studio a", "", "café"] {
            let err = sm.workspace(name).err().unwrap();
            assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput, "{name:?}");
        }
        assert_eq!(sm.workspace_count(), 0);
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn workspaces_never_share_a_log() {
        let dir = test_data_dir("distinct_logs");
        {
            let sm = SessionManager::new(dir.clone(), 1000);
            let a = sm.workspace("studio-a").unwrap();
            let b = sm.workspace("studioa").unwrap();
            assert!(!Arc::ptr_eq(&a, &b));
            a.create_booking("sara", draft("A-only")).await.unwrap();
            b.create_booking("sara", draft("B-only")).await.unwrap();

            // Case folds onto the same workspace rather than a second writer.
            let upper = sm.workspace("STUDIOA").unwrap();
            assert!(Arc::ptr_eq(&upper, &b));
        }

        let sm = SessionManager::new(dir.clone(), 1000);
        let titles = |bookings: Vec<Booking>| bookings.into_iter().map(|b| b.title).collect::<Vec<_>>();
        let a = sm.workspace("studio-a").unwrap();
        let b = sm.workspace("studioa").unwrap();
        assert_eq!(titles(a.list_bookings("sara").await.unwrap()), vec!["A-only"]);
        assert_eq!(titles(b.list_bookings("sara").await.unwrap()), vec!["B-only"]);
    }

    #[tokio::test]
    async fn workspace_name_too_long() {
        let sm = SessionManager::in_memory();
        let long_name = "x".repeat(MAX_WORKSPACE_NAME_LEN + 1);
        let err = sm.workspace(&long_name).err().unwrap();
        assert!(err.to_string().contains("workspace name too long"));
    }

    #[tokio::test]
    async fn workspace_count_limit() {
        let sm = SessionManager::in_memory();
        for i in 0..MAX_WORKSPACES {
            sm.workspace(&format!("w{i}")).unwrap();
        }
        let err = sm.workspace("one_more").err().unwrap();
        assert!(err.to_string().contains("too many workspaces"));
    }

    #[tokio::test]
    async fn session_lifecycle_unloads_on_last_close() {
        let sm = SessionManager::in_memory();
        let first = sm
            .open_session("studio", ViewerContext::new("sara", UserRole::Assistant))
            .await
            .unwrap();
        let second = sm
            .open_session("studio", ViewerContext::new("sara", UserRole::Assistant))
            .await
            .unwrap();
        assert_eq!(sm.session_count("studio", "sara"), 2);
        assert!(first.engine().is_loaded("sara"));

        let b = first.engine().create_booking("sara", draft("Film")).await.unwrap();

        first.close();
        assert_eq!(sm.session_count("studio", "sara"), 1);
        assert!(second.engine().is_loaded("sara"));

        let engine = second.engine().clone();
        second.close();
        assert_eq!(sm.session_count("studio", "sara"), 0);
        assert!(!engine.is_loaded("sara"));

        // Saved bookings come back with the next session.
        let again = sm
            .open_session("studio", ViewerContext::new("sara", UserRole::Assistant))
            .await
            .unwrap();
        assert_eq!(again.engine().get_booking(&b.id).await.unwrap().title, "Film");
        again.close();
    }

    #[tokio::test]
    async fn session_subscribe_and_toggle() {
        let sm = SessionManager::in_memory();
        let mut session = sm
            .open_session("studio", ViewerContext::new("sara", UserRole::Assistant))
            .await
            .unwrap();
        let mut rx = session.subscribe();
        session.engine().create_booking("sara", draft("Doc")).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().kind, NotificationKind::BlockAdded);

        assert_eq!(session.toggle_role(), UserRole::Production);
        assert_eq!(session.ctx().role, UserRole::Production);
        session.close();
    }

    #[tokio::test]
    async fn session_rejects_blank_viewer() {
        let sm = SessionManager::in_memory();
        let result = sm
            .open_session("studio", ViewerContext::new("", UserRole::Assistant))
            .await;
        assert!(matches!(result, Err(SessionError::Engine(EngineError::Validation(_)))));
        assert_eq!(sm.session_count("studio", ""), 0);
    }
}
