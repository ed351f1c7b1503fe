//! Server-side sessions.
//!
//! A session binds an opaque key to a database URL. The database connection is opened on
//! first use, kept for later requests of the same session, and closed again by the idle
//! sweep. A session left unused for longer than its expiry is destroyed by the same sweep.
//! Requests of one session are serialized by holding the session lock for the whole
//! request.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distr::Alphanumeric;
use taps::bail;
use taps::db::{AnyDatabase, Connector};
use taps::error::{ErrorKind, TapsResult};
use taps::url::safe_url;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info};

const SESSION_KEY_LENGTH: usize = 32;

#[derive(Debug)]
pub struct Session {
    pub key: String,
    pub database_url: String,
    pub started_at: DateTime<Utc>,
    last_access: Instant,
    connection: Option<AnyDatabase>,
    expired: bool,
}

impl Session {
    pub fn last_access(&self) -> Instant {
        self.last_access
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }
}

/// Exclusive access to a session for the duration of one request.
#[derive(Debug)]
pub struct SessionGuard {
    session: OwnedMutexGuard<Session>,
}

impl SessionGuard {
    pub fn key(&self) -> &str {
        &self.session.key
    }

    pub fn db(&self) -> TapsResult<&AnyDatabase> {
        match &self.session.connection {
            Some(db) => Ok(db),
            None => bail!(
                ErrorKind::InvalidState,
                "Session has no open connection",
                &self.session.key
            ),
        }
    }
}

/// Outcome of one idle sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Sweep {
    pub closed_connections: usize,
    pub expired_sessions: usize,
}

/// All open sessions of the server.
#[derive(Debug)]
pub struct SessionRegistry {
    connector: Connector,
    default_database_url: Option<String>,
    idle_timeout: Duration,
    expire_after: Duration,
    sessions: Mutex<HashMap<String, Arc<Mutex<Session>>>>,
}

impl SessionRegistry {
    /// When `default_database_url` is set every session is bound to it, whatever the client
    /// asks for.
    pub fn new(
        connector: Connector,
        default_database_url: Option<String>,
        idle_timeout: Duration,
        expire_after: Duration,
    ) -> Self {
        Self {
            connector,
            default_database_url,
            idle_timeout,
            expire_after,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a new session and returns its key. No connection is made yet.
    pub async fn open(&self, requested_url: Option<&str>) -> TapsResult<String> {
        let database_url = match (&self.default_database_url, requested_url) {
            (Some(url), _) => url.clone(),
            (None, Some(url)) if !url.trim().is_empty() => url.trim().to_string(),
            (None, _) => bail!(
                ErrorKind::ConfigError,
                "Server has no database and the request did not name one"
            ),
        };

        let key = generate_key();
        let session = Session {
            key: key.clone(),
            database_url,
            started_at: Utc::now(),
            last_access: Instant::now(),
            connection: None,
            expired: false,
        };

        info!(
            session = %key,
            database_url = %safe_url(&session.database_url),
            "opened session"
        );
        self.sessions
            .lock()
            .await
            .insert(key.clone(), Arc::new(Mutex::new(session)));

        Ok(key)
    }

    pub async fn lookup(&self, key: &str) -> TapsResult<Arc<Mutex<Session>>> {
        match self.sessions.lock().await.get(key) {
            Some(session) => Ok(session.clone()),
            None => bail!(ErrorKind::SessionNotFound, "Session does not exist", key),
        }
    }

    /// Waits for exclusive access to the session and connects it if needed.
    pub async fn acquire(&self, key: &str) -> TapsResult<SessionGuard> {
        let mut session = self.lookup(key).await?.lock_owned().await;
        if session.expired {
            bail!(ErrorKind::SessionNotFound, "Session does not exist", key);
        }

        if session.connection.is_none() {
            debug!(session = %key, "connecting session");
            let db = self.connector.connect(&session.database_url).await?;
            session.connection = Some(db);
        }
        session.last_access = Instant::now();

        Ok(SessionGuard { session })
    }

    /// Gives the session back after a request.
    pub fn release(&self, mut guard: SessionGuard) {
        guard.session.last_access = Instant::now();
    }

    pub async fn close(&self, key: &str) -> TapsResult<()> {
        let Some(session) = self.sessions.lock().await.remove(key) else {
            bail!(ErrorKind::SessionNotFound, "Session does not exist", key);
        };

        let mut session = session.lock().await;
        if let Some(db) = session.connection.take() {
            db.close().await;
        }
        info!(session = %key, "closed session");

        Ok(())
    }

    /// Closes the connections of sessions unused for longer than the idle timeout and
    /// destroys sessions unused for longer than the expiry. Sessions busy with a request are
    /// skipped.
    pub async fn evict_idle(&self) -> Sweep {
        let sessions: Vec<_> = self.sessions.lock().await.values().cloned().collect();

        let mut sweep = Sweep::default();
        for session in sessions {
            let Ok(mut session) = session.try_lock() else {
                continue;
            };

            let idle = session.last_access.elapsed();
            if idle < self.idle_timeout {
                continue;
            }

            if let Some(db) = session.connection.take() {
                db.close().await;
                sweep.closed_connections += 1;
                debug!(session = %session.key, "evicted idle connection");
            }

            if idle >= self.expire_after {
                session.expired = true;
                self.sessions.lock().await.remove(&session.key);
                sweep.expired_sessions += 1;
                info!(session = %session.key, "expired idle session");
            }
        }

        sweep
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Runs [`SessionRegistry::evict_idle`] every `interval` until the task is aborted.
    pub fn start_sweeper(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let sweep = self.evict_idle().await;
                if sweep != Sweep::default() {
                    info!(
                        closed_connections = sweep.closed_connections,
                        expired_sessions = sweep.expired_sessions,
                        "swept idle sessions"
                    );
                }
            }
        })
    }
}

fn generate_key() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(SESSION_KEY_LENGTH)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use taps::db::Database;
    use taps::test_utils::table::{memory_database, widget_rows, widgets_schema};

    use super::*;

    async fn registry(idle_timeout: Duration, expire_after: Duration) -> SessionRegistry {
        let connector = Connector::new();
        let db = memory_database(vec![(widgets_schema(), widget_rows(1..=3))]).await;
        connector.register_memory("remote", db).await;

        SessionRegistry::new(
            connector,
            Some("memory://remote".to_string()),
            idle_timeout,
            expire_after,
        )
    }

    const LONG: Duration = Duration::from_secs(600);

    #[tokio::test]
    async fn sessions_connect_lazily() {
        let registry = registry(LONG, LONG).await;
        let key = registry.open(None).await.unwrap();
        assert_eq!(key.len(), SESSION_KEY_LENGTH);

        let session = registry.lookup(&key).await.unwrap();
        assert!(!session.lock().await.is_connected());

        let guard = registry.acquire(&key).await.unwrap();
        assert_eq!(guard.db().unwrap().count_rows("widgets").await.unwrap(), 3);
        registry.release(guard);
        assert!(session.lock().await.is_connected());
    }

    #[tokio::test]
    async fn default_database_wins_over_the_request() {
        let registry = registry(LONG, LONG).await;
        let key = registry.open(Some("memory://elsewhere")).await.unwrap();

        let session = registry.lookup(&key).await.unwrap();
        assert_eq!(session.lock().await.database_url, "memory://remote");
    }

    #[tokio::test]
    async fn sessions_need_a_database() {
        let registry = SessionRegistry::new(Connector::new(), None, LONG, LONG);
        let err = registry.open(Some("  ")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigError);

        let key = registry.open(Some("memory://mine")).await.unwrap();
        assert!(registry.acquire(&key).await.is_ok());
    }

    #[tokio::test]
    async fn closed_sessions_are_gone() {
        let registry = registry(LONG, LONG).await;
        let key = registry.open(None).await.unwrap();
        registry.close(&key).await.unwrap();

        assert!(registry.is_empty().await);
        let err = registry.acquire(&key).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionNotFound);
        let err = registry.close(&key).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionNotFound);
    }

    #[tokio::test]
    async fn idle_connections_are_evicted_and_reopened() {
        let registry = registry(Duration::ZERO, LONG).await;
        let key = registry.open(None).await.unwrap();
        let guard = registry.acquire(&key).await.unwrap();

        // Busy sessions are left alone.
        assert_eq!(registry.evict_idle().await, Sweep::default());
        registry.release(guard);

        let sweep = registry.evict_idle().await;
        assert_eq!(sweep.closed_connections, 1);
        assert_eq!(sweep.expired_sessions, 0);
        let session = registry.lookup(&key).await.unwrap();
        assert!(!session.lock().await.is_connected());

        let guard = registry.acquire(&key).await.unwrap();
        assert_eq!(guard.db().unwrap().count_rows("widgets").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn expired_sessions_are_destroyed() {
        let registry = registry(Duration::ZERO, Duration::ZERO).await;
        let idle = registry.open(None).await.unwrap();
        let never_used = registry.open(None).await.unwrap();
        let guard = registry.acquire(&idle).await.unwrap();
        registry.release(guard);

        // A request that looked the session up before the sweep must not revive it.
        let stale = registry.lookup(&idle).await.unwrap();
        let sweep = registry.evict_idle().await;
        assert_eq!(
            sweep,
            Sweep {
                closed_connections: 1,
                expired_sessions: 2,
            }
        );
        assert!(registry.is_empty().await);
        assert!(stale.lock().await.expired);

        for key in [idle, never_used] {
            let err = registry.acquire(&key).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::SessionNotFound);
        }
    }
}
