//! Process-wide session state
//!
//! The authenticated identity is shared by every screen: read
//! constantly, mutated only by explicit sign-in/sign-out, refreshed
//! behind the scenes by the gateway's own token machinery. The
//! [`SessionManager`] caches the current session, mirrors the
//! gateway's auth-change stream, and re-broadcasts transitions so
//! screens can invalidate identity-derived state (the liked-posts set,
//! the profile) the moment the identity changes.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{FeedError, FeedResult};
use crate::gateway::{AuthChange, AuthGateway, AuthSession, FeedStore};
use crate::types::{Profile, UserId};

/// Capacity for the re-broadcast of auth changes
const AUTH_CHANNEL_CAPACITY: usize = 64;

/// Cached process-wide identity with auth-change fan-out
pub struct SessionManager {
    auth: Arc<dyn AuthGateway>,
    store: Arc<dyn FeedStore>,
    current: Arc<RwLock<Option<AuthSession>>>,
    event_tx: broadcast::Sender<AuthChange>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(auth: Arc<dyn AuthGateway>, store: Arc<dyn FeedStore>) -> Self {
        let (event_tx, _) = broadcast::channel(AUTH_CHANNEL_CAPACITY);
        Self {
            auth,
            store,
            current: Arc::new(RwLock::new(None)),
            event_tx,
            watcher: Mutex::new(None),
        }
    }

    /// Load any persisted session and start mirroring auth changes.
    ///
    /// Idempotent; a second call replaces the watcher task.
    pub async fn start(&self) -> FeedResult<()> {
        let existing = self.auth.session().await?;
        if let Some(session) = &existing {
            info!(user_id = %session.user_id, "Restored session");
        }
        *self.current.write() = existing;

        let mut changes = self.auth.auth_changes();
        let current = self.current.clone();
        let event_tx = self.event_tx.clone();
        let task = tokio::spawn(async move {
            while let Ok(change) = changes.recv().await {
                match &change {
                    AuthChange::SignedIn(session) => {
                        debug!(user_id = %session.user_id, "Auth change: signed in");
                        *current.write() = Some(session.clone());
                    }
                    AuthChange::SignedOut => {
                        debug!("Auth change: signed out");
                        *current.write() = None;
                    }
                }
                let _ = event_tx.send(change);
            }
        });

        if let Some(old) = self.watcher.lock().replace(task) {
            old.abort();
        }
        Ok(())
    }

    /// Stop mirroring auth changes
    pub fn shutdown(&self) {
        if let Some(task) = self.watcher.lock().take() {
            task.abort();
        }
    }

    /// Subscribe to identity transitions
    pub fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.event_tx.subscribe()
    }

    /// The current session, if any
    pub fn current(&self) -> Option<AuthSession> {
        self.current.read().clone()
    }

    /// The signed-in user id, or `AuthRequired`
    pub fn current_user(&self) -> FeedResult<UserId> {
        self.current
            .read()
            .as_ref()
            .map(|s| s.user_id)
            .ok_or(FeedError::AuthRequired)
    }

    /// Sign in and cache the session immediately (the watcher will see
    /// the broadcast as well; both paths write the same value)
    pub async fn sign_in(&self, email: &str, password: &str) -> FeedResult<AuthSession> {
        let session = self.auth.sign_in(email, password).await?;
        *self.current.write() = Some(session.clone());
        Ok(session)
    }

    /// Sign up; the gateway creates the profile row with a generated
    /// unique username
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> FeedResult<AuthSession> {
        let session = self.auth.sign_up(email, password, display_name).await?;
        *self.current.write() = Some(session.clone());
        Ok(session)
    }

    /// End the session
    pub async fn sign_out(&self) -> FeedResult<()> {
        self.auth.sign_out().await?;
        *self.current.write() = None;
        Ok(())
    }

    /// Fetch the signed-in user's profile row.
    ///
    /// `NotFound` here means the account exists but its profile row
    /// does not; callers treat it as a broken session and route back
    /// to sign-in.
    pub async fn ensure_profile(&self) -> FeedResult<Profile> {
        let user = self.current_user()?;
        self.store.get_profile(user).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::memory::MemoryGateway;

    fn manager() -> (Arc<MemoryGateway>, SessionManager) {
        let gw = Arc::new(MemoryGateway::new());
        gw.seed_user("ada@example.com", "hunter22", "ada");
        let manager = SessionManager::new(gw.clone(), gw.clone());
        (gw, manager)
    }

    #[tokio::test]
    async fn test_no_session_initially() {
        let (_gw, manager) = manager();
        manager.start().await.unwrap();
        assert!(manager.current().is_none());
        assert_eq!(manager.current_user(), Err(FeedError::AuthRequired));
    }

    #[tokio::test]
    async fn test_sign_in_caches_session() {
        let (_gw, manager) = manager();
        manager.start().await.unwrap();
        let session = manager.sign_in("ada@example.com", "hunter22").await.unwrap();
        assert_eq!(manager.current_user().unwrap(), session.user_id);
    }

    #[tokio::test]
    async fn test_sign_out_clears_session() {
        let (_gw, manager) = manager();
        manager.start().await.unwrap();
        manager.sign_in("ada@example.com", "hunter22").await.unwrap();
        manager.sign_out().await.unwrap();
        assert!(manager.current().is_none());
    }

    #[tokio::test]
    async fn test_start_restores_existing_session() {
        let (gw, manager) = manager();
        // Session established before the manager starts (persisted
        // token restored by the gateway).
        gw.sign_in("ada@example.com", "hunter22").await.unwrap();
        manager.start().await.unwrap();
        assert!(manager.current().is_some());
    }

    #[tokio::test]
    async fn test_transitions_are_rebroadcast() {
        let (gw, manager) = manager();
        manager.start().await.unwrap();
        let mut changes = manager.subscribe();

        gw.sign_in("ada@example.com", "hunter22").await.unwrap();
        assert!(matches!(
            changes.recv().await.unwrap(),
            AuthChange::SignedIn(_)
        ));

        gw.sign_out().await.unwrap();
        assert!(matches!(changes.recv().await.unwrap(), AuthChange::SignedOut));
    }

    #[tokio::test]
    async fn test_ensure_profile() {
        let (_gw, manager) = manager();
        manager.start().await.unwrap();
        manager.sign_in("ada@example.com", "hunter22").await.unwrap();
        let profile = manager.ensure_profile().await.unwrap();
        assert_eq!(profile.username, "ada");
    }

    #[tokio::test]
    async fn test_ensure_profile_requires_session() {
        let (_gw, manager) = manager();
        manager.start().await.unwrap();
        assert_eq!(
            manager.ensure_profile().await,
            Err(FeedError::AuthRequired)
        );
    }
}
