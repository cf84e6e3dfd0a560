use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use anyhow::Context;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use crate::backend::AuthProvider;

/// Sessions this close to their expiry are refreshed ahead of time
const EXPIRY_MARGIN_SECONDS: i64 = 30;

/// The identity attached to a [`Session`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub is_anonymous: bool,
}

impl PartialEq for AuthUser {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

/// An authenticated session, as handed out by the identity provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Lifetime of the access token in seconds
    pub expires_in: i64,
    /// Unix timestamp (seconds) at which the access token expires
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: AuthUser,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl Session {

    /// Fills in `expires_at` from `expires_in`, if the provider left it out
    pub fn with_expiry_from(mut self, issued_at: DateTime<Utc>) -> Self {
        if self.expires_at.is_none() {
            self.expires_at = Some(issued_at.timestamp() + self.expires_in);
        }
        self
    }

    /// If the access token is expired (or about to be) at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now.timestamp() + EXPIRY_MARGIN_SECONDS >= expires_at,
            None => false,
        }
    }

}

/// Changes of the authentication state, delivered to subscribers of the [`SessionManager`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthEvent {
    /// The persisted session was restored (or found absent) on startup
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
}

/// Persists the session between app launches
pub trait SessionStore: Send + Sync {

    fn load(&self) -> anyhow::Result<Option<Session>>;

    fn save(&self, session: Option<&Session>) -> anyhow::Result<()>;

}

/// Stores the session as JSON in a file. A missing file means no session.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }
}

impl SessionStore for FileSessionStore {

    fn load(&self) -> anyhow::Result<Option<Session>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Could not read session from {}", self.path.display()))?;
        let session = serde_json::from_str(&text).context("Could not parse persisted session")?;
        Ok(Some(session))
    }

    fn save(&self, session: Option<&Session>) -> anyhow::Result<()> {
        match session {
            Some(session) => {
                let text = serde_json::to_string(session)?;
                std::fs::write(&self.path, text)
                    .with_context(|| format!("Could not write session to {}", self.path.display()))
            }
            None if self.path.exists() => std::fs::remove_file(&self.path)
                .with_context(|| format!("Could not remove session file {}", self.path.display())),
            None => Ok(()),
        }
    }

}

/// Keeps the session in memory only, it is gone once the process exits
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    session: Mutex<Option<Session>>,
}

impl SessionStore for MemorySessionStore {

    fn load(&self) -> anyhow::Result<Option<Session>> {
        Ok(self.session.lock().unwrap().clone())
    }

    fn save(&self, session: Option<&Session>) -> anyhow::Result<()> {
        *self.session.lock().unwrap() = session.cloned();
        Ok(())
    }

}

/// Handle returned by [`SessionManager::subscribe()`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(usize);

type Listener = Box<dyn FnMut(AuthEvent, Option<&Session>) + Send>;

/// Owns the current [`Session`] and tells subscribers whenever it changes. \
/// `loading` stays true until [`SessionManager::initialize()`] has run, routes should not be decided before that.
pub struct SessionManager {
    auth: Arc<dyn AuthProvider>,
    store: Box<dyn SessionStore>,
    session: Option<Session>,
    loading: bool,
    listeners: Vec<(SubscriptionId, Listener)>,
    next_subscription: usize,
}

impl SessionManager {

    pub fn new(auth: Arc<dyn AuthProvider>, store: Box<dyn SessionStore>) -> Self {
        Self {
            auth,
            store,
            session: None,
            loading: true,
            listeners: vec![],
            next_subscription: 0,
        }
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn user(&self) -> Option<&AuthUser> {
        self.session.as_ref().map(|s| &s.user)
    }

    pub fn loading(&self) -> bool {
        self.loading
    }

    /// Registers a callback, which is invoked on every [`AuthEvent`]
    pub fn subscribe(&mut self, listener: impl FnMut(AuthEvent, Option<&Session>) + Send + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.listeners.retain(|(listener_id, _)| *listener_id != id);
    }

    /// Restores the persisted session, refreshing it if it has expired. \
    /// A session that cannot be restored or refreshed is dropped, this never fails.
    pub fn initialize(&mut self, now: DateTime<Utc>) {
        let restored = match self.store.load() {
            Ok(session) => session,
            Err(e) => {
                warn!("Discarding persisted session: {:#}", e);
                None
            }
        };
        let session = match restored {
            Some(session) if session.is_expired(now) => {
                debug!("Persisted session expired, refreshing");
                match self.auth.refresh_session(&session.refresh_token) {
                    Ok(refreshed) => Some(refreshed.with_expiry_from(now)),
                    Err(e) => {
                        warn!("Could not refresh persisted session: {:#}", e);
                        None
                    }
                }
            }
            other => other,
        };
        self.loading = false;
        self.replace_session(session, AuthEvent::InitialSession);
    }

    pub fn sign_in_with_email(&mut self, email: &str, password: &str, now: DateTime<Utc>) -> anyhow::Result<()> {
        let session = self.auth.sign_in_with_password(email.trim(), password)?;
        info!("Signed in as {}", session.user.id);
        self.replace_session(Some(session.with_expiry_from(now)), AuthEvent::SignedIn);
        Ok(())
    }

    /// Registers a new account. \
    /// Returns false, if the account has to confirm its e-mail address before it can sign in.
    pub fn sign_up(&mut self, email: &str, password: &str, now: DateTime<Utc>) -> anyhow::Result<bool> {
        match self.auth.sign_up(email.trim(), password)? {
            Some(session) => {
                info!("Signed up as {}", session.user.id);
                self.replace_session(Some(session.with_expiry_from(now)), AuthEvent::SignedIn);
                Ok(true)
            }
            None => {
                info!("Signed up, waiting for e-mail confirmation");
                Ok(false)
            }
        }
    }

    pub fn sign_in_anonymously(&mut self, now: DateTime<Utc>) -> anyhow::Result<()> {
        let session = self.auth.sign_in_anonymously()?;
        info!("Signed in anonymously as {}", session.user.id);
        self.replace_session(Some(session.with_expiry_from(now)), AuthEvent::SignedIn);
        Ok(())
    }

    /// Signs out. The local session is dropped even if the backend could not be reached.
    pub fn sign_out(&mut self) -> anyhow::Result<()> {
        let result = match &self.session {
            Some(session) => self.auth.sign_out(session),
            None => Ok(()),
        };
        self.replace_session(None, AuthEvent::SignedOut);
        result
    }

    /// Asks the identity provider who the current session belongs to. \
    /// Returns `None` without a request, if there is no session.
    pub fn fetch_user(&self) -> anyhow::Result<Option<AuthUser>> {
        match &self.session {
            Some(session) => Ok(Some(self.auth.get_user(&session.access_token)?)),
            None => Ok(None),
        }
    }

    /// Refreshes the session if its access token has expired at `now`. \
    /// Returns if a refresh happened.
    pub fn refresh_if_expired(&mut self, now: DateTime<Utc>) -> anyhow::Result<bool> {
        let Some(session) = &self.session else { return Ok(false) };
        if !session.is_expired(now) {
            return Ok(false);
        }
        match self.auth.refresh_session(&session.refresh_token) {
            Ok(refreshed) => {
                self.replace_session(Some(refreshed.with_expiry_from(now)), AuthEvent::TokenRefreshed);
                Ok(true)
            }
            Err(e) => {
                self.replace_session(None, AuthEvent::SignedOut);
                Err(e.context("Session expired"))
            }
        }
    }

    fn replace_session(&mut self, session: Option<Session>, event: AuthEvent) {
        self.auth.set_session(session.clone());
        if let Err(e) = self.store.save(session.as_ref()) {
            warn!("Could not persist session: {:#}", e);
        }
        self.session = session;
        debug!("Auth event {:?}", event);
        for (_, listener) in self.listeners.iter_mut() {
            listener(event, self.session.as_ref());
        }
    }

}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;
    use crate::backend::MockAuthProvider;

    pub(crate) fn session_for(user_id: &str, expires_at: i64) -> Session {
        Session {
            access_token: format!("access-{}", user_id),
            refresh_token: format!("refresh-{}", user_id),
            token_type: "bearer".to_string(),
            expires_in: 3600,
            expires_at: Some(expires_at),
            user: AuthUser { id: user_id.to_string(), email: None, is_anonymous: false },
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 20, 12, 0, 0).unwrap()
    }

    fn recorder(manager: &mut SessionManager) -> Arc<Mutex<Vec<(AuthEvent, Option<String>)>>> {
        let events = Arc::new(Mutex::new(vec![]));
        let sink = events.clone();
        manager.subscribe(move |event, session| {
            sink.lock().unwrap().push((event, session.map(|s| s.user.id.clone())));
        });
        events
    }

    #[test]
    fn test_initialize_restores_valid_session() {
        let store = MemorySessionStore::default();
        store.save(Some(&session_for("u1", now().timestamp() + 600))).unwrap();
        let mut auth = MockAuthProvider::new();
        auth.expect_refresh_session().never();
        auth.expect_set_session()
            .withf(|session| session.as_ref().map(|s| s.user.id.as_str()) == Some("u1"))
            .times(1)
            .return_const(());

        let mut manager = SessionManager::new(Arc::new(auth), Box::new(store));
        let events = recorder(&mut manager);
        assert!(manager.loading());
        manager.initialize(now());

        assert!(!manager.loading());
        assert_eq!(manager.user().map(|u| u.id.as_str()), Some("u1"));
        assert_eq!(*events.lock().unwrap(), vec![(AuthEvent::InitialSession, Some("u1".to_string()))]);
    }

    #[test]
    fn test_initialize_drops_session_that_cannot_be_refreshed() {
        let store = MemorySessionStore::default();
        store.save(Some(&session_for("u1", now().timestamp() - 10))).unwrap();
        let mut auth = MockAuthProvider::new();
        auth.expect_refresh_session()
            .withf(|token| token == "refresh-u1")
            .returning(|_| Err(anyhow::anyhow!("Invalid Refresh Token")));
        auth.expect_set_session().return_const(());

        let mut manager = SessionManager::new(Arc::new(auth), Box::new(store));
        manager.initialize(now());
        assert!(manager.session().is_none());
        assert!(!manager.loading());
    }

    #[test]
    fn test_sign_in_and_out_notify_subscribers() {
        let mut auth = MockAuthProvider::new();
        auth.expect_sign_in_with_password()
            .withf(|email, password| email == "ida@example.com" && password == "hunter2")
            .returning(|_, _| Ok(session_for("u2", 0)));
        auth.expect_sign_out().returning(|_| Ok(()));
        auth.expect_set_session().return_const(());

        let mut manager = SessionManager::new(Arc::new(auth), Box::new(MemorySessionStore::default()));
        let events = recorder(&mut manager);
        manager.sign_in_with_email(" ida@example.com ", "hunter2", now()).unwrap();
        manager.sign_out().unwrap();

        assert_eq!(*events.lock().unwrap(), vec![
            (AuthEvent::SignedIn, Some("u2".to_string())),
            (AuthEvent::SignedOut, None),
        ]);
    }

    #[test]
    fn test_failed_sign_in_keeps_state() {
        let mut auth = MockAuthProvider::new();
        auth.expect_sign_in_with_password()
            .returning(|_, _| Err(anyhow::anyhow!("Invalid login credentials")));
        auth.expect_set_session().never();

        let mut manager = SessionManager::new(Arc::new(auth), Box::new(MemorySessionStore::default()));
        let error = manager.sign_in_with_email("ida@example.com", "wrong", now()).unwrap_err();
        assert_eq!(error.to_string(), "Invalid login credentials");
        assert!(manager.session().is_none());
    }

    #[test]
    fn test_unsubscribed_listener_is_not_called() {
        let mut auth = MockAuthProvider::new();
        auth.expect_sign_in_anonymously().returning(|| Ok(session_for("anon", 0)));
        auth.expect_set_session().return_const(());

        let mut manager = SessionManager::new(Arc::new(auth), Box::new(MemorySessionStore::default()));
        let events = recorder(&mut manager);
        manager.unsubscribe(SubscriptionId(0));
        manager.sign_in_anonymously(now()).unwrap();
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_refresh_if_expired() {
        let mut auth = MockAuthProvider::new();
        auth.expect_sign_in_with_password()
            .returning(move |_, _| Ok(session_for("u3", now().timestamp() + 5)));
        auth.expect_refresh_session()
            .times(1)
            .returning(move |_| Ok(session_for("u3", now().timestamp() + 3600)));
        auth.expect_set_session().return_const(());

        let mut manager = SessionManager::new(Arc::new(auth), Box::new(MemorySessionStore::default()));
        manager.sign_in_with_email("a@b.c", "pw", now()).unwrap();
        assert!(manager.refresh_if_expired(now()).unwrap());
        assert!(!manager.refresh_if_expired(now()).unwrap());
        assert_eq!(manager.session().unwrap().expires_at, Some(now().timestamp() + 3600));
    }

    #[test]
    fn test_fetch_user_uses_session_token() {
        let mut auth = MockAuthProvider::new();
        auth.expect_sign_in_anonymously().returning(|| Ok(session_for("anon", i64::MAX)));
        auth.expect_set_session().return_const(());
        auth.expect_get_user()
            .withf(|token| token == "access-anon")
            .times(1)
            .returning(|_| Ok(AuthUser { id: "anon".to_string(), email: None, is_anonymous: true }));

        let mut manager = SessionManager::new(Arc::new(auth), Box::new(MemorySessionStore::default()));
        assert_eq!(manager.fetch_user().unwrap(), None);
        manager.sign_in_anonymously(now()).unwrap();
        assert!(manager.fetch_user().unwrap().unwrap().is_anonymous);
    }

    #[test]
    fn test_file_session_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("session.json"));
        assert_eq!(store.load().unwrap(), None);
        let session = session_for("u4", 1_700_000_000);
        store.save(Some(&session)).unwrap();
        assert_eq!(store.load().unwrap(), Some(session));
        store.save(None).unwrap();
        assert!(!dir.path().join("session.json").exists());
    }

    #[test]
    fn test_missing_expiry_is_derived() {
        let mut session = session_for("u5", 0);
        session.expires_at = None;
        let session = session.with_expiry_from(now());
        assert_eq!(session.expires_at, Some(now().timestamp() + 3600));
        assert!(!session.is_expired(now()));
        assert!(session.is_expired(now() + chrono::Duration::seconds(3590)));
    }
}
