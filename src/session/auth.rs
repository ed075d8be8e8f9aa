//! Authentication adapter interface.
//!
//! Only the contract is implemented here, matching the narrow
//! `AuthManager` boundary the rest of this codebase's auth routes sit
//! behind — callers depend on `Authenticator`, never on a concrete
//! credential backend. Account storage and real registration are
//! someone else's service; `DemoAuthenticator` is the in-memory test
//! double used where a production backend would otherwise be wired in.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

/// Closed set of reasons authentication or registration can fail.
/// Kept small and specific so callers can render a fixed, predictable
/// message for each one rather than forwarding free-text error
/// strings to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorCode {
    InvalidCredentials,
    AccountLocked,
    UsernameTaken,
    InvalidUsername,
    InvalidPassword,
    CharacterNotFound,
    SessionNotFound,
    /// Any error outside the closed set above. The session maps this
    /// to a generic "failed" message and logs the unexpected error at
    /// WARN with `{event, operation, error}`.
    Other,
}

impl AuthErrorCode {
    /// The fixed, user-visible line for this error. Passwords are
    /// never echoed here or anywhere else on this path.
    pub fn message(self) -> &'static str {
        match self {
            AuthErrorCode::InvalidCredentials => "Invalid username or password.",
            AuthErrorCode::AccountLocked => "This account is locked. Contact an administrator.",
            AuthErrorCode::UsernameTaken => "That username is already taken.",
            AuthErrorCode::InvalidUsername => "That username is not valid.",
            AuthErrorCode::InvalidPassword => "That password is not valid.",
            AuthErrorCode::CharacterNotFound => "Character not found.",
            AuthErrorCode::SessionNotFound => "Session not found.",
            AuthErrorCode::Other => "Login failed. Please try again.",
        }
    }
}

/// The character a successful login, registration, or character
/// selection resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterIdentity {
    pub character_id: String,
    pub display_name: String,
}

/// An authenticated auth-service session: distinct from the per-connection
/// `Session` this crate's domain model describes (spec.md §3) — this is
/// the narrower credential-layer record `login` mints, keyed by
/// `session_id`, that `logout` and `select_character` address by id
/// rather than by character.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub session_id: String,
    pub character: CharacterIdentity,
}

/// Narrow authentication boundary the session calls through, matching
/// spec.md §4.8's interface exactly: `login` takes the client's
/// user agent and peer address (for audit logging by the real backend;
/// this line protocol has no user-agent concept, so the session passes
/// an empty string) and returns a session plus opaque token; `logout`
/// and `select_character` address that session by id. `register` is a
/// pragmatic addition for the `create` wire verb (account creation is
/// not named in spec.md §4.8's operation list, which covers only login,
/// logout, and character selection) and is not part of the spec's own
/// interface contract.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn login(&self, username: &str, password: &str, user_agent: &str, peer_addr: &str) -> Result<(AuthSession, String), AuthErrorCode>;

    async fn register(&self, username: &str, password: &str) -> Result<CharacterIdentity, AuthErrorCode>;

    async fn logout(&self, session_id: &str);

    async fn select_character(&self, session_id: &str, character_id: &str) -> Result<CharacterIdentity, AuthErrorCode>;
}

/// In-memory test double: a fixed username/password/character table,
/// plus any accounts registered at runtime through `register`, and a
/// table of live auth sessions minted by `login`. Used by the binary
/// when no external auth service is configured, and by this module's
/// own tests. Each demo account has exactly one character; multi-character
/// accounts are a real backend's concern, out of scope here.
pub struct DemoAuthenticator {
    accounts: RwLock<HashMap<String, Account>>,
    sessions: RwLock<HashMap<String, CharacterIdentity>>,
}

struct Account {
    password: String,
    identity: CharacterIdentity,
}

impl DemoAuthenticator {
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_account(self, username: impl Into<String>, password: impl Into<String>, character_id: impl Into<String>) -> Self {
        let username = username.into();
        let character_id = character_id.into();
        let identity = CharacterIdentity {
            display_name: character_id.clone(),
            character_id,
        };
        self.accounts.write().insert(username, Account { password: password.into(), identity });
        self
    }
}

impl Default for DemoAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_username(username: &str) -> Result<(), AuthErrorCode> {
    if username.len() < 3 || username.len() > 32 || !username.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(AuthErrorCode::InvalidUsername);
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), AuthErrorCode> {
    if password.len() < 4 {
        return Err(AuthErrorCode::InvalidPassword);
    }
    Ok(())
}

#[async_trait]
impl Authenticator for DemoAuthenticator {
    async fn login(&self, username: &str, password: &str, user_agent: &str, peer_addr: &str) -> Result<(AuthSession, String), AuthErrorCode> {
        let identity = match self.accounts.read().get(username) {
            Some(account) if account.password == password => account.identity.clone(),
            _ => return Err(AuthErrorCode::InvalidCredentials),
        };
        let session_id = uuid::Uuid::new_v4().to_string();
        let token = uuid::Uuid::new_v4().to_string();
        tracing::debug!(username, user_agent, peer_addr, session_id = %session_id, "login succeeded");
        self.sessions.write().insert(session_id.clone(), identity.clone());
        Ok((AuthSession { session_id, character: identity }, token))
    }

    async fn register(&self, username: &str, password: &str) -> Result<CharacterIdentity, AuthErrorCode> {
        validate_username(username)?;
        validate_password(password)?;
        let mut accounts = self.accounts.write();
        if accounts.contains_key(username) {
            return Err(AuthErrorCode::UsernameTaken);
        }
        let identity = CharacterIdentity {
            display_name: username.to_string(),
            character_id: username.to_string(),
        };
        accounts.insert(
            username.to_string(),
            Account {
                password: password.to_string(),
                identity: identity.clone(),
            },
        );
        Ok(identity)
    }

    async fn logout(&self, session_id: &str) {
        self.sessions.write().remove(session_id);
    }

    async fn select_character(&self, session_id: &str, character_id: &str) -> Result<CharacterIdentity, AuthErrorCode> {
        let sessions = self.sessions.read();
        let current = sessions.get(session_id).ok_or(AuthErrorCode::SessionNotFound)?;
        if current.character_id == character_id {
            Ok(current.clone())
        } else {
            Err(AuthErrorCode::CharacterNotFound)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn correct_credentials_resolve_to_the_registered_character() {
        let auth = DemoAuthenticator::new().with_account("alice", "hunter2", "char-alice");
        let (session, _token) = auth.login("alice", "hunter2", "", "127.0.0.1:0").await.unwrap();
        assert_eq!(session.character.character_id, "char-alice");
    }

    #[tokio::test]
    async fn wrong_password_is_rejected() {
        let auth = DemoAuthenticator::new().with_account("alice", "hunter2", "char-alice");
        let err = auth.login("alice", "wrong", "", "127.0.0.1:0").await.unwrap_err();
        assert_eq!(err, AuthErrorCode::InvalidCredentials);
    }

    #[tokio::test]
    async fn unknown_username_is_rejected() {
        let auth = DemoAuthenticator::new();
        let err = auth.login("nobody", "x", "", "127.0.0.1:0").await.unwrap_err();
        assert_eq!(err, AuthErrorCode::InvalidCredentials);
    }

    #[tokio::test]
    async fn register_then_login_succeeds() {
        let auth = DemoAuthenticator::new();
        let registered = auth.register("newplayer", "swordfish").await.unwrap();
        let (session, _token) = auth.login("newplayer", "swordfish", "", "127.0.0.1:0").await.unwrap();
        assert_eq!(registered, session.character);
    }

    #[tokio::test]
    async fn each_login_mints_a_distinct_session_id() {
        let auth = DemoAuthenticator::new().with_account("alice", "hunter2", "char-alice");
        let (first, _) = auth.login("alice", "hunter2", "", "127.0.0.1:0").await.unwrap();
        let (second, _) = auth.login("alice", "hunter2", "", "127.0.0.1:0").await.unwrap();
        assert_ne!(first.session_id, second.session_id);
    }

    #[tokio::test]
    async fn select_character_on_an_unknown_session_reports_session_not_found() {
        let auth = DemoAuthenticator::new();
        let err = auth.select_character("no-such-session", "char-alice").await.unwrap_err();
        assert_eq!(err, AuthErrorCode::SessionNotFound);
    }

    #[tokio::test]
    async fn select_character_matching_the_session_succeeds() {
        let auth = DemoAuthenticator::new().with_account("alice", "hunter2", "char-alice");
        let (session, _) = auth.login("alice", "hunter2", "", "127.0.0.1:0").await.unwrap();
        let identity = auth.select_character(&session.session_id, "char-alice").await.unwrap();
        assert_eq!(identity.character_id, "char-alice");
    }

    #[tokio::test]
    async fn select_character_for_a_different_character_reports_not_found() {
        let auth = DemoAuthenticator::new().with_account("alice", "hunter2", "char-alice");
        let (session, _) = auth.login("alice", "hunter2", "", "127.0.0.1:0").await.unwrap();
        let err = auth.select_character(&session.session_id, "char-bob").await.unwrap_err();
        assert_eq!(err, AuthErrorCode::CharacterNotFound);
    }

    #[tokio::test]
    async fn logout_invalidates_the_session_for_character_selection() {
        let auth = DemoAuthenticator::new().with_account("alice", "hunter2", "char-alice");
        let (session, _) = auth.login("alice", "hunter2", "", "127.0.0.1:0").await.unwrap();
        auth.logout(&session.session_id).await;
        let err = auth.select_character(&session.session_id, "char-alice").await.unwrap_err();
        assert_eq!(err, AuthErrorCode::SessionNotFound);
    }

    #[tokio::test]
    async fn logout_on_an_unknown_session_is_a_no_op() {
        let auth = DemoAuthenticator::new();
        auth.logout("never-logged-in").await;
    }

    #[tokio::test]
    async fn register_rejects_duplicate_username() {
        let auth = DemoAuthenticator::new();
        auth.register("taken", "swordfish").await.unwrap();
        let err = auth.register("taken", "anotherpass").await.unwrap_err();
        assert_eq!(err, AuthErrorCode::UsernameTaken);
    }

    #[tokio::test]
    async fn register_rejects_short_username() {
        let auth = DemoAuthenticator::new();
        let err = auth.register("ab", "swordfish").await.unwrap_err();
        assert_eq!(err, AuthErrorCode::InvalidUsername);
    }

    #[tokio::test]
    async fn register_rejects_short_password() {
        let auth = DemoAuthenticator::new();
        let err = auth.register("someone", "abc").await.unwrap_err();
        assert_eq!(err, AuthErrorCode::InvalidPassword);
    }

    #[test]
    fn error_messages_never_include_a_password() {
        for code in [
            AuthErrorCode::InvalidCredentials,
            AuthErrorCode::AccountLocked,
            AuthErrorCode::UsernameTaken,
            AuthErrorCode::InvalidUsername,
            AuthErrorCode::InvalidPassword,
            AuthErrorCode::CharacterNotFound,
            AuthErrorCode::SessionNotFound,
            AuthErrorCode::Other,
        ] {
            assert!(!code.message().to_ascii_lowercase().contains("password:"));
        }
    }
}
