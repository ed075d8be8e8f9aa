pub mod auth;
pub mod commands;
pub mod connection;
pub mod error;
pub mod registry;
pub mod render;

pub use auth::{AuthErrorCode, AuthSession, Authenticator, CharacterIdentity, DemoAuthenticator};
pub use commands::Command;
pub use connection::{handle_connection, ConnectionDeps};
pub use error::SessionError;
pub use registry::{AlreadyConnected, SessionRegistry};
