use social_connect_domain::ConnectionKey;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("No connection to `{0}` exists for this user")]
    NoSuchConnection(ConnectionKey),
    #[error("User is not connected to provider `{0}`")]
    NotConnected(String),
    #[error("A connection to `{0}` already exists for this user")]
    DuplicateConnection(ConnectionKey),
    #[error("Connection store failure: {0}")]
    Store(anyhow::Error),
}

/// Stores report failures as `anyhow::Error`. Failures that carry a
/// `ConnectError`, like a rejected duplicate insert, keep their variant.
impl From<anyhow::Error> for ConnectError {
    fn from(e: anyhow::Error) -> Self {
        match e.downcast::<ConnectError>() {
            Ok(e) => e,
            Err(e) => Self::Store(e),
        }
    }
}
