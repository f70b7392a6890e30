use social_connect_domain::{Connection, UserId};

/// Provisions a local user for a provider account that no local user is
/// connected to yet.
#[async_trait::async_trait]
pub trait IConnectionSignUp: Send + Sync {
    /// Returns the id of the new local user, or `None` to decline the sign-up
    async fn execute(&self, connection: &Connection) -> Option<UserId>;
}

/// Provisions users with freshly generated ids. The user store owning local
/// accounts is expected to pick them up lazily.
pub struct GeneratedUserIdSignUp;

#[async_trait::async_trait]
impl IConnectionSignUp for GeneratedUserIdSignUp {
    async fn execute(&self, _connection: &Connection) -> Option<UserId> {
        Some(UserId::new())
    }
}
