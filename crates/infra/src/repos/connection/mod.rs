mod inmemory;
mod postgres;

pub use inmemory::InMemoryConnectionRepo;
pub use postgres::PostgresConnectionRepo;
use social_connect_domain::{Connection, ConnectionKey, UserId};

/// Store of the connections of every local user.
///
/// A user's connections to one provider are ranked by insertion order,
/// starting at 1. All lists of connections returned for a single provider
/// are ordered by rank.
#[async_trait::async_trait]
pub trait IConnectionRepo: Send + Sync {
    /// Stores the connection as the last ranked connection of the user to its provider.
    /// Fails with `ConnectError::DuplicateConnection` if the user already has the key.
    async fn insert(&self, user_id: &UserId, connection: &Connection) -> anyhow::Result<()>;
    /// Same as `insert`, but only if no user at all is connected to the key.
    /// Returns `false` without storing anything if the key is already linked.
    async fn insert_if_unlinked(
        &self,
        user_id: &UserId,
        connection: &Connection,
    ) -> anyhow::Result<bool>;
    /// Replaces profile and credentials. Returns `false` if there is nothing to update.
    async fn save(&self, user_id: &UserId, connection: &Connection) -> anyhow::Result<bool>;
    async fn find(&self, user_id: &UserId, key: &ConnectionKey)
        -> anyhow::Result<Option<Connection>>;
    /// Ordered by provider id and then rank
    async fn find_by_user(&self, user_id: &UserId) -> anyhow::Result<Vec<Connection>>;
    async fn find_by_provider(
        &self,
        user_id: &UserId,
        provider_id: &str,
    ) -> anyhow::Result<Vec<Connection>>;
    /// The lowest ranked connection of the user to the provider
    async fn find_primary(
        &self,
        user_id: &UserId,
        provider_id: &str,
    ) -> anyhow::Result<Option<Connection>>;
    async fn find_by_provider_user_ids(
        &self,
        user_id: &UserId,
        provider_id: &str,
        provider_user_ids: &[String],
    ) -> anyhow::Result<Vec<Connection>>;
    async fn find_user_ids_by_key(&self, key: &ConnectionKey) -> anyhow::Result<Vec<UserId>>;
    /// Distinct users connected to any of the given provider accounts
    async fn find_user_ids_connected_to(
        &self,
        provider_id: &str,
        provider_user_ids: &[String],
    ) -> anyhow::Result<Vec<UserId>>;
    async fn delete(&self, user_id: &UserId, key: &ConnectionKey) -> anyhow::Result<()>;
    /// Returns the number of deleted connections
    async fn delete_by_provider(&self, user_id: &UserId, provider_id: &str)
        -> anyhow::Result<u64>;
}
