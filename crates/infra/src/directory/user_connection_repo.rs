use crate::{repos::IConnectionRepo, ConnectError};
use social_connect_domain::{Connection, ConnectionKey, UserId};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};
use tracing::info;

/// Repository over the connections of a single local user.
///
/// Handles are cheap to create and hold no state of their own, so every
/// handle for the same user observes the same connections.
#[derive(Clone)]
pub struct UserConnectionRepo {
    user_id: UserId,
    connections: Arc<dyn IConnectionRepo>,
}

impl UserConnectionRepo {
    pub(crate) fn new(user_id: UserId, connections: Arc<dyn IConnectionRepo>) -> Self {
        Self {
            user_id,
            connections,
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// All connections of the user grouped by provider id
    pub async fn find_all_connections(
        &self,
    ) -> Result<BTreeMap<String, Vec<Connection>>, ConnectError> {
        let mut connections: BTreeMap<String, Vec<Connection>> = BTreeMap::new();
        for connection in self.connections.find_by_user(&self.user_id).await? {
            connections
                .entry(connection.provider_id().to_string())
                .or_default()
                .push(connection);
        }
        Ok(connections)
    }

    pub async fn find_connections(&self, provider_id: &str) -> Result<Vec<Connection>, ConnectError> {
        let connections = self
            .connections
            .find_by_provider(&self.user_id, provider_id)
            .await?;
        Ok(connections)
    }

    /// For every requested provider the result holds one entry per requested
    /// provider user id, in the same order, which is `None` if the user is
    /// not connected to that account.
    pub async fn find_connections_to_users(
        &self,
        provider_user_ids: &HashMap<String, Vec<String>>,
    ) -> Result<HashMap<String, Vec<Option<Connection>>>, ConnectError> {
        let mut result = HashMap::with_capacity(provider_user_ids.len());
        for (provider_id, user_ids) in provider_user_ids {
            let found = if user_ids.is_empty() {
                Vec::new()
            } else {
                self.connections
                    .find_by_provider_user_ids(&self.user_id, provider_id, user_ids)
                    .await?
            };
            let connections = user_ids
                .iter()
                .map(|id| found.iter().find(|c| c.provider_user_id() == id).cloned())
                .collect();
            result.insert(provider_id.clone(), connections);
        }
        Ok(result)
    }

    pub async fn get_connection(&self, key: &ConnectionKey) -> Result<Connection, ConnectError> {
        self.connections
            .find(&self.user_id, key)
            .await?
            .ok_or_else(|| ConnectError::NoSuchConnection(key.clone()))
    }

    pub async fn get_primary_connection(&self, provider_id: &str) -> Result<Connection, ConnectError> {
        self.find_primary_connection(provider_id)
            .await?
            .ok_or_else(|| ConnectError::NotConnected(provider_id.to_string()))
    }

    pub async fn find_primary_connection(
        &self,
        provider_id: &str,
    ) -> Result<Option<Connection>, ConnectError> {
        let connection = self
            .connections
            .find_primary(&self.user_id, provider_id)
            .await?;
        Ok(connection)
    }

    pub async fn add_connection(&self, connection: &Connection) -> Result<(), ConnectError> {
        self.connections.insert(&self.user_id, connection).await?;
        info!("User {} connected to {}", self.user_id, connection.key);
        Ok(())
    }

    /// Updates profile and credentials of an existing connection
    pub async fn update_connection(&self, connection: &Connection) -> Result<(), ConnectError> {
        if !self.connections.save(&self.user_id, connection).await? {
            return Err(ConnectError::NoSuchConnection(connection.key.clone()));
        }
        Ok(())
    }

    pub async fn remove_connections(&self, provider_id: &str) -> Result<(), ConnectError> {
        let removed = self
            .connections
            .delete_by_provider(&self.user_id, provider_id)
            .await?;
        info!(
            "Removed {} connections of user {} to {}",
            removed, self.user_id, provider_id
        );
        Ok(())
    }

    pub async fn remove_connection(&self, key: &ConnectionKey) -> Result<(), ConnectError> {
        self.connections.delete(&self.user_id, key).await?;
        Ok(())
    }
}
