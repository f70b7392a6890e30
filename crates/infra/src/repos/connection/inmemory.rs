use super::IConnectionRepo;
use crate::{repos::shared::inmemory_repo::*, ConnectError};
use social_connect_domain::{Connection, ConnectionKey, UserId};
use std::{collections::HashSet, sync::Mutex};

#[derive(Debug, Clone)]
struct ConnectionRow {
    user_id: UserId,
    rank: i32,
    connection: Connection,
}

pub struct InMemoryConnectionRepo {
    connections: Mutex<Vec<ConnectionRow>>,
}

impl InMemoryConnectionRepo {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(Vec::new()),
        }
    }

    /// Must be called while holding the lock so that the duplicate check and the
    /// rank assignment see the same rows as the insert.
    fn insert_row(
        rows: &mut Vec<ConnectionRow>,
        user_id: &UserId,
        connection: &Connection,
    ) -> anyhow::Result<()> {
        let mut max_rank = 0;
        for row in rows.iter().filter(|r| {
            r.user_id == *user_id && r.connection.provider_id() == connection.provider_id()
        }) {
            if row.connection.key == connection.key {
                return Err(ConnectError::DuplicateConnection(connection.key.clone()).into());
            }
            max_rank = max_rank.max(row.rank);
        }
        rows.push(ConnectionRow {
            user_id: user_id.clone(),
            rank: max_rank + 1,
            connection: connection.clone(),
        });
        Ok(())
    }

    fn find_ranked<F: Fn(&ConnectionRow) -> bool>(&self, compare: F) -> Vec<Connection> {
        let mut rows = find_by(&self.connections, compare);
        rows.sort_by(|r1, r2| {
            r1.connection
                .provider_id()
                .cmp(r2.connection.provider_id())
                .then(r1.rank.cmp(&r2.rank))
        });
        rows.into_iter().map(|r| r.connection).collect()
    }
}

impl Default for InMemoryConnectionRepo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl IConnectionRepo for InMemoryConnectionRepo {
    async fn insert(&self, user_id: &UserId, connection: &Connection) -> anyhow::Result<()> {
        let mut rows = self.connections.lock().unwrap();
        Self::insert_row(&mut rows, user_id, connection)
    }

    async fn insert_if_unlinked(
        &self,
        user_id: &UserId,
        connection: &Connection,
    ) -> anyhow::Result<bool> {
        let mut rows = self.connections.lock().unwrap();
        if rows.iter().any(|r| r.connection.key == connection.key) {
            return Ok(false);
        }
        Self::insert_row(&mut rows, user_id, connection)?;
        Ok(true)
    }

    async fn save(&self, user_id: &UserId, connection: &Connection) -> anyhow::Result<bool> {
        let updated = update_many(
            &self.connections,
            |r| r.user_id == *user_id && r.connection.key == connection.key,
            |r| r.connection = connection.clone(),
        );
        Ok(updated > 0)
    }

    async fn find(
        &self,
        user_id: &UserId,
        key: &ConnectionKey,
    ) -> anyhow::Result<Option<Connection>> {
        let mut rows = find_by(&self.connections, |r| {
            r.user_id == *user_id && r.connection.key == *key
        });
        Ok(rows.pop().map(|r| r.connection))
    }

    async fn find_by_user(&self, user_id: &UserId) -> anyhow::Result<Vec<Connection>> {
        Ok(self.find_ranked(|r| r.user_id == *user_id))
    }

    async fn find_by_provider(
        &self,
        user_id: &UserId,
        provider_id: &str,
    ) -> anyhow::Result<Vec<Connection>> {
        Ok(self.find_ranked(|r| r.user_id == *user_id && r.connection.provider_id() == provider_id))
    }

    async fn find_primary(
        &self,
        user_id: &UserId,
        provider_id: &str,
    ) -> anyhow::Result<Option<Connection>> {
        let connections = self.find_by_provider(user_id, provider_id).await?;
        Ok(connections.into_iter().next())
    }

    async fn find_by_provider_user_ids(
        &self,
        user_id: &UserId,
        provider_id: &str,
        provider_user_ids: &[String],
    ) -> anyhow::Result<Vec<Connection>> {
        Ok(self.find_ranked(|r| {
            r.user_id == *user_id
                && r.connection.provider_id() == provider_id
                && provider_user_ids.iter().any(|id| id == r.connection.provider_user_id())
        }))
    }

    async fn find_user_ids_by_key(&self, key: &ConnectionKey) -> anyhow::Result<Vec<UserId>> {
        let rows = find_by(&self.connections, |r| r.connection.key == *key);
        Ok(rows.into_iter().map(|r| r.user_id).collect())
    }

    async fn find_user_ids_connected_to(
        &self,
        provider_id: &str,
        provider_user_ids: &[String],
    ) -> anyhow::Result<Vec<UserId>> {
        let rows = find_by(&self.connections, |r| {
            r.connection.provider_id() == provider_id
                && provider_user_ids.iter().any(|id| id == r.connection.provider_user_id())
        });
        let user_ids = rows
            .into_iter()
            .map(|r| r.user_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        Ok(user_ids)
    }

    async fn delete(&self, user_id: &UserId, key: &ConnectionKey) -> anyhow::Result<()> {
        find_and_delete_by(&self.connections, |r| {
            r.user_id == *user_id && r.connection.key == *key
        });
        Ok(())
    }

    async fn delete_by_provider(
        &self,
        user_id: &UserId,
        provider_id: &str,
    ) -> anyhow::Result<u64> {
        let deleted = find_and_delete_by(&self.connections, |r| {
            r.user_id == *user_id && r.connection.provider_id() == provider_id
        });
        Ok(deleted.len() as u64)
    }
}
