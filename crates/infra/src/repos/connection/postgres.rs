use super::IConnectionRepo;
use crate::ConnectError;
use social_connect_domain::{Connection, ConnectionKey, Credentials, UserId};
use sqlx::{
    postgres::{PgArguments, PgDatabaseError, Postgres},
    query::Query,
    FromRow, PgPool, Transaction,
};
use tracing::error;

const UNIQUE_VIOLATION: &str = "23505";
const PRIMARY_KEY: &str = "user_connections_pkey";

// Classes of the two-key advisory locks. A sign-in takes the account lock
// before the rank lock, inserts only take the rank lock.
const ACCOUNT_LOCK: i32 = 1;
const RANK_LOCK: i32 = 2;

const SELECT_CONNECTION: &str = r#"
    SELECT provider_id, provider_user_id, display_name, profile_url, image_url,
    access_token, secret, refresh_token, expire_time
    FROM user_connections
"#;

const INSERT_CONNECTION: &str = r#"
    INSERT INTO user_connections(user_id, provider_id, provider_user_id, rank,
    display_name, profile_url, image_url, access_token, secret, refresh_token, expire_time)
    SELECT $1, $2, $3, COALESCE(MAX(rank), 0) + 1, $4, $5, $6, $7, $8, $9, $10
    FROM user_connections
    WHERE user_id = $1 AND provider_id = $2
"#;

pub struct PostgresConnectionRepo {
    pool: PgPool,
}

impl PostgresConnectionRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn select(&self, filter: &str, binds: Binds<'_>) -> anyhow::Result<Vec<Connection>> {
        let sql = format!("{} {}", SELECT_CONNECTION, filter);
        let mut query = sqlx::query_as::<Postgres, ConnectionRaw>(&sql);
        query = match binds {
            Binds::User(user_id) => query.bind(user_id.as_str()),
            Binds::UserProvider(user_id, provider_id) => {
                query.bind(user_id.as_str()).bind(provider_id)
            }
            Binds::UserKey(user_id, key) => query
                .bind(user_id.as_str())
                .bind(key.provider_id.as_str())
                .bind(key.provider_user_id.as_str()),
            Binds::UserProviderUsers(user_id, provider_id, provider_user_ids) => query
                .bind(user_id.as_str())
                .bind(provider_id)
                .bind(provider_user_ids.to_vec()),
        };
        let connections: Vec<ConnectionRaw> =
            query.fetch_all(&self.pool).await.map_err(|e| {
                error!("Unable to query user connections : {:?}", e);
                e
            })?;
        Ok(connections.into_iter().map(|c| c.into()).collect())
    }
}

enum Binds<'a> {
    User(&'a UserId),
    UserProvider(&'a UserId, &'a str),
    UserKey(&'a UserId, &'a ConnectionKey),
    UserProviderUsers(&'a UserId, &'a str, &'a [String]),
}

#[derive(Debug, FromRow)]
struct ConnectionRaw {
    provider_id: String,
    provider_user_id: String,
    display_name: Option<String>,
    profile_url: Option<String>,
    image_url: Option<String>,
    access_token: String,
    secret: Option<String>,
    refresh_token: Option<String>,
    expire_time: Option<i64>,
}

impl From<ConnectionRaw> for Connection {
    fn from(e: ConnectionRaw) -> Self {
        // Only OAuth1 connections carry a token secret
        let credentials = match e.secret {
            Some(secret) => Credentials::OAuth1 {
                token: e.access_token,
                secret,
            },
            None => Credentials::OAuth2 {
                access_token: e.access_token,
                refresh_token: e.refresh_token,
                expires_at: e.expire_time,
            },
        };
        Self {
            key: ConnectionKey::new(e.provider_id, e.provider_user_id),
            display_name: e.display_name,
            profile_url: e.profile_url,
            image_url: e.image_url,
            credentials,
        }
    }
}

struct CredentialColumns<'a> {
    access_token: &'a str,
    secret: Option<&'a str>,
    refresh_token: Option<&'a str>,
    expire_time: Option<i64>,
}

impl<'a> From<&'a Credentials> for CredentialColumns<'a> {
    fn from(credentials: &'a Credentials) -> Self {
        match credentials {
            Credentials::OAuth1 { token, secret } => Self {
                access_token: token,
                secret: Some(secret),
                refresh_token: None,
                expire_time: None,
            },
            Credentials::OAuth2 {
                access_token,
                refresh_token,
                expires_at,
            } => Self {
                access_token,
                secret: None,
                refresh_token: refresh_token.as_deref(),
                expire_time: *expires_at,
            },
        }
    }
}

fn insert_query<'q>(
    user_id: &'q UserId,
    connection: &'q Connection,
) -> Query<'q, Postgres, PgArguments> {
    let credentials = CredentialColumns::from(&connection.credentials);
    sqlx::query(INSERT_CONNECTION)
        .bind(user_id.as_str())
        .bind(connection.key.provider_id.as_str())
        .bind(connection.key.provider_user_id.as_str())
        .bind(connection.display_name.as_deref())
        .bind(connection.profile_url.as_deref())
        .bind(connection.image_url.as_deref())
        .bind(credentials.access_token)
        .bind(credentials.secret)
        .bind(credentials.refresh_token)
        .bind(credentials.expire_time)
}

/// Held until the transaction ends
async fn advisory_lock(
    tx: &mut Transaction<'_, Postgres>,
    class: i32,
    name: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock($1, hashtext($2))")
        .bind(class)
        .bind(name)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!("Unable to take advisory lock on {} : {:?}", name, e);
            e
        })?;
    Ok(())
}

/// Ranks are assigned from the current max rank, so inserts for the same
/// user and provider must not interleave
async fn insert_ranked(
    tx: &mut Transaction<'_, Postgres>,
    user_id: &UserId,
    connection: &Connection,
) -> anyhow::Result<()> {
    let rank_lock = format!("{}:{}", user_id, connection.key.provider_id);
    advisory_lock(tx, RANK_LOCK, &rank_lock).await?;
    insert_query(user_id, connection)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_insert_error(e, &connection.key))?;
    Ok(())
}

fn map_insert_error(e: sqlx::Error, key: &ConnectionKey) -> anyhow::Error {
    if let sqlx::Error::Database(db_err) = &e {
        let constraint = db_err
            .try_downcast_ref::<PgDatabaseError>()
            .and_then(|pg_err| pg_err.constraint());
        if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) && constraint == Some(PRIMARY_KEY) {
            return ConnectError::DuplicateConnection(key.clone()).into();
        }
    }
    error!("Unable to insert user connection : {:?}", e);
    e.into()
}

#[async_trait::async_trait]
impl IConnectionRepo for PostgresConnectionRepo {
    async fn insert(&self, user_id: &UserId, connection: &Connection) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        insert_ranked(&mut tx, user_id, connection).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn insert_if_unlinked(
        &self,
        user_id: &UserId,
        connection: &Connection,
    ) -> anyhow::Result<bool> {
        let mut tx = self.pool.begin().await?;

        // Serializes concurrent sign-ins for the same provider account until commit
        advisory_lock(&mut tx, ACCOUNT_LOCK, &connection.key.to_string()).await?;

        let (linked,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM user_connections
            WHERE provider_id = $1 AND provider_user_id = $2
            "#,
        )
        .bind(connection.key.provider_id.as_str())
        .bind(connection.key.provider_user_id.as_str())
        .fetch_one(&mut tx)
        .await?;
        if linked > 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        insert_ranked(&mut tx, user_id, connection).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn save(&self, user_id: &UserId, connection: &Connection) -> anyhow::Result<bool> {
        let credentials = CredentialColumns::from(&connection.credentials);
        let res = sqlx::query(
            r#"
            UPDATE user_connections
            SET display_name = $4,
            profile_url = $5,
            image_url = $6,
            access_token = $7,
            secret = $8,
            refresh_token = $9,
            expire_time = $10
            WHERE user_id = $1 AND provider_id = $2 AND provider_user_id = $3
            "#,
        )
        .bind(user_id.as_str())
        .bind(connection.key.provider_id.as_str())
        .bind(connection.key.provider_user_id.as_str())
        .bind(connection.display_name.as_deref())
        .bind(connection.profile_url.as_deref())
        .bind(connection.image_url.as_deref())
        .bind(credentials.access_token)
        .bind(credentials.secret)
        .bind(credentials.refresh_token)
        .bind(credentials.expire_time)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Unable to save user connection : {:?}", e);
            e
        })?;

        Ok(res.rows_affected() == 1)
    }

    async fn find(
        &self,
        user_id: &UserId,
        key: &ConnectionKey,
    ) -> anyhow::Result<Option<Connection>> {
        let mut connections = self
            .select(
                "WHERE user_id = $1 AND provider_id = $2 AND provider_user_id = $3",
                Binds::UserKey(user_id, key),
            )
            .await?;
        Ok(connections.pop())
    }

    async fn find_by_user(&self, user_id: &UserId) -> anyhow::Result<Vec<Connection>> {
        self.select(
            "WHERE user_id = $1 ORDER BY provider_id, rank",
            Binds::User(user_id),
        )
        .await
    }

    async fn find_by_provider(
        &self,
        user_id: &UserId,
        provider_id: &str,
    ) -> anyhow::Result<Vec<Connection>> {
        self.select(
            "WHERE user_id = $1 AND provider_id = $2 ORDER BY rank",
            Binds::UserProvider(user_id, provider_id),
        )
        .await
    }

    async fn find_primary(
        &self,
        user_id: &UserId,
        provider_id: &str,
    ) -> anyhow::Result<Option<Connection>> {
        let mut connections = self
            .select(
                "WHERE user_id = $1 AND provider_id = $2 ORDER BY rank LIMIT 1",
                Binds::UserProvider(user_id, provider_id),
            )
            .await?;
        Ok(connections.pop())
    }

    async fn find_by_provider_user_ids(
        &self,
        user_id: &UserId,
        provider_id: &str,
        provider_user_ids: &[String],
    ) -> anyhow::Result<Vec<Connection>> {
        self.select(
            "WHERE user_id = $1 AND provider_id = $2 AND provider_user_id = ANY($3) ORDER BY rank",
            Binds::UserProviderUsers(user_id, provider_id, provider_user_ids),
        )
        .await
    }

    async fn find_user_ids_by_key(&self, key: &ConnectionKey) -> anyhow::Result<Vec<UserId>> {
        let user_ids: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT user_id FROM user_connections
            WHERE provider_id = $1 AND provider_user_id = $2
            "#,
        )
        .bind(key.provider_id.as_str())
        .bind(key.provider_user_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Unable to find users connected to {} : {:?}", key, e);
            e
        })?;
        Ok(user_ids.into_iter().map(|(id,)| id.into()).collect())
    }

    async fn find_user_ids_connected_to(
        &self,
        provider_id: &str,
        provider_user_ids: &[String],
    ) -> anyhow::Result<Vec<UserId>> {
        let user_ids: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT user_id FROM user_connections
            WHERE provider_id = $1 AND provider_user_id = ANY($2)
            "#,
        )
        .bind(provider_id)
        .bind(provider_user_ids.to_vec())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Unable to find users connected to {} : {:?}", provider_id, e);
            e
        })?;
        Ok(user_ids.into_iter().map(|(id,)| id.into()).collect())
    }

    async fn delete(&self, user_id: &UserId, key: &ConnectionKey) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            DELETE FROM user_connections
            WHERE user_id = $1 AND provider_id = $2 AND provider_user_id = $3
            "#,
        )
        .bind(user_id.as_str())
        .bind(key.provider_id.as_str())
        .bind(key.provider_user_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Unable to delete user connection : {:?}", e);
            e
        })?;
        Ok(())
    }

    async fn delete_by_provider(
        &self,
        user_id: &UserId,
        provider_id: &str,
    ) -> anyhow::Result<u64> {
        let res = sqlx::query(
            r#"
            DELETE FROM user_connections
            WHERE user_id = $1 AND provider_id = $2
            "#,
        )
        .bind(user_id.as_str())
        .bind(provider_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Unable to delete user connections : {:?}", e);
            e
        })?;
        Ok(res.rows_affected())
    }
}
