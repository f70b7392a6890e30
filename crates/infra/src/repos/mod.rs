mod connection;
mod shared;

pub use connection::{IConnectionRepo, InMemoryConnectionRepo, PostgresConnectionRepo};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct Repos {
    pub connections: Arc<dyn IConnectionRepo>,
}

impl Repos {
    pub async fn create_postgres(
        connection_string: &str,
        max_connections: u32,
    ) -> anyhow::Result<Self> {
        info!("DB CHECKING CONNECTION ...");
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(connection_string)
            .await?;
        info!("DB CHECKING CONNECTION ... [done]");
        Ok(Self {
            connections: Arc::new(PostgresConnectionRepo::new(pool)),
        })
    }

    pub fn create_inmemory() -> Self {
        Self {
            connections: Arc::new(InMemoryConnectionRepo::new()),
        }
    }
}
