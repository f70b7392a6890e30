mod config;
mod directory;
mod error;
mod repos;
mod sign_up;

pub use config::Config;
pub use directory::{ConnectionDirectory, IConnectionDirectory, UserConnectionRepo, UserIdLookup};
pub use error::ConnectError;
pub use repos::{IConnectionRepo, InMemoryConnectionRepo, PostgresConnectionRepo, Repos};
pub use sign_up::{GeneratedUserIdSignUp, IConnectionSignUp};
use sqlx::migrate::MigrateError;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;

#[derive(Clone)]
pub struct ConnectContext {
    pub repos: Repos,
    pub config: Config,
    pub directory: Arc<dyn IConnectionDirectory>,
}

struct ContextParams {
    pub postgres_connection_string: String,
}

impl ConnectContext {
    fn build(repos: Repos, config: Config) -> Self {
        let mut directory = ConnectionDirectory::new(repos.connections.clone());
        if config.auto_provision_on_sign_in {
            directory = directory.with_sign_up(Arc::new(GeneratedUserIdSignUp));
        }
        Self {
            repos,
            config,
            directory: Arc::new(directory),
        }
    }

    async fn create(params: ContextParams) -> Self {
        let config = Config::new();
        let repos =
            Repos::create_postgres(&params.postgres_connection_string, config.pg_max_connections)
                .await
                .expect("Postgres credentials must be set and valid");
        Self::build(repos, config)
    }

    pub fn create_inmemory() -> Self {
        Self::create_inmemory_with_config(Config::new())
    }

    pub fn create_inmemory_with_config(config: Config) -> Self {
        Self::build(Repos::create_inmemory(), config)
    }
}

/// Will setup the infrastructure context given the environment
pub async fn setup_context() -> ConnectContext {
    ConnectContext::create(ContextParams {
        postgres_connection_string: get_psql_connection_string(),
    })
    .await
}

fn get_psql_connection_string() -> String {
    const PSQL_CONNECTION_STRING: &str = "DATABASE_URL";

    std::env::var(PSQL_CONNECTION_STRING)
        .unwrap_or_else(|_| panic!("{} env var to be present.", PSQL_CONNECTION_STRING))
}

pub async fn run_migration() -> Result<(), MigrateError> {
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&get_psql_connection_string())
        .await?;

    sqlx::migrate!().run(&pool).await
}

/// Creates an inmemory context, plus a postgres context when `DATABASE_URL` is set
#[cfg(test)]
pub(crate) async fn create_test_contexts() -> Vec<ConnectContext> {
    let mut contexts = vec![ConnectContext::create_inmemory()];
    if std::env::var("DATABASE_URL").is_ok() {
        run_migration().await.expect("To run migrations");
        contexts.push(setup_context().await);
    }
    contexts
}
