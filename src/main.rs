mod telemetry;

use social_connect_infra::{run_migration, setup_context};
use telemetry::{get_subscriber, init_subscriber};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = get_subscriber("social_connect".into(), "info".into());
    init_subscriber(subscriber);

    info!("Running connection store migrations");
    run_migration().await?;

    let context = setup_context().await;
    info!(
        auto_provision_on_sign_in = context.config.auto_provision_on_sign_in,
        pg_max_connections = context.config.pg_max_connections,
        "Connection store is ready"
    );
    Ok(())
}
