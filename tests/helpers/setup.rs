use social_connect_infra::{Config, ConnectContext};

/// Context over a fresh inmemory store
pub fn spawn_context(auto_provision_on_sign_in: bool) -> ConnectContext {
    ConnectContext::create_inmemory_with_config(Config {
        auto_provision_on_sign_in,
        pg_max_connections: 1,
    })
}
