use tracing::{info, warn};

const DEFAULT_PG_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Clone)]
pub struct Config {
    /// Whether a provider sign-in for an account that is not linked to any
    /// local user should provision a new local user and link the account to it.
    /// When disabled such sign-ins resolve to no user.
    pub auto_provision_on_sign_in: bool,
    /// Maximum number of connections in the postgres pool
    pub pg_max_connections: u32,
}

impl Config {
    pub fn new() -> Self {
        Self::from_env_values(
            std::env::var("AUTO_PROVISION_ON_SIGN_IN").ok(),
            std::env::var("PG_MAX_CONNECTIONS").ok(),
        )
    }

    fn from_env_values(
        auto_provision_on_sign_in: Option<String>,
        pg_max_connections: Option<String>,
    ) -> Self {
        let auto_provision_on_sign_in = match auto_provision_on_sign_in {
            Some(value) => match value.to_lowercase().as_str() {
                "true" | "1" => true,
                "false" | "0" => false,
                _ => {
                    warn!(
                        "The given AUTO_PROVISION_ON_SIGN_IN: {} is not valid, falling back to disabled.",
                        value
                    );
                    false
                }
            },
            None => false,
        };
        if auto_provision_on_sign_in {
            info!("Provider sign-ins without a linked user will provision new users.");
        }

        let pg_max_connections = match pg_max_connections {
            Some(value) => match value.parse::<u32>() {
                Ok(max) if max > 0 => max,
                _ => {
                    warn!(
                        "The given PG_MAX_CONNECTIONS: {} is not valid, falling back to the default: {}.",
                        value, DEFAULT_PG_MAX_CONNECTIONS
                    );
                    DEFAULT_PG_MAX_CONNECTIONS
                }
            },
            None => DEFAULT_PG_MAX_CONNECTIONS,
        };

        Self {
            auto_provision_on_sign_in,
            pg_max_connections,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
