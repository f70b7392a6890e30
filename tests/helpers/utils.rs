use social_connect_domain::{Connection, ConnectionKey, Credentials};
use std::collections::HashSet;

pub fn facebook_connection(provider_user_id: &str) -> Connection {
    Connection::new(
        ConnectionKey::new("facebook", provider_user_id),
        Credentials::OAuth2 {
            access_token: format!("fb_token_{}", provider_user_id),
            refresh_token: None,
            expires_at: Some(5_000),
        },
    )
    .with_display_name(format!("Facebook user {}", provider_user_id))
}

pub fn twitter_connection(provider_user_id: &str) -> Connection {
    Connection::new(
        ConnectionKey::new("twitter", provider_user_id),
        Credentials::OAuth1 {
            token: format!("tw_token_{}", provider_user_id),
            secret: "tw_secret".into(),
        },
    )
}

pub fn ids(values: &[&str]) -> HashSet<String> {
    values.iter().map(|v| v.to_string()).collect()
}
