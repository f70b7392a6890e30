mod user_connection_repo;

use crate::{repos::IConnectionRepo, sign_up::IConnectionSignUp, ConnectError};
use social_connect_domain::{Connection, ConnectionKey, UserId};
use std::{
    collections::{hash_map::DefaultHasher, HashSet},
    hash::{Hash, Hasher},
    sync::Arc,
};
use tokio::sync::Mutex;
use tracing::{info, warn};
pub use user_connection_repo::UserConnectionRepo;

/// Outcome of resolving the local user behind a provider account
#[derive(Debug, Clone, PartialEq)]
pub enum UserIdLookup {
    /// Exactly one local user is connected to the provider account
    Found(UserId),
    /// No local user is connected and none was provisioned
    NotFound,
    /// More than one local user is connected, so there is no definitive answer
    Ambiguous(usize),
    /// A new local user was provisioned and connected to the provider account
    Created(UserId),
}

impl UserIdLookup {
    /// The resolved user, if there is a single one
    pub fn user_id(&self) -> Option<&UserId> {
        match self {
            Self::Found(user_id) | Self::Created(user_id) => Some(user_id),
            Self::NotFound | Self::Ambiguous(_) => None,
        }
    }

    fn from_linked(mut user_ids: Vec<UserId>) -> Option<Self> {
        match user_ids.len() {
            0 => None,
            1 => Some(Self::Found(user_ids.remove(0))),
            n => Some(Self::Ambiguous(n)),
        }
    }
}

/// Lookups across the connections of all local users, and the factory for
/// repositories scoped to a single user.
#[async_trait::async_trait]
pub trait IConnectionDirectory: Send + Sync {
    /// Resolves the single local user connected to the provider account of
    /// `connection`. Used when a user signs in through a provider.
    async fn find_user_id_with_connection(
        &self,
        connection: &Connection,
    ) -> Result<UserIdLookup, ConnectError>;

    /// All local users connected to any of the given accounts of one provider
    async fn find_user_ids_connected_to(
        &self,
        provider_id: &str,
        provider_user_ids: &HashSet<String>,
    ) -> Result<HashSet<UserId>, ConnectError>;

    /// Every operation on the returned repository is relative to `user_id`.
    /// Unknown users get a repository without connections.
    fn create_connection_repository(&self, user_id: &UserId) -> UserConnectionRepo;
}

const SIGN_UP_LOCK_STRIPES: usize = 32;

pub struct ConnectionDirectory {
    connections: Arc<dyn IConnectionRepo>,
    sign_up: Option<Arc<dyn IConnectionSignUp>>,
    /// Sign-ins for one provider account always map to the same stripe
    sign_up_locks: Vec<Mutex<()>>,
}

impl ConnectionDirectory {
    pub fn new(connections: Arc<dyn IConnectionRepo>) -> Self {
        Self {
            connections,
            sign_up: None,
            sign_up_locks: (0..SIGN_UP_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Provision local users for provider sign-ins that no user is connected to
    pub fn with_sign_up(mut self, sign_up: Arc<dyn IConnectionSignUp>) -> Self {
        self.sign_up = Some(sign_up);
        self
    }

    fn sign_up_stripe(&self, key: &ConnectionKey) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.sign_up_locks.len() as u64) as usize
    }

    async fn provision(
        &self,
        sign_up: &dyn IConnectionSignUp,
        connection: &Connection,
    ) -> Result<UserIdLookup, ConnectError> {
        let _guard = self.sign_up_locks[self.sign_up_stripe(&connection.key)]
            .lock()
            .await;

        // Another sign-in may have linked the account while waiting for the lock
        let user_ids = self.connections.find_user_ids_by_key(&connection.key).await?;
        if let Some(lookup) = UserIdLookup::from_linked(user_ids) {
            return Ok(lookup);
        }

        let user_id = match sign_up.execute(connection).await {
            Some(user_id) => user_id,
            None => {
                info!("Sign up declined for {}", connection.key);
                return Ok(UserIdLookup::NotFound);
            }
        };

        if self
            .connections
            .insert_if_unlinked(&user_id, connection)
            .await?
        {
            info!("Provisioned user {} for {}", user_id, connection.key);
            return Ok(UserIdLookup::Created(user_id));
        }

        // Linked by another process after our check
        warn!(
            "Provisioned user {} was not connected to {} as it got linked concurrently",
            user_id, connection.key
        );
        let user_ids = self.connections.find_user_ids_by_key(&connection.key).await?;
        Ok(UserIdLookup::from_linked(user_ids).unwrap_or(UserIdLookup::NotFound))
    }
}

#[async_trait::async_trait]
impl IConnectionDirectory for ConnectionDirectory {
    #[tracing::instrument(
        name = "Find user id with connection",
        skip(self, connection),
        fields(connection_key = %connection.key)
    )]
    async fn find_user_id_with_connection(
        &self,
        connection: &Connection,
    ) -> Result<UserIdLookup, ConnectError> {
        let user_ids = self.connections.find_user_ids_by_key(&connection.key).await?;
        if let Some(lookup) = UserIdLookup::from_linked(user_ids) {
            return Ok(lookup);
        }

        match &self.sign_up {
            Some(sign_up) => self.provision(sign_up.as_ref(), connection).await,
            None => Ok(UserIdLookup::NotFound),
        }
    }

    #[tracing::instrument(name = "Find user ids connected to", skip(self, provider_user_ids))]
    async fn find_user_ids_connected_to(
        &self,
        provider_id: &str,
        provider_user_ids: &HashSet<String>,
    ) -> Result<HashSet<UserId>, ConnectError> {
        if provider_user_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let provider_user_ids = provider_user_ids.iter().cloned().collect::<Vec<_>>();
        let user_ids = self
            .connections
            .find_user_ids_connected_to(provider_id, &provider_user_ids)
            .await?;
        Ok(user_ids.into_iter().collect())
    }

    fn create_connection_repository(&self, user_id: &UserId) -> UserConnectionRepo {
        UserConnectionRepo::new(user_id.clone(), self.connections.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_test_contexts, Config, ConnectContext, GeneratedUserIdSignUp};
    use social_connect_domain::Credentials;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn connection(provider_id: &str, provider_user_id: &str) -> Connection {
        Connection::new(
            ConnectionKey::new(provider_id, provider_user_id),
            Credentials::OAuth2 {
                access_token: format!("token_{}", provider_user_id),
                refresh_token: None,
                expires_at: None,
            },
        )
    }

    fn random_connection(provider_id: &str) -> Connection {
        connection(provider_id, UserId::new().as_str())
    }

    fn auto_provisioning_context() -> ConnectContext {
        ConnectContext::create_inmemory_with_config(Config {
            auto_provision_on_sign_in: true,
            pg_max_connections: 1,
        })
    }

    fn set(values: &[&str]) -> HashSet<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    struct DecliningSignUp;

    #[async_trait::async_trait]
    impl IConnectionSignUp for DecliningSignUp {
        async fn execute(&self, _connection: &Connection) -> Option<UserId> {
            None
        }
    }

    #[tokio::test]
    async fn finds_single_connected_user() {
        for ctx in create_test_contexts().await {
            let user_id = UserId::new();
            let conn = random_connection("facebook");
            ctx.directory
                .create_connection_repository(&user_id)
                .add_connection(&conn)
                .await
                .expect("To add connection");

            let lookup = ctx
                .directory
                .find_user_id_with_connection(&conn)
                .await
                .expect("To lookup user");
            assert_eq!(lookup, UserIdLookup::Found(user_id.clone()));
            assert_eq!(lookup.user_id(), Some(&user_id));
        }
    }

    #[tokio::test]
    async fn unconnected_account_is_not_found() {
        for ctx in create_test_contexts().await {
            let lookup = ctx
                .directory
                .find_user_id_with_connection(&random_connection("facebook"))
                .await
                .expect("To lookup user");
            assert_eq!(lookup, UserIdLookup::NotFound);
            assert!(lookup.user_id().is_none());
        }
    }

    #[tokio::test]
    async fn account_connected_to_many_users_is_ambiguous() {
        for ctx in create_test_contexts().await {
            let conn = random_connection("facebook");
            for _ in 0..2 {
                ctx.directory
                    .create_connection_repository(&UserId::new())
                    .add_connection(&conn)
                    .await
                    .expect("To add connection");
            }

            let lookup = ctx
                .directory
                .find_user_id_with_connection(&conn)
                .await
                .expect("To lookup user");
            assert_eq!(lookup, UserIdLookup::Ambiguous(2));
            assert!(lookup.user_id().is_none());
        }
    }

    #[tokio::test]
    async fn finds_user_ids_connected_to_provider_accounts() {
        let ctx = ConnectContext::create_inmemory();
        let alice = UserId::from("alice");
        let bob = UserId::from("bob");
        ctx.directory
            .create_connection_repository(&alice)
            .add_connection(&connection("facebook", "125600"))
            .await
            .unwrap();
        ctx.directory
            .create_connection_repository(&bob)
            .add_connection(&connection("facebook", "131345"))
            .await
            .unwrap();

        let user_ids = ctx
            .directory
            .find_user_ids_connected_to("facebook", &set(&["125600", "131345", "54321"]))
            .await
            .unwrap();
        assert_eq!(user_ids, vec![alice, bob].into_iter().collect::<HashSet<_>>());

        assert!(ctx
            .directory
            .find_user_ids_connected_to("twitter", &set(&["125600"]))
            .await
            .unwrap()
            .is_empty());
        assert!(ctx
            .directory
            .find_user_ids_connected_to("facebook", &HashSet::new())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn deduplicates_connected_user_ids() {
        for ctx in create_test_contexts().await {
            let user_id = UserId::new();
            let first = random_connection("facebook");
            let second = random_connection("facebook");
            let repo = ctx.directory.create_connection_repository(&user_id);
            repo.add_connection(&first).await.unwrap();
            repo.add_connection(&second).await.unwrap();

            let user_ids = ctx
                .directory
                .find_user_ids_connected_to(
                    "facebook",
                    &set(&[first.provider_user_id(), second.provider_user_id()]),
                )
                .await
                .unwrap();
            assert_eq!(user_ids.len(), 1);
            assert!(user_ids.contains(&user_id));

            // Nothing is connected to unknown accounts
            assert!(ctx
                .directory
                .find_user_ids_connected_to("facebook", &set(&[UserId::new().as_str()]))
                .await
                .unwrap()
                .is_empty());
        }
    }

    #[tokio::test]
    async fn repositories_for_same_user_share_connections() {
        for ctx in create_test_contexts().await {
            let user_id = UserId::new();
            let repo1 = ctx.directory.create_connection_repository(&user_id);
            let repo2 = ctx.directory.create_connection_repository(&user_id);
            assert_eq!(repo1.user_id(), repo2.user_id());

            let conn = random_connection("github");
            repo1.add_connection(&conn).await.unwrap();
            assert_eq!(repo2.get_connection(&conn.key).await.unwrap(), conn);

            repo2.remove_connection(&conn.key).await.unwrap();
            assert!(repo1.find_connections("github").await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn provisions_user_for_unconnected_account() {
        let ctx = auto_provisioning_context();
        let conn = connection("facebook", "125600");

        let lookup = ctx
            .directory
            .find_user_id_with_connection(&conn)
            .await
            .unwrap();
        let user_id = match lookup {
            UserIdLookup::Created(user_id) => user_id,
            lookup => panic!("Expected a provisioned user, got: {:?}", lookup),
        };

        // The provisioned user owns the connection
        let repo = ctx.directory.create_connection_repository(&user_id);
        assert_eq!(repo.get_connection(&conn.key).await.unwrap(), conn);

        // And is found on the next sign in
        let lookup = ctx
            .directory
            .find_user_id_with_connection(&conn)
            .await
            .unwrap();
        assert_eq!(lookup, UserIdLookup::Found(user_id));
    }

    #[tokio::test]
    async fn ambiguous_account_is_not_provisioned() {
        let ctx = auto_provisioning_context();
        let conn = connection("facebook", "125600");
        for user_id in &["alice", "bob"] {
            ctx.directory
                .create_connection_repository(&UserId::from(*user_id))
                .add_connection(&conn)
                .await
                .unwrap();
        }

        let lookup = ctx
            .directory
            .find_user_id_with_connection(&conn)
            .await
            .unwrap();
        assert_eq!(lookup, UserIdLookup::Ambiguous(2));
    }

    #[tokio::test]
    async fn declined_sign_up_is_not_found() {
        let ctx = ConnectContext::create_inmemory();
        let directory = ConnectionDirectory::new(ctx.repos.connections.clone())
            .with_sign_up(Arc::new(DecliningSignUp));
        let conn = connection("facebook", "125600");

        let lookup = directory.find_user_id_with_connection(&conn).await.unwrap();
        assert_eq!(lookup, UserIdLookup::NotFound);
        assert!(ctx
            .repos
            .connections
            .find_user_ids_by_key(&conn.key)
            .await
            .unwrap()
            .is_empty());
    }

    async fn assert_one_user_provisioned(
        directories: Vec<Arc<dyn IConnectionDirectory>>,
        connections: &Arc<dyn IConnectionRepo>,
        conn: &Connection,
    ) {
        let handles = directories
            .into_iter()
            .map(|directory| {
                let conn = conn.clone();
                tokio::spawn(async move { directory.find_user_id_with_connection(&conn).await })
            })
            .collect::<Vec<_>>();

        let mut lookups = Vec::new();
        for handle in handles {
            lookups.push(handle.await.unwrap().unwrap());
        }

        let created = lookups
            .iter()
            .filter(|l| matches!(l, UserIdLookup::Created(_)))
            .count();
        assert_eq!(created, 1);

        let user_ids = lookups
            .iter()
            .map(|l| l.user_id().cloned().expect("Every sign in to resolve a user"))
            .collect::<HashSet<_>>();
        assert_eq!(user_ids.len(), 1);

        let linked = connections.find_user_ids_by_key(&conn.key).await.unwrap();
        assert_eq!(linked.len(), 1);
    }

    fn provisioning_directory(
        connections: &Arc<dyn IConnectionRepo>,
    ) -> Arc<dyn IConnectionDirectory> {
        Arc::new(
            ConnectionDirectory::new(connections.clone())
                .with_sign_up(Arc::new(GeneratedUserIdSignUp)),
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sign_ins_provision_one_user() {
        for ctx in create_test_contexts().await {
            let connections = ctx.repos.connections.clone();
            let directory = provisioning_directory(&connections);
            let directories = (0..10).map(|_| directory.clone()).collect();
            let conn = random_connection("facebook");
            assert_one_user_provisioned(directories, &connections, &conn).await;
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sign_ins_through_separate_directories_provision_one_user() {
        // Separate directories share no locks, like sign-ins handled by different processes
        for ctx in create_test_contexts().await {
            let connections = ctx.repos.connections.clone();
            let directories = (0..10)
                .map(|_| provisioning_directory(&connections))
                .collect();
            let conn = random_connection("facebook");
            assert_one_user_provisioned(directories, &connections, &conn).await;
        }
    }

    struct GatedSignUp {
        gated: ConnectionKey,
        entered: Notify,
        release: Notify,
    }

    #[async_trait::async_trait]
    impl IConnectionSignUp for GatedSignUp {
        async fn execute(&self, connection: &Connection) -> Option<UserId> {
            if connection.key == self.gated {
                self.entered.notify_one();
                self.release.notified().await;
            }
            Some(UserId::new())
        }
    }

    #[tokio::test]
    async fn pending_sign_up_does_not_block_other_accounts() {
        let ctx = ConnectContext::create_inmemory();
        let slow = random_connection("facebook");
        let sign_up = Arc::new(GatedSignUp {
            gated: slow.key.clone(),
            entered: Notify::new(),
            release: Notify::new(),
        });
        let directory = Arc::new(
            ConnectionDirectory::new(ctx.repos.connections.clone()).with_sign_up(sign_up.clone()),
        );
        let fast = loop {
            let conn = random_connection("facebook");
            if directory.sign_up_stripe(&conn.key) != directory.sign_up_stripe(&slow.key) {
                break conn;
            }
        };

        let slow_sign_in = {
            let directory = directory.clone();
            let slow = slow.clone();
            tokio::spawn(async move { directory.find_user_id_with_connection(&slow).await })
        };
        sign_up.entered.notified().await;

        let lookup = tokio::time::timeout(
            Duration::from_secs(5),
            directory.find_user_id_with_connection(&fast),
        )
        .await
        .expect("Sign in not to wait for the sign up of another account")
        .unwrap();
        assert!(matches!(lookup, UserIdLookup::Created(_)));

        sign_up.release.notify_one();
        let lookup = slow_sign_in.await.unwrap().unwrap();
        assert!(matches!(lookup, UserIdLookup::Created(_)));
    }
}
