use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use crate::{
    auth::{
        google::{GoogleIdentity, IdentityProvider},
        jwt::TokenService,
        otp::OtpService,
        password::{Argon2Hasher, PasswordHasher},
        services::AuthService,
    },
    brands::services::BrandService,
    categories::services::CategoryService,
    config::{AppConfig, StoreKind},
    db::{DocumentStore, MemoryStore, PgStore, Repository},
    mail::{LogMailer, Mailer, RelayMailer},
    products::services::ProductService,
    storage::{S3Storage, StorageClient},
    users::{model::User, services::UserService},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn DocumentStore>,
    pub storage: Arc<dyn StorageClient>,
    pub mailer: Arc<dyn Mailer>,
    pub identity: Arc<dyn IdentityProvider>,
    pub hasher: Arc<dyn PasswordHasher>,
    pub tokens: Arc<TokenService>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let store: Arc<dyn DocumentStore> = match config.store {
            StoreKind::Postgres => {
                let url = config
                    .database_url
                    .as_deref()
                    .context("DATABASE_URL missing")?;
                let pg = PgStore::connect(url, 10).await?;
                pg.migrate().await.context("database schema is not up to date")?;
                Arc::new(pg)
            }
            StoreKind::Memory => {
                warn!("using the in-memory store; nothing survives a restart");
                Arc::new(MemoryStore::new())
            }
        };

        // S3/MinIO
        let storage = Arc::new(S3Storage::new(&config.storage).await?) as Arc<dyn StorageClient>;

        let mailer: Arc<dyn Mailer> = match &config.mail_relay_url {
            Some(url) => Arc::new(RelayMailer::new(url.clone())),
            None => {
                info!("MAIL_RELAY_URL not set; otp emails are only logged");
                Arc::new(LogMailer)
            }
        };

        let identity = Arc::new(GoogleIdentity::new(config.google_client_ids.clone()));
        let hasher = Arc::new(Argon2Hasher::new(config.hash)?);
        let tokens = Arc::new(TokenService::new(&config.jwt));

        Ok(Self {
            config,
            store,
            storage,
            mailer,
            identity,
            hasher,
            tokens,
        })
    }

    pub fn users(&self) -> Repository<User> {
        Repository::new(self.store.clone())
    }

    pub fn otp(&self) -> OtpService {
        OtpService::new(
            Repository::new(self.store.clone()),
            self.hasher.clone(),
            self.mailer.clone(),
            self.config.otp.ttl_seconds,
        )
    }

    pub fn auth(&self) -> AuthService {
        AuthService::new(
            self.users(),
            self.otp(),
            self.tokens.clone(),
            self.hasher.clone(),
            self.identity.clone(),
        )
    }

    pub fn accounts(&self) -> UserService {
        UserService::new(
            self.users(),
            Repository::new(self.store.clone()),
            self.tokens.clone(),
            self.storage.clone(),
        )
    }

    pub fn brands(&self) -> BrandService {
        BrandService::new(Repository::new(self.store.clone()), self.storage.clone())
    }

    pub fn categories(&self) -> CategoryService {
        CategoryService::new(
            Repository::new(self.store.clone()),
            Repository::new(self.store.clone()),
            self.storage.clone(),
        )
    }

    pub fn products(&self) -> ProductService {
        ProductService::new(
            Repository::new(self.store.clone()),
            Repository::new(self.store.clone()),
            Repository::new(self.store.clone()),
            self.users(),
            self.storage.clone(),
        )
    }
}

#[cfg(test)]
pub mod testing {
    //! In-process wiring for service and handler tests.

    use std::{
        collections::{HashMap, HashSet},
        sync::{
            atomic::{AtomicBool, Ordering},
            Mutex,
        },
        time::Duration,
    };

    use anyhow::bail;
    use async_trait::async_trait;
    use bytes::Bytes;
    use time::OffsetDateTime;
    use tokio::sync::mpsc;

    use super::*;
    use crate::{
        auth::google::{ExternalIdentity, IdentityError},
        config::{HashConfig, JwtConfig, OtpConfig, StorageConfig},
        mail::OtpEmail,
        storage::UploadItem,
        users::model::Role,
    };

    pub const TEST_PASSWORD: &str = "Secur3P@ss";

    pub fn cheap_hash_config() -> HashConfig {
        HashConfig {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        }
    }

    pub fn cheap_hasher() -> Arc<dyn PasswordHasher> {
        Arc::new(Argon2Hasher::new(cheap_hash_config()).expect("valid params"))
    }

    pub fn config() -> AppConfig {
        AppConfig {
            store: StoreKind::Memory,
            database_url: None,
            jwt: JwtConfig {
                access_bearer_secret: "t-access-bearer".into(),
                access_system_secret: "t-access-system".into(),
                refresh_bearer_secret: "t-refresh-bearer".into(),
                refresh_system_secret: "t-refresh-system".into(),
                issuer: "test".into(),
                audience: "test".into(),
                ttl_minutes: 5,
                refresh_ttl_minutes: 60,
            },
            otp: OtpConfig::default(),
            hash: cheap_hash_config(),
            storage: StorageConfig {
                endpoint: "fake".into(),
                bucket: "fake".into(),
                access_key: "fake".into(),
                secret_key: "fake".into(),
                region: "us-east-1".into(),
            },
            google_client_ids: vec!["test-client".into()],
            mail_relay_url: None,
        }
    }

    pub struct RecordingMailer {
        tx: mpsc::UnboundedSender<OtpEmail>,
    }

    impl RecordingMailer {
        pub fn new() -> (Self, mpsc::UnboundedReceiver<OtpEmail>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (Self { tx }, rx)
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, email: OtpEmail) -> anyhow::Result<()> {
            self.tx.send(email)?;
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct FakeStorage {
        objects: Mutex<HashSet<String>>,
        deleted: Mutex<Vec<String>>,
        fail_puts: AtomicBool,
    }

    impl FakeStorage {
        pub fn contains(&self, key: &str) -> bool {
            self.objects.lock().expect("lock").contains(key)
        }

        pub fn deleted(&self) -> Vec<String> {
            self.deleted.lock().expect("lock").clone()
        }

        pub fn len(&self) -> usize {
            self.objects.lock().expect("lock").len()
        }

        pub fn fail_puts(&self, fail: bool) {
            self.fail_puts.store(fail, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl StorageClient for FakeStorage {
        async fn put_object(&self, key: &str, _body: Bytes, _ct: &str) -> anyhow::Result<()> {
            if self.fail_puts.load(Ordering::SeqCst) {
                bail!("storage unavailable");
            }
            self.objects.lock().expect("lock").insert(key.to_string());
            Ok(())
        }

        async fn delete_object(&self, key: &str) -> anyhow::Result<()> {
            self.objects.lock().expect("lock").remove(key);
            self.deleted.lock().expect("lock").push(key.to_string());
            Ok(())
        }

        async fn presign_get(&self, key: &str, _seconds: u64) -> anyhow::Result<String> {
            Ok(format!("https://fake.local/{key}"))
        }
    }

    /// Identity provider that accepts only the tokens registered on it.
    #[derive(Default)]
    pub struct FakeIdentity {
        known: Mutex<HashMap<String, ExternalIdentity>>,
    }

    impl FakeIdentity {
        pub fn register(&self, token: &str, email: &str, verified: bool) {
            self.known.lock().expect("lock").insert(
                token.to_string(),
                ExternalIdentity {
                    email: email.to_string(),
                    email_verified: verified,
                    given_name: Some("Gina".into()),
                    family_name: Some("Google".into()),
                    picture: Some("https://example.com/p.png".into()),
                },
            );
        }
    }

    #[async_trait]
    impl IdentityProvider for FakeIdentity {
        async fn verify_identity_token(&self, token: &str) -> Result<ExternalIdentity, IdentityError> {
            self.known
                .lock()
                .expect("lock")
                .get(token)
                .cloned()
                .ok_or_else(|| IdentityError::Rejected("unknown token".into()))
        }
    }

    pub fn png() -> UploadItem {
        UploadItem {
            body: Bytes::from_static(b"\x89PNG"),
            content_type: "image/png".into(),
        }
    }

    pub struct TestApp {
        pub state: AppState,
        pub store: MemoryStore,
        pub storage: Arc<FakeStorage>,
        pub identity: Arc<FakeIdentity>,
        pub emails: mpsc::UnboundedReceiver<OtpEmail>,
    }

    impl TestApp {
        pub fn new() -> Self {
            let config = Arc::new(config());
            let store = MemoryStore::new();
            let storage = Arc::new(FakeStorage::default());
            let identity = Arc::new(FakeIdentity::default());
            let (mailer, emails) = RecordingMailer::new();
            let state = AppState {
                tokens: Arc::new(TokenService::new(&config.jwt)),
                config,
                store: Arc::new(store.clone()),
                storage: storage.clone(),
                mailer: Arc::new(mailer),
                identity: identity.clone(),
                hasher: cheap_hasher(),
            };
            Self {
                state,
                store,
                storage,
                identity,
                emails,
            }
        }

        pub async fn next_email(&mut self) -> OtpEmail {
            tokio::time::timeout(Duration::from_secs(2), self.emails.recv())
                .await
                .expect("an email within 2s")
                .expect("mailer alive")
        }

        /// A confirmed system account with [`TEST_PASSWORD`].
        pub async fn seed_user(&self, email: &str, role: Role) -> User {
            let digest = self.state.hasher.hash(TEST_PASSWORD).expect("hash");
            let mut user = User::system(email, digest, "Test User");
            user.role = role;
            user.confirmed_at = Some(OffsetDateTime::now_utc());
            self.state
                .users()
                .create(vec![user])
                .await
                .expect("seed user")
                .remove(0)
        }
    }
}
