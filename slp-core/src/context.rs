//! Entry point for callers: lifecycle and call routing.

use crate::config::SlpConfig;
use crate::counter::{CounterStore, FileCounterStore, StoreOptions};
use crate::crypto::IntegrityPrimitive;
use crate::dormancy::{AssumeDormant, DormancyPolicy, IdleWindow};
use crate::engine::AttestationEngine;
use crate::error::{InitError, SlpError};
use crate::token::Token;
use crate::types::Trigger;
use std::path::Path;
use std::sync::Arc;

/// Handle on an initialized counter store.
///
/// Cheap to clone; clones share the same store and critical section.
#[derive(Debug, Clone)]
pub struct Context {
    engine: AttestationEngine,
}

impl Context {
    pub fn builder() -> ContextBuilder {
        ContextBuilder::new()
    }

    /// Open the file-backed store described by `config`, creating it at 0.
    pub fn initialize(
        config: &SlpConfig,
        primitive: impl IntegrityPrimitive + 'static,
    ) -> Result<Self, SlpError> {
        ContextBuilder::new()
            .config(config.clone())
            .primitive(Arc::new(primitive))
            .build()
    }

    /// Load an [`SlpConfig`] from a TOML file and initialize from it.
    pub fn from_config_file(
        path: impl AsRef<Path>,
        primitive: impl IntegrityPrimitive + 'static,
    ) -> Result<Self, SlpError> {
        let config = SlpConfig::load(path).map_err(InitError::Config)?;
        Self::initialize(&config, primitive)
    }

    /// Advance the counter once and return a token bound to the new value.
    pub fn generate_token(&self, trigger: &Trigger) -> Result<Token, SlpError> {
        self.engine.generate_token(trigger)
    }

    pub fn check_integrity(&self) -> bool {
        self.engine.check_integrity()
    }

    pub fn verify_dormancy(&self) -> bool {
        self.engine.verify_dormancy()
    }

    /// Current counter value, without advancing it.
    pub fn get_counter(&self) -> Result<u64, SlpError> {
        self.engine.counter()
    }
}

#[cfg(feature = "async")]
impl Context {
    /// [`Context::generate_token`] on the blocking pool.
    ///
    /// Dropping the returned future does not cancel a started increment.
    pub async fn generate_token_async(&self, trigger: Trigger) -> Result<Token, SlpError> {
        let ctx = self.clone();
        run_blocking(move || ctx.generate_token(&trigger)).await
    }

    pub async fn get_counter_async(&self) -> Result<u64, SlpError> {
        let ctx = self.clone();
        run_blocking(move || ctx.get_counter()).await
    }

    pub async fn check_integrity_async(&self) -> bool {
        let ctx = self.clone();
        tokio::task::spawn_blocking(move || ctx.check_integrity())
            .await
            .unwrap_or(false)
    }
}

#[cfg(feature = "async")]
async fn run_blocking<T, F>(f: F) -> Result<T, SlpError>
where
    F: FnOnce() -> Result<T, SlpError> + Send + 'static,
    T: Send + 'static,
{
    use crate::counter::CounterError;

    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SlpError::StorageFailure(CounterError::Interrupted(e.to_string())))?
}

/// Builder for [`Context`].
///
/// The store defaults to a [`FileCounterStore`] at `config.storage_path`;
/// the dormancy policy defaults to [`IdleWindow`] when
/// `config.dormancy.min_idle_ms` is non-zero and [`AssumeDormant`] otherwise.
pub struct ContextBuilder {
    config: SlpConfig,
    store: Option<Arc<dyn CounterStore>>,
    primitive: Option<Arc<dyn IntegrityPrimitive>>,
    dormancy: Option<Arc<dyn DormancyPolicy>>,
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self {
            config: SlpConfig::default(),
            store: None,
            primitive: None,
            dormancy: None,
        }
    }

    pub fn config(mut self, config: SlpConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a custom counter store (e.g. a hardware-backed one).
    pub fn store(mut self, store: Arc<dyn CounterStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn primitive(mut self, primitive: Arc<dyn IntegrityPrimitive>) -> Self {
        self.primitive = Some(primitive);
        self
    }

    pub fn dormancy(mut self, policy: Arc<dyn DormancyPolicy>) -> Self {
        self.dormancy = Some(policy);
        self
    }

    pub fn build(self) -> Result<Context, SlpError> {
        let primitive = self.primitive.ok_or(InitError::MissingPrimitive)?;

        let store = match self.store {
            Some(store) => store,
            None => {
                let store = FileCounterStore::open(
                    &self.config.storage_path,
                    StoreOptions::from(&self.config),
                )
                .map_err(|e| {
                    tracing::error!(
                        path = %self.config.storage_path.display(),
                        "Failed to open counter store: {}",
                        e
                    );
                    InitError::Store(e)
                })?;
                Arc::new(store) as Arc<dyn CounterStore>
            }
        };

        let dormancy = self.dormancy.unwrap_or_else(|| {
            if self.config.dormancy.min_idle_ms > 0 {
                Arc::new(IdleWindow::new(self.config.min_idle())) as Arc<dyn DormancyPolicy>
            } else {
                Arc::new(AssumeDormant)
            }
        });

        Ok(Context {
            engine: AttestationEngine::new(store, primitive, dormancy),
        })
    }
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CorruptionPolicy;
    use crate::crypto::HmacSha256;
    use crate::error::ErrorKind;
    use crate::types::TriggerType;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> SlpConfig {
        SlpConfig::with_storage_path(dir.path().join("slp").join("counter.bin"))
    }

    #[test]
    fn test_initialize_bootstraps_at_zero() {
        let dir = TempDir::new().unwrap();
        let ctx = Context::initialize(&config(&dir), HmacSha256::generate()).unwrap();

        assert_eq!(ctx.get_counter().unwrap(), 0);
        assert!(ctx.check_integrity());
        assert!(dir.path().join("slp").join("counter.bin").exists());
    }

    #[test]
    fn test_from_config_file() {
        let dir = TempDir::new().unwrap();
        let storage = dir.path().join("slp").join("counter.bin");
        let config_path = dir.path().join("slp.toml");
        std::fs::write(
            &config_path,
            format!("storage_path = {:?}\nlock_timeout_ms = 250\n", storage.display().to_string()),
        )
        .unwrap();

        let ctx = Context::from_config_file(&config_path, HmacSha256::generate()).unwrap();
        assert_eq!(ctx.get_counter().unwrap(), 0);
        assert!(storage.exists());
    }

    #[test]
    fn test_missing_config_file() {
        let dir = TempDir::new().unwrap();
        let err = Context::from_config_file(dir.path().join("absent.toml"), HmacSha256::generate())
            .unwrap_err();
        assert!(matches!(err, SlpError::Initialization(InitError::Config(_))));
    }

    #[test]
    fn test_missing_primitive() {
        let dir = TempDir::new().unwrap();
        let err = Context::builder().config(config(&dir)).build().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Initialization);
    }

    #[test]
    fn test_unopenable_store() {
        let dir = TempDir::new().unwrap();
        // A regular file where the parent directory should be.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();

        let config = SlpConfig::with_storage_path(blocker.join("counter.bin"));
        let err = Context::initialize(&config, HmacSha256::generate()).unwrap_err();
        assert!(matches!(err, SlpError::Initialization(InitError::Store(_))));
    }

    #[test]
    fn test_reject_policy_fails_initialization_on_corrupt_record() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.on_corrupt = CorruptionPolicy::Reject;
        std::fs::create_dir_all(config.storage_path.parent().unwrap()).unwrap();
        std::fs::write(&config.storage_path, b"garbage").unwrap();

        let err = Context::initialize(&config, HmacSha256::generate()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Initialization);
    }

    #[test]
    fn test_idle_window_from_config() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.dormancy.min_idle_ms = 3_600_000;
        let ctx = Context::initialize(&config, HmacSha256::generate()).unwrap();

        assert!(ctx.verify_dormancy());
        ctx.generate_token(&Trigger::now(TriggerType::NfcHandshake)).unwrap();
        assert!(!ctx.verify_dormancy());
    }

    #[test]
    fn test_clones_share_counter() {
        let dir = TempDir::new().unwrap();
        let ctx = Context::initialize(&config(&dir), HmacSha256::generate()).unwrap();
        let other = ctx.clone();

        ctx.generate_token(&Trigger::now(TriggerType::Vibration)).unwrap();
        let token = other.generate_token(&Trigger::now(TriggerType::Vibration)).unwrap();

        assert_eq!(token.counter, 2);
        assert_eq!(ctx.get_counter().unwrap(), 2);
    }

    #[cfg(feature = "async")]
    #[tokio::test]
    async fn test_async_issuance() {
        let dir = TempDir::new().unwrap();
        let ctx = Context::initialize(&config(&dir), HmacSha256::generate()).unwrap();

        let token = ctx
            .generate_token_async(Trigger::now(TriggerType::GpsGeofence))
            .await
            .unwrap();

        assert_eq!(token.counter, 1);
        assert_eq!(ctx.get_counter_async().await.unwrap(), 1);
        assert!(ctx.check_integrity_async().await);
    }

    /// File store whose increments take a while to land.
    #[cfg(feature = "async")]
    struct SlowStore(FileCounterStore);

    #[cfg(feature = "async")]
    impl CounterStore for SlowStore {
        fn read(&self) -> Result<u64, crate::counter::CounterError> {
            self.0.read()
        }

        fn increment(&self) -> Result<u64, crate::counter::CounterError> {
            std::thread::sleep(std::time::Duration::from_millis(50));
            self.0.increment()
        }

        fn check_integrity(&self) -> bool {
            self.0.check_integrity()
        }
    }

    #[cfg(feature = "async")]
    #[tokio::test]
    async fn test_dropped_issuance_still_commits_once() {
        use std::time::Duration;

        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let file = FileCounterStore::open(&config.storage_path, StoreOptions::from(&config)).unwrap();
        let ctx = Context::builder()
            .config(config)
            .store(Arc::new(SlowStore(file)))
            .primitive(Arc::new(HmacSha256::generate()))
            .build()
            .unwrap();

        // The caller gives up long before the increment finishes.
        let abandoned = tokio::time::timeout(
            Duration::from_millis(5),
            ctx.generate_token_async(Trigger::now(TriggerType::Vibration)),
        )
        .await;
        assert!(abandoned.is_err());

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while ctx.get_counter_async().await.unwrap() == 0 {
            assert!(tokio::time::Instant::now() < deadline, "increment never landed");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(ctx.get_counter_async().await.unwrap(), 1);
        assert!(ctx.check_integrity_async().await);

        let next = ctx
            .generate_token_async(Trigger::now(TriggerType::Vibration))
            .await
            .unwrap();
        assert_eq!(next.counter, 2);
    }
}
