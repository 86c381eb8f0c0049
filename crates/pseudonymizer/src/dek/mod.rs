//! DEK (Data Encryption Key) creation, wrapping, persistence, and caching.
//!
//! # Lifecycle
//!
//! 1. At startup, [`KeyLifecycleManager::get_or_create_dek`] reads the wrapped
//!    DEK from the secret store. If the secret is absent, a new data key is
//!    generated under the KMS master key, unwrapped, and only then persisted.
//! 2. The wrapped blob is unwrapped via KMS and the plaintext DEK is cached in
//!    a [`DekStore`] for the rest of the process lifetime.
//! 3. Request handlers read the DEK via [`KeyLifecycleManager::current`].
//!
//! # Security invariants
//!
//! - The plaintext DEK is **never** written to disk, logged, or included in traces.
//! - Only the KMS-wrapped form is persisted, hex-encoded as the secret string.

pub mod gateway;
pub mod store;

pub use gateway::{
    CreateOutcome, GatewayError, GatewayErrorKind, KeyManagementGateway, SecretStoreGateway,
    WrappedKeyBlob,
};
pub use store::{DataKey, DekBytes, DekError, DekStore};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

/// Description attached to the secret when it is first created.
pub const SECRET_DESCRIPTION: &str = "FPE data encryption key protected by KMS CMK.";

/// Most foreign DEKs kept unwrapped at once. Only successful unwraps are
/// kept; a blob KMS rejects costs one `Decrypt` call per request.
const FOREIGN_KEY_CAPACITY: usize = 32;

/// Owns the process-wide DEK and the gateways used to materialise it.
pub struct KeyLifecycleManager {
    kms: Arc<dyn KeyManagementGateway>,
    secrets: Arc<dyn SecretStoreGateway>,
    master_key_id: String,
    secret_name: String,
    store: DekStore,
    foreign: Mutex<HashMap<WrappedKeyBlob, DekBytes>>,
}

impl KeyLifecycleManager {
    pub fn new(
        kms: Arc<dyn KeyManagementGateway>,
        secrets: Arc<dyn SecretStoreGateway>,
        master_key_id: impl Into<String>,
        secret_name: impl Into<String>,
    ) -> Self {
        Self {
            kms,
            secrets,
            master_key_id: master_key_id.into(),
            secret_name: secret_name.into(),
            store: DekStore::new(),
            foreign: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached DEK, materialising it on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if either gateway fails or the unwrapped key is not
    /// 32 bytes. Nothing is cached on failure.
    pub async fn get_or_create_dek(&self) -> Result<DataKey, DekError> {
        self.store.get_or_try_init(|| self.materialise()).await
    }

    /// The cached DEK.
    ///
    /// # Errors
    ///
    /// Returns [`DekError::NotInitialised`] before [`Self::get_or_create_dek`] succeeds.
    pub fn current(&self) -> Result<DataKey, DekError> {
        self.store.current()
    }

    pub fn is_ready(&self) -> bool {
        self.store.is_ready()
    }

    /// Resolve the plaintext DEK for a payload that references `wrapped`.
    ///
    /// The cached key is used when the payload was sealed under it. Any other
    /// blob is unwrapped through KMS once and then served from a small
    /// bounded cache.
    ///
    /// # Errors
    ///
    /// Returns [`DekError::NotInitialised`] before initialisation, or the
    /// KMS / length error from unwrapping a foreign blob.
    pub async fn resolve(&self, wrapped: &[u8]) -> Result<DekBytes, DekError> {
        let current = self.store.current()?;
        if current.wrapped.as_bytes() == wrapped {
            return Ok(current.plaintext);
        }

        let blob = WrappedKeyBlob::new(wrapped.to_vec());
        if let Some(dek) = self.foreign_keys().get(&blob) {
            return Ok(dek.clone());
        }

        debug!("payload references a different wrapped DEK; unwrapping via KMS");
        let dek = self.unwrap(&blob).await?;

        let mut foreign = self.foreign_keys();
        if foreign.len() >= FOREIGN_KEY_CAPACITY {
            if let Some(evicted) = foreign.keys().next().cloned() {
                foreign.remove(&evicted);
            }
        }
        foreign.insert(blob, dek.clone());
        Ok(dek)
    }

    fn foreign_keys(&self) -> MutexGuard<'_, HashMap<WrappedKeyBlob, DekBytes>> {
        self.foreign.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn materialise(&self) -> Result<DataKey, DekError> {
        if let Some(value) = self.secrets.get_secret(&self.secret_name).await? {
            info!(secret = %self.secret_name, "wrapped DEK found in secret store");
            let wrapped = WrappedKeyBlob::from_hex(&value)?;
            let plaintext = self.unwrap(&wrapped).await?;
            return Ok(DataKey { plaintext, wrapped });
        }

        info!(
            secret = %self.secret_name,
            "no wrapped DEK in secret store; generating a new data key"
        );
        let wrapped = self.kms.generate_data_key(&self.master_key_id).await?;

        // Unwrap before persisting so a key that cannot be used is never stored.
        let plaintext = self.unwrap(&wrapped).await?;

        match self
            .secrets
            .create_secret(&self.secret_name, &wrapped.to_hex(), SECRET_DESCRIPTION)
            .await?
        {
            CreateOutcome::Created => info!(secret = %self.secret_name, "wrapped DEK persisted"),
            CreateOutcome::AlreadyExists => warn!(
                secret = %self.secret_name,
                "secret was created concurrently; continuing with the locally generated DEK"
            ),
        }

        Ok(DataKey { plaintext, wrapped })
    }

    async fn unwrap(&self, wrapped: &WrappedKeyBlob) -> Result<DekBytes, DekError> {
        let plaintext = self.kms.unwrap_key(wrapped).await?;
        DekBytes::from_slice(&plaintext)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::gateway::{MockKeyManagementGateway, MockSecretStoreGateway};
    use super::*;
    use crate::crypto::KEY_LEN;

    pub(crate) const MASTER_KEY: &str = "arn:aws:kms:eu-west-1:111122223333:key/fpe-master";
    pub(crate) const SECRET_NAME: &str = "fpe-dek";

    pub(crate) fn wrapped_blob() -> WrappedKeyBlob {
        WrappedKeyBlob::new(vec![0xA1, 0xB2, 0xC3, 0xD4])
    }

    /// A manager whose secret store already holds [`wrapped_blob`], unwrapping to `0x42` bytes.
    pub(crate) fn existing_secret_manager() -> KeyLifecycleManager {
        let mut kms = MockKeyManagementGateway::new();
        kms.expect_generate_data_key().never();
        kms.expect_unwrap_key()
            .returning(|blob| {
                if *blob == wrapped_blob() {
                    Ok(vec![0x42; KEY_LEN])
                } else {
                    Err(GatewayError::permanent("kms:Decrypt", "InvalidCiphertextException"))
                }
            });

        let mut secrets = MockSecretStoreGateway::new();
        secrets
            .expect_get_secret()
            .returning(|_| Ok(Some(wrapped_blob().to_hex())));
        secrets.expect_create_secret().never();

        KeyLifecycleManager::new(Arc::new(kms), Arc::new(secrets), MASTER_KEY, SECRET_NAME)
    }

    #[tokio::test]
    async fn existing_secret_is_unwrapped_without_generating() {
        let manager = existing_secret_manager();
        let key = manager.get_or_create_dek().await.unwrap();
        assert_eq!(key.plaintext.as_slice(), &[0x42; KEY_LEN]);
        assert_eq!(key.wrapped, wrapped_blob());
        assert!(manager.is_ready());
    }

    #[tokio::test]
    async fn missing_secret_generates_once_and_creates_once() {
        let mut kms = MockKeyManagementGateway::new();
        kms.expect_generate_data_key()
            .withf(|id| id == MASTER_KEY)
            .times(1)
            .returning(|_| Ok(wrapped_blob()));
        kms.expect_unwrap_key()
            .times(1)
            .returning(|_| Ok(vec![0x07; KEY_LEN]));

        let mut secrets = MockSecretStoreGateway::new();
        secrets
            .expect_get_secret()
            .withf(|name| name == SECRET_NAME)
            .times(1)
            .returning(|_| Ok(None));
        secrets
            .expect_create_secret()
            .withf(|name, value, description| {
                name == SECRET_NAME && value == "a1b2c3d4" && description == SECRET_DESCRIPTION
            })
            .times(1)
            .returning(|_, _, _| Ok(CreateOutcome::Created));

        let manager =
            KeyLifecycleManager::new(Arc::new(kms), Arc::new(secrets), MASTER_KEY, SECRET_NAME);
        let key = manager.get_or_create_dek().await.unwrap();
        assert_eq!(key.plaintext.as_slice(), &[0x07; KEY_LEN]);

        // Cached: no further gateway calls.
        let again = manager.get_or_create_dek().await.unwrap();
        assert_eq!(again.wrapped, key.wrapped);
    }

    #[tokio::test]
    async fn concurrent_creator_race_is_tolerated() {
        let mut kms = MockKeyManagementGateway::new();
        kms.expect_generate_data_key()
            .times(1)
            .returning(|_| Ok(wrapped_blob()));
        kms.expect_unwrap_key()
            .times(1)
            .returning(|_| Ok(vec![0x09; KEY_LEN]));

        let mut secrets = MockSecretStoreGateway::new();
        secrets.expect_get_secret().returning(|_| Ok(None));
        secrets
            .expect_create_secret()
            .times(1)
            .returning(|_, _, _| Ok(CreateOutcome::AlreadyExists));

        let manager =
            KeyLifecycleManager::new(Arc::new(kms), Arc::new(secrets), MASTER_KEY, SECRET_NAME);
        let key = manager.get_or_create_dek().await.unwrap();
        assert_eq!(key.plaintext.as_slice(), &[0x09; KEY_LEN]);
    }

    #[tokio::test]
    async fn unwrap_failure_is_fatal_and_persists_nothing() {
        let mut kms = MockKeyManagementGateway::new();
        kms.expect_generate_data_key()
            .returning(|_| Ok(wrapped_blob()));
        kms.expect_unwrap_key()
            .returning(|_| Err(GatewayError::permanent("kms:Decrypt", "AccessDeniedException")));

        let mut secrets = MockSecretStoreGateway::new();
        secrets.expect_get_secret().returning(|_| Ok(None));
        secrets.expect_create_secret().never();

        let manager =
            KeyLifecycleManager::new(Arc::new(kms), Arc::new(secrets), MASTER_KEY, SECRET_NAME);
        let err = manager.get_or_create_dek().await.unwrap_err();
        assert!(matches!(err, DekError::Gateway(_)));
        assert!(!manager.is_ready());
        assert!(matches!(manager.current(), Err(DekError::NotInitialised)));
    }

    #[tokio::test]
    async fn secret_store_error_propagates() {
        let mut kms = MockKeyManagementGateway::new();
        kms.expect_generate_data_key().never();

        let mut secrets = MockSecretStoreGateway::new();
        secrets.expect_get_secret().returning(|_| {
            Err(GatewayError::permanent(
                "secretsmanager:GetSecretValue",
                "AccessDeniedException",
            ))
        });

        let manager =
            KeyLifecycleManager::new(Arc::new(kms), Arc::new(secrets), MASTER_KEY, SECRET_NAME);
        assert!(matches!(
            manager.get_or_create_dek().await,
            Err(DekError::Gateway(_))
        ));
    }

    #[tokio::test]
    async fn malformed_secret_is_rejected() {
        let kms = MockKeyManagementGateway::new();
        let mut secrets = MockSecretStoreGateway::new();
        secrets
            .expect_get_secret()
            .returning(|_| Ok(Some("not-hex".into())));

        let manager =
            KeyLifecycleManager::new(Arc::new(kms), Arc::new(secrets), MASTER_KEY, SECRET_NAME);
        assert!(matches!(
            manager.get_or_create_dek().await,
            Err(DekError::MalformedSecret(_))
        ));
    }

    #[tokio::test]
    async fn short_unwrapped_key_is_rejected() {
        let mut kms = MockKeyManagementGateway::new();
        kms.expect_unwrap_key().returning(|_| Ok(vec![0u8; 16]));
        let mut secrets = MockSecretStoreGateway::new();
        secrets
            .expect_get_secret()
            .returning(|_| Ok(Some(wrapped_blob().to_hex())));

        let manager =
            KeyLifecycleManager::new(Arc::new(kms), Arc::new(secrets), MASTER_KEY, SECRET_NAME);
        assert!(matches!(
            manager.get_or_create_dek().await,
            Err(DekError::InvalidLength(16))
        ));
    }

    #[tokio::test]
    async fn resolve_uses_cache_for_current_blob() {
        let manager = existing_secret_manager();
        manager.get_or_create_dek().await.unwrap();
        let dek = manager.resolve(wrapped_blob().as_bytes()).await.unwrap();
        assert_eq!(dek.as_slice(), &[0x42; KEY_LEN]);
    }

    #[tokio::test]
    async fn resolve_unwraps_foreign_blob() {
        let manager = existing_secret_manager();
        manager.get_or_create_dek().await.unwrap();
        assert!(matches!(
            manager.resolve(&[0xEE; 4]).await,
            Err(DekError::Gateway(_))
        ));
    }

    #[tokio::test]
    async fn foreign_blob_is_unwrapped_once() {
        const FOREIGN: [u8; 4] = [0xEE; 4];

        let mut kms = MockKeyManagementGateway::new();
        kms.expect_unwrap_key()
            .withf(|blob| *blob == wrapped_blob())
            .times(1)
            .returning(|_| Ok(vec![0x42; KEY_LEN]));
        kms.expect_unwrap_key()
            .withf(|blob| blob.as_bytes() == FOREIGN)
            .times(1)
            .returning(|_| Ok(vec![0x24; KEY_LEN]));
        let mut secrets = MockSecretStoreGateway::new();
        secrets
            .expect_get_secret()
            .returning(|_| Ok(Some(wrapped_blob().to_hex())));

        let manager =
            KeyLifecycleManager::new(Arc::new(kms), Arc::new(secrets), MASTER_KEY, SECRET_NAME);
        manager.get_or_create_dek().await.unwrap();

        for _ in 0..3 {
            let dek = manager.resolve(&FOREIGN).await.unwrap();
            assert_eq!(dek.as_slice(), &[0x24; KEY_LEN]);
        }
    }

    #[tokio::test]
    async fn foreign_key_cache_is_bounded() {
        let mut kms = MockKeyManagementGateway::new();
        kms.expect_unwrap_key()
            .returning(|_| Ok(vec![0x42; KEY_LEN]));
        let mut secrets = MockSecretStoreGateway::new();
        secrets
            .expect_get_secret()
            .returning(|_| Ok(Some(wrapped_blob().to_hex())));

        let manager =
            KeyLifecycleManager::new(Arc::new(kms), Arc::new(secrets), MASTER_KEY, SECRET_NAME);
        manager.get_or_create_dek().await.unwrap();

        for i in 0..(FOREIGN_KEY_CAPACITY as u32 + 10) {
            manager.resolve(&i.to_be_bytes()).await.unwrap();
        }
        assert_eq!(manager.foreign_keys().len(), FOREIGN_KEY_CAPACITY);
    }

    #[tokio::test]
    async fn failed_foreign_unwrap_is_not_cached() {
        let manager = existing_secret_manager();
        manager.get_or_create_dek().await.unwrap();
        assert!(manager.resolve(&[0xEE; 4]).await.is_err());
        assert!(manager.foreign_keys().is_empty());
    }

    /// Delays every read so concurrent callers overlap the first initialisation.
    struct SlowSecretStore(MockSecretStoreGateway);

    #[async_trait::async_trait]
    impl SecretStoreGateway for SlowSecretStore {
        async fn get_secret(&self, name: &str) -> Result<Option<String>, GatewayError> {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            self.0.get_secret(name).await
        }

        async fn create_secret(
            &self,
            name: &str,
            value: &str,
            description: &str,
        ) -> Result<CreateOutcome, GatewayError> {
            self.0.create_secret(name, value, description).await
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_callers_share_one_initialisation() {
        let mut kms = MockKeyManagementGateway::new();
        kms.expect_generate_data_key()
            .times(1)
            .returning(|_| Ok(wrapped_blob()));
        kms.expect_unwrap_key()
            .times(1)
            .returning(|_| Ok(vec![0x07; KEY_LEN]));

        let mut secrets = MockSecretStoreGateway::new();
        secrets.expect_get_secret().times(1).returning(|_| Ok(None));
        secrets
            .expect_create_secret()
            .times(1)
            .returning(|_, _, _| Ok(CreateOutcome::Created));

        let manager = Arc::new(KeyLifecycleManager::new(
            Arc::new(kms),
            Arc::new(SlowSecretStore(secrets)),
            MASTER_KEY,
            SECRET_NAME,
        ));

        let mut callers = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let manager = Arc::clone(&manager);
            callers.spawn(async move { manager.get_or_create_dek().await });
        }

        let mut keys = Vec::new();
        while let Some(joined) = callers.join_next().await {
            keys.push(joined.unwrap().unwrap());
        }
        assert_eq!(keys.len(), 8);
        for key in &keys {
            assert_eq!(key.wrapped, wrapped_blob());
            assert_eq!(key.plaintext.as_slice(), &[0x07; KEY_LEN]);
        }
    }

    #[tokio::test]
    async fn resolve_before_init_fails() {
        let manager = existing_secret_manager();
        assert!(matches!(
            manager.resolve(wrapped_blob().as_bytes()).await,
            Err(DekError::NotInitialised)
        ));
    }
}
