//! [`KeyManagementGateway`] backed by AWS KMS.

use arc_swap::ArcSwap;
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_kms::primitives::Blob;
use aws_sdk_kms::Client;

use super::clients::AwsSessions;
use super::retry::{call_with_retry, sdk_error};
use crate::crypto::KEY_LEN;
use crate::dek::{GatewayError, KeyManagementGateway, WrappedKeyBlob};

const GENERATE_DATA_KEY: &str = "kms:GenerateDataKey";
const DECRYPT: &str = "kms:Decrypt";

/// Generates and unwraps data keys under a KMS customer master key.
pub struct KmsGateway {
    client: ArcSwap<Client>,
    corrected: SdkConfig,
}

impl KmsGateway {
    pub fn new(sessions: &AwsSessions) -> Self {
        Self {
            client: ArcSwap::from_pointee(Client::new(&sessions.primary)),
            corrected: sessions.corrected.clone(),
        }
    }

    fn corrected_client(&self) -> Client {
        Client::new(&self.corrected)
    }
}

#[async_trait]
impl KeyManagementGateway for KmsGateway {
    async fn generate_data_key(&self, master_key_id: &str) -> Result<WrappedKeyBlob, GatewayError> {
        let output = call_with_retry(
            &self.client,
            || self.corrected_client(),
            GENERATE_DATA_KEY,
            |client| async move {
                client
                    .generate_data_key()
                    .key_id(master_key_id)
                    .number_of_bytes(KEY_LEN as i32)
                    .send()
                    .await
                    .map_err(|e| sdk_error(GENERATE_DATA_KEY, e))
            },
        )
        .await?;

        let blob = output.ciphertext_blob().ok_or_else(|| {
            GatewayError::permanent(GENERATE_DATA_KEY, "response contained no ciphertext blob")
        })?;
        Ok(WrappedKeyBlob::new(blob.as_ref().to_vec()))
    }

    async fn unwrap_key(&self, blob: &WrappedKeyBlob) -> Result<Vec<u8>, GatewayError> {
        let ciphertext = blob.as_bytes();
        let output = call_with_retry(
            &self.client,
            || self.corrected_client(),
            DECRYPT,
            |client| async move {
                client
                    .decrypt()
                    .ciphertext_blob(Blob::new(ciphertext.to_vec()))
                    .send()
                    .await
                    .map_err(|e| sdk_error(DECRYPT, e))
            },
        )
        .await?;

        let plaintext = output
            .plaintext()
            .ok_or_else(|| GatewayError::permanent(DECRYPT, "response contained no plaintext"))?;
        Ok(plaintext.as_ref().to_vec())
    }
}
