//! [`SecretStoreGateway`] backed by AWS Secrets Manager.

use arc_swap::ArcSwap;
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_secretsmanager::Client;

use super::clients::AwsSessions;
use super::retry::{call_with_retry, sdk_error};
use crate::dek::{CreateOutcome, GatewayError, SecretStoreGateway};

const GET_SECRET_VALUE: &str = "secretsmanager:GetSecretValue";
const CREATE_SECRET: &str = "secretsmanager:CreateSecret";

/// Reads and creates string secrets in Secrets Manager.
pub struct SecretsManagerGateway {
    client: ArcSwap<Client>,
    corrected: SdkConfig,
}

impl SecretsManagerGateway {
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
impl SecretStoreGateway for SecretsManagerGateway {
    async fn get_secret(&self, name: &str) -> Result<Option<String>, GatewayError> {
        call_with_retry(
            &self.client,
            || self.corrected_client(),
            GET_SECRET_VALUE,
            |client| async move {
                match client.get_secret_value().secret_id(name).send().await {
                    Ok(output) => output
                        .secret_string()
                        .map(|value| Some(value.to_owned()))
                        .ok_or_else(|| {
                            GatewayError::permanent(
                                GET_SECRET_VALUE,
                                "secret holds no string value",
                            )
                        }),
                    Err(err)
                        if err
                            .as_service_error()
                            .is_some_and(|e| e.is_resource_not_found_exception()) =>
                    {
                        Ok(None)
                    }
                    Err(err) => Err(sdk_error(GET_SECRET_VALUE, err)),
                }
            },
        )
        .await
    }

    async fn create_secret(
        &self,
        name: &str,
        value: &str,
        description: &str,
    ) -> Result<CreateOutcome, GatewayError> {
        call_with_retry(
            &self.client,
            || self.corrected_client(),
            CREATE_SECRET,
            |client| async move {
                match client
                    .create_secret()
                    .name(name)
                    .secret_string(value)
                    .description(description)
                    .send()
                    .await
                {
                    Ok(_) => Ok(CreateOutcome::Created),
                    Err(err)
                        if err
                            .as_service_error()
                            .is_some_and(|e| e.is_resource_exists_exception()) =>
                    {
                        Ok(CreateOutcome::AlreadyExists)
                    }
                    Err(err) => Err(sdk_error(CREATE_SECRET, err)),
                }
            },
        )
        .await
    }
}
