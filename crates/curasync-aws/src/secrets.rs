use async_trait::async_trait;
use aws_sdk_secretsmanager::Client;
use aws_sdk_secretsmanager::error::{DisplayErrorContext, SdkError};
use curasync_core::store::SecretStore;
use curasync_core::{Error, Result};

/// Secret store backed by AWS Secrets Manager. Only string secrets are supported.
#[derive(Debug, Clone)]
pub struct SecretsManagerStore {
    client: Client,
}

impl SecretsManagerStore {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: Client::new(config),
        }
    }
}

#[async_trait]
impl SecretStore for SecretsManagerStore {
    async fn get_secret(&self, secret_id: &str) -> Result<String> {
        let resp = self
            .client
            .get_secret_value()
            .secret_id(secret_id)
            .send()
            .await
            .map_err(|e| match e {
                SdkError::ServiceError(ref service)
                    if service.err().is_resource_not_found_exception() =>
                {
                    Error::NotFound(format!("secret {}", secret_id))
                }
                other => Error::Storage(format!(
                    "reading secret {} failed: {}",
                    secret_id,
                    DisplayErrorContext(&other)
                )),
            })?;

        resp.secret_string()
            .map(str::to_string)
            .ok_or_else(|| Error::InvalidInput(format!("secret {} is not a string secret", secret_id)))
    }
}
