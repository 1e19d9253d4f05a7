use async_trait::async_trait;
use aws_sdk_ssm::Client;
use aws_sdk_ssm::error::{DisplayErrorContext, SdkError};
use curasync_core::store::ParameterStore;
use curasync_core::{Error, Result};

/// Parameter store backed by AWS Systems Manager. SecureString values are decrypted.
#[derive(Debug, Clone)]
pub struct SsmParameterStore {
    client: Client,
}

impl SsmParameterStore {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: Client::new(config),
        }
    }
}

#[async_trait]
impl ParameterStore for SsmParameterStore {
    async fn get_parameter(&self, name: &str) -> Result<String> {
        let resp = self
            .client
            .get_parameter()
            .name(name)
            .with_decryption(true)
            .send()
            .await
            .map_err(|e| match e {
                SdkError::ServiceError(ref service) if service.err().is_parameter_not_found() => {
                    Error::NotFound(format!("parameter {}", name))
                }
                other => Error::Storage(format!(
                    "reading parameter {} failed: {}",
                    name,
                    DisplayErrorContext(&other)
                )),
            })?;

        resp.parameter()
            .and_then(|p| p.value())
            .map(str::to_string)
            .ok_or_else(|| Error::NotFound(format!("parameter {} has no value", name)))
    }
}
