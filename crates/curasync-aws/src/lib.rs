//! AWS implementations of the curasync store traits.
//!
//! - [`S3ObjectStore`] writes objects to S3
//! - [`SsmParameterStore`] reads Systems Manager parameters
//! - [`SecretsManagerStore`] reads Secrets Manager secrets

mod s3;
mod secrets;
mod ssm;

pub use s3::S3ObjectStore;
pub use secrets::SecretsManagerStore;
pub use ssm::SsmParameterStore;

use aws_config::{BehaviorVersion, Region, SdkConfig};

/// Load shared SDK configuration from the environment.
///
/// Credentials come from the default provider chain (`AWS_ACCESS_KEY_ID`,
/// profiles, instance roles). An explicit region overrides `AWS_DEFAULT_REGION`.
pub async fn load_sdk_config(region: Option<String>) -> SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(region) = region {
        loader = loader.region(Region::new(region));
    }
    loader.load().await
}

/// Build all three stores from one SDK configuration.
pub fn stores(config: &SdkConfig) -> (S3ObjectStore, SsmParameterStore, SecretsManagerStore) {
    (
        S3ObjectStore::new(config),
        SsmParameterStore::new(config),
        SecretsManagerStore::new(config),
    )
}
