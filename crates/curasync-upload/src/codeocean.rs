//! Code Ocean registration of uploaded assets.

use async_trait::async_trait;
use curasync_core::schema::{DataLevel, Modality, Platform};
use curasync_core::store::{ParameterStore, SecretStore, required_str};
use serde::Serialize;
use tracing::info;
use url::Url;

use crate::error::{CodeOceanError, UploadResult};
use crate::plan::{RegistrationStyle, UploadPlan};

pub const DOMAIN_KEY: &str = "codeocean_domain";
pub const CAPSULE_ID_KEY: &str = "codeocean_trigger_capsule_id";
pub const TOKEN_KEY: &str = "codeocean_api_token";

/// Connection details for Code Ocean, read from the parameter and secrets stores.
#[derive(Clone)]
pub struct CodeOceanCredentials {
    pub domain: String,
    pub capsule_id: String,
    pub token: String,
}

impl std::fmt::Debug for CodeOceanCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeOceanCredentials")
            .field("domain", &self.domain)
            .field("capsule_id", &self.capsule_id)
            .field("token", &"***")
            .finish()
    }
}

impl CodeOceanCredentials {
    /// Domain and capsule id come from the parameter at `param_path`,
    /// the API token from the secret at `secret_path`. Both must be JSON objects.
    pub async fn resolve(
        params: &dyn ParameterStore,
        secrets: &dyn SecretStore,
        param_path: &str,
        secret_path: &str,
    ) -> UploadResult<Self> {
        let param = params.get_parameter_json(param_path).await?;
        let secret = secrets.get_secret_json(secret_path).await?;

        Ok(Self {
            domain: required_str(&param, DOMAIN_KEY, param_path)?.to_string(),
            capsule_id: required_str(&param, CAPSULE_ID_KEY, param_path)?.to_string(),
            token: required_str(&secret, TOKEN_KEY, secret_path)?.to_string(),
        })
    }
}

/// Free-form metadata attached to a registered asset.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CustomMetadata {
    Derived {
        modality: String,
        #[serde(rename = "experiment type")]
        experiment_type: String,
        #[serde(rename = "data level")]
        data_level: String,
        #[serde(rename = "subject id")]
        subject_id: String,
    },
    Folder {
        modality: String,
        platform: String,
        #[serde(rename = "data level")]
        data_level: String,
        #[serde(rename = "subject id")]
        subject_id: String,
    },
}

/// The job the trigger capsule runs to register a prefix as a data asset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegisterDataJob {
    pub job_type: String,
    pub capsule_id: String,
    pub bucket: String,
    pub prefix: String,
    pub tags: Vec<String>,
    pub custom_metadata: CustomMetadata,
}

impl RegisterDataJob {
    pub fn for_plan(plan: &UploadPlan, capsule_id: &str, bucket: &str) -> Self {
        let derived = DataLevel::Derived.as_str().to_string();
        let ecephys = Platform::Ecephys.abbreviation().to_string();
        let subject = plan.subject_id.clone();

        let (tags, custom_metadata) = match plan.style {
            RegistrationStyle::Derived => {
                let platform = plan.platform.abbreviation().to_string();
                (
                    vec![
                        ecephys,
                        subject.clone(),
                        "curated".to_string(),
                        platform.clone(),
                        derived.clone(),
                    ],
                    CustomMetadata::Derived {
                        modality: Modality::Ecephys.name().to_string(),
                        experiment_type: platform,
                        data_level: derived,
                        subject_id: subject,
                    },
                )
            }
            RegistrationStyle::Folder => (
                vec![
                    ecephys.clone(),
                    subject.clone(),
                    "curated".to_string(),
                    derived.clone(),
                ],
                CustomMetadata::Folder {
                    modality: Modality::Ecephys.key().to_string(),
                    platform: ecephys,
                    data_level: derived,
                    subject_id: subject,
                },
            ),
        };

        Self {
            job_type: "register_data".to_string(),
            capsule_id: capsule_id.to_string(),
            bucket: bucket.to_string(),
            prefix: plan.prefix.clone(),
            tags,
            custom_metadata,
        }
    }
}

#[derive(Serialize)]
struct TriggerParameters<'a> {
    trigger_codeocean_job: &'a RegisterDataJob,
}

/// Body of `POST /api/v1/computations`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunCapsuleRequest {
    pub capsule_id: String,
    /// Positional capsule parameters; the trigger capsule takes one JSON document.
    pub parameters: Vec<String>,
}

impl RunCapsuleRequest {
    pub fn register(job: &RegisterDataJob) -> serde_json::Result<Self> {
        let parameters = serde_json::to_string(&TriggerParameters {
            trigger_codeocean_job: job,
        })?;
        Ok(Self {
            capsule_id: job.capsule_id.clone(),
            parameters: vec![parameters],
        })
    }
}

/// Starts capsule runs.
#[async_trait]
pub trait Registrar: Send + Sync {
    /// Start a run, returning the response body.
    async fn run_capsule(
        &self,
        request: &RunCapsuleRequest,
    ) -> Result<serde_json::Value, CodeOceanError>;
}

/// HTTP client for the Code Ocean API.
#[derive(Debug, Clone)]
pub struct CodeOceanClient {
    http: reqwest::Client,
    computations_url: Url,
    token: String,
}

impl CodeOceanClient {
    pub fn new(domain: &str, token: impl Into<String>) -> Result<Self, CodeOceanError> {
        let invalid = |message: String| CodeOceanError::InvalidDomain {
            domain: domain.to_string(),
            message,
        };
        let base = Url::parse(&format!("{}/", domain.trim_end_matches('/')))
            .map_err(|e| invalid(e.to_string()))?;
        let computations_url = base
            .join("api/v1/computations")
            .map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            http: reqwest::Client::new(),
            computations_url,
            token: token.into(),
        })
    }

    pub fn from_credentials(credentials: &CodeOceanCredentials) -> Result<Self, CodeOceanError> {
        Self::new(&credentials.domain, credentials.token.clone())
    }

    pub fn computations_url(&self) -> &Url {
        &self.computations_url
    }
}

#[async_trait]
impl Registrar for CodeOceanClient {
    async fn run_capsule(
        &self,
        request: &RunCapsuleRequest,
    ) -> Result<serde_json::Value, CodeOceanError> {
        let response = self
            .http
            .post(self.computations_url.clone())
            .basic_auth(&self.token, Some(""))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CodeOceanError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: serde_json::Value = response.json().await?;
        info!(capsule_id = %request.capsule_id, computation = %body.get("id").unwrap_or(&serde_json::Value::Null), "Capsule run started");
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::plan_curation_file;
    use chrono::TimeZone;
    use curasync_config::InvestigatorMap;
    use curasync_core::store::memory::MemoryKeyStore;
    use std::path::Path;

    fn derived_plan() -> UploadPlan {
        plan_curation_file(
            Path::new("/repo"),
            Path::new("ecephys_661398_2023-03-31_17-01-09/sorting_curation.json"),
            "jdoe",
            chrono::Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap(),
            &InvestigatorMap::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_derived_registration_payload() {
        let job = RegisterDataJob::for_plan(&derived_plan(), "capsule-1", "curated-bucket");
        let request = RunCapsuleRequest::register(&job).unwrap();
        assert_eq!(request.capsule_id, "capsule-1");
        assert_eq!(request.parameters.len(), 1);

        let params: serde_json::Value = serde_json::from_str(&request.parameters[0]).unwrap();
        assert_eq!(
            params,
            serde_json::json!({
                "trigger_codeocean_job": {
                    "job_type": "register_data",
                    "capsule_id": "capsule-1",
                    "bucket": "curated-bucket",
                    "prefix": "ecephys_661398_2023-03-31_17-01-09_sorting-curated_2024-05-06_07-08-09",
                    "tags": ["ecephys", "661398", "curated", "ecephys", "derived"],
                    "custom_metadata": {
                        "modality": "Extracellular electrophysiology",
                        "experiment type": "ecephys",
                        "data level": "derived",
                        "subject id": "661398"
                    }
                }
            })
        );
    }

    #[test]
    fn test_folder_registration_payload() {
        let mut plan = derived_plan();
        plan.style = RegistrationStyle::Folder;
        let job = RegisterDataJob::for_plan(&plan, "capsule-1", "curated-bucket");

        assert_eq!(job.tags, vec!["ecephys", "661398", "curated", "derived"]);
        assert_eq!(
            serde_json::to_value(&job.custom_metadata).unwrap(),
            serde_json::json!({
                "modality": "ECEPHYS",
                "platform": "ecephys",
                "data level": "derived",
                "subject id": "661398"
            })
        );
    }

    #[test]
    fn test_computations_url() {
        let client = CodeOceanClient::new("https://codeocean.example.org/", "token").unwrap();
        assert_eq!(
            client.computations_url().as_str(),
            "https://codeocean.example.org/api/v1/computations"
        );
        assert!(CodeOceanClient::new("not a url", "token").is_err());
    }

    #[tokio::test]
    async fn test_resolve_credentials() {
        let store = MemoryKeyStore::new()
            .with(
                "/aind/prod/codeocean/endpoints",
                r#"{"codeocean_domain": "https://co.example.org", "codeocean_trigger_capsule_id": "cap-9"}"#,
            )
            .with(
                "/aind/prod/codeocean/credentials",
                r#"{"codeocean_api_token": "cop_secret"}"#,
            );
        let creds = CodeOceanCredentials::resolve(
            &store,
            &store,
            "/aind/prod/codeocean/endpoints",
            "/aind/prod/codeocean/credentials",
        )
        .await
        .unwrap();

        assert_eq!(creds.domain, "https://co.example.org");
        assert_eq!(creds.capsule_id, "cap-9");
        assert_eq!(creds.token, "cop_secret");
        assert!(!format!("{:?}", creds).contains("cop_secret"));
    }

    #[tokio::test]
    async fn test_missing_credential_key() {
        let store = MemoryKeyStore::new()
            .with("params", r#"{"codeocean_domain": "https://co.example.org"}"#)
            .with("secrets", r#"{"codeocean_api_token": "t"}"#);
        assert!(
            CodeOceanCredentials::resolve(&store, &store, "params", "secrets")
                .await
                .is_err()
        );
    }
}
