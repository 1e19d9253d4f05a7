//! The upload pipeline: discover, plan, upload, register.

use async_trait::async_trait;
use bytes::Bytes;
use curasync_config::InvestigatorMap;
use curasync_core::store::memory::MemoryObjectStore;
use curasync_core::store::{ObjectStore, StoredObject};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::codeocean::{RegisterDataJob, Registrar, RunCapsuleRequest};
use crate::discovery::{GitRepo, find_curation_files, parse_added_folders, parse_name_status};
use crate::error::{CodeOceanError, UploadError, UploadResult};
use crate::plan::{ObjectSource, UploadPlan, plan_curation_file, plan_folder};

/// Folder prefix selected by the legacy folder mode.
const FOLDER_MODE_PREFIX: &str = "ecephys";

/// Which assets to upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMode {
    /// Curation files added or modified by the last commit.
    New,
    /// Every curation file in the repository.
    All,
    /// Whole asset folders added by the last commit.
    Folders,
}

/// Assets found in the repository, split into plans and rejects.
#[derive(Debug, Default)]
pub struct Discovery {
    pub plans: Vec<UploadPlan>,
    /// Assets that could not be planned, with the reason.
    pub rejected: Vec<(String, UploadError)>,
}

impl Discovery {
    fn push(&mut self, asset: String, plan: UploadResult<UploadPlan>) {
        match plan {
            Ok(plan) => {
                info!(asset = %asset, prefix = %plan.prefix, "Planned upload");
                self.plans.push(plan);
            }
            Err(e) => {
                warn!(asset = %asset, error = %e, "Skipping asset");
                self.rejected.push((asset, e));
            }
        }
    }

    pub fn total(&self) -> usize {
        self.plans.len() + self.rejected.len()
    }
}

/// Find the assets to upload for `mode` and plan each of them.
pub async fn discover(
    mode: UploadMode,
    repo: &GitRepo,
    investigators: &InvestigatorMap,
) -> UploadResult<Discovery> {
    let mut discovery = Discovery::default();

    match mode {
        UploadMode::New => {
            let commit = repo.last_commit(None).await?;
            let files = parse_name_status(&repo.last_commit_name_status().await?);
            info!(sha = %commit.short_sha, author = %commit.author, time = %commit.time, files = files.len(), "Curation files in last commit");
            for file in files {
                let plan = plan_curation_file(
                    repo.root(),
                    PathBuf::from(&file).as_path(),
                    &commit.author,
                    commit.time,
                    investigators,
                );
                discovery.push(file, plan);
            }
        }
        UploadMode::All => {
            let files = find_curation_files(repo.root()).await?;
            info!(files = files.len(), "Curation files in repository");
            for file in files {
                let commit = repo.last_commit(Some(&file)).await?;
                let plan = plan_curation_file(
                    repo.root(),
                    &file,
                    &commit.author,
                    commit.time,
                    investigators,
                );
                discovery.push(file.display().to_string(), plan);
            }
        }
        UploadMode::Folders => {
            let commit = repo.last_commit(None).await?;
            let folders =
                parse_added_folders(&repo.last_commit_name_status().await?, FOLDER_MODE_PREFIX);
            info!(time = %commit.time, folders = folders.len(), "Asset folders added in last commit");
            for folder in folders {
                let plan = plan_folder(repo.root(), &folder, commit.time).await;
                discovery.push(folder, plan);
            }
        }
    }

    Ok(discovery)
}

/// Outcome of one uploaded and registered asset.
///
/// For a dry run, `objects` lists what would have been written and
/// `registration` is the job that would have been submitted.
#[derive(Debug, Clone)]
pub struct UploadReport {
    pub prefix: String,
    pub objects: Vec<StoredObject>,
    pub registration: serde_json::Value,
    pub dry_run: bool,
}

/// Registrar for uploaders that never register anything.
struct NoRegistrar;

#[async_trait]
impl Registrar for NoRegistrar {
    async fn run_capsule(
        &self,
        _request: &RunCapsuleRequest,
    ) -> Result<serde_json::Value, CodeOceanError> {
        Ok(serde_json::Value::Null)
    }
}

/// Uploads planned assets and registers them.
pub struct Uploader {
    bucket: String,
    capsule_id: String,
    objects: Arc<dyn ObjectStore>,
    registrar: Arc<dyn Registrar>,
    dry_run: bool,
}

impl Uploader {
    pub fn new(
        bucket: impl Into<String>,
        capsule_id: impl Into<String>,
        objects: Arc<dyn ObjectStore>,
        registrar: Arc<dyn Registrar>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            capsule_id: capsule_id.into(),
            objects,
            registrar,
            dry_run: false,
        }
    }

    /// An uploader that only reports what it would do. It needs no
    /// credentials and contacts no store.
    pub fn dry_run(bucket: impl Into<String>) -> Self {
        Self::new(
            bucket,
            String::new(),
            Arc::new(MemoryObjectStore::new()),
            Arc::new(NoRegistrar),
        )
        .with_dry_run(true)
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Upload every object of the plan, then register its prefix.
    /// Nothing is registered unless every object was stored.
    pub async fn upload(&self, plan: &UploadPlan) -> UploadResult<UploadReport> {
        if self.dry_run {
            return self.preview(plan).await;
        }

        let mut stored = Vec::with_capacity(plan.objects.len());
        for object in &plan.objects {
            let body = match &object.source {
                ObjectSource::File(path) => Bytes::from(tokio::fs::read(path).await?),
                ObjectSource::Inline(bytes) => bytes.clone(),
            };
            let result = self.objects.put(&self.bucket, &object.key, body).await?;
            info!(uri = %result.uri(), size = result.size, "Uploaded");
            stored.push(result);
        }

        let job = RegisterDataJob::for_plan(plan, &self.capsule_id, &self.bucket);
        let request = RunCapsuleRequest::register(&job)?;
        let registration = self.registrar.run_capsule(&request).await?;
        info!(uri = %plan.uri(&self.bucket), "Registered");

        Ok(UploadReport {
            prefix: plan.prefix.clone(),
            objects: stored,
            registration,
            dry_run: false,
        })
    }

    /// Check that every source is readable and log the writes and the
    /// registration an upload would make.
    async fn preview(&self, plan: &UploadPlan) -> UploadResult<UploadReport> {
        let mut objects = Vec::with_capacity(plan.objects.len());
        for object in &plan.objects {
            let size = match &object.source {
                ObjectSource::File(path) => tokio::fs::metadata(path).await?.len(),
                ObjectSource::Inline(bytes) => bytes.len() as u64,
            };
            let would_store = StoredObject {
                bucket: self.bucket.clone(),
                key: object.key.clone(),
                size,
                e_tag: None,
            };
            info!(uri = %would_store.uri(), size, "Dry run: would upload");
            objects.push(would_store);
        }

        let job = RegisterDataJob::for_plan(plan, &self.capsule_id, &self.bucket);
        info!(uri = %plan.uri(&self.bucket), "Dry run: would register");

        Ok(UploadReport {
            prefix: plan.prefix.clone(),
            objects,
            registration: serde_json::to_value(&job)?,
            dry_run: true,
        })
    }

    /// Upload all plans in order, stopping at the first failure.
    pub async fn upload_all(&self, plans: &[UploadPlan]) -> UploadResult<Vec<UploadReport>> {
        let mut reports = Vec::with_capacity(plans.len());
        for plan in plans {
            match self.upload(plan).await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    error!(prefix = %plan.prefix, error = %e, "Upload failed");
                    return Err(e);
                }
            }
        }
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingRegistrar {
        requests: Mutex<Vec<RunCapsuleRequest>>,
        fail: bool,
    }

    #[async_trait]
    impl Registrar for RecordingRegistrar {
        async fn run_capsule(
            &self,
            request: &RunCapsuleRequest,
        ) -> Result<serde_json::Value, CodeOceanError> {
            if self.fail {
                return Err(CodeOceanError::Status {
                    status: 500,
                    body: "boom".to_string(),
                });
            }
            self.requests.lock().unwrap().push(request.clone());
            Ok(serde_json::json!({"id": "run-1"}))
        }
    }

    async fn folder_plan(dir: &tempfile::TempDir) -> UploadPlan {
        let folder = "ecephys_661398_2023-03-31_17-01-09";
        std::fs::create_dir_all(dir.path().join(folder)).unwrap();
        std::fs::write(dir.path().join(folder).join("curation.json"), r#"{"units": []}"#).unwrap();
        plan_folder(
            dir.path(),
            folder,
            Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_upload_then_register() {
        let dir = tempfile::tempdir().unwrap();
        let plan = folder_plan(&dir).await;
        let objects = Arc::new(MemoryObjectStore::new());
        let registrar = Arc::new(RecordingRegistrar::default());
        let uploader = Uploader::new("curated-bucket", "cap-1", objects.clone(), registrar.clone());

        let report = uploader.upload(&plan).await.unwrap();

        assert_eq!(report.objects.len(), 2);
        assert!(stored_in(&objects, "curated-bucket"));
        assert_eq!(
            objects.keys(),
            vec![
                "ecephys_661398_2023-03-31_17-01-09_curated_2024-05-06_07-08-09/curation.json",
                "ecephys_661398_2023-03-31_17-01-09_curated_2024-05-06_07-08-09/data_description.json",
            ]
        );
        let stored = objects.objects();
        let description = stored
            .iter()
            .find(|(_, key, _)| key.ends_with("data_description.json"))
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&description.2).unwrap();
        assert_eq!(json["process_name"], "curated");
        assert!(std::str::from_utf8(&description.2).unwrap().contains("\n   \""));

        let requests = registrar.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].capsule_id, "cap-1");
    }

    #[tokio::test]
    async fn test_dry_run_writes_and_registers_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let plans = vec![folder_plan(&dir).await];
        let objects = Arc::new(MemoryObjectStore::new());
        let registrar = Arc::new(RecordingRegistrar::default());
        let uploader = Uploader::new("curated-bucket", "cap-1", objects.clone(), registrar.clone())
            .with_dry_run(true);

        let reports = uploader.upload_all(&plans).await.unwrap();

        assert!(objects.keys().is_empty());
        assert!(registrar.requests.lock().unwrap().is_empty());

        assert_eq!(reports.len(), 1);
        let report = &reports[0];
        assert!(report.dry_run);
        assert_eq!(report.prefix, plans[0].prefix);
        assert_eq!(
            report.objects[0].uri(),
            "s3://curated-bucket/ecephys_661398_2023-03-31_17-01-09_curated_2024-05-06_07-08-09/curation.json"
        );
        assert_eq!(report.objects[0].size, r#"{"units": []}"#.len() as u64);
        assert_eq!(report.registration["capsule_id"], "cap-1");
    }

    #[tokio::test]
    async fn test_dry_run_reports_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let plan = folder_plan(&dir).await;
        std::fs::remove_file(
            dir.path()
                .join("ecephys_661398_2023-03-31_17-01-09/curation.json"),
        )
        .unwrap();

        assert!(matches!(
            Uploader::dry_run("curated-bucket").upload(&plan).await,
            Err(UploadError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_file_fails_before_register() {
        let dir = tempfile::tempdir().unwrap();
        let plan = folder_plan(&dir).await;
        std::fs::remove_file(
            dir.path()
                .join("ecephys_661398_2023-03-31_17-01-09/curation.json"),
        )
        .unwrap();

        let registrar = Arc::new(RecordingRegistrar::default());
        let uploader = Uploader::new(
            "curated-bucket",
            "cap-1",
            Arc::new(MemoryObjectStore::new()),
            registrar.clone(),
        );

        assert!(matches!(
            uploader.upload_all(&[plan]).await,
            Err(UploadError::Io(_))
        ));
        assert!(registrar.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_registration_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let plan = folder_plan(&dir).await;
        let registrar = Arc::new(RecordingRegistrar {
            fail: true,
            ..Default::default()
        });
        let uploader = Uploader::new(
            "curated-bucket",
            "cap-1",
            Arc::new(MemoryObjectStore::new()),
            registrar,
        );

        assert!(matches!(
            uploader.upload(&plan).await,
            Err(UploadError::CodeOcean(CodeOceanError::Status { status: 500, .. }))
        ));
    }

    fn stored_in(objects: &MemoryObjectStore, bucket: &str) -> bool {
        objects.objects().iter().all(|(b, _, _)| b == bucket)
    }

    fn git(dir: &std::path::Path, args: &[&str]) -> bool {
        std::process::Command::new("git")
            .args(["-c", "user.name=Jane Doe", "-c", "user.email=jdoe@example.org"])
            .args(args)
            .current_dir(dir)
            .env("GIT_COMMITTER_DATE", "1700000000 +0000")
            .env("GIT_AUTHOR_DATE", "1700000000 +0000")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn test_discover_new_curation_files() {
        let dir = tempfile::tempdir().unwrap();
        if !git(dir.path(), &["init", "-q"]) {
            // git is not installed
            return;
        }
        let folder = dir.path().join("ecephys_661398_2023-03-31_17-01-09");
        std::fs::create_dir_all(&folder).unwrap();
        std::fs::write(folder.join("sorting_curation.json"), "{}").unwrap();
        std::fs::write(folder.join("notes.txt"), "x").unwrap();
        assert!(git(dir.path(), &["add", "."]));
        assert!(git(dir.path(), &["commit", "-q", "-m", "Add curation"]));

        let investigators = InvestigatorMap::from_json(r#"{"Jane Doe": "Jane Q. Doe"}"#).unwrap();
        let repo = GitRepo::new(dir.path());

        let discovery = discover(UploadMode::New, &repo, &investigators).await.unwrap();
        assert!(discovery.rejected.is_empty());
        assert_eq!(discovery.plans.len(), 1);
        let plan = &discovery.plans[0];
        assert_eq!(
            plan.prefix,
            "ecephys_661398_2023-03-31_17-01-09_sorting-curated_2023-11-14_22-13-20"
        );
        assert_eq!(plan.description.investigators[0].name, "Jane Q. Doe");

        let discovery = discover(UploadMode::All, &repo, &investigators).await.unwrap();
        assert_eq!(discovery.plans.len(), 1);
        assert_eq!(discovery.plans[0].prefix, plan.prefix);

        let discovery = discover(UploadMode::Folders, &repo, &investigators).await.unwrap();
        assert_eq!(discovery.plans.len(), 1);
        assert_eq!(discovery.plans[0].objects.len(), 3);
    }
}
