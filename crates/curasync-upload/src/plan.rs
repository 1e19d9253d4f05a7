//! Upload plans: what goes where for one asset.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use curasync_config::InvestigatorMap;
use curasync_core::schema::{
    DerivedDataDescription, DerivedDataInput, Investigator, Modality, Organization, Platform,
    RawDataName, build_data_name,
};
use std::fmt;
use std::path::{Component, Path, PathBuf};

use crate::discovery::list_files;
use crate::error::{UploadError, UploadResult};

/// Process name used for whole-folder uploads.
pub const FOLDER_PROCESS_NAME: &str = "curated";

/// Where the bytes of an object come from.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectSource {
    File(PathBuf),
    Inline(Bytes),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedObject {
    pub key: String,
    pub source: ObjectSource,
}

/// How the asset is described to Code Ocean.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationStyle {
    /// Per-file curation uploads, tagged with the platform.
    Derived,
    /// Whole-folder uploads from the legacy workflow.
    Folder,
}

/// Everything needed to upload and register one derived asset.
#[derive(Debug, Clone)]
pub struct UploadPlan {
    /// Raw asset folder the derived data came from.
    pub input_data_name: String,
    pub prefix: String,
    pub subject_id: String,
    pub platform: Platform,
    pub style: RegistrationStyle,
    pub description: DerivedDataDescription,
    pub objects: Vec<PlannedObject>,
}

impl UploadPlan {
    pub fn uri(&self, bucket: &str) -> String {
        format!("s3://{}/{}", bucket, self.prefix)
    }
}

impl fmt::Display for UploadPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} objects)", self.prefix, self.objects.len())
    }
}

/// Process name for a curation file: its stem with `curation` -> `curated` and `_` -> `-`.
pub fn process_name(curation_file: &Path) -> String {
    curation_file
        .file_stem()
        .map(|s| s.to_string_lossy())
        .unwrap_or_default()
        .replace("curation", "curated")
        .replace('_', "-")
}

/// Top-level folder of a repository-relative path, if the path has one.
fn asset_folder(path: &Path) -> Option<String> {
    let mut components = path.components();
    let first = match components.next()? {
        Component::Normal(name) => name.to_string_lossy().into_owned(),
        _ => return None,
    };
    // A file directly at the root has no asset folder
    components.next()?;
    Some(first)
}

fn parse_asset_name(folder: &str) -> UploadResult<RawDataName> {
    RawDataName::parse(folder).ok_or_else(|| UploadError::InvalidAssetName(folder.to_string()))
}

/// Plan the upload of a single curation file.
///
/// `curation_file` is relative to the repository root. The file is stored under
/// `<prefix>/<curation_file>` next to `<prefix>/data_description.json`.
pub fn plan_curation_file(
    repo_root: &Path,
    curation_file: &Path,
    author: &str,
    creation_time: DateTime<Utc>,
    investigators: &InvestigatorMap,
) -> UploadResult<UploadPlan> {
    let folder = asset_folder(curation_file)
        .ok_or_else(|| UploadError::InvalidAssetName(curation_file.display().to_string()))?;
    let raw = parse_asset_name(&folder)?;
    let platform = raw
        .platform()
        .ok_or_else(|| UploadError::UnknownPlatform(raw.platform_abbreviation.clone()))?;
    let process_name = process_name(curation_file);

    let description = DerivedDataDescription::new(DerivedDataInput {
        input_data_name: folder.clone(),
        process_name: process_name.clone(),
        creation_time,
        platform,
        subject_id: raw.subject_id.clone(),
        modality: vec![Modality::Ecephys],
        institution: Organization::Aind,
        funders: vec![Organization::Ai],
        investigators: vec![Investigator::named(investigators.resolve(author))],
    });

    let prefix = format!("{}_{}", folder, build_data_name(&process_name, &creation_time));
    let objects = vec![
        PlannedObject {
            key: object_key(&prefix, curation_file),
            source: ObjectSource::File(repo_root.join(curation_file)),
        },
        description_object(&prefix, &description)?,
    ];

    Ok(UploadPlan {
        input_data_name: folder,
        prefix,
        subject_id: raw.subject_id,
        platform,
        style: RegistrationStyle::Derived,
        description,
        objects,
    })
}

/// Plan the upload of a whole asset folder, as the legacy workflow did.
///
/// Every file in the folder is stored relative to the folder itself.
pub async fn plan_folder(
    repo_root: &Path,
    folder: &str,
    creation_time: DateTime<Utc>,
) -> UploadResult<UploadPlan> {
    let raw = parse_asset_name(folder)?;

    let description = DerivedDataDescription::new(DerivedDataInput {
        input_data_name: folder.to_string(),
        process_name: FOLDER_PROCESS_NAME.to_string(),
        creation_time,
        platform: Platform::Ecephys,
        subject_id: raw.subject_id.clone(),
        modality: vec![Modality::Ecephys],
        institution: Organization::Aind,
        funders: vec![Organization::Aind],
        investigators: Vec::new(),
    });

    let prefix = format!(
        "{}_{}",
        folder,
        build_data_name(FOLDER_PROCESS_NAME, &creation_time)
    );

    let folder_path = repo_root.join(folder);
    let mut objects: Vec<PlannedObject> = list_files(&folder_path)
        .await?
        .into_iter()
        .filter(|rel| rel.as_os_str() != description.default_filename())
        .map(|rel| PlannedObject {
            key: object_key(&prefix, &rel),
            source: ObjectSource::File(folder_path.join(rel)),
        })
        .collect();
    objects.push(description_object(&prefix, &description)?);

    Ok(UploadPlan {
        input_data_name: folder.to_string(),
        prefix,
        subject_id: raw.subject_id,
        platform: Platform::Ecephys,
        style: RegistrationStyle::Folder,
        description,
        objects,
    })
}

fn description_object(
    prefix: &str,
    description: &DerivedDataDescription,
) -> UploadResult<PlannedObject> {
    Ok(PlannedObject {
        key: format!("{}/{}", prefix, description.default_filename()),
        source: ObjectSource::Inline(Bytes::from(description.to_json_bytes()?)),
    })
}

/// Object keys always use `/`, whatever the host separator.
fn object_key(prefix: &str, rel: &Path) -> String {
    let rel: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    format!("{}/{}", prefix, rel.join("/"))
}
