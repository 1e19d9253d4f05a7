//! Derived data description schema.
//!
//! Uploaded assets carry a `data_description.json` describing where the derived
//! data came from. Asset folders follow the raw-data naming rule
//! `<platform>_<subject>_<YYYY-MM-DD>_<HH-MM-SS>`.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

pub const SCHEMA_VERSION: &str = "1.0.0";
pub const DESCRIBED_BY: &str = "https://raw.githubusercontent.com/AllenNeuralDynamics/aind-data-schema/main/src/aind_data_schema/core/data_description.py";
pub const DEFAULT_FILENAME: &str = "data_description.json";
const DATETIME_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

static RAW_NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<platform>.+?)_(?P<subject_id>.+?)_(?P<date>\d{4}-\d{2}-\d{2})_(?P<time>\d{2}-\d{2}-\d{2})$",
    )
    .unwrap()
});

/// Acquisition platforms, keyed by the abbreviation used in asset folder names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Behavior,
    Confocal,
    Ecephys,
    ExaSpim,
    Fip,
    Hcr,
    Hsfp,
    Isi,
    Merfish,
    Mri,
    MultiplaneOphys,
    SinglePlaneOphys,
    Slap2,
    SmartSpim,
}

impl Platform {
    pub const ALL: [Platform; 14] = [
        Platform::Behavior,
        Platform::Confocal,
        Platform::Ecephys,
        Platform::ExaSpim,
        Platform::Fip,
        Platform::Hcr,
        Platform::Hsfp,
        Platform::Isi,
        Platform::Merfish,
        Platform::Mri,
        Platform::MultiplaneOphys,
        Platform::SinglePlaneOphys,
        Platform::Slap2,
        Platform::SmartSpim,
    ];

    pub fn abbreviation(&self) -> &'static str {
        match self {
            Platform::Behavior => "behavior",
            Platform::Confocal => "confocal",
            Platform::Ecephys => "ecephys",
            Platform::ExaSpim => "exaSPIM",
            Platform::Fip => "FIP",
            Platform::Hcr => "HCR",
            Platform::Hsfp => "HSFP",
            Platform::Isi => "ISI",
            Platform::Merfish => "merfish",
            Platform::Mri => "MRI",
            Platform::MultiplaneOphys => "multiplane-ophys",
            Platform::SinglePlaneOphys => "single-plane-ophys",
            Platform::Slap2 => "SLAP2",
            Platform::SmartSpim => "SmartSPIM",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Platform::Behavior => "Behavior platform",
            Platform::Confocal => "Confocal microscopy platform",
            Platform::Ecephys => "Electrophysiology platform",
            Platform::ExaSpim => "ExaSPIM platform",
            Platform::Fip => "Frame-projected independent-fiber photometry platform",
            Platform::Hcr => "Hybridization chain reaction platform",
            Platform::Hsfp => "Hyperspectral fiber photometry platform",
            Platform::Isi => "Intrinsic signal imaging platform",
            Platform::Merfish => "Multiplexed error-robust fluorescence in situ hybridization platform",
            Platform::Mri => "Magnetic resonance imaging platform",
            Platform::MultiplaneOphys => "Multiplane optical physiology platform",
            Platform::SinglePlaneOphys => "Single-plane optical physiology platform",
            Platform::Slap2 => "SLAP2 platform",
            Platform::SmartSpim => "SmartSPIM platform",
        }
    }

    pub fn from_abbreviation(abbreviation: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.abbreviation() == abbreviation)
    }

    fn to_ref(self) -> NamedRef {
        NamedRef {
            name: self.name().to_string(),
            abbreviation: Some(self.abbreviation().to_string()),
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.abbreviation())
    }
}

/// Data modalities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modality {
    Ecephys,
}

impl Modality {
    pub fn name(&self) -> &'static str {
        match self {
            Modality::Ecephys => "Extracellular electrophysiology",
        }
    }

    /// Upper-case key of the modality, as used in legacy registration metadata.
    pub fn key(&self) -> &'static str {
        match self {
            Modality::Ecephys => "ECEPHYS",
        }
    }

    pub fn abbreviation(&self) -> &'static str {
        match self {
            Modality::Ecephys => "ecephys",
        }
    }
}

/// Organizations that appear as institution or funder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Organization {
    /// Allen Institute for Neural Dynamics.
    Aind,
    /// Allen Institute.
    Ai,
}

impl Organization {
    fn to_ref(self) -> OrganizationRef {
        let (name, abbreviation, ror) = match self {
            Organization::Aind => ("Allen Institute for Neural Dynamics", "AIND", "04szwah67"),
            Organization::Ai => ("Allen Institute", "AI", "03cpe7c52"),
        };
        OrganizationRef {
            name: name.to_string(),
            abbreviation: Some(abbreviation.to_string()),
            registry: Some(NamedRef {
                name: "Research Organization Registry".to_string(),
                abbreviation: Some("ROR".to_string()),
            }),
            registry_identifier: Some(ror.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataLevel {
    Raw,
    Derived,
}

impl DataLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataLevel::Raw => "raw",
            DataLevel::Derived => "derived",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedRef {
    pub name: String,
    pub abbreviation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationRef {
    pub name: String,
    pub abbreviation: Option<String>,
    pub registry: Option<NamedRef>,
    pub registry_identifier: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Funding {
    pub funder: OrganizationRef,
    pub grant_number: Option<String>,
    pub fundee: Option<String>,
}

/// A person, identified by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Investigator {
    pub name: String,
    pub abbreviation: Option<String>,
    pub registry: Option<NamedRef>,
    pub registry_identifier: Option<String>,
}

impl Investigator {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            abbreviation: None,
            registry: None,
            registry_identifier: None,
        }
    }
}

/// Components of a raw asset name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDataName {
    pub platform_abbreviation: String,
    pub subject_id: String,
    pub date: String,
    pub time: String,
}

impl RawDataName {
    pub fn parse(name: &str) -> Option<Self> {
        let caps = RAW_NAME_REGEX.captures(name)?;
        Some(Self {
            platform_abbreviation: caps["platform"].to_string(),
            subject_id: caps["subject_id"].to_string(),
            date: caps["date"].to_string(),
            time: caps["time"].to_string(),
        })
    }

    pub fn platform(&self) -> Option<Platform> {
        Platform::from_abbreviation(&self.platform_abbreviation)
    }
}

/// Build a data name from a label and a creation time: `<label>_<YYYY-MM-DD_HH-MM-SS>`.
pub fn build_data_name(label: &str, creation_time: &DateTime<Utc>) -> String {
    format!("{}_{}", label, creation_time.format(DATETIME_FORMAT))
}

/// Creation times are written as naive ISO 8601 (`2024-03-01T10:15:00`), always in UTC.
mod naive_utc {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

    pub fn serialize<S: Serializer>(time: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&time.naive_utc().format(FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(raw.trim_end_matches('Z'), "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom)
    }
}

/// Inputs for a derived data description.
#[derive(Debug, Clone)]
pub struct DerivedDataInput {
    pub input_data_name: String,
    pub process_name: String,
    pub creation_time: DateTime<Utc>,
    pub platform: Platform,
    pub subject_id: String,
    pub modality: Vec<Modality>,
    pub institution: Organization,
    pub funders: Vec<Organization>,
    pub investigators: Vec<Investigator>,
}

/// The `data_description.json` document of a derived asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedDataDescription {
    #[serde(rename = "describedBy")]
    pub described_by: String,
    pub schema_version: String,
    pub license: String,
    pub platform: NamedRef,
    pub subject_id: String,
    #[serde(with = "naive_utc")]
    pub creation_time: DateTime<Utc>,
    pub label: Option<String>,
    pub name: String,
    pub institution: OrganizationRef,
    pub funding_source: Vec<Funding>,
    pub data_level: DataLevel,
    pub group: Option<String>,
    pub investigators: Vec<Investigator>,
    pub project_name: Option<String>,
    pub restrictions: Option<String>,
    pub modality: Vec<NamedRef>,
    pub related_data: Vec<serde_json::Value>,
    pub data_summary: Option<String>,
    pub input_data_name: String,
    pub process_name: String,
}

impl DerivedDataDescription {
    pub fn new(input: DerivedDataInput) -> Self {
        let name = build_data_name(
            &format!("{}_{}", input.input_data_name, input.process_name),
            &input.creation_time,
        );
        Self {
            described_by: DESCRIBED_BY.to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            license: "CC-BY-4.0".to_string(),
            platform: input.platform.to_ref(),
            subject_id: input.subject_id,
            creation_time: input.creation_time,
            label: None,
            name,
            institution: input.institution.to_ref(),
            funding_source: input
                .funders
                .into_iter()
                .map(|funder| Funding {
                    funder: funder.to_ref(),
                    grant_number: None,
                    fundee: None,
                })
                .collect(),
            data_level: DataLevel::Derived,
            group: None,
            investigators: input.investigators,
            project_name: None,
            restrictions: None,
            modality: input
                .modality
                .into_iter()
                .map(|m| NamedRef {
                    name: m.name().to_string(),
                    abbreviation: Some(m.abbreviation().to_string()),
                })
                .collect(),
            related_data: Vec::new(),
            data_summary: None,
            input_data_name: input.input_data_name,
            process_name: input.process_name,
        }
    }

    pub fn default_filename(&self) -> &'static str {
        DEFAULT_FILENAME
    }

    /// Serialize with three-space indentation.
    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"   ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
        self.serialize(&mut serializer)?;
        Ok(out)
    }
}
