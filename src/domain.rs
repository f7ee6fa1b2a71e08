use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::DicomError;

pub const HEALTHCARE_API_ROOT: &str = "https://healthcare.googleapis.com/v1";

static RESOURCE_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^projects/(?P<project_id>[^/]+)/locations/(?P<location>[^/]+)/datasets/(?P<dataset>[^/]+)/dicomStores/(?P<datastore>[^/]+)",
    )
    .expect("resource path pattern compiles")
});

/// A parsed DICOM store location and the DICOMweb base URL derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreReference {
    project_id: String,
    location: String,
    dataset: String,
    datastore: String,
    base_url: String,
}

impl StoreReference {
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn datastore(&self) -> &str {
        &self.datastore
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Same store, addressed through another API root (emulators, local test servers).
    pub fn with_endpoint(mut self, api_root: &str) -> Self {
        self.base_url = Self::build_base_url(
            api_root,
            &self.project_id,
            &self.location,
            &self.dataset,
            &self.datastore,
        );
        self
    }

    fn build_base_url(
        api_root: &str,
        project_id: &str,
        location: &str,
        dataset: &str,
        datastore: &str,
    ) -> String {
        format!(
            "{}/projects/{project_id}/locations/{location}/datasets/{dataset}/dicomStores/{datastore}",
            api_root.trim_end_matches('/')
        )
    }
}

impl fmt::Display for StoreReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "projects/{}/locations/{}/datasets/{}/dicomStores/{}",
            self.project_id, self.location, self.dataset, self.datastore
        )
    }
}

impl FromStr for StoreReference {
    type Err = DicomError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let path = trimmed
            .strip_prefix(HEALTHCARE_API_ROOT)
            .map(|rest| rest.trim_start_matches('/'))
            .unwrap_or(trimmed);
        let captures = RESOURCE_PATH
            .captures(path)
            .ok_or_else(|| DicomError::InvalidResourcePath(value.to_string()))?;

        let project_id = captures["project_id"].to_string();
        let location = captures["location"].to_string();
        let dataset = captures["dataset"].to_string();
        let datastore = captures["datastore"].to_string();
        let base_url = Self::build_base_url(
            HEALTHCARE_API_ROOT,
            &project_id,
            &location,
            &dataset,
            &datastore,
        );
        Ok(Self {
            project_id,
            location,
            dataset,
            datastore,
            base_url,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StudyId(String);

impl StudyId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StudyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for StudyId {
    type Err = DicomError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        if !is_path_component(normalized) {
            return Err(DicomError::InvalidStudyId(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesDescriptor {
    pub series_instance_uid: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceDescriptor {
    pub sop_instance_uid: String,
}

/// UIDs end up as directory and file names, so they must stay one path segment.
pub(crate) fn is_path_component(value: &str) -> bool {
    !value.is_empty()
        && value != "."
        && value != ".."
        && !value.contains(['/', '\\'])
        && !value.contains('\0')
}
