use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::Builder;

use crate::domain::{InstanceDescriptor, SeriesDescriptor, StudyId};
use crate::error::DicomError;

/// On-disk layout of one study: `{root}/{study}/{series}/{sop}.dcm`.
#[derive(Debug, Clone)]
pub struct StudyLayout {
    output_root: Utf8PathBuf,
    study: StudyId,
}

impl StudyLayout {
    pub fn new(output_root: impl Into<Utf8PathBuf>, study: StudyId) -> Self {
        Self {
            output_root: output_root.into(),
            study,
        }
    }

    pub fn study_dir(&self) -> Utf8PathBuf {
        self.output_root.join(self.study.as_str())
    }

    pub fn series_dir(&self, series: &SeriesDescriptor) -> Utf8PathBuf {
        self.study_dir().join(&series.series_instance_uid)
    }

    pub fn instance_path(
        &self,
        series: &SeriesDescriptor,
        instance: &InstanceDescriptor,
    ) -> Utf8PathBuf {
        self.series_dir(series)
            .join(format!("{}.dcm", instance.sop_instance_uid))
    }
}

pub trait FileSink: Send + Sync {
    /// Creates `dir` and its parents; succeeds if it already exists.
    fn ensure_dir(&self, dir: &Utf8Path) -> Result<(), DicomError>;

    /// Writes the whole payload to `path`, replacing any existing file.
    fn write(&self, path: &Utf8Path, bytes: &[u8]) -> Result<(), DicomError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FsFileSink;

impl FileSink for FsFileSink {
    fn ensure_dir(&self, dir: &Utf8Path) -> Result<(), DicomError> {
        fs::create_dir_all(dir.as_std_path())
            .map_err(|err| DicomError::Filesystem(format!("create {dir}: {err}")))
    }

    fn write(&self, path: &Utf8Path, bytes: &[u8]) -> Result<(), DicomError> {
        let parent = path
            .parent()
            .ok_or_else(|| DicomError::Filesystem(format!("invalid destination path {path}")))?;
        self.ensure_dir(parent)?;
        let mut temp = Builder::new()
            .prefix(".dicom-pull")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| DicomError::Filesystem(format!("create temp file in {parent}: {err}")))?;
        temp.write_all(bytes)
            .map_err(|err| DicomError::Filesystem(format!("write {path}: {err}")))?;
        temp.persist(path.as_std_path())
            .map_err(|err| DicomError::Filesystem(format!("persist {path}: {}", err.error)))?;
        Ok(())
    }
}
