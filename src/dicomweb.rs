//! DICOMweb endpoint layout and DICOM JSON metadata extraction.

use serde_json::Value;

use crate::domain::{InstanceDescriptor, SeriesDescriptor, StoreReference, StudyId, is_path_component};
use crate::error::DicomError;

pub const SERIES_INSTANCE_UID: &str = "0020000E";
pub const SOP_INSTANCE_UID: &str = "00080018";
pub const ACCEPT_DICOM: &str = "application/dicom; transfer-syntax=*";

pub fn series_list_url(store: &StoreReference, study: &StudyId) -> String {
    format!(
        "{}/dicomWeb/studies/{}/series",
        store.base_url(),
        study.as_str()
    )
}

pub fn instance_list_url(study_url: &str, series: &SeriesDescriptor) -> String {
    format!("{study_url}/{}/instances", series.series_instance_uid)
}

pub fn instance_url(series_url: &str, instance: &InstanceDescriptor) -> String {
    format!("{series_url}/{}", instance.sop_instance_uid)
}

/// Records are kept as raw JSON so that a malformed record only fails once
/// traversal reaches it; everything before it is still written.
pub fn parse_instance_records(body: &[u8]) -> Result<Vec<Value>, DicomError> {
    parse_records(body, "instance")
}

pub fn instance_from_record(record: &Value, index: usize) -> Result<InstanceDescriptor, DicomError> {
    first_uid(record, SOP_INSTANCE_UID, "instance", index)
        .map(|sop_instance_uid| InstanceDescriptor { sop_instance_uid })
}

pub fn series_from_record(record: &Value, index: usize) -> Result<SeriesDescriptor, DicomError> {
    first_uid(record, SERIES_INSTANCE_UID, "series", index)
        .map(|series_instance_uid| SeriesDescriptor {
            series_instance_uid,
        })
}

pub fn parse_series_records(body: &[u8]) -> Result<Vec<Value>, DicomError> {
    parse_records(body, "series")
}

fn parse_records(body: &[u8], level: &str) -> Result<Vec<Value>, DicomError> {
    let value: Value = serde_json::from_slice(body).map_err(|err| {
        DicomError::MalformedMetadata(format!("{level} listing is not valid JSON: {err}"))
    })?;
    match value {
        Value::Array(records) => Ok(records),
        _ => Err(DicomError::MalformedMetadata(format!(
            "{level} listing is not a JSON array"
        ))),
    }
}

fn first_uid(record: &Value, tag: &str, level: &str, index: usize) -> Result<String, DicomError> {
    let uid = record
        .get(tag)
        .and_then(|element| element.get("Value"))
        .and_then(|values| values.get(0))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            DicomError::MalformedMetadata(format!(
                "{level} record {index} has no value for tag {tag}"
            ))
        })?;
    if !is_path_component(uid) {
        return Err(DicomError::MalformedMetadata(format!(
            "{level} record {index} has unusable UID {uid:?} in tag {tag}"
        )));
    }
    Ok(uid.to_string())
}
