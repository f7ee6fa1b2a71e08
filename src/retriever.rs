use camino::Utf8PathBuf;
use serde::Serialize;

use crate::auth::TokenProvider;
use crate::dicomweb;
use crate::domain::{SeriesDescriptor, StoreReference, StudyId};
use crate::error::DicomError;
use crate::http::{GetRequest, HttpFetcher};
use crate::progress::{CancelFlag, ProgressSink};
use crate::store::{FileSink, StudyLayout};

#[derive(Debug, Clone, Serialize)]
pub struct DownloadReport {
    pub study_id: String,
    pub study_dir: String,
    pub series_count: usize,
    pub instances_written: usize,
    pub series: Vec<SeriesReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SeriesReport {
    pub series_instance_uid: String,
    pub instances_written: usize,
}

/// Walks study → series → instances sequentially and stops at the first error.
/// Files written before a failure stay on disk.
pub struct DicomRetriever<T: TokenProvider, H: HttpFetcher, F: FileSink> {
    store: StoreReference,
    tokens: T,
    http: H,
    files: F,
    cancel: Option<CancelFlag>,
}

impl<T: TokenProvider, H: HttpFetcher, F: FileSink> DicomRetriever<T, H, F> {
    pub fn new(store: StoreReference, tokens: T, http: H, files: F) -> Self {
        Self {
            store,
            tokens,
            http,
            files,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn http(&self) -> &H {
        &self.http
    }

    pub fn download(
        &self,
        study_id: &str,
        output_root: impl Into<Utf8PathBuf>,
        sink: &dyn ProgressSink,
    ) -> Result<DownloadReport, DicomError> {
        match self.retrieve(study_id, output_root.into(), sink) {
            Ok(report) => {
                sink.finished(
                    true,
                    &format!(
                        "DICOM download completed successfully: {} instances in {} series",
                        report.instances_written, report.series_count
                    ),
                );
                Ok(report)
            }
            Err(err) => {
                tracing::debug!(error = %err, "download failed");
                sink.finished(false, &err.to_string());
                Err(err)
            }
        }
    }

    fn retrieve(
        &self,
        study_id: &str,
        output_root: Utf8PathBuf,
        sink: &dyn ProgressSink,
    ) -> Result<DownloadReport, DicomError> {
        let study: StudyId = study_id.parse()?;
        let token = self.tokens.token()?;
        let layout = StudyLayout::new(output_root, study.clone());

        let study_url = dicomweb::series_list_url(&self.store, &study);
        let body = self.fetch_listing(&study_url, &token)?;
        let records = dicomweb::parse_series_records(&body)?;
        let total = records.len();
        tracing::info!(study = %study, series = total, "listed series");
        sink.set_total(total);

        self.files.ensure_dir(&layout.study_dir())?;

        let mut series_reports = Vec::with_capacity(total);
        for (index, record) in records.iter().enumerate() {
            self.check_cancelled()?;
            let series = dicomweb::series_from_record(record, index)?;
            self.files.ensure_dir(&layout.series_dir(&series))?;
            let written = self.retrieve_series(&layout, &study_url, &series, &token, sink)?;
            tracing::info!(
                series = %series.series_instance_uid,
                instances = written,
                "series complete"
            );
            series_reports.push(SeriesReport {
                series_instance_uid: series.series_instance_uid,
                instances_written: written,
            });
            sink.advance_to(index + 1);
        }

        Ok(DownloadReport {
            study_id: study.to_string(),
            study_dir: layout.study_dir().to_string(),
            series_count: total,
            instances_written: series_reports.iter().map(|s| s.instances_written).sum(),
            series: series_reports,
        })
    }

    fn retrieve_series(
        &self,
        layout: &StudyLayout,
        study_url: &str,
        series: &SeriesDescriptor,
        token: &str,
        sink: &dyn ProgressSink,
    ) -> Result<usize, DicomError> {
        let series_url = dicomweb::instance_list_url(study_url, series);
        let body = self.fetch_listing(&series_url, token)?;
        let records = dicomweb::parse_instance_records(&body)?;

        let mut count = 0usize;
        for (index, record) in records.iter().enumerate() {
            self.check_cancelled()?;
            let instance = dicomweb::instance_from_record(record, index)?;
            let response = self.http.get(&GetRequest {
                url: &dicomweb::instance_url(&series_url, &instance),
                bearer_token: token,
                accept: Some(dicomweb::ACCEPT_DICOM),
            })?;
            if response.status != 200 {
                return Err(DicomError::InstanceFetchFailed {
                    sop_instance_uid: instance.sop_instance_uid,
                    status: response.status,
                });
            }
            let path = layout.instance_path(series, &instance);
            self.files.write(&path, &response.body)?;
            count += 1;
            tracing::debug!(path = %path, bytes = response.body.len(), "instance written");
            sink.log(&format!("{count}: {}", instance.sop_instance_uid));
        }
        Ok(count)
    }

    fn fetch_listing(&self, url: &str, token: &str) -> Result<Vec<u8>, DicomError> {
        let response = self.http.get(&GetRequest {
            url,
            bearer_token: token,
            accept: None,
        })?;
        if !response.is_success() {
            return Err(DicomError::NetworkStatus {
                status: response.status,
                url: url.to_string(),
            });
        }
        Ok(response.body)
    }

    fn check_cancelled(&self) -> Result<(), DicomError> {
        match &self.cancel {
            Some(flag) if flag.is_cancelled() => Err(DicomError::Cancelled),
            _ => Ok(()),
        }
    }
}
