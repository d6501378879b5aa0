use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::browser::{self, BrowserError, ExtractionOutcome, FailureReason};
use crate::config::RtmConfig;
use crate::datasource::{DataSourceError, TrackerClient};
use crate::error::ConfigError;
use crate::model::Dataset;
use crate::notify::{Notifier, NotifyError};
use crate::publish::{ConfluenceClient, PublishError, PublishedPage, WikiPublisher};
use crate::report::{RenderError, RenderedReport, ReportRenderer};

pub const DATA_FILENAME: &str = "rtm_data.json";

/// Exit codes, one per failure class, so an external scheduler can
/// distinguish failures without parsing output.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const CONFIG: i32 = 2;
    pub const MISSING_INPUT: i32 = 3;
    pub const REMOTE_QUERY: i32 = 4;
    pub const MALFORMED_RESPONSE: i32 = 5;
    pub const EMPTY_DATASET: i32 = 6;
    pub const RENDER: i32 = 7;
    pub const PUBLISH: i32 = 8;
    pub const ATTACHMENT: i32 = 9;
    pub const SEND: i32 = 10;
    pub const EXTRACTION_LOGIN: i32 = 11;
    pub const EXPORT_NOT_FOUND: i32 = 12;
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("missing input file: {0}")]
    MissingInput(PathBuf),
    #[error("failed to parse dataset {path}: {detail}")]
    DatasetRead { path: PathBuf, detail: String },
    #[error("local io on {path}: {detail}")]
    LocalIo { path: PathBuf, detail: String },
    #[error("data source: {0}")]
    DataSource(#[from] DataSourceError),
    #[error("render: {0}")]
    Render(#[from] RenderError),
    #[error("publish: {0}")]
    Publish(#[from] PublishError),
    #[error("notify: {0}")]
    Notify(#[from] NotifyError),
    #[error("browser automation: {0}")]
    Browser(#[from] BrowserError),
    #[error("extraction failed: {reason}{}", snapshot_suffix(.snapshot))]
    Extraction {
        reason: FailureReason,
        snapshot: Option<PathBuf>,
    },
}

fn snapshot_suffix(snapshot: &Option<PathBuf>) -> String {
    match snapshot {
        Some(path) => format!(" (snapshot: {})", path.display()),
        None => String::new(),
    }
}

impl PipelineError {
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Config(_) => exit_code::CONFIG,
            PipelineError::MissingInput(_) | PipelineError::LocalIo { .. } => {
                exit_code::MISSING_INPUT
            }
            PipelineError::DatasetRead { .. } => exit_code::MALFORMED_RESPONSE,
            PipelineError::DataSource(err) => match err {
                DataSourceError::Malformed { .. } => exit_code::MALFORMED_RESPONSE,
                DataSourceError::EmptyDataset { .. } => exit_code::EMPTY_DATASET,
                _ => exit_code::REMOTE_QUERY,
            },
            PipelineError::Render(err) => match err {
                RenderError::EmptyDataset => exit_code::EMPTY_DATASET,
                _ => exit_code::RENDER,
            },
            PipelineError::Publish(err) => match err {
                PublishError::Attachment { .. } => exit_code::ATTACHMENT,
                _ => exit_code::PUBLISH,
            },
            PipelineError::Notify(err) => match err {
                NotifyError::MissingArtifact(_) => exit_code::MISSING_INPUT,
                _ => exit_code::SEND,
            },
            PipelineError::Browser(_) => exit_code::EXTRACTION_LOGIN,
            PipelineError::Extraction { reason, .. } => {
                if reason.is_login_failure() {
                    exit_code::EXTRACTION_LOGIN
                } else {
                    exit_code::EXPORT_NOT_FOUND
                }
            }
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Summary of one completed run, for the CLI to render. The browser-export
/// variant carries no row counts; only the downloaded artifact exists.
#[derive(Debug, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PipelineReport {
    Rest {
        rows: usize,
        summary: String,
        html_path: PathBuf,
        pdf_path: PathBuf,
        page_url: Option<String>,
        page_version: u32,
    },
    Extraction {
        artifact: PathBuf,
        page_url: Option<String>,
        page_version: u32,
    },
}

/// Sequences fetch → render → publish → notify, each stage at most once,
/// stopping on the first unrecoverable failure. Extraction mode substitutes
/// the browser agent for the REST fetch.
pub struct Pipeline {
    config: RtmConfig,
}

impl Pipeline {
    pub fn new(config: RtmConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RtmConfig {
        &self.config
    }

    /// Full run. With extraction enabled the browser agent substitutes for
    /// fetch + render and the exported PDF is the only artifact downstream.
    pub async fn run(&self) -> PipelineResult<PipelineReport> {
        if self.config.extraction.enabled {
            let artifact = self.extract().await?;
            let page = self.publish_artifact(&artifact).await?;
            self.notify(&[artifact.as_path()], page.url.as_deref())
                .await?;
            return Ok(PipelineReport::Extraction {
                artifact,
                page_url: page.url,
                page_version: page.version,
            });
        }

        let dataset = self.fetch().await?;
        let rendered = self.render(&dataset)?;
        let page = self.publish(&rendered).await?;
        self.notify(
            &[rendered.html_path.as_path(), rendered.pdf_path.as_path()],
            page.url.as_deref(),
        )
        .await?;
        Ok(PipelineReport::Rest {
            rows: rendered.row_count,
            summary: rendered.summary.to_string(),
            html_path: rendered.html_path,
            pdf_path: rendered.pdf_path,
            page_url: page.url,
            page_version: page.version,
        })
    }

    /// Fetch the dataset over REST and persist the normalized snapshot.
    pub async fn fetch(&self) -> PipelineResult<Dataset> {
        let credentials = self.config.tracker_credentials()?;
        let client = TrackerClient::new(&self.config.tracker, credentials)?;
        let dataset = client
            .fetch(
                &self.config.tracker.project_key,
                &self.config.tracker.execution_key,
            )
            .await?;

        let data_dir = self.config.data_dir();
        let path = data_dir.join(DATA_FILENAME);
        let json = dataset
            .to_json_pretty()
            .map_err(|err| PipelineError::LocalIo {
                path: path.clone(),
                detail: err.to_string(),
            })?;
        std::fs::create_dir_all(&data_dir)
            .and_then(|_| std::fs::write(&path, json))
            .map_err(|err| PipelineError::LocalIo {
                path: path.clone(),
                detail: err.to_string(),
            })?;
        info!(path = %path.display(), "normalized dataset saved");
        Ok(dataset)
    }

    /// Load the last-fetched snapshot from disk, for render-only invocations.
    pub fn load_dataset(&self) -> PipelineResult<Dataset> {
        let path = self.config.data_dir().join(DATA_FILENAME);
        if !path.exists() {
            return Err(PipelineError::MissingInput(path));
        }
        let raw = std::fs::read_to_string(&path).map_err(|err| PipelineError::LocalIo {
            path: path.clone(),
            detail: err.to_string(),
        })?;
        Dataset::from_json_str(&raw).map_err(|err| PipelineError::DatasetRead {
            path,
            detail: err.to_string(),
        })
    }

    pub fn render(&self, dataset: &Dataset) -> PipelineResult<RenderedReport> {
        let renderer = ReportRenderer::new(&self.config.paths);
        Ok(renderer.render(dataset)?)
    }

    pub async fn publish(&self, rendered: &RenderedReport) -> PipelineResult<PublishedPage> {
        let body = read_artifact(&rendered.html_path)?;
        let attachments = vec![
            (
                crate::report::HTML_FILENAME.to_string(),
                read_artifact_bytes(&rendered.html_path)?,
            ),
            (
                crate::report::PDF_FILENAME.to_string(),
                read_artifact_bytes(&rendered.pdf_path)?,
            ),
        ];
        self.publish_with(&body, &attachments).await
    }

    /// Publish a browser-exported PDF: the page body is a short pointer, the
    /// attachment carries the report.
    pub async fn publish_artifact(&self, artifact: &std::path::Path) -> PipelineResult<PublishedPage> {
        let filename = artifact
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| crate::report::PDF_FILENAME.to_string());
        let body = format!(
            "<p>The latest RTM test execution report is attached as <b>{filename}</b>.</p>"
        );
        let attachments = vec![(filename, read_artifact_bytes(artifact)?)];
        self.publish_with(&body, &attachments).await
    }

    async fn publish_with(
        &self,
        body: &str,
        attachments: &[(String, Vec<u8>)],
    ) -> PipelineResult<PublishedPage> {
        let credentials = self.config.wiki_credentials()?;
        let api = ConfluenceClient::new(&self.config.wiki, credentials)?;
        let publisher = WikiPublisher::new(
            api,
            self.config.wiki.space_key.clone(),
            self.config.wiki.page_title.clone(),
        );
        let page = publisher.publish(body, attachments).await?;
        info!(page_id = %page.id, version = page.version, "report published");
        Ok(page)
    }

    pub async fn notify(
        &self,
        attachments: &[&std::path::Path],
        page_url: Option<&str>,
    ) -> PipelineResult<()> {
        let credentials = self.config.mail_credentials()?;
        let notifier = Notifier::new(self.config.mail.clone(), credentials);
        let message = notifier.compose(page_url, attachments)?;
        notifier.send(message).await?;
        info!("stakeholders notified");
        Ok(())
    }

    /// Browser-driven extraction, substituting for fetch + render when the
    /// tracker exposes no export API. Terminal failures carry the snapshot.
    pub async fn extract(&self) -> PipelineResult<PathBuf> {
        match browser::extract_report(&self.config).await? {
            ExtractionOutcome::Succeeded { artifact } => Ok(artifact),
            ExtractionOutcome::Failed { reason, snapshot } => {
                warn!(reason = %reason, "extraction terminated in failure");
                Err(PipelineError::Extraction { reason, snapshot })
            }
        }
    }
}

fn read_artifact(path: &std::path::Path) -> PipelineResult<String> {
    if !path.exists() {
        return Err(PipelineError::MissingInput(path.to_path_buf()));
    }
    std::fs::read_to_string(path).map_err(|err| PipelineError::LocalIo {
        path: path.to_path_buf(),
        detail: err.to_string(),
    })
}

fn read_artifact_bytes(path: &std::path::Path) -> PipelineResult<Vec<u8>> {
    if !path.exists() {
        return Err(PipelineError::MissingInput(path.to_path_buf()));
    }
    std::fs::read(path).map_err(|err| PipelineError::LocalIo {
        path: path.to_path_buf(),
        detail: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct_per_failure_class() {
        let codes = [
            exit_code::CONFIG,
            exit_code::MISSING_INPUT,
            exit_code::REMOTE_QUERY,
            exit_code::MALFORMED_RESPONSE,
            exit_code::EMPTY_DATASET,
            exit_code::RENDER,
            exit_code::PUBLISH,
            exit_code::ATTACHMENT,
            exit_code::SEND,
            exit_code::EXTRACTION_LOGIN,
            exit_code::EXPORT_NOT_FOUND,
        ];
        let mut sorted = codes.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), codes.len());
    }

    #[test]
    fn empty_dataset_maps_to_its_own_code() {
        let err = PipelineError::DataSource(DataSourceError::EmptyDataset {
            execution_key: "RD-4".to_string(),
        });
        assert_eq!(err.exit_code(), exit_code::EMPTY_DATASET);
        let err = PipelineError::Render(RenderError::EmptyDataset);
        assert_eq!(err.exit_code(), exit_code::EMPTY_DATASET);
    }

    #[test]
    fn extraction_reasons_split_login_from_export_codes() {
        let login = PipelineError::Extraction {
            reason: FailureReason::AuthElementsMissing,
            snapshot: None,
        };
        assert_eq!(login.exit_code(), exit_code::EXTRACTION_LOGIN);
        let export = PipelineError::Extraction {
            reason: FailureReason::ExportNotFound,
            snapshot: Some(PathBuf::from("report/export_not_found_1.png")),
        };
        assert_eq!(export.exit_code(), exit_code::EXPORT_NOT_FOUND);
    }

    #[test]
    fn missing_artifact_maps_to_missing_input_code() {
        let err = PipelineError::Notify(NotifyError::MissingArtifact(PathBuf::from(
            "report/rtm_report.pdf",
        )));
        assert_eq!(err.exit_code(), exit_code::MISSING_INPUT);
    }

    #[test]
    fn local_io_failures_are_not_reported_as_malformed_payloads() {
        let err = PipelineError::LocalIo {
            path: PathBuf::from("data/rtm_data.json"),
            detail: "Permission denied (os error 13)".to_string(),
        };
        assert_eq!(err.exit_code(), exit_code::MISSING_INPUT);
        let err = PipelineError::DatasetRead {
            path: PathBuf::from("data/rtm_data.json"),
            detail: "expected value at line 1 column 1".to_string(),
        };
        assert_eq!(err.exit_code(), exit_code::MALFORMED_RESPONSE);
    }
}
