pub mod browser;
pub mod config;
pub mod datasource;
pub mod error;
pub mod model;
pub mod notify;
pub mod pipeline;
pub mod publish;
pub mod report;

pub use browser::{
    extract_report, BrowserError, BrowserResult, ExtractionOutcome, ExtractionSession,
    FailureReason, ReportExtractor,
};
pub use config::{Credentials, FetchStrategy, RtmConfig};
pub use datasource::{DataSourceError, TrackerClient};
pub use error::ConfigError;
pub use model::{Dataset, ExecutionRecord, IssueRow, StatusSummary};
pub use notify::{Notifier, NotifyError};
pub use pipeline::{exit_code, Pipeline, PipelineError, PipelineReport};
pub use publish::{
    ConfluenceClient, PageAction, PublishError, PublishedPage, RemotePage, WikiApi, WikiPublisher,
};
pub use report::{RenderError, RenderedReport, ReportRenderer};
