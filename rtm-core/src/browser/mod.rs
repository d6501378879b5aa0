mod automation;
mod error;
mod extractor;
mod wait;

pub use automation::{BrowserLauncher, BrowserSession, ExtractionSession};
pub use error::{BrowserError, BrowserResult};
pub use extractor::{
    extract_report, ExtractionOutcome, ExtractionState, FailureReason, ReportExtractor,
};
pub use wait::Deadline;
