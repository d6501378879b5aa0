use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

use rtm_core::{Pipeline, PipelineError, PipelineReport, RtmConfig};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Pipeline(#[from] PipelineError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Pipeline(err) => err.exit_code(),
            AppError::Serialize(_) | AppError::Io(_) => 1,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "RTM report pipeline control interface", long_about = None)]
pub struct Cli {
    /// Path to the rtm.toml configuration
    #[arg(long, default_value = "configs/rtm.toml")]
    pub config: PathBuf,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Full pipeline: fetch, render, publish, notify
    Run,
    /// Fetch the execution dataset and persist the normalized snapshot
    Fetch,
    /// Render HTML and PDF from the last fetched snapshot
    Render,
    /// Publish the rendered artifacts to the wiki page
    Publish,
    /// Mail the rendered artifacts to the configured recipients
    Notify,
    /// Drive a browser through the tracker UI and download the exported PDF
    Extract,
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = RtmConfig::load(&cli.config).map_err(PipelineError::Config)?;
    init_logging(&config)?;
    info!(config = %cli.config.display(), "configuration loaded");
    let pipeline = Pipeline::new(config);

    match cli.command {
        Commands::Run => {
            let report = pipeline.run().await?;
            render(&RunOutput::from(report), cli.format)?;
        }
        Commands::Fetch => {
            let dataset = pipeline.fetch().await?;
            let data_path = pipeline
                .config()
                .data_dir()
                .join(rtm_core::pipeline::DATA_FILENAME);
            render(
                &FetchOutput {
                    rows: dataset.issues.len(),
                    summary: rtm_core::StatusSummary::from_rows(&dataset.issues).to_string(),
                    data_path,
                },
                cli.format,
            )?;
        }
        Commands::Render => {
            let dataset = pipeline.load_dataset()?;
            let rendered = pipeline.render(&dataset)?;
            render(
                &RenderOutput {
                    rows: rendered.row_count,
                    summary: rendered.summary.to_string(),
                    html_path: rendered.html_path,
                    pdf_path: rendered.pdf_path,
                },
                cli.format,
            )?;
        }
        Commands::Publish => {
            let dataset = pipeline.load_dataset()?;
            let rendered = pipeline.render(&dataset)?;
            let page = pipeline.publish(&rendered).await?;
            render(
                &PublishOutput {
                    page_id: page.id,
                    version: page.version,
                    url: page.url,
                },
                cli.format,
            )?;
        }
        Commands::Notify => {
            let dataset = pipeline.load_dataset()?;
            let rendered = pipeline.render(&dataset)?;
            pipeline
                .notify(
                    &[rendered.html_path.as_path(), rendered.pdf_path.as_path()],
                    None,
                )
                .await?;
            render(
                &NotifyOutput {
                    status: "sent".to_string(),
                    recipients: pipeline.config().mail.to.clone(),
                },
                cli.format,
            )?;
        }
        Commands::Extract => {
            let artifact = pipeline.extract().await?;
            render(&ExtractOutput { artifact }, cli.format)?;
        }
    }

    Ok(())
}

/// Logs go to stdout and to the configured log file; RUST_LOG overrides the
/// default `info` filter.
fn init_logging(config: &RtmConfig) -> Result<()> {
    let log_path = PathBuf::from(&config.paths.log_file);
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;
    let writer = std::io::stdout.and(Arc::new(file));

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // A second init (tests, repeated calls) is not an error worth failing on.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init();
    Ok(())
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct RunOutput(pub PipelineReport);

impl From<PipelineReport> for RunOutput {
    fn from(report: PipelineReport) -> Self {
        Self(report)
    }
}

impl DisplayFallback for RunOutput {
    fn display(&self) -> String {
        let mut lines = match &self.0 {
            PipelineReport::Rest {
                rows,
                summary,
                html_path,
                pdf_path,
                page_url,
                page_version,
            } => {
                let mut lines = vec![
                    format!("Rows: {rows} ({summary})"),
                    format!("HTML: {}", html_path.display()),
                    format!("PDF: {}", pdf_path.display()),
                    format!("Page version: {page_version}"),
                ];
                if let Some(url) = page_url {
                    lines.push(format!("Page: {url}"));
                }
                lines
            }
            PipelineReport::Extraction {
                artifact,
                page_url,
                page_version,
            } => {
                let mut lines = vec![
                    format!("Exported report: {}", artifact.display()),
                    format!("Page version: {page_version}"),
                ];
                if let Some(url) = page_url {
                    lines.push(format!("Page: {url}"));
                }
                lines
            }
        };
        lines.push("Recipients notified".to_string());
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct FetchOutput {
    pub rows: usize,
    pub summary: String,
    pub data_path: PathBuf,
}

impl DisplayFallback for FetchOutput {
    fn display(&self) -> String {
        format!(
            "Fetched {} rows ({})\nSnapshot: {}",
            self.rows,
            self.summary,
            self.data_path.display()
        )
    }
}

#[derive(Debug, Serialize)]
pub struct RenderOutput {
    pub rows: usize,
    pub summary: String,
    pub html_path: PathBuf,
    pub pdf_path: PathBuf,
}

impl DisplayFallback for RenderOutput {
    fn display(&self) -> String {
        format!(
            "Rendered {} rows ({})\nHTML: {}\nPDF: {}",
            self.rows,
            self.summary,
            self.html_path.display(),
            self.pdf_path.display()
        )
    }
}

#[derive(Debug, Serialize)]
pub struct PublishOutput {
    pub page_id: String,
    pub version: u32,
    pub url: Option<String>,
}

impl DisplayFallback for PublishOutput {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "Published page {} at version {}",
            self.page_id, self.version
        )];
        if let Some(url) = &self.url {
            lines.push(format!("URL: {url}"));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct NotifyOutput {
    pub status: String,
    pub recipients: String,
}

impl DisplayFallback for NotifyOutput {
    fn display(&self) -> String {
        format!("Mail {} to: {}", self.status, self.recipients)
    }
}

#[derive(Debug, Serialize)]
pub struct ExtractOutput {
    pub artifact: PathBuf,
}

impl DisplayFallback for ExtractOutput {
    fn display(&self) -> String {
        format!("Exported report: {}", self.artifact.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use rtm_core::pipeline::exit_code;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_output_text_lists_artifacts() {
        let output = RunOutput(PipelineReport::Rest {
            rows: 3,
            summary: "Fail: 1, Pass: 2".to_string(),
            html_path: PathBuf::from("report/rtm_report.html"),
            pdf_path: PathBuf::from("report/rtm_report.pdf"),
            page_url: Some("https://example.atlassian.net/wiki/display/DEMO/RTM".to_string()),
            page_version: 4,
        });
        let text = output.display();
        assert!(text.contains("Rows: 3 (Fail: 1, Pass: 2)"));
        assert!(text.contains("rtm_report.pdf"));
        assert!(text.contains("Page version: 4"));
        assert!(text.contains("display/DEMO/RTM"));
    }

    #[test]
    fn extraction_run_output_names_the_artifact() {
        let output = RunOutput(PipelineReport::Extraction {
            artifact: PathBuf::from("report/test-execution-report.pdf"),
            page_url: None,
            page_version: 1,
        });
        let text = output.display();
        assert!(text.contains("Exported report: report/test-execution-report.pdf"));
        assert!(text.contains("Page version: 1"));
    }

    #[test]
    fn pipeline_exit_codes_surface_through_app_error() {
        let err = AppError::Pipeline(PipelineError::MissingInput(PathBuf::from(
            "data/rtm_data.json",
        )));
        assert_eq!(err.exit_code(), exit_code::MISSING_INPUT);
    }
}
