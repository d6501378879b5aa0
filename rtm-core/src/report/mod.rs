mod pdf;

use std::io;
use std::path::PathBuf;

use askama::Template;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::info;

use crate::config::PathsSection;
use crate::model::{Dataset, StatusSummary};

pub use pdf::render_pdf;

pub const HTML_FILENAME: &str = "rtm_report.html";
pub const PDF_FILENAME: &str = "rtm_report.pdf";

pub type RenderResult<T> = Result<T, RenderError>;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("dataset contains no rows; nothing to report")]
    EmptyDataset,
    #[error("template error: {0}")]
    Template(#[from] askama::Error),
    #[error("pdf generation failed: {0}")]
    Pdf(String),
    #[error("failed to write {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

#[derive(Debug, Clone)]
pub struct RenderedReport {
    pub html_path: PathBuf,
    pub pdf_path: PathBuf,
    pub row_count: usize,
    pub summary: StatusSummary,
}

#[derive(Template)]
#[template(path = "report.html")]
struct ReportTemplate<'a> {
    execution_key: &'a str,
    project_key: &'a str,
    generated_at: String,
    total: u64,
    summary: Vec<SummaryEntry>,
    rows: &'a [crate::model::IssueRow],
}

struct SummaryEntry {
    status: String,
    count: u64,
}

/// Renders both artifacts from one dataset snapshot. The summary is folded
/// once and shared, so HTML and PDF can never disagree on counts.
pub struct ReportRenderer {
    report_dir: PathBuf,
    timestamped_copies: bool,
}

impl ReportRenderer {
    pub fn new(paths: &PathsSection) -> Self {
        Self {
            report_dir: PathBuf::from(&paths.report_dir),
            timestamped_copies: paths.timestamped_copies,
        }
    }

    pub fn render(&self, dataset: &Dataset) -> RenderResult<RenderedReport> {
        if dataset.is_empty() {
            return Err(RenderError::EmptyDataset);
        }
        let summary = StatusSummary::from_rows(&dataset.issues);
        let generated_at = Utc::now();

        let html = render_html(dataset, &summary, generated_at)?;
        let pdf = render_pdf(dataset, &summary, generated_at)?;

        std::fs::create_dir_all(&self.report_dir).map_err(|source| RenderError::Io {
            path: self.report_dir.clone(),
            source,
        })?;
        let html_path = self.write(HTML_FILENAME, html.as_bytes())?;
        let pdf_path = self.write(PDF_FILENAME, &pdf)?;
        if self.timestamped_copies {
            let stamp = generated_at.format("%Y%m%d_%H%M%S");
            self.write(&format!("rtm_report_{stamp}.html"), html.as_bytes())?;
            self.write(&format!("rtm_report_{stamp}.pdf"), &pdf)?;
        }

        info!(
            rows = dataset.issues.len(),
            summary = %summary,
            html = %html_path.display(),
            pdf = %pdf_path.display(),
            "report rendered"
        );
        Ok(RenderedReport {
            html_path,
            pdf_path,
            row_count: dataset.issues.len(),
            summary,
        })
    }

    fn write(&self, filename: &str, bytes: &[u8]) -> RenderResult<PathBuf> {
        let path = self.report_dir.join(filename);
        std::fs::write(&path, bytes).map_err(|source| RenderError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}

pub fn render_html(
    dataset: &Dataset,
    summary: &StatusSummary,
    generated_at: DateTime<Utc>,
) -> RenderResult<String> {
    let template = ReportTemplate {
        execution_key: &dataset.execution.execution_key,
        project_key: &dataset.execution.project_key,
        generated_at: generated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        total: summary.total(),
        summary: summary
            .entries()
            .map(|(status, count)| SummaryEntry {
                status: status.to_string(),
                count,
            })
            .collect(),
        rows: &dataset.issues,
    };
    Ok(template.render()?)
}

/// Presentation-only truncation for fixed-width PDF columns. Never drops or
/// reorders rows.
pub(crate) fn truncate_cell(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        value.to_string()
    } else {
        let mut out: String = value.chars().take(max_chars.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExecutionRecord, IssueRow};

    fn dataset(statuses: &[&str]) -> Dataset {
        Dataset {
            execution: ExecutionRecord {
                execution_key: "RD-4".to_string(),
                project_key: "RD".to_string(),
                fetched_at: Utc::now(),
            },
            issues: statuses
                .iter()
                .enumerate()
                .map(|(idx, status)| IssueRow {
                    key: format!("RD-{}", idx + 1),
                    summary: format!("case {}", idx + 1),
                    issue_type: "Test Case Execution".to_string(),
                    priority: "Medium".to_string(),
                    assignee: "Unassigned".to_string(),
                    status: status.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn html_contains_all_rows_in_order() {
        let data = dataset(&["Pass", "Pass", "Fail"]);
        let summary = StatusSummary::from_rows(&data.issues);
        let html = render_html(&data, &summary, Utc::now()).unwrap();
        assert_eq!(html.matches("<tr><td>").count(), 3);
        let first = html.find("RD-1").unwrap();
        let second = html.find("RD-2").unwrap();
        let third = html.find("RD-3").unwrap();
        assert!(first < second && second < third);
        assert!(html.contains("Pass: 2"));
        assert!(html.contains("Fail: 1"));
    }

    fn contains_bytes(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|window| window == needle)
    }

    #[test]
    fn html_and_pdf_agree_on_rows_and_totals() {
        let data = dataset(&["Pass", "Fail", "Blocked"]);
        let summary = StatusSummary::from_rows(&data.issues);
        let generated = Utc::now();

        let html = render_html(&data, &summary, generated).unwrap();
        let pdf = render_pdf(&data, &summary, generated).unwrap();

        // Every row key appears in both artifacts; printpdf emits the text
        // runs uncompressed, so the keys are searchable in the raw bytes.
        assert_eq!(html.matches("<tr><td>").count(), data.issues.len());
        for row in &data.issues {
            assert!(html.contains(&row.key));
            assert!(contains_bytes(&pdf, row.key.as_bytes()));
        }
        assert!(html.contains("Total Issues:</b> 3"));
        assert!(contains_bytes(&pdf, b"Total Issues: 3"));
        assert!(html.contains("Blocked: 1, Fail: 1, Pass: 1"));
        assert!(contains_bytes(&pdf, b"Blocked: 1, Fail: 1, Pass: 1"));
    }

    #[test]
    fn renderer_rejects_empty_dataset_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = ReportRenderer {
            report_dir: dir.path().join("report"),
            timestamped_copies: false,
        };
        let err = renderer.render(&dataset(&[])).unwrap_err();
        assert!(matches!(err, RenderError::EmptyDataset));
        assert!(!dir.path().join("report").exists());
    }

    #[test]
    fn renderer_writes_fixed_filenames() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = ReportRenderer {
            report_dir: dir.path().to_path_buf(),
            timestamped_copies: false,
        };
        let rendered = renderer.render(&dataset(&["Pass"])).unwrap();
        assert_eq!(rendered.html_path, dir.path().join(HTML_FILENAME));
        assert_eq!(rendered.pdf_path, dir.path().join(PDF_FILENAME));
        assert!(rendered.html_path.exists());
        assert!(rendered.pdf_path.exists());
    }

    #[test]
    fn truncation_is_presentation_only() {
        assert_eq!(truncate_cell("short", 45), "short");
        let long = "x".repeat(60);
        let cut = truncate_cell(&long, 45);
        assert_eq!(cut.chars().count(), 45);
        assert!(cut.ends_with('…'));
    }
}
