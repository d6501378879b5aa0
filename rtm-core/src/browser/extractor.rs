use std::collections::HashSet;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::config::{Credentials, ExtractionSection, RtmConfig, SelectorSection};

use super::automation::{BrowserLauncher, ExtractionSession};
use super::error::{BrowserError, BrowserResult};
use super::wait::Deadline;

/// Closed set of states the agent moves through. Kept explicit so transitions
/// are auditable in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionState {
    DetectSession,
    Authenticate,
    Navigate,
    Configure,
    Export,
    Verify,
}

impl fmt::Display for ExtractionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExtractionState::DetectSession => "detect_session",
            ExtractionState::Authenticate => "authenticate",
            ExtractionState::Navigate => "navigate",
            ExtractionState::Configure => "configure",
            ExtractionState::Export => "export",
            ExtractionState::Verify => "verify",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    UnrecognizedPage,
    AuthElementsMissing,
    ReportFormMissing,
    GenerateTimeout,
    ExportNotFound,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::UnrecognizedPage => "unrecognized_page",
            FailureReason::AuthElementsMissing => "auth_elements_missing_possible_sso",
            FailureReason::ReportFormMissing => "report_form_missing",
            FailureReason::GenerateTimeout => "generate_timeout",
            FailureReason::ExportNotFound => "export_not_found",
        }
    }

    /// True for failures before the report page was reached.
    pub fn is_login_failure(&self) -> bool {
        matches!(
            self,
            FailureReason::UnrecognizedPage | FailureReason::AuthElementsMissing
        )
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of one extraction run. Failures carry the persisted
/// diagnostic snapshot path when the capture succeeded.
#[derive(Debug)]
pub enum ExtractionOutcome {
    Succeeded {
        artifact: PathBuf,
    },
    Failed {
        reason: FailureReason,
        snapshot: Option<PathBuf>,
    },
}

enum SessionKind {
    AuthRequired,
    Authenticated,
    Unrecognized,
}

/// Drives a browser session through the login → navigate → configure →
/// export → verify state machine to obtain the report PDF.
pub struct ReportExtractor {
    base_url: String,
    project_key: String,
    execution_key: String,
    credentials: Credentials,
    extraction: ExtractionSection,
    selectors: SelectorSection,
    download_dir: PathBuf,
}

impl ReportExtractor {
    pub fn new(config: &RtmConfig, credentials: Credentials) -> Self {
        Self {
            base_url: config.tracker.base_url.trim_end_matches('/').to_string(),
            project_key: config.tracker.project_key.clone(),
            execution_key: config.tracker.execution_key.clone(),
            credentials,
            extraction: config.extraction.clone(),
            selectors: config.selectors.clone(),
            download_dir: config.download_dir(),
        }
    }

    /// Run the state machine against an already-launched session. Never hangs:
    /// every wait is a polling predicate under a deadline.
    pub async fn run<S: ExtractionSession>(
        &self,
        session: &mut S,
    ) -> BrowserResult<ExtractionOutcome> {
        info!(state = %ExtractionState::DetectSession, url = %self.base_url, "opening tracker");
        session.goto(&self.base_url).await?;
        match self.detect_session(session).await? {
            SessionKind::Authenticated => {
                info!("session already authenticated");
            }
            SessionKind::AuthRequired => {
                info!(state = %ExtractionState::Authenticate, "login page detected");
                if !self.authenticate(session).await? {
                    return self.fail(session, FailureReason::AuthElementsMissing).await;
                }
            }
            SessionKind::Unrecognized => {
                return self.fail(session, FailureReason::UnrecognizedPage).await;
            }
        }

        info!(state = %ExtractionState::Navigate, "opening report page");
        let report_url = format!("{}{}", self.base_url, self.extraction.report_path);
        session.goto(&report_url).await?;
        if !self
            .wait_present(
                session,
                &self.selectors.project_key_inputs,
                self.nav_timeout(),
            )
            .await?
        {
            return self.fail(session, FailureReason::ReportFormMissing).await;
        }

        info!(state = %ExtractionState::Configure, execution = %self.execution_key, "configuring report");
        let filled_project = session
            .fill_first(&self.selectors.project_key_inputs, &self.project_key)
            .await?;
        let filled_execution = session
            .fill_first(&self.selectors.execution_key_inputs, &self.execution_key)
            .await?;
        if !filled_project || !filled_execution {
            return self.fail(session, FailureReason::ReportFormMissing).await;
        }
        if !self
            .wait_click(session, &self.selectors.generate_buttons, self.element_timeout())
            .await?
        {
            return self.fail(session, FailureReason::GenerateTimeout).await;
        }
        // The export control only renders once report generation completed;
        // its appearance is the completion signal.
        if !self
            .wait_present(
                session,
                &self.selectors.export_buttons,
                self.generate_timeout(),
            )
            .await?
        {
            return self.fail(session, FailureReason::GenerateTimeout).await;
        }

        info!(state = %ExtractionState::Export, "triggering PDF export");
        // Names present before the export; anything beyond this set is the
        // new artifact. File mtimes are not compared against the wall clock,
        // which can run ahead of the filesystem timestamp granularity.
        let known = pdf_names(&self.download_dir)?;
        if !self
            .wait_click(session, &self.selectors.export_buttons, self.element_timeout())
            .await?
        {
            return self.fail(session, FailureReason::ExportNotFound).await;
        }
        if !self
            .wait_click(session, &self.selectors.pdf_options, self.element_timeout())
            .await?
        {
            return self.fail(session, FailureReason::ExportNotFound).await;
        }

        info!(state = %ExtractionState::Verify, dir = %self.download_dir.display(), "waiting for download");
        let deadline = Deadline::new(self.export_timeout(), self.poll_interval());
        loop {
            if let Some(artifact) = find_new_pdf(&self.download_dir, &known)? {
                info!(artifact = %artifact.display(), "report PDF downloaded");
                return Ok(ExtractionOutcome::Succeeded { artifact });
            }
            if deadline.expired() {
                return self.fail(session, FailureReason::ExportNotFound).await;
            }
            deadline.pause().await;
        }
    }

    async fn detect_session<S: ExtractionSession>(
        &self,
        session: &mut S,
    ) -> BrowserResult<SessionKind> {
        let title = session.title().await?;
        if title_matches(&title, &self.selectors.login_title_markers) {
            Ok(SessionKind::AuthRequired)
        } else if title_matches(&title, &self.selectors.session_title_markers) {
            Ok(SessionKind::Authenticated)
        } else {
            warn!(title = %title, "unrecognized page identity");
            Ok(SessionKind::Unrecognized)
        }
    }

    /// Returns false when a login control never appeared within the shared
    /// deadline, which usually means an external SSO redirect.
    async fn authenticate<S: ExtractionSession>(&self, session: &mut S) -> BrowserResult<bool> {
        if !self
            .wait_fill(
                session,
                &self.selectors.username_inputs,
                &self.credentials.user,
                self.element_timeout(),
            )
            .await?
        {
            return Ok(false);
        }
        if !session.click_first(&self.selectors.continue_buttons).await? {
            warn!("continue button not found; proceeding to password wait");
        }
        if !self
            .wait_fill(
                session,
                &self.selectors.password_inputs,
                &self.credentials.secret,
                self.element_timeout(),
            )
            .await?
        {
            return Ok(false);
        }
        if !session.click_first(&self.selectors.login_buttons).await? {
            warn!("login button not found after password entry");
        }
        // Settle until the login markers disappear, bounded by the nav budget.
        let deadline = Deadline::new(self.nav_timeout(), self.poll_interval());
        loop {
            let title = session.title().await?;
            if !title_matches(&title, &self.selectors.login_title_markers) {
                return Ok(true);
            }
            if deadline.expired() {
                warn!(title = %title, "still on login page after submit");
                return Ok(true);
            }
            deadline.pause().await;
        }
    }

    async fn wait_present<S: ExtractionSession>(
        &self,
        session: &mut S,
        selectors: &[String],
        timeout: Duration,
    ) -> BrowserResult<bool> {
        let deadline = Deadline::new(timeout, self.poll_interval());
        loop {
            if session.element_present(selectors).await? {
                return Ok(true);
            }
            if deadline.expired() {
                return Ok(false);
            }
            deadline.pause().await;
        }
    }

    async fn wait_fill<S: ExtractionSession>(
        &self,
        session: &mut S,
        selectors: &[String],
        text: &str,
        timeout: Duration,
    ) -> BrowserResult<bool> {
        let deadline = Deadline::new(timeout, self.poll_interval());
        loop {
            if session.fill_first(selectors, text).await? {
                return Ok(true);
            }
            if deadline.expired() {
                return Ok(false);
            }
            deadline.pause().await;
        }
    }

    async fn wait_click<S: ExtractionSession>(
        &self,
        session: &mut S,
        selectors: &[String],
        timeout: Duration,
    ) -> BrowserResult<bool> {
        let deadline = Deadline::new(timeout, self.poll_interval());
        loop {
            if session.click_first(selectors).await? {
                return Ok(true);
            }
            if deadline.expired() {
                return Ok(false);
            }
            deadline.pause().await;
        }
    }

    /// Persist a diagnostic snapshot, then return the terminal failure. The
    /// snapshot is best-effort; losing it must not mask the original reason.
    async fn fail<S: ExtractionSession>(
        &self,
        session: &mut S,
        reason: FailureReason,
    ) -> BrowserResult<ExtractionOutcome> {
        std::fs::create_dir_all(&self.download_dir)?;
        let path = self.download_dir.join(format!(
            "{}_{}.png",
            reason.as_str(),
            Utc::now().format("%Y%m%d%H%M%S")
        ));
        let snapshot = match session.save_snapshot(&path).await {
            Ok(()) => {
                warn!(reason = %reason, snapshot = %path.display(), "extraction failed");
                Some(path)
            }
            Err(err) => {
                warn!(reason = %reason, error = %err, "extraction failed; snapshot capture also failed");
                None
            }
        };
        Ok(ExtractionOutcome::Failed { reason, snapshot })
    }

    fn nav_timeout(&self) -> Duration {
        Duration::from_secs(self.extraction.nav_timeout_seconds)
    }

    fn element_timeout(&self) -> Duration {
        Duration::from_secs(self.extraction.element_timeout_seconds)
    }

    fn generate_timeout(&self) -> Duration {
        Duration::from_secs(self.extraction.generate_timeout_seconds)
    }

    fn export_timeout(&self) -> Duration {
        Duration::from_secs(self.extraction.export_timeout_seconds)
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.extraction.poll_interval_ms)
    }
}

fn title_matches(title: &str, markers: &[String]) -> bool {
    markers.iter().any(|marker| title.contains(marker.as_str()))
}

/// PDF filenames currently in the download directory.
fn pdf_names(dir: &Path) -> BrowserResult<HashSet<OsString>> {
    let mut names = HashSet::new();
    if !dir.exists() {
        return Ok(names);
    }
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if is_pdf(&path) {
            if let Some(name) = path.file_name() {
                names.insert(name.to_os_string());
            }
        }
    }
    Ok(names)
}

/// Scan for a PDF that was not present before the export was triggered,
/// ignoring partial downloads.
fn find_new_pdf(dir: &Path, known: &HashSet<OsString>) -> BrowserResult<Option<PathBuf>> {
    if !dir.exists() {
        return Ok(None);
    }
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !is_pdf(&path) {
            continue;
        }
        match path.file_name() {
            Some(name) if !known.contains(name) => return Ok(Some(path)),
            _ => {}
        }
    }
    Ok(None)
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

/// Launch a browser, run the extraction state machine, and release the
/// session on every exit path, including faults inside the run.
pub async fn extract_report(config: &RtmConfig) -> BrowserResult<ExtractionOutcome> {
    let credentials = config
        .tracker_credentials()
        .map_err(|err| BrowserError::Configuration(err.to_string()))?;
    let launcher = BrowserLauncher::new(config.chromium.clone(), config.download_dir());
    let mut session = launcher.launch().await?;
    let extractor = ReportExtractor::new(config, credentials);
    let outcome = extractor.run(&mut session).await;
    session.shutdown().await;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_reasons_render_stable_labels() {
        assert_eq!(FailureReason::UnrecognizedPage.as_str(), "unrecognized_page");
        assert_eq!(
            FailureReason::AuthElementsMissing.as_str(),
            "auth_elements_missing_possible_sso"
        );
        assert_eq!(FailureReason::ExportNotFound.as_str(), "export_not_found");
    }

    #[test]
    fn login_failures_are_classified() {
        assert!(FailureReason::UnrecognizedPage.is_login_failure());
        assert!(FailureReason::AuthElementsMissing.is_login_failure());
        assert!(!FailureReason::ExportNotFound.is_login_failure());
    }

    #[test]
    fn new_pdf_scan_ignores_preexisting_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("old_report.pdf"), b"%PDF-1.4").unwrap();
        let known = pdf_names(dir.path()).unwrap();
        assert!(find_new_pdf(dir.path(), &known).unwrap().is_none());

        // A file landing right after the snapshot is new, regardless of what
        // the filesystem clock stamped it with.
        std::fs::write(dir.path().join("fresh.pdf"), b"%PDF-1.4").unwrap();
        let found = find_new_pdf(dir.path(), &known).unwrap().unwrap();
        assert_eq!(found.file_name().unwrap(), "fresh.pdf");
    }

    #[test]
    fn new_pdf_scan_skips_partial_downloads() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("report.crdownload"), b"partial").unwrap();
        let known = HashSet::new();
        assert!(find_new_pdf(dir.path(), &known).unwrap().is_none());
    }

    #[test]
    fn missing_download_dir_scans_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("never-created");
        assert!(pdf_names(&missing).unwrap().is_empty());
        assert!(find_new_pdf(&missing, &HashSet::new()).unwrap().is_none());
    }
}
