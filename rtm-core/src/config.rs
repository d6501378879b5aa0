use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{ConfigError, Result};

/// Full pipeline configuration, loaded once at process start and passed by
/// reference to every component. Credential env fallbacks are resolved at
/// startup, never mid-pipeline.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RtmConfig {
    pub tracker: TrackerSection,
    pub wiki: WikiSection,
    pub mail: MailSection,
    pub paths: PathsSection,
    pub extraction: ExtractionSection,
    pub chromium: ChromiumSection,
    pub selectors: SelectorSection,
    #[serde(skip)]
    resolved: Option<ResolvedCredentials>,
}

/// All three credential pairs, resolved from file or environment at load
/// time. A missing value fails the load, before any stage runs.
#[derive(Debug, Clone)]
pub struct ResolvedCredentials {
    pub tracker: Credentials,
    pub wiki: Credentials,
    pub mail: Credentials,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerSection {
    pub base_url: String,
    pub project_key: String,
    pub execution_key: String,
    pub fetch_strategy: FetchStrategy,
    /// JQL query used when `fetch_strategy = "jql_search"`.
    pub jql: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStrategy {
    ExecutionApi,
    JqlSearch,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WikiSection {
    pub base_url: String,
    pub space_key: String,
    pub page_title: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailSection {
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub from: String,
    /// Comma or semicolon separated recipient list.
    pub to: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub report_dir: String,
    pub data_dir: String,
    pub log_file: String,
    #[serde(default)]
    pub timestamped_copies: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionSection {
    /// When true the browser agent substitutes for the REST datasource.
    #[serde(default)]
    pub enabled: bool,
    pub download_dir: String,
    /// Path of the RTM report page relative to the tracker base URL.
    pub report_path: String,
    #[serde(default = "default_nav_timeout")]
    pub nav_timeout_seconds: u64,
    #[serde(default = "default_element_timeout")]
    pub element_timeout_seconds: u64,
    #[serde(default = "default_generate_timeout")]
    pub generate_timeout_seconds: u64,
    #[serde(default = "default_export_timeout")]
    pub export_timeout_seconds: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChromiumSection {
    #[serde(default)]
    pub executable_path: Option<String>,
    #[serde(default = "default_true")]
    pub headless: bool,
    #[serde(default)]
    pub sandbox: bool,
    #[serde(default = "default_true")]
    pub disable_gpu: bool,
    #[serde(default = "default_window")]
    pub window: [u32; 2],
}

/// Ordered locator strategies; each list is evaluated in sequence under a
/// single shared deadline.
#[derive(Debug, Clone, Deserialize)]
pub struct SelectorSection {
    pub username_inputs: Vec<String>,
    pub password_inputs: Vec<String>,
    pub continue_buttons: Vec<String>,
    pub login_buttons: Vec<String>,
    pub project_key_inputs: Vec<String>,
    pub execution_key_inputs: Vec<String>,
    pub generate_buttons: Vec<String>,
    pub export_buttons: Vec<String>,
    pub pdf_options: Vec<String>,
    /// Page-title keywords that identify the cloud login screen.
    pub login_title_markers: Vec<String>,
    /// Page-title keywords that identify an already-authenticated session.
    pub session_title_markers: Vec<String>,
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_smtp_port() -> u16 {
    587
}

fn default_nav_timeout() -> u64 {
    30
}

fn default_element_timeout() -> u64 {
    20
}

fn default_generate_timeout() -> u64 {
    60
}

fn default_export_timeout() -> u64 {
    90
}

fn default_poll_interval() -> u64 {
    500
}

fn default_true() -> bool {
    true
}

fn default_window() -> [u32; 2] {
    [1920, 1080]
}

/// Resolved credential pair; secrets never appear in Debug output.
#[derive(Clone)]
pub struct Credentials {
    pub user: String,
    pub secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl RtmConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            source,
            path: path.to_path_buf(),
        })?;
        let mut config: RtmConfig =
            toml::from_str(&content).map_err(|source| ConfigError::Parse {
                source,
                path: path.to_path_buf(),
            })?;
        config.validate()?;
        config.resolved = Some(config.resolve_credentials()?);
        Ok(config)
    }

    fn resolve_credentials(&self) -> Result<ResolvedCredentials> {
        Ok(ResolvedCredentials {
            tracker: self.resolve_tracker()?,
            wiki: self.resolve_wiki()?,
            mail: self.resolve_mail()?,
        })
    }

    fn validate(&self) -> Result<()> {
        if self.tracker.fetch_strategy == FetchStrategy::JqlSearch && self.jql_missing() {
            return Err(ConfigError::InvalidValue {
                field: "tracker.jql",
                detail: "fetch_strategy = \"jql_search\" requires a jql query".to_string(),
            });
        }
        if self.mail.to.split([',', ';']).all(|r| r.trim().is_empty()) {
            return Err(ConfigError::InvalidValue {
                field: "mail.to",
                detail: "recipient list is empty".to_string(),
            });
        }
        Ok(())
    }

    fn jql_missing(&self) -> bool {
        self.tracker
            .jql
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .is_empty()
    }

    /// Credentials for the issue tracker. `load` resolves and stores all
    /// pairs; configs built by hand fall back to resolving on demand.
    pub fn tracker_credentials(&self) -> Result<Credentials> {
        match &self.resolved {
            Some(resolved) => Ok(resolved.tracker.clone()),
            None => self.resolve_tracker(),
        }
    }

    pub fn wiki_credentials(&self) -> Result<Credentials> {
        match &self.resolved {
            Some(resolved) => Ok(resolved.wiki.clone()),
            None => self.resolve_wiki(),
        }
    }

    pub fn mail_credentials(&self) -> Result<Credentials> {
        match &self.resolved {
            Some(resolved) => Ok(resolved.mail.clone()),
            None => self.resolve_mail(),
        }
    }

    fn resolve_tracker(&self) -> Result<Credentials> {
        resolve(
            &self.tracker.user,
            &self.tracker.token,
            ("tracker.user", "RTM_TRACKER_USER"),
            ("tracker.token", "RTM_TRACKER_TOKEN"),
        )
    }

    fn resolve_wiki(&self) -> Result<Credentials> {
        resolve(
            &self.wiki.user,
            &self.wiki.token,
            ("wiki.user", "RTM_WIKI_USER"),
            ("wiki.token", "RTM_WIKI_TOKEN"),
        )
    }

    fn resolve_mail(&self) -> Result<Credentials> {
        resolve(
            &self.mail.user,
            &self.mail.password,
            ("mail.user", "RTM_SMTP_USER"),
            ("mail.password", "RTM_SMTP_PASS"),
        )
    }

    pub fn report_dir(&self) -> PathBuf {
        PathBuf::from(&self.paths.report_dir)
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.paths.data_dir)
    }

    pub fn download_dir(&self) -> PathBuf {
        PathBuf::from(&self.extraction.download_dir)
    }
}

fn resolve(
    user: &Option<String>,
    secret: &Option<String>,
    user_key: (&'static str, &'static str),
    secret_key: (&'static str, &'static str),
) -> Result<Credentials> {
    Ok(Credentials {
        user: field_or_env(user, user_key.0, user_key.1)?,
        secret: field_or_env(secret, secret_key.0, secret_key.1)?,
    })
}

fn field_or_env(value: &Option<String>, field: &'static str, env: &'static str) -> Result<String> {
    if let Some(value) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        return Ok(value.to_string());
    }
    std::env::var(env)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::MissingValue { field, env })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture_path() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/rtm.toml")
    }

    #[test]
    fn load_fixture_config() {
        let config = RtmConfig::load(fixture_path()).expect("fixture should parse");
        assert_eq!(config.tracker.project_key, "RD");
        assert_eq!(config.tracker.fetch_strategy, FetchStrategy::ExecutionApi);
        assert!(config.selectors.username_inputs.len() >= 2);
        assert_eq!(config.mail.smtp_port, 587);
    }

    #[test]
    fn credentials_prefer_file_values() {
        let config = RtmConfig::load(fixture_path()).unwrap();
        let creds = config.tracker_credentials().unwrap();
        assert_eq!(creds.user, "ci-bot@example.com");
        assert_eq!(creds.secret, "fixture-token");
    }

    /// Fixture with the named keys removed from one section, written to a
    /// scratch file so `load` exercises the startup path.
    fn fixture_without(section: &str, keys: &[&str]) -> (tempfile::TempDir, PathBuf) {
        let raw = std::fs::read_to_string(fixture_path()).unwrap();
        let mut value: toml::Value = toml::from_str(&raw).unwrap();
        let table = value.get_mut(section).unwrap().as_table_mut().unwrap();
        for key in keys {
            table.remove(*key);
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rtm.toml");
        std::fs::write(&path, toml::to_string(&value).unwrap()).unwrap();
        (dir, path)
    }

    #[test]
    fn missing_wiki_credentials_fail_at_load() {
        let (_dir, path) = fixture_without("wiki", &["user", "token"]);
        std::env::remove_var("RTM_WIKI_USER");
        std::env::remove_var("RTM_WIKI_TOKEN");
        let err = RtmConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::MissingValue { .. }));
    }

    #[test]
    fn missing_mail_credentials_fail_at_load() {
        let (_dir, path) = fixture_without("mail", &["user", "password"]);
        std::env::remove_var("RTM_SMTP_USER");
        std::env::remove_var("RTM_SMTP_PASS");
        let err = RtmConfig::load(&path).unwrap_err();
        match err {
            ConfigError::MissingValue { field, .. } => assert_eq!(field, "mail.user"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_recipient_list_is_invalid() {
        let mut config = RtmConfig::load(fixture_path()).unwrap();
        config.mail.to = " ; ,".to_string();
        assert!(config.validate().is_err());
    }
}
