use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::config::{Credentials, FetchStrategy, TrackerSection};
use crate::model::{Dataset, ExecutionRecord, IssueRow};

pub type DataSourceResult<T> = Result<T, DataSourceError>;

#[derive(Debug, Error)]
pub enum DataSourceError {
    #[error("invalid tracker url {url}: {detail}")]
    Url { url: String, detail: String },
    #[error("request to {url} failed: {source}")]
    Http { url: String, source: reqwest::Error },
    #[error("{url} returned {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },
    #[error("malformed payload from {url}: {detail}")]
    Malformed { url: String, detail: String },
    #[error("execution {execution_key} contains no test results; nothing to report")]
    EmptyDataset { execution_key: String },
}

const DEFAULT_ASSIGNEE: &str = "Unassigned";

/// REST client for the issue tracker. Supports both source API shapes behind
/// one configurable strategy: the execution/test-run pair and a JQL search.
pub struct TrackerClient {
    http: reqwest::Client,
    base_url: Url,
    credentials: Credentials,
    strategy: FetchStrategy,
    jql: Option<String>,
}

impl TrackerClient {
    pub fn new(tracker: &TrackerSection, credentials: Credentials) -> DataSourceResult<Self> {
        let base_url = Url::parse(&tracker.base_url).map_err(|err| DataSourceError::Url {
            url: tracker.base_url.clone(),
            detail: err.to_string(),
        })?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(tracker.timeout_seconds))
            .build()
            .map_err(|source| DataSourceError::Http {
                url: tracker.base_url.clone(),
                source,
            })?;
        Ok(Self {
            http,
            base_url,
            credentials,
            strategy: tracker.fetch_strategy,
            jql: tracker.jql.clone(),
        })
    }

    /// Fetch and normalize the execution dataset. A non-2xx response, a
    /// malformed payload, or an empty result set are all hard failures.
    pub async fn fetch(
        &self,
        project_key: &str,
        execution_key: &str,
    ) -> DataSourceResult<Dataset> {
        let issues = match self.strategy {
            FetchStrategy::ExecutionApi => self.fetch_execution_api(execution_key).await?,
            FetchStrategy::JqlSearch => self.fetch_jql().await?,
        };
        if issues.is_empty() {
            return Err(DataSourceError::EmptyDataset {
                execution_key: execution_key.to_string(),
            });
        }
        info!(execution = execution_key, rows = issues.len(), "fetched execution dataset");
        Ok(Dataset {
            execution: ExecutionRecord {
                execution_key: execution_key.to_string(),
                project_key: project_key.to_string(),
                fetched_at: Utc::now(),
            },
            issues,
        })
    }

    async fn fetch_execution_api(&self, execution_key: &str) -> DataSourceResult<Vec<IssueRow>> {
        // The execution resource itself is fetched first so a bad key fails
        // before the per-test-case query.
        let exec_url = self.endpoint(&format!("api/v2/test-execution/{execution_key}"))?;
        let _execution: serde_json::Value = self.get_json(&exec_url).await?;

        let tces_url = self.endpoint(&format!("api/v2/test-execution/{execution_key}/tces"))?;
        let payload: TcesPayload = self.get_json(&tces_url).await?;
        Ok(payload.values.into_iter().map(normalize_tce).collect())
    }

    async fn fetch_jql(&self) -> DataSourceResult<Vec<IssueRow>> {
        let mut url = self.endpoint("rest/api/2/search")?;
        if let Some(jql) = &self.jql {
            url.query_pairs_mut().append_pair("jql", jql);
        }
        let payload: SearchPayload = self.get_json(&url).await?;
        Ok(payload.issues.into_iter().map(normalize_issue).collect())
    }

    fn endpoint(&self, path: &str) -> DataSourceResult<Url> {
        self.base_url.join(path).map_err(|err| DataSourceError::Url {
            url: format!("{}/{path}", self.base_url),
            detail: err.to_string(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &Url) -> DataSourceResult<T> {
        debug!(url = %url, "tracker GET");
        let response = self
            .http
            .get(url.clone())
            .basic_auth(&self.credentials.user, Some(&self.credentials.secret))
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|source| DataSourceError::Http {
                url: url.to_string(),
                source,
            })?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| DataSourceError::Http {
                url: url.to_string(),
                source,
            })?;
        if !status.is_success() {
            return Err(DataSourceError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body).map_err(|err| DataSourceError::Malformed {
            url: url.to_string(),
            detail: err.to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct TcesPayload {
    #[serde(default)]
    values: Vec<TceEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct TceEntry {
    key: Option<String>,
    #[serde(rename = "testCase")]
    test_case: Option<TestCaseRef>,
    priority: Option<String>,
    assignee: Option<NamedRef>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TestCaseRef {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedRef {
    #[serde(rename = "displayName")]
    display_name: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchPayload {
    #[serde(default)]
    issues: Vec<SearchIssue>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchIssue {
    key: Option<String>,
    #[serde(default)]
    fields: SearchFields,
}

#[derive(Debug, Default, Deserialize)]
struct SearchFields {
    summary: Option<String>,
    issuetype: Option<NamedRef>,
    priority: Option<NamedRef>,
    assignee: Option<NamedRef>,
    status: Option<NamedRef>,
}

fn normalize_tce(entry: TceEntry) -> IssueRow {
    IssueRow {
        key: entry.key.unwrap_or_default(),
        summary: entry
            .test_case
            .and_then(|tc| tc.name)
            .unwrap_or_default(),
        issue_type: "Test Case Execution".to_string(),
        priority: entry.priority.unwrap_or_default(),
        assignee: entry
            .assignee
            .and_then(named_ref_label)
            .unwrap_or_else(|| DEFAULT_ASSIGNEE.to_string()),
        status: entry.status.unwrap_or_default(),
    }
}

fn normalize_issue(issue: SearchIssue) -> IssueRow {
    let fields = issue.fields;
    IssueRow {
        key: issue.key.unwrap_or_default(),
        summary: fields.summary.unwrap_or_default(),
        issue_type: fields
            .issuetype
            .and_then(named_ref_label)
            .unwrap_or_default(),
        priority: fields
            .priority
            .and_then(named_ref_label)
            .unwrap_or_default(),
        assignee: fields
            .assignee
            .and_then(named_ref_label)
            .unwrap_or_else(|| DEFAULT_ASSIGNEE.to_string()),
        status: fields.status.and_then(named_ref_label).unwrap_or_default(),
    }
}

fn named_ref_label(named: NamedRef) -> Option<String> {
    named.display_name.or(named.name).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tce_normalization_fills_defaults() {
        let payload: TcesPayload = serde_json::from_str(
            r#"{
                "values": [
                    {
                        "key": "RD-10",
                        "testCase": { "name": "Login succeeds" },
                        "priority": "High",
                        "assignee": { "displayName": "Dana QA" },
                        "status": "Pass"
                    },
                    { "key": "RD-11", "status": "Fail" }
                ]
            }"#,
        )
        .unwrap();
        let rows: Vec<IssueRow> = payload.values.into_iter().map(normalize_tce).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].assignee, "Dana QA");
        assert_eq!(rows[0].summary, "Login succeeds");
        assert_eq!(rows[1].assignee, "Unassigned");
        assert_eq!(rows[1].issue_type, "Test Case Execution");
    }

    #[test]
    fn jql_normalization_reads_nested_fields() {
        let payload: SearchPayload = serde_json::from_str(
            r#"{
                "issues": [
                    {
                        "key": "RD-20",
                        "fields": {
                            "summary": "Checkout flow",
                            "issuetype": { "name": "Test" },
                            "priority": { "name": "Low" },
                            "assignee": null,
                            "status": { "name": "Blocked" }
                        }
                    }
                ]
            }"#,
        )
        .unwrap();
        let rows: Vec<IssueRow> = payload.issues.into_iter().map(normalize_issue).collect();
        assert_eq!(rows[0].key, "RD-20");
        assert_eq!(rows[0].issue_type, "Test");
        assert_eq!(rows[0].assignee, "Unassigned");
        assert_eq!(rows[0].status, "Blocked");
    }

    #[test]
    fn rows_keep_source_order() {
        let payload: TcesPayload = serde_json::from_str(
            r#"{"values": [
                { "key": "RD-3", "status": "Fail" },
                { "key": "RD-1", "status": "Pass" },
                { "key": "RD-2", "status": "Pass" }
            ]}"#,
        )
        .unwrap();
        let keys: Vec<String> = payload
            .values
            .into_iter()
            .map(normalize_tce)
            .map(|row| row.key)
            .collect();
        assert_eq!(keys, ["RD-3", "RD-1", "RD-2"]);
    }

    #[test]
    fn malformed_payload_is_an_error() {
        let result: Result<TcesPayload, _> = serde_json::from_str("{\"values\": 42}");
        assert!(result.is_err());
    }
}
