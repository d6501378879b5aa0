use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of one test-execution run. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_key: String,
    pub project_key: String,
    pub fetched_at: DateTime<Utc>,
}

/// One normalized test-case result. Rows keep the insertion order of the
/// source and are never mutated after normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueRow {
    pub key: String,
    pub summary: String,
    pub issue_type: String,
    pub priority: String,
    pub assignee: String,
    pub status: String,
}

/// The normalized dataset for one invocation: execution identity plus its
/// ordered rows. Serialized to `data/rtm_data.json` as the durable snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub execution: ExecutionRecord,
    pub issues: Vec<IssueRow>,
}

impl Dataset {
    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json_str(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

/// Status value → count, always recomputed as a fold over the current rows.
/// Iteration order is sorted by status label so both renderings agree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSummary {
    counts: BTreeMap<String, u64>,
}

impl StatusSummary {
    pub fn from_rows(rows: &[IssueRow]) -> Self {
        let mut counts = BTreeMap::new();
        for row in rows {
            *counts.entry(row.status.clone()).or_insert(0) += 1;
        }
        Self { counts }
    }

    pub fn count(&self, status: &str) -> u64 {
        self.counts.get(status).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, u64)> {
        self.counts.iter().map(|(status, count)| (status.as_str(), *count))
    }
}

impl fmt::Display for StatusSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (status, count) in self.entries() {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{status}: {count}")?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(key: &str, status: &str) -> IssueRow {
        IssueRow {
            key: key.to_string(),
            summary: format!("case {key}"),
            issue_type: "Test Case Execution".to_string(),
            priority: "Medium".to_string(),
            assignee: "Unassigned".to_string(),
            status: status.to_string(),
        }
    }

    #[test]
    fn summary_folds_over_rows() {
        let rows = vec![row("RD-1", "Pass"), row("RD-2", "Pass"), row("RD-3", "Fail")];
        let summary = StatusSummary::from_rows(&rows);
        assert_eq!(summary.count("Pass"), 2);
        assert_eq!(summary.count("Fail"), 1);
        assert_eq!(summary.count("Blocked"), 0);
        assert_eq!(summary.total(), 3);
    }

    #[test]
    fn summary_display_is_sorted_by_status() {
        let rows = vec![row("RD-1", "Pass"), row("RD-2", "Fail"), row("RD-3", "Pass")];
        let summary = StatusSummary::from_rows(&rows);
        assert_eq!(summary.to_string(), "Fail: 1, Pass: 2");
    }

    #[test]
    fn dataset_round_trips_through_json() {
        let dataset = Dataset {
            execution: ExecutionRecord {
                execution_key: "RD-4".to_string(),
                project_key: "RD".to_string(),
                fetched_at: Utc::now(),
            },
            issues: vec![row("RD-1", "Pass")],
        };
        let json = dataset.to_json_pretty().unwrap();
        let restored = Dataset::from_json_str(&json).unwrap();
        assert_eq!(restored, dataset);
    }

    #[test]
    fn row_order_is_preserved() {
        let rows = vec![row("RD-3", "Fail"), row("RD-1", "Pass"), row("RD-2", "Pass")];
        let keys: Vec<&str> = rows.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, ["RD-3", "RD-1", "RD-2"]);
    }
}
