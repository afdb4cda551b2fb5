use crate::utils::text::{display_value, is_truthy};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// `null` 與缺少的欄位都視為空清單
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// 任意 JSON 值轉成文字；`null`、空值與假值變成 `None`
fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.filter(is_truthy).map(|v| display_value(&v)))
}

fn lenient_required_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_text(deserializer)?.unwrap_or_default())
}

/// retro-marker 寫入的標記檔
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Marker {
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub head: Option<String>,
}

/// 從 session 日誌收集到的單筆失敗
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    #[serde(default, deserialize_with = "lenient_required_text")]
    pub source: String,
    #[serde(default, deserialize_with = "lenient_required_text")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub excerpt: Option<String>,
}

/// `<slug>--<timestamp>.json` failures summary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FailureSummary {
    #[serde(default, deserialize_with = "lenient_required_text")]
    pub branch: String,
    #[serde(default, deserialize_with = "lenient_required_text")]
    pub marker_timestamp: String,
    #[serde(default, deserialize_with = "lenient_required_text")]
    pub generated_at: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub sources: Vec<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub failures: Vec<Failure>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetroIssue {
    pub id: String,
    pub root_cause: String,
    pub mitigation: String,
    pub prevention: String,
    pub evidence: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetroReport {
    pub branch: String,
    pub marker_timestamp: String,
    pub summary: String,
    pub issues: Vec<RetroIssue>,
    pub follow_ups: Vec<String>,
    pub generated_at: String,
    pub mode: String,
}

/// `gh pr list --json number,title,headRefName,state,createdAt` 的單筆資料
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    #[serde(default)]
    pub number: Option<u64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub head_ref_name: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchInfo {
    pub name: String,
    pub remote: bool,
    pub local: bool,
    pub pr_number: Option<u64>,
    pub pr_title: Option<String>,
    pub pr_state: Option<String>,
    pub pr_created_at: Option<String>,
}

impl BranchInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn status(&self) -> &'static str {
        match (self.remote, self.local) {
            (true, true) => "remote & local",
            (true, false) => "remote-only",
            (false, true) => "local-only",
            (false, false) => "unknown",
        }
    }

    pub fn action(&self) -> &'static str {
        let has_pr = self.pr_number.is_some();
        if has_pr && !self.local {
            "fetch branch & review"
        } else if has_pr && self.local {
            "review/merge locally"
        } else if self.remote && !self.local {
            "fetch branch & decide"
        } else if self.local {
            "decide: merge/archive/delete"
        } else {
            ""
        }
    }
}

/// 逐字稿中的一列
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub timestamp: String,
    pub role: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretFinding {
    pub path: std::path::PathBuf,
    pub label: &'static str,
    pub snippet: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_status_and_action() {
        let mut info = BranchInfo::new("feature/x");
        assert_eq!(info.status(), "unknown");
        assert_eq!(info.action(), "");

        info.remote = true;
        assert_eq!(info.status(), "remote-only");
        assert_eq!(info.action(), "fetch branch & decide");

        info.local = true;
        assert_eq!(info.status(), "remote & local");
        assert_eq!(info.action(), "decide: merge/archive/delete");

        info.pr_number = Some(12);
        assert_eq!(info.action(), "review/merge locally");

        info.local = false;
        assert_eq!(info.action(), "fetch branch & review");
    }

    #[test]
    fn test_failure_summary_tolerates_nulls() {
        let summary: FailureSummary =
            serde_json::from_str(r#"{"branch": null, "failures": null, "warnings": null}"#).unwrap();
        assert_eq!(summary.branch, "");
        assert!(summary.failures.is_empty());
        assert!(summary.warnings.is_empty());

        let summary: FailureSummary = serde_json::from_str(
            r#"{"failures": [{"kind": null, "source": "s", "excerpt": 5}, {"kind": 3, "source": false}]}"#,
        )
        .unwrap();
        assert_eq!(summary.failures[0].kind, "");
        assert_eq!(summary.failures[0].source, "s");
        assert_eq!(summary.failures[0].excerpt.as_deref(), Some("5"));
        assert_eq!(summary.failures[1].kind, "3");
        assert_eq!(summary.failures[1].source, "");
        assert_eq!(summary.failures[1].excerpt, None);
    }

    #[test]
    fn test_pull_request_deserializes_gh_fields() {
        let pr: PullRequest = serde_json::from_str(
            r#"{"number": 7, "title": "Add filter", "headRefName": "feature/filter", "state": "OPEN", "createdAt": "2025-01-02T03:04:05Z"}"#,
        )
        .unwrap();
        assert_eq!(pr.number, Some(7));
        assert_eq!(pr.head_ref_name.as_deref(), Some("feature/filter"));
        assert_eq!(pr.created_at.as_deref(), Some("2025-01-02T03:04:05Z"));
    }
}
