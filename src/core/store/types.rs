use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ValueRef};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::registry::Schedule;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Success,
    Failure,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failure => "failure",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "running" => Some(ExecutionStatus::Running),
            "success" => Some(ExecutionStatus::Success),
            "failure" => Some(ExecutionStatus::Failure),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

impl FromSql for ExecutionStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_str()?;
        ExecutionStatus::from_status(raw)
            .ok_or_else(|| FromSqlError::Other(format!("unknown execution status '{raw}'").into()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Started,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Started => "started",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "started" => Some(StepStatus::Started),
            "completed" => Some(StepStatus::Completed),
            "failed" => Some(StepStatus::Failed),
            _ => None,
        }
    }
}

impl FromSql for StepStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_str()?;
        StepStatus::from_status(raw)
            .ok_or_else(|| FromSqlError::Other(format!("unknown step status '{raw}'").into()))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub id: String,
    pub automation_id: String,
    pub trigger: String,
    pub status: ExecutionStatus,
    pub error: Option<String>,
    pub metadata: Option<Value>,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub duration_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub id: i64,
    pub execution_id: String,
    pub step_name: String,
    pub status: StepStatus,
    pub metadata: Option<Value>,
    pub created_at: String,
}

/// Operator-editable automation fields that survive rediscovery.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedEdits {
    pub enabled: bool,
    pub schedule: Schedule,
    pub tags: Vec<String>,
}

/// A pipeline entity. Each stage owns one status column; everything else is
/// content written by the stages.
#[derive(Debug, Clone, Serialize)]
pub struct ToolRecord {
    pub id: String,
    pub name: String,
    pub website: String,
    pub description: String,
    pub research_status: String,
    pub analysis_status: String,
    pub directory_status: String,
    pub newsletter_status: String,
    pub research: Option<Value>,
    pub primary_category: Option<String>,
    pub tags: Vec<String>,
    pub summary: Option<String>,
    pub features: Option<Value>,
    pub pricing: Option<Value>,
    pub sentiment: Option<Value>,
    pub ratings: Option<Value>,
    pub competitors: Option<Value>,
    pub company: Option<Value>,
    pub confidence_scores: Option<Value>,
    pub research_gaps: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Structured output of the analyst stage, written in one update.
#[derive(Debug, Clone, Default)]
pub struct AnalysisUpdate {
    pub primary_category: Option<String>,
    pub summary: Option<String>,
    pub features: Value,
    pub pricing: Value,
    pub sentiment: Value,
    pub ratings: Value,
    pub competitors: Value,
    pub company: Value,
    pub confidence_scores: Value,
    pub research_gaps: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DraftRecord {
    pub tool_id: String,
    pub slug: String,
    pub front_matter: String,
    pub body: String,
    pub status: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiTokenRecord {
    pub id: String,
    pub name: String,
    pub created_at: String,
}

/// Parse a JSON text column; malformed payloads read back as absent.
pub(super) fn json_column(raw: Option<String>) -> Option<Value> {
    raw.and_then(|text| serde_json::from_str(&text).ok())
}

pub(super) fn string_list_column(raw: String) -> Vec<String> {
    serde_json::from_str(&raw).unwrap_or_default()
}
