use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// On-store DSP definition document, one JSON file per DSP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DspInfo {
    pub dsp_id: String,
    #[serde(default)]
    pub dsp_name: String,
    #[serde(default)]
    pub status: DspStatus,
    #[serde(default)]
    pub qps_limit: u32,
    #[serde(default)]
    pub budget_daily_micros: i64,
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default)]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targeting: Option<DspTargeting>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

fn default_timeout_ms() -> u64 {
    2000
}
fn default_retry_count() -> u32 {
    2
}
fn default_retry_delay_ms() -> u64 {
    100
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DspStatus {
    Active,
    #[default]
    Inactive,
    Blocked,
}

impl DspStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, DspStatus::Active)
    }
}

/// A bidder matches a request iff at least one of its clauses matches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DspTargeting {
    #[serde(alias = "indexingdoc")]
    pub clauses: Vec<TargetingClause>,
}

/// One conjunction of conditions: every condition must hold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetingClause {
    #[serde(default)]
    pub clause_id: String,
    #[serde(default)]
    pub description: String,
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    #[serde(rename = "operator")]
    pub op: Operator,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "EQ")]
    Eq,
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "NOT_IN")]
    NotIn,
    #[serde(rename = "GT")]
    Gt,
    #[serde(rename = "LT")]
    Lt,
}

impl DspInfo {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Change detection for the scan loop. Fields outside this set
    /// (display name, updated_at, version) do not force a rebuild.
    pub fn materially_differs(&self, other: &DspInfo) -> bool {
        self.status != other.status
            || self.qps_limit != other.qps_limit
            || self.budget_daily_micros != other.budget_daily_micros
            || self.endpoint != other.endpoint
            || self.targeting != other.targeting
    }
}
