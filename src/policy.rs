//! Policy Configuration
//!
//! Static allowlists/blocklists and limits governing validation. A policy
//! is built once at startup (from code, or from a JSON file) and never
//! mutated afterwards; hot reload means constructing a fresh
//! [`crate::SqlGuard`] and swapping it atomically (e.g. behind an
//! `arc_swap`-style handle or a plain `Arc` replacement).

use crate::error::PolicyError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Static configuration for the SQL Guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardPolicy {
    /// Fully-qualified table names the FROM clause may reference
    /// (an optional schema prefix is part of the name, e.g. `mart.daily_campaign_kpi`).
    pub allowed_tables: HashSet<String>,

    /// Per-table column allowlist. `None` disables column checking for
    /// that table (table-level restriction only).
    pub allowed_columns: HashMap<String, Option<HashSet<String>>>,

    /// Whole-word, case-insensitive keywords that are fatal anywhere in
    /// the statement (DDL/DML, procedural and filesystem-affecting verbs).
    pub block_patterns: Vec<String>,

    /// Whether a bare `join` keyword is sufficient to reject.
    #[serde(default = "default_disallow_join")]
    pub disallow_join: bool,

    /// LIMIT injected when the statement has none.
    #[serde(default = "default_default_limit")]
    pub default_limit: u64,

    /// Cap applied to an explicitly supplied LIMIT.
    #[serde(default = "default_max_limit")]
    pub max_limit: u64,
}

fn default_disallow_join() -> bool {
    true
}

fn default_default_limit() -> u64 {
    1000
}

fn default_max_limit() -> u64 {
    5000
}

impl GuardPolicy {
    /// Load a policy from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Parse a policy from a JSON string.
    pub fn from_json_str(raw: &str) -> Result<Self, PolicyError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Column allowlist entry for a table, if any.
    pub fn columns_for(&self, table: &str) -> Option<&HashSet<String>> {
        self.allowed_columns.get(table).and_then(|c| c.as_ref())
    }
}

impl Default for GuardPolicy {
    /// Policy for the marketing KPI deployment: two mart tables plus the
    /// latest-insight view, DuckDB-oriented blocked verbs, JOIN disabled.
    fn default() -> Self {
        let kpi_columns: HashSet<String> = [
            "event_date",
            "campaign_id",
            "impressions",
            "clicks",
            "conversions",
            "ctr",
            "cvr",
            "ad_cost",
            "ad_revenue",
            "payments_total",
            "payments_success",
            "payments_failed",
            "payment_success_rate",
            "pay_amount_success",
        ]
        .into_iter()
        .map(str::to_string)
        .collect();

        let insight_columns: HashSet<String> = [
            "event_date",
            "headline",
            "risk_level",
            "summary_md",
            "created_at",
        ]
        .into_iter()
        .map(str::to_string)
        .collect();

        let mut allowed_columns = HashMap::new();
        allowed_columns.insert("mart.daily_campaign_kpi".to_string(), Some(kpi_columns));
        allowed_columns.insert(
            "mart_daily_insight".to_string(),
            Some(insight_columns.clone()),
        );
        allowed_columns.insert(
            "mart_daily_insight_latest".to_string(),
            Some(insight_columns),
        );

        Self {
            allowed_tables: [
                "mart.daily_campaign_kpi",
                "mart_daily_insight",
                "mart_daily_insight_latest",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            allowed_columns,
            block_patterns: [
                "insert", "update", "delete", "merge", "drop", "create", "alter", "truncate",
                "grant", "revoke", "copy", "export", "import", "attach", "detach", "pragma",
                "call", "execute",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            disallow_join: true,
            default_limit: 1000,
            max_limit: 5000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_tables() {
        let policy = GuardPolicy::default();
        assert!(policy.allowed_tables.contains("mart.daily_campaign_kpi"));
        assert!(policy.allowed_tables.contains("mart_daily_insight"));
        assert!(policy.disallow_join);
        assert_eq!(policy.default_limit, 1000);
        assert_eq!(policy.max_limit, 5000);
    }

    #[test]
    fn test_columns_for() {
        let policy = GuardPolicy::default();
        let cols = policy.columns_for("mart.daily_campaign_kpi").unwrap();
        assert!(cols.contains("ad_revenue"));
        assert!(policy.columns_for("nonexistent").is_none());
    }

    #[test]
    fn test_from_json_str_with_defaults() {
        let policy = GuardPolicy::from_json_str(
            r#"{
                "allowed_tables": ["sales.orders"],
                "allowed_columns": {"sales.orders": null},
                "block_patterns": ["insert", "delete"]
            }"#,
        )
        .unwrap();
        assert!(policy.allowed_tables.contains("sales.orders"));
        assert!(policy.columns_for("sales.orders").is_none());
        // serde defaults
        assert!(policy.disallow_join);
        assert_eq!(policy.default_limit, 1000);
        assert_eq!(policy.max_limit, 5000);
    }

    #[test]
    fn test_from_json_str_rejects_garbage() {
        assert!(GuardPolicy::from_json_str("not json").is_err());
    }
}
