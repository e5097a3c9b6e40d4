//! SQL Guard pipeline
//!
//! Validates and normalizes candidate SQL produced by an LLM before it is
//! handed to a read-only query engine. The pipeline is a fixed sequence of
//! narrowly-scoped stages over a canonicalized string; the stage order is
//! part of the safety contract (multi-statement detection must see the raw
//! separators, limit enforcement must run after every rejection check).
//!
//! Known soundness gap: the guard is string-literal-unaware. A `;` inside a
//! quoted literal falsely rejects as `MultiStatement` (over-blocking), and
//! a `--` comment marker is not special-cased. A stricter revision should
//! tokenize with literal awareness before the keyword/separator scans.

use crate::error::{GuardError, PolicyError, Result};
use crate::policy::GuardPolicy;
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::{Regex, RegexBuilder};
use std::collections::HashSet;
use tracing::{debug, warn};

lazy_static! {
    // sql-tagged documentation fence, first match wins
    static ref RE_FENCE: Regex = RegexBuilder::new(r"```sql\s*(.*?)```")
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
        .unwrap();
    static ref RE_WS: Regex = Regex::new(r"\s+").unwrap();
    static ref RE_JOIN: Regex = Regex::new(r"\bjoin\b").unwrap();
    // table identifier after FROM: letters/digits/underscore, at most one schema dot
    static ref RE_FROM_TABLE: Regex =
        Regex::new(r"\bfrom\s+([a-z0-9_]+(?:\.[a-z0-9_]+)?)").unwrap();
    // comma right after the FROM identifier: a comma-separated source list
    // is an implicit join, and only the first identifier would be checked
    static ref RE_FROM_LIST: Regex = Regex::new(r"\bfrom\s+[a-z0-9_.]+\s*,").unwrap();
    static ref RE_PROJECTION: Regex = Regex::new(r"\bselect\s+(.*?)\s+from\b").unwrap();
    static ref RE_ALIAS: Regex = Regex::new(r"\bas\s+[a-z0-9_]+\b").unwrap();
    static ref RE_IDENT: Regex = Regex::new(r"[a-z_][a-z0-9_]*").unwrap();
    static ref RE_LIMIT_WORD: Regex = Regex::new(r"\blimit\b").unwrap();
    static ref RE_LIMIT_VALUE: Regex = Regex::new(r"\blimit\s+(\d+)").unwrap();
    static ref RE_LIMIT_CLAUSE_CI: Regex = RegexBuilder::new(r"\blimit\s+\d+")
        .case_insensitive(true)
        .build()
        .unwrap();
}

/// Aggregate/conditional function names that show up as tokens in a
/// projection list but are never column references.
const FUNCTION_TOKENS: &[&str] = &[
    "sum", "avg", "min", "max", "count", "distinct", "case", "when", "then", "else", "end",
];

/// SQL keywords the lossy identifier scan can pick up.
const KEYWORD_TOKENS: &[&str] = &[
    "select", "from", "where", "between", "and", "or", "order", "by", "limit", "asc", "desc",
];

/// Unknown-token count at which the projection is rejected. The extraction
/// is lossy, so a single stray token must not block a legitimate query.
const SUSPICION_THRESHOLD: usize = 3;

/// Cap on the suspicious tokens carried in the rejection, for diagnostics.
const DIAG_TOKEN_LIMIT: usize = 10;

/// Validates candidate SQL against an immutable [`GuardPolicy`].
///
/// Construction compiles the policy once (case-folded allowlists, blocked
/// keywords as whole-word patterns); [`SqlGuard::validate`] is then a pure
/// function of its input, safe to call concurrently without locking. Hot
/// reload is an atomic swap of the whole guard, never an in-place edit.
pub struct SqlGuard {
    policy: GuardPolicy,
    blocked: Vec<(String, Regex)>,
}

impl SqlGuard {
    /// Compile a policy into a ready-to-use guard.
    pub fn new(policy: GuardPolicy) -> std::result::Result<Self, PolicyError> {
        // Fold the allowlists once so per-call comparisons stay exact.
        let folded = GuardPolicy {
            allowed_tables: policy
                .allowed_tables
                .iter()
                .map(|t| t.to_lowercase())
                .collect(),
            allowed_columns: policy
                .allowed_columns
                .iter()
                .map(|(table, cols)| {
                    (
                        table.to_lowercase(),
                        cols.as_ref()
                            .map(|set| set.iter().map(|c| c.to_lowercase()).collect()),
                    )
                })
                .collect(),
            block_patterns: policy
                .block_patterns
                .iter()
                .map(|p| p.trim().to_lowercase())
                .collect(),
            ..policy
        };

        let blocked = folded
            .block_patterns
            .iter()
            .map(|keyword| {
                let pattern = format!(r"\b{}\b", regex::escape(keyword));
                Regex::new(&pattern)
                    .map(|re| (keyword.clone(), re))
                    .map_err(|source| PolicyError::BadBlockPattern {
                        pattern: keyword.clone(),
                        source,
                    })
            })
            .collect::<std::result::Result<Vec<_>, PolicyError>>()?;

        Ok(Self {
            policy: folded,
            blocked,
        })
    }

    /// The compiled (case-folded) policy this guard enforces.
    pub fn policy(&self) -> &GuardPolicy {
        &self.policy
    }

    /// Validate and normalize one candidate query.
    ///
    /// On success returns a single-statement SQL string: original casing,
    /// whitespace collapsed, trailing semicolon stripped, LIMIT present and
    /// capped at the policy maximum. On failure returns one of the closed
    /// [`GuardError`] reasons; a rejected candidate produces nothing
    /// executable.
    pub fn validate(&self, raw: &str) -> Result<String> {
        let unfenced = strip_fence(raw);
        let trimmed = unfenced.trim();
        if trimmed.is_empty() {
            return Err(GuardError::EmptyInput);
        }

        // Separator scan runs before whitespace collapsing so no ';' is
        // accidentally consumed. One trailing ';' is a benign generator
        // artifact and is stripped.
        if has_multi_statement(trimmed) {
            warn!("rejected candidate SQL: non-trailing statement separator");
            return Err(GuardError::MultiStatement);
        }
        let single = strip_trailing_semicolon(trimmed);

        // `cleaned` is what gets returned; `folded` is for classification only.
        let cleaned = collapse_ws(single);
        let folded = cleaned.to_lowercase();

        // Blocked verbs are scanned before the statement-shape check so a
        // DML/DDL statement surfaces as the specific keyword rather than a
        // generic not-a-select. A blocked verb is fatal anywhere in the
        // text, including nested expressions, because the guard cannot
        // verify it is inert.
        for (keyword, re) in &self.blocked {
            if re.is_match(&folded) {
                warn!("rejected candidate SQL: blocked keyword '{}'", keyword);
                return Err(GuardError::BlockedKeyword {
                    keyword: keyword.clone(),
                });
            }
        }
        if !folded.starts_with("select ") {
            return Err(GuardError::NotASelect);
        }
        if self.policy.disallow_join
            && (RE_JOIN.is_match(&folded) || RE_FROM_LIST.is_match(&folded))
        {
            return Err(GuardError::JoinNotAllowed);
        }

        let table = extract_table(&folded)?;
        if !self.policy.allowed_tables.contains(&table) {
            warn!("rejected candidate SQL: table '{}' not in allowlist", table);
            return Err(GuardError::TableNotAllowed { table });
        }

        if let Some(allowed) = self.policy.columns_for(&table) {
            self.check_projection(&folded, &table, allowed)?;
        }

        Ok(self.enforce_limit(cleaned, &folded))
    }

    /// Best-effort column allowlist check over the projection list.
    ///
    /// The identifier scan is lossy (function arguments, expressions and
    /// aliases all leave tokens behind), so only an accumulation of unknown
    /// tokens rejects. A lone `*` projection is tolerated at this layer;
    /// blocking wildcard reads is the outer caller's policy choice.
    fn check_projection(
        &self,
        folded: &str,
        table: &str,
        allowed: &HashSet<String>,
    ) -> Result<()> {
        let tokens = match projection_tokens(folded) {
            Some(tokens) => tokens,
            None => return Ok(()),
        };

        let bare_table = table.rsplit('.').next().unwrap_or(table);
        let suspicious: Vec<String> = tokens
            .into_iter()
            .filter(|t| !FUNCTION_TOKENS.contains(&t.as_str()))
            .filter(|t| !KEYWORD_TOKENS.contains(&t.as_str()))
            .filter(|t| t != bare_table)
            .filter(|t| !allowed.contains(t))
            .collect();

        if suspicious.len() >= SUSPICION_THRESHOLD {
            let tokens: Vec<String> = suspicious
                .into_iter()
                .unique()
                .sorted()
                .take(DIAG_TOKEN_LIMIT)
                .collect();
            warn!("rejected candidate SQL: unknown column tokens {:?}", tokens);
            return Err(GuardError::TooManyUnknownColumns { tokens });
        }
        Ok(())
    }

    /// Guarantee a bounded result size. Runs last so a query that will be
    /// rejected is never needlessly rewritten.
    fn enforce_limit(&self, cleaned: String, folded: &str) -> String {
        if RE_LIMIT_WORD.is_match(folded) {
            if let Some(caps) = RE_LIMIT_VALUE.captures(folded) {
                if let Ok(value) = caps[1].parse::<u64>() {
                    if value > self.policy.max_limit {
                        debug!("clamping LIMIT {} to {}", value, self.policy.max_limit);
                        return RE_LIMIT_CLAUSE_CI
                            .replace(&cleaned, format!("LIMIT {}", self.policy.max_limit))
                            .into_owned();
                    }
                }
            }
            // Clause present but numeral missing or unparseable: the bound
            // requirement is already satisfied, fail open on the cap only.
            return cleaned;
        }
        debug!("appending default LIMIT {}", self.policy.default_limit);
        format!("{} LIMIT {}", cleaned, self.policy.default_limit)
    }
}

/// Extract the interior of a ```sql fence, or strip stray fence markers.
fn strip_fence(text: &str) -> String {
    if let Some(caps) = RE_FENCE.captures(text) {
        return caps[1].trim().to_string();
    }
    text.replace("```", "").trim().to_string()
}

/// True when a ';' remains after tolerating one trailing separator.
fn has_multi_statement(sql: &str) -> bool {
    let s = sql.trim();
    let s = s.strip_suffix(';').unwrap_or(s);
    s.contains(';')
}

fn strip_trailing_semicolon(sql: &str) -> &str {
    let s = sql.trim();
    match s.strip_suffix(';') {
        Some(rest) => rest.trim_end(),
        None => s,
    }
}

fn collapse_ws(s: &str) -> String {
    RE_WS.replace_all(s, " ").trim().to_string()
}

/// Token following the first FROM, taken as the referenced table.
fn extract_table(folded: &str) -> Result<String> {
    RE_FROM_TABLE
        .captures(folded)
        .map(|caps| caps[1].to_string())
        .ok_or(GuardError::MissingSource)
}

/// Identifier-like tokens from the projection list, order-preserving and
/// de-duplicated. `None` means the stage cannot or need not judge: wildcard
/// projection, or no SELECT..FROM slice to inspect.
fn projection_tokens(folded: &str) -> Option<Vec<String>> {
    let caps = RE_PROJECTION.captures(folded)?;
    let projection = caps[1].trim();
    if projection == "*" || projection.starts_with("* ") {
        return None;
    }

    // Comma split is not parenthesis-aware; commas inside function calls
    // produce extra fragments whose tokens are harvested all the same.
    let mut tokens: Vec<String> = Vec::new();
    for fragment in projection.split(',') {
        let fragment = RE_ALIAS.replace_all(fragment, "");
        for ident in RE_IDENT.find_iter(&fragment) {
            let ident = ident.as_str().to_string();
            if !tokens.contains(&ident) {
                tokens.push(ident);
            }
        }
    }
    Some(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_fence_tagged() {
        let text = "```sql\nSELECT 1\n```";
        assert_eq!(strip_fence(text), "SELECT 1");
    }

    #[test]
    fn test_strip_fence_tag_case_insensitive() {
        let text = "```SQL\nSELECT 1\n```";
        assert_eq!(strip_fence(text), "SELECT 1");
    }

    #[test]
    fn test_strip_fence_bare_markers() {
        assert_eq!(strip_fence("```\nSELECT 1\n```"), "SELECT 1");
        assert_eq!(strip_fence("SELECT 1"), "SELECT 1");
    }

    #[test]
    fn test_strip_fence_first_match_only() {
        let text = "```sql\nSELECT 1\n``` trailing ```sql\nSELECT 2\n```";
        assert_eq!(strip_fence(text), "SELECT 1");
    }

    #[test]
    fn test_multi_statement_detection() {
        assert!(!has_multi_statement("SELECT 1"));
        assert!(!has_multi_statement("SELECT 1;"));
        assert!(has_multi_statement("SELECT 1; SELECT 2"));
        assert!(has_multi_statement("SELECT 1;;"));
    }

    #[test]
    fn test_strip_trailing_semicolon() {
        assert_eq!(strip_trailing_semicolon("SELECT 1;"), "SELECT 1");
        assert_eq!(strip_trailing_semicolon("SELECT 1 ; "), "SELECT 1");
        assert_eq!(strip_trailing_semicolon("  SELECT 1 ;"), "SELECT 1");
        assert_eq!(strip_trailing_semicolon("SELECT 1"), "SELECT 1");
    }

    #[test]
    fn test_collapse_ws() {
        assert_eq!(collapse_ws("  a \n\t b   c "), "a b c");
    }

    #[test]
    fn test_extract_table_schema_qualified() {
        let table = extract_table("select * from mart.daily_campaign_kpi where x = 1").unwrap();
        assert_eq!(table, "mart.daily_campaign_kpi");
    }

    #[test]
    fn test_extract_table_at_most_one_dot() {
        // The second dot is not part of the identifier.
        let table = extract_table("select * from a.b.c").unwrap();
        assert_eq!(table, "a.b");
    }

    #[test]
    fn test_extract_table_missing_from() {
        assert_eq!(extract_table("select 1"), Err(GuardError::MissingSource));
    }

    #[test]
    fn test_projection_tokens_function_args() {
        let tokens =
            projection_tokens("select event_date, sum(ad_revenue) as rev from t").unwrap();
        assert!(tokens.contains(&"event_date".to_string()));
        assert!(tokens.contains(&"sum".to_string()));
        assert!(tokens.contains(&"ad_revenue".to_string()));
        // alias stripped before harvesting
        assert!(!tokens.contains(&"rev".to_string()));
    }

    #[test]
    fn test_projection_tokens_wildcard() {
        assert!(projection_tokens("select * from t").is_none());
        assert!(projection_tokens("select * from t where x = 1").is_none());
    }

    #[test]
    fn test_projection_tokens_deduplicated() {
        let tokens = projection_tokens("select a, a, a from t").unwrap();
        assert_eq!(tokens, vec!["a".to_string()]);
    }

    #[test]
    fn test_enforce_limit_appends_default() {
        let guard = SqlGuard::new(GuardPolicy::default()).unwrap();
        let cleaned = "SELECT * FROM mart_daily_insight".to_string();
        let folded = cleaned.to_lowercase();
        assert_eq!(
            guard.enforce_limit(cleaned, &folded),
            "SELECT * FROM mart_daily_insight LIMIT 1000"
        );
    }

    #[test]
    fn test_enforce_limit_keeps_small_value() {
        let guard = SqlGuard::new(GuardPolicy::default()).unwrap();
        let cleaned = "SELECT * FROM mart_daily_insight LIMIT 10".to_string();
        let folded = cleaned.to_lowercase();
        assert_eq!(
            guard.enforce_limit(cleaned.clone(), &folded),
            "SELECT * FROM mart_daily_insight LIMIT 10"
        );
    }

    #[test]
    fn test_enforce_limit_clamps_preserving_surroundings() {
        let guard = SqlGuard::new(GuardPolicy::default()).unwrap();
        let cleaned = "SELECT * FROM mart_daily_insight limit 999999 offset 5".to_string();
        let folded = cleaned.to_lowercase();
        assert_eq!(
            guard.enforce_limit(cleaned, &folded),
            "SELECT * FROM mart_daily_insight LIMIT 5000 offset 5"
        );
    }

    #[test]
    fn test_enforce_limit_fail_open_on_unparseable_numeral() {
        let guard = SqlGuard::new(GuardPolicy::default()).unwrap();
        // Does not fit in u64: clause presence already bounds the result.
        let cleaned =
            "SELECT * FROM mart_daily_insight LIMIT 99999999999999999999999".to_string();
        let folded = cleaned.to_lowercase();
        assert_eq!(guard.enforce_limit(cleaned.clone(), &folded), cleaned);
    }

    #[test]
    fn test_new_rejects_nothing_for_plain_keywords() {
        assert!(SqlGuard::new(GuardPolicy::default()).is_ok());
    }
}
