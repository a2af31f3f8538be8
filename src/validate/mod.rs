//! Static SQL safety validation
//!
//! The sole gate between model-generated SQL and the database. Validation is
//! total, deterministic, and side-effect-free: statement-shape checks, a
//! forbidden-keyword scan, view allowlist enforcement, automatic LIMIT
//! injection, and a narrow masked-column rewrite.
//!
//! This is bounded textual analysis, not SQL parsing. Two limitations are
//! accepted behavior, not bugs to fix silently: the keyword scan matches
//! whole words anywhere in the statement, so a string literal like `'update'`
//! is rejected (false positive); and the allowlist check is substring-based,
//! so an entry `v_sales` also admits `v_sales_legacy_unrestricted` (false
//! allow). Callers own their allowlist entries accordingly.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};

/// Keywords rejected as whole words anywhere in a candidate statement.
pub const FORBIDDEN_KEYWORDS: [&str; 10] = [
    "insert", "update", "delete", "drop", "alter", "create", "grant", "revoke", "truncate", "copy",
];

/// Rows cap appended when the statement carries no LIMIT of its own.
pub const DEFAULT_ROW_LIMIT: u32 = 200;

static VIEW_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\b(?:from|join)\s+([a-zA-Z0-9_."]+)"#).unwrap());

static CTE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:\bwith\b(?:\s+recursive)?\s+|,\s*)([a-zA-Z_][a-zA-Z0-9_]*)\s+as\s*\(")
        .unwrap()
});

static LIMIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\blimit\s+\d+\b").unwrap());

static FORBIDDEN_RES: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    FORBIDDEN_KEYWORDS
        .iter()
        .map(|kw| (*kw, Regex::new(&format!(r"\b{kw}\b")).unwrap()))
        .collect()
});

// Masked-customer column rewrites. `_` is a word character, so the trailing
// \b cannot match inside an already-masked name; qualified forms rewrite
// first so the bare patterns only see what is left.
static QUALIFIED_FIRST_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([a-zA-Z_][a-zA-Z0-9_]*)\.first_name\b").unwrap());
static QUALIFIED_LAST_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([a-zA-Z_][a-zA-Z0-9_]*)\.last_name\b").unwrap());
static BARE_FIRST_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bfirst_name\b").unwrap());
static BARE_LAST_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\blast_name\b").unwrap());

/// The only SQL form allowed to reach execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedQuery {
    /// Normalized single statement with a guaranteed LIMIT and masked columns.
    pub sql: String,

    /// Referenced relations in order of first appearance, extracted before
    /// masking (masking never changes table references).
    pub views_used: Vec<String>,
}

/// Extract relation identifiers following FROM/JOIN, unquoted and lowercased,
/// in order of first appearance.
pub fn extract_views(sql: &str) -> Vec<String> {
    VIEW_RE
        .captures_iter(sql)
        .filter_map(|cap| {
            let name = cap[1].replace('"', "").trim().to_lowercase();
            if name.is_empty() {
                None
            } else {
                Some(name)
            }
        })
        .collect()
}

/// Extract locally defined CTE names; they are not externally addressable
/// relations and are exempt from allowlist enforcement.
pub fn extract_cte_names(sql: &str) -> HashSet<String> {
    CTE_RE
        .captures_iter(sql)
        .filter_map(|cap| {
            let name = cap[1].trim().to_lowercase();
            if name.is_empty() {
                None
            } else {
                Some(name)
            }
        })
        .collect()
}

/// Validate a candidate statement against the allowlist.
///
/// Checks run in order and the first failure wins: whitespace normalization,
/// statement count, statement kind, forbidden keywords, allowlist, LIMIT
/// injection, masked-column rewrite. Accepted output re-validates to itself.
pub fn validate_sql(query: &str, allowed_views: &[String]) -> Result<ValidatedQuery> {
    let mut normalized = query.split_whitespace().collect::<Vec<_>>().join(" ");

    let semicolons = normalized.matches(';').count();
    if semicolons > 1 {
        return Err(Error::Validation(
            "Only single SQL statement is allowed.".to_string(),
        ));
    }
    if semicolons == 1 && !normalized.ends_with(';') {
        return Err(Error::Validation(
            "Semicolon is allowed only at query end.".to_string(),
        ));
    }
    if normalized.ends_with(';') {
        normalized.pop();
        normalized = normalized.trim().to_string();
    }

    let lowered = normalized.to_lowercase();
    if !(lowered.starts_with("select ") || lowered.starts_with("with ")) {
        return Err(Error::Validation(
            "Only SELECT/CTE queries are allowed.".to_string(),
        ));
    }

    for (keyword, re) in FORBIDDEN_RES.iter() {
        if re.is_match(&lowered) {
            return Err(Error::Validation(format!("Forbidden SQL keyword: {keyword}")));
        }
    }

    let views_used = extract_views(&normalized);
    let cte_names = extract_cte_names(&normalized);
    let allowed_lower: Vec<String> = allowed_views.iter().map(|v| v.to_lowercase()).collect();
    for view_name in &views_used {
        if cte_names.contains(view_name) {
            continue;
        }
        if !allowed_lower.iter().any(|allowed| view_name.contains(allowed)) {
            return Err(Error::Validation(format!("View not allowed: {view_name}")));
        }
    }

    if !LIMIT_RE.is_match(&lowered) {
        normalized = format!("{normalized} LIMIT {DEFAULT_ROW_LIMIT}");
    }

    let sql = apply_known_view_fixes(&normalized);

    Ok(ValidatedQuery { sql, views_used })
}

/// Rewrite raw customer-name columns to their masked equivalents when the
/// statement touches the masked customer view. Repairs a common, benign
/// model mistake instead of failing the request.
pub fn apply_known_view_fixes(sql: &str) -> String {
    if !sql.to_lowercase().contains("v_customer_masked") {
        return sql.to_string();
    }
    let fixed = QUALIFIED_FIRST_NAME_RE.replace_all(sql, "${1}.first_name_masked");
    let fixed = QUALIFIED_LAST_NAME_RE.replace_all(&fixed, "${1}.last_name_masked");
    let fixed = BARE_FIRST_NAME_RE.replace_all(&fixed, "first_name_masked");
    let fixed = BARE_LAST_NAME_RE.replace_all(&fixed, "last_name_masked");
    fixed.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allow(views: &[&str]) -> Vec<String> {
        views.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_accepts_simple_select_and_injects_limit() {
        let out = validate_sql(
            "SELECT customer_id FROM v_payment_scoped",
            &allow(&["v_payment_scoped"]),
        )
        .unwrap();
        assert_eq!(out.sql, "SELECT customer_id FROM v_payment_scoped LIMIT 200");
        assert_eq!(out.views_used, vec!["v_payment_scoped"]);
    }

    #[test]
    fn test_existing_limit_is_preserved() {
        let sql = "SELECT customer_id, SUM(amount) AS total_amount FROM v_payment_scoped \
                   GROUP BY customer_id ORDER BY total_amount DESC LIMIT 10";
        let out = validate_sql(sql, &allow(&["v_payment_scoped"])).unwrap();
        assert_eq!(out.sql, sql);
    }

    #[test]
    fn test_validation_is_idempotent() {
        let first = validate_sql(
            "select c.first_name, c.last_name from v_customer_masked c",
            &allow(&["v_customer_masked"]),
        )
        .unwrap();
        let second = validate_sql(&first.sql, &allow(&["v_customer_masked"])).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_multiple_statements_rejected_before_keyword_scan() {
        let err = validate_sql(
            "SELECT * FROM v_payment_scoped; DROP TABLE v_payment_scoped",
            &allow(&["v_payment_scoped"]),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Only single SQL statement is allowed.");
    }

    #[test]
    fn test_mid_query_semicolon_rejected() {
        let err = validate_sql(
            "SELECT 1; SELECT 2 FROM v_payment_scoped",
            &allow(&["v_payment_scoped"]),
        )
        .unwrap_err();
        // Two semicolon-free statements joined by one separator: the single
        // semicolon sits mid-text, not at the end.
        assert_eq!(err.to_string(), "Semicolon is allowed only at query end.");
    }

    #[test]
    fn test_trailing_semicolon_stripped() {
        let out = validate_sql(
            "SELECT customer_id FROM v_payment_scoped LIMIT 5;",
            &allow(&["v_payment_scoped"]),
        )
        .unwrap();
        assert_eq!(out.sql, "SELECT customer_id FROM v_payment_scoped LIMIT 5");
    }

    #[test]
    fn test_non_select_rejected() {
        let err = validate_sql(
            "UPDATE v_payment_scoped SET amount = 0",
            &allow(&["v_payment_scoped"]),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Only SELECT/CTE queries are allowed.");
    }

    #[test]
    fn test_forbidden_keyword_in_subquery_rejected() {
        let err = validate_sql(
            "SELECT * FROM v_payment_scoped WHERE id IN (DELETE FROM x RETURNING id)",
            &allow(&["v_payment_scoped"]),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Forbidden SQL keyword: delete");
    }

    #[test]
    fn test_keyword_in_string_literal_is_a_known_false_positive() {
        // Textual scan, no literal awareness: this rejection is accepted
        // behavior.
        let err = validate_sql(
            "SELECT * FROM v_payment_scoped WHERE note = 'update'",
            &allow(&["v_payment_scoped"]),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Forbidden SQL keyword: update");
    }

    #[test]
    fn test_disallowed_view_rejected_by_name() {
        let err = validate_sql(
            "SELECT * FROM v_staff_private",
            &allow(&["v_payment_scoped"]),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "View not allowed: v_staff_private");
    }

    #[test]
    fn test_substring_allowlist_is_a_known_false_allow() {
        // An allowlist root admits any relation containing it.
        let out = validate_sql(
            "SELECT * FROM v_sales_legacy_unrestricted",
            &allow(&["v_sales"]),
        )
        .unwrap();
        assert_eq!(out.views_used, vec!["v_sales_legacy_unrestricted"]);
    }

    #[test]
    fn test_empty_allowlist_rejects_all_views() {
        let err = validate_sql("SELECT * FROM v_payment_scoped", &[]).unwrap_err();
        assert_eq!(err.to_string(), "View not allowed: v_payment_scoped");
    }

    #[test]
    fn test_cte_names_exempt_from_allowlist() {
        let out = validate_sql(
            "WITH recent AS (SELECT customer_id FROM v_payment_scoped), ranked AS (SELECT * FROM recent) SELECT * FROM ranked JOIN v_payment_scoped p ON p.customer_id = ranked.customer_id",
            &allow(&["v_payment_scoped"]),
        )
        .unwrap();
        assert_eq!(
            out.views_used,
            vec!["v_payment_scoped", "recent", "ranked", "v_payment_scoped"]
        );
    }

    #[test]
    fn test_with_recursive_cte_detected() {
        let names = extract_cte_names(
            "WITH RECURSIVE tree AS (SELECT 1) SELECT * FROM tree",
        );
        assert!(names.contains("tree"));
    }

    #[test]
    fn test_quoted_identifiers_unquoted() {
        let views = extract_views(r#"SELECT * FROM "v_payment_scoped" JOIN public.v_rental_scoped r ON true"#);
        assert_eq!(views, vec!["v_payment_scoped", "public.v_rental_scoped"]);
    }

    #[test]
    fn test_schema_qualified_view_passes_allowlist() {
        let out = validate_sql(
            "SELECT * FROM public.v_payment_scoped",
            &allow(&["v_payment_scoped"]),
        )
        .unwrap();
        assert_eq!(out.views_used, vec!["public.v_payment_scoped"]);
    }

    #[test]
    fn test_whitespace_normalization() {
        let out = validate_sql(
            "SELECT\tcustomer_id\n  FROM   v_payment_scoped\n",
            &allow(&["v_payment_scoped"]),
        )
        .unwrap();
        assert_eq!(out.sql, "SELECT customer_id FROM v_payment_scoped LIMIT 200");
    }

    #[test]
    fn test_masking_qualified_columns() {
        let out = validate_sql(
            "SELECT c.first_name, c.last_name FROM v_customer_masked c",
            &allow(&["v_customer_masked"]),
        )
        .unwrap();
        assert_eq!(
            out.sql,
            "SELECT c.first_name_masked, c.last_name_masked FROM v_customer_masked c LIMIT 200"
        );
        assert_eq!(out.views_used, vec!["v_customer_masked"]);
    }

    #[test]
    fn test_masking_bare_columns() {
        let out = validate_sql(
            "SELECT first_name FROM v_customer_masked",
            &allow(&["v_customer_masked"]),
        )
        .unwrap();
        assert_eq!(out.sql, "SELECT first_name_masked FROM v_customer_masked LIMIT 200");
    }

    #[test]
    fn test_masking_never_doubles() {
        let sql = "SELECT c.first_name_masked FROM v_customer_masked c LIMIT 5";
        assert_eq!(apply_known_view_fixes(sql), sql);
    }

    #[test]
    fn test_masking_only_applies_to_masked_view() {
        let out = validate_sql(
            "SELECT first_name FROM v_staff_scoped",
            &allow(&["v_staff_scoped"]),
        )
        .unwrap();
        assert_eq!(out.sql, "SELECT first_name FROM v_staff_scoped LIMIT 200");
    }
}
