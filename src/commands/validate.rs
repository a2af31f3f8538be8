//! Validate command implementation

use crate::error::Result;
use crate::validate::{apply_known_view_fixes, validate_sql};
use serde::Serialize;

/// Validation result for CLI display
#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub sql: String,
    pub views_used: Vec<String>,
}

/// Run a SQL candidate through the full safety validator offline, including
/// the masked-view column rewrite.
pub fn cmd_validate(sql: &str, allowed_views: &[String]) -> Result<ValidationResult> {
    let validated = validate_sql(sql, allowed_views)?;
    let executable = apply_known_view_fixes(&validated.sql);
    Ok(ValidationResult {
        sql: executable,
        views_used: validated.views_used,
    })
}

pub fn print_validation_result(result: &ValidationResult) {
    println!("✓ SQL is valid");
    println!("  Views used: {}", result.views_used.join(", "));
    println!("  Executable SQL:\n    {}", result.sql);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn views() -> Vec<String> {
        vec![
            "v_payment_scoped".to_string(),
            "v_customer_masked".to_string(),
        ]
    }

    #[test]
    fn test_validate_appends_limit_and_reports_views() {
        let result =
            cmd_validate("SELECT customer_id FROM v_payment_scoped", &views()).unwrap();
        assert!(result.sql.ends_with("LIMIT 200"));
        assert_eq!(result.views_used, vec!["v_payment_scoped"]);
    }

    #[test]
    fn test_validate_applies_masking_rewrite() {
        let result = cmd_validate(
            "SELECT first_name FROM v_customer_masked",
            &views(),
        )
        .unwrap();
        assert!(result.sql.contains("first_name_masked"));
    }

    #[test]
    fn test_validate_rejects_out_of_scope_view() {
        let err = cmd_validate("SELECT * FROM staff_private", &views()).unwrap_err();
        assert_eq!(err.error_code(), "out_of_scope");
    }
}
