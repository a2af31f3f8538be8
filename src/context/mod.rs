//! Prompt-context assembly
//!
//! Merges retrieved documents, session-memory notes, and a small table of
//! canonical-query hints into one prompt context. The output formats are
//! fixed strings consumed by downstream prompts and must not drift.
//!
//! The widget preference computed here is advisory only and never touches
//! the safety-critical path.

use crate::index::RetrievedDocument;

/// Preview length for schema summary lines
const SCHEMA_PREVIEW_CHARS: usize = 300;

/// Preview length for knowledge summary lines
const KNOWLEDGE_PREVIEW_CHARS: usize = 280;

/// Summarize retrieved documents, one attributed line per document.
pub fn schema_summary(docs: &[RetrievedDocument]) -> String {
    if docs.is_empty() {
        return "No RAG context documents available.".to_string();
    }
    docs.iter()
        .map(|d| {
            format!(
                "- [{}] {}: {}",
                d.doc_type,
                d.source,
                truncate(&d.content, SCHEMA_PREVIEW_CHARS)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Summarize knowledge documents only.
pub fn knowledge_summary(docs: &[RetrievedDocument]) -> String {
    let lines: Vec<String> = docs
        .iter()
        .filter(|d| d.doc_type == "knowledge")
        .map(|d| {
            format!(
                "[{}] {}: {}",
                d.doc_type,
                d.source,
                truncate(&d.content, KNOWLEDGE_PREVIEW_CHARS)
            )
        })
        .collect();

    if lines.is_empty() {
        "No knowledge docs found.".to_string()
    } else {
        lines.join("\n")
    }
}

/// Build the full prompt context from documents and session-memory notes.
pub fn assemble(docs: &[RetrievedDocument], memory_notes: &str) -> String {
    let mut context = format!("{}\nKnowledge:\n{}", schema_summary(docs), knowledge_summary(docs));
    if !memory_notes.is_empty() {
        context = format!("{}\nTeam memory:\n{}", context, memory_notes);
    }
    context
}

/// Canonical-query hints for known question shapes.
///
/// Advisory text embedded into the prompt to bias the model toward a
/// known-safe query; hints never bypass validation. Allowlist checks here
/// are exact case-insensitive membership, unlike the validator's substring
/// rule.
pub fn canonical_hints(question: &str, allowed_views: &[String]) -> Vec<String> {
    let q = question.to_lowercase();
    let allowed_lower: Vec<String> = allowed_views.iter().map(|v| v.to_lowercase()).collect();
    let mut hints = Vec::new();

    if (q.contains("top 10 customers") || q.contains("top customers"))
        && allowed_lower.iter().any(|v| v == "v_payment_scoped")
    {
        hints.push(
            "SELECT customer_id, SUM(amount) AS total_amount FROM v_payment_scoped \
             GROUP BY customer_id ORDER BY total_amount DESC LIMIT 10"
                .to_string(),
        );
    }

    if (q.contains("rental count by name") || q.contains("rentals by name"))
        && allowed_lower.iter().any(|v| v == "v_rental_scoped")
        && allowed_lower.iter().any(|v| v == "v_customer_masked")
    {
        hints.push(
            "SELECT c.first_name_masked, c.last_name_masked, COUNT(*) AS rental_count \
             FROM v_rental_scoped r JOIN v_customer_masked c ON c.customer_id = r.customer_id \
             GROUP BY c.first_name_masked, c.last_name_masked ORDER BY rental_count DESC LIMIT 20"
                .to_string(),
        );
    }

    hints
}

/// Derive an advisory chart-type preference from widget-policy documents.
pub fn widget_preference(question: &str, docs: &[RetrievedDocument]) -> Option<&'static str> {
    let q = question.to_lowercase();
    let policy_text = docs
        .iter()
        .filter(|d| d.doc_type.to_lowercase() == "widget_policy")
        .map(|d| d.content.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");

    if (q.contains("trend") || q.contains("daily") || q.contains("over time") || q.contains("time series"))
        && policy_text.contains("line")
    {
        return Some("line");
    }
    if (q.contains("top") || q.contains("rank") || q.contains("leaderboard") || q.contains("compare"))
        && policy_text.contains("bar")
    {
        return Some("bar");
    }
    if (q.contains("share") || q.contains("split") || q.contains("proportion") || q.contains("distribution"))
        && policy_text.contains("pie")
    {
        return Some("pie");
    }
    None
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(doc_type: &str, source: &str, content: &str) -> RetrievedDocument {
        RetrievedDocument {
            id: "1".to_string(),
            doc_type: doc_type.to_string(),
            source: source.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn test_schema_summary_formats_and_truncates() {
        let long = "x".repeat(400);
        let docs = vec![doc("schema", "views.md", &long)];
        let summary = schema_summary(&docs);
        assert!(summary.starts_with("- [schema] views.md: "));
        assert_eq!(summary.len(), "- [schema] views.md: ".len() + 300);
    }

    #[test]
    fn test_empty_docs_fallbacks() {
        assert_eq!(schema_summary(&[]), "No RAG context documents available.");
        assert_eq!(knowledge_summary(&[]), "No knowledge docs found.");
    }

    #[test]
    fn test_knowledge_summary_filters_doc_type() {
        let docs = vec![
            doc("schema", "views.md", "schema body"),
            doc("knowledge", "notes.md", "knowledge body"),
        ];
        let summary = knowledge_summary(&docs);
        assert_eq!(summary, "[knowledge] notes.md: knowledge body");
    }

    #[test]
    fn test_assemble_with_and_without_notes() {
        let docs = vec![doc("schema", "views.md", "body")];
        let without = assemble(&docs, "");
        assert!(without.contains("Knowledge:"));
        assert!(!without.contains("Team memory:"));

        let with = assemble(&docs, "Previous answer style: short");
        assert!(with.ends_with("Team memory:\nPrevious answer style: short"));
    }

    #[test]
    fn test_top_customers_hint_requires_allowlisted_view() {
        let allowed = vec!["v_payment_scoped".to_string()];
        let hints = canonical_hints("show me top customers", &allowed);
        assert_eq!(hints.len(), 1);
        assert!(hints[0].contains("FROM v_payment_scoped"));

        // Same question without the view in scope: no hint.
        assert!(canonical_hints("show me top customers", &[]).is_empty());
    }

    #[test]
    fn test_rental_hint_requires_both_views() {
        let both = vec!["v_rental_scoped".to_string(), "v_customer_masked".to_string()];
        assert_eq!(canonical_hints("rental count by name", &both).len(), 1);

        let one = vec!["v_rental_scoped".to_string()];
        assert!(canonical_hints("rental count by name", &one).is_empty());
    }

    #[test]
    fn test_hint_allowlist_membership_is_exact() {
        // The validator's substring rule does not apply here.
        let prefixed = vec!["v_payment_scoped_v2".to_string()];
        assert!(canonical_hints("top customers", &prefixed).is_empty());
    }

    #[test]
    fn test_widget_preference_matches_question_and_policy() {
        let docs = vec![doc("widget_policy", "policy.md", "Prefer line charts for trends")];
        assert_eq!(widget_preference("daily revenue trend", &docs), Some("line"));
        assert_eq!(widget_preference("revenue share by store", &docs), None);

        let pie_docs = vec![doc("widget_policy", "policy.md", "use pie for shares")];
        assert_eq!(widget_preference("revenue share by store", &pie_docs), Some("pie"));
    }

    #[test]
    fn test_widget_preference_ignores_non_policy_docs() {
        let docs = vec![doc("knowledge", "notes.md", "line charts are great")];
        assert_eq!(widget_preference("daily trend", &docs), None);
    }
}
