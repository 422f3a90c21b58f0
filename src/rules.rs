//! Delivery rule matching.
//!
//! A rule matches a document when every tag name it lists resolves to a tag
//! the document carries (conjunction), and each of its optional
//! correspondent / document-type / storage-path predicates equals the
//! document's resolved value exactly. Unset predicates are wildcards.
//! Matching is pure: no side effects, safe to re-run.

use tracing::debug;

use crate::backend::types::Document;
use crate::backend::Snapshot;
use crate::config::RuleConfig;

/// Evaluates the configured rules against documents, in declaration order.
/// Rules are validated at config load; a rule with no predicates never
/// reaches this engine.
pub struct RuleEngine {
    rules: Vec<RuleConfig>,
}

impl RuleEngine {
    pub fn new(rules: Vec<RuleConfig>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[RuleConfig] {
        &self.rules
    }

    /// All rules the document satisfies, in declaration order. A document
    /// can fan out to several rules; the caller delivers for each.
    pub fn matching<'a>(&'a self, document: &Document, snapshot: &Snapshot) -> Vec<&'a RuleConfig> {
        self.rules
            .iter()
            .filter(|rule| {
                let matched = rule_matches(document, rule, snapshot);
                if matched {
                    debug!(
                        document_id = document.id,
                        rule = %rule.name,
                        "Document matched rule"
                    );
                }
                matched
            })
            .collect()
    }
}

/// Does `document` satisfy `rule` under the entities in `snapshot`?
pub fn rule_matches(document: &Document, rule: &RuleConfig, snapshot: &Snapshot) -> bool {
    let document_tags = snapshot.tag_names(&document.tag_ids);
    if !rule
        .tags
        .iter()
        .all(|required| document_tags.iter().any(|t| t == required))
    {
        return false;
    }

    if let Some(required) = rule.correspondent.as_deref() {
        let resolved = document
            .correspondent_id
            .and_then(|id| snapshot.correspondent(id));
        if resolved.is_none_or(|c| c.name != required) {
            return false;
        }
    }

    if let Some(required) = rule.document_type.as_deref() {
        let resolved = document
            .document_type_id
            .and_then(|id| snapshot.document_type(id));
        if resolved.is_none_or(|d| d.name != required) {
            return false;
        }
    }

    if let Some(required) = rule.storage_path.as_deref() {
        let resolved = document
            .storage_path_id
            .and_then(|id| snapshot.storage_path(id));
        if resolved.is_none_or(|s| s.name != required) {
            return false;
        }
    }

    true
}
