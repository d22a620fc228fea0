//! Property extractor (spec §5): computes the set of property paths the
//! active rule set actually reads, so the state builder can skip
//! re-evaluating rules when an update touches a property no rule cares
//! about.
//!
//! Relevance is ancestor/descendant-aware: a rule referencing `titles.eng`
//! is also relevant to an update of bare `titles` (a parent clobber) and to
//! `titles.eng.extra` (a child of the referenced path), not just to an exact
//! match.

use std::collections::HashSet;

use crate::metadata::normalize_property_path;
use crate::rules::{ConditionGroup, ConditionNode, RuleConfig};
use crate::template::Template;

/// The set of dot-normalized property paths referenced anywhere in a
/// [`RuleConfig`] — by its conditions or by its templates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyExtractor {
    referenced: HashSet<String>,
}

impl PropertyExtractor {
    /// Walks every rule's condition tree and template, plus the default
    /// rule's template, collecting referenced property paths. `filePath` is
    /// always included since it gates whether a file is projected at all.
    pub fn from_rule_config(config: &RuleConfig) -> Self {
        let mut referenced = HashSet::new();
        // Fixed core properties (spec §4.3): tracked unconditionally since
        // they gate visibility (`filePath`) or feed the typed snapshot every
        // rule can read from (`size`/`mtime`/`fileName`/...) regardless of
        // whether any rule's template or conditions name them explicitly.
        for core in ["filePath", "size", "fileSize", "sizeByte", "mtime", "ctime", "fileName", "extension"] {
            referenced.insert(core.to_string());
        }

        for rule in config.rules.iter().filter(|r| r.enabled) {
            collect_condition_paths(&rule.conditions, &mut referenced);
            if let Ok(template) = Template::parse(&rule.template) {
                for path in template.referenced_paths() {
                    referenced.insert(normalize_property_path(&path));
                }
            }
        }
        if let Some(default_rule) = &config.default_rule {
            collect_condition_paths(&default_rule.conditions, &mut referenced);
            if let Ok(template) = Template::parse(&default_rule.template) {
                for path in template.referenced_paths() {
                    referenced.insert(normalize_property_path(&path));
                }
            }
        }

        Self { referenced }
    }

    /// The full set of referenced property paths, for diagnostics
    /// (`GET /api/fuse/rules/variables`).
    pub fn referenced_paths(&self) -> impl Iterator<Item = &str> {
        self.referenced.iter().map(|s| s.as_str())
    }

    /// Whether an update to `changed_path` could affect rule evaluation:
    /// true if it is referenced exactly, is an ancestor of a referenced
    /// path, or is a descendant of one.
    pub fn is_relevant(&self, changed_path: &str) -> bool {
        let changed = normalize_property_path(changed_path);
        self.referenced.iter().any(|referenced| {
            *referenced == changed
                || referenced.starts_with(&format!("{changed}."))
                || changed.starts_with(&format!("{referenced}."))
        })
    }
}

fn collect_condition_paths(group: &ConditionGroup, out: &mut HashSet<String>) {
    for node in &group.conditions {
        match node {
            ConditionNode::Leaf(cond) => {
                out.insert(normalize_property_path(&cond.field));
            }
            ConditionNode::Group(nested) => collect_condition_paths(nested, out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_config_references_expected_paths() {
        let extractor = PropertyExtractor::from_rule_config(&RuleConfig::seed());
        assert!(extractor.is_relevant("filePath"));
        assert!(extractor.is_relevant("fileType"));
        assert!(extractor.is_relevant("season"));
        assert!(extractor.is_relevant("titles/eng"));
        assert!(extractor.is_relevant("fileName"));
    }

    #[test]
    fn ancestor_update_is_relevant_to_nested_reference() {
        let extractor = PropertyExtractor::from_rule_config(&RuleConfig::seed());
        // `titles` (bare) is an ancestor of the referenced `titles.eng`.
        assert!(extractor.is_relevant("titles"));
    }

    #[test]
    fn descendant_update_is_relevant_to_parent_reference() {
        let extractor = PropertyExtractor::from_rule_config(&RuleConfig::seed());
        // `title.sort` is a descendant of the referenced `title`.
        assert!(extractor.is_relevant("title/sort"));
    }

    #[test]
    fn unrelated_property_is_not_relevant() {
        let extractor = PropertyExtractor::from_rule_config(&RuleConfig::seed());
        assert!(!extractor.is_relevant("thumbnailHash"));
    }

    #[test]
    fn disabled_rule_does_not_contribute_its_fields() {
        let mut config = RuleConfig::seed();
        config.rules[0].enabled = false;
        config.rules.truncate(1);
        config.default_rule = None;
        // The only remaining rule, the disabled movie rule, referenced
        // `movieYear` in its template; disabled it should not show up.
        let extractor = PropertyExtractor::from_rule_config(&config);
        assert!(!extractor.is_relevant("movieYear"));
    }
}
