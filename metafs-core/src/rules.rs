//! Rule model and condition evaluator (spec §4): the typed shape of a rename
//! rule, and the logic that decides whether a rule's conditions match a
//! file's properties.
//!
//! Grounded in the `Rule`/`Conditions` shape used by file-organizing rule
//! engines in the wider Rust ecosystem (condition trees with AND/OR
//! composition over named fields), adapted here to operate over the
//! dot-normalized property paths this projection engine works with rather
//! than fixed filesystem-stat fields.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::metadata::PropertyLookup;
use crate::template::{render_sanitized, sanitize_path_segment, Template};

/// A single condition's comparison operator (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConditionOp {
    Exists,
    NotExists,
    Equals,
    NotEquals,
    Contains,
    Matches,
}

/// A leaf condition: a named property compared against an operator and an
/// optional value. `Exists`/`NotExists` ignore `value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub op: ConditionOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Compares two property-value strings under spec §4.2's coercion rules: if
/// the rule's `value` is the literal `true`/`false`, compare both sides as
/// booleans; else if it parses as a number, compare both sides numerically;
/// otherwise fall back to a plain string comparison.
fn coerced_equals(actual: &str, expected: &str) -> bool {
    if let Some(expected_bool) = parse_bool_literal(expected) {
        return parse_bool_literal(actual) == Some(expected_bool);
    }
    if let Ok(expected_num) = expected.parse::<f64>() {
        return actual.parse::<f64>().is_ok_and(|actual_num| actual_num == expected_num);
    }
    actual == expected
}

fn parse_bool_literal(s: &str) -> Option<bool> {
    match s {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

impl Condition {
    /// Evaluates this condition against a property source. A `Matches`
    /// condition with an invalid regex pattern fails softly (returns
    /// `false`) rather than propagating a parse error, so one malformed
    /// rule cannot take down evaluation for every file.
    pub fn evaluate(&self, props: &dyn PropertyLookup) -> bool {
        let actual = props.lookup(&self.field);
        match self.op {
            ConditionOp::Exists => actual.is_some(),
            ConditionOp::NotExists => actual.is_none(),
            ConditionOp::Equals => match (&actual, &self.value) {
                (Some(a), Some(v)) => coerced_equals(a, v),
                _ => false,
            },
            ConditionOp::NotEquals => match (&actual, &self.value) {
                (Some(a), Some(v)) => !coerced_equals(a, v),
                (None, Some(_)) => true,
                _ => false,
            },
            ConditionOp::Contains => match (&actual, &self.value) {
                (Some(a), Some(v)) => a.contains(v.as_str()),
                _ => false,
            },
            ConditionOp::Matches => match (&actual, &self.value) {
                (Some(a), Some(pattern)) => match Regex::new(pattern) {
                    Ok(re) => re.is_match(a),
                    Err(err) => {
                        tracing::warn!(
                            field = %self.field,
                            pattern = %pattern,
                            error = %err,
                            "MATCHES condition has an invalid regex; treating as non-match"
                        );
                        false
                    }
                },
                _ => false,
            },
        }
    }
}

/// How a [`ConditionGroup`]'s children combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupOp {
    And,
    Or,
}

/// A node in a condition tree: either a leaf [`Condition`] or a nested
/// [`ConditionGroup`]. Untagged so rule config files can write a bare
/// condition object or a `{ "op": ..., "conditions": [...] }` group
/// interchangeably wherever a condition is expected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionNode {
    Leaf(Condition),
    Group(ConditionGroup),
}

impl ConditionNode {
    pub fn evaluate(&self, props: &dyn PropertyLookup) -> bool {
        match self {
            ConditionNode::Leaf(cond) => cond.evaluate(props),
            ConditionNode::Group(group) => group.evaluate(props),
        }
    }
}

/// A group of conditions combined with AND/OR, recursively nestable via
/// [`ConditionNode::Group`] (spec §4.1, `ConditionGroup`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionGroup {
    pub op: GroupOp,
    pub conditions: Vec<ConditionNode>,
}

impl ConditionGroup {
    /// An empty AND group vacuously matches everything; an empty OR group
    /// vacuously matches nothing. Both follow from the identity element of
    /// each operator.
    pub fn evaluate(&self, props: &dyn PropertyLookup) -> bool {
        match self.op {
            GroupOp::And => self.conditions.iter().all(|c| c.evaluate(props)),
            GroupOp::Or => self.conditions.iter().any(|c| c.evaluate(props)),
        }
    }
}

/// One rename rule: a condition tree guarding a path template (spec §4).
/// Rules are evaluated in descending [`Rule::priority`] order, ties broken
/// by position in [`RuleConfig::rules`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: i32,
    pub conditions: ConditionGroup,
    pub template: String,
    /// When the conditions match but the template fails to interpolate
    /// (a required variable is missing), emit `Unsorted/<fileName>` instead
    /// of falling through to the next rule (spec §3, `fallbackToUnsorted`).
    #[serde(default, rename = "fallbackToUnsorted")]
    pub fallback_to_unsorted: bool,
}

fn default_enabled() -> bool {
    true
}

impl Default for Rule {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: None,
            description: None,
            enabled: default_enabled(),
            priority: 0,
            conditions: ConditionGroup {
                op: GroupOp::And,
                conditions: Vec::new(),
            },
            template: String::new(),
            fallback_to_unsorted: false,
        }
    }
}

/// The outcome of running [`RuleConfig::resolve_virtual_path`]: the
/// rendered, sanitized path and the id of the rule that produced it (`None`
/// when nothing matched and the final `Unsorted/<fileName>` catch-all
/// applied).
#[derive(Debug, Clone, PartialEq)]
pub struct RuleMatch {
    pub rule_id: Option<String>,
    pub path: String,
}

/// The result of [`RuleConfig::validate_rule`]: whether a rule is
/// structurally sound, plus any soft issues a reader should know about
/// before saving it (spec §4.2 "soft failure" semantics surfaced here
/// rather than at evaluation time).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleValidation {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub sample_output: Option<String>,
}

/// The full ordered set of rename rules plus the catch-all rule applied
/// when no other rule matches (spec §4, `defaultRule`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default, rename = "defaultRule")]
    pub default_rule: Option<Rule>,
    #[serde(default, rename = "lastModified")]
    pub last_modified: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default, rename = "isDefault")]
    pub is_default: bool,
}

fn default_version() -> u32 {
    1
}

impl RuleConfig {
    /// Enabled rules ordered for evaluation: descending `priority`, ties
    /// broken by original list position (spec §4.2 "Selection").
    pub fn ordered_rules(&self) -> Vec<&Rule> {
        let mut indexed: Vec<(usize, &Rule)> = self
            .rules
            .iter()
            .enumerate()
            .filter(|(_, r)| r.enabled)
            .collect();
        indexed.sort_by(|(ia, a), (ib, b)| b.priority.cmp(&a.priority).then(ia.cmp(ib)));
        indexed.into_iter().map(|(_, r)| r).collect()
    }

    /// Implements the full selection algorithm of spec §4.2: walk enabled
    /// rules in priority order, render the first whose conditions match; on
    /// template failure either emit the rule's `Unsorted/` fallback or keep
    /// looking; fall through to `defaultRule`; and if that too produces
    /// nothing, the final catch-all `Unsorted/<fileName>`.
    pub fn resolve_virtual_path(&self, props: &dyn PropertyLookup) -> RuleMatch {
        for rule in self.ordered_rules() {
            if !rule.conditions.evaluate(props) {
                continue;
            }
            if let Some(path) = render_rule_template(rule, props) {
                return RuleMatch {
                    rule_id: Some(rule.id.clone()),
                    path,
                };
            }
            if rule.fallback_to_unsorted {
                return RuleMatch {
                    rule_id: Some(rule.id.clone()),
                    path: unsorted_path(props),
                };
            }
        }

        if let Some(default_rule) = &self.default_rule {
            if default_rule.conditions.evaluate(props) {
                if let Some(path) = render_rule_template(default_rule, props) {
                    return RuleMatch {
                        rule_id: Some(default_rule.id.clone()),
                        path,
                    };
                }
            }
        }

        RuleMatch {
            rule_id: None,
            path: unsorted_path(props),
        }
    }

    /// Shared validation entry point used by both the `rules/validate`
    /// endpoint and rule-save-time checks in the Rule Config Store, so the
    /// two call sites never diverge (spec §4.2 supplemental).
    pub fn validate_rule(rule: &Rule, sample: Option<&dyn PropertyLookup>) -> RuleValidation {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let template = match Template::parse(&rule.template) {
            Ok(t) => Some(t),
            Err(e) => {
                errors.push(format!("template: {e}"));
                None
            }
        };
        collect_condition_warnings(&rule.conditions, &mut warnings);

        let sample_output = match (&template, sample) {
            (Some(t), Some(props)) => render_sanitized(t, props),
            _ => None,
        };
        if sample.is_some() && template.is_some() && sample_output.is_none() {
            warnings.push(
                "template did not render against the sample (a required variable is missing)"
                    .to_string(),
            );
        }

        RuleValidation {
            valid: errors.is_empty(),
            errors,
            warnings,
            sample_output,
        }
    }

    /// The seeded rule set this engine ships with (spec §4, default
    /// templates): a movie layout, a TV-with-season layout, and an
    /// `Unsorted/` catch-all default rule.
    pub fn seed() -> Self {
        Self {
            version: 1,
            rules: vec![
                Rule {
                    id: "movie".to_string(),
                    name: Some("Movie".to_string()),
                    description: Some(
                        "Video files with no season number, grouped by title and year."
                            .to_string(),
                    ),
                    enabled: true,
                    priority: 100,
                    conditions: ConditionGroup {
                        op: GroupOp::And,
                        conditions: vec![
                            ConditionNode::Leaf(Condition {
                                field: "fileType".to_string(),
                                op: ConditionOp::Equals,
                                value: Some("video".to_string()),
                            }),
                            ConditionNode::Leaf(Condition {
                                field: "season".to_string(),
                                op: ConditionOp::NotExists,
                                value: None,
                            }),
                        ],
                    },
                    template:
                        "Movies/{title} ({movieYear|year})/{title} ({movieYear|year}).{extension}"
                            .to_string(),
                    fallback_to_unsorted: true,
                },
                Rule {
                    id: "tv".to_string(),
                    name: Some("TV Episode".to_string()),
                    description: Some(
                        "Video files with a season number, one directory per season."
                            .to_string(),
                    ),
                    enabled: true,
                    priority: 90,
                    conditions: ConditionGroup {
                        op: GroupOp::And,
                        conditions: vec![ConditionNode::Leaf(Condition {
                            field: "season".to_string(),
                            op: ConditionOp::Exists,
                            value: None,
                        })],
                    },
                    template: "TV Shows/{titles.eng|title}/S{season:pad2}/{titles.eng|title} S{season:pad2}E{episode:pad2}.{extension}"
                        .to_string(),
                    fallback_to_unsorted: true,
                },
            ],
            default_rule: Some(Rule {
                id: "default".to_string(),
                name: Some("Unsorted".to_string()),
                description: None,
                enabled: true,
                priority: 0,
                conditions: ConditionGroup {
                    op: GroupOp::And,
                    conditions: Vec::new(),
                },
                template: "Unsorted/{fileName}".to_string(),
                fallback_to_unsorted: false,
            }),
            last_modified: None,
            is_default: true,
        }
    }
}

fn render_rule_template(rule: &Rule, props: &dyn PropertyLookup) -> Option<String> {
    let template = Template::parse(&rule.template).ok()?;
    render_sanitized(&template, props)
}

/// The final, unconditional catch-all path (spec §4.2: "If still null,
/// return `Unsorted/<fileName>`").
fn unsorted_path(props: &dyn PropertyLookup) -> String {
    let name = props
        .lookup("fileName")
        .or_else(|| {
            props
                .lookup("filePath")
                .map(|p| crate::metadata::derive_name_and_extension(&p).0)
        })
        .unwrap_or_else(|| "unknown".to_string());
    format!("Unsorted/{}", sanitize_path_segment(&name))
}

fn collect_condition_warnings(group: &ConditionGroup, warnings: &mut Vec<String>) {
    for node in &group.conditions {
        match node {
            ConditionNode::Leaf(cond) => {
                if cond.op == ConditionOp::Matches {
                    if let Some(pattern) = &cond.value {
                        if Regex::new(pattern).is_err() {
                            warnings.push(format!(
                                "condition on '{}': '{}' is not a valid regular expression",
                                cond.field, pattern
                            ));
                        }
                    }
                }
            }
            ConditionNode::Group(nested) => collect_condition_warnings(nested, warnings),
        }
    }
}
