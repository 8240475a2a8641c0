use regex::{Regex, RegexBuilder};
use serde::Serialize;
use tracing::warn;
use url::Url;

use crate::utils::url::{etld_plus_one, normalized_host};

use super::{Rule, RuleDraft, RuleType};

/// Outcome of [validate_rule]. Lists every problem rather than stopping at the first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Validation {
    pub valid: bool,
    pub errors: Vec<String>,
}

pub fn validate_rule(draft: &RuleDraft) -> Validation {
    let mut errors = Vec::new();

    let kind = match draft.kind.as_deref() {
        None | Some("") => {
            errors.push("Rule type is required".to_owned());
            None
        }
        Some(kind) => {
            let parsed = RuleType::parse(kind);
            if parsed.is_none() {
                errors.push(format!("Invalid rule type: {kind}"));
            }
            parsed
        }
    };

    let value = draft.value.as_deref().filter(|v| !v.is_empty());
    if value.is_none() {
        errors.push("Rule value must be a non-empty string".to_owned());
    }

    if let (Some(kind), Some(value)) = (kind, value) {
        match kind {
            RuleType::Domain | RuleType::Host => {
                if !is_hostname(value) {
                    errors.push("Invalid domain/hostname format".to_owned());
                }
            }
            RuleType::Prefix => {
                if Url::parse(value).is_err() {
                    errors.push("Invalid URL prefix".to_owned());
                }
            }
            RuleType::Regex => {
                if let Err(e) = Regex::new(value) {
                    errors.push(format!("Invalid regular expression: {e}"));
                }
            }
        }
    }

    Validation {
        valid: errors.is_empty(),
        errors,
    }
}

fn is_hostname(value: &str) -> bool {
    value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch {
    pub rule_id: String,
    pub site_key: String,
}

struct CompiledRule {
    rule: Rule,
    /// Only set for regex rules whose pattern compiled.
    pattern: Option<Regex>,
}

/// Enabled rules in stored order, ready for matching.
#[derive(Default)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
}

impl RuleSet {
    pub fn new(rules: impl IntoIterator<Item = Rule>) -> Self {
        let rules = rules
            .into_iter()
            .filter(|rule| rule.enabled)
            .map(|rule| {
                let pattern = match rule.kind {
                    RuleType::Regex => RegexBuilder::new(&rule.value)
                        .case_insensitive(true)
                        .build()
                        .inspect_err(|e| warn!("Skipping rule {} with invalid regex: {e}", rule.id))
                        .ok(),
                    _ => None,
                };
                CompiledRule { rule, pattern }
            })
            .collect();
        Self { rules }
    }

    /// Whether any enabled rule exists.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// First enabled rule matching `url`, with the site key the match resolves to.
    pub fn match_url(&self, url: &str) -> Option<RuleMatch> {
        let hostname = normalized_host(url)?;
        let lowered_url = url.to_lowercase();

        self.rules.iter().find_map(|compiled| {
            let rule = &compiled.rule;
            let site_key = match rule.kind {
                RuleType::Domain => {
                    let domain = rule.value.to_lowercase();
                    let matched = if rule.include_subdomains {
                        hostname == domain
                            || hostname.ends_with(&format!(".{domain}"))
                            || etld_plus_one(&hostname) == domain
                    } else {
                        hostname == domain
                    };
                    matched.then_some(domain)
                }
                RuleType::Host => {
                    let host = rule.value.to_lowercase();
                    (hostname == host).then_some(host)
                }
                RuleType::Prefix => lowered_url
                    .starts_with(&rule.value.to_lowercase())
                    .then(|| hostname.clone()),
                RuleType::Regex => compiled
                    .pattern
                    .as_ref()
                    .filter(|pattern| pattern.is_match(url))
                    .map(|_| hostname.clone()),
            }?;
            Some(RuleMatch {
                rule_id: rule.id.clone(),
                site_key,
            })
        })
    }
}
