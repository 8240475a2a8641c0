use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::{
    error::{StoreError, TrackerError},
    storage::{
        documents::{read_document, write_document, RULES_KEY},
        kv::KeyValueStore,
    },
    utils::clock::Clock,
};

use super::{matcher::validate_rule, Rule, RuleDraft, RuleType};

/// Persistent, ordered list of rules stored under `trackedRules`.
pub struct RuleBook<K> {
    store: K,
    clock: Arc<dyn Clock>,
}

impl<K: KeyValueStore> RuleBook<K> {
    pub fn new(store: K, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn list(&self) -> Result<Vec<Rule>, StoreError> {
        Ok(read_document(&self.store, RULES_KEY).await?.unwrap_or_default())
    }

    pub async fn add(&self, draft: RuleDraft) -> Result<Rule, TrackerError> {
        let (kind, value) = validated(&draft)?;
        let mut rules = self.list().await?;

        let rule = Rule {
            id: Uuid::new_v4().to_string(),
            kind,
            value,
            include_subdomains: draft.include_subdomains.unwrap_or(true),
            enabled: draft.enabled.unwrap_or(true),
            created_at: self.clock.time(),
            updated_at: None,
        };
        if is_duplicate(&rules, &rule) {
            return Err(TrackerError::DuplicateRule);
        }

        rules.push(rule.clone());
        write_document(&self.store, RULES_KEY, &rules).await?;
        info!("Added {} rule {} for {}", rule.kind, rule.id, rule.value);
        Ok(rule)
    }

    /// Applies the fields present in `updates`. Returns `None` when no rule has `id`.
    pub async fn update(&self, id: &str, updates: RuleDraft) -> Result<Option<Rule>, TrackerError> {
        let mut rules = self.list().await?;
        let Some(index) = rules.iter().position(|r| r.id == id) else {
            return Ok(None);
        };

        let current = &rules[index];
        let merged = RuleDraft {
            kind: Some(updates.kind.unwrap_or_else(|| current.kind.to_string())),
            value: Some(updates.value.unwrap_or_else(|| current.value.clone())),
            include_subdomains: updates.include_subdomains,
            enabled: updates.enabled,
        };
        let (kind, value) = validated(&merged)?;

        let updated = Rule {
            id: current.id.clone(),
            kind,
            value,
            include_subdomains: merged.include_subdomains.unwrap_or(current.include_subdomains),
            enabled: merged.enabled.unwrap_or(current.enabled),
            created_at: current.created_at,
            updated_at: Some(self.clock.time()),
        };
        if is_duplicate(&rules, &updated) {
            return Err(TrackerError::DuplicateRule);
        }

        rules[index] = updated.clone();
        write_document(&self.store, RULES_KEY, &rules).await?;
        info!("Updated rule {id}");
        Ok(Some(updated))
    }

    /// Returns whether a rule with `id` existed.
    pub async fn remove(&self, id: &str) -> Result<bool, TrackerError> {
        let mut rules = self.list().await?;
        let before = rules.len();
        rules.retain(|r| r.id != id);
        if rules.len() == before {
            return Ok(false);
        }
        write_document(&self.store, RULES_KEY, &rules).await?;
        info!("Removed rule {id}");
        Ok(true)
    }
}

fn validated(draft: &RuleDraft) -> Result<(RuleType, String), TrackerError> {
    let validation = validate_rule(draft);
    let kind = draft.kind.as_deref().and_then(RuleType::parse);
    match (validation.valid, kind, draft.value.as_deref()) {
        (true, Some(kind), Some(value)) => {
            let value = if kind.is_host_like() {
                value.to_lowercase()
            } else {
                value.to_owned()
            };
            Ok((kind, value))
        }
        _ => Err(TrackerError::InvalidRule(validation.errors)),
    }
}

/// Enabled rules only conflict with other enabled rules of the same type and value.
fn is_duplicate(rules: &[Rule], candidate: &Rule) -> bool {
    candidate.enabled
        && rules.iter().any(|r| {
            r.id != candidate.id
                && r.enabled
                && r.kind == candidate.kind
                && r.value.to_lowercase() == candidate.value.to_lowercase()
        })
}
