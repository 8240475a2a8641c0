//! User-managed rules that map URLs to site keys. Rules are an optional override layer on top of
//! auto-tracking by hostname.

use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod book;
pub mod matcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    /// Domain, optionally including its subdomains.
    Domain,
    /// Exact hostname.
    #[serde(alias = "exact-host")]
    Host,
    /// Case-insensitive prefix of the full URL.
    #[serde(alias = "url-prefix")]
    Prefix,
    /// Case-insensitive regular expression tested against the full URL.
    Regex,
}

impl RuleType {
    pub fn parse(value: &str) -> Option<RuleType> {
        match value {
            "domain" => Some(RuleType::Domain),
            "host" | "exact-host" => Some(RuleType::Host),
            "prefix" | "url-prefix" => Some(RuleType::Prefix),
            "regex" => Some(RuleType::Regex),
            _ => None,
        }
    }

    /// Host-like values are stored case-folded.
    pub fn is_host_like(&self) -> bool {
        matches!(self, RuleType::Domain | RuleType::Host)
    }
}

impl Display for RuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RuleType::Domain => "domain",
            RuleType::Host => "host",
            RuleType::Prefix => "prefix",
            RuleType::Regex => "regex",
        };
        f.write_str(name)
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: RuleType,
    pub value: String,
    #[serde(default = "default_true")]
    pub include_subdomains: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A rule as submitted by a caller. Every field is optional so that validation can report all
/// missing pieces at once. Also used for partial updates, where absent fields are left unchanged.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDraft {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub include_subdomains: Option<bool>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl RuleDraft {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.into()),
            value: Some(value.into()),
            ..Default::default()
        }
    }
}
