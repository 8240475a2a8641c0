//! Request/response messages exchanged with the browser side. Requests arrive as a loose
//! `{type, payload}` envelope and are parsed into a closed [Request] enum.

use chrono::NaiveDate;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::TrackerError,
    rules::{Rule, RuleDraft},
    settings::Settings,
    storage::entities::{SeriesPoint, Summary},
    tracker::session::TrackingState,
    utils::time::Period,
};

pub mod handler;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

fn default_period() -> Period {
    Period::Day
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryQuery {
    #[serde(default = "default_period")]
    pub period: Period,
    #[serde(default)]
    pub site_key: Option<String>,
    /// End of the period. Today when absent.
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesQuery {
    #[serde(default = "default_period")]
    pub period: Period,
    #[serde(default)]
    pub site_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleUpdate {
    pub rule_id: String,
    #[serde(default)]
    pub updates: RuleDraft,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleRef {
    pub rule_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClearQuery {
    /// Buckets dated strictly before this are removed. Everything when absent.
    #[serde(default)]
    pub before: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    GetSummary(SummaryQuery),
    GetSeries(SeriesQuery),
    GetCurrentSession,
    GetRules,
    AddRule(RuleDraft),
    UpdateRule(RuleUpdate),
    RemoveRule(RuleRef),
    GetSettings,
    /// Partial settings object, shallow-merged over the stored settings.
    UpdateSettings(Value),
    ClearData(ClearQuery),
    ExportCsv(SeriesQuery),
}

impl Request {
    pub fn parse(envelope: Envelope) -> Result<Request, TrackerError> {
        let Envelope { kind, payload } = envelope;
        let payload = match payload {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };

        let request = match kind.as_str() {
            "GET_SUMMARY" => Request::GetSummary(payload_as(&kind, payload)?),
            "GET_SERIES" => Request::GetSeries(payload_as(&kind, payload)?),
            "GET_CURRENT_SESSION" => Request::GetCurrentSession,
            "GET_RULES" => Request::GetRules,
            "ADD_RULE" => Request::AddRule(payload_as(&kind, payload)?),
            "UPDATE_RULE" => Request::UpdateRule(payload_as(&kind, payload)?),
            "REMOVE_RULE" => Request::RemoveRule(payload_as(&kind, payload)?),
            "GET_SETTINGS" => Request::GetSettings,
            "UPDATE_SETTINGS" => {
                if !payload.is_object() {
                    return Err(TrackerError::InvalidPayload {
                        kind,
                        source: serde::de::Error::custom("expected a settings object"),
                    });
                }
                Request::UpdateSettings(payload)
            }
            "CLEAR_DATA" => Request::ClearData(payload_as(&kind, payload)?),
            "EXPORT_CSV" => Request::ExportCsv(payload_as(&kind, payload)?),
            _ => return Err(TrackerError::UnknownMessageType(kind)),
        };
        Ok(request)
    }
}

fn payload_as<T: DeserializeOwned>(kind: &str, payload: Value) -> Result<T, TrackerError> {
    serde_json::from_value(payload).map_err(|source| TrackerError::InvalidPayload {
        kind: kind.to_owned(),
        source,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseData {
    SummaryData { summary: Summary },
    SeriesData { series: Vec<SeriesPoint> },
    CurrentSessionData { state: TrackingState },
    RulesData { rules: Vec<Rule> },
    /// `rule` is null when an update targeted an unknown id.
    RuleData { rule: Option<Rule> },
    RuleRemoved { removed: bool },
    SettingsData { settings: Settings },
    DataCleared { removed: usize },
    CsvData { csv: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    #[serde(rename = "type")]
    kind: &'static str,
    pub error: String,
}

/// Either `{type, payload}` or `{type: "ERROR", error}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    Data(ResponseData),
    Error(Failure),
}

impl Response {
    pub fn error(message: impl Into<String>) -> Self {
        Response::Error(Failure {
            kind: "ERROR",
            error: message.into(),
        })
    }
}

impl From<&TrackerError> for Response {
    fn from(value: &TrackerError) -> Self {
        Response::error(value.to_string())
    }
}
