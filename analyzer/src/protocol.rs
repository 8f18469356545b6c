//! Wire shapes for the analysis server protocol.
//!
//! Outbound: `{"id": "<n>", "method": ..., "params"?}`.
//! Inbound: `{"id", "result" | "error"}` responses and `{"event", "params"}`
//! notifications. The first notification after spawn is `server.connected`.

use serde::{Deserialize, Serialize};

pub const SET_ANALYSIS_ROOTS: &str = "analysis.setAnalysisRoots";
pub const REANALYZE: &str = "analysis.reanalyze";
pub const SET_SUBSCRIPTIONS: &str = "completion.setSubscriptions";
pub const CANCEL_ALL_REQUESTS: &str = "server.cancelAllRequests";
pub const SHUTDOWN: &str = "server.shutdown";

pub(crate) const EVENT_CONNECTED: &str = "server.connected";
pub(crate) const EVENT_STATUS: &str = "server.status";
pub(crate) const EVENT_ERROR: &str = "server.error";

/// Subscription category for completion suggestion sets.
pub const AVAILABLE_SUGGESTION_SETS: &str = "AVAILABLE_SUGGESTION_SETS";

#[derive(Debug, Serialize)]
pub(crate) struct Request<'a> {
    pub id: String,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl<'a> Request<'a> {
    pub fn new(id: u64, method: &'a str, params: Option<serde_json::Value>) -> Self {
        Self {
            id: id.to_string(),
            method,
            params,
        }
    }
}

/// Error object carried by a failed response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResponseError {
    #[serde(deserialize_with = "code_as_string")]
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, rename = "stackTrace")]
    pub stack_trace: Option<String>,
}

fn code_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    })
}

#[derive(Debug, Deserialize)]
pub(crate) struct ConnectedParams {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub capabilities: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct StatusParams {
    #[serde(default)]
    pub analysis: Option<AnalysisStatus>,
    #[serde(default, rename = "pub")]
    pub pub_status: Option<PubStatus>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AnalysisStatus {
    #[serde(rename = "isAnalyzing")]
    pub is_analyzing: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PubStatus {
    #[serde(rename = "isListingPackages")]
    pub is_listing_packages: bool,
}

impl StatusParams {
    /// `(subsystem, busy)` pairs for every subsystem present in the update.
    pub fn subsystems(&self) -> Vec<(&'static str, bool)> {
        let mut out = Vec::new();
        if let Some(analysis) = &self.analysis {
            out.push(("analysis", analysis.is_analyzing));
        }
        if let Some(pub_status) = &self.pub_status {
            out.push(("pub", pub_status.is_listing_packages));
        }
        out
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ServerErrorParams {
    #[serde(default, rename = "isFatal")]
    pub is_fatal: bool,
    #[serde(default)]
    pub message: String,
}

pub(crate) enum Incoming {
    Response {
        id: Option<u64>,
        raw_id: serde_json::Value,
        outcome: Result<serde_json::Value, ResponseError>,
    },
    Event {
        event: String,
        params: serde_json::Value,
    },
    ServerRequest {
        method: String,
    },
}

/// Classify a parsed frame. Returns `None` for frames that fit no shape.
pub(crate) fn parse_incoming(frame: &serde_json::Value) -> Option<Incoming> {
    if let Some(event) = frame.get("event").and_then(|e| e.as_str()) {
        return Some(Incoming::Event {
            event: event.to_string(),
            params: frame
                .get("params")
                .cloned()
                .unwrap_or(serde_json::Value::Null),
        });
    }

    let id = frame.get("id")?;
    if let Some(method) = frame.get("method").and_then(|m| m.as_str()) {
        return Some(Incoming::ServerRequest {
            method: method.to_string(),
        });
    }

    let outcome = match frame.get("error") {
        Some(error) if !error.is_null() => Err(serde_json::from_value::<ResponseError>(
            error.clone(),
        )
        .unwrap_or_else(|e| ResponseError {
            code: String::from("UNKNOWN"),
            message: format!("unparseable error payload: {e}"),
            stack_trace: None,
        })),
        _ => Ok(frame
            .get("result")
            .cloned()
            .unwrap_or(serde_json::Value::Null)),
    };

    Some(Incoming::Response {
        id: parse_id(id),
        raw_id: id.clone(),
        outcome,
    })
}

/// Ids go out as decimal strings; accept either strings or numbers back.
fn parse_id(id: &serde_json::Value) -> Option<u64> {
    id.as_u64()
        .or_else(|| id.as_str().and_then(|s| s.parse().ok()))
}

pub(crate) fn set_subscriptions_params(subscriptions: &[&str]) -> serde_json::Value {
    serde_json::json!({ "subscriptions": subscriptions })
}
