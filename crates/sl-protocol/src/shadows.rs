use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::document;
use crate::error::{ProtocolError, ProtocolResult};

/// Body of a GET request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShadowGetRequest {
    #[serde(rename = "clientToken")]
    pub client_token: String,
}

/// `state` section of an update request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateState {
    /// State reported by the device.
    pub reported: Map<String, Value>,
    /// Desired keys cleared by this update (each set to null).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired: Option<Map<String, Value>>,
}

/// Update request published by the device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShadowUpdateRequest {
    pub state: UpdateState,
    #[serde(rename = "clientToken")]
    pub client_token: String,
}

impl ShadowUpdateRequest {
    /// Wrap a reported document. When `respond_to_desire` is set, every key in
    /// the document is also cleared from the desired section, answering the
    /// delta that asked for it.
    pub fn new(reported: Map<String, Value>, respond_to_desire: bool, client_token: String) -> Self {
        let desired = respond_to_desire.then(|| {
            reported
                .keys()
                .map(|k| (k.clone(), Value::Null))
                .collect::<Map<_, _>>()
        });
        Self {
            state: UpdateState { reported, desired },
            client_token,
        }
    }
}

/// Parse an application-supplied update document. It must be a JSON object,
/// e.g. `{"color":"red"}` or `{"color":"red","power":"on"}`.
pub fn parse_update_document(document: &str) -> ProtocolResult<Map<String, Value>> {
    match serde_json::from_str::<Value>(document) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ProtocolError::Document(format!(
            "update document must be an object, got {}",
            type_name(&other)
        ))),
        Err(e) => Err(ProtocolError::Document(e.to_string())),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Error body of a rejected shadow request, read without a full parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowRejection<'a> {
    pub code: Option<u64>,
    pub message: Option<&'a str>,
    pub client_token: Option<&'a str>,
}

impl<'a> ShadowRejection<'a> {
    pub fn parse(payload: &'a [u8]) -> Self {
        Self {
            code: document::find(payload, "code").and_then(|v| v.as_u64()),
            message: document::find(payload, "message").and_then(|v| v.as_str()),
            client_token: client_token(payload),
        }
    }

    /// Human-readable result string, e.g. `REJECTED: 400 Missing required node: state`.
    pub fn describe(&self) -> String {
        match (self.code, self.message) {
            (Some(code), Some(msg)) => format!("REJECTED: {code} {msg}"),
            (Some(code), None) => format!("REJECTED: {code}"),
            (None, Some(msg)) => format!("REJECTED: {msg}"),
            (None, None) => "REJECTED".to_string(),
        }
    }
}

/// `clientToken` of a shadow response, if present.
pub fn client_token(payload: &[u8]) -> Option<&str> {
    document::find(payload, "clientToken").and_then(|v| v.as_str())
}

/// Server-assigned document version, if present.
pub fn version(payload: &[u8]) -> Option<u64> {
    document::find(payload, "version").and_then(|v| v.as_u64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn update_request_reports_state() {
        let reported = parse_update_document(r#"{"brightness":"80"}"#).unwrap();
        let req = ShadowUpdateRequest::new(reported, false, "acct-1-1".into());
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["state"]["reported"]["brightness"], "80");
        assert!(v["state"].get("desired").is_none());
        assert_eq!(v["clientToken"], "acct-1-1");
    }

    #[test]
    fn responding_to_desire_clears_desired_keys() {
        let reported = parse_update_document(r#"{"brightness":"80","lightMode":2}"#).unwrap();
        let req = ShadowUpdateRequest::new(reported, true, "t".into());
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["state"]["desired"], json!({"brightness": null, "lightMode": null}));
    }

    #[test]
    fn update_document_must_be_object() {
        assert!(parse_update_document("[1,2]").is_err());
        assert!(parse_update_document("\"red\"").is_err());
        assert!(parse_update_document("{not json").is_err());
        assert!(parse_update_document("{}").unwrap().is_empty());
    }

    #[test]
    fn rejection_is_described() {
        let payload = br#"{"code":400,"message":"Missing required node: state","clientToken":"acct-1-3"}"#;
        let rej = ShadowRejection::parse(payload);
        assert_eq!(rej.code, Some(400));
        assert_eq!(rej.client_token, Some("acct-1-3"));
        assert_eq!(rej.describe(), "REJECTED: 400 Missing required node: state");
    }

    #[test]
    fn rejection_of_garbage_is_bare() {
        assert_eq!(ShadowRejection::parse(b"oops").describe(), "REJECTED");
    }

    #[test]
    fn version_is_read() {
        assert_eq!(version(br#"{"state":{},"version":12}"#), Some(12));
        assert_eq!(version(br#"{"state":{}}"#), None);
    }
}
