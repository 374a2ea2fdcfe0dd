//! Shadow state machine.
//!
//! Mirrors the device's managed attributes in a [`ShadowDocument`] and
//! reconciles it with the server's GET, DELTA and DOCUMENT messages. Only the
//! session task drives the machine; application tasks read the document
//! through snapshots.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use sl_protocol::document::{self, ValueKind, ValueSpan};
use sl_protocol::shadows::{self, ShadowGetRequest, ShadowRejection, ShadowUpdateRequest};
use sl_protocol::topics::{ShadowOperation, ShadowResponse};
use sl_protocol::{DeviceIdentity, ShadowDataType};

use crate::callbacks::Callbacks;

/// Outstanding update tokens remembered for result matching.
const MAX_OUTSTANDING_TOKENS: usize = 64;

/// The device's last-known-good attribute values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShadowDocument {
    /// Attribute name to current value (strings unquoted).
    pub values: BTreeMap<String, String>,
    /// Server-assigned version; never moves backwards.
    pub version: Option<u64>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl ShadowDocument {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    fn advance_version(&mut self, version: Option<u64>) {
        if let Some(v) = version {
            if self.version.is_none_or(|current| v > current) {
                self.version = Some(v);
            }
        }
    }

    fn touch(&mut self) {
        self.last_updated = Some(Utc::now());
    }
}

/// Shadow document shared between the session task and snapshot readers.
pub type SharedShadowDocument = Arc<RwLock<ShadowDocument>>;

/// Reconciles shadow traffic for one client.
#[derive(Debug)]
pub(crate) struct ShadowMachine {
    client_id: String,
    attributes: Vec<String>,
    auto_ack_delta: bool,
    document: SharedShadowDocument,
    next_token: u64,
    outstanding: VecDeque<String>,
}

impl ShadowMachine {
    pub(crate) fn new(identity: &DeviceIdentity, auto_ack_delta: bool, document: SharedShadowDocument) -> Self {
        Self {
            client_id: identity.client_id.clone(),
            attributes: identity.attributes.clone(),
            auto_ack_delta,
            document,
            next_token: 0,
            outstanding: VecDeque::new(),
        }
    }

    fn next_token(&mut self) -> String {
        self.next_token += 1;
        format!("{}-{}", self.client_id, self.next_token)
    }

    fn manages(&self, key: &str) -> bool {
        self.attributes.iter().any(|a| a == key)
    }

    pub(crate) fn get_request(&mut self) -> ShadowGetRequest {
        ShadowGetRequest {
            client_token: self.next_token(),
        }
    }

    /// Build an update request and apply its managed keys locally.
    pub(crate) async fn update_request(
        &mut self,
        reported: Map<String, Value>,
        respond_to_desire: bool,
    ) -> ShadowUpdateRequest {
        {
            let mut doc = self.document.write().await;
            for (key, value) in reported.iter().filter(|(k, _)| self.manages(k)) {
                match value {
                    Value::Null => doc.values.remove(key),
                    Value::String(s) => doc.values.insert(key.clone(), s.clone()),
                    other => doc.values.insert(key.clone(), other.to_string()),
                };
            }
            doc.touch();
        }

        let token = self.next_token();
        self.outstanding.push_back(token.clone());
        if self.outstanding.len() > MAX_OUTSTANDING_TOKENS {
            self.outstanding.pop_front();
        }
        ShadowUpdateRequest::new(reported, respond_to_desire, token)
    }

    /// Handle a response on one of the shadow topics.
    ///
    /// Returns the update to publish when a delta is acknowledged automatically.
    pub(crate) async fn handle(
        &mut self,
        operation: ShadowOperation,
        response: ShadowResponse,
        payload: &[u8],
        callbacks: &Callbacks,
    ) -> Option<ShadowUpdateRequest> {
        match (operation, response) {
            (ShadowOperation::Get, ShadowResponse::Accepted) => {
                self.on_state(ShadowDataType::Get, payload, callbacks).await
            }
            (ShadowOperation::Update, ShadowResponse::Delta) => {
                self.on_state(ShadowDataType::Delta, payload, callbacks).await
            }
            (ShadowOperation::Update, ShadowResponse::Documents) => {
                self.on_documents(payload, callbacks).await;
                None
            }
            (ShadowOperation::Update, ShadowResponse::Accepted) => {
                if self.owns_result(payload) {
                    self.document.write().await.advance_version(shadows::version(payload));
                    callbacks.update_result("SUCCESS");
                }
                None
            }
            (ShadowOperation::Update, ShadowResponse::Rejected) => {
                if self.owns_result(payload) {
                    let rejection = ShadowRejection::parse(payload);
                    tracing::warn!(code = ?rejection.code, message = ?rejection.message, "shadow update rejected");
                    callbacks.update_result(&rejection.describe());
                }
                None
            }
            (ShadowOperation::Delete, ShadowResponse::Accepted) => {
                let mut doc = self.document.write().await;
                doc.values.clear();
                doc.version = None;
                doc.touch();
                tracing::info!("shadow document cleared");
                None
            }
            (op, ShadowResponse::Rejected) => {
                let rejection = ShadowRejection::parse(payload);
                tracing::warn!(operation = ?op, result = %rejection.describe(), "shadow request rejected");
                None
            }
            (op, resp) => {
                tracing::debug!(operation = ?op, response = ?resp, "ignoring shadow response");
                None
            }
        }
    }

    /// GET and DELTA: dispatch every managed attribute found in `state`.
    async fn on_state(
        &mut self,
        kind: ShadowDataType,
        payload: &[u8],
        callbacks: &Callbacks,
    ) -> Option<ShadowUpdateRequest> {
        let Some(state) = document::find(payload, "state").filter(|s| s.kind() == ValueKind::Object) else {
            tracing::warn!(kind = ?kind, len = payload.len(), "shadow document has no state object, dropping");
            return None;
        };

        let is_delta = kind == ShadowDataType::Delta;
        let version = shadows::version(payload);
        {
            let doc = self.document.read().await;
            if let (true, Some(incoming), Some(current)) = (is_delta, version, doc.version) {
                if incoming < current {
                    tracing::debug!(incoming, current, "dropping stale delta");
                    return None;
                }
            }
        }

        callbacks.shadow_param(kind, payload);

        let desired = (!is_delta).then(|| state.find("desired")).flatten();
        let found: Vec<(&str, ValueSpan<'_>, &str)> = self
            .attributes
            .iter()
            .filter_map(|name| {
                let span = state.find(name).or_else(|| desired.and_then(|d| d.find(name)))?;
                let value = span.as_str()?;
                Some((name.as_str(), span, value))
            })
            .collect();

        {
            let mut doc = self.document.write().await;
            for (name, _, value) in &found {
                doc.values.insert((*name).to_string(), (*value).to_string());
            }
            doc.advance_version(version);
            doc.touch();
        }

        for (name, _, value) in &found {
            tracing::debug!(attribute = name, value, is_delta, "attribute changed");
            callbacks.attribute(name, value, is_delta);
        }

        if !is_delta || !self.auto_ack_delta || found.is_empty() {
            return None;
        }
        let applied: Map<String, Value> = found
            .iter()
            .map(|(name, span, value)| {
                let json = serde_json::from_slice(span.raw()).unwrap_or_else(|_| Value::String((*value).to_string()));
                ((*name).to_string(), json)
            })
            .collect();
        Some(self.update_request(applied, true).await)
    }

    /// DOCUMENT: before/after of an accepted update; no attribute dispatch.
    async fn on_documents(&mut self, payload: &[u8], callbacks: &Callbacks) {
        let version = document::find_path(payload, &["current", "version"])
            .and_then(|v| v.as_u64())
            .or_else(|| shadows::version(payload));
        self.document.write().await.advance_version(version);
        callbacks.shadow_param(ShadowDataType::Document, payload);
    }

    /// Results without a token are delivered; results carrying a token that
    /// this client did not issue are ignored.
    fn owns_result(&mut self, payload: &[u8]) -> bool {
        let Some(token) = shadows::client_token(payload) else {
            return true;
        };
        match self.outstanding.iter().position(|t| t == token) {
            Some(index) => {
                self.outstanding.remove(index);
                true
            }
            None => {
                tracing::debug!(token, "ignoring update result for another client");
                false
            }
        }
    }
}
