//! Device shadow topic builders and parsers.
//!
//! Topic structure (prefix defaults to `$aws/things`):
//! ```text
//! {prefix}/{thing}/shadow/get
//! {prefix}/{thing}/shadow/get/accepted
//! {prefix}/{thing}/shadow/get/rejected
//! {prefix}/{thing}/shadow/update
//! {prefix}/{thing}/shadow/update/accepted
//! {prefix}/{thing}/shadow/update/rejected
//! {prefix}/{thing}/shadow/update/delta
//! {prefix}/{thing}/shadow/update/documents
//! {prefix}/{thing}/shadow/delete
//! {prefix}/{thing}/shadow/delete/accepted
//! {prefix}/{thing}/shadow/delete/rejected
//! ```

pub const DEFAULT_PREFIX: &str = "$aws/things";

/// Shadow operation a topic belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShadowOperation {
    Get,
    Update,
    Delete,
}

impl ShadowOperation {
    fn segment(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// Server-to-device response suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShadowResponse {
    Accepted,
    Rejected,
    Delta,
    Documents,
}

impl ShadowResponse {
    fn segment(self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Delta => "delta",
            Self::Documents => "documents",
        }
    }
}

/// Topic builder bound to one thing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowTopics {
    base: String,
}

impl ShadowTopics {
    pub fn new(prefix: &str, thing_name: &str) -> Self {
        let prefix = prefix.trim_end_matches('/');
        Self {
            base: format!("{prefix}/{thing_name}/shadow"),
        }
    }

    /// Request topic the device publishes to.
    pub fn request(&self, op: ShadowOperation) -> String {
        format!("{}/{}", self.base, op.segment())
    }

    /// Response topic the server publishes to.
    pub fn response(&self, op: ShadowOperation, response: ShadowResponse) -> String {
        format!("{}/{}/{}", self.base, op.segment(), response.segment())
    }

    pub fn get(&self) -> String {
        self.request(ShadowOperation::Get)
    }

    pub fn update(&self) -> String {
        self.request(ShadowOperation::Update)
    }

    pub fn delete(&self) -> String {
        self.request(ShadowOperation::Delete)
    }

    pub fn delta(&self) -> String {
        self.response(ShadowOperation::Update, ShadowResponse::Delta)
    }

    pub fn documents(&self) -> String {
        self.response(ShadowOperation::Update, ShadowResponse::Documents)
    }

    /// Every response topic a device must subscribe to before issuing requests.
    pub fn response_filters(&self) -> Vec<String> {
        use ShadowOperation::*;
        use ShadowResponse::*;

        [
            (Get, Accepted),
            (Get, Rejected),
            (Update, Accepted),
            (Update, Rejected),
            (Update, Delta),
            (Update, Documents),
            (Delete, Accepted),
            (Delete, Rejected),
        ]
        .into_iter()
        .map(|(op, resp)| self.response(op, resp))
        .collect()
    }

    /// Classify an incoming topic against this thing's shadow topics.
    /// Returns `None` for anything that is not one of the response topics.
    pub fn parse(&self, topic: &str) -> Option<(ShadowOperation, ShadowResponse)> {
        let rest = topic.strip_prefix(&self.base)?.strip_prefix('/')?;
        let (op, resp) = rest.split_once('/')?;

        let op = match op {
            "get" => ShadowOperation::Get,
            "update" => ShadowOperation::Update,
            "delete" => ShadowOperation::Delete,
            _ => return None,
        };
        let resp = match resp {
            "accepted" => ShadowResponse::Accepted,
            "rejected" => ShadowResponse::Rejected,
            "delta" if op == ShadowOperation::Update => ShadowResponse::Delta,
            "documents" if op == ShadowOperation::Update => ShadowResponse::Documents,
            _ => return None,
        };
        Some((op, resp))
    }
}
