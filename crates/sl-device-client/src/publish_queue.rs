//! Hand-off from application tasks to the session task, and correlation of
//! outbound publishes with their broker acknowledgements.
//!
//! Application calls never touch the transport. They push a [`Request`] onto a
//! bounded queue drained by the session task. Publishes that left the client
//! are tracked in [`PendingPublishes`] until the broker acknowledges them or
//! the session ends.

use std::collections::{HashMap, VecDeque};

use serde_json::{Map, Value};
use sl_protocol::{MqttMessage, OperationType, Qos};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::callbacks::{Callbacks, OperationResult};
use crate::error::{ClientError, ClientResult};

/// Work handed to the session task.
#[derive(Debug)]
pub(crate) enum Request {
    Publish {
        message: MqttMessage,
        completion: Completion,
        deadline: Option<Instant>,
        ack_required: bool,
    },
    Subscribe {
        filters: Vec<(String, Qos)>,
        reply: oneshot::Sender<ClientResult<()>>,
    },
    Unsubscribe {
        topics: Vec<String>,
        reply: oneshot::Sender<ClientResult<()>>,
    },
    ShadowGet,
    ShadowUpdate {
        document: Map<String, Value>,
        respond_to_desire: bool,
    },
    ShadowClear,
    Release,
}

/// Sending half of the request queue.
#[derive(Debug, Clone)]
pub(crate) struct RequestQueue {
    tx: mpsc::Sender<Request>,
}

impl RequestQueue {
    pub(crate) fn new(capacity: usize) -> (Self, mpsc::Receiver<Request>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueue without waiting.
    pub(crate) fn send(&self, request: Request) -> ClientResult<()> {
        self.tx.try_send(request).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ClientError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => ClientError::NotConnected,
        })
    }
}

/// Who is told when a publish completes.
#[derive(Debug)]
pub(crate) enum Completion {
    /// Raise the operation-complete callback.
    Notify,
    /// Wake a synchronous caller.
    Waiter(oneshot::Sender<ClientResult<()>>),
    /// Shadow traffic generated by the client itself.
    Internal,
}

impl Completion {
    pub(crate) fn complete(self, topic: &str, result: ClientResult<()>, callbacks: &Callbacks) {
        match self {
            Self::Notify => {
                let result = match result {
                    Ok(()) => OperationResult::Success,
                    Err(e) => OperationResult::Failure(e.to_string()),
                };
                callbacks.operation_complete(OperationType::PublishToServer, result);
            }
            Self::Waiter(tx) => {
                if tx.send(result).is_err() {
                    tracing::debug!(topic, "synchronous caller gone, discarding publish result");
                }
            }
            Self::Internal => {
                if let Err(e) = result {
                    tracing::debug!(topic, error = %e, "shadow publish not acknowledged");
                }
            }
        }
    }
}

/// A publish handed to the transport and not yet acknowledged.
#[derive(Debug)]
pub(crate) struct PendingPublish {
    pub topic: String,
    pub completion: Completion,
    /// Synchronous callers give up at this point; the entry is dropped after it.
    pub deadline: Option<Instant>,
    /// When false, a QoS 1/2 publish completes once it is sent.
    pub ack_required: bool,
}

/// Publishes awaiting a packet id, then an acknowledgement.
///
/// The transport reports each outgoing PUBLISH in the order publishes were
/// handed to it, so the oldest unassigned slot takes the next packet id. An
/// expired entry leaves an empty slot behind to keep that order.
#[derive(Debug, Default)]
pub(crate) struct PendingPublishes {
    unassigned: VecDeque<Option<PendingPublish>>,
    inflight: HashMap<u16, PendingPublish>,
}

impl PendingPublishes {
    pub(crate) fn push(&mut self, pending: PendingPublish) {
        self.unassigned.push_back(Some(pending));
    }

    pub(crate) fn len(&self) -> usize {
        self.unassigned.iter().flatten().count() + self.inflight.len()
    }

    /// A PUBLISH left the client. QoS 0 (`pkid == 0`) and publishes that
    /// need no acknowledgement complete here.
    pub(crate) fn on_sent(&mut self, pkid: u16, callbacks: &Callbacks) {
        let pending = match self.unassigned.pop_front() {
            Some(Some(pending)) => pending,
            Some(None) => {
                tracing::debug!(pkid, "outgoing publish already expired");
                return;
            }
            None => {
                tracing::debug!(pkid, "outgoing publish with no pending entry");
                return;
            }
        };
        if pkid == 0 || !pending.ack_required {
            pending.completion.complete(&pending.topic, Ok(()), callbacks);
        } else if let Some(stale) = self.inflight.insert(pkid, pending) {
            tracing::debug!(pkid, topic = %stale.topic, "packet id reused before ack");
            stale
                .completion
                .complete(&stale.topic, Err(ClientError::SessionClosed), callbacks);
        }
    }

    /// The broker acknowledged `pkid`.
    pub(crate) fn on_acked(&mut self, pkid: u16, callbacks: &Callbacks) {
        match self.inflight.remove(&pkid) {
            Some(pending) => pending.completion.complete(&pending.topic, Ok(()), callbacks),
            None => tracing::debug!(pkid, "late or unknown ack, discarding"),
        }
    }

    /// Drop entries whose synchronous caller has already timed out.
    pub(crate) fn expire(&mut self, now: Instant) {
        for slot in self.unassigned.iter_mut() {
            if slot.as_ref().is_some_and(|p| p.deadline.is_some_and(|d| d <= now)) {
                if let Some(pending) = slot.take() {
                    tracing::debug!(topic = %pending.topic, "unsent publish expired");
                }
            }
        }
        self.inflight.retain(|pkid, pending| {
            let expired = pending.deadline.is_some_and(|d| d <= now);
            if expired {
                tracing::debug!(pkid, topic = %pending.topic, "pending publish expired");
            }
            !expired
        });
    }

    /// Fail everything still pending; used when the session ends.
    pub(crate) fn fail_all(&mut self, callbacks: &Callbacks) {
        let unassigned = self.unassigned.drain(..).flatten();
        let inflight = self.inflight.drain().map(|(_, p)| p);
        for pending in unassigned.chain(inflight) {
            pending
                .completion
                .complete(&pending.topic, Err(ClientError::SessionClosed), callbacks);
        }
    }
}
