//! Session task: drives one transport session and dispatches its traffic.
//!
//! The task owns the session's channel and event stream. Application calls
//! reach it as [`Request`]s; network events are read by a small pump task so
//! the main loop can `select!` over both without cancelling a poll midway.
//! When the session ends, every pending publish is failed and the reason is
//! returned to the caller, which reports it and decides about reconnecting.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use sl_mqtt_channel::{
    Channel, EventSource, IncomingMessage, MqttResult, Session, ShadowClient, TransportEvent,
    classify,
};
use sl_protocol::shadows::ShadowUpdateRequest;
use sl_protocol::{DisconnectReason, MqttMessage, OperationType, ShadowTopics};

use crate::callbacks::{Callbacks, OperationResult};
use crate::error::ClientError;
use crate::publish_queue::{Completion, PendingPublish, PendingPublishes, Request};
use crate::shadow::ShadowMachine;

type EventResult = Result<TransportEvent, DisconnectReason>;

/// Buffered network events between the pump and the session loop.
const EVENT_BUFFER: usize = 64;
/// How often in-flight publishes are checked for expired deadlines.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);
/// How long a release waits for the DISCONNECT to go out.
const SHUTDOWN_DRAIN: Duration = Duration::from_millis(500);

pub(crate) struct SessionLoop {
    channel: Arc<dyn Channel>,
    events: mpsc::Receiver<EventResult>,
    pump: JoinHandle<()>,
    requests: mpsc::Receiver<Request>,
    pending: PendingPublishes,
    shadow: Arc<Mutex<ShadowMachine>>,
    topics: ShadowTopics,
    callbacks: Callbacks,
}

impl SessionLoop {
    pub(crate) fn new(
        session: Session,
        requests: mpsc::Receiver<Request>,
        shadow: Arc<Mutex<ShadowMachine>>,
        topics: ShadowTopics,
        callbacks: Callbacks,
    ) -> Self {
        let (tx, events) = mpsc::channel(EVENT_BUFFER);
        let pump = tokio::spawn(pump(session.events, tx));
        Self {
            channel: session.channel,
            events,
            pump,
            requests,
            pending: PendingPublishes::default(),
            shadow,
            topics,
            callbacks,
        }
    }

    /// Run until the session is lost or released.
    pub(crate) async fn run(mut self) -> DisconnectReason {
        if let Err(e) = self.shadow_client().subscribe_responses().await {
            tracing::warn!(error = %e, "failed to subscribe to shadow responses");
        }

        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let reason = loop {
            tokio::select! {
                request = self.requests.recv() => match request {
                    Some(Request::Release) | None => break self.shutdown().await,
                    Some(request) => self.handle_request(request).await,
                },
                event = self.events.recv() => match event {
                    Some(Ok(event)) => self.handle_event(event).await,
                    Some(Err(reason)) => break reason,
                    None => break DisconnectReason::NetPollTimeout,
                },
                _ = sweep.tick() => self.pending.expire(Instant::now()),
            }
        };

        self.pump.abort();
        let failed = self.pending.len();
        self.pending.fail_all(&self.callbacks);
        tracing::info!(reason = %reason, failed_publishes = failed, "session ended");
        reason
    }

    fn shadow_client(&self) -> ShadowClient<'_, dyn Channel> {
        ShadowClient::new(self.channel.as_ref(), &self.topics)
    }

    async fn shutdown(&mut self) -> DisconnectReason {
        if let Err(e) = self.channel.disconnect().await {
            tracing::debug!(error = %e, "disconnect request not sent");
        }

        let drained = tokio::time::timeout(SHUTDOWN_DRAIN, async {
            loop {
                match self.events.recv().await {
                    Some(Ok(TransportEvent::DisconnectSent)) | Some(Err(_)) | None => break,
                    Some(Ok(TransportEvent::Message(_))) => {}
                    Some(Ok(event)) => self.handle_event(event).await,
                }
            }
        })
        .await;
        if drained.is_err() {
            tracing::debug!("DISCONNECT not confirmed before drain timeout");
        }
        DisconnectReason::Called
    }

    async fn handle_request(&mut self, request: Request) {
        match request {
            Request::Publish {
                message,
                completion,
                deadline,
                ack_required,
            } => self.publish(message, completion, deadline, ack_required).await,
            Request::Subscribe { filters, reply } => {
                let result = self.channel.subscribe_many(&filters).await;
                if let Err(e) = &result {
                    tracing::warn!(error = %e, count = filters.len(), "subscribe not sent");
                }
                let _ = reply.send(result.map_err(ClientError::from));
            }
            Request::Unsubscribe { topics, reply } => {
                let result = self.channel.unsubscribe_many(&topics).await;
                if let Err(e) = &result {
                    tracing::warn!(error = %e, count = topics.len(), "unsubscribe not sent");
                }
                let _ = reply.send(result.map_err(ClientError::from));
            }
            Request::ShadowGet => {
                let request = self.shadow.lock().await.get_request();
                let result = self.shadow_client().request_get(&request.client_token).await;
                self.track(self.topics.get(), result);
            }
            Request::ShadowUpdate {
                document,
                respond_to_desire,
            } => {
                let update = self
                    .shadow
                    .lock()
                    .await
                    .update_request(document, respond_to_desire)
                    .await;
                self.publish_update(&update).await;
            }
            Request::ShadowClear => {
                let result = self.shadow_client().request_delete().await;
                self.track(self.topics.delete(), result);
            }
            // Intercepted by `run`.
            Request::Release => {}
        }
    }

    async fn publish(
        &mut self,
        message: MqttMessage,
        completion: Completion,
        deadline: Option<Instant>,
        ack_required: bool,
    ) {
        match self
            .channel
            .publish(&message.topic, &message.payload, message.qos)
            .await
        {
            Ok(()) => self.pending.push(PendingPublish {
                topic: message.topic,
                completion,
                deadline,
                ack_required,
            }),
            Err(e) => {
                tracing::warn!(topic = %message.topic, error = %e, "publish not sent");
                completion.complete(&message.topic, Err(e.into()), &self.callbacks);
            }
        }
    }

    async fn publish_update(&mut self, update: &ShadowUpdateRequest) {
        let result = self.shadow_client().publish_update(update).await;
        self.track(self.topics.update(), result);
    }

    /// Track a shadow publish so its packet id stays correlated.
    fn track(&mut self, topic: String, result: MqttResult<()>) {
        match result {
            Ok(()) => self.pending.push(PendingPublish {
                topic,
                completion: Completion::Internal,
                deadline: None,
                ack_required: true,
            }),
            Err(e) => tracing::warn!(topic = %topic, error = %e, "shadow request not sent"),
        }
    }

    async fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => tracing::debug!("broker accepted session"),
            TransportEvent::Message(message) => self.dispatch(message).await,
            TransportEvent::PublishSent { pkid } => self.pending.on_sent(pkid, &self.callbacks),
            TransportEvent::PublishAcked { pkid } => self.pending.on_acked(pkid, &self.callbacks),
            TransportEvent::Subscribed { pkid, success } => {
                let result = if success {
                    OperationResult::Success
                } else {
                    tracing::warn!(pkid, "broker refused subscription");
                    OperationResult::Failure("subscription refused by broker".into())
                };
                self.callbacks.operation_complete(OperationType::Subscribe, result);
            }
            TransportEvent::Unsubscribed { .. } => {
                self.callbacks
                    .operation_complete(OperationType::Unsubscribe, OperationResult::Success);
            }
            TransportEvent::PingResponse => {
                tracing::trace!("keep-alive answered");
                self.callbacks
                    .operation_complete(OperationType::PingReq, OperationResult::Success);
            }
            TransportEvent::PingSent | TransportEvent::DisconnectSent | TransportEvent::Other => {}
        }
    }

    async fn dispatch(&mut self, message: MqttMessage) {
        match classify(&self.topics, message) {
            IncomingMessage::Shadow {
                operation,
                response,
                payload,
            } => {
                let ack = self
                    .shadow
                    .lock()
                    .await
                    .handle(operation, response, &payload, &self.callbacks)
                    .await;
                if let Some(update) = ack {
                    self.publish_update(&update).await;
                }
            }
            IncomingMessage::Subscribed(message) => {
                tracing::debug!(topic = %message.topic, len = message.payload.len(), "subscription message");
                self.callbacks.subscription_message(message);
            }
        }
    }
}

/// Forward network events until the source fails or the loop goes away.
async fn pump(mut events: Box<dyn EventSource>, tx: mpsc::Sender<EventResult>) {
    loop {
        let event = events.poll().await;
        let finished = event.is_err();
        if tx.send(event).await.is_err() || finished {
            return;
        }
    }
}
