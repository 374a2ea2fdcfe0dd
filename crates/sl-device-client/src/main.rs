//! Shadowlink demo device.
//!
//! Connects one device, mirrors its managed attributes from the shadow and
//! reports them back when the cloud asks for a change.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use sl_device_client::{
    Callbacks, ClientConfig, DeviceClient, MqttInfo, ShadowDataType, WeakDeviceClient, sdk_version,
};

const CREATE_RETRY: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    tracing::info!(version = sdk_version(), "sl-device-demo starting");

    // ── Load config ─────────────────────────────────────────────
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/shadowlink/device.toml".to_string());

    let config = ClientConfig::from_file(&config_path)?;
    tracing::info!(
        client_id = %config.device.client_id,
        thing_name = %config.device.thing_name,
        attributes = ?config.device.attributes,
        "config loaded"
    );

    // ── Callbacks ───────────────────────────────────────────────
    // Filled once the client exists; callbacks only fire after that. The
    // callbacks live inside the client, so they hold it weakly.
    let handle: Arc<OnceLock<WeakDeviceClient>> = Arc::new(OnceLock::new());
    let manual_report = !config.publish.auto_ack_delta;

    let reporter = handle.clone();
    let callbacks = Callbacks::new()
        .on_attribute(move |key, value, is_delta| {
            tracing::info!(key, value, is_delta, "attribute");
            if !(is_delta && manual_report) {
                return;
            }
            let Some(client) = reporter.get().and_then(WeakDeviceClient::upgrade) else {
                return;
            };
            let report = serde_json::json!({ key: value }).to_string();
            if let Err(e) = client.shadow_update(&report, true) {
                tracing::warn!(error = %e, key, "failed to report attribute");
            }
        })
        .on_shadow_param(|kind, document| {
            if kind == ShadowDataType::Document {
                tracing::debug!(len = document.len(), "shadow documents");
            } else {
                tracing::info!(kind = ?kind, document = %String::from_utf8_lossy(document), "shadow message");
            }
        })
        .on_update_result(|result| tracing::info!(result, "update result"))
        .on_disconnect(|reason| tracing::warn!(reason = %reason, "disconnected"))
        .on_operation_complete(|info| {
            if let MqttInfo::Operation { operation, result } = info {
                tracing::debug!(operation = operation.as_str(), result = %result, "operation complete");
            }
        })
        .on_subscription_message(|info| {
            if let MqttInfo::Message(message) = info {
                tracing::info!(topic = %message.topic, len = message.payload.len(), "message");
            }
        });

    // ── Connect ─────────────────────────────────────────────────
    let client = loop {
        match DeviceClient::create(config.clone(), callbacks.clone()).await {
            Ok(client) => break client,
            Err(e) => {
                tracing::warn!(error = %e, retry_in = ?CREATE_RETRY, "create failed, retrying");
                tokio::time::sleep(CREATE_RETRY).await;
            }
        }
    };
    let _ = handle.set(client.downgrade());
    tracing::info!(client_id = client.client_id(), "device connected");

    if let Err(e) = client.shadow_get() {
        tracing::warn!(error = %e, "shadow get failed");
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    client.shutdown().await;

    Ok(())
}
