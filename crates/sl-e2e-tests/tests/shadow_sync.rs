//! End-to-end tests for shadow synchronization between a device and its broker.

mod helpers;

use helpers::{Device, eventually, settle};
use sl_device_client::{ConnectionState, ShadowDataType};
use sl_protocol::topics::{ShadowOperation, ShadowResponse};

#[tokio::test]
async fn e2e_delta_dispatches_attribute_and_reports_back() {
    let d = Device::connect("2001").await;

    d.broker()
        .deliver(&d.topics.delta(), br#"{"version":3,"state":{"brightness":"80"}}"#);

    assert!(eventually(|| !d.recorder.attributes().is_empty()).await);
    assert_eq!(
        d.recorder.attributes(),
        vec![("brightness".to_string(), "80".to_string(), true)]
    );

    // The change is acknowledged: reported and the desired key cleared.
    let update = d.nth_update(1).await;
    assert_eq!(update["state"]["reported"]["brightness"], "80");
    let desired = update["state"]["desired"].as_object().unwrap();
    assert!(desired["brightness"].is_null());
    assert!(update["clientToken"].as_str().unwrap().starts_with("acct-2001-"));

    let snapshot = d.client.shadow_snapshot().await;
    assert_eq!(snapshot.get("brightness"), Some("80"));
    assert_eq!(snapshot.version, Some(3));
    d.client.shutdown().await;
}

#[tokio::test]
async fn e2e_delta_with_two_attributes_is_acknowledged_once() {
    let d = Device::connect("2002").await;

    d.broker().deliver(
        &d.topics.delta(),
        br#"{"version":5,"state":{"brightness":40,"lightMode":"night","color":"red"}}"#,
    );

    assert!(eventually(|| d.recorder.attributes().len() == 2).await);
    let update = d.nth_update(1).await;
    let reported = update["state"]["reported"].as_object().unwrap();
    assert_eq!(reported.len(), 2);
    assert_eq!(reported["brightness"], 40);
    assert_eq!(reported["lightMode"], "night");

    settle().await;
    assert_eq!(d.published_to(&d.topics.update()).len(), 1);
    d.client.shutdown().await;
}

#[tokio::test]
async fn e2e_get_with_unknown_attribute_is_ignored() {
    let d = Device::connect("2003").await;
    d.client.shadow_get().unwrap();
    assert!(eventually(|| d.published_to(&d.topics.get()).len() == 1).await);

    let accepted = d.topics.response(ShadowOperation::Get, ShadowResponse::Accepted);
    d.broker()
        .deliver(&accepted, br#"{"version":1,"state":{"reported":{"volume":"3"}}}"#);

    assert!(eventually(|| !d.recorder.params().is_empty()).await);
    assert_eq!(d.recorder.params()[0].0, ShadowDataType::Get);
    settle().await;
    assert!(d.recorder.attributes().is_empty());
    assert!(d.published_to(&d.topics.update()).is_empty());
    assert_eq!(d.client.connection_state(), ConnectionState::Connected);
    d.client.shutdown().await;
}

#[tokio::test]
async fn e2e_get_restores_desired_state_without_reporting() {
    let d = Device::connect("2004").await;

    let accepted = d.topics.response(ShadowOperation::Get, ShadowResponse::Accepted);
    d.broker().deliver(
        &accepted,
        br#"{"version":9,"state":{"desired":{"lightMode":"reading"},"reported":{"lightMode":"night"}}}"#,
    );

    assert!(eventually(|| !d.recorder.attributes().is_empty()).await);
    assert_eq!(
        d.recorder.attributes(),
        vec![("lightMode".to_string(), "reading".to_string(), false)]
    );
    settle().await;
    assert!(d.published_to(&d.topics.update()).is_empty());
    d.client.shutdown().await;
}

#[tokio::test]
async fn e2e_update_results_follow_client_token() {
    let d = Device::connect("2005").await;
    let accepted = d.topics.response(ShadowOperation::Update, ShadowResponse::Accepted);
    let rejected = d.topics.response(ShadowOperation::Update, ShadowResponse::Rejected);

    d.client.shadow_update(r#"{"brightness":"33"}"#, false).unwrap();
    let first = d.nth_update(1).await;
    assert!(first["state"].get("desired").is_none());
    let token = first["clientToken"].as_str().unwrap().to_string();

    let body = serde_json::json!({"version": 2, "clientToken": token});
    d.broker().deliver(&accepted, body.to_string().as_bytes());
    assert!(eventually(|| d.recorder.results() == vec!["SUCCESS".to_string()]).await);

    d.client.shadow_update(r#"{"brightness":"34"}"#, false).unwrap();
    let second = d.nth_update(2).await;
    let token = second["clientToken"].as_str().unwrap().to_string();

    let body = serde_json::json!({
        "code": 400,
        "message": "Missing required node: state",
        "clientToken": token,
    });
    d.broker().deliver(&rejected, body.to_string().as_bytes());
    assert!(eventually(|| d.recorder.results().len() == 2).await);
    assert_eq!(d.recorder.results()[1], "REJECTED: 400 Missing required node: state");
    d.client.shutdown().await;
}

#[tokio::test]
async fn e2e_foreign_update_result_is_ignored() {
    let d = Device::connect("2006").await;
    let accepted = d.topics.response(ShadowOperation::Update, ShadowResponse::Accepted);

    d.broker()
        .deliver(&accepted, br#"{"version":2,"clientToken":"someone-else-1"}"#);
    settle().await;
    assert!(d.recorder.results().is_empty());
    d.client.shutdown().await;
}

#[tokio::test]
async fn e2e_malformed_shadow_payload_is_dropped() {
    let d = Device::connect("2007").await;

    d.broker().deliver(&d.topics.delta(), b"not json at all");
    d.broker().deliver(&d.topics.delta(), br#"{"version":1}"#);
    d.broker()
        .deliver(&d.topics.delta(), br#"{"version":2,"state":{"brightness":"10"}}"#);

    assert!(eventually(|| !d.recorder.attributes().is_empty()).await);
    assert_eq!(d.recorder.attributes().len(), 1);
    assert_eq!(d.recorder.params().len(), 1);
    d.client.shutdown().await;
}

#[tokio::test]
async fn e2e_stale_delta_is_dropped() {
    let d = Device::connect("2008").await;

    d.broker()
        .deliver(&d.topics.delta(), br#"{"version":7,"state":{"brightness":"70"}}"#);
    assert!(eventually(|| d.recorder.attributes().len() == 1).await);

    d.broker()
        .deliver(&d.topics.delta(), br#"{"version":6,"state":{"brightness":"60"}}"#);
    settle().await;
    assert_eq!(d.recorder.attributes().len(), 1);
    assert_eq!(d.client.shadow_snapshot().await.get("brightness"), Some("70"));
    d.client.shutdown().await;
}

#[tokio::test]
async fn e2e_clear_deletes_shadow() {
    let d = Device::connect("2009").await;
    d.client.shadow_update(r#"{"brightness":"20"}"#, false).unwrap();
    assert!(eventually(|| d.published_to(&d.topics.update()).len() == 1).await);

    d.client.shadow_clear().unwrap();
    assert!(eventually(|| d.published_to(&d.topics.delete()).len() == 1).await);

    let accepted = d.topics.response(ShadowOperation::Delete, ShadowResponse::Accepted);
    d.broker().deliver(&accepted, br#"{"version":3}"#);
    assert!(eventually_empty(&d).await);
    d.client.shutdown().await;
}

async fn eventually_empty(d: &Device) -> bool {
    for _ in 0..400 {
        if d.client.shadow_snapshot().await.values.is_empty() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    false
}

#[tokio::test]
async fn e2e_documents_advance_version() {
    let d = Device::connect("2010").await;

    d.broker().deliver(
        &d.topics.documents(),
        br#"{"previous":{"version":3},"current":{"state":{"reported":{"brightness":"5"}},"version":4}}"#,
    );
    assert!(eventually(|| !d.recorder.params().is_empty()).await);
    assert_eq!(d.recorder.params()[0].0, ShadowDataType::Document);
    assert_eq!(d.client.shadow_snapshot().await.version, Some(4));
    assert!(d.recorder.attributes().is_empty());
    d.client.shutdown().await;
}
