//! End-to-end tests for shadowlink.
//!
//! Every test lives under `tests/` and drives a real `DeviceClient` through
//! the mock connector from `sl-mqtt-channel`, playing the broker's side of
//! each session.
