//! GitHub Copilot device authorization
//!
//! Client and state machine for the management API's Copilot device flow.
//! The crate has no dependency on the console binary; it only needs a
//! `transport::Transport`.
//!
//! Flow lifecycle:
//! 1. `DeviceFlow::start_device_flow()` requests a device code → `requesting`
//! 2. The server returns user code + verification URI → `pending`
//! 3. A scheduled task polls every `interval` seconds
//! 4. The user enters the code in a browser → poll reports `authorized`
//! 5. Denial, server expiry, local expiry or the 15 minute ceiling end the
//!    flow in `denied` / `expired`; server-reported failures in `error`
//! 6. `reset()` or `disconnect()` return the flow to `idle`

pub mod client;
pub mod constants;
pub mod error;
pub mod flow;
pub mod machine;
pub mod schedule;

pub use client::{ConnectionStatus, DeviceCodeResponse, DeviceFlowClient, PollResponse, PollState};
pub use constants::*;
pub use error::{Error, Result};
pub use flow::DeviceFlow;
pub use machine::{AuthStatus, DeviceAuthorization, FlowAction, FlowEvent, handle_event};
pub use schedule::ScheduledTask;
