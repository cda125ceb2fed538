//! Device flow controller
//!
//! `DeviceFlow` executes the actions returned by `machine::handle_event`:
//! network calls go through `DeviceFlowClient`, poll timers through a
//! `ScheduledTask`. Observable state lives in a `watch` channel; the timer
//! handle, poll-start instant and attempt counter live in a private slot so
//! that bookkeeping never wakes subscribers.
//!
//! Every `start_device_flow` and `reset` bumps the attempt counter. Work that
//! was started under an older attempt (a start request or poll still in
//! flight) checks the counter when it lands and drops its result.

use std::sync::{Arc, Weak};

use serde_json::Value;
use tokio::sync::{Mutex, watch};
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::client::DeviceFlowClient;
use crate::error::{Error, Result};
use crate::machine::{AuthStatus, DeviceAuthorization, FlowAction, FlowEvent, handle_event};
use crate::schedule::ScheduledTask;

/// Handle to the device flow. Cheap to clone; clones share one flow.
#[derive(Clone)]
pub struct DeviceFlow {
    inner: Arc<Inner>,
}

struct Inner {
    client: DeviceFlowClient,
    state: watch::Sender<DeviceAuthorization>,
    poller: Mutex<Poller>,
}

#[derive(Default)]
struct Poller {
    task: Option<ScheduledTask>,
    /// When the current code was issued; the 15 minute ceiling counts from here
    started_at: Option<Instant>,
    attempt: u64,
    /// Consecutive poll calls that got no answer
    failures: u32,
}

impl Poller {
    fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.cancel();
        }
        self.started_at = None;
        self.failures = 0;
    }

    /// Called from inside the poll task when the chain ends on its own.
    fn finish(&mut self) {
        self.task = None;
        self.started_at = None;
        self.failures = 0;
    }
}

impl DeviceFlow {
    pub fn new(client: DeviceFlowClient) -> Self {
        let (state, _) = watch::channel(DeviceAuthorization::default());
        Self {
            inner: Arc::new(Inner {
                client,
                state,
                poller: Mutex::new(Poller::default()),
            }),
        }
    }

    pub fn client(&self) -> &DeviceFlowClient {
        &self.inner.client
    }

    /// Current observable state.
    pub fn snapshot(&self) -> DeviceAuthorization {
        self.inner.state.borrow().clone()
    }

    /// Receiver that sees every state change.
    pub fn subscribe(&self) -> watch::Receiver<DeviceAuthorization> {
        self.inner.state.subscribe()
    }

    fn dispatch(&self, event: FlowEvent) -> FlowAction {
        let mut action = FlowAction::None;
        self.inner.state.send_if_modified(|state| {
            let (next, next_action) = handle_event(state.clone(), event);
            action = next_action;
            if *state == next {
                return false;
            }
            *state = next;
            true
        });
        action
    }

    /// Request a new device code and start polling.
    ///
    /// Cancels any flow already running. Failures end in the `error` status
    /// rather than being returned.
    pub async fn start_device_flow(&self) {
        let attempt = {
            let mut poller = self.inner.poller.lock().await;
            poller.cancel();
            poller.attempt += 1;
            self.dispatch(FlowEvent::Start);
            poller.attempt
        };
        info!(attempt, "starting copilot device flow");

        let result = self.inner.client.start_device_flow().await;

        let mut poller = self.inner.poller.lock().await;
        if poller.attempt != attempt {
            debug!(attempt, "device code arrived for a superseded flow, discarding");
            return;
        }

        match result {
            Ok(response) => {
                let now = Instant::now();
                let expires_in = response.expires_in;
                if let FlowAction::SchedulePoll { delay } =
                    self.dispatch(FlowEvent::CodeIssued { response, now })
                {
                    poller.started_at = Some(now);
                    poller.failures = 0;
                    poller.task = Some(self.spawn_poller(attempt, delay));
                    info!(
                        attempt,
                        expires_in,
                        interval_secs = delay.as_secs(),
                        "device code issued, waiting for user"
                    );
                }
                metrics::counter!("console_device_flow_starts_total", "outcome" => "issued")
                    .increment(1);
            }
            Err(e) => {
                warn!(attempt, error = %e, "device flow start failed");
                metrics::counter!("console_device_flow_starts_total", "outcome" => "failed")
                    .increment(1);
                self.dispatch(FlowEvent::StartFailed {
                    message: e.user_message("Failed to start device flow"),
                });
            }
        }
    }

    fn spawn_poller(&self, attempt: u64, delay: Duration) -> ScheduledTask {
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        ScheduledTask::chain(delay, move || {
            let inner = inner.clone();
            async move {
                let flow = DeviceFlow {
                    inner: inner.upgrade()?,
                };
                flow.poll_once(attempt).await
            }
        })
    }

    /// One poll cycle. Returns the delay until the next one, or `None` when
    /// the chain should end.
    async fn poll_once(&self, attempt: u64) -> Option<Duration> {
        let device_code = {
            let mut poller = self.inner.poller.lock().await;
            if poller.attempt != attempt {
                return None;
            }
            let now = Instant::now();
            let elapsed = poller
                .started_at
                .map(|started| now.saturating_duration_since(started))
                .unwrap_or_default();
            match self.dispatch(FlowEvent::PollDue { now, elapsed }) {
                FlowAction::Poll { device_code } => device_code,
                _ => {
                    poller.finish();
                    self.record_outcome();
                    return None;
                }
            }
        };

        let result = self.inner.client.poll_status(device_code.expose()).await;

        let mut poller = self.inner.poller.lock().await;
        if poller.attempt != attempt {
            debug!(attempt, "poll result for a superseded flow, discarding");
            return None;
        }

        let event = match result {
            Ok(response) => {
                poller.failures = 0;
                metrics::counter!("console_device_flow_polls_total", "outcome" => "answered")
                    .increment(1);
                FlowEvent::PollCompleted(response)
            }
            Err(e) => {
                poller.failures += 1;
                warn!(
                    attempt,
                    error = %e,
                    consecutive_failures = poller.failures,
                    "device flow poll failed, retrying at the same interval"
                );
                metrics::counter!("console_device_flow_polls_total", "outcome" => "failed")
                    .increment(1);
                FlowEvent::PollFailed
            }
        };

        match self.dispatch(event) {
            FlowAction::SchedulePoll { delay } => Some(delay),
            _ => {
                poller.finish();
                self.record_outcome();
                None
            }
        }
    }

    fn record_outcome(&self) {
        let state = self.snapshot();
        if !state.status.is_terminal() {
            return;
        }
        let status = state.status.as_str();
        match state.status {
            AuthStatus::Authorized => info!(
                username = state.username.as_deref().unwrap_or(""),
                "copilot device flow authorized"
            ),
            _ => warn!(
                status,
                error = state.error.as_deref().unwrap_or(""),
                "copilot device flow ended"
            ),
        }
        metrics::counter!("console_device_flow_completed_total", "status" => status).increment(1);
    }

    /// Halt polling without changing `status`. Safe with no timer active.
    pub async fn stop_polling(&self) {
        let mut poller = self.inner.poller.lock().await;
        poller.cancel();
        self.dispatch(FlowEvent::StopPolling);
    }

    /// Stop polling and clear everything back to `idle`.
    pub async fn reset(&self) {
        let mut poller = self.inner.poller.lock().await;
        poller.cancel();
        poller.attempt += 1;
        self.dispatch(FlowEvent::Reset);
    }

    /// Reconcile with the backend's view of the Copilot connection.
    ///
    /// Best effort: transport errors are logged and otherwise ignored.
    pub async fn check_status(&self) {
        match self.inner.client.get_status().await {
            Ok(status) => {
                let mut poller = self.inner.poller.lock().await;
                if self.dispatch(FlowEvent::StatusChecked(status)) == FlowAction::CancelPoll {
                    poller.cancel();
                    poller.attempt += 1;
                }
            }
            Err(e) => debug!(error = %e, "copilot status check failed, ignoring"),
        }
    }

    /// Revoke the Copilot credential, then reset.
    ///
    /// On failure the message is recorded in `error` and the prior state,
    /// including `authorized`, is kept.
    pub async fn disconnect(&self) -> Result<()> {
        match self.inner.client.disconnect().await {
            Ok(()) => {
                info!("copilot credential revoked");
                self.reset().await;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "copilot disconnect failed");
                self.dispatch(FlowEvent::DisconnectFailed {
                    message: e.user_message("Failed to disconnect"),
                });
                Err(e)
            }
        }
    }

    /// Ask the backend to refresh the stored Copilot token.
    pub async fn refresh_token(&self) -> Result<Value> {
        self.inner.client.refresh_token().await
    }

    /// Wait until the current flow settles.
    ///
    /// Resolves with the username once authorized. Denial, expiry and server
    /// errors map to their `Error` variants; a reset, a stop, or calling this
    /// with no flow running yields `Error::Cancelled`.
    pub async fn wait_for_outcome(&self) -> Result<String> {
        let mut rx = self.subscribe();
        let state = rx
            .wait_for(|s| !waiting(s))
            .await
            .map_err(|_| Error::Cancelled)?
            .clone();

        match state.status {
            AuthStatus::Authorized => Ok(state.username.unwrap_or_default()),
            AuthStatus::Denied => Err(Error::Denied),
            AuthStatus::Expired => Err(Error::Expired(state.error.unwrap_or_default())),
            AuthStatus::Error => Err(Error::Failed(state.error.unwrap_or_default())),
            _ => Err(Error::Cancelled),
        }
    }
}

fn waiting(state: &DeviceAuthorization) -> bool {
    match state.status {
        AuthStatus::Requesting => true,
        AuthStatus::Pending => state.is_polling,
        _ => false,
    }
}
