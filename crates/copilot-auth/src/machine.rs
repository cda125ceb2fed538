//! Device flow state machine
//!
//! Pure state machine: receives events, returns (new_state, action).
//! The caller (`flow.rs`) executes the I/O implied by each action and feeds
//! the outcome back in as the next event. Time enters only through event
//! payloads, so every transition is testable without a runtime.

use common::Secret;
use serde::Serialize;
use tokio::time::{Duration, Instant};

use crate::client::{ConnectionStatus, DeviceCodeResponse, PollResponse, PollState};
use crate::constants::{
    CODE_EXPIRED_MESSAGE, DEFAULT_POLL_INTERVAL, DENIED_MESSAGE, MAX_POLL_DURATION,
    TIMEOUT_MESSAGE,
};

/// Lifecycle status of the device flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthStatus {
    #[default]
    Idle,
    Requesting,
    Pending,
    Authorized,
    Denied,
    Expired,
    Error,
}

impl AuthStatus {
    /// A flow in a terminal status only moves again on start, reset or a
    /// status check.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AuthStatus::Authorized | AuthStatus::Denied | AuthStatus::Expired | AuthStatus::Error
        )
    }

    /// Requesting a code or waiting on the user.
    pub fn is_active(self) -> bool {
        matches!(self, AuthStatus::Requesting | AuthStatus::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AuthStatus::Idle => "idle",
            AuthStatus::Requesting => "requesting",
            AuthStatus::Pending => "pending",
            AuthStatus::Authorized => "authorized",
            AuthStatus::Denied => "denied",
            AuthStatus::Expired => "expired",
            AuthStatus::Error => "error",
        }
    }
}

/// Observable state of one flow attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceAuthorization {
    pub status: AuthStatus,
    /// Present from `pending` on; never logged or serialized
    pub device_code: Option<Secret<String>>,
    pub user_code: Option<String>,
    pub verification_uri: Option<String>,
    /// Issue time plus the server's `expires_in`
    pub expires_at: Option<Instant>,
    pub poll_interval: Duration,
    /// Set only once authorized
    pub username: Option<String>,
    pub error: Option<String>,
    pub is_polling: bool,
}

impl Default for DeviceAuthorization {
    fn default() -> Self {
        Self {
            status: AuthStatus::Idle,
            device_code: None,
            user_code: None,
            verification_uri: None,
            expires_at: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            username: None,
            error: None,
            is_polling: false,
        }
    }
}

impl DeviceAuthorization {
    /// Time left before the code expires, zero once past.
    pub fn expires_in(&self, now: Instant) -> Option<Duration> {
        self.expires_at
            .map(|at| at.saturating_duration_since(now))
    }

    fn terminal(self, status: AuthStatus, error: Option<String>) -> Self {
        Self {
            status,
            error,
            is_polling: false,
            ..self
        }
    }
}

/// Events that drive state transitions.
#[derive(Debug)]
pub enum FlowEvent {
    /// Caller asked for a new flow
    Start,
    /// `start` returned a device code
    CodeIssued {
        response: DeviceCodeResponse,
        now: Instant,
    },
    /// `start` failed; message is already user-facing
    StartFailed { message: String },
    /// Poll timer fired. `elapsed` is measured from when the code was issued.
    PollDue { now: Instant, elapsed: Duration },
    /// Server answered a poll
    PollCompleted(PollResponse),
    /// Poll never got an answer (network, decode, 5xx)
    PollFailed,
    StopPolling,
    Reset,
    /// Out-of-band connection check returned
    StatusChecked(ConnectionStatus),
    /// Revoke failed; prior state is kept
    DisconnectFailed { message: String },
}

/// Side effects requested by a transition.
#[derive(Debug, PartialEq)]
pub enum FlowAction {
    /// Call `start` on the backend
    RequestCode,
    /// Call `poll` with this code now
    Poll { device_code: Secret<String> },
    /// Arm the poll timer
    SchedulePoll { delay: Duration },
    /// Disarm the poll timer
    CancelPoll,
    None,
}

/// Process an event and return the new state plus the action to execute.
pub fn handle_event(
    state: DeviceAuthorization,
    event: FlowEvent,
) -> (DeviceAuthorization, FlowAction) {
    use AuthStatus as S;

    match (state.status, event) {
        (_, FlowEvent::Reset) => (DeviceAuthorization::default(), FlowAction::CancelPoll),

        (_, FlowEvent::StopPolling) => (
            DeviceAuthorization {
                is_polling: false,
                ..state
            },
            FlowAction::CancelPoll,
        ),

        (_, FlowEvent::Start) => (
            DeviceAuthorization {
                status: S::Requesting,
                ..DeviceAuthorization::default()
            },
            FlowAction::RequestCode,
        ),

        (S::Requesting, FlowEvent::CodeIssued { response, now }) => {
            let poll_interval = response
                .interval
                .filter(|&secs| secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_POLL_INTERVAL);
            let next = DeviceAuthorization {
                status: S::Pending,
                device_code: Some(Secret::new(response.device_code)),
                user_code: Some(response.user_code),
                verification_uri: Some(response.verification_uri),
                // An expiry past what `Instant` can hold falls back to the
                // poll ceiling
                expires_at: now
                    .checked_add(Duration::from_secs(response.expires_in))
                    .or_else(|| now.checked_add(MAX_POLL_DURATION)),
                poll_interval,
                is_polling: true,
                ..state
            };
            (
                next,
                FlowAction::SchedulePoll {
                    delay: poll_interval,
                },
            )
        }

        (S::Requesting, FlowEvent::StartFailed { message }) => {
            (state.terminal(S::Error, Some(message)), FlowAction::None)
        }

        (S::Pending, FlowEvent::PollDue { now, elapsed }) if state.is_polling => {
            if elapsed > MAX_POLL_DURATION {
                return (
                    state.terminal(S::Expired, Some(TIMEOUT_MESSAGE.into())),
                    FlowAction::None,
                );
            }
            if state.expires_at.is_some_and(|at| now > at) {
                return (
                    state.terminal(S::Expired, Some(CODE_EXPIRED_MESSAGE.into())),
                    FlowAction::None,
                );
            }
            match state.device_code.clone() {
                Some(device_code) => (state, FlowAction::Poll { device_code }),
                None => (state, FlowAction::None),
            }
        }

        (S::Pending, FlowEvent::PollCompleted(response)) if state.is_polling => {
            match response.status {
                PollState::Authorized => (
                    DeviceAuthorization {
                        username: response.username,
                        ..state.terminal(S::Authorized, None)
                    },
                    FlowAction::None,
                ),
                PollState::Denied => (
                    state.terminal(S::Denied, Some(DENIED_MESSAGE.into())),
                    FlowAction::None,
                ),
                PollState::Expired => (
                    state.terminal(S::Expired, Some(CODE_EXPIRED_MESSAGE.into())),
                    FlowAction::None,
                ),
                PollState::Error => {
                    let message = response
                        .error
                        .filter(|e| !e.trim().is_empty())
                        .unwrap_or_else(|| "An error occurred".into());
                    (state.terminal(S::Error, Some(message)), FlowAction::None)
                }
                PollState::Pending | PollState::Unknown => {
                    let delay = state.poll_interval;
                    (state, FlowAction::SchedulePoll { delay })
                }
            }
        }

        (S::Pending, FlowEvent::PollFailed) if state.is_polling => {
            let delay = state.poll_interval;
            (state, FlowAction::SchedulePoll { delay })
        }

        (_, FlowEvent::StatusChecked(status)) if status.connected => (
            DeviceAuthorization {
                status: S::Authorized,
                username: status.username,
                is_polling: false,
                ..state
            },
            FlowAction::CancelPoll,
        ),

        // A "not connected" answer says nothing about a flow still in progress
        (S::Requesting | S::Pending, FlowEvent::StatusChecked(_)) => (state, FlowAction::None),

        (_, FlowEvent::StatusChecked(_)) => (
            DeviceAuthorization {
                status: S::Idle,
                username: None,
                ..state
            },
            FlowAction::None,
        ),

        (_, FlowEvent::DisconnectFailed { message }) => (
            DeviceAuthorization {
                error: Some(message),
                ..state
            },
            FlowAction::None,
        ),

        // Late results for a flow that has moved on
        (_, _) => (state, FlowAction::None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code_response(expires_in: u64, interval: Option<u64>) -> DeviceCodeResponse {
        DeviceCodeResponse {
            device_code: "dc_1".into(),
            user_code: "ABCD-1234".into(),
            verification_uri: "https://github.com/login/device".into(),
            expires_in,
            interval,
        }
    }

    fn pending_state(now: Instant) -> DeviceAuthorization {
        let (state, _) = handle_event(DeviceAuthorization::default(), FlowEvent::Start);
        let (state, _) = handle_event(
            state,
            FlowEvent::CodeIssued {
                response: code_response(900, Some(5)),
                now,
            },
        );
        state
    }

    fn poll(status: PollState) -> PollResponse {
        PollResponse {
            status,
            username: None,
            error: None,
        }
    }

    #[test]
    fn start_from_idle_requests_code() {
        let (state, action) = handle_event(DeviceAuthorization::default(), FlowEvent::Start);
        assert_eq!(state.status, AuthStatus::Requesting);
        assert_eq!(action, FlowAction::RequestCode);
    }

    #[test]
    fn start_clears_previous_flow() {
        let now = Instant::now();
        let previous = DeviceAuthorization {
            status: AuthStatus::Denied,
            username: Some("bob".into()),
            error: Some(DENIED_MESSAGE.into()),
            ..pending_state(now)
        };

        let (state, _) = handle_event(previous, FlowEvent::Start);
        assert_eq!(state.status, AuthStatus::Requesting);
        assert!(state.device_code.is_none());
        assert!(state.user_code.is_none());
        assert!(state.error.is_none());
        assert!(state.username.is_none());
        assert!(state.expires_at.is_none());
    }

    #[test]
    fn code_issued_moves_to_pending_and_schedules_poll() {
        let now = Instant::now();
        let (state, _) = handle_event(DeviceAuthorization::default(), FlowEvent::Start);
        let (state, action) = handle_event(
            state,
            FlowEvent::CodeIssued {
                response: code_response(900, Some(7)),
                now,
            },
        );

        assert_eq!(state.status, AuthStatus::Pending);
        assert!(state.is_polling);
        assert_eq!(state.user_code.as_deref(), Some("ABCD-1234"));
        assert_eq!(state.expires_at, Some(now + Duration::from_secs(900)));
        assert_eq!(state.poll_interval, Duration::from_secs(7));
        assert_eq!(
            action,
            FlowAction::SchedulePoll {
                delay: Duration::from_secs(7)
            }
        );
    }

    #[test]
    fn missing_or_zero_interval_falls_back_to_default() {
        for interval in [None, Some(0)] {
            let (state, _) = handle_event(DeviceAuthorization::default(), FlowEvent::Start);
            let (state, _) = handle_event(
                state,
                FlowEvent::CodeIssued {
                    response: code_response(900, interval),
                    now: Instant::now(),
                },
            );
            assert_eq!(state.poll_interval, DEFAULT_POLL_INTERVAL);
        }
    }

    #[test]
    fn start_failure_is_terminal_error() {
        let (state, _) = handle_event(DeviceAuthorization::default(), FlowEvent::Start);
        let (state, action) = handle_event(
            state,
            FlowEvent::StartFailed {
                message: "Failed to start device flow".into(),
            },
        );
        assert_eq!(state.status, AuthStatus::Error);
        assert_eq!(state.error.as_deref(), Some("Failed to start device flow"));
        assert_eq!(action, FlowAction::None);
    }

    #[test]
    fn code_issued_after_reset_is_ignored() {
        let (state, action) = handle_event(
            DeviceAuthorization::default(),
            FlowEvent::CodeIssued {
                response: code_response(900, None),
                now: Instant::now(),
            },
        );
        assert_eq!(state.status, AuthStatus::Idle);
        assert_eq!(action, FlowAction::None);
    }

    #[test]
    fn poll_due_issues_poll_with_device_code() {
        let now = Instant::now();
        let state = pending_state(now);
        let (state, action) = handle_event(
            state,
            FlowEvent::PollDue {
                now: now + Duration::from_secs(5),
                elapsed: Duration::from_secs(5),
            },
        );
        assert_eq!(state.status, AuthStatus::Pending);
        assert_eq!(
            action,
            FlowAction::Poll {
                device_code: Secret::new("dc_1".to_string())
            }
        );
    }

    #[test]
    fn poll_due_past_server_expiry_expires_without_poll() {
        let now = Instant::now();
        let (state, _) = handle_event(DeviceAuthorization::default(), FlowEvent::Start);
        let (state, _) = handle_event(
            state,
            FlowEvent::CodeIssued {
                response: code_response(60, Some(5)),
                now,
            },
        );

        let (state, action) = handle_event(
            state,
            FlowEvent::PollDue {
                now: now + Duration::from_secs(61),
                elapsed: Duration::from_secs(61),
            },
        );
        assert_eq!(state.status, AuthStatus::Expired);
        assert_eq!(state.error.as_deref(), Some(CODE_EXPIRED_MESSAGE));
        assert!(!state.is_polling);
        assert_eq!(action, FlowAction::None);
    }

    #[test]
    fn unrepresentable_expiry_falls_back_to_ceiling() {
        let now = Instant::now();
        let (state, _) = handle_event(DeviceAuthorization::default(), FlowEvent::Start);
        let (state, action) = handle_event(
            state,
            FlowEvent::CodeIssued {
                response: code_response(u64::MAX, Some(5)),
                now,
            },
        );

        assert_eq!(state.status, AuthStatus::Pending);
        assert_eq!(state.expires_at, Some(now + MAX_POLL_DURATION));
        assert_eq!(state.expires_in(now), Some(MAX_POLL_DURATION));
        assert_eq!(
            action,
            FlowAction::SchedulePoll {
                delay: Duration::from_secs(5)
            }
        );
    }

    #[test]
    fn wall_clock_ceiling_beats_server_expiry() {
        let now = Instant::now();
        let (state, _) = handle_event(DeviceAuthorization::default(), FlowEvent::Start);
        let (state, _) = handle_event(
            state,
            FlowEvent::CodeIssued {
                response: code_response(3600, Some(5)),
                now,
            },
        );

        let (state, action) = handle_event(
            state,
            FlowEvent::PollDue {
                now: now + MAX_POLL_DURATION + Duration::from_secs(1),
                elapsed: MAX_POLL_DURATION + Duration::from_secs(1),
            },
        );
        assert_eq!(state.status, AuthStatus::Expired);
        assert_eq!(state.error.as_deref(), Some(TIMEOUT_MESSAGE));
        assert_eq!(action, FlowAction::None);
    }

    #[test]
    fn pending_and_unknown_reschedule_at_interval() {
        for status in [PollState::Pending, PollState::Unknown] {
            let state = pending_state(Instant::now());
            let (state, action) = handle_event(state, FlowEvent::PollCompleted(poll(status)));
            assert_eq!(state.status, AuthStatus::Pending);
            assert_eq!(
                action,
                FlowAction::SchedulePoll {
                    delay: Duration::from_secs(5)
                }
            );
        }
    }

    #[test]
    fn authorized_records_username() {
        let state = pending_state(Instant::now());
        let (state, action) = handle_event(
            state,
            FlowEvent::PollCompleted(PollResponse {
                status: PollState::Authorized,
                username: Some("alice".into()),
                error: None,
            }),
        );
        assert_eq!(state.status, AuthStatus::Authorized);
        assert_eq!(state.username.as_deref(), Some("alice"));
        assert!(!state.is_polling);
        assert_eq!(action, FlowAction::None);
    }

    #[test]
    fn terminal_poll_statuses_carry_messages() {
        let cases = [
            (PollState::Denied, AuthStatus::Denied, DENIED_MESSAGE),
            (PollState::Expired, AuthStatus::Expired, CODE_EXPIRED_MESSAGE),
            (PollState::Error, AuthStatus::Error, "An error occurred"),
        ];
        for (poll_state, expected, message) in cases {
            let state = pending_state(Instant::now());
            let (state, _) = handle_event(state, FlowEvent::PollCompleted(poll(poll_state)));
            assert_eq!(state.status, expected);
            assert_eq!(state.error.as_deref(), Some(message));
            assert!(!state.is_polling);
        }
    }

    #[test]
    fn server_error_message_is_kept() {
        let state = pending_state(Instant::now());
        let (state, _) = handle_event(
            state,
            FlowEvent::PollCompleted(PollResponse {
                status: PollState::Error,
                username: None,
                error: Some("access_denied by org policy".into()),
            }),
        );
        assert_eq!(state.error.as_deref(), Some("access_denied by org policy"));
    }

    #[test]
    fn network_failure_keeps_pending() {
        let state = pending_state(Instant::now());
        let (state, action) = handle_event(state, FlowEvent::PollFailed);
        assert_eq!(state.status, AuthStatus::Pending);
        assert!(state.error.is_none());
        assert_eq!(
            action,
            FlowAction::SchedulePoll {
                delay: Duration::from_secs(5)
            }
        );
    }

    #[test]
    fn stop_polling_keeps_status() {
        let state = pending_state(Instant::now());
        let (state, action) = handle_event(state, FlowEvent::StopPolling);
        assert_eq!(state.status, AuthStatus::Pending);
        assert!(!state.is_polling);
        assert_eq!(action, FlowAction::CancelPoll);

        // A poll that lands after stop is ignored
        let (state, action) = handle_event(state, FlowEvent::PollFailed);
        assert_eq!(state.status, AuthStatus::Pending);
        assert_eq!(action, FlowAction::None);
    }

    #[test]
    fn reset_returns_to_idle_from_any_state() {
        let state = DeviceAuthorization {
            status: AuthStatus::Authorized,
            username: Some("alice".into()),
            ..pending_state(Instant::now())
        };
        let (state, action) = handle_event(state, FlowEvent::Reset);
        assert_eq!(state, DeviceAuthorization::default());
        assert_eq!(action, FlowAction::CancelPoll);
    }

    #[test]
    fn poll_result_after_reset_is_ignored() {
        let (state, _) = handle_event(pending_state(Instant::now()), FlowEvent::Reset);
        let (state, action) = handle_event(
            state,
            FlowEvent::PollCompleted(PollResponse {
                status: PollState::Authorized,
                username: Some("alice".into()),
                error: None,
            }),
        );
        assert_eq!(state.status, AuthStatus::Idle);
        assert!(state.username.is_none());
        assert_eq!(action, FlowAction::None);
    }

    #[test]
    fn status_check_connected_authorizes() {
        let (state, action) = handle_event(
            DeviceAuthorization::default(),
            FlowEvent::StatusChecked(ConnectionStatus {
                connected: true,
                username: Some("octocat".into()),
            }),
        );
        assert_eq!(state.status, AuthStatus::Authorized);
        assert_eq!(state.username.as_deref(), Some("octocat"));
        assert_eq!(action, FlowAction::CancelPoll);
    }

    #[test]
    fn status_check_disconnected_goes_idle() {
        let state = DeviceAuthorization {
            status: AuthStatus::Authorized,
            username: Some("octocat".into()),
            ..DeviceAuthorization::default()
        };
        let (state, _) = handle_event(state, FlowEvent::StatusChecked(ConnectionStatus::default()));
        assert_eq!(state.status, AuthStatus::Idle);
        assert!(state.username.is_none());
    }

    #[test]
    fn status_check_disconnected_leaves_active_flow_alone() {
        let state = pending_state(Instant::now());
        let (state, action) =
            handle_event(state, FlowEvent::StatusChecked(ConnectionStatus::default()));
        assert_eq!(state.status, AuthStatus::Pending);
        assert!(state.is_polling);
        assert_eq!(action, FlowAction::None);
    }

    #[test]
    fn disconnect_failure_keeps_authorized() {
        let state = DeviceAuthorization {
            status: AuthStatus::Authorized,
            username: Some("octocat".into()),
            ..DeviceAuthorization::default()
        };
        let (state, _) = handle_event(
            state,
            FlowEvent::DisconnectFailed {
                message: "Failed to disconnect".into(),
            },
        );
        assert_eq!(state.status, AuthStatus::Authorized);
        assert_eq!(state.username.as_deref(), Some("octocat"));
        assert_eq!(state.error.as_deref(), Some("Failed to disconnect"));
    }

    #[test]
    fn expires_in_saturates() {
        let now = Instant::now();
        let state = pending_state(now);
        assert_eq!(state.expires_in(now), Some(Duration::from_secs(900)));
        assert_eq!(
            state.expires_in(now + Duration::from_secs(1000)),
            Some(Duration::ZERO)
        );
        assert_eq!(DeviceAuthorization::default().expires_in(now), None);
    }

    #[test]
    fn status_helpers() {
        assert!(AuthStatus::Denied.is_terminal());
        assert!(!AuthStatus::Pending.is_terminal());
        assert!(AuthStatus::Requesting.is_active());
        assert_eq!(AuthStatus::Expired.as_str(), "expired");
        assert_eq!(
            serde_json::to_value(AuthStatus::Authorized).unwrap(),
            serde_json::json!("authorized")
        );
    }
}
