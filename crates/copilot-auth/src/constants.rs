//! Device flow endpoints and timing limits
//!
//! Paths are relative to the management API base URL configured on the
//! transport.

use std::time::Duration;

/// Base path of the Copilot OAuth endpoints on the management API
pub const DEFAULT_BASE_PATH: &str = "/oauth/copilot";

/// Poll spacing used when the server omits `interval` (or sends 0)
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Hard ceiling on a single flow, measured from the moment the code is issued.
/// Applies even while the server still reports `pending`.
pub const MAX_POLL_DURATION: Duration = Duration::from_secs(15 * 60);

/// Error text for a flow that ran past `MAX_POLL_DURATION`
pub const TIMEOUT_MESSAGE: &str = "Authorization timeout";

/// Error text for a code past its server-declared expiry
pub const CODE_EXPIRED_MESSAGE: &str = "Code expired";

/// Error text for an explicit denial
pub const DENIED_MESSAGE: &str = "Authorization was denied";
