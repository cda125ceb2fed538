//! Types shared by the gateway console crates

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
