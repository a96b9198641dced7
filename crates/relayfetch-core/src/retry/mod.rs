//! Relay retry engine.
//!
//! Error classification (transport failures, relay wrapper statuses, relay
//! error bodies), the attempt budget, and the loop that turns any number of
//! physical attempts into one outcome for the caller.

mod classify;
mod error;
mod policy;
mod run;

pub use classify::{
    classify_relay_body, classify_transport_error, classify_wrapper_status, FailureClass,
    RelayFault, WrapperVerdict,
};
pub use error::RelayError;
pub use policy::{Attempt, RetrySettings, DEFAULT_BLACKLIST_TTL};
pub use run::RelayTransport;

pub(crate) use policy::deadline_after;
