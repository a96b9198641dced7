pub mod config;
pub mod logging;

pub mod blacklist;
pub mod body;
pub mod observe;
pub mod relay;
pub mod retry;
pub mod transport;

pub use body::Body;
pub use retry::{RelayError, RelayTransport, RetrySettings};
