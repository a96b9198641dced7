//! Classify transport errors, relay wrapper statuses and relay error bodies.
//!
//! Each function inspects its input once and returns a closed tag; the retry
//! loop only ever branches on these tags.

use crate::transport::{Operation, TransportError};
use http::StatusCode;

/// Coarse class of a failed physical exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The transport reported a time-based failure.
    Timeout,
    /// The read phase failed; the connection is likely frozen or half-closed.
    OperationFailure,
    /// Any other network error.
    Other,
}

impl FailureClass {
    /// Whether pooled connections should be flushed before the next attempt.
    pub fn flushes_connections(self) -> bool {
        matches!(self, FailureClass::Timeout | FailureClass::OperationFailure)
    }
}

/// What a non-200 wrapper status means on a non-final attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapperVerdict {
    /// 503: the relay is out of capacity. Deprioritize it and back off.
    Overloaded,
    /// 302/404/405/502: the answer did not come from a genuine relay.
    SuspectNotGenuine,
    /// Anything else: retry right away.
    Other,
}

/// Relay-internal transient failure reported inside a decoded 502 body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayFault {
    DeadlineExceeded,
    OverQuota,
    FetchClosed,
}

impl RelayFault {
    /// Checked in this order; the first marker found wins.
    pub const ALL: [RelayFault; 3] = [
        RelayFault::DeadlineExceeded,
        RelayFault::OverQuota,
        RelayFault::FetchClosed,
    ];

    /// Byte pattern identifying the fault in a relay error body.
    pub fn marker(self) -> &'static [u8] {
        match self {
            RelayFault::DeadlineExceeded => b"DEADLINE_EXCEEDED",
            // Matches both "Over quota" and "over quota".
            RelayFault::OverQuota => b"ver quota",
            RelayFault::FetchClosed => b"urlfetch: CLOSED",
        }
    }

    /// Whether the retry waits for the backoff delay first.
    pub fn backs_off(self) -> bool {
        !matches!(self, RelayFault::DeadlineExceeded)
    }
}

/// Classify a transport error. Read-phase failures count as timeouts.
pub fn classify_transport_error(e: &TransportError) -> FailureClass {
    if e.is_timeout() {
        return FailureClass::Timeout;
    }
    if e.operation() == Some(Operation::Read) {
        return FailureClass::OperationFailure;
    }
    FailureClass::Other
}

/// Classify a non-200 status returned by the relay itself.
pub fn classify_wrapper_status(status: StatusCode) -> WrapperVerdict {
    match status {
        StatusCode::SERVICE_UNAVAILABLE => WrapperVerdict::Overloaded,
        StatusCode::FOUND
        | StatusCode::BAD_GATEWAY
        | StatusCode::NOT_FOUND
        | StatusCode::METHOD_NOT_ALLOWED => WrapperVerdict::SuspectNotGenuine,
        _ => WrapperVerdict::Other,
    }
}

/// Find a known transient fault marker in a decoded 502 body.
pub fn classify_relay_body(body: &[u8]) -> Option<RelayFault> {
    RelayFault::ALL
        .into_iter()
        .find(|fault| contains(body, fault.marker()))
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_wins_over_phase() {
        let e = TransportError::new("slow").with_timeout().during(Operation::Connect);
        assert_eq!(classify_transport_error(&e), FailureClass::Timeout);
    }

    #[test]
    fn read_failure_is_operation_failure() {
        let e = TransportError::new("reset by peer").during(Operation::Read);
        assert_eq!(classify_transport_error(&e), FailureClass::OperationFailure);
        assert!(FailureClass::OperationFailure.flushes_connections());
    }

    #[test]
    fn connect_failure_is_other() {
        let e = TransportError::new("refused").during(Operation::Connect);
        assert_eq!(classify_transport_error(&e), FailureClass::Other);
        assert!(!FailureClass::Other.flushes_connections());
    }

    #[test]
    fn wrapper_503_is_overload() {
        assert_eq!(
            classify_wrapper_status(StatusCode::SERVICE_UNAVAILABLE),
            WrapperVerdict::Overloaded
        );
    }

    #[test]
    fn wrapper_suspect_statuses() {
        for code in [302u16, 404, 405, 502] {
            let status = StatusCode::from_u16(code).unwrap();
            assert_eq!(
                classify_wrapper_status(status),
                WrapperVerdict::SuspectNotGenuine,
                "status {code}"
            );
        }
    }

    #[test]
    fn wrapper_other_statuses() {
        for code in [301u16, 400, 403, 429, 500, 504] {
            let status = StatusCode::from_u16(code).unwrap();
            assert_eq!(classify_wrapper_status(status), WrapperVerdict::Other, "status {code}");
        }
    }

    #[test]
    fn body_markers() {
        assert_eq!(
            classify_relay_body(b"error: API_CALL DEADLINE_EXCEEDED"),
            Some(RelayFault::DeadlineExceeded)
        );
        assert_eq!(
            classify_relay_body(b"<h1>Over Quota</h1> Over quota"),
            Some(RelayFault::OverQuota)
        );
        assert_eq!(
            classify_relay_body(b"ApplicationError: 5 urlfetch: CLOSED"),
            Some(RelayFault::FetchClosed)
        );
        assert_eq!(classify_relay_body(b"upstream sent garbage"), None);
        assert_eq!(classify_relay_body(b""), None);
    }

    #[test]
    fn earlier_marker_wins() {
        assert_eq!(
            classify_relay_body(b"over quota; DEADLINE_EXCEEDED"),
            Some(RelayFault::DeadlineExceeded)
        );
    }

    #[test]
    fn only_deadline_skips_backoff() {
        assert!(!RelayFault::DeadlineExceeded.backs_off());
        assert!(RelayFault::OverQuota.backs_off());
        assert!(RelayFault::FetchClosed.backs_off());
    }
}
