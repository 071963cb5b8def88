//! Define an error type for the tor-circpad crate.

use thiserror::Error;
use tor_error::{ErrorKind, HasKind};

use crate::negotiate::ResponseCode;

/// An error type for the tor-circpad crate.
///
/// This type should be matched via [`HasKind::kind`] rather than by variant
/// when the caller only cares about how to react (log and continue, close
/// the circuit, treat as a local bug).
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// A machine specification failed validation at registration time.
    #[error("invalid machine specification: {0}")]
    InvalidSpec(String),

    /// An error occurred while parsing a `NEGOTIATE`/`NEGOTIATED` cell body.
    #[error("padding negotiation cell parsing error: {0}")]
    BytesErr(#[from] tor_bytes::Error),

    /// We tried to negotiate a machine the peer doesn't support, or that
    /// doesn't exist locally.
    #[error("unknown padding machine number {0}")]
    UnknownMachine(u8),

    /// The peer replied to a `NEGOTIATE` with a non-success response code.
    #[error("padding machine negotiation refused: {0:?}")]
    NegotiationRefused(ResponseCode),

    /// A `NEGOTIATED` reply's counter did not match any pending or active
    /// slot; per the protocol this is dropped silently by callers, but is
    /// exposed here for observability.
    #[error("stale NEGOTIATED reply (machine_ctr {0} unknown)")]
    StaleNegotiated(u32),

    /// A padding cell arrived on a slot with no spec reference.
    #[error("padding cell received on slot with no active machine (hop {hop})")]
    UnexpectedPadding {
        /// The hop the padding cell was received from.
        hop: u8,
    },

    /// The circuit's advertised subprotocol versions don't include support
    /// for circuit padding at all.
    #[error("target hop does not advertise circuit padding support")]
    NotSupported,

    /// Conditions for the machine no longer hold; used internally to drive
    /// shutdown, not normally surfaced to callers.
    #[error("padding machine conditions no longer satisfied")]
    ConditionsUnmet,

    /// The scheduler could not arm a timer.
    #[error("could not arm padding timer: {0}")]
    TimerFailure(String),

    /// A bug: an invariant of this crate was violated.
    #[error("internal error: {0}")]
    Bug(#[from] tor_error::Bug),
}

impl HasKind for Error {
    fn kind(&self) -> ErrorKind {
        use Error as E;
        use ErrorKind as EK;
        match self {
            E::InvalidSpec(_) => EK::BadApiUsage,
            E::BytesErr(tor_bytes::Error::Bug(e)) => e.kind(),
            E::BytesErr(_) => EK::TorProtocolViolation,
            E::UnknownMachine(_) => EK::TorProtocolViolation,
            E::NegotiationRefused(_) => EK::TorProtocolViolation,
            E::StaleNegotiated(_) => EK::TorProtocolViolation,
            E::UnexpectedPadding { .. } => EK::TorProtocolViolation,
            E::NotSupported => EK::NotImplemented,
            E::ConditionsUnmet => EK::Other,
            E::TimerFailure(_) => EK::Internal,
            E::Bug(e) => e.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn unexpected_padding_is_protocol_violation() {
        let e = Error::UnexpectedPadding { hop: 1 };
        assert_eq!(e.kind(), ErrorKind::TorProtocolViolation);
    }

    #[test]
    fn not_supported_is_not_implemented() {
        assert_eq!(Error::NotSupported.kind(), ErrorKind::NotImplemented);
    }
}
