//! Negotiation protocol wire codec (§4.H, §6.1).
//!
//! `NEGOTIATE` (origin to relay) and `NEGOTIATED` (relay to origin) are
//! carried as relay cells whose command is
//! [`RelayCmd::PADDING_NEGOTIATE`]/[`RelayCmd::PADDING_NEGOTIATED`]
//! (already defined in `tor_cell::relaycell`). Their bodies follow the
//! same "version byte first, then fixed fields" convention as the
//! connection-level `PaddingNegotiate` message this crate's sibling
//! subsystem uses, but with a circuit-scoped payload.

use caret::caret_int;
use tor_bytes::{EncodeResult, Error as BytesError, Reader, Result as BytesResult, Writer};

/// The only currently defined negotiation payload version.
pub const NEGOTIATION_VERSION: u8 = 0;

caret_int! {
    /// Whether a `NEGOTIATE`/`NEGOTIATED` message starts or stops a machine.
    pub struct NegotiateCmd(u8) {
        /// Install and start a machine.
        START = 1,
        /// Tear down the active machine in this slot.
        STOP = 2,
    }
}

caret_int! {
    /// Which kind of endpoint a negotiated machine targets (§6.1
    /// `machine_type`).
    pub struct MachineType(u8) {
        /// A circuit-setup (client-side) machine.
        CLIENT = 0,
        /// A relay-side machine.
        RELAY = 1,
    }
}

caret_int! {
    /// Outcome of a negotiation request, carried in `NEGOTIATED` only
    /// (§4.H, §7 category 2).
    pub struct ResponseCode(u8) {
        /// The machine was installed (or torn down) successfully.
        SUCCESS = 0,
        /// `machine_number` does not name a registered machine.
        ERR_UNKNOWN_MACHINE = 1,
        /// The payload's `version` is not supported.
        ERR_UNSUPPORTED_VERSION = 2,
        /// The machine's conditions do not hold on the relay side.
        ERR_NOT_APPLICABLE = 3,
        /// The relay encountered an internal error handling the request.
        ERR_INTERNAL = 4,
    }
}

/// A `NEGOTIATE` message: origin to relay, requesting a machine be
/// started or stopped (§4.H, §6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiate {
    /// Payload version; currently always [`NEGOTIATION_VERSION`].
    pub version: u8,
    /// Start or stop.
    pub command: NegotiateCmd,
    /// Client-side or relay-side machine.
    pub machine_type: MachineType,
    /// Which registered machine to start (ignored on STOP, but still
    /// echoed so the relay can match the outstanding slot).
    pub machine_number: u8,
    /// Monotonically increasing per-slot counter, used to match late
    /// replies across rapid replacement (§3 "Replacement").
    pub machine_ctr: u32,
}

impl Negotiate {
    /// Encode this message's body (8 bytes, §6.1).
    pub fn encode(&self) -> EncodeResult<Vec<u8>> {
        let mut w: Vec<u8> = Vec::with_capacity(9);
        w.write_u8(self.version);
        w.write_u8(self.command.get());
        w.write_u8(self.machine_type.get());
        w.write_u8(self.machine_number);
        w.write_all(&self.machine_ctr.to_le_bytes());
        Ok(w)
    }

    /// Decode this message's body.
    pub fn decode(r: &mut Reader<'_>) -> BytesResult<Self> {
        let version = r.take_u8()?;
        if version != NEGOTIATION_VERSION {
            return Err(BytesError::InvalidMessage(
                "unrecognized padding negotiation version".into(),
            ));
        }
        let command = r.take_u8()?.into();
        let machine_type = r.take_u8()?.into();
        let machine_number = r.take_u8()?;
        let ctr_bytes = r.take(4)?;
        let machine_ctr = u32::from_le_bytes(
            ctr_bytes
                .try_into()
                .expect("Reader::take(4) always yields exactly 4 bytes"),
        );
        Ok(Negotiate {
            version,
            command,
            machine_type,
            machine_number,
            machine_ctr,
        })
    }
}

/// A `NEGOTIATED` message: relay to origin, the response to a prior
/// `NEGOTIATE` (§4.H, §6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiated {
    /// Payload version; currently always [`NEGOTIATION_VERSION`].
    pub version: u8,
    /// Mirrors the request's command.
    pub command: NegotiateCmd,
    /// Mirrors the request's machine type.
    pub machine_type: MachineType,
    /// Mirrors the request's machine number.
    pub machine_number: u8,
    /// Mirrors the request's counter, so the origin can match this reply
    /// to the slot that sent it.
    pub machine_ctr: u32,
    /// Outcome of the request.
    pub response_code: ResponseCode,
}

impl Negotiated {
    /// Encode this message's body (9 bytes, §6.1).
    pub fn encode(&self) -> EncodeResult<Vec<u8>> {
        let mut w: Vec<u8> = Vec::with_capacity(9);
        w.write_u8(self.version);
        w.write_u8(self.command.get());
        w.write_u8(self.machine_type.get());
        w.write_u8(self.machine_number);
        w.write_all(&self.machine_ctr.to_le_bytes());
        w.write_u8(self.response_code.get());
        Ok(w)
    }

    /// Decode this message's body.
    pub fn decode(r: &mut Reader<'_>) -> BytesResult<Self> {
        let version = r.take_u8()?;
        if version != NEGOTIATION_VERSION {
            return Err(BytesError::InvalidMessage(
                "unrecognized padding negotiation version".into(),
            ));
        }
        let command = r.take_u8()?.into();
        let machine_type = r.take_u8()?.into();
        let machine_number = r.take_u8()?;
        let ctr_bytes = r.take(4)?;
        let machine_ctr = u32::from_le_bytes(
            ctr_bytes
                .try_into()
                .expect("Reader::take(4) always yields exactly 4 bytes"),
        );
        let response_code = r.take_u8()?.into();
        Ok(Negotiated {
            version,
            command,
            machine_type,
            machine_number,
            machine_ctr,
            response_code,
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn negotiate_round_trips() {
        let msg = Negotiate {
            version: NEGOTIATION_VERSION,
            command: NegotiateCmd::START,
            machine_type: MachineType::CLIENT,
            machine_number: 7,
            machine_ctr: 0x0102_0304,
        };
        let bytes = msg.encode().unwrap();
        assert_eq!(bytes.len(), 8);
        let mut r = Reader::from_slice(&bytes);
        let decoded = Negotiate::decode(&mut r).unwrap();
        r.should_be_exhausted().unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn negotiated_round_trips() {
        let msg = Negotiated {
            version: NEGOTIATION_VERSION,
            command: NegotiateCmd::STOP,
            machine_type: MachineType::RELAY,
            machine_number: 200,
            machine_ctr: 42,
            response_code: ResponseCode::ERR_NOT_APPLICABLE,
        };
        let bytes = msg.encode().unwrap();
        assert_eq!(bytes.len(), 9);
        let mut r = Reader::from_slice(&bytes);
        let decoded = Negotiated::decode(&mut r).unwrap();
        r.should_be_exhausted().unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn machine_ctr_is_little_endian_on_the_wire() {
        let msg = Negotiate {
            version: NEGOTIATION_VERSION,
            command: NegotiateCmd::START,
            machine_type: MachineType::CLIENT,
            machine_number: 1,
            machine_ctr: 1,
        };
        let bytes = msg.encode().unwrap();
        assert_eq!(&bytes[4..8], &[1, 0, 0, 0]);
    }

    #[test]
    fn unrecognized_version_is_rejected() {
        let bytes = [9, 1, 0, 1, 0, 0, 0, 0];
        let mut r = Reader::from_slice(&bytes);
        assert!(Negotiate::decode(&mut r).is_err());
    }

    #[test]
    fn unrecognized_command_byte_is_preserved_open_endedly() {
        // caret_int! allows unrecognized wire values to round-trip instead
        // of failing to parse, matching how RelayCmd handles unknown
        // relay commands.
        let bytes = [0, 250, 0, 1, 0, 0, 0, 0];
        let mut r = Reader::from_slice(&bytes);
        let decoded = Negotiate::decode(&mut r).unwrap();
        assert_eq!(decoded.command.get(), 250);
    }
}
