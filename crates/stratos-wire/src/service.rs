//! Service-port packet bodies: `ServiceRequestResponse`, `ServiceError`
//! (spec.md §3, §6 — types 5, 6, 7).
//!
//! `ServiceRequest` and `ServiceResponse` share the same body layout and the
//! same [`ServiceRequestResponse`] struct; only the outer type tag (5 vs 6)
//! distinguishes direction. Both are padded to [`PACKET_LENGTH`] bytes on
//! the wire so the results collector observes a consistent byte delta per
//! dialogue packet.

use stratos_types::{NodeAddress, ServiceId};

use crate::buf::{Reader, Writer};
use crate::WireError;

pub const TYPE_SERVICE_REQUEST: u8 = 5;
pub const TYPE_SERVICE_RESPONSE: u8 = 6;
pub const TYPE_SERVICE_ERROR: u8 = 7;

/// Fixed on-wire size of a `ServiceRequest`/`ServiceResponse` datagram,
/// tag byte included (spec.md §6).
pub const PACKET_LENGTH: usize = 256;

/// Dialogue phase flag (spec.md §3, §6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DialogueFlag {
    Null = 0,
    Start = 1,
    Started = 2,
    Do = 3,
    Stop = 4,
    Stopped = 5,
}

impl DialogueFlag {
    pub fn from_u8(v: u8) -> Result<Self, WireError> {
        Ok(match v {
            0 => Self::Null,
            1 => Self::Start,
            2 => Self::Started,
            3 => Self::Do,
            4 => Self::Stop,
            5 => Self::Stopped,
            other => return Err(WireError::BadFlag(other)),
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ServiceRequestResponse {
    pub sender_address: NodeAddress,
    pub destination_address: NodeAddress,
    pub service: ServiceId,
    pub flag: DialogueFlag,
}

impl ServiceRequestResponse {
    /// Encode with the given outer tag (5 for a request, 6 for a response)
    /// and pad to [`PACKET_LENGTH`].
    pub fn encode(&self, type_tag: u8) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_u8(type_tag);
        w.put_u32(self.sender_address.0);
        w.put_u32(self.destination_address.0);
        w.put_string(self.service.as_str());
        w.put_u8(self.flag as u8);
        w.pad_to(PACKET_LENGTH);
        w.into_bytes()
    }

    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(body);
        let sender_address = NodeAddress(r.get_u32()?);
        let destination_address = NodeAddress(r.get_u32()?);
        let service = ServiceId::new(r.get_string()?);
        let flag = DialogueFlag::from_u8(r.get_u8()?)?;
        Ok(Self {
            sender_address,
            destination_address,
            service,
            flag,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ServiceError {
    pub sender_address: NodeAddress,
    pub destination_address: NodeAddress,
    pub service: ServiceId,
}

impl ServiceError {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_u8(TYPE_SERVICE_ERROR);
        w.put_u32(self.sender_address.0);
        w.put_u32(self.destination_address.0);
        w.put_string(self.service.as_str());
        w.pad_to(PACKET_LENGTH);
        w.into_bytes()
    }

    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(body);
        let sender_address = NodeAddress(r.get_u32()?);
        let destination_address = NodeAddress(r.get_u32()?);
        let service = ServiceId::new(r.get_string()?);
        Ok(Self {
            sender_address,
            destination_address,
            service,
        })
    }

    /// Build the error aimed back at the logical source of a message by
    /// swapping sender/destination (spec.md §4.5).
    pub fn bounce(original_sender: NodeAddress, original_destination: NodeAddress, service: ServiceId) -> Self {
        Self {
            sender_address: original_destination,
            destination_address: original_sender,
            service,
        }
    }
}
