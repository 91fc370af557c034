//! Message framing: the request/response frame objects and the wire-level
//! `nmp` header byte.
//!
//! A "frame" here is borrowed header/payload byte slices plus a MIC word
//! rather than a raw `{ptr,len}` pair. Header, payload, and MIC live in
//! separate buffers all the way down to the transport's
//! `sendmsg`/`recvmsg` call.

use crate::error::{Error, Result};

/// NVMe-MI message type: the first byte of every NVMe-MI header. On an
/// MCTP transport this value is echoed in
/// the MCTP message-type field (OR'd with [`MIC_PRESENT_BIT`]); the header
/// buffer carries it too so the generic submit pipeline can validate it
/// without knowing which transport is in use.
pub const NMIMT_NVME_MI: u8 = 0x04;

/// MIC-present bit of the MCTP message-type field.
pub const MIC_PRESENT_BIT: u8 = 0x80;

/// Byte offset of the type field within the header buffer.
pub const HDR_TYPE_OFFSET: usize = 0;

/// Byte offset of the `nmp` field within the header buffer.
pub const HDR_NMP_OFFSET: usize = 1;

/// Minimum length of an NVMe-MI message header: the 4-byte generic header
/// (type, nmp, meb, reserved) plus the 4-byte minimal message-class header.
pub const MIN_HDR_SIZE: usize = 8;

/// Message class values carried in `nmp` bits 6:3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Mi = 1,
    Admin = 3,
}

/// Decodes/encodes the `nmp` header byte (header offset 1): bit 7 = ROR,
/// bits 6:3 = message class, bit 0 = command slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nmp(pub u8);

impl Nmp {
    pub fn request(message_type: MessageType) -> Self {
        Self(((message_type as u8) & 0xf) << 3)
    }

    /// Writes `header[0] = type` and `header[1] = nmp` for a fresh request
    /// of the given message class. `header` must be at least
    /// [`MIN_HDR_SIZE`] long; the caller fills in the rest.
    pub fn encode_request_prefix(header: &mut [u8], message_type: MessageType) {
        header[HDR_TYPE_OFFSET] = NMIMT_NVME_MI;
        header[HDR_NMP_OFFSET] = Nmp::request(message_type).0;
    }

    pub fn ror(self) -> bool {
        (self.0 & 0x80) != 0
    }

    pub fn set_ror(&mut self, ror: bool) {
        if ror {
            self.0 |= 0x80;
        } else {
            self.0 &= !0x80;
        }
    }

    pub fn message_type(self) -> u8 {
        (self.0 >> 3) & 0xf
    }

    /// Command slot (bit 0). The wire field allows slot 1, but this core
    /// hard-wires slot 0 everywhere; slot selection is reserved for a
    /// future protocol need, not exposed here.
    pub fn command_slot(self) -> u8 {
        self.0 & 0x01
    }
}

/// A request frame, ready for submission. `header` and `payload` borrow the
/// caller's buffers; `mic` is filled in by the submit pipeline when the
/// transport requires message integrity checking.
pub struct RequestFrame<'a> {
    pub header: &'a mut [u8],
    pub payload: &'a [u8],
    pub mic: u32,
}

/// A response frame. `header`/`payload` are pre-sized to the maximum the
/// caller will accept; after a successful submit they are shrunk via
/// [`ResponseFrame::truncate_to`] to reflect what the transport actually
/// received.
pub struct ResponseFrame<'a> {
    header: &'a mut [u8],
    header_len: usize,
    payload: &'a mut [u8],
    payload_len: usize,
    pub mic: u32,
}

impl<'a> RequestFrame<'a> {
    pub fn new(header: &'a mut [u8], payload: &'a [u8]) -> Self {
        Self {
            header,
            payload,
            mic: 0,
        }
    }

    pub fn header_len(&self) -> usize {
        self.header.len()
    }

    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}

impl<'a> ResponseFrame<'a> {
    pub fn new(header: &'a mut [u8], payload: &'a mut [u8]) -> Self {
        let header_len = header.len();
        let payload_len = payload.len();
        Self {
            header,
            header_len,
            payload,
            payload_len,
            mic: 0,
        }
    }

    pub fn header(&self) -> &[u8] {
        &self.header[..self.header_len]
    }

    pub fn header_mut(&mut self) -> &mut [u8] {
        &mut self.header[..self.header_len]
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload[..self.payload_len]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.payload[..self.payload_len]
    }

    pub fn header_cap(&self) -> usize {
        self.header.len()
    }

    pub fn payload_cap(&self) -> usize {
        self.payload.len()
    }

    /// Shrinks the visible header/payload lengths, as the MCTP transport
    /// does after reconciling a truncated datagram against the caller's
    /// buffers.
    pub fn truncate_to(&mut self, header_len: usize, payload_len: usize) {
        debug_assert!(header_len <= self.header.len());
        debug_assert!(payload_len <= self.payload.len());
        self.header_len = header_len;
        self.payload_len = payload_len;
    }
}

/// Validates the request/response invariants before any I/O is attempted.
/// `resp_data_len` is the size of the buffer the caller is willing to
/// receive into (0 if none requested).
pub fn validate_request(
    req: &RequestFrame,
    resp_data_len: usize,
) -> Result<()> {
    if req.header.len() < MIN_HDR_SIZE {
        return Err(Error::invalid_arg(format!(
            "header_len {} below minimum {}",
            req.header.len(),
            MIN_HDR_SIZE
        )));
    }
    if req.header.len() % 4 != 0 {
        return Err(Error::invalid_arg("header_len must be a multiple of 4"));
    }
    if req.payload.len() % 4 != 0 {
        return Err(Error::invalid_arg("payload_len must be a multiple of 4"));
    }
    if req.header[HDR_TYPE_OFFSET] != NMIMT_NVME_MI {
        return Err(Error::invalid_arg("header type byte is not NVMe-MI (0x04)"));
    }
    let nmp = Nmp(req.header[HDR_NMP_OFFSET]);
    if nmp.ror() {
        return Err(Error::invalid_arg("request header has ROR bit set"));
    }
    if nmp.command_slot() != 0 {
        return Err(Error::invalid_arg("command slot must be 0"));
    }
    // Admin bidirectionality rule: a request payload and a requested
    // response payload cannot both be non-empty.
    if !req.payload.is_empty() && resp_data_len > 0 {
        return Err(Error::invalid_arg(
            "request and response data cannot both be non-empty",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nmp_roundtrip() {
        let mut nmp = Nmp::request(MessageType::Admin);
        assert_eq!(nmp.message_type(), 3);
        assert!(!nmp.ror());
        nmp.set_ror(true);
        assert!(nmp.ror());
        assert_eq!(nmp.command_slot(), 0);
    }

    #[test]
    fn rejects_short_header() {
        let mut hdr = [0u8; 4];
        let req = RequestFrame::new(&mut hdr, &[]);
        assert!(validate_request(&req, 0).is_err());
    }

    #[test]
    fn rejects_unaligned_payload() {
        let mut hdr = [0u8; 8];
        let payload = [0u8; 3];
        let req = RequestFrame::new(&mut hdr, &payload);
        assert!(validate_request(&req, 0).is_err());
    }

    #[test]
    fn rejects_bidirectional_data() {
        let mut hdr = [0u8; 8];
        let payload = [0u8; 4];
        let req = RequestFrame::new(&mut hdr, &payload);
        assert!(validate_request(&req, 8).is_err());
    }

    #[test]
    fn rejects_response_header() {
        let mut hdr = [0u8; 8];
        hdr[HDR_TYPE_OFFSET] = NMIMT_NVME_MI;
        hdr[HDR_NMP_OFFSET] = 0x80;
        let req = RequestFrame::new(&mut hdr, &[]);
        assert!(validate_request(&req, 0).is_err());
    }

    #[test]
    fn rejects_wrong_type_byte() {
        let mut hdr = [0u8; 8];
        hdr[HDR_TYPE_OFFSET] = 0x01;
        let req = RequestFrame::new(&mut hdr, &[]);
        assert!(validate_request(&req, 0).is_err());
    }
}
