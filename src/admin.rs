//! Admin command layer: Identify, segmented Get Log Page, Security
//! Send/Receive, and the generic Admin transfer escape hatch.
//!
//! Admin request header (60 bytes): `type nmp meb rsvd opcode flags ctrl_id(2)
//! cdw1 cdw2 cdw3 cdw4 cdw5 doff dlen cdw10 cdw11 cdw12 cdw13 cdw14 cdw15`.
//! The Admin response header is much smaller (20 bytes): the same 4-byte
//! `type nmp meb rsvd` prefix, then `status` where the request has `opcode`,
//! followed by the `cdw0`/`cdw1`/`cdw3` result words.

use crate::error::{Error, Result};
use crate::frame::{MessageType, Nmp, RequestFrame, ResponseFrame};
use crate::topology::Endpoint;

/// Admin *request* header length. The response header is much shorter; see
/// `ADMIN_RESP_HDR_LEN` below.
const ADMIN_HDR_LEN: usize = 60;
const OPCODE_OFFSET: usize = 4;
const FLAGS_OFFSET: usize = 5;
const CTRL_ID_OFFSET: usize = 6;
const CDW1_OFFSET: usize = 8;
const CDW2_OFFSET: usize = 12;
const CDW3_OFFSET: usize = 16;
const CDW4_OFFSET: usize = 20;
const CDW5_OFFSET: usize = 24;
const DOFF_OFFSET: usize = 28;
const DLEN_OFFSET: usize = 32;
const CDW10_OFFSET: usize = 36;
const CDW11_OFFSET: usize = 40;
const CDW12_OFFSET: usize = 44;
const CDW13_OFFSET: usize = 48;
const CDW14_OFFSET: usize = 52;
const CDW15_OFFSET: usize = 56;

const STATUS_OFFSET: usize = 4;
const CDW0_RESULT_OFFSET: usize = 8;

/// The Admin response envelope is far smaller than the request header:
/// the 4-byte generic message header (type, nmp, reserved) followed by
/// status/cqedw0/cqedw1/cqedw3 (16 bytes), 20 bytes total. Sizing the
/// response header buffer to `ADMIN_HDR_LEN` (60, the request size) would
/// make `transport/mctp.rs`'s exact-reconcile case expect 60 header bytes
/// from a device that only ever sends 20, misclassifying every real
/// reply's header/payload split.
const ADMIN_RESP_HDR_LEN: usize = 20;

const FLAG_DLEN_VALID: u8 = 0x1;
const FLAG_DOFF_VALID: u8 = 0x2;

const OPCODE_SECURITY_SEND: u8 = 0x81;
const OPCODE_SECURITY_RECEIVE: u8 = 0x82;
const OPCODE_GET_LOG_PAGE: u8 = 0x02;
const OPCODE_IDENTIFY: u8 = 0x06;

/// Largest Admin payload, request or response.
pub const MAX_ADMIN_DATA_LEN: usize = 4096;
const LOG_PAGE_WINDOW: usize = 4096;

fn put_u32(header: &mut [u8], offset: usize, value: u32) {
    header[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn get_u32(header: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(header[offset..offset + 4].try_into().unwrap())
}

fn new_request_header(opcode: u8, ctrl_id: u16) -> [u8; ADMIN_HDR_LEN] {
    let mut header = [0u8; ADMIN_HDR_LEN];
    Nmp::encode_request_prefix(&mut header, MessageType::Admin);
    header[OPCODE_OFFSET] = opcode;
    header[CTRL_ID_OFFSET..CTRL_ID_OFFSET + 2].copy_from_slice(&ctrl_id.to_le_bytes());
    header
}

fn check_response_header(resp: &ResponseFrame) -> Result<u8> {
    if resp.header().len() < STATUS_OFFSET + 1 {
        return Err(Error::protocol("Admin response header shorter than envelope"));
    }
    Ok(resp.header()[STATUS_OFFSET])
}

fn status_to_result(status: u8) -> Result<()> {
    if status != 0 {
        Err(Error::DeviceStatus(status))
    } else {
        Ok(())
    }
}

/// Runs one Admin exchange, applies the common status-byte handling, and
/// returns `(cdw0 result, response bytes actually received)`.
fn exchange(
    ep: &mut Endpoint,
    header: &mut [u8; ADMIN_HDR_LEN],
    req_payload: &[u8],
    resp_payload: &mut [u8],
) -> Result<(u32, usize)> {
    let mut req = RequestFrame::new(header, req_payload);
    let mut resp_header = [0u8; ADMIN_RESP_HDR_LEN];
    let mut resp = ResponseFrame::new(&mut resp_header, resp_payload);

    ep.submit(&mut req, &mut resp)?;
    let status = check_response_header(&resp)?;
    status_to_result(status)?;

    let result = if resp.header().len() >= CDW0_RESULT_OFFSET + 4 {
        get_u32(resp.header(), CDW0_RESULT_OFFSET)
    } else {
        0
    };
    let n = resp.payload().len();
    Ok((result, n))
}

/// Parameters for a (partial) Identify command.
pub struct IdentifyRequest {
    pub nsid: u32,
    pub cns: u8,
    pub cntid: u16,
    pub csi: u8,
    pub cns_specific_id: u16,
    pub uuidx: u8,
    pub offset: u32,
}

/// Issues Identify, reading exactly `out.len()` bytes starting at
/// `req.offset`. Identify is all-or-nothing: a short reply is `PROTOCOL`.
/// Returns `cdw0` from the response when the caller wants it.
pub fn identify(ep: &mut Endpoint, req: &IdentifyRequest, out: &mut [u8]) -> Result<u32> {
    let size = out.len();
    if size == 0 || size as u64 > 0xFFFF_FFFF {
        return Err(Error::invalid_arg("identify size out of range"));
    }
    if req.offset as u64 > 0xFFFF_FFFF {
        return Err(Error::invalid_arg("identify offset out of range"));
    }
    if req.offset % 4 != 0 {
        return Err(Error::invalid_arg("identify offset must be 4-byte aligned"));
    }

    let mut header = new_request_header(OPCODE_IDENTIFY, 0);
    put_u32(&mut header, CDW1_OFFSET, req.nsid);
    put_u32(
        &mut header,
        CDW10_OFFSET,
        (req.cns as u32) | ((req.cntid as u32) << 16),
    );
    put_u32(&mut header, CDW11_OFFSET, req.cns_specific_id as u32);
    put_u32(
        &mut header,
        CDW14_OFFSET,
        ((req.csi as u32) << 24) | (req.uuidx as u32 & 0x7f),
    );
    put_u32(&mut header, DLEN_OFFSET, size as u32);
    put_u32(&mut header, DOFF_OFFSET, req.offset);

    header[FLAGS_OFFSET] = if req.offset != 0 {
        FLAG_DLEN_VALID | FLAG_DOFF_VALID
    } else {
        FLAG_DLEN_VALID
    };

    let (result, n) = exchange(ep, &mut header, &[], out)?;
    if n < size {
        return Err(Error::protocol(format!(
            "identify reply was {n} bytes, requested {size}"
        )));
    }
    Ok(result)
}

/// Parameters for a Get Log Page command, excluding the buffer and length
/// (those are the `out` slice passed to [`get_log_page`]).
pub struct GetLogPageRequest {
    pub nsid: u32,
    pub lid: u8,
    pub lsp: u8,
    pub lsi: u16,
    pub lpo: u64,
    pub csi: u8,
    pub ot: bool,
    pub rae: bool,
    pub uuidx: u8,
}

fn get_log_page_chunk(
    ep: &mut Endpoint,
    req: &GetLogPageRequest,
    lpo: u64,
    chunk: usize,
    rae_chunk: bool,
    out: &mut [u8],
) -> Result<usize> {
    let ndw = (chunk / 4) as u32 - 1;
    let numdl = ndw & 0xFFFF;
    let numdu = (ndw >> 16) & 0xFFFF;

    let mut header = new_request_header(OPCODE_GET_LOG_PAGE, 0);
    put_u32(&mut header, CDW1_OFFSET, req.nsid);
    let rae_bit: u32 = if rae_chunk { 1 } else { 0 };
    put_u32(
        &mut header,
        CDW10_OFFSET,
        (req.lid as u32) | ((req.lsp as u32 & 0xF) << 8) | (rae_bit << 15) | (numdl << 16),
    );
    put_u32(
        &mut header,
        CDW11_OFFSET,
        numdu | ((req.lsi as u32) << 16),
    );
    put_u32(&mut header, CDW12_OFFSET, (lpo & 0xFFFF_FFFF) as u32);
    put_u32(&mut header, CDW13_OFFSET, (lpo >> 32) as u32);
    put_u32(
        &mut header,
        CDW14_OFFSET,
        (req.uuidx as u32 & 0x7f) | (((req.ot as u32) & 1) << 23) | ((req.csi as u32) << 24),
    );
    put_u32(&mut header, DLEN_OFFSET, chunk as u32);
    header[FLAGS_OFFSET] = FLAG_DLEN_VALID;

    let (_result, n) = exchange(ep, &mut header, &[], out)?;
    Ok(n)
}

/// Segmented Get Log Page.
///
/// `out.len()` must be at least 4 and a multiple of 4 (every window's NUMD
/// field counts whole dwords); anything else is rejected up front, before
/// any window is issued. Iterates `out` in 4096-byte windows, forcing the
/// RAE bit on every non-final window so the device doesn't auto-clear an
/// asynchronous event mid-transfer; the final window carries the caller's
/// requested `rae`. Stops early on a short reply, returning the total bytes
/// obtained.
pub fn get_log_page(ep: &mut Endpoint, req: &GetLogPageRequest, out: &mut [u8]) -> Result<usize> {
    if out.len() < 4 || out.len() % 4 != 0 {
        return Err(Error::invalid_arg(
            "get log page buffer must be at least 4 bytes and a multiple of 4",
        ));
    }

    let total_len = out.len();
    let mut xfer_offset = 0usize;

    while xfer_offset < total_len {
        let chunk = (total_len - xfer_offset).min(LOG_PAGE_WINDOW);
        let final_chunk = xfer_offset + chunk >= total_len;
        let rae_chunk = if final_chunk { req.rae } else { true };

        let n = get_log_page_chunk(
            ep,
            req,
            req.lpo + xfer_offset as u64,
            chunk,
            rae_chunk,
            &mut out[xfer_offset..xfer_offset + chunk],
        )?;
        xfer_offset += n;
        if n < chunk {
            break;
        }
    }

    Ok(xfer_offset)
}

/// Security Send: `data` is carried out as the request payload.
pub fn security_send(
    ep: &mut Endpoint,
    secp: u8,
    spsp0: u8,
    spsp1: u8,
    nssf: u8,
    data: &[u8],
) -> Result<()> {
    if data.len() > MAX_ADMIN_DATA_LEN {
        return Err(Error::invalid_arg("security send payload exceeds 4096 bytes"));
    }
    let mut header = new_request_header(OPCODE_SECURITY_SEND, 0);
    put_u32(
        &mut header,
        CDW10_OFFSET,
        (nssf as u32) | ((spsp0 as u32) << 8) | ((spsp1 as u32) << 16) | ((secp as u32) << 24),
    );
    put_u32(&mut header, CDW11_OFFSET, data.len() as u32);
    put_u32(&mut header, DLEN_OFFSET, data.len() as u32);
    header[FLAGS_OFFSET] = FLAG_DLEN_VALID;

    let mut empty = [0u8; 0];
    exchange(ep, &mut header, data, &mut empty)?;
    Ok(())
}

/// Security Receive: `out` is filled in as the response payload.
pub fn security_receive(
    ep: &mut Endpoint,
    secp: u8,
    spsp0: u8,
    spsp1: u8,
    nssf: u8,
    out: &mut [u8],
) -> Result<usize> {
    if out.len() > MAX_ADMIN_DATA_LEN {
        return Err(Error::invalid_arg("security receive buffer exceeds 4096 bytes"));
    }
    let mut header = new_request_header(OPCODE_SECURITY_RECEIVE, 0);
    put_u32(
        &mut header,
        CDW10_OFFSET,
        (nssf as u32) | ((spsp0 as u32) << 8) | ((spsp1 as u32) << 16) | ((secp as u32) << 24),
    );
    put_u32(&mut header, CDW11_OFFSET, out.len() as u32);
    put_u32(&mut header, DLEN_OFFSET, out.len() as u32);
    header[FLAGS_OFFSET] = FLAG_DLEN_VALID;

    let (_result, n) = exchange(ep, &mut header, &[], out)?;
    Ok(n)
}

/// A fully-populated Admin request, for commands this crate doesn't model
/// directly (the generic transfer escape hatch).
pub struct AdminTransferRequest {
    pub opcode: u8,
    pub ctrl_id: u16,
    pub cdw1: u32,
    pub cdw2: u32,
    pub cdw3: u32,
    pub cdw4: u32,
    pub cdw5: u32,
    pub cdw10: u32,
    pub cdw11: u32,
    pub cdw12: u32,
    pub cdw13: u32,
    pub cdw14: u32,
    pub cdw15: u32,
    /// Byte offset into the response data the device should start writing
    /// at. Must be zero unless `resp_data` is non-empty: a non-zero Admin
    /// response offset is only meaningful when a response length was
    /// requested.
    pub resp_offset: u32,
}

/// The generic Admin transfer escape hatch. `req_data` and `resp_data`
/// cannot both be non-empty, enforced by the submit pipeline's
/// pre-check before any I/O is attempted. Both buffers are capped at
/// [`MAX_ADMIN_DATA_LEN`], matching every other Admin command in this
/// module. Returns `(cdw0 result, bytes actually received into
/// resp_data)`.
pub fn admin_transfer(
    ep: &mut Endpoint,
    req: &AdminTransferRequest,
    req_data: &[u8],
    resp_data: &mut [u8],
) -> Result<(u32, usize)> {
    if req_data.len() > MAX_ADMIN_DATA_LEN {
        return Err(Error::invalid_arg("admin transfer request data exceeds 4096 bytes"));
    }
    if resp_data.len() > MAX_ADMIN_DATA_LEN {
        return Err(Error::invalid_arg("admin transfer response buffer exceeds 4096 bytes"));
    }
    if req.resp_offset != 0 && resp_data.is_empty() {
        return Err(Error::invalid_arg(
            "admin transfer response offset is non-zero but no response length was requested",
        ));
    }

    let mut header = new_request_header(req.opcode, req.ctrl_id);
    put_u32(&mut header, CDW1_OFFSET, req.cdw1);
    put_u32(&mut header, CDW2_OFFSET, req.cdw2);
    put_u32(&mut header, CDW3_OFFSET, req.cdw3);
    put_u32(&mut header, CDW4_OFFSET, req.cdw4);
    put_u32(&mut header, CDW5_OFFSET, req.cdw5);
    put_u32(&mut header, CDW10_OFFSET, req.cdw10);
    put_u32(&mut header, CDW11_OFFSET, req.cdw11);
    put_u32(&mut header, CDW12_OFFSET, req.cdw12);
    put_u32(&mut header, CDW13_OFFSET, req.cdw13);
    put_u32(&mut header, CDW14_OFFSET, req.cdw14);
    put_u32(&mut header, CDW15_OFFSET, req.cdw15);

    let dlen = req_data.len().max(resp_data.len());
    put_u32(&mut header, DLEN_OFFSET, dlen as u32);
    put_u32(&mut header, DOFF_OFFSET, req.resp_offset);

    header[FLAGS_OFFSET] = if req.resp_offset != 0 {
        FLAG_DLEN_VALID | FLAG_DOFF_VALID
    } else {
        FLAG_DLEN_VALID
    };

    exchange(ep, &mut header, req_data, resp_data)
}
