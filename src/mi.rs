//! Management (MI) command layer: `Read MI Data`, health polling, and
//! configuration get/set, all sharing the same small envelope.
//!
//! MI request header (16 bytes): `type(1) nmp(1) meb(1) rsvd(1) opcode(1)
//! rsvd(3) cdw0(4) cdw1(4)`. Response header mirrors it: `type nmp meb rsvd
//! status(1) rsvd(3) nmresp(4, low 24 bits valid) rsvd(4)`.

use crate::error::{Error, Result};
use crate::frame::{self, MessageType, Nmp, RequestFrame, ResponseFrame, HDR_NMP_OFFSET};
use crate::topology::Endpoint;

const MI_HDR_LEN: usize = 16;
const OPCODE_OFFSET: usize = 4;
const CDW0_OFFSET: usize = 8;
const CDW1_OFFSET: usize = 12;

const STATUS_OFFSET: usize = 4;
const NMRESP_OFFSET: usize = 8;

const OPCODE_READ_DATA: u8 = 0x00;
const OPCODE_SUBSYSTEM_HEALTH_POLL: u8 = 0x01;
const OPCODE_CONFIGURATION_SET: u8 = 0x03;
const OPCODE_CONFIGURATION_GET: u8 = 0x04;

const DTYPE_SUBSYSTEM_INFO: u8 = 0x00;
const DTYPE_PORT_INFO: u8 = 0x01;
const DTYPE_CONTROLLER_LIST: u8 = 0x02;
const DTYPE_CONTROLLER_INFO: u8 = 0x03;

/// Fixed size of the Subsystem Information data structure.
pub const SUBSYSTEM_INFO_LEN: usize = 32;
/// Fixed size of the Port Information data structure.
pub const PORT_INFO_LEN: usize = 32;
/// Fixed size of the Controller Information data structure.
pub const CONTROLLER_INFO_LEN: usize = 32;
/// Fixed size of the Subsystem Health Status Poll data structure.
pub const HEALTH_POLL_LEN: usize = 32;
/// Largest controller id count a Controller List response may claim.
pub const NVME_ID_CTRL_LIST_MAX: usize = 2047;

fn new_request_header(buf: &mut [u8; MI_HDR_LEN], opcode: u8) {
    Nmp::encode_request_prefix(buf, MessageType::Mi);
    buf[OPCODE_OFFSET] = opcode;
}

fn check_response_header(resp: &ResponseFrame) -> Result<u8> {
    if resp.header().len() < STATUS_OFFSET + 1 {
        return Err(Error::protocol("MI response header shorter than envelope"));
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

/// Shared `Read MI Data Structure` exchange: builds `cdw0` from the caller,
/// submits, and returns the number of payload bytes actually received.
fn read_mi_data(ep: &mut Endpoint, cdw0: u32, out: &mut [u8]) -> Result<usize> {
    let mut req_header = [0u8; MI_HDR_LEN];
    new_request_header(&mut req_header, OPCODE_READ_DATA);
    req_header[CDW0_OFFSET..CDW0_OFFSET + 4].copy_from_slice(&cdw0.to_le_bytes());

    let mut req = RequestFrame::new(&mut req_header, &[]);
    let mut resp_header = [0u8; MI_HDR_LEN];
    let mut resp = ResponseFrame::new(&mut resp_header, out);

    ep.submit(&mut req, &mut resp)?;
    let status = check_response_header(&resp)?;
    status_to_result(status)?;
    Ok(resp.payload().len())
}

/// `Read MI Data` for the Subsystem Information structure.
pub fn read_mi_data_subsystem(ep: &mut Endpoint, out: &mut [u8; SUBSYSTEM_INFO_LEN]) -> Result<()> {
    let cdw0 = (DTYPE_SUBSYSTEM_INFO as u32) << 24;
    let n = read_mi_data(ep, cdw0, out)?;
    if n != SUBSYSTEM_INFO_LEN {
        return Err(Error::protocol(format!(
            "subsystem info reply was {n} bytes, expected {SUBSYSTEM_INFO_LEN}"
        )));
    }
    Ok(())
}

/// `Read MI Data` for a given Port's Port Information structure.
pub fn read_mi_data_port(ep: &mut Endpoint, port_id: u8, out: &mut [u8; PORT_INFO_LEN]) -> Result<()> {
    let cdw0 = ((DTYPE_PORT_INFO as u32) << 24) | ((port_id as u32) << 16);
    let n = read_mi_data(ep, cdw0, out)?;
    if n != PORT_INFO_LEN {
        return Err(Error::protocol(format!(
            "port info reply was {n} bytes, expected {PORT_INFO_LEN}"
        )));
    }
    Ok(())
}

/// `Read MI Data` for the Controller List, starting at `start_ctrlid`. Any
/// response length is accepted; the caller parses the leading count field.
/// Returns the number of bytes actually received.
pub fn read_mi_data_controller_list(
    ep: &mut Endpoint,
    start_ctrlid: u16,
    out: &mut [u8],
) -> Result<usize> {
    let cdw0 = ((DTYPE_CONTROLLER_LIST as u32) << 24) | (start_ctrlid as u32);
    read_mi_data(ep, cdw0, out)
}

/// `Read MI Data` for a given Controller's Controller Information structure.
///
/// `ctrl_id` is placed host-order into the low 16 bits of `cdw0`; the whole
/// `cdw0` word is written little-endian exactly once at submission time.
/// (An earlier revision of this builder ran `ctrl_id` through its own
/// little-endian conversion before folding it into `cdw0`, which silently
/// byte-swapped it a second time on a big-endian host; there is only ever
/// one little-endian conversion, and it happens last, over the whole word.)
pub fn read_mi_data_controller_info(
    ep: &mut Endpoint,
    ctrl_id: u16,
    out: &mut [u8; CONTROLLER_INFO_LEN],
) -> Result<()> {
    let cdw0 = ((DTYPE_CONTROLLER_INFO as u32) << 24) | (ctrl_id as u32);
    let n = read_mi_data(ep, cdw0, out)?;
    if n != CONTROLLER_INFO_LEN {
        return Err(Error::protocol(format!(
            "controller info reply was {n} bytes, expected {CONTROLLER_INFO_LEN}"
        )));
    }
    Ok(())
}

/// Subsystem Health Status Poll. `clear` requests the device clear the
/// Composite Controller Status changes it is reporting (cdw1 bit 31).
pub fn subsystem_health_status_poll(
    ep: &mut Endpoint,
    clear: bool,
    out: &mut [u8; HEALTH_POLL_LEN],
) -> Result<()> {
    let mut req_header = [0u8; MI_HDR_LEN];
    new_request_header(&mut req_header, OPCODE_SUBSYSTEM_HEALTH_POLL);
    let cdw1: u32 = if clear { 1 << 31 } else { 0 };
    req_header[CDW1_OFFSET..CDW1_OFFSET + 4].copy_from_slice(&cdw1.to_le_bytes());

    let mut req = RequestFrame::new(&mut req_header, &[]);
    let mut resp_header = [0u8; MI_HDR_LEN];
    let mut resp = ResponseFrame::new(&mut resp_header, out);

    ep.submit(&mut req, &mut resp)?;
    let status = check_response_header(&resp)?;
    status_to_result(status)?;

    let n = resp.payload().len();
    if n != HEALTH_POLL_LEN {
        return Err(Error::protocol(format!(
            "health poll reply was {n} bytes, expected {HEALTH_POLL_LEN}"
        )));
    }
    Ok(())
}

/// Configuration Get: two opaque input dwords, 24-bit `nmresp` out.
pub fn configuration_get(ep: &mut Endpoint, cdw0: u32, cdw1: u32) -> Result<u32> {
    let mut req_header = [0u8; MI_HDR_LEN];
    new_request_header(&mut req_header, OPCODE_CONFIGURATION_GET);
    req_header[CDW0_OFFSET..CDW0_OFFSET + 4].copy_from_slice(&cdw0.to_le_bytes());
    req_header[CDW1_OFFSET..CDW1_OFFSET + 4].copy_from_slice(&cdw1.to_le_bytes());

    let mut req = RequestFrame::new(&mut req_header, &[]);
    let mut resp_header = [0u8; MI_HDR_LEN];
    let mut empty = [0u8; 0];
    let mut resp = ResponseFrame::new(&mut resp_header, &mut empty);

    ep.submit(&mut req, &mut resp)?;
    let status = check_response_header(&resp)?;
    status_to_result(status)?;

    if resp.header().len() < NMRESP_OFFSET + 4 {
        return Err(Error::protocol("configuration get reply missing nmresp"));
    }
    let nmresp = u32::from_le_bytes(
        resp.header()[NMRESP_OFFSET..NMRESP_OFFSET + 4]
            .try_into()
            .unwrap(),
    );
    Ok(nmresp & 0x00FF_FFFF)
}

/// Configuration Set: two opaque input dwords, no response data.
pub fn configuration_set(ep: &mut Endpoint, cdw0: u32, cdw1: u32) -> Result<()> {
    let mut req_header = [0u8; MI_HDR_LEN];
    new_request_header(&mut req_header, OPCODE_CONFIGURATION_SET);
    req_header[CDW0_OFFSET..CDW0_OFFSET + 4].copy_from_slice(&cdw0.to_le_bytes());
    req_header[CDW1_OFFSET..CDW1_OFFSET + 4].copy_from_slice(&cdw1.to_le_bytes());

    let mut req = RequestFrame::new(&mut req_header, &[]);
    let mut resp_header = [0u8; MI_HDR_LEN];
    let mut empty = [0u8; 0];
    let mut resp = ResponseFrame::new(&mut resp_header, &mut empty);

    ep.submit(&mut req, &mut resp)?;
    let status = check_response_header(&resp)?;
    status_to_result(status)
}
