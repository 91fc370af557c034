//! Generic submit pipeline: the single choke point every MI and Admin
//! command funnels through. Validates the request, stamps or verifies the
//! MIC depending on the transport's `mic_enabled` flag, delegates the
//! actual exchange to `Transport::submit`, then checks the response header
//! sanity every reply must satisfy.

use log::warn;

use crate::crc;
use crate::error::{Error, Result};
use crate::frame::{self, HDR_NMP_OFFSET, HDR_TYPE_OFFSET, Nmp, RequestFrame, ResponseFrame, NMIMT_NVME_MI};
use crate::transport::{Transport, TransportState};

/// One request/response exchange through `transport`, end to end.
///
/// `req.header`/`req.payload` must already hold the encoded request
/// (including the `nmp` byte written via [`frame::Nmp::encode_request_prefix`]);
/// `resp` must be pre-sized to the caller's acceptable response bounds.
/// On success, `resp` has been truncated to the actual received lengths and
/// its content validated against the response-side invariants below.
pub fn submit(
    transport: &dyn Transport,
    state: &mut TransportState,
    req: &mut RequestFrame,
    resp: &mut ResponseFrame,
    timeout_ms: u64,
    mprt_max_ms: u64,
) -> Result<()> {
    frame::validate_request(req, resp.payload_cap())?;
    transport.check_timeout(timeout_ms)?;

    if transport.mic_enabled() {
        req.mic = crc::mic(req.header, req.payload);
    }

    transport.submit(state, req, resp, timeout_ms, mprt_max_ms)?;

    validate_response(req, transport, resp)
}

/// Response-side invariants: type byte, 4-byte payload alignment, ROR set,
/// command slot matching the request, and (when the transport requires it)
/// a verified MIC.
fn validate_response(
    req: &RequestFrame,
    transport: &dyn Transport,
    resp: &mut ResponseFrame,
) -> Result<()> {
    if resp.header().len() < frame::MIN_HDR_SIZE {
        return Err(Error::protocol("response header shorter than minimum"));
    }
    if resp.header()[HDR_TYPE_OFFSET] != NMIMT_NVME_MI {
        return Err(Error::protocol("response header type byte is not NVMe-MI"));
    }
    if resp.payload().len() % 4 != 0 {
        return Err(Error::protocol("response payload length is not a multiple of 4"));
    }

    let req_nmp = Nmp(req.header[HDR_NMP_OFFSET]);
    let resp_nmp = Nmp(resp.header()[HDR_NMP_OFFSET]);

    if !resp_nmp.ror() {
        return Err(Error::protocol("response header missing ROR bit"));
    }
    if resp_nmp.command_slot() != req_nmp.command_slot() {
        return Err(Error::SlotMismatch);
    }

    if transport.mic_enabled() {
        let expected = crc::mic(resp.header(), resp.payload());
        if expected != resp.mic {
            warn!(
                "{}: MIC mismatch (expected {expected:#010x}, found {:#010x})",
                transport.name(),
                resp.mic
            );
            return Err(Error::CrcMismatch {
                expected,
                found: resp.mic,
            });
        }
    }

    Ok(())
}
