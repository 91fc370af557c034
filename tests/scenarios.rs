//! End-to-end scenarios exercising the submit pipeline and the MI/Admin
//! command layers against a mock transport, independent of a real
//! `AF_MCTP` socket (grounded on the reference NVMe-MI test harness's
//! mock-channel pattern: assert byte-exact expectations on what gets
//! sent, hand back a canned or scripted reply).

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::sync::Arc;

use nvme_mi::admin::{self, AdminTransferRequest, GetLogPageRequest};
use nvme_mi::crc;
use nvme_mi::error::Error;
use nvme_mi::frame::{self, HDR_NMP_OFFSET, MessageType, Nmp, RequestFrame, ResponseFrame};
use nvme_mi::mi;
use nvme_mi::transport::{Transport, TransportState};
use nvme_mi::topology::{scan_endpoint, Endpoint};

/// A transport double that hands back a fixed or scripted response and
/// counts how many times `submit` was invoked (used to assert the submit
/// pipeline never re-drives the transport itself; MPR looping, if any, is
/// entirely the transport's own business).
struct ScriptedTransport {
    mic_enabled: bool,
    responses: RefCell<Vec<(Vec<u8>, Vec<u8>)>>,
    calls: Cell<u32>,
}

impl ScriptedTransport {
    fn single(header: Vec<u8>, payload: Vec<u8>) -> Self {
        Self {
            mic_enabled: true,
            responses: RefCell::new(vec![(header, payload)]),
            calls: Cell::new(0),
        }
    }

    fn queue(responses: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        Self {
            mic_enabled: true,
            responses: RefCell::new(responses),
            calls: Cell::new(0),
        }
    }
}

impl Transport for ScriptedTransport {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn mic_enabled(&self) -> bool {
        self.mic_enabled
    }

    fn submit(
        &self,
        _state: &mut TransportState,
        _req: &mut RequestFrame,
        resp: &mut ResponseFrame,
        _timeout_ms: u64,
        _mprt_max_ms: u64,
    ) -> nvme_mi::Result<()> {
        self.calls.set(self.calls.get() + 1);
        let mut responses = self.responses.borrow_mut();
        let (header, payload) = if responses.len() > 1 {
            responses.remove(0)
        } else {
            responses[0].clone()
        };

        let hlen = header.len().min(resp.header_cap());
        let plen = payload.len().min(resp.payload_cap());
        resp.header_mut()[..hlen].copy_from_slice(&header[..hlen]);
        resp.payload_mut()[..plen].copy_from_slice(&payload[..plen]);
        resp.truncate_to(hlen, plen);
        resp.mic = if self.mic_enabled {
            crc::mic(resp.header(), resp.payload())
        } else {
            0
        };
        Ok(())
    }
}

fn ok_header(message_type: MessageType, hdr_len: usize) -> Vec<u8> {
    let mut header = vec![0u8; hdr_len];
    Nmp::encode_request_prefix(&mut header, message_type);
    let mut nmp = Nmp(header[HDR_NMP_OFFSET]);
    nmp.set_ror(true);
    header[HDR_NMP_OFFSET] = nmp.0;
    header
}

fn endpoint_with(transport: ScriptedTransport) -> (Endpoint, Arc<ScriptedTransport>) {
    let transport = Arc::new(transport);
    let state: TransportState = Box::new(()) as Box<dyn Any + Send>;
    (Endpoint::new(transport.clone(), state), transport)
}

// A 4096-byte controller-list response with
// num=2, ids=[1, 3, 0...] produces exactly two controllers.
#[test]
fn controller_list_scan_creates_two_controllers() {
    let mut payload = vec![0u8; 4096];
    payload[0..2].copy_from_slice(&2u16.to_le_bytes());
    payload[2..4].copy_from_slice(&1u16.to_le_bytes());
    payload[4..6].copy_from_slice(&3u16.to_le_bytes());

    let header = ok_header(MessageType::Mi, 16);
    let (mut ep, _t) = endpoint_with(ScriptedTransport::single(header, payload));

    scan_endpoint(&mut ep, false).unwrap();
    let ids: Vec<u16> = ep.controllers().iter().map(|c| c.ctrl_id).collect();
    assert_eq!(ids, vec![1, 3]);
}

// A reply with a deliberately wrong MIC fails the
// exchange, but the endpoint remains usable for a subsequent, correct one.
#[test]
fn crc_mismatch_leaves_endpoint_usable() {
    struct BadThenGoodTransport {
        first_call: Cell<bool>,
        good_header: Vec<u8>,
    }
    impl Transport for BadThenGoodTransport {
        fn name(&self) -> &'static str {
            "bad-then-good"
        }
        fn mic_enabled(&self) -> bool {
            true
        }
        fn submit(
            &self,
            _state: &mut TransportState,
            _req: &mut RequestFrame,
            resp: &mut ResponseFrame,
            _timeout_ms: u64,
            _mprt_max_ms: u64,
        ) -> nvme_mi::Result<()> {
            let hlen = self.good_header.len().min(resp.header_cap());
            resp.header_mut()[..hlen].copy_from_slice(&self.good_header[..hlen]);
            resp.truncate_to(hlen, 0);
            if self.first_call.replace(false) {
                resp.mic = 0xDEAD_BEEF;
            } else {
                resp.mic = crc::mic(resp.header(), resp.payload());
            }
            Ok(())
        }
    }

    let good_header = ok_header(MessageType::Mi, 16);
    let transport = Arc::new(BadThenGoodTransport {
        first_call: Cell::new(true),
        good_header,
    });
    let state: TransportState = Box::new(()) as Box<dyn Any + Send>;
    let mut ep = Endpoint::new(transport, state);

    let err = mi::configuration_get(&mut ep, 0, 0).unwrap_err();
    assert!(matches!(err, Error::CrcMismatch { .. }));

    // Second exchange on the same endpoint succeeds.
    mi::configuration_get(&mut ep, 0, 0).unwrap();
}

// Get Log Page segmented, exact: len=8192 produces two inner
// transfers of 4096 bytes each, concatenated.
#[test]
fn get_log_page_segmented_exact() {
    let mut first_payload = vec![0xAAu8; 4096];
    let mut second_payload = vec![0xBBu8; 4096];
    first_payload[0] = 1;
    second_payload[0] = 2;

    let header = ok_header(MessageType::Admin, 60);
    let responses = vec![
        (header.clone(), first_payload.clone()),
        (header, second_payload.clone()),
    ];
    let (mut ep, transport) = endpoint_with(ScriptedTransport::queue(responses));

    let req = GetLogPageRequest {
        nsid: 0,
        lid: 0x02,
        lsp: 0,
        lsi: 0,
        lpo: 0,
        csi: 0,
        ot: false,
        rae: false,
        uuidx: 0,
    };
    let mut out = vec![0u8; 8192];
    let n = admin::get_log_page(&mut ep, &req, &mut out).unwrap();

    assert_eq!(n, 8192);
    assert_eq!(&out[0..4096], &first_payload[..]);
    assert_eq!(&out[4096..8192], &second_payload[..]);
    assert_eq!(transport.calls.get(), 2);
}

// Short Get Log Page: first chunk full, second short; loop stops and
// reports the true total without error.
#[test]
fn get_log_page_short_reply_stops_early() {
    let full_payload = vec![0xAAu8; 4096];
    let short_payload = vec![0xBBu8; 2048];

    let header = ok_header(MessageType::Admin, 60);
    let responses = vec![(header.clone(), full_payload), (header, short_payload)];
    let (mut ep, _t) = endpoint_with(ScriptedTransport::queue(responses));

    let req = GetLogPageRequest {
        nsid: 0,
        lid: 0x02,
        lsp: 0,
        lsi: 0,
        lpo: 0,
        csi: 0,
        ot: false,
        rae: false,
        uuidx: 0,
    };
    let mut out = vec![0u8; 8192];
    let n = admin::get_log_page(&mut ep, &req, &mut out).unwrap();

    assert_eq!(n, 4096 + 2048);
}

// Admin bidirectional rejection: both request and response data
// supplied to the generic transfer is rejected before any I/O.
#[test]
fn admin_transfer_rejects_bidirectional_data_without_io() {
    let header = ok_header(MessageType::Admin, 60);
    let (mut ep, transport) = endpoint_with(ScriptedTransport::single(header, vec![]));

    let req = AdminTransferRequest {
        opcode: 0x7f,
        ctrl_id: 0,
        cdw1: 0,
        cdw2: 0,
        cdw3: 0,
        cdw4: 0,
        cdw5: 0,
        cdw10: 0,
        cdw11: 0,
        cdw12: 0,
        cdw13: 0,
        cdw14: 0,
        cdw15: 0,
        resp_offset: 0,
    };
    let req_data = [0u8; 8];
    let mut resp_data = [0u8; 8];

    let err = admin::admin_transfer(&mut ep, &req, &req_data, &mut resp_data).unwrap_err();
    assert!(matches!(err, Error::InvalidArg(_)));
    assert_eq!(transport.calls.get(), 0, "no I/O should have been attempted");
}

// controller_info's selector must not be byte-swapped twice; confirmed at
// the wire level using a scripted transport that decodes cdw0 from the
// outgoing request header in a custom Transport impl (the
// ScriptedTransport above doesn't inspect the request, so this uses a
// small bespoke one).
#[test]
fn ctrl_id_not_double_swapped_on_the_wire() {
    struct InspectingTransport {
        seen_cdw0: Cell<u32>,
        good_header: Vec<u8>,
    }
    impl Transport for InspectingTransport {
        fn name(&self) -> &'static str {
            "inspecting"
        }
        fn mic_enabled(&self) -> bool {
            false
        }
        fn submit(
            &self,
            _state: &mut TransportState,
            req: &mut RequestFrame,
            resp: &mut ResponseFrame,
            _timeout_ms: u64,
            _mprt_max_ms: u64,
        ) -> nvme_mi::Result<()> {
            let cdw0 = u32::from_le_bytes(req.header[8..12].try_into().unwrap());
            self.seen_cdw0.set(cdw0);

            let out_len = CONTROLLER_INFO_LEN.min(resp.payload_cap());
            let hlen = self.good_header.len().min(resp.header_cap());
            resp.header_mut()[..hlen].copy_from_slice(&self.good_header[..hlen]);
            resp.truncate_to(hlen, out_len);
            Ok(())
        }
    }

    const CONTROLLER_INFO_LEN: usize = 32;

    let good_header = ok_header(MessageType::Mi, 16);
    let transport = Arc::new(InspectingTransport {
        seen_cdw0: Cell::new(0),
        good_header,
    });
    let state: TransportState = Box::new(()) as Box<dyn Any + Send>;
    let mut ep = Endpoint::new(transport.clone(), state);

    let mut out = [0u8; 32];
    mi::read_mi_data_controller_info(&mut ep, 0x1234, &mut out).unwrap();

    let cdw0 = transport.seen_cdw0.get();
    assert_eq!(cdw0 & 0xFFFF, 0x1234, "ctrl_id must land untouched in the low 16 bits");
}

#[test]
fn validate_request_still_rejects_raw_malformed_frames() {
    let mut hdr = [0u8; 4];
    let req = RequestFrame::new(&mut hdr, &[]);
    assert!(frame::validate_request(&req, 0).is_err());
}
