//! Topology model: `Root` owns `Endpoint`s, each `Endpoint` owns its
//! `Controller`s. Back-references are by index, not by strong/cyclic
//! ownership; a `Controller` is purely `(endpoint index, ctrl_id)` in
//! spirit, though in practice callers reach a controller's owning endpoint
//! directly rather than walking upward.
//!
//! A single owner holds a collection of trait objects, looked up and
//! mutated through `&mut self` rather than shared/reference-counted state.

use std::sync::Arc;

use crate::error::Result;
use crate::frame::{RequestFrame, ResponseFrame};
use crate::mi;
use crate::submit;
use crate::transport::mctp::{MctpEndpointState, MctpTransport};
use crate::transport::{Transport, TransportState};

const DEFAULT_TIMEOUT_MS: u64 = 1000;
const DEFAULT_MCTP_TIMEOUT_MS: u64 = 5000;

/// One NVMe controller, reachable through its owning endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Controller {
    pub ctrl_id: u16,
}

/// One addressable NVMe-MI peer.
pub struct Endpoint {
    transport: Arc<dyn Transport>,
    state: TransportState,
    timeout_ms: u64,
    mprt_max_ms: u64,
    controllers: Vec<Controller>,
    controllers_scanned: bool,
}

impl Endpoint {
    /// Builds an endpoint over an arbitrary transport and its opaque state,
    /// with the generic default timeout (1000ms).
    pub fn new(transport: Arc<dyn Transport>, state: TransportState) -> Self {
        Self {
            transport,
            state,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            mprt_max_ms: 0,
            controllers: Vec::new(),
            controllers_scanned: false,
        }
    }

    /// Convenience constructor for the common case: an MCTP endpoint at
    /// `(network_id, eid)`, with the MCTP-specific default timeout (5000ms).
    pub fn with_mctp(network_id: u32, eid: u8) -> Result<Self> {
        let state = MctpEndpointState::new(network_id, eid)?;
        let mut ep = Self::new(Arc::new(MctpTransport::new()), Box::new(state));
        ep.timeout_ms = DEFAULT_MCTP_TIMEOUT_MS;
        Ok(ep)
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    /// Setter may be rejected by the transport (e.g. a fixed hardware
    /// timer).
    pub fn set_timeout_ms(&mut self, ms: u64) -> Result<()> {
        self.transport.check_timeout(ms)?;
        self.timeout_ms = ms;
        Ok(())
    }

    pub fn mprt_max_ms(&self) -> u64 {
        self.mprt_max_ms
    }

    pub fn set_mprt_max_ms(&mut self, ms: u64) {
        self.mprt_max_ms = ms;
    }

    pub fn controllers(&self) -> &[Controller] {
        &self.controllers
    }

    pub fn controllers_scanned(&self) -> bool {
        self.controllers_scanned
    }

    pub fn describe(&self) -> String {
        self.transport.describe(&self.state)
    }

    /// The sole call site through which the MI/Admin layers reach the
    /// transport, via the generic submit pipeline.
    pub(crate) fn submit(&mut self, req: &mut RequestFrame, resp: &mut ResponseFrame) -> Result<()> {
        submit::submit(
            self.transport.as_ref(),
            &mut self.state,
            req,
            resp,
            self.timeout_ms,
            self.mprt_max_ms,
        )
    }

    /// Releases the transport's resources. Called exactly once, either
    /// explicitly or via `Root`'s cascading drop.
    pub fn close(&mut self) {
        self.transport.close(&mut self.state);
        self.controllers.clear();
        self.controllers_scanned = false;
    }
}

/// Process-scoped container owning an ordered, insertion-unique collection
/// of endpoints. Destroying it cascades-closes every endpoint it owns.
#[derive(Default)]
pub struct Root {
    endpoints: Vec<Endpoint>,
}

impl Root {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn endpoints_mut(&mut self) -> &mut [Endpoint] {
        &mut self.endpoints
    }

    /// Adds `ep` to the topology and returns its index.
    pub fn add_endpoint(&mut self, ep: Endpoint) -> usize {
        self.endpoints.push(ep);
        self.endpoints.len() - 1
    }

    pub fn endpoint(&self, index: usize) -> Option<&Endpoint> {
        self.endpoints.get(index)
    }

    pub fn endpoint_mut(&mut self, index: usize) -> Option<&mut Endpoint> {
        self.endpoints.get_mut(index)
    }

    /// Cascades-closes every endpoint, then drops them.
    pub fn close(&mut self) {
        for ep in &mut self.endpoints {
            ep.close();
        }
        self.endpoints.clear();
    }
}

impl Drop for Root {
    fn drop(&mut self) {
        self.close();
    }
}

/// The only discovery primitive: reads the Controller List and
/// materialises a `Controller` for each non-zero identifier. A no-op if
/// already scanned, unless `force` is set, in which case existing
/// controllers are destroyed first.
pub fn scan_endpoint(ep: &mut Endpoint, force: bool) -> Result<()> {
    if ep.controllers_scanned && !force {
        return Ok(());
    }
    ep.controllers.clear();

    let mut buf = vec![0u8; 4096];
    let n = mi::read_mi_data_controller_list(ep, 0, &mut buf)?;
    buf.truncate(n);

    if buf.len() < 2 {
        return Err(crate::error::Error::protocol(
            "controller list reply shorter than its count field",
        ));
    }
    let count = u16::from_le_bytes([buf[0], buf[1]]) as usize;
    if count > mi::NVME_ID_CTRL_LIST_MAX {
        return Err(crate::error::Error::protocol(format!(
            "controller list count {count} exceeds maximum {}",
            mi::NVME_ID_CTRL_LIST_MAX
        )));
    }

    for i in 0..count {
        let off = 2 + i * 2;
        if off + 2 > buf.len() {
            break;
        }
        let id = u16::from_le_bytes([buf[off], buf[off + 1]]);
        if id != 0 {
            ep.controllers.push(Controller { ctrl_id: id });
        }
    }

    ep.controllers_scanned = true;
    Ok(())
}
