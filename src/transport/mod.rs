//! Transport abstraction.
//!
//! A capability set any concrete transport must satisfy. A manager might
//! dispatch accesses to one of many device objects; here, each `Endpoint`
//! holds exactly one `dyn Transport` plus one opaque, exclusively-owned
//! state value, since only one outstanding request per endpoint is allowed
//! and there's no multiplexing across transports within an endpoint.

pub mod mctp;

use std::any::Any;

use crate::error::Result;
use crate::frame::{RequestFrame, ResponseFrame};

/// Per-endpoint opaque transport state. Concrete transports downcast this
/// via `Any` to their own state type; callers never inspect it directly.
pub type TransportState = Box<dyn Any + Send>;

/// The capability set a concrete transport implements.
///
/// `submit` is the only required method; `close`/`describe`/`check_timeout`
/// have sensible defaults for transports that don't need to customise them.
pub trait Transport: Send + Sync {
    /// Short, stable name for logging (`"mctp"`, `"mock"`, ...).
    fn name(&self) -> &'static str;

    /// Whether this transport computes/verifies the MIC for every frame;
    /// decides whether CRC is stamped/verified on every frame it carries.
    fn mic_enabled(&self) -> bool;

    /// Performs one request/response exchange. Implementations own the
    /// whole send-wait-receive-retry sequence, including any MPR looping.
    fn submit(
        &self,
        state: &mut TransportState,
        req: &mut RequestFrame,
        resp: &mut ResponseFrame,
        timeout_ms: u64,
        mprt_max_ms: u64,
    ) -> Result<()>;

    /// Releases any transport-owned resources (sockets, tags, ...).
    /// Called exactly once, when the owning endpoint is closed.
    fn close(&self, _state: &mut TransportState) {}

    /// Short diagnostic string, e.g. `"net 1 eid 9"`.
    fn describe(&self, _state: &TransportState) -> String {
        self.name().to_string()
    }

    /// Allows a transport to reject a timeout value the endpoint layer
    /// would otherwise accept (e.g. a transport with a fixed hardware
    /// timer). Default: accept anything.
    fn check_timeout(&self, _timeout_ms: u64) -> Result<()> {
        Ok(())
    }
}
