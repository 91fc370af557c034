//! NVMe Management Interface (NVMe-MI) over MCTP.
//!
//! Lets an out-of-band management controller (e.g. a BMC) discover NVMe
//! subsystems, enumerate their controllers, read inventory data, poll
//! health, configure the management interface, and issue a subset of NVMe
//! Admin commands, synchronously, one outstanding request per endpoint.
//!
//! ```text
//! discovery ──▶ topology::Root ──▶ topology::Endpoint ──▶ submit ──▶ transport::Transport
//!                                         │                              │
//!                                         ▼                              ▼
//!                                   mi / admin                   transport::mctp (AF_MCTP)
//! ```
//!
//! The message-layer core (bit-exact framing, the CRC-32C Message
//! Integrity Check, scatter/gather send/receive, the MPR retry protocol,
//! and the segmented Get Log Page transfer) is the part of this crate
//! worth reading closely; the MI/Admin command layers are thin, mechanical
//! encodings on top of it.
//!
//! Out of scope: the NVMe data path, NVMe over PCIe, a device-side
//! responder, and concurrent multi-command pipelining; this core is
//! strictly synchronous, one outstanding request per endpoint.

pub mod admin;
pub mod config;
pub mod crc;
pub mod discovery;
pub mod error;
pub mod frame;
pub mod logging;
pub mod mi;
pub mod submit;
pub mod topology;
pub mod transport;

pub use error::{Error, Result};
pub use topology::{Controller, Endpoint, Root};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
