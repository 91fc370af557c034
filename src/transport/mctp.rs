//! MCTP transport: the concrete, primary transport. Datagram socket over
//! `AF_MCTP`, scatter/gather send/receive, tag lifecycle, poll-bounded
//! timeout with `EINTR` restart, MPR retry, and the truncation-aware
//! frame-length reconciliation of a received datagram.
//!
//! `AF_MCTP` and the MCTP socket address/ioctl shapes below are not part of
//! the stable `libc` surface (they're a relatively recent addition to the
//! kernel's `uapi/linux/mctp.h`), so this module defines them locally,
//! inline, the same way raw hardware register layouts get defined when no
//! crate covers them.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::{Duration, Instant};

use log::{debug, info};

use crate::crc;
use crate::error::{Error, Result};
use crate::frame::{RequestFrame, ResponseFrame, HDR_TYPE_OFFSET, MIC_PRESENT_BIT, MIN_HDR_SIZE, NMIMT_NVME_MI};

use super::{Transport, TransportState};

// ---------------------------------------------------------------------
// Kernel ABI: AF_MCTP socket address and tag-allocation ioctls
// (linux/mctp.h). Not exposed by the `libc` crate.
// ---------------------------------------------------------------------

const AF_MCTP: libc::sa_family_t = 45;
const MCTP_NET_ANY: u32 = 0x0000_0000;

const MCTP_TAG_MASK: u8 = 0x07;
const MCTP_TAG_OWNER: u8 = 0x08;

// `SIOCPROTOPRIVATE` base used by the MCTP tag-control ioctls.
const SIOCMCTPALLOCTAG: libc::c_ulong = 0x89e0;
const SIOCMCTPDROPTAG: libc::c_ulong = 0x89e1;

#[repr(C)]
#[derive(Clone, Copy)]
struct SockaddrMctp {
    smctp_family: libc::sa_family_t,
    __smctp_pad0: u16,
    smctp_network: u32,
    smctp_addr: u8,
    smctp_type: u8,
    smctp_tag: u8,
    __smctp_pad1: u8,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct MctpIocTagCtl {
    net: u32,
    peer_addr: u8,
    local_addr: u8,
    flags: u16,
    tag: u8,
}

fn sockaddr(network_id: u32, eid: u8, msg_type: u8, tag: u8) -> SockaddrMctp {
    SockaddrMctp {
        smctp_family: AF_MCTP,
        __smctp_pad0: 0,
        smctp_network: network_id,
        smctp_addr: eid,
        smctp_type: msg_type,
        smctp_tag: tag,
        __smctp_pad1: 0,
    }
}

// ---------------------------------------------------------------------
// Tag lifecycle
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum TagHandle {
    /// A tag obtained from `SIOCMCTPALLOCTAG`, owner bit already set.
    Kernel(u8),
    /// Fallback when the kernel doesn't support explicit allocation: every
    /// send uses the generic "tag owner, pick any tag" request form. This
    /// degrades MPR support, since the kernel won't keep a specific reverse
    /// tag pinned for us across the retry.
    Sentinel,
}

impl TagHandle {
    fn wire_tag(self) -> u8 {
        match self {
            TagHandle::Kernel(t) => t,
            TagHandle::Sentinel => MCTP_TAG_OWNER,
        }
    }
}

fn alloc_tag(fd: RawFd, network_id: u32, peer_eid: u8) -> TagHandle {
    let mut ctl = MctpIocTagCtl {
        net: network_id,
        peer_addr: peer_eid,
        local_addr: 0,
        flags: 0,
        tag: 0,
    };
    let rc = unsafe { libc::ioctl(fd, SIOCMCTPALLOCTAG, &mut ctl as *mut _) };
    if rc == 0 {
        TagHandle::Kernel(ctl.tag | MCTP_TAG_OWNER)
    } else {
        TagHandle::Sentinel
    }
}

fn drop_tag(fd: RawFd, network_id: u32, peer_eid: u8, tag: TagHandle) {
    if let TagHandle::Kernel(t) = tag {
        let mut ctl = MctpIocTagCtl {
            net: network_id,
            peer_addr: peer_eid,
            local_addr: 0,
            flags: 0,
            tag: t & MCTP_TAG_MASK,
        };
        // Idempotent in spirit: a failure here (e.g. already dropped) is
        // not actionable by the caller, just noted.
        let rc = unsafe { libc::ioctl(fd, SIOCMCTPDROPTAG, &mut ctl as *mut _) };
        if rc != 0 {
            debug!("tag drop ioctl failed: {}", io::Error::last_os_error());
        }
    }
    // Sentinel tags are never "held" by the kernel, so dropping is a no-op.
}

/// Ensures the tag is released on every exit path out of `submit`
/// (success, error, or an unwind).
struct TagGuard {
    fd: RawFd,
    network_id: u32,
    peer_eid: u8,
    tag: TagHandle,
    released: bool,
}

impl TagGuard {
    fn new(fd: RawFd, network_id: u32, peer_eid: u8) -> Self {
        let tag = alloc_tag(fd, network_id, peer_eid);
        Self {
            fd,
            network_id,
            peer_eid,
            tag,
            released: false,
        }
    }

    fn release(&mut self) {
        if !self.released {
            drop_tag(self.fd, self.network_id, self.peer_eid, self.tag);
            self.released = true;
        }
    }
}

impl Drop for TagGuard {
    fn drop(&mut self) {
        self.release();
    }
}

// ---------------------------------------------------------------------
// Endpoint state
// ---------------------------------------------------------------------

pub struct MctpEndpointState {
    network_id: u32,
    peer_eid: u8,
    socket: OwnedFd,
    warned_generic_tag: bool,
}

impl MctpEndpointState {
    /// Opens a new `AF_MCTP` datagram socket for this peer.
    pub fn new(network_id: u32, peer_eid: u8) -> Result<Self> {
        let fd = unsafe { libc::socket(AF_MCTP as libc::c_int, libc::SOCK_DGRAM, 0) };
        if fd < 0 {
            return Err(Error::Transport(io::Error::last_os_error()));
        }
        let socket = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self {
            network_id,
            peer_eid,
            socket,
            warned_generic_tag: false,
        })
    }

    pub fn describe(&self) -> String {
        format!("net {} eid {}", self.network_id, self.peer_eid)
    }
}

/// Downcasts the endpoint's opaque [`TransportState`] into the concrete
/// MCTP state, or constructs one for a network that has never been used
/// with an empty network id (kept around for future net==`MCTP_NET_ANY`
/// scanning support).
fn state_mut(state: &mut TransportState) -> Result<&mut MctpEndpointState> {
    state
        .downcast_mut::<MctpEndpointState>()
        .ok_or_else(|| Error::protocol("transport state is not an MCTP endpoint"))
}

// ---------------------------------------------------------------------
// MPR (More Processing Required)
// ---------------------------------------------------------------------

const MPR_STATUS: u8 = 0x01;
const MPR_TOTAL_LEN: usize = MIN_HDR_SIZE + 4;
const MPR_MPRT_OFFSET: usize = 6;
/// Largest MPR wait the device can advertise: 0xFFFF * 100ms.
const MPR_MAX_WAIT_MS: u64 = 0xFFFF * 100;

struct MprInfo {
    wait_ms: u64,
}

/// Checks whether the frame the last reconciled receive produced looks
/// like an MPR response: exact MPR length, MPR status byte, and a MIC that
/// verifies over the (header-only, no payload) MPR message. Returns the
/// device's requested wait, converted from 100ms units to milliseconds.
/// `mprt` is a plain little-endian 16-bit count of 100ms units, nothing
/// more; it does not get byte-swapped a second time on top of the read
/// that already decoded it.
fn detect_mpr(header: &[u8], payload: &[u8], mic: u32) -> Option<MprInfo> {
    if !payload.is_empty() || header.len() != MIN_HDR_SIZE {
        return None;
    }
    if header.len() + 4 != MPR_TOTAL_LEN {
        return None;
    }
    if header[4] != MPR_STATUS {
        return None;
    }
    if crc::mic(header, &[]) != mic {
        return None;
    }
    let mprt = u16::from_le_bytes([header[MPR_MPRT_OFFSET], header[MPR_MPRT_OFFSET + 1]]);
    Some(MprInfo {
        wait_ms: mprt as u64 * 100,
    })
}

// ---------------------------------------------------------------------
// Poll-bounded wait, with EINTR restart against the remaining budget
// ---------------------------------------------------------------------

/// Waits for `fd` to become readable. `timeout_ms == 0` waits indefinitely.
fn wait_readable(fd: RawFd, timeout_ms: u64) -> Result<()> {
    let deadline = if timeout_ms == 0 {
        None
    } else {
        Some(Instant::now() + Duration::from_millis(timeout_ms))
    };

    loop {
        let remaining_ms: libc::c_int = match deadline {
            None => -1,
            Some(d) => {
                let now = Instant::now();
                if now >= d {
                    return Err(Error::Timeout);
                }
                (d - now).as_millis().min(i32::MAX as u128) as libc::c_int
            }
        };

        let mut pfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let rc = unsafe { libc::poll(&mut pfd, 1, remaining_ms) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(Error::Transport(err));
        }
        if rc == 0 {
            return Err(Error::Timeout);
        }
        return Ok(());
    }
}

// ---------------------------------------------------------------------
// Send / receive
// ---------------------------------------------------------------------

fn send_request(
    fd: RawFd,
    network_id: u32,
    peer_eid: u8,
    tag: u8,
    mic_enabled: bool,
    req: &RequestFrame,
) -> Result<()> {
    let msg_type = if mic_enabled {
        NMIMT_NVME_MI | MIC_PRESENT_BIT
    } else {
        NMIMT_NVME_MI
    };
    let addr = sockaddr(network_id, peer_eid, msg_type, tag);
    let mic_bytes = req.mic.to_le_bytes();

    // Scatter list: header minus its leading type byte (MCTP supplies the
    // type via the address), payload, trailing MIC word.
    let header_tail = &req.header[HDR_TYPE_OFFSET + 1..];
    let mut iov = [
        libc::iovec {
            iov_base: header_tail.as_ptr() as *mut libc::c_void,
            iov_len: header_tail.len(),
        },
        libc::iovec {
            iov_base: req.payload.as_ptr() as *mut libc::c_void,
            iov_len: req.payload.len(),
        },
        libc::iovec {
            iov_base: mic_bytes.as_ptr() as *mut libc::c_void,
            iov_len: if mic_enabled { mic_bytes.len() } else { 0 },
        },
    ];

    let msg = libc::msghdr {
        msg_name: &addr as *const _ as *mut libc::c_void,
        msg_namelen: std::mem::size_of::<SockaddrMctp>() as u32,
        msg_iov: iov.as_mut_ptr(),
        msg_iovlen: iov.len(),
        msg_control: std::ptr::null_mut(),
        msg_controllen: 0,
        msg_flags: 0,
    };

    let rc = unsafe { libc::sendmsg(fd, &msg, 0) };
    if rc < 0 {
        return Err(Error::Transport(io::Error::last_os_error()));
    }
    Ok(())
}

/// Pure frame-length reconciliation (spec §4.3 / §8 property 5).
///
/// `combined` is the type-byte-stripped bytes actually received (header
/// tail, then payload, then as much of the trailing MIC as fit, in that
/// order), `combined.len() + 1 == total_with_type`. Returns
/// `(new_hdr_len, new_payload_len, header_tail, payload, mic)` with
/// `new_hdr_len + new_payload_len + 4 == total_with_type` always, and `mic`
/// equal to the last four bytes actually received.
fn reconcile(combined: &[u8], hdr_cap: usize, payload_cap: usize) -> Result<(usize, usize, &[u8], &[u8], u32)> {
    let total_with_type = combined.len() + 1;
    if total_with_type < MIN_HDR_SIZE + 4 {
        return Err(Error::protocol("truncated response shorter than a MIC word"));
    }
    if total_with_type % 4 != 0 {
        return Err(Error::protocol(format!(
            "received length {total_with_type} is not a valid frame length"
        )));
    }

    if total_with_type == hdr_cap + payload_cap + 4 {
        // Case 1: exact.
        let (hdr_tail, rest) = combined.split_at(hdr_cap - 1);
        let (payload, mic_bytes) = rest.split_at(payload_cap);
        let mic = u32::from_le_bytes(mic_bytes.try_into().unwrap());
        Ok((hdr_cap, payload_cap, hdr_tail, payload, mic))
    } else if total_with_type < hdr_cap + 4 {
        // Case 2: response shorter than the advertised header; the MIC
        // lies inside the header buffer.
        let new_hdr_len = total_with_type - 4;
        let (hdr_tail, mic_bytes) = combined.split_at(new_hdr_len - 1);
        let mic = u32::from_le_bytes(mic_bytes.try_into().unwrap());
        Ok((new_hdr_len, 0, hdr_tail, &[], mic))
    } else {
        // Case 3: header is full, payload is truncated.
        let new_payload_len = total_with_type - hdr_cap - 4;
        let (hdr_tail, rest) = combined.split_at(hdr_cap - 1);
        let (payload, mic_bytes) = rest.split_at(new_payload_len);
        let mic = u32::from_le_bytes(mic_bytes.try_into().unwrap());
        Ok((hdr_cap, new_payload_len, hdr_tail, payload, mic))
    }
}

/// Receives one datagram into scratch iovecs sized to the caller's
/// response buffers (plus the 4-byte MIC slot), then reconciles the
/// received length against those buffer sizes (via [`reconcile`]) and
/// writes the result into `resp`.
fn recv_response(fd: RawFd, resp: &mut ResponseFrame) -> Result<u32> {
    let hdr_cap = resp.header_cap();
    let payload_cap = resp.payload_cap();

    let mut hdr_buf = vec![0u8; hdr_cap.saturating_sub(1)];
    let mut payload_buf = vec![0u8; payload_cap];
    let mut mic_buf = [0u8; 4];

    let mut iov = [
        libc::iovec {
            iov_base: hdr_buf.as_mut_ptr() as *mut libc::c_void,
            iov_len: hdr_buf.len(),
        },
        libc::iovec {
            iov_base: payload_buf.as_mut_ptr() as *mut libc::c_void,
            iov_len: payload_buf.len(),
        },
        libc::iovec {
            iov_base: mic_buf.as_mut_ptr() as *mut libc::c_void,
            iov_len: mic_buf.len(),
        },
    ];

    let mut addr = sockaddr(MCTP_NET_ANY, 0, 0, 0);
    let mut msg = libc::msghdr {
        msg_name: &mut addr as *mut _ as *mut libc::c_void,
        msg_namelen: std::mem::size_of::<SockaddrMctp>() as u32,
        msg_iov: iov.as_mut_ptr(),
        msg_iovlen: iov.len(),
        msg_control: std::ptr::null_mut(),
        msg_controllen: 0,
        msg_flags: 0,
    };

    let n = unsafe { libc::recvmsg(fd, &mut msg, libc::MSG_DONTWAIT) };
    if n < 0 {
        return Err(Error::Transport(io::Error::last_os_error()));
    }
    let n = n as usize;

    let n0 = n.min(hdr_buf.len());
    let n1 = (n - n0).min(payload_buf.len());
    let n2 = n - n0 - n1;

    let mut combined = Vec::with_capacity(n);
    combined.extend_from_slice(&hdr_buf[..n0]);
    combined.extend_from_slice(&payload_buf[..n1]);
    combined.extend_from_slice(&mic_buf[..n2]);

    let (new_hdr_len, new_payload_len, hdr_tail, payload, mic) =
        reconcile(&combined, hdr_cap, payload_cap)?;

    resp.header_mut()[1..1 + hdr_tail.len()].copy_from_slice(hdr_tail);
    resp.payload_mut()[..payload.len()].copy_from_slice(payload);
    resp.header_mut()[HDR_TYPE_OFFSET] = NMIMT_NVME_MI;
    resp.truncate_to(new_hdr_len, new_payload_len);
    Ok(mic)
}

// ---------------------------------------------------------------------
// Transport impl
// ---------------------------------------------------------------------

pub struct MctpTransport {
    mic_enabled: bool,
}

impl MctpTransport {
    pub fn new() -> Self {
        Self { mic_enabled: true }
    }
}

impl Default for MctpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MctpTransport {
    fn name(&self) -> &'static str {
        "mctp"
    }

    fn mic_enabled(&self) -> bool {
        self.mic_enabled
    }

    fn submit(
        &self,
        state: &mut TransportState,
        req: &mut RequestFrame,
        resp: &mut ResponseFrame,
        timeout_ms: u64,
        mprt_max_ms: u64,
    ) -> Result<()> {
        let ep = state_mut(state)?;
        let fd = ep.socket.as_raw_fd();

        let mut guard = TagGuard::new(fd, ep.network_id, ep.peer_eid);
        if matches!(guard.tag, TagHandle::Sentinel) && !ep.warned_generic_tag {
            info!(
                "{}: kernel lacks explicit MCTP tag allocation; falling back to \
                 generic tag ownership (MPR retries may not reliably reach the \
                 same in-flight exchange)",
                ep.describe()
            );
            ep.warned_generic_tag = true;
        }

        send_request(fd, ep.network_id, ep.peer_eid, guard.tag.wire_tag(), self.mic_enabled, req)?;

        let mut wait_ms = timeout_ms;
        loop {
            wait_readable(fd, wait_ms)?;
            let mic = recv_response(fd, resp)?;
            resp.mic = mic;

            if let Some(mpr) = detect_mpr(resp.header(), resp.payload(), mic) {
                let mut t = if mpr.wait_ms > 0 {
                    mpr.wait_ms
                } else if timeout_ms > 0 {
                    timeout_ms
                } else {
                    MPR_MAX_WAIT_MS
                };
                if mprt_max_ms > 0 {
                    t = t.min(mprt_max_ms);
                }
                debug!("{}: MPR, retrying after {}ms", ep.describe(), t);
                wait_ms = t;
                continue;
            }

            break;
        }

        guard.release();
        Ok(())
    }

    fn close(&self, state: &mut TransportState) {
        // Dropping the downcast reference doesn't close the fd; the
        // `OwnedFd` inside `MctpEndpointState` closes it when the state
        // itself is dropped by the owning `Endpoint`. Nothing extra to do
        // here beyond letting that drop run.
        let _ = state_mut(state);
    }

    fn describe(&self, state: &TransportState) -> String {
        state
            .downcast_ref::<MctpEndpointState>()
            .map(|s| s.describe())
            .unwrap_or_else(|| "mctp endpoint".to_string())
    }

    fn check_timeout(&self, timeout_ms: u64) -> Result<()> {
        if timeout_ms > u32::MAX as u64 {
            return Err(Error::invalid_arg("timeout exceeds representable range"));
        }
        Ok(())
    }
}
