//! Minimal demo CLI: `nvme-mi-scan net:eid [net:eid ...]`.
//!
//! Opens an MCTP endpoint for each `net:eid` pair, scans its controller
//! list, and prints what it found. This is not the "surrounding CLI and
//! packaging" the library itself stays out of (profiles, auth, daemonized
//! polling, ...); it's the same minimal ambient entry point every
//! library-style crate in this codebase ships next to its `src/lib.rs`.

use std::process::ExitCode;

use nvme_mi::topology::{scan_endpoint, Endpoint, Root};

fn parse_net_eid(arg: &str) -> Option<(u32, u8)> {
    let (net, eid) = arg.split_once(':')?;
    Some((net.parse().ok()?, eid.parse().ok()?))
}

fn main() -> ExitCode {
    nvme_mi::logging::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        eprintln!("usage: nvme-mi-scan net:eid [net:eid ...]");
        return ExitCode::FAILURE;
    }

    let mut root = Root::new();
    let mut had_error = false;

    for arg in &args {
        let Some((network_id, eid)) = parse_net_eid(arg) else {
            eprintln!("skipping malformed endpoint spec {arg:?} (expected net:eid)");
            had_error = true;
            continue;
        };

        let endpoint = match Endpoint::with_mctp(network_id, eid) {
            Ok(ep) => ep,
            Err(e) => {
                eprintln!("net {network_id} eid {eid}: failed to open: {e}");
                had_error = true;
                continue;
            }
        };
        root.add_endpoint(endpoint);
    }

    for endpoint in root.endpoints_mut() {
        let describe = endpoint.describe();
        match scan_endpoint(endpoint, false) {
            Ok(()) => {
                println!("{describe}: {} controller(s)", endpoint.controllers().len());
                for ctrl in endpoint.controllers() {
                    println!("  controller {}", ctrl.ctrl_id);
                }
            }
            Err(e) => {
                eprintln!("{describe}: scan failed: {e}");
                had_error = true;
            }
        }
    }

    if had_error {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
