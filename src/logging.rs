//! Thin `log`-facade init helper for binaries embedding this crate. The
//! library itself only ever calls through `log::{debug, info, warn}`;
//! nothing here is required to use `nvme_mi` as a library, it exists for
//! the demo binary's CLI entry point.

/// Initializes `env_logger` from `RUST_LOG` (default level `info`). Safe to
/// call more than once; subsequent calls are no-ops.
pub fn init() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .is_test(false)
        .try_init();
}
