//! Process-wide `tracing` subscriber setup.
//!
//! One subscriber per process, installed once at startup; every adapter
//! and component emits through the `tracing` facade rather than calling
//! `println!` directly, so a caller embedding this crate can redirect or
//! filter output with `RUST_LOG`.

use tracing_subscriber::{fmt, EnvFilter};

/// Installs a global `tracing` subscriber filtered by `RUST_LOG`
/// (default `info` when unset). Safe to call at most once per process;
/// a second call is a no-op rather than a panic.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
