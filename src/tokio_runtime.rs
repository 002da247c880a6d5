//! Global Tokio runtime for capture finalization
//!
//! GPUI uses its own async executor. Assembling finished recordings runs on
//! Tokio's blocking pool, so a small multi-threaded runtime lives for the
//! whole process.

use std::io;
use std::sync::OnceLock;
use tokio::runtime::{Handle, Runtime};

static TOKIO_RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Initialize the global Tokio runtime and return its handle.
///
/// Calling this again returns the existing runtime.
pub fn init() -> io::Result<Handle> {
    if let Some(runtime) = TOKIO_RUNTIME.get() {
        return Ok(runtime.handle().clone());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("dualmic-tokio")
        .enable_all()
        .build()?;

    // A racing initializer may have won; either runtime is fine
    Ok(TOKIO_RUNTIME.get_or_init(|| runtime).handle().clone())
}
