//! Supervisor transport adapters.
//!
//! Adapters translate an external I/O protocol into bus calls.  Only stdio
//! exists today.

pub mod stdio;

use tokio_util::sync::CancellationToken;

use crate::supervisor::bus::BusHandle;

/// Start supervisor-owned transport adapters.
pub fn start(bus: BusHandle, shutdown: CancellationToken, interactive_enabled: bool) {
    stdio::start(bus, shutdown, interactive_enabled);
}
