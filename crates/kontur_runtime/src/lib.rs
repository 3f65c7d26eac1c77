//! # KONTUR organ runtime
//!
//! Every organ is a separate process with exactly one control loop:
//!
//! 1. read one line from the input stream
//! 2. decode and integrity-check it
//! 3. hand it to the organ (or answer it directly for heartbeats/shutdown)
//! 4. write the reply, then every Nth packet a heartbeat
//!
//! A packet is fully handled before the next line is read. Nothing a single
//! packet does, malformed or faulting, ends the loop; only end-of-input or
//! an explicit `SHUTDOWN` command does.

mod organ;
mod runtime;
mod transport;

pub use organ::{Organ, Reply};
pub use runtime::{OrganRuntime, RunSummary, SHUTDOWN_OP};
pub use transport::{Line, PacketReader, PacketWriter, DEFAULT_MAX_LINE_BYTES};
