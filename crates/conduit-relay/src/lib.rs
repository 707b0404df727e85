//! conduit-relay — the tunnel data plane.
//!
//! A session spawns one relay task per direction. Each task owns one pooled
//! buffer, copies from its source to its destination until a terminal
//! condition, then closes the destination. The closed destination surfaces to
//! the paired task as end-of-stream or an I/O error on its next read or write,
//! which is how one half of a session tears down the other. There is no
//! cancellation channel and no result is returned to the spawner.

pub mod conn;
pub mod deadline;
pub mod error;
pub mod ota;
pub mod pipe;
pub mod pool;

#[cfg(test)]
mod mock;

pub use conn::{Connection, OtaConn, TcpConn};
pub use deadline::apply_read_deadline;
pub use error::{IoOp, RelayError, RelayStats, Stage};
pub use ota::{pipe_then_close_ota, spawn_pipe_ota};
pub use pipe::{pipe_then_close, spawn_pipe};
pub use pool::{BufferPool, PooledBuf};
