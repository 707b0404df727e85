//! Sliding inactivity timeout.

use std::time::Duration;

use tokio::time::Instant;

use crate::conn::Connection;

/// Push the read deadline of `conn` to `now + timeout`.
///
/// Called before every read, so the deadline bounds how long the source may
/// stay silent, not how long the whole transfer takes. A zero timeout leaves
/// the connection untouched and reads may block forever.
pub fn apply_read_deadline<C: Connection>(conn: &C, timeout: Duration) {
    if timeout.is_zero() {
        return;
    }
    conn.set_read_deadline(Some(Instant::now() + timeout));
}
