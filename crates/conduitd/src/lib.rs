//! conduitd — session manager for the Conduit relay.

pub mod session;

pub use session::{new_session_table, SessionListener, SessionMeta, SessionTable};
