//! Terminal conditions of a relay loop.
//!
//! Every relay ends with exactly one `RelayError`. Callers dispatch on the
//! variant, never on the message text or the identity of an io::Error.

use std::fmt;
use std::io;

use conduit_core::{WireError, TAG_SIZE};

/// Which half of a chunk was being read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Header,
    Payload,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Header => f.write_str("header"),
            Stage::Payload => f.write_str("payload"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOp {
    Read,
    Write,
}

impl fmt::Display for IoOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoOp::Read => f.write_str("read"),
            IoOp::Write => f.write_str("write"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The source returned zero bytes at a record boundary.
    #[error("end of stream")]
    EndOfStream,

    /// The source stayed idle past its read deadline.
    #[error("read deadline exceeded")]
    Timeout,

    #[error("{op} failed: {source}")]
    Transport {
        op: IoOp,
        #[source]
        source: io::Error,
    },

    /// The stream ended part way through a chunk.
    #[error("short {stage} read: expected {expected} bytes, got {got}")]
    ShortRead {
        stage: Stage,
        expected: usize,
        got: usize,
    },

    #[error("malformed chunk header: {0}")]
    MalformedHeader(#[from] WireError),

    #[error("chunk {chunk_id} failed authentication")]
    AuthMismatch {
        chunk_id: u32,
        len: usize,
        expected: [u8; TAG_SIZE],
        received: [u8; TAG_SIZE],
    },
}

impl RelayError {
    pub fn from_read(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::TimedOut {
            RelayError::Timeout
        } else {
            RelayError::Transport {
                op: IoOp::Read,
                source: e,
            }
        }
    }

    pub fn from_write(e: io::Error) -> Self {
        RelayError::Transport {
            op: IoOp::Write,
            source: e,
        }
    }

    /// Whether this is an ordinary way for a relay to finish.
    pub fn is_clean(&self) -> bool {
        matches!(self, RelayError::EndOfStream | RelayError::Timeout)
    }
}

/// What a relay moved before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub bytes: u64,
    pub chunks: u64,
}
