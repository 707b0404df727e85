//! Scripted in-memory connection for relay tests.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tokio::time::Instant;

use crate::conn::Connection;

/// One scripted result for `read`.
pub(crate) enum Step {
    Data(Vec<u8>),
    Fail(io::ErrorKind),
}

/// Reads replay a script (end of stream once it runs out), writes are
/// captured, and close / deadline calls are counted.
pub(crate) struct MockConn {
    script: Mutex<VecDeque<Step>>,
    written: Mutex<Vec<u8>>,
    write_error: Option<io::ErrorKind>,
    reads: AtomicUsize,
    closes: AtomicUsize,
    deadlines: AtomicUsize,
    last_deadline: Mutex<Option<Instant>>,
    addr: SocketAddr,
}

impl MockConn {
    pub(crate) fn new(script: Vec<Step>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            written: Mutex::new(Vec::new()),
            write_error: None,
            reads: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            deadlines: AtomicUsize::new(0),
            last_deadline: Mutex::new(None),
            addr: "192.0.2.1:4000".parse().unwrap(),
        }
    }

    /// Source returning each element of `chunks` from one read.
    pub(crate) fn reading(chunks: Vec<Vec<u8>>) -> Self {
        Self::new(chunks.into_iter().map(Step::Data).collect())
    }

    /// Destination with nothing to read.
    pub(crate) fn sink() -> Self {
        let mut conn = Self::new(Vec::new());
        conn.addr = "198.51.100.7:443".parse().unwrap();
        conn
    }

    pub(crate) fn failing_writes(kind: io::ErrorKind) -> Self {
        let mut conn = Self::sink();
        conn.write_error = Some(kind);
        conn
    }

    pub(crate) fn written(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }

    pub(crate) fn read_calls(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub(crate) fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub(crate) fn deadline_calls(&self) -> usize {
        self.deadlines.load(Ordering::SeqCst)
    }

    pub(crate) fn last_deadline(&self) -> Option<Instant> {
        *self.last_deadline.lock().unwrap()
    }

    /// Scripted bytes no read has consumed yet.
    pub(crate) fn unread_bytes(&self) -> usize {
        self.script
            .lock()
            .unwrap()
            .iter()
            .map(|step| match step {
                Step::Data(d) => d.len(),
                Step::Fail(_) => 0,
            })
            .sum()
    }
}

impl Connection for MockConn {
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().unwrap();
        match script.pop_front() {
            None => Ok(0),
            Some(Step::Fail(kind)) => Err(kind.into()),
            Some(Step::Data(data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    script.push_front(Step::Data(data[n..].to_vec()));
                }
                Ok(n)
            }
        }
    }

    async fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        if let Some(kind) = self.write_error {
            return Err(kind.into());
        }
        self.written.lock().unwrap().extend_from_slice(buf);
        Ok(())
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn set_read_deadline(&self, deadline: Option<Instant>) {
        self.deadlines.fetch_add(1, Ordering::SeqCst);
        *self.last_deadline.lock().unwrap() = deadline;
    }

    fn remote_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.addr)
    }
}
