//! The blocking byte-stream the client runs over.
//!
//! The client needs three things from its stream: blocking reads bounded by
//! a timeout, blocking writes, and a timed read-ready primitive for the
//! dispatch loop's watchdog. [`Transport`] captures that contract;
//! [`TcpTransport`] implements it over `std::net::TcpStream`. TLS for
//! `stomp+ssl` URIs is supplied by wrapping the stream before constructing
//! the client; the client treats every transport opaquely.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

/// Per-read blocking bound. This governs single read calls, not the
/// heartbeat interval.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(500);

/// A blocking byte stream with a timed read-ready primitive.
pub trait Transport: Read + Write {
    /// Block until the stream has readable bytes or `timeout` elapses.
    ///
    /// Returns `Ok(true)` when a subsequent read will not block for data
    /// (including a pending EOF), `Ok(false)` on timeout. `None` blocks
    /// indefinitely.
    fn poll_readable(&mut self, timeout: Option<Duration>) -> io::Result<bool>;

    /// Close both directions of the stream.
    fn shutdown(&mut self) -> io::Result<()>;
}

/// [`Transport`] over a plain TCP connection.
pub struct TcpTransport {
    stream: TcpStream,
    read_timeout: Duration,
}

impl TcpTransport {
    /// Connect to `host:port` with [`DEFAULT_READ_TIMEOUT`].
    pub fn connect(host: &str, port: u16) -> io::Result<Self> {
        Self::connect_with_timeout(host, port, DEFAULT_READ_TIMEOUT)
    }

    /// Connect to `host:port` with an explicit per-read timeout.
    pub fn connect_with_timeout(
        host: &str,
        port: u16,
        read_timeout: Duration,
    ) -> io::Result<Self> {
        let stream = TcpStream::connect((host, port))?;
        Self::from_stream(stream, read_timeout)
    }

    /// Wrap an already-connected stream.
    pub fn from_stream(stream: TcpStream, read_timeout: Duration) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(read_timeout))?;
        Ok(Self {
            stream,
            read_timeout,
        })
    }
}

impl Read for TcpTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for TcpTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Transport for TcpTransport {
    fn poll_readable(&mut self, timeout: Option<Duration>) -> io::Result<bool> {
        // Readiness is probed with a timed single-byte peek; the probed byte
        // stays in the kernel buffer for the real read.
        self.stream.set_read_timeout(timeout)?;
        let mut probe = [0u8; 1];
        let result = self.stream.peek(&mut probe);
        self.stream.set_read_timeout(Some(self.read_timeout))?;
        match result {
            Ok(_) => Ok(true),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.stream.shutdown(Shutdown::Both)
    }
}
