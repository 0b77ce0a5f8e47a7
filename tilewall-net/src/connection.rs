//! Buffered TCP byte streams with exact-length reads.
//!
//! A [`Connection`] is used whole during handshakes and then split into a
//! [`ConnectionReader`] and a [`ConnectionWriter`], so one thread can receive
//! while another sends on the same socket.

use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::debug;

use crate::error::NetError;

/// Result of polling a reader for pending input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// At least one byte can be read without waiting.
    Ready,
    /// Nothing arrived within the reader's poll timeout.
    Idle,
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// Read half of a connection.
pub struct ConnectionReader {
    inner: BufReader<TcpStream>,
    peer: SocketAddr,
    /// When set, read timeouts are poll points rather than failures.
    stop: Option<Arc<AtomicBool>>,
}

impl ConnectionReader {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Treat read timeouts as retry points that end once `stop` is raised.
    pub fn attach_stop_flag(&mut self, stop: Arc<AtomicBool>) {
        self.stop = Some(stop);
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<(), NetError> {
        self.inner.get_ref().set_read_timeout(timeout)?;
        Ok(())
    }

    /// Fill `buf` completely.
    ///
    /// A zero-length read is `PeerDisconnected`. Short reads are retried, as
    /// are timeouts while a stop flag is attached and not raised.
    pub fn read_into(&mut self, buf: &mut [u8]) -> Result<(), NetError> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => return Err(NetError::PeerDisconnected),
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if is_timeout(&e) => match &self.stop {
                    Some(stop) if stop.load(Ordering::Acquire) => return Err(NetError::Shutdown),
                    Some(_) => continue,
                    None => return Err(NetError::Io(e)),
                },
                Err(e) => return Err(NetError::Io(e)),
            }
        }
        Ok(())
    }

    pub fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, NetError> {
        let mut buf = vec![0u8; n];
        self.read_into(&mut buf)?;
        Ok(buf)
    }

    pub fn read_u32(&mut self) -> Result<u32, NetError> {
        let mut raw = [0u8; 4];
        self.read_into(&mut raw)?;
        Ok(u32::from_le_bytes(raw))
    }

    pub fn read_i32(&mut self) -> Result<i32, NetError> {
        let mut raw = [0u8; 4];
        self.read_into(&mut raw)?;
        Ok(i32::from_le_bytes(raw))
    }

    pub fn read_u64(&mut self) -> Result<u64, NetError> {
        let mut raw = [0u8; 8];
        self.read_into(&mut raw)?;
        Ok(u64::from_le_bytes(raw))
    }

    /// Read an `i32`-length-prefixed UTF-8 string of at most `max_len` bytes.
    pub fn read_string(&mut self, max_len: usize) -> Result<String, NetError> {
        let len = self.read_i32()?;
        if len < 0 || len as usize > max_len {
            return Err(NetError::ProtocolMismatch(format!("string length {} out of range", len)));
        }
        let bytes = self.read_exact(len as usize)?;
        String::from_utf8(bytes)
            .map_err(|e| NetError::ProtocolMismatch(format!("string is not UTF-8: {}", e)))
    }

    /// Check for pending input without consuming it.
    ///
    /// Waits at most the socket's read timeout. A hangup with nothing left
    /// to read is `PeerDisconnected`.
    pub fn poll_readable(&mut self) -> Result<Readiness, NetError> {
        match self.inner.fill_buf() {
            Ok(buf) if buf.is_empty() => Err(NetError::PeerDisconnected),
            Ok(_) => Ok(Readiness::Ready),
            Err(e) if is_timeout(&e) || e.kind() == io::ErrorKind::Interrupted => {
                Ok(Readiness::Idle)
            }
            Err(e) => Err(NetError::Io(e)),
        }
    }
}

/// Write half of a connection. Bytes are buffered until [`flush`](Self::flush).
pub struct ConnectionWriter {
    inner: BufWriter<TcpStream>,
    peer: SocketAddr,
}

impl ConnectionWriter {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<(), NetError> {
        self.inner.get_ref().set_write_timeout(timeout)?;
        Ok(())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), NetError> {
        self.inner.write_all(bytes)?;
        Ok(())
    }

    pub fn write_u32(&mut self, v: u32) -> Result<(), NetError> {
        self.write_bytes(&v.to_le_bytes())
    }

    pub fn write_i32(&mut self, v: i32) -> Result<(), NetError> {
        self.write_bytes(&v.to_le_bytes())
    }

    pub fn write_u64(&mut self, v: u64) -> Result<(), NetError> {
        self.write_bytes(&v.to_le_bytes())
    }

    pub fn write_string(&mut self, s: &str) -> Result<(), NetError> {
        self.write_i32(s.len() as i32)?;
        self.write_bytes(s.as_bytes())
    }

    pub fn flush(&mut self) -> Result<(), NetError> {
        self.inner.flush()?;
        Ok(())
    }

    /// Mutable access to the buffered stream, for the framing helpers.
    pub fn stream_mut(&mut self) -> &mut BufWriter<TcpStream> {
        &mut self.inner
    }
}

/// A connected, buffered, bidirectional TCP stream.
pub struct Connection {
    reader: ConnectionReader,
    writer: ConnectionWriter,
}

impl Connection {
    /// Connect to `host:port`.
    pub fn connect(host: &str, port: u16) -> Result<Self, NetError> {
        let stream = TcpStream::connect((host, port)).map_err(|source| NetError::Connection {
            addr: format!("{}:{}", host, port),
            source,
        })?;
        Self::from_stream(stream)
    }

    /// Wrap an already-connected stream.
    pub fn from_stream(stream: TcpStream) -> Result<Self, NetError> {
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        let read_stream = stream.try_clone()?;
        Ok(Self {
            reader: ConnectionReader {
                inner: BufReader::new(read_stream),
                peer,
                stop: None,
            },
            writer: ConnectionWriter {
                inner: BufWriter::new(stream),
                peer,
            },
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.reader.peer
    }

    pub fn reader(&mut self) -> &mut ConnectionReader {
        &mut self.reader
    }

    pub fn writer(&mut self) -> &mut ConnectionWriter {
        &mut self.writer
    }

    pub fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, NetError> {
        self.reader.read_exact(n)
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), NetError> {
        self.writer.write_bytes(bytes)
    }

    pub fn flush(&mut self) -> Result<(), NetError> {
        self.writer.flush()
    }

    pub fn split(self) -> (ConnectionReader, ConnectionWriter) {
        (self.reader, self.writer)
    }

    /// Close both directions now rather than when the halves are dropped.
    pub fn close(self) {
        if let Err(e) = self.writer.inner.get_ref().shutdown(std::net::Shutdown::Both) {
            debug!("closing connection to {}: {}", self.reader.peer, e);
        }
    }
}

/// A bound TCP listening socket.
pub struct Listener {
    inner: TcpListener,
    port: u16,
}

impl Listener {
    /// Bind on all interfaces. Port 0 lets the OS choose.
    pub fn bind(port: u16) -> Result<Self, NetError> {
        let inner = TcpListener::bind(("0.0.0.0", port)).map_err(|source| NetError::Connection {
            addr: format!("0.0.0.0:{}", port),
            source,
        })?;
        let port = inner.local_addr()?.port();
        Ok(Self { inner, port })
    }

    /// Bind on `port`, moving to the next port while the current one is taken.
    pub fn bind_probing(port: u16, attempts: u16) -> Result<Self, NetError> {
        if port == 0 {
            return Self::bind(0);
        }
        let mut last_err = None;
        for candidate in (port..=u16::MAX).take(attempts.max(1) as usize) {
            match Self::bind(candidate) {
                Ok(listener) => return Ok(listener),
                Err(e) => {
                    debug!("port {} unavailable: {}", candidate, e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or(NetError::Connection {
            addr: format!("0.0.0.0:{}", port),
            source: io::Error::new(io::ErrorKind::AddrInUse, "no port available"),
        }))
    }

    pub fn local_port(&self) -> u16 {
        self.port
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<(), NetError> {
        self.inner.set_nonblocking(nonblocking)?;
        Ok(())
    }

    /// Block until a client connects.
    pub fn accept(&self) -> Result<Connection, NetError> {
        let (stream, _) = self.inner.accept()?;
        stream.set_nonblocking(false)?;
        Connection::from_stream(stream)
    }

    /// Accept on a non-blocking listener; `None` if nobody is waiting.
    pub fn try_accept(&self) -> Result<Option<Connection>, NetError> {
        match self.inner.accept() {
            Ok((stream, _)) => {
                stream.set_nonblocking(false)?;
                Connection::from_stream(stream).map(Some)
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(NetError::Io(e)),
        }
    }
}
