//! Blocking socket transport with per-call deadlines.
//!
//! Connect uses [`TcpStream::connect_timeout`], which internally performs a
//! non-blocking connect plus a `select()`-equivalent wait exactly as the
//! original driver's `connectWithTimeout` helper did by hand. Reads enforce
//! full-payload delivery: a read that times out or errors partway through
//! is never handed back to the caller as a partial buffer.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::os::unix::io::AsRawFd;
use std::time::Duration;

use crate::error::{Result, VicpError};

/// Receive buffer size requested via `SO_RCVBUF`, matching the original
/// driver's `optval=8192`.
const RCVBUF_SIZE: libc::c_int = 8192;

/// A connected VICP transport: a TCP socket tuned for short, latency
/// sensitive request/response traffic.
pub struct Transport {
    stream: TcpStream,
}

impl Transport {
    /// Connect to `addr`, failing the connect attempt after `timeout`.
    ///
    /// On success, `TCP_NODELAY` is enabled and `SO_RCVBUF` is enlarged,
    /// matching the original driver's socket tuning.
    pub fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self> {
        let stream = TcpStream::connect_timeout(&addr, timeout).map_err(|e| {
            use std::io::ErrorKind::*;
            match e.kind() {
                // Only a genuine connect timeout is "link down" (nothing
                // answering, possibly transient). Anything else -- refused,
                // unreachable, etc -- means a peer actively told us no, so
                // the scope is "unsupported" until the user investigates.
                TimedOut => VicpError::InitConnTimeout,
                _ => VicpError::InitConnRefused,
            }
        })?;

        stream.set_nodelay(true).map_err(VicpError::InitSocketError)?;
        Self::set_rcvbuf(&stream)?;

        Ok(Self { stream })
    }

    fn set_rcvbuf(stream: &TcpStream) -> Result<()> {
        let fd = stream.as_raw_fd();
        let ret = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_RCVBUF,
                &RCVBUF_SIZE as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if ret != 0 {
            return Err(VicpError::InitSocketError(std::io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Read exactly `buf.len()` bytes, waiting up to `deadline` for each
    /// underlying `read()` to make progress. Never returns a partial
    /// buffer: any timeout or I/O error is reported as an error and the
    /// caller is expected to tear the transport down.
    pub fn read_exact(&mut self, buf: &mut [u8], deadline: Duration) -> Result<()> {
        self.stream
            .set_read_timeout(Some(deadline))
            .map_err(|e| VicpError::ReadSocketError(Some(e)))?;

        let mut got = 0;
        while got < buf.len() {
            match self.stream.read(&mut buf[got..]) {
                Ok(0) => {
                    return Err(VicpError::ReadSocketError(None));
                }
                Ok(n) => got += n,
                Err(e) if is_timeout(&e) => return Err(VicpError::SelectSocketTimeout),
                Err(e) => return Err(VicpError::ReadSocketError(Some(e))),
            }
        }
        Ok(())
    }

    /// Write the whole command in a single write call, matching the
    /// original's assumption that commands are short (<= ~256 bytes).
    pub fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.stream
            .write_all(buf)
            .map_err(|e| VicpError::WriteCommandError(Some(e)))
    }
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn connect_refused_when_nothing_listening() {
        // Bind then drop the listener immediately, to free a port with
        // (almost certainly) nothing listening on it locally.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = Transport::connect(addr, Duration::from_millis(500)).unwrap_err();
        assert!(matches!(err, VicpError::InitConnRefused));
    }

    #[test]
    fn connect_succeeds_against_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let accept_thread = std::thread::spawn(move || listener.accept().unwrap());

        let transport = Transport::connect(addr, Duration::from_secs(2));
        accept_thread.join().unwrap();
        assert!(transport.is_ok());
    }

    #[test]
    fn read_exact_times_out_without_partial_data() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            // Hold the connection open but never send anything.
            std::thread::sleep(Duration::from_secs(2));
            drop(stream);
        });

        let mut transport = Transport::connect(addr, Duration::from_secs(2)).unwrap();
        let mut buf = [0u8; 8];
        let err = transport
            .read_exact(&mut buf, Duration::from_millis(200))
            .unwrap_err();
        assert!(matches!(err, VicpError::SelectSocketTimeout));
    }

    #[test]
    fn read_exact_accumulates_across_partial_reads() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(&[1, 2, 3]).unwrap();
            std::thread::sleep(Duration::from_millis(50));
            stream.write_all(&[4, 5]).unwrap();
        });

        let mut transport = Transport::connect(addr, Duration::from_secs(2)).unwrap();
        let mut buf = [0u8; 5];
        transport
            .read_exact(&mut buf, Duration::from_secs(2))
            .unwrap();
        assert_eq!(buf, [1, 2, 3, 4, 5]);
        server.join().unwrap();
    }
}
