use std::io;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

/// Length prefix longer than this is never a valid frame header.
const MAX_LENGTH_DIGITS: usize = 20;
const READ_CHUNK: usize = 4096;
/// Longest payload accepted from a peer.
const MAX_FRAME_LEN: usize = 1 << 30;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("connection timed out")]
    ConnectionTimeout,
    #[error("malformed frame: {0}")]
    ProtocolFraming(String),
    #[error("io error: {0}")]
    Io(io::Error),
}

impl ChannelError {
    pub(crate) fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => ChannelError::ConnectionTimeout,
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected => ChannelError::ConnectionClosed,
            _ => ChannelError::Io(err),
        }
    }

    /// Return true if the connection can not be used after this error.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ChannelError::ConnectionTimeout)
    }
}

/// Framed message transport over a TCP connection.
///
/// Incoming messages are framed as `<decimal length> NUL <payload> NUL`.
/// Outgoing commands are sent as `<command line> NUL`.
/// Bytes received past a frame boundary, or received before a read timed out,
/// are kept and used by the next [`MessageChannel::receive_message`] call.
pub struct MessageChannel {
    stream: TcpStream,
    buf: Vec<u8>,
    peer: String,
}

impl MessageChannel {
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "<unknown>".to_string());
        Ok(Self {
            stream,
            buf: Vec::new(),
            peer,
        })
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Set read and write timeout, `None` means blocking forever.
    pub fn set_timeout(&self, timeout: Option<Duration>) -> Result<(), ChannelError> {
        self.stream
            .set_read_timeout(timeout)
            .map_err(ChannelError::from_io)?;
        self.stream
            .set_write_timeout(timeout)
            .map_err(ChannelError::from_io)
    }

    /// Send a length prefixed frame, the same framing an engine uses.
    pub fn send_message(&mut self, payload: &[u8]) -> Result<(), ChannelError> {
        let header = payload.len().to_string();
        let mut frame = Vec::with_capacity(header.len() + payload.len() + 2);
        frame.extend_from_slice(header.as_bytes());
        frame.push(0);
        frame.extend_from_slice(payload);
        frame.push(0);
        self.write_frame(&frame)
    }

    /// Send a NUL terminated command line.
    pub fn send_command(&mut self, line: &str) -> Result<(), ChannelError> {
        let mut frame = Vec::with_capacity(line.len() + 1);
        frame.extend_from_slice(line.as_bytes());
        frame.push(0);
        self.write_frame(&frame)
    }

    fn write_frame(&mut self, frame: &[u8]) -> Result<(), ChannelError> {
        self.stream
            .write_all(frame)
            .and_then(|_| self.stream.flush())
            .map_err(ChannelError::from_io)
    }

    /// Block until a whole frame is received and return its payload.
    pub fn receive_message(&mut self) -> Result<Vec<u8>, ChannelError> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(payload) = self.take_frame()? {
                return Ok(payload);
            }

            match self.stream.read(&mut chunk) {
                Ok(0) => return Err(ChannelError::ConnectionClosed),
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ChannelError::from_io(e)),
            }
        }
    }

    fn take_frame(&mut self) -> Result<Option<Vec<u8>>, ChannelError> {
        let Some(header_end) = self.buf.iter().position(|&b| b == 0) else {
            if self.buf.len() > MAX_LENGTH_DIGITS {
                return Err(ChannelError::ProtocolFraming(
                    "length prefix is too long".to_string(),
                ));
            }
            return Ok(None);
        };

        let len = parse_length(&self.buf[..header_end])?;
        let payload_end = header_end + 1 + len;
        if self.buf.len() <= payload_end {
            return Ok(None);
        }
        if self.buf[payload_end] != 0 {
            return Err(ChannelError::ProtocolFraming(format!(
                "expect NUL after {len} bytes of payload"
            )));
        }

        let payload = self.buf[header_end + 1..payload_end].to_vec();
        self.buf.drain(..=payload_end);
        Ok(Some(payload))
    }

    /// Shut the connection down in both directions, errors are ignored.
    pub fn shutdown(&self) {
        _ = self.stream.shutdown(Shutdown::Both);
    }
}

fn parse_length(header: &[u8]) -> Result<usize, ChannelError> {
    if header.is_empty() || !header.iter().all(u8::is_ascii_digit) {
        return Err(ChannelError::ProtocolFraming(format!(
            "invalid length prefix {:?}",
            String::from_utf8_lossy(header)
        )));
    }
    // only ascii digits here
    let digits = std::str::from_utf8(header).unwrap_or_default();
    let len: usize = digits
        .parse()
        .map_err(|e| ChannelError::ProtocolFraming(format!("invalid length prefix: {e}")))?;
    if len > MAX_FRAME_LEN {
        return Err(ChannelError::ProtocolFraming(format!(
            "frame of {len} bytes exceeds limit of {MAX_FRAME_LEN} bytes"
        )));
    }
    Ok(len)
}
