//! ZeroMQ Message Transport Protocol (ZMTP 3.0) over TCP
//!
//! The position detector publishes on a ZeroMQ PUSH socket. This module
//! speaks enough of ZMTP 3.0 with the NULL security mechanism to act as the
//! PULL peer that consumes those messages, and as a PUSH peer for the
//! detector simulator.
//!
//! Wire layout:
//!
//! | Part     | Bytes | Contents                                          |
//! |----------|-------|---------------------------------------------------|
//! | greeting | 64    | FF, 8 x pad, 7F, major, minor, mechanism[20],     |
//! |          |       | as-server, filler[31]                             |
//! | frame    | 2..   | flags, size (1 byte, or 8 bytes BE if LONG), body |
//!
//! After the greeting each side sends a READY command frame carrying its
//! `Socket-Type` property. Messages are one or more frames, the last of
//! which has the MORE flag clear.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info};

use crate::error::{ExtposError, ExtposResult};

/// Length of the ZMTP greeting
pub const GREETING_LEN: usize = 64;

/// Largest frame body accepted from a peer
pub const MAX_FRAME_SIZE: u64 = 1 << 20;

/// Time allowed for TCP connect plus greeting/READY exchange
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

/// Time allowed to read the rest of a frame once its first byte arrived
pub const FRAME_READ_TIMEOUT: Duration = Duration::from_secs(5);

const FLAG_MORE: u8 = 0x01;
const FLAG_LONG: u8 = 0x02;
const FLAG_COMMAND: u8 = 0x04;

const MECHANISM_NULL: &str = "NULL";
const SOCKET_TYPE_PROPERTY: &str = "Socket-Type";

/// The ZeroMQ socket types used here
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketType {
    Push,
    Pull,
}

impl SocketType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SocketType::Push => "PUSH",
            SocketType::Pull => "PULL",
        }
    }

    pub fn from_bytes(name: &[u8]) -> Option<Self> {
        match name {
            b"PUSH" => Some(SocketType::Push),
            b"PULL" => Some(SocketType::Pull),
            _ => None,
        }
    }

    /// Whether a peer of the given type may talk to us
    pub fn accepts(&self, peer: SocketType) -> bool {
        matches!(
            (self, peer),
            (SocketType::Pull, SocketType::Push) | (SocketType::Push, SocketType::Pull)
        )
    }
}

/// ZMTP greeting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    pub major: u8,
    pub minor: u8,
    pub mechanism: String,
    pub as_server: bool,
}

impl Greeting {
    /// ZMTP 3.0 greeting using the NULL mechanism
    pub fn null(as_server: bool) -> Self {
        Self {
            major: 3,
            minor: 0,
            mechanism: MECHANISM_NULL.to_string(),
            as_server,
        }
    }

    pub fn encode(&self) -> [u8; GREETING_LEN] {
        let mut buf = [0u8; GREETING_LEN];
        buf[0] = 0xFF;
        buf[9] = 0x7F;
        buf[10] = self.major;
        buf[11] = self.minor;
        let mechanism = self.mechanism.as_bytes();
        let len = mechanism.len().min(20);
        buf[12..12 + len].copy_from_slice(&mechanism[..len]);
        buf[32] = self.as_server as u8;
        buf
    }

    pub fn decode(buf: &[u8; GREETING_LEN]) -> ExtposResult<Self> {
        if buf[0] != 0xFF || buf[9] & 0x01 != 0x01 {
            return Err(ExtposError::Protocol("bad greeting signature".to_string()));
        }

        let major = buf[10];
        if major < 3 {
            return Err(ExtposError::Protocol(format!(
                "unsupported ZMTP version {}.{}",
                major, buf[11]
            )));
        }

        let mechanism: Vec<u8> = buf[12..32].iter().copied().take_while(|b| *b != 0).collect();
        let mechanism = String::from_utf8(mechanism)
            .map_err(|_| ExtposError::Protocol("mechanism is not ASCII".to_string()))?;

        Ok(Self {
            major,
            minor: buf[11],
            mechanism,
            as_server: buf[32] == 1,
        })
    }
}

/// A single ZMTP frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub more: bool,
    pub command: bool,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn message(body: impl Into<Vec<u8>>, more: bool) -> Self {
        Self {
            more,
            command: false,
            body: body.into(),
        }
    }

    /// Command frame with the given name and data
    pub fn command(name: &str, data: &[u8]) -> Self {
        let mut body = Vec::with_capacity(1 + name.len() + data.len());
        body.push(name.len() as u8);
        body.extend_from_slice(name.as_bytes());
        body.extend_from_slice(data);
        Self {
            more: false,
            command: true,
            body,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut flags = 0u8;
        if self.more {
            flags |= FLAG_MORE;
        }
        if self.command {
            flags |= FLAG_COMMAND;
        }

        let mut buf = Vec::with_capacity(self.body.len() + 9);
        if self.body.len() > u8::MAX as usize {
            buf.push(flags | FLAG_LONG);
            buf.extend_from_slice(&(self.body.len() as u64).to_be_bytes());
        } else {
            buf.push(flags);
            buf.push(self.body.len() as u8);
        }
        buf.extend_from_slice(&self.body);
        buf
    }

    pub fn read_from<R: Read>(reader: &mut R) -> ExtposResult<Self> {
        let mut flags = [0u8; 1];
        reader.read_exact(&mut flags)?;
        let flags = flags[0];

        if flags & !(FLAG_MORE | FLAG_LONG | FLAG_COMMAND) != 0 {
            return Err(ExtposError::Protocol(format!("reserved frame flags set: {:#04x}", flags)));
        }

        let size = if flags & FLAG_LONG != 0 {
            let mut size = [0u8; 8];
            reader.read_exact(&mut size)?;
            u64::from_be_bytes(size)
        } else {
            let mut size = [0u8; 1];
            reader.read_exact(&mut size)?;
            size[0] as u64
        };

        if size > MAX_FRAME_SIZE {
            return Err(ExtposError::Protocol(format!("frame of {} bytes exceeds limit", size)));
        }

        let mut body = vec![0u8; size as usize];
        reader.read_exact(&mut body)?;

        Ok(Self {
            more: flags & FLAG_MORE != 0,
            command: flags & FLAG_COMMAND != 0,
            body,
        })
    }

    /// Split a command frame into its name and data
    pub fn command_parts(&self) -> ExtposResult<(&str, &[u8])> {
        let name_len = *self
            .body
            .first()
            .ok_or_else(|| ExtposError::Protocol("empty command frame".to_string()))?
            as usize;
        if self.body.len() < 1 + name_len {
            return Err(ExtposError::Protocol("truncated command name".to_string()));
        }
        let name = std::str::from_utf8(&self.body[1..1 + name_len])
            .map_err(|_| ExtposError::Protocol("command name is not ASCII".to_string()))?;
        Ok((name, &self.body[1 + name_len..]))
    }
}

/// Encode metadata properties as carried by READY
pub fn encode_properties(properties: &[(&str, &[u8])]) -> Vec<u8> {
    let mut buf = Vec::new();
    for (name, value) in properties {
        buf.push(name.len() as u8);
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(&(value.len() as u32).to_be_bytes());
        buf.extend_from_slice(value);
    }
    buf
}

/// Decode READY metadata
pub fn parse_properties(mut data: &[u8]) -> ExtposResult<Vec<(String, Vec<u8>)>> {
    let truncated = || ExtposError::Protocol("truncated metadata".to_string());
    let mut properties = Vec::new();

    while !data.is_empty() {
        let name_len = data[0] as usize;
        data = &data[1..];
        if data.len() < name_len + 4 {
            return Err(truncated());
        }
        let name = String::from_utf8_lossy(&data[..name_len]).into_owned();
        data = &data[name_len..];

        let value_len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        data = &data[4..];
        if data.len() < value_len {
            return Err(truncated());
        }
        properties.push((name, data[..value_len].to_vec()));
        data = &data[value_len..];
    }

    Ok(properties)
}

/// Exchange greetings and READY commands. Returns the peer's socket type.
pub fn handshake<S: Read + Write>(
    stream: &mut S,
    socket_type: SocketType,
    as_server: bool,
) -> ExtposResult<SocketType> {
    stream.write_all(&Greeting::null(as_server).encode())?;
    stream.flush()?;

    let mut buf = [0u8; GREETING_LEN];
    stream.read_exact(&mut buf)?;
    let greeting = Greeting::decode(&buf)?;
    if greeting.mechanism != MECHANISM_NULL {
        return Err(ExtposError::Protocol(format!(
            "unsupported security mechanism {}",
            greeting.mechanism
        )));
    }

    let properties = encode_properties(&[(SOCKET_TYPE_PROPERTY, socket_type.as_str().as_bytes())]);
    stream.write_all(&Frame::command("READY", &properties).encode())?;
    stream.flush()?;

    let frame = Frame::read_from(stream)?;
    if !frame.command {
        return Err(ExtposError::Protocol("expected READY, got a message frame".to_string()));
    }

    let (name, data) = frame.command_parts()?;
    match name {
        "READY" => {}
        "ERROR" => {
            let reason = data.get(1..).map(String::from_utf8_lossy).unwrap_or_default();
            return Err(ExtposError::Protocol(format!("peer refused handshake: {}", reason)));
        }
        other => {
            return Err(ExtposError::Protocol(format!("expected READY, got {}", other)));
        }
    }

    let peer = parse_properties(data)?
        .into_iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(SOCKET_TYPE_PROPERTY))
        .and_then(|(_, value)| SocketType::from_bytes(&value))
        .ok_or_else(|| ExtposError::Protocol("peer did not announce a usable Socket-Type".to_string()))?;

    if !socket_type.accepts(peer) {
        return Err(ExtposError::Protocol(format!(
            "{} cannot talk to {}",
            socket_type.as_str(),
            peer.as_str()
        )));
    }

    Ok(peer)
}

/// Turn `tcp://host:port` into a `host:port` string
pub fn parse_tcp_endpoint(endpoint: &str) -> ExtposResult<String> {
    let addr = endpoint.strip_prefix("tcp://").ok_or_else(|| {
        ExtposError::Config(format!("unsupported endpoint {}, expected tcp://host:port", endpoint))
    })?;

    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| ExtposError::Config(format!("endpoint {} has no port", endpoint)))?;
    port.parse::<u16>()
        .map_err(|e| ExtposError::Config(format!("invalid port in {}: {}", endpoint, e)))?;

    let host = if host == "*" { "0.0.0.0" } else { host };
    Ok(format!("{}:{}", host, port))
}

fn resolve(addr: &str) -> ExtposResult<SocketAddr> {
    addr.to_socket_addrs()?
        .next()
        .ok_or_else(|| ExtposError::Config(format!("{} did not resolve", addr)))
}

/// An established ZMTP session on a TCP stream
pub struct ZmtpStream {
    stream: TcpStream,
}

impl ZmtpStream {
    /// Connect to `addr` and perform the handshake
    pub fn connect(addr: &str, socket_type: SocketType) -> ExtposResult<Self> {
        let stream = TcpStream::connect_timeout(&resolve(addr)?, HANDSHAKE_TIMEOUT)?;
        Self::establish(stream, socket_type, false)
    }

    /// Perform the handshake on an accepted stream
    pub fn accept(stream: TcpStream, socket_type: SocketType) -> ExtposResult<Self> {
        Self::establish(stream, socket_type, true)
    }

    fn establish(mut stream: TcpStream, socket_type: SocketType, as_server: bool) -> ExtposResult<Self> {
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
        stream.set_write_timeout(Some(HANDSHAKE_TIMEOUT))?;

        let peer = handshake(&mut stream, socket_type, as_server)?;
        debug!("ZMTP {} session with {} peer established", socket_type.as_str(), peer.as_str());

        stream.set_write_timeout(Some(FRAME_READ_TIMEOUT))?;
        Ok(Self { stream })
    }

    /// Wait up to `wait` for data. Returns false on timeout.
    pub fn wait_readable(&self, wait: Duration) -> ExtposResult<bool> {
        self.stream.set_read_timeout(Some(wait.max(Duration::from_millis(1))))?;
        let mut buf = [0u8; 1];
        let result = match self.stream.peek(&mut buf) {
            Ok(0) => Err(ExtposError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "peer closed the connection",
            ))),
            Ok(_) => Ok(true),
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut =>
            {
                Ok(false)
            }
            Err(e) => Err(ExtposError::Io(e)),
        };
        self.stream.set_read_timeout(Some(FRAME_READ_TIMEOUT))?;
        result
    }

    /// Read the next message, answering PING along the way. Returns
    /// `Ok(None)` when a command arrived and no message frame followed it
    /// yet; only a partially read message blocks for more frames.
    pub fn recv_message(&mut self) -> ExtposResult<Option<Vec<Vec<u8>>>> {
        let mut parts = Vec::new();

        loop {
            let frame = Frame::read_from(&mut self.stream)?;

            if frame.command {
                let (name, data) = frame.command_parts()?;
                if name == "PING" {
                    let context = data.get(2..).unwrap_or_default();
                    self.stream.write_all(&Frame::command("PONG", context).encode())?;
                } else {
                    debug!("Ignoring ZMTP command {}", name);
                }
                if parts.is_empty() && !self.wait_readable(Duration::ZERO)? {
                    return Ok(None);
                }
                continue;
            }

            let more = frame.more;
            parts.push(frame.body);
            if !more {
                return Ok(Some(parts));
            }
        }
    }

    /// Write a message made of the given parts
    pub fn send_message(&mut self, parts: &[&[u8]]) -> ExtposResult<()> {
        let mut buf = Vec::new();
        for (i, part) in parts.iter().enumerate() {
            buf.extend_from_slice(&Frame::message(*part, i + 1 < parts.len()).encode());
        }
        self.stream.write_all(&buf)?;
        self.stream.flush()?;
        Ok(())
    }
}

/// PULL side of a PUSH/PULL pipeline.
///
/// Connecting only records the endpoint. The TCP session is opened on the
/// first receive and re-opened on the receive after any channel error.
pub struct PullSocket {
    endpoint: String,
    addr: String,
    session: Option<ZmtpStream>,
}

impl PullSocket {
    pub fn connect(endpoint: &str) -> ExtposResult<Self> {
        Ok(Self {
            endpoint: endpoint.to_string(),
            addr: parse_tcp_endpoint(endpoint)?,
            session: None,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Receive one single-frame message, waiting at most `wait` for it to
    /// start arriving. `Ok(None)` means nothing arrived.
    pub fn recv_timeout(&mut self, wait: Duration) -> ExtposResult<Option<Vec<u8>>> {
        if self.session.is_none() {
            let session = ZmtpStream::connect(&self.addr, SocketType::Pull)?;
            info!("Connected to detector at {}", self.endpoint);
            self.session = Some(session);
        }

        let result = match self.session.as_mut() {
            Some(session) => Self::recv_on(session, wait),
            None => return Err(ExtposError::Channel("no detector session".to_string())),
        };

        if let Err(ref e) = result {
            if !e.is_malformed() {
                debug!("Dropping detector session: {}", e);
                self.session = None;
            }
        }
        result
    }

    fn recv_on(session: &mut ZmtpStream, wait: Duration) -> ExtposResult<Option<Vec<u8>>> {
        if !session.wait_readable(wait)? {
            return Ok(None);
        }

        let mut parts = match session.recv_message()? {
            Some(parts) => parts,
            None => return Ok(None),
        };
        if parts.len() != 1 {
            return Err(ExtposError::MalformedMessage(format!(
                "expected a single-frame message, got {} frames",
                parts.len()
            )));
        }
        Ok(parts.pop())
    }

    pub fn disconnect(&mut self) {
        self.session = None;
    }
}

/// PUSH side of a PUSH/PULL pipeline, serving one peer at a time
pub struct PushSocket {
    listener: TcpListener,
    session: Option<ZmtpStream>,
}

impl PushSocket {
    pub fn bind(endpoint: &str) -> ExtposResult<Self> {
        let listener = TcpListener::bind(parse_tcp_endpoint(endpoint)?)?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            session: None,
        })
    }

    pub fn local_addr(&self) -> ExtposResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn has_peer(&self) -> bool {
        self.session.is_some()
    }

    fn accept_within(&mut self, wait: Duration) -> ExtposResult<bool> {
        let deadline = Instant::now() + wait;
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    let session = ZmtpStream::accept(stream, SocketType::Push)?;
                    info!("PULL peer {} connected", addr);
                    self.session = Some(session);
                    return Ok(true);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Ok(false);
                    }
                    thread::sleep(Duration::from_millis(10));
                }
                Err(e) => return Err(ExtposError::Io(e)),
            }
        }
    }

    /// Send a single-frame message. Waits up to `wait` for a peer when none
    /// is connected and returns false if none showed up.
    pub fn send_timeout(&mut self, body: &[u8], wait: Duration) -> ExtposResult<bool> {
        if self.session.is_none() && !self.accept_within(wait)? {
            return Ok(false);
        }

        let result = match self.session.as_mut() {
            Some(session) => session.send_message(&[body]),
            None => return Ok(false),
        };

        match result {
            Ok(()) => Ok(true),
            Err(e) => {
                self.session = None;
                Err(e)
            }
        }
    }
}
