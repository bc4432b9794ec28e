//! Fixed-format SOCKS5 (RFC 1928) and username/password (RFC 1929) frames.
//!
//! Every frame here is read with exact-length reads (`AsyncReadExt::read_exact`,
//! which already loops internally until the byte count is satisfied or EOF) and
//! written as one contiguous buffer. None of these types interpret anything
//! beyond their own frame: address resolution, command support and auth policy
//! all live above this module.

use socks5_types::{BoundAddr, DestAddr, ToDestAddr};
use std::fmt;
use std::io::{self, Write as _};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const SOCKS_VERSION: u8 = 0x05;
const AUTH_VERSION: u8 = 0x01;
/// 1 (ATYP) + 255 (longest domain) + 2 (port) padded for round numbers.
const ADDR_MAX_LEN: usize = 260;

pub const METHOD_NO_AUTH: u8 = 0x00;
pub const METHOD_USERNAME_PASSWORD: u8 = 0x02;
pub const METHOD_NO_ACCEPTABLE: u8 = 0xFF;

pub const AUTH_STATUS_SUCCESS: u8 = 0x00;
pub const AUTH_STATUS_FAILURE: u8 = 0x01;

/// A malformed frame: wrong version byte, a length the protocol disallows,
/// a non-zero reserved byte, or the stream ending mid-frame. Per spec this is
/// always fatal for the session.
#[derive(Debug)]
pub enum FramingError {
    Io(io::Error),
    WrongVersion { expected: u8, found: u8 },
    ZeroLength(&'static str),
    NonZeroReserved,
}

impl fmt::Display for FramingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FramingError::Io(e) => write!(f, "I/O error: {e}"),
            FramingError::WrongVersion { expected, found } => {
                write!(f, "wrong version byte: expected 0x{expected:02x}, found 0x{found:02x}")
            }
            FramingError::ZeroLength(field) => write!(f, "zero-length {field} is not allowed"),
            FramingError::NonZeroReserved => write!(f, "reserved byte must be 0x00"),
        }
    }
}

impl std::error::Error for FramingError {}

impl From<io::Error> for FramingError {
    fn from(e: io::Error) -> Self {
        FramingError::Io(e)
    }
}

/// Errors that can arise while parsing a connect request, beyond plain framing
/// errors: an unrecognized ATYP byte means the variable-length address field
/// cannot be parsed at all, but the protocol still expects a reply (REP=0x08)
/// rather than a silent close.
#[derive(Debug)]
pub enum RequestError {
    Framing(FramingError),
    UnsupportedAddressType(u8),
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::Framing(e) => write!(f, "{e}"),
            RequestError::UnsupportedAddressType(atyp) => write!(f, "unsupported address type 0x{atyp:02x}"),
        }
    }
}

impl std::error::Error for RequestError {}

impl From<FramingError> for RequestError {
    fn from(e: FramingError) -> Self {
        RequestError::Framing(e)
    }
}

impl From<io::Error> for RequestError {
    fn from(e: io::Error) -> Self {
        RequestError::Framing(FramingError::Io(e))
    }
}

/// REP byte values from RFC 1928 §6.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Reply {
    Succeeded = 0x00,
    GeneralServerFailure = 0x01,
    ConnectionNotAllowed = 0x02,
    NetworkUnreachable = 0x03,
    HostUnreachable = 0x04,
    ConnectionRefused = 0x05,
    TtlExpired = 0x06,
    CommandNotSupported = 0x07,
    AddressTypeNotSupported = 0x08,
}

impl Reply {
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Reply::Succeeded => "succeeded",
            Reply::GeneralServerFailure => "general SOCKS server failure",
            Reply::ConnectionNotAllowed => "connection not allowed by ruleset",
            Reply::NetworkUnreachable => "network unreachable",
            Reply::HostUnreachable => "host unreachable",
            Reply::ConnectionRefused => "connection refused",
            Reply::TtlExpired => "TTL expired",
            Reply::CommandNotSupported => "command not supported",
            Reply::AddressTypeNotSupported => "address type not supported",
        };
        f.write_str(msg)
    }
}

/// Refines a failed outbound connect attempt into a reply code, per spec.md
/// §9's note that REP granularity may be sharpened beyond a blanket 0x05.
impl From<io::ErrorKind> for Reply {
    fn from(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset => Reply::ConnectionRefused,
            io::ErrorKind::TimedOut => Reply::HostUnreachable,
            _ => Reply::GeneralServerFailure,
        }
    }
}

impl From<&io::Error> for Reply {
    fn from(e: &io::Error) -> Self {
        Reply::from(e.kind())
    }
}

/// CMD byte from the connect request. Kept as a raw value rather than an
/// enum with only the supported variant: the frame format does not depend on
/// which command was requested, so an unsupported command is still fully
/// parsed and answered with REP=0x07 rather than treated as a framing error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Command(pub u8);

impl Command {
    pub const CONNECT: Command = Command(0x01);
    pub const BIND: Command = Command(0x02);
    pub const UDP_ASSOCIATE: Command = Command(0x03);

    pub fn is_connect(self) -> bool {
        self == Self::CONNECT
    }
}

/// Client greeting.
/// `VER(1)=0x05 | NMETHODS(1)=n | METHODS(n)`
#[derive(Debug)]
pub struct Greeting {
    pub methods: Vec<u8>,
}

impl Greeting {
    pub async fn read<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Self, FramingError> {
        let mut fixed = [0u8; 2];
        stream.read_exact(&mut fixed).await?;
        let [version, nmethods] = fixed;

        if version != SOCKS_VERSION {
            return Err(FramingError::WrongVersion {
                expected: SOCKS_VERSION,
                found: version,
            });
        }

        if nmethods == 0 {
            return Err(FramingError::ZeroLength("NMETHODS"));
        }

        let mut methods = vec![0u8; usize::from(nmethods)];
        stream.read_exact(&mut methods).await?;

        Ok(Self { methods })
    }

    #[cfg(test)]
    pub async fn write<S: AsyncWrite + Unpin>(&self, stream: &mut S) -> io::Result<()> {
        let mut packet = Vec::with_capacity(2 + self.methods.len());
        packet.push(SOCKS_VERSION);
        packet.push(self.methods.len() as u8);
        packet.extend_from_slice(&self.methods);
        stream.write_all(&packet).await
    }
}

/// Method-selection reply. `VER(1)=0x05 | METHOD(1)`
#[derive(Debug)]
pub struct MethodReply(pub u8);

impl MethodReply {
    pub async fn write<S: AsyncWrite + Unpin>(&self, stream: &mut S) -> io::Result<()> {
        stream.write_all(&[SOCKS_VERSION, self.0]).await
    }

    #[cfg(test)]
    pub async fn read<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Self, FramingError> {
        let mut buf = [0u8; 2];
        stream.read_exact(&mut buf).await?;
        let [version, method] = buf;
        if version != SOCKS_VERSION {
            return Err(FramingError::WrongVersion {
                expected: SOCKS_VERSION,
                found: version,
            });
        }
        Ok(Self(method))
    }
}

/// Username/password sub-negotiation request.
/// `VER(1)=0x01 | ULEN(1)=u | UNAME(u) | PLEN(1)=p | PASSWD(p)`
#[derive(Debug)]
pub struct AuthRequest {
    pub username: String,
    pub password: String,
}

impl AuthRequest {
    pub async fn read<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Self, FramingError> {
        let version = stream.read_u8().await?;
        if version != AUTH_VERSION {
            return Err(FramingError::WrongVersion {
                expected: AUTH_VERSION,
                found: version,
            });
        }

        let ulen = stream.read_u8().await?;
        if ulen == 0 {
            return Err(FramingError::ZeroLength("ULEN"));
        }
        let mut uname = vec![0u8; usize::from(ulen)];
        stream.read_exact(&mut uname).await?;
        let username = String::from_utf8(uname).map_err(|_| FramingError::Io(invalid_utf8("UNAME")))?;

        let plen = stream.read_u8().await?;
        if plen == 0 {
            return Err(FramingError::ZeroLength("PLEN"));
        }
        let mut passwd = vec![0u8; usize::from(plen)];
        stream.read_exact(&mut passwd).await?;
        let password = String::from_utf8(passwd).map_err(|_| FramingError::Io(invalid_utf8("PASSWD")))?;

        Ok(Self { username, password })
    }

    #[cfg(test)]
    pub async fn write<S: AsyncWrite + Unpin>(&self, stream: &mut S) -> io::Result<()> {
        let mut packet = Vec::with_capacity(3 + self.username.len() + self.password.len());
        packet.push(AUTH_VERSION);
        packet.push(self.username.len() as u8);
        packet.extend_from_slice(self.username.as_bytes());
        packet.push(self.password.len() as u8);
        packet.extend_from_slice(self.password.as_bytes());
        stream.write_all(&packet).await
    }
}

fn invalid_utf8(field: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("{field} is not valid UTF-8"))
}

/// Username/password sub-negotiation reply. `VER(1)=0x01 | STATUS(1)`
#[derive(Debug)]
pub struct AuthReply(pub u8);

impl AuthReply {
    pub async fn write<S: AsyncWrite + Unpin>(&self, stream: &mut S) -> io::Result<()> {
        stream.write_all(&[AUTH_VERSION, self.0]).await
    }

    #[cfg(test)]
    pub async fn read<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Self, FramingError> {
        let mut buf = [0u8; 2];
        stream.read_exact(&mut buf).await?;
        let [version, status] = buf;
        if version != AUTH_VERSION {
            return Err(FramingError::WrongVersion {
                expected: AUTH_VERSION,
                found: version,
            });
        }
        Ok(Self(status))
    }
}

/// Connect request.
/// `VER(1)=0x05 | CMD(1) | RSV(1)=0x00 | ATYP(1) | DST.ADDR(variable) | DST.PORT(2)`
#[derive(Debug)]
pub struct ConnectRequest {
    pub cmd: Command,
    pub dst: DestAddr,
}

impl ConnectRequest {
    pub async fn read<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Self, RequestError> {
        let version = stream.read_u8().await?;
        if version != SOCKS_VERSION {
            return Err(FramingError::WrongVersion {
                expected: SOCKS_VERSION,
                found: version,
            }
            .into());
        }

        let cmd = Command(stream.read_u8().await?);

        let reserved = stream.read_u8().await?;
        if reserved != 0x00 {
            return Err(FramingError::NonZeroReserved.into());
        }

        let dst = read_addr(stream).await?;

        Ok(Self { cmd, dst })
    }

    #[cfg(test)]
    pub async fn write<S: AsyncWrite + Unpin>(&self, stream: &mut S) -> io::Result<()> {
        let mut packet = [0u8; ADDR_MAX_LEN + 3];
        packet[0] = SOCKS_VERSION;
        packet[1] = self.cmd.0;
        packet[2] = 0x00;
        let variable_len = write_addr(&self.dst, &mut packet[3..])?;
        stream.write_all(&packet[..3 + variable_len]).await
    }
}

/// Connect reply.
/// `VER(1)=0x05 | REP(1) | RSV(1)=0x00 | ATYP(1) | BND.ADDR(variable) | BND.PORT(2)`
#[derive(Debug)]
pub struct ConnectReply {
    pub rep: Reply,
    pub bnd: BoundAddr,
}

impl ConnectReply {
    pub fn success(bound: impl ToDestAddr) -> io::Result<Self> {
        Ok(Self {
            rep: Reply::Succeeded,
            bnd: bound.to_dest_addr()?,
        })
    }

    pub fn failure(rep: Reply) -> Self {
        Self {
            rep,
            bnd: DestAddr::Ip(SocketAddr::from(([0, 0, 0, 0], 0))),
        }
    }

    pub async fn write<S: AsyncWrite + Unpin>(&self, stream: &mut S) -> io::Result<()> {
        let mut packet = [0u8; ADDR_MAX_LEN + 3];
        packet[0] = SOCKS_VERSION;
        packet[1] = self.rep.to_u8();
        packet[2] = 0x00;
        let variable_len = write_addr(&self.bnd, &mut packet[3..])?;
        stream.write_all(&packet[..3 + variable_len]).await
    }

    #[cfg(test)]
    pub async fn read<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Self, RequestError> {
        let version = stream.read_u8().await?;
        if version != SOCKS_VERSION {
            return Err(FramingError::WrongVersion {
                expected: SOCKS_VERSION,
                found: version,
            }
            .into());
        }

        let rep = stream.read_u8().await?;
        let rep = reply_from_u8(rep).ok_or(RequestError::UnsupportedAddressType(rep))?;

        let reserved = stream.read_u8().await?;
        if reserved != 0x00 {
            return Err(FramingError::NonZeroReserved.into());
        }

        let bnd = read_addr(stream).await?;

        Ok(Self { rep, bnd })
    }
}

#[cfg(test)]
fn reply_from_u8(v: u8) -> Option<Reply> {
    Some(match v {
        0x00 => Reply::Succeeded,
        0x01 => Reply::GeneralServerFailure,
        0x02 => Reply::ConnectionNotAllowed,
        0x03 => Reply::NetworkUnreachable,
        0x04 => Reply::HostUnreachable,
        0x05 => Reply::ConnectionRefused,
        0x06 => Reply::TtlExpired,
        0x07 => Reply::CommandNotSupported,
        0x08 => Reply::AddressTypeNotSupported,
        _ => return None,
    })
}

// https://www.ietf.org/rfc/rfc1928.txt
// ATYP: IPv4 = 0x01, DOMAINNAME = 0x03, IPv6 = 0x04

async fn read_addr<S: AsyncRead + Unpin>(stream: &mut S) -> Result<DestAddr, RequestError> {
    let atyp = stream.read_u8().await?;
    match atyp {
        0x01 => {
            let ip = Ipv4Addr::from(stream.read_u32().await?);
            let port = stream.read_u16().await?;
            Ok(DestAddr::Ip(SocketAddr::V4(SocketAddrV4::new(ip, port))))
        }
        0x03 => {
            let len = stream.read_u8().await?;
            if len == 0 {
                return Err(FramingError::ZeroLength("domain length").into());
            }
            let mut domain = vec![0u8; usize::from(len)];
            stream.read_exact(&mut domain).await?;
            let domain = String::from_utf8(domain).map_err(|_| FramingError::Io(invalid_utf8("domain")))?;
            let port = stream.read_u16().await?;
            Ok(DestAddr::Domain(domain, port))
        }
        0x04 => {
            let mut ip = [0u8; 16];
            stream.read_exact(&mut ip).await?;
            let ip = Ipv6Addr::from(ip);
            let port = stream.read_u16().await?;
            Ok(DestAddr::Ip(SocketAddr::V6(SocketAddrV6::new(ip, port, 0, 0))))
        }
        other => Err(RequestError::UnsupportedAddressType(other)),
    }
}

fn write_addr(addr: &DestAddr, mut buf: &mut [u8]) -> io::Result<usize> {
    let initial_len = buf.len();

    match addr {
        DestAddr::Ip(SocketAddr::V4(addr)) => {
            buf.write_all(&[0x01])?;
            buf.write_all(&u32::from(*addr.ip()).to_be_bytes())?;
            buf.write_all(&addr.port().to_be_bytes())?;
        }
        DestAddr::Ip(SocketAddr::V6(addr)) => {
            buf.write_all(&[0x04])?;
            buf.write_all(&addr.ip().octets())?;
            buf.write_all(&addr.port().to_be_bytes())?;
        }
        DestAddr::Domain(domain, port) => {
            let Ok(len) = u8::try_from(domain.len()) else {
                return Err(io::Error::new(io::ErrorKind::InvalidInput, "domain name too long"));
            };
            if len == 0 {
                return Err(io::Error::new(io::ErrorKind::InvalidInput, "domain name is empty"));
            }
            buf.write_all(&[0x03, len])?;
            buf.write_all(domain.as_bytes())?;
            buf.write_all(&port.to_be_bytes())?;
        }
    }

    Ok(initial_len - buf.len())
}
