//! TCP listener binding with port reuse.
//!
//! # Responsibilities
//! - Bind the plaintext and TLS addresses with `SO_REUSEADDR`/`SO_REUSEPORT`
//! - Hand a ready, non-blocking std listener to the HTTP server
//! - Describe each listener (scheme, port) for forwarding headers

use std::net::SocketAddr;

use tokio::net::TcpSocket;

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// The configured address is not a socket address.
    Address(String),
    /// Failed to set up or bind the socket.
    Bind(std::io::Error),
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Address(addr) => write!(f, "Invalid listen address: {}", addr),
            ListenerError::Bind(e) => write!(f, "Failed to bind: {}", e),
        }
    }
}

impl std::error::Error for ListenerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ListenerError::Address(_) => None,
            ListenerError::Bind(e) => Some(e),
        }
    }
}

impl From<ListenerError> for std::io::Error {
    fn from(e: ListenerError) -> Self {
        match e {
            ListenerError::Address(addr) => {
                std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("invalid address {}", addr))
            }
            ListenerError::Bind(e) => e,
        }
    }
}

/// Which of the two listeners accepted a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

/// Scheme and local port of a bound listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerInfo {
    pub scheme: Scheme,
    pub port: u16,
}

/// Bind `addr` with address and port reuse enabled.
///
/// The socket family follows the address. Must be called from within a Tokio
/// runtime. The returned listener is already in non-blocking mode.
pub fn bind_reusable(addr: &str, backlog: u32) -> Result<std::net::TcpListener, ListenerError> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|_| ListenerError::Address(addr.to_string()))?;

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(ListenerError::Bind)?;

    socket.set_reuseaddr(true).map_err(ListenerError::Bind)?;
    #[cfg(all(unix, not(target_os = "solaris"), not(target_os = "illumos")))]
    socket.set_reuseport(true).map_err(ListenerError::Bind)?;

    socket.bind(addr).map_err(ListenerError::Bind)?;
    let listener = socket.listen(backlog).map_err(ListenerError::Bind)?;
    let listener = listener.into_std().map_err(ListenerError::Bind)?;

    tracing::info!(
        address = %listener.local_addr().map_err(ListenerError::Bind)?,
        "Listener bound"
    );
    Ok(listener)
}
