//! Name resolution and TCP establishment shared by the session connector and
//! the diagnostics stages.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::debug;

use crate::error::ConnectionError;

/// Returns the address if `host` is already a literal IPv4/IPv6 address.
/// Bracketed IPv6 (`[::1]`) is accepted.
pub fn literal_address(host: &str) -> Option<IpAddr> {
    let trimmed = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    trimmed.parse().ok()
}

/// Resolves `host` to socket addresses. Literal addresses never touch DNS.
pub async fn resolve(
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<Vec<SocketAddr>, ConnectionError> {
    if let Some(ip) = literal_address(host) {
        return Ok(vec![SocketAddr::new(ip, port)]);
    }

    match tokio::time::timeout(timeout, tokio::net::lookup_host((host, port))).await {
        Ok(Ok(addrs)) => {
            let addrs: Vec<SocketAddr> = addrs.collect();
            if addrs.is_empty() {
                Err(ConnectionError::DnsFailure(format!(
                    "{host} resolved to no addresses"
                )))
            } else {
                debug!(host = %host, count = addrs.len(), "Resolved router host.");
                Ok(addrs)
            }
        }
        Ok(Err(e)) => Err(ConnectionError::DnsFailure(format!("{host}: {e}"))),
        Err(_) => Err(ConnectionError::Timeout(timeout)),
    }
}

/// Tries each address in order until one accepts. The whole attempt shares one
/// deadline, so a long address list cannot exceed `timeout`.
pub async fn connect_any(
    addrs: &[SocketAddr],
    timeout: Duration,
) -> Result<TcpStream, ConnectionError> {
    let deadline = Instant::now() + timeout;
    let mut last_error = ConnectionError::NetworkUnreachable("no addresses to connect to".to_string());

    for addr in addrs {
        match tokio::time::timeout_at(deadline, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(peer = %addr, error = %e, "Failed to set TCP_NODELAY.");
                }
                return Ok(stream);
            }
            Ok(Err(e)) => {
                debug!(peer = %addr, error = %e, "TCP connect attempt failed.");
                last_error = ConnectionError::from_connect_io(&e, &addr.to_string(), timeout);
            }
            Err(_) => return Err(ConnectionError::Timeout(timeout)),
        }
    }
    Err(last_error)
}

/// Resolves and connects in one step, with separate budgets for each.
pub async fn connect_host(
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<TcpStream, ConnectionError> {
    let addrs = resolve(host, port, timeout).await?;
    connect_any(&addrs, timeout).await
}
