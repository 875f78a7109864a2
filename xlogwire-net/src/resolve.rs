//! Address resolution.

use crate::error::NetError;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

/// Resolves a host name to a socket address.
///
/// Implementations may suspend the calling task while resolving, the same
/// way an [`IoWait`](crate::wait::IoWait) policy does.
pub trait Resolver {
    fn resolve(
        &mut self,
        host: &str,
        port: u16,
        timeout: Option<Duration>,
    ) -> Result<SocketAddr, NetError>;
}

/// Resolves through the system resolver (`getaddrinfo`), preferring IPv4.
///
/// The timeout is not enforced; `getaddrinfo` has no way to bound it.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

impl Resolver for SystemResolver {
    fn resolve(
        &mut self,
        host: &str,
        port: u16,
        _timeout: Option<Duration>,
    ) -> Result<SocketAddr, NetError> {
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|e| NetError::Resolve {
                host: host.to_string(),
                reason: e.to_string(),
            })?
            .collect();

        addrs
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| NetError::Resolve {
                host: host.to_string(),
                reason: "no addresses found".to_string(),
            })
    }
}

impl<F> Resolver for F
where
    F: FnMut(&str, u16, Option<Duration>) -> Result<SocketAddr, NetError>,
{
    fn resolve(
        &mut self,
        host: &str,
        port: u16,
        timeout: Option<Duration>,
    ) -> Result<SocketAddr, NetError> {
        self(host, port, timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_numeric() {
        let addr = SystemResolver.resolve("127.0.0.1", 33013, None).unwrap();
        assert_eq!(addr, "127.0.0.1:33013".parse().unwrap());
    }

    #[test]
    fn test_resolve_failure() {
        let err = SystemResolver
            .resolve("definitely.invalid.", 1, None)
            .unwrap_err();
        assert_eq!(err.kind(), xlogwire_codec::ErrorKind::ResolveFailed);
    }

    #[test]
    fn test_closure_resolver() {
        let mut resolver = |_: &str, port: u16, _: Option<Duration>| -> Result<SocketAddr, NetError> {
            Ok(SocketAddr::from(([10, 0, 0, 1], port)))
        };
        let addr = resolver.resolve("db", 7, None).unwrap();
        assert_eq!(addr.port(), 7);
    }
}
