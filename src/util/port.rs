//! Local TCP port probing and allocation.

use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, TcpListener};

use tracing::debug;

use crate::error::{LaunchError, LaunchResult};

const LOOPBACK: &str = "127.0.0.1";

/// Hosts a server reachable via `localhost` may be bound to.
const PROBE_HOSTS: [IpAddr; 4] = [
    IpAddr::V4(Ipv4Addr::LOCALHOST),
    IpAddr::V4(Ipv4Addr::UNSPECIFIED),
    IpAddr::V6(Ipv6Addr::LOCALHOST),
    IpAddr::V6(Ipv6Addr::UNSPECIFIED),
];

/// Whether nothing is listening on `port` on any local host address.
///
/// A host whose address family is unavailable (e.g. IPv6 disabled) is
/// skipped rather than counted as busy.
pub fn is_port_free(port: u16) -> bool {
    PROBE_HOSTS.iter().all(|&host| match TcpListener::bind((host, port)) {
        Ok(_) => true,
        Err(e) => {
            let busy = matches!(e.kind(), ErrorKind::AddrInUse | ErrorKind::PermissionDenied);
            if busy {
                debug!(%host, port, error = %e, "port in use");
            }
            !busy
        }
    })
}

/// Pick `preferred` if it is free, otherwise any free port.
///
/// The probe listener is dropped before returning, so another process can
/// still grab the port before the caller binds it.
///
/// # Errors
///
/// Returns [`LaunchError::PortUnavailable`] if not even an ephemeral port
/// can be bound.
pub fn get_port(preferred: u16) -> LaunchResult<u16> {
    if preferred != 0 && is_port_free(preferred) {
        return Ok(preferred);
    }

    let listener = TcpListener::bind((LOOPBACK, 0))
        .map_err(|source| LaunchError::PortUnavailable { preferred, source })?;
    let port = listener
        .local_addr()
        .map_err(|source| LaunchError::PortUnavailable { preferred, source })?
        .port();

    debug!(preferred, port, "preferred port busy, using ephemeral port");
    Ok(port)
}
