use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use socket2::{Protocol, SockAddr, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{RelayError, Result};

/// Data/ping listener address pair of one remote proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyAddrs {
    pub data: SocketAddr,
    pub ping: SocketAddr,
}

/// One network path: a local interface paired with a remote proxy,
/// realized as two connected UDP sockets. The data socket carries game
/// payloads to `proxy.data`; the ping socket carries 8-byte RTT probes
/// to `proxy.ping`. Both close together when the last reference drops,
/// so a trimmed path can never leak one of its two sockets.
pub struct Path {
    index: usize,
    local_ip: IpAddr,
    proxy: ProxyAddrs,
    data: UdpSocket,
    ping: UdpSocket,
    /// Serializes data-socket writes; fan-out and probes both take it.
    send_lock: Mutex<()>,
    /// Serializes ping exchanges so concurrent rankers cannot pair a
    /// request with another request's reply.
    ping_lock: Mutex<()>,
}

impl Path {
    fn connect(index: usize, local_ip: IpAddr, proxy: ProxyAddrs) -> Result<Self> {
        let data = connect_udp(local_ip, proxy.data)?;
        let ping = connect_udp(local_ip, proxy.ping)?;
        debug!(%local_ip, data = %proxy.data, ping = %proxy.ping, "path connected");
        Ok(Self {
            index,
            local_ip,
            proxy,
            data,
            ping,
            send_lock: Mutex::new(()),
            ping_lock: Mutex::new(()),
        })
    }

    /// Position in the construction order; stable identity for the
    /// lifetime of the run.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn local_ip(&self) -> IpAddr {
        self.local_ip
    }

    pub fn proxy(&self) -> ProxyAddrs {
        self.proxy
    }

    pub fn data(&self) -> &UdpSocket {
        &self.data
    }

    pub fn ping(&self) -> &UdpSocket {
        &self.ping
    }

    pub fn send_lock(&self) -> &Mutex<()> {
        &self.send_lock
    }

    pub fn ping_lock(&self) -> &Mutex<()> {
        &self.ping_lock
    }

    /// Short `local -> proxy` form for log lines.
    pub fn label(&self) -> String {
        format!("{}->{}", self.local_ip, self.proxy.data)
    }
}

/// Binds a nonblocking UDP socket to `(local_ip, 0)` and connects it to
/// `remote`.
fn connect_udp(local_ip: IpAddr, remote: SocketAddr) -> Result<UdpSocket> {
    let bind_addr = SockAddr::from(SocketAddr::new(local_ip, 0));
    let socket = Socket::new(bind_addr.domain(), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_nonblocking(true)?;
    socket.bind(&bind_addr)?;
    socket.connect(&SockAddr::from(remote))?;
    let socket = std::net::UdpSocket::from(socket);
    Ok(UdpSocket::try_from(socket)?)
}

/// All candidate paths: the Cartesian product of local interface IPs and
/// remote proxies. Every path owns exactly one data and one ping socket,
/// so the two planes stay index-aligned for the lifetime of the set.
pub struct PathSet {
    paths: Vec<Arc<Path>>,
}

impl PathSet {
    /// Opens two connected sockets per `(local IP, proxy)` pair. Must be
    /// called from within a tokio runtime. On any failure everything
    /// opened so far is released before the error propagates.
    pub fn connect(local_ips: &[IpAddr], proxies: &[ProxyAddrs]) -> Result<Self> {
        if local_ips.is_empty() {
            return Err(RelayError::Config("no local IPs to bind paths to".into()));
        }
        if proxies.is_empty() {
            return Err(RelayError::Config("no proxies configured".into()));
        }

        let mut paths = Vec::with_capacity(local_ips.len() * proxies.len());
        for local_ip in local_ips {
            for proxy in proxies {
                let path = Path::connect(paths.len(), *local_ip, *proxy)?;
                paths.push(Arc::new(path));
            }
        }
        Ok(Self { paths })
    }

    pub fn paths(&self) -> &[Arc<Path>] {
        &self.paths
    }

    pub fn into_paths(self) -> Vec<Arc<Path>> {
        self.paths
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}
