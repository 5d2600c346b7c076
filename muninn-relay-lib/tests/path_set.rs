//! Path set construction: pairing invariants and input validation.

use std::net::IpAddr;

use muninn_relay_lib::{PathSet, ProxyAddrs, RelayError};
use tokio::net::UdpSocket;

async fn stub_proxy() -> ProxyAddrs {
    let data = UdpSocket::bind("127.0.0.1:0").await.expect("bind data");
    let ping = UdpSocket::bind("127.0.0.1:0").await.expect("bind ping");
    let addrs = ProxyAddrs {
        data: data.local_addr().expect("data addr"),
        ping: ping.local_addr().expect("ping addr"),
    };
    // Listeners are dropped; UDP connect does not need a live peer.
    addrs
}

#[tokio::test]
async fn builds_the_cartesian_product_with_aligned_sockets() {
    let proxies = vec![stub_proxy().await, stub_proxy().await];
    let locals: Vec<IpAddr> = vec![
        "127.0.0.1".parse().expect("ip"),
        "127.0.0.1".parse().expect("ip"),
    ];

    let set = PathSet::connect(&locals, &proxies).expect("path set");
    assert_eq!(set.len(), 4);

    for (position, path) in set.paths().iter().enumerate() {
        assert_eq!(path.index(), position);
        let proxy = &proxies[position % proxies.len()];
        // Data and ping sockets of one path always point at the same
        // proxy, through the same local interface.
        assert_eq!(path.data().peer_addr().expect("data peer"), proxy.data);
        assert_eq!(path.ping().peer_addr().expect("ping peer"), proxy.ping);
        assert_eq!(
            path.data().local_addr().expect("local").ip(),
            path.ping().local_addr().expect("local").ip(),
        );
    }
}

#[tokio::test]
async fn rejects_an_empty_local_ip_list() {
    let proxies = vec![stub_proxy().await];
    let err = PathSet::connect(&[], &proxies).err().expect("must fail");
    assert!(matches!(err, RelayError::Config(_)), "got {err:?}");
}

#[tokio::test]
async fn rejects_an_empty_proxy_list() {
    let locals: Vec<IpAddr> = vec!["127.0.0.1".parse().expect("ip")];
    let err = PathSet::connect(&locals, &[]).err().expect("must fail");
    assert!(matches!(err, RelayError::Config(_)), "got {err:?}");
}

#[tokio::test]
async fn fails_when_a_local_ip_cannot_be_bound() {
    let proxies = vec![stub_proxy().await];
    // TEST-NET-3 is not assigned to any local interface.
    let locals: Vec<IpAddr> = vec!["203.0.113.1".parse().expect("ip")];
    assert!(PathSet::connect(&locals, &proxies).is_err());
}
