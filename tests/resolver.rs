use tether::address::{self, Address, AddressFamily, Protocol, SockType};

#[test]
fn numeric_tcp_resolution_yields_a_stream_candidate() {
  let addr = Address::new(Some("127.0.0.1".to_string()), Some("4000".to_string()));
  let candidates =
    address::resolve(&addr, AddressFamily::Unspecified, Protocol::Tcp, true, false)
      .expect("resolve");

  assert!(!candidates.is_empty());
  let first = candidates.first().expect("candidate");
  assert_eq!(first.socktype, SockType::Stream);
  assert_eq!(first.family, AddressFamily::Ipv4);

  let sockaddr = first.addr.as_socket().expect("socket address");
  assert_eq!(sockaddr.port(), 4000);
  assert!(sockaddr.ip().is_loopback());
}

#[test]
fn udp_resolution_yields_datagram_candidates() {
  let addr = Address::new(Some("127.0.0.1".to_string()), Some("4001".to_string()));
  let candidates =
    address::resolve(&addr, AddressFamily::Unspecified, Protocol::Udp, true, false)
      .expect("resolve");

  assert!(candidates.iter().all(|c| c.socktype == SockType::Datagram));
}

#[test]
fn passive_resolution_without_a_host_yields_bind_candidates() {
  let addr = Address::new(None, Some("0".to_string()));
  let candidates =
    address::resolve(&addr, AddressFamily::Unspecified, Protocol::Tcp, true, true)
      .expect("resolve");

  assert!(!candidates.is_empty());
  assert!(candidates.iter().all(|c| c.addr.as_socket().is_some()));
}

#[test]
fn unresolvable_names_report_the_endpoint() {
  let addr = Address::new(Some("host.invalid".to_string()), Some("4000".to_string()));
  let err = address::resolve(&addr, AddressFamily::Unspecified, Protocol::Tcp, true, false)
    .expect_err("must not resolve");
  assert!(err.to_string().contains("host.invalid"));
}

#[test]
fn reordering_puts_every_v6_candidate_first_and_keeps_family_order() {
  let v4 = Address::new(Some("127.0.0.1".to_string()), Some("1".to_string()));
  let v6 = Address::new(Some("::1".to_string()), Some("2".to_string()));

  let mut mixed =
    address::resolve(&v4, AddressFamily::Unspecified, Protocol::Tcp, true, false)
      .expect("resolve v4");
  mixed.extend(
    address::resolve(&v6, AddressFamily::Unspecified, Protocol::Tcp, true, false)
      .expect("resolve v6"),
  );
  mixed.extend(
    address::resolve(&v4, AddressFamily::Unspecified, Protocol::Tcp, true, false)
      .expect("resolve v4"),
  );

  let ordered = address::order_ipv6_first(mixed);
  let split = ordered.iter().take_while(|c| c.is_ipv6()).count();
  assert!(ordered.iter().skip(split).all(|c| !c.is_ipv6()));
  assert!(ordered.iter().take(split).all(|c| c.is_ipv6()));

  let v4_ports: Vec<u16> = ordered
    .iter()
    .filter(|c| !c.is_ipv6())
    .filter_map(|c| c.addr.as_socket().map(|s| s.port()))
    .collect();
  assert_eq!(v4_ports, vec![1, 1]);
}
