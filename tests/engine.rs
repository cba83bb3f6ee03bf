use std::io::{Read, Write};
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use tether::address::SockType;
use tether::connection::Connection;
use tether::engine;
use tether::flags::Flags;
use tether::stream::HoldTimeout;

/// A fully wired session over socket pairs: `feed` plays standard input,
/// `out` observes standard output, `peer` is the far end of the network.
struct Session {
  conn: Connection,
  feed: UnixStream,
  out: UnixStream,
  peer: UnixStream,
}

fn session() -> Session {
  let mut conn = Connection::new();

  let (feed, feed_rx) = UnixStream::pair().expect("pair");
  let (out_tx, out) = UnixStream::pair().expect("pair");
  conn.local.assign_fds(Some(OwnedFd::from(feed_rx)), Some(OwnedFd::from(out_tx)), None);

  let (session_end, peer) = UnixStream::pair().expect("pair");
  conn.remote.assign_socket(OwnedFd::from(session_end), SockType::Stream);

  Session { conn, feed, out, peer }
}

fn pattern(len: usize) -> Vec<u8> {
  (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn echo_session_delivers_all_bytes_and_terminates() {
  let Session { mut conn, mut feed, mut out, mut peer } = session();

  let payload = pattern(10_000);
  let expected = payload.clone();

  let echo = thread::spawn(move || {
    let mut buf = [0u8; 4096];
    loop {
      let count = peer.read(&mut buf).expect("peer read");
      if count == 0 {
        break;
      }
      peer.write_all(buf.get(..count).expect("slice")).expect("peer write");
    }
  });

  let (echo_done_tx, echo_done_rx) = mpsc::channel();
  let collector = thread::spawn(move || {
    let mut collected = Vec::new();
    let mut buf = [0u8; 4096];
    let mut signalled = false;
    loop {
      let count = out.read(&mut buf).expect("collector read");
      if count == 0 {
        break;
      }
      collected.extend_from_slice(buf.get(..count).expect("slice"));
      if !signalled && collected.len() >= 10_000 {
        signalled = true;
        let _ = echo_done_tx.send(());
      }
    }
    collected
  });

  // Keep standard input open until the full echo has come back, so the
  // teardown that follows local EOF cannot race the returning data.
  let feeder = thread::spawn(move || {
    feed.write_all(&payload).expect("feed write");
    echo_done_rx.recv_timeout(Duration::from_secs(30)).expect("echo completed");
    drop(feed);
  });

  engine::run(&mut conn).expect("engine");

  feeder.join().expect("feeder");
  echo.join().expect("echo");
  let collected = collector.join().expect("collector");
  assert_eq!(collected, expected);
}

#[test]
fn suppressed_half_close_closes_the_socket_after_local_eof() {
  let Session { mut conn, feed, out, mut peer } = session();

  // No stdin data at all: EOF right away.
  drop(feed);

  let peer_thread = thread::spawn(move || {
    let mut sink = Vec::new();
    // The engine must close the socket outright, not just one direction,
    // so this read unblocks with EOF.
    peer.read_to_end(&mut sink).expect("peer read");
    sink
  });

  engine::run(&mut conn).expect("engine");

  assert!(peer_thread.join().expect("peer").is_empty());
  drop(out);
}

#[test]
fn half_close_keeps_reading_after_local_eof() {
  let Session { mut conn, mut feed, mut out, mut peer } = session();
  conn.remote.suppress_half_close(false);

  let request = pattern(5000);
  let response = vec![9u8; 3000];
  let expected = response.clone();

  let peer_thread = thread::spawn(move || {
    let mut received = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
      let count = peer.read(&mut buf).expect("peer read");
      if count == 0 {
        break;
      }
      received.extend_from_slice(buf.get(..count).expect("slice"));
    }
    // We saw the write-shutdown; the reverse direction must still work.
    peer.write_all(&response).expect("peer write");
    drop(peer);
    received
  });

  let feeder = thread::spawn(move || {
    feed.write_all(&request).expect("feed");
    drop(feed);
  });

  engine::run(&mut conn).expect("engine");

  feeder.join().expect("feeder");
  assert_eq!(peer_thread.join().expect("peer").len(), 5000);

  let mut collected = Vec::new();
  out.read_to_end(&mut collected).expect("out");
  assert_eq!(collected, expected);
}

#[test]
fn send_only_never_reads_from_the_remote() {
  let Session { mut conn, mut feed, mut out, mut peer } = session();
  conn.flags.insert(Flags::SEND_DATA_ONLY);

  let peer_thread = thread::spawn(move || {
    peer.write_all(b"must not appear on stdout").expect("peer write");
    let mut received = Vec::new();
    peer.read_to_end(&mut received).expect("peer read");
    received
  });

  let feeder = thread::spawn(move || {
    feed.write_all(&[5u8; 2000]).expect("feed");
    drop(feed);
  });

  engine::run(&mut conn).expect("engine");

  feeder.join().expect("feeder");
  assert_eq!(peer_thread.join().expect("peer").len(), 2000);

  let mut collected = Vec::new();
  out.read_to_end(&mut collected).expect("out");
  assert!(collected.is_empty());
}

#[test]
fn recv_only_with_suppressed_half_close_tears_down_immediately() {
  let Session { mut conn, feed, mut out, mut peer } = session();
  conn.flags.insert(Flags::RECV_DATA_ONLY);

  let peer_thread = thread::spawn(move || {
    let mut sink = Vec::new();
    peer.read_to_end(&mut sink).expect("peer read");
    sink
  });

  engine::run(&mut conn).expect("engine");

  assert!(peer_thread.join().expect("peer").is_empty());
  let mut collected = Vec::new();
  out.read_to_end(&mut collected).expect("out");
  assert!(collected.is_empty());
  drop(feed);
}

#[test]
fn hold_timeout_tears_down_an_idle_half_closed_stream() {
  let Session { mut conn, mut feed, out, mut peer } = session();
  conn.remote.suppress_half_close(false);
  conn.local.set_hold_timeout(HoldTimeout::After(Duration::from_millis(200)));

  let (release_tx, release_rx) = mpsc::channel();
  let peer_thread = thread::spawn(move || {
    let mut received = Vec::new();
    peer.read_to_end(&mut received).expect("peer read");
    // Keep the socket open without ever sending or closing; only the
    // hold timer can end the session now.
    let _ = release_rx.recv_timeout(Duration::from_secs(30));
    drop(peer);
    received
  });

  let feeder = thread::spawn(move || {
    feed.write_all(&[1u8; 100]).expect("feed");
    drop(feed);
  });

  let started = Instant::now();
  engine::run(&mut conn).expect("engine");
  let elapsed = started.elapsed();
  release_tx.send(()).expect("release");

  assert!(elapsed >= Duration::from_millis(150), "returned after {elapsed:?}");
  assert!(elapsed < Duration::from_secs(10), "returned after {elapsed:?}");

  feeder.join().expect("feeder");
  assert_eq!(peer_thread.join().expect("peer").len(), 100);
  drop(out);
}
