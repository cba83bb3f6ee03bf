use std::io::{Read, Write};
use std::os::fd::AsFd;
use std::os::unix::net::UnixStream;
use tether::buffer::CircularBuffer;

fn pattern(len: usize) -> Vec<u8> {
  (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn push_then_drain_preserves_bytes() {
  let (mut source_tx, source_rx) = UnixStream::pair().expect("pair");
  let (sink_tx, mut sink_rx) = UnixStream::pair().expect("pair");

  let mut ring = CircularBuffer::with_capacity(1024);
  let payload = pattern(700);

  source_tx.write_all(&payload).expect("write");
  let pushed = ring.push_from(source_rx.as_fd(), 0).expect("push");
  assert_eq!(pushed, 700);
  assert_eq!(ring.len(), 700);
  assert!(ring.len() <= ring.capacity());
  assert!(ring.readable());

  let drained = ring.drain_to(sink_tx.as_fd(), 0, false).expect("drain");
  assert_eq!(drained, 700);
  assert!(ring.is_empty());

  let mut collected = vec![0u8; 700];
  sink_rx.read_exact(&mut collected).expect("read");
  assert_eq!(collected, payload);
}

#[test]
fn push_respects_the_read_bound() {
  let (mut source_tx, source_rx) = UnixStream::pair().expect("pair");
  let mut ring = CircularBuffer::with_capacity(64);

  source_tx.write_all(&pattern(32)).expect("write");
  assert_eq!(ring.push_from(source_rx.as_fd(), 5).expect("push"), 5);
  assert_eq!(ring.len(), 5);
  assert_eq!(ring.push_from(source_rx.as_fd(), 0).expect("push"), 27);
  assert_eq!(ring.len(), 32);
}

#[test]
fn drain_respects_the_write_bound() {
  let (mut source_tx, source_rx) = UnixStream::pair().expect("pair");
  let (sink_tx, mut sink_rx) = UnixStream::pair().expect("pair");
  let mut ring = CircularBuffer::with_capacity(64);

  source_tx.write_all(&pattern(20)).expect("write");
  ring.push_from(source_rx.as_fd(), 0).expect("push");

  assert_eq!(ring.drain_to(sink_tx.as_fd(), 8, false).expect("drain"), 8);
  assert_eq!(ring.len(), 12);
  assert_eq!(ring.drain_to(sink_tx.as_fd(), 0, false).expect("drain"), 12);
  assert!(ring.is_empty());

  let mut collected = vec![0u8; 20];
  sink_rx.read_exact(&mut collected).expect("read");
  assert_eq!(collected, pattern(20));
}

#[test]
fn wrap_around_transfers_stay_in_order() {
  let (mut source_tx, source_rx) = UnixStream::pair().expect("pair");
  let (sink_tx, mut sink_rx) = UnixStream::pair().expect("pair");
  let mut ring = CircularBuffer::with_capacity(16);

  let first: Vec<u8> = (1..=12).collect();
  let second: Vec<u8> = (13..=22).collect();

  source_tx.write_all(&first).expect("write");
  assert_eq!(ring.push_from(source_rx.as_fd(), 0).expect("push"), 12);
  assert_eq!(ring.drain_to(sink_tx.as_fd(), 8, false).expect("drain"), 8);

  // The next fill crosses the end of the ring and the next drain crosses
  // it again; the consumer must still see a single ordered byte stream.
  source_tx.write_all(&second).expect("write");
  assert_eq!(ring.push_from(source_rx.as_fd(), 0).expect("push"), 10);
  assert_eq!(ring.len(), 14);
  assert_eq!(ring.drain_to(sink_tx.as_fd(), 0, false).expect("drain"), 14);
  assert!(ring.is_empty());

  let mut collected = vec![0u8; 22];
  sink_rx.read_exact(&mut collected).expect("read");
  let expected: Vec<u8> = (1..=22).collect();
  assert_eq!(collected, expected);
}

#[test]
fn zero_length_read_marks_the_producer_closed() {
  let (source_tx, source_rx) = UnixStream::pair().expect("pair");
  let mut ring = CircularBuffer::with_capacity(64);

  drop(source_tx);
  assert_eq!(ring.push_from(source_rx.as_fd(), 0).expect("push"), 0);
  assert!(ring.is_producer_closed());
  assert!(ring.is_drained());
}

#[test]
fn transfer_is_lossless_for_assorted_sizes() {
  for len in [0usize, 1, 63, 64, 100, 512] {
    let (mut source_tx, source_rx) = UnixStream::pair().expect("pair");
    let (sink_tx, mut sink_rx) = UnixStream::pair().expect("pair");
    let mut ring = CircularBuffer::with_capacity(512);
    let payload = pattern(len);

    source_tx.write_all(&payload).expect("write");
    drop(source_tx);

    let mut moved = 0;
    loop {
      let pushed = ring.push_from(source_rx.as_fd(), 0).expect("push");
      if pushed == 0 && ring.is_producer_closed() {
        break;
      }
      moved += ring.drain_to(sink_tx.as_fd(), 0, false).expect("drain");
    }
    moved += ring.drain_to(sink_tx.as_fd(), 0, false).expect("drain");
    drop(sink_tx);

    assert_eq!(moved, len);
    let mut collected = Vec::new();
    sink_rx.read_to_end(&mut collected).expect("read");
    assert_eq!(collected, payload, "length {len}");
  }
}
