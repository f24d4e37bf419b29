#![allow(missing_docs)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use embedded_time::rate::Fraction;
use embedded_time::Instant;

use crate::net::{Addrd, Endpoint, Transport};

/// A clock whose time is whatever the test says it is.
///
/// One tick is one microsecond.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClockMock(pub Cell<u64>);

impl ClockMock {
  pub fn new() -> Self {
    Self(Cell::new(0))
  }

  pub fn set_millis(&self, ms: u64) {
    self.0.set(ms * 1_000);
  }

  pub fn instant_millis(ms: u64) -> Instant<Self> {
    Instant::new(ms * 1_000)
  }
}

impl embedded_time::Clock for ClockMock {
  type T = u64;

  const SCALING_FACTOR: Fraction = Fraction::new(1, 1_000_000);

  fn try_now(&self) -> Result<Instant<Self>, embedded_time::clock::Error> {
    Ok(Instant::new(self.0.get()))
  }
}

pub fn dummy_endpoint() -> Endpoint {
  Endpoint::cleartext(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(192, 168, 0, 1), 5683)))
}

pub fn dummy_endpoint_2() -> Endpoint {
  Endpoint::cleartext(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(192, 168, 0, 2), 5683)))
}

/// An in-memory transport: a queue of datagrams to be "received"
/// and a log of everything "sent".
#[derive(Debug, Default)]
pub struct TransportMock {
  pub inbound: RefCell<VecDeque<Addrd<Vec<u8>>>>,
  pub outbound: RefCell<Vec<Addrd<Vec<u8>>>>,
  pub fail_sends: Cell<bool>,
}

impl TransportMock {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push_inbound(&self, dgram: Addrd<Vec<u8>>) {
    self.inbound.borrow_mut().push_back(dgram);
  }

  pub fn sent(&self) -> Vec<Addrd<Vec<u8>>> {
    self.outbound.borrow().clone()
  }
}

impl Transport for TransportMock {
  type Error = &'static str;

  fn send(&self, dgram: Addrd<&[u8]>) -> nb::Result<(), Self::Error> {
    if self.fail_sends.get() {
      return Err(nb::Error::Other("mock transport refused to send"));
    }

    self.outbound
        .borrow_mut()
        .push(dgram.map(|bytes| bytes.to_vec()));
    Ok(())
  }

  fn recv(&self, buffer: &mut [u8]) -> nb::Result<Addrd<usize>, Self::Error> {
    match self.inbound.borrow_mut().pop_front() {
      | Some(Addrd(bytes, src)) => {
        let n = bytes.len().min(buffer.len());
        buffer[..n].copy_from_slice(&bytes[..n]);
        Ok(Addrd(n, src))
      },
      | None => Err(nb::Error::WouldBlock),
    }
  }
}
