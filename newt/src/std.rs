use std::io;
use std::net::UdpSocket;

use embedded_time::rate::Fraction;

use crate::net::{Addrd, Endpoint, Transport};

/// Implement [`embedded_time::Clock`] using [`std::time`] primitives
#[derive(Debug, Clone, Copy)]
pub struct Clock(std::time::Instant);

impl Default for Clock {
  fn default() -> Self {
    Self::new()
  }
}

impl Clock {
  /// Create a new clock; its epoch is the moment of construction
  pub fn new() -> Self {
    Self(std::time::Instant::now())
  }
}

impl embedded_time::Clock for Clock {
  type T = u64;

  // microseconds
  const SCALING_FACTOR: Fraction = Fraction::new(1, 1_000_000);

  fn try_now(&self) -> Result<embedded_time::Instant<Self>, embedded_time::clock::Error> {
    let now = std::time::Instant::now();
    let elapsed = now.duration_since(self.0);
    Ok(embedded_time::Instant::new(elapsed.as_micros() as u64))
  }
}

fn io_to_nb(e: io::Error) -> nb::Error<io::Error> {
  match e.kind() {
    | io::ErrorKind::WouldBlock => nb::Error::WouldBlock,
    | _ => nb::Error::Other(e),
  }
}

/// Cleartext UDP as a [`Transport`].
///
/// The socket must be in non-blocking mode
/// ([`UdpSocket::set_nonblocking`]); a blocking socket would stall
/// the event loop. Every peer is identified as
/// [`Endpoint::cleartext`].
impl Transport for UdpSocket {
  type Error = io::Error;

  fn send(&self, dgram: Addrd<&[u8]>) -> nb::Result<(), Self::Error> {
    self.send_to(dgram.data(), dgram.addr().addr)
        .map(|_| ())
        .map_err(io_to_nb)
  }

  fn recv(&self, buffer: &mut [u8]) -> nb::Result<Addrd<usize>, Self::Error> {
    self.recv_from(buffer)
        .map(|(n, addr)| Addrd(n, Endpoint::cleartext(addr)))
        .map_err(io_to_nb)
  }
}
