use std::net::SocketAddr;

/// Opaque identifier of the security context a peer was reached
/// through.
///
/// The message layer does not authenticate anything; it only keeps
/// peers reached through different contexts apart, so that state
/// (Message IDs, retransmissions, congestion windows) never leaks
/// across a security boundary. `None` is cleartext.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SecurityCtx(pub Option<u32>);

/// The canonical identity of a remote peer: where it is, and how
/// we talk to it.
///
/// Two endpoints compare equal exactly when their address, port
/// and security context all match; each distinct endpoint owns one
/// [`EndpointState`](crate::state::EndpointState).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Endpoint {
  /// IP address & port
  pub addr: SocketAddr,
  /// see [`SecurityCtx`]
  pub security: SecurityCtx,
}

impl Endpoint {
  /// An endpoint reached without any security context
  pub fn cleartext(addr: SocketAddr) -> Self {
    Endpoint { addr,
               security: SecurityCtx(None) }
  }

  /// An endpoint reached through the security context `ctx`
  pub fn secure(addr: SocketAddr, ctx: u32) -> Self {
    Endpoint { addr,
               security: SecurityCtx(Some(ctx)) }
  }
}

/// Data that came from, or is destined for, a network endpoint
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy)]
pub struct Addrd<T>(pub T, pub Endpoint);

impl<T> Addrd<T> {
  /// Borrow the contents of this Addressed
  pub fn as_ref(&self) -> Addrd<&T> {
    Addrd(self.data(), self.addr())
  }

  /// Discard the endpoint and get the data in this Addressed
  pub fn unwrap(self) -> T {
    self.0
  }

  /// Map the data contained in this Addressed
  pub fn map<R>(self, f: impl FnOnce(T) -> R) -> Addrd<R> {
    Addrd(f(self.0), self.1)
  }

  /// Borrow the contents of the addressed item
  pub fn data(&self) -> &T {
    &self.0
  }

  /// Copy the endpoint for the data
  pub fn addr(&self) -> Endpoint {
    self.1
  }

  /// Turn the entire structure into something else
  pub fn fold<R>(self, f: impl FnOnce(T, Endpoint) -> R) -> R {
    f(self.0, self.1)
  }
}

/// The datagram transport injected into the runtime.
///
/// The runtime only ever asks two things of it: throw bytes at an
/// endpoint, and hand over any bytes that have arrived along with
/// who sent them. Both are non-blocking; "nothing to do yet" is
/// [`nb::Error::WouldBlock`].
///
/// A `send` failing with [`nb::Error::Other`] resolves the sending
/// transmission as failed; it never aborts the event loop.
pub trait Transport {
  /// The error yielded by transport operations
  type Error: core::fmt::Debug;

  /// Send a datagram to a remote endpoint
  fn send(&self, dgram: Addrd<&[u8]>) -> nb::Result<(), Self::Error>;

  /// Pull a received datagram into `buffer`, yielding the number of
  /// bytes written and the sender.
  ///
  /// Like [`std::net::UdpSocket`], bytes in excess of the buffer
  /// are dropped and not considered an error condition.
  fn recv(&self, buffer: &mut [u8]) -> nb::Result<Addrd<usize>, Self::Error>;
}
