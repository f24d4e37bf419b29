use std::collections::{BTreeMap, VecDeque};

use embedded_time::Instant;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

mod error;
#[doc(inline)]
pub use error::*;

use crate::cache::{Outcome, Resolution};
use crate::config::{Config, InvalidConfig};
use crate::msg::{validate, CodeKind, Message, OptDescriptor, Registry, RegistryConflict, Type};
use crate::net::{Addrd, Endpoint, Transport};
use crate::state::{Effect, EndpointState, SendHandle};
use crate::time::{Clock, Millis};
use embedded_time::duration::Milliseconds;

/// The largest datagram the loop will pull off the transport; CoAP's
/// default maximum message size.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1152;

/// Something the upper layer should know about, produced by one
/// event-loop step.
#[derive(Debug, Clone, PartialEq)]
pub enum Happening {
  /// An ACK or RST arrived for a transmission submitted here.
  ///
  /// The message is included whole, since an ACK may piggyback a
  /// response. Always precedes the matching
  /// [`Happening::Resolved`].
  Reply(SendHandle, Message),
  /// A submitted transmission reached its terminal disposition.
  Resolved(SendHandle, Outcome),
  /// A peer sent us a request.
  InboundRequest(Addrd<Message>),
  /// A peer sent us a response as its own message (not piggybacked
  /// on an ACK), with a best-effort token match against our
  /// outstanding requests.
  InboundResponse(Addrd<Message>, Option<SendHandle>),
}

/// The message-layer event loop.
///
/// `Core` owns the injected transport, the clock, the option
/// registry, and one [`EndpointState`] per peer. It is strictly
/// single-threaded: every mutation happens inside [`Core::poll`],
/// [`Core::submit`] or [`Core::cancel`], and each of those runs to
/// completion before anything else observes the caches.
///
/// The intended driver loop:
///
/// ```text
/// loop {
///   for happening in core.poll()? { ... }
///   sleep(core.next_wakeup_in()?, or until the socket is readable)
/// }
/// ```
#[allow(missing_debug_implementations)]
pub struct Core<C: Clock, T: Transport> {
  clock: C,
  transport: T,
  config: Config,
  registry: Registry,
  states: BTreeMap<Endpoint, EndpointState<C>>,
  rand: ChaCha8Rng,
  pending: Vec<Happening>,
}

impl<C: Clock, T: Transport> Core<C, T> {
  /// Create a new core.
  ///
  /// The configuration is validated here; a bad parameter set never
  /// reaches a running loop.
  pub fn new(config: Config, clock: C, transport: T) -> Result<Self, InvalidConfig> {
    Ok(Self { config: config.checked()?,
              clock,
              transport,
              registry: Registry::core(),
              states: BTreeMap::new(),
              rand: ChaCha8Rng::seed_from_u64(0),
              pending: Vec::new() })
  }

  /// Register an option beyond the base table.
  ///
  /// The registry is append-only: do this at startup, before the
  /// loop runs. Conflicts are fatal to startup.
  pub fn register_option(&mut self, desc: OptDescriptor) -> Result<(), RegistryConflict> {
    self.registry.register(desc)
  }

  /// The option registry in use
  pub fn registry(&self) -> &Registry {
    &self.registry
  }

  fn now(&self, when: When) -> Result<Instant<C>, Error<T::Error>> {
    self.clock
        .try_now()
        .map_err(|_| when.what(What::Clock))
  }

  fn state_for(&mut self,
               peer: Endpoint,
               when: When)
               -> Result<&mut EndpointState<C>, Error<T::Error>> {
    use std::collections::btree_map::Entry;

    match self.states.entry(peer) {
      | Entry::Occupied(e) => Ok(e.into_mut()),
      | Entry::Vacant(v) => {
        let seed = self.rand.gen();
        EndpointState::new(peer, self.config, seed).map(|state| v.insert(state))
                                                   .map_err(|e| when.what(What::Config(e)))
      },
    }
  }

  /// Hand a message to the message layer for delivery to `dest`.
  ///
  /// The returned handle names the transmission in later
  /// [`Happening`]s; consult [`Core::resolution`] with it at any
  /// time.
  pub fn submit(&mut self,
                dest: Endpoint,
                msg: Message)
                -> Result<SendHandle, Error<T::Error>> {
    let now = self.now(When::Submitting)?;
    let mut effects = Vec::new();

    let handle = self.state_for(dest, When::Submitting)?
                     .submit(msg, now, &mut effects)
                     .map_err(|e| When::Submitting.what(What::Submit(e)))?;

    self.drive(now, effects);
    Ok(handle)
  }

  /// Stop caring about a transmission.
  ///
  /// Takes effect like any other event: a queued message is dropped
  /// outright, an in-flight one stops retransmitting but may still
  /// resolve off a late reply.
  pub fn cancel(&mut self, handle: SendHandle) -> Result<(), Error<T::Error>> {
    self.state_for(handle.peer, When::Cancelling)?
        .cancel(handle.id)
        .map_err(|e| When::Cancelling.what(What::Cancel(e)))
  }

  /// The current resolution of a transmission, or `None` once the
  /// record behind the handle has expired (or never existed).
  pub fn resolution(&self, handle: SendHandle) -> Option<Resolution> {
    self.states
        .get(&handle.peer)
        .and_then(|state| state.resolution(handle.id))
  }

  /// One event-loop step: drain the transport, fire every due
  /// timer, flush the consequences, and report what the upper
  /// layer should know.
  ///
  /// Never blocks; call it when the transport is readable or
  /// [`Core::next_wakeup_in`] elapses.
  pub fn poll(&mut self) -> Result<Vec<Happening>, Error<T::Error>> {
    let now = self.now(When::Polling)?;
    let mut effects = Vec::new();

    let mut buf = [0u8; DEFAULT_MAX_MESSAGE_SIZE];
    loop {
      match self.transport.recv(&mut buf) {
        | Ok(Addrd(n, src)) => {
          let bytes = buf[..n].to_vec();
          self.handle_dgram(Addrd(bytes, src), now, &mut effects)?;
        },
        | Err(nb::Error::WouldBlock) => break,
        | Err(nb::Error::Other(e)) => {
          log::warn!("transport receive error: {:?}", e);
          break;
        },
      }
    }

    for state in self.states.values_mut() {
      state.tick(now, &mut effects);
    }

    self.drive(now, effects);
    Ok(std::mem::take(&mut self.pending))
  }

  /// Milliseconds until some deadline needs [`Core::poll`] called
  /// again, or `None` while nothing at all is pending.
  pub fn next_wakeup_in(&self) -> Result<Option<Millis>, Error<T::Error>> {
    let now = self.now(When::Polling)?;
    Ok(self.states
           .values()
           .filter_map(|state| state.next_wakeup_in(now))
           .min())
  }

  fn handle_dgram(&mut self,
                  dgram: Addrd<Vec<u8>>,
                  now: Instant<C>,
                  effects: &mut Vec<Effect>)
                  -> Result<(), Error<T::Error>> {
    let Addrd(bytes, src) = dgram;

    match Message::try_from_bytes(&bytes) {
      | Ok(msg) => match validate(&msg, &self.registry) {
        | Ok(()) => {
          self.state_for(src, When::Polling)?.on_recv(msg, now, effects)
        },
        | Err(e) => {
          log::warn!("unacceptable {:?} {:?} from {:?}: {:?}",
                     msg.ty,
                     msg.id,
                     src.addr,
                     e);
          if msg.ty == Type::Con {
            self.state_for(src, When::Polling)?.reject(msg.id, now, effects);
          }
        },
      },
      | Err(e) => {
        log::warn!("undecodable datagram from {:?}: {:?}", src.addr, e);
        match e.shell() {
          | Some(shell) if shell.ty == Type::Con => {
            self.state_for(src, When::Polling)?.reject(shell.id, now, effects)
          },
          | _ => (),
        }
      },
    }

    Ok(())
  }

  /// Carry out what the endpoint states asked for, in order.
  ///
  /// Transport send failures are folded back in as failed
  /// resolutions (which may free queued messages, whose
  /// transmissions join the back of the work list).
  fn drive(&mut self, now: Instant<C>, effects: Vec<Effect>) {
    let mut work: VecDeque<Effect> = effects.into();

    while let Some(effect) = work.pop_front() {
      match effect {
        | Effect::Transmit(handle, Addrd(bytes, dest))
        | Effect::Retransmit(handle, Addrd(bytes, dest)) => {
          match self.transport.send(Addrd(bytes.as_slice(), dest)) {
            | Ok(()) => (),
            | Err(nb::Error::WouldBlock) => {
              // CONs will refire off the back-off timer; everything
              // else waits out its lifetime
              log::debug!("transport busy; {:?} not sent", handle.id);
            },
            | Err(nb::Error::Other(e)) => {
              log::warn!("transport error sending {:?}: {:?}", handle.id, e);
              let mut consequences = Vec::new();
              if let Some(state) = self.states.get_mut(&handle.peer) {
                state.upper_resolution(handle.id,
                                       Outcome::Failed,
                                       now,
                                       &mut consequences);
              }
              work.extend(consequences);
            },
          }
        },
        | Effect::SendReply(Addrd(bytes, dest)) => {
          match self.transport.send(Addrd(bytes.as_slice(), dest)) {
            | Ok(()) => (),
            // the peer will retransmit and we'll reply again
            | Err(e) => log::debug!("reply to {:?} not sent: {:?}", dest.addr, e),
          }
        },
        | Effect::Deliver(Addrd(msg, src)) => {
          let happening = match msg.code.kind() {
            | CodeKind::Request => Happening::InboundRequest(Addrd(msg, src)),
            | CodeKind::Response => {
              let matching = self.states
                                 .get(&src)
                                 .and_then(|state| state.find_by_token(msg.token));
              Happening::InboundResponse(Addrd(msg, src), matching)
            },
            // states never deliver empty messages
            | CodeKind::Empty => continue,
          };
          self.pending.push(happening);
        },
        | Effect::ReplyReceived(handle, msg) => {
          self.pending.push(Happening::Reply(handle, msg))
        },
        | Effect::Resolved(handle, outcome) => {
          self.pending.push(Happening::Resolved(handle, outcome))
        },
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::Factor;
  use crate::msg::{Code, Id, OptNumber, OptValue, Token};
  use crate::test::{dummy_endpoint, ClockMock, TransportMock};

  type TestCore = Core<ClockMock, TransportMock>;

  fn core() -> TestCore {
    let config = Config { ack_random_factor: Factor(100),
                          ..Config::default() };
    Core::new(config, ClockMock::new(), TransportMock::new()).unwrap()
  }

  fn peer() -> Endpoint {
    dummy_endpoint()
  }

  /*
   * Scenario: empty ping. Wire bytes out `40 00 12 34`,
   * RST `70 00 12 34` back, resolved failed, 0 retransmissions.
   */
  #[test]
  fn empty_ping() {
    let mut core = core();

    let handle = core.submit(peer(), Message::ping(Id(0x1234))).unwrap();
    assert_eq!(core.transport.sent(),
               vec![Addrd(vec![0x40, 0x00, 0x12, 0x34], peer())]);

    core.transport
        .push_inbound(Addrd(vec![0x70, 0x00, 0x12, 0x34], peer()));
    core.clock.set_millis(100);

    let happenings = core.poll().unwrap();
    assert!(matches!(happenings.as_slice(),
                     [Happening::Reply(h, _), Happening::Resolved(hh, Outcome::Failed)]
                     if *h == handle && *hh == handle));

    // exactly the one transmission
    assert_eq!(core.transport.sent().len(), 1);
    assert_eq!(core.resolution(handle), Some(Resolution::Failed));
  }

  /*
   * Scenario: simple GET with two Uri-Path segments; exact wire
   * bytes.
   */
  #[test]
  fn simple_get_wire_format() {
    let mut core = core();

    let mut req = Message::new(Type::Con,
                               Code::GET,
                               Id(1),
                               Token(tinyvec_token(&[0xA0])));
    req.add(crate::msg::num::URI_PATH, OptValue(b"hi".to_vec()));
    req.add(crate::msg::num::URI_PATH, OptValue(b"there".to_vec()));

    core.submit(peer(), req).unwrap();

    assert_eq!(core.transport.sent(),
               vec![Addrd(vec![0x41, 0x01, 0x00, 0x01, 0xA0, 0xB2, 0x68, 0x69, 0x05,
                               0x74, 0x68, 0x65, 0x72, 0x65],
                          peer())]);
  }

  fn tinyvec_token(bytes: &[u8]) -> tinyvec::ArrayVec<[u8; 8]> {
    bytes.iter().copied().collect()
  }

  #[test]
  fn inbound_request_is_delivered_once() {
    let mut core = core();
    let req = Message::new(Type::Con, Code::GET, Id(5), Token(Default::default()));
    let bytes = req.try_into_bytes().unwrap();

    core.transport.push_inbound(Addrd(bytes.clone(), peer()));
    let happenings = core.poll().unwrap();
    assert!(matches!(happenings.as_slice(),
                     [Happening::InboundRequest(Addrd(m, _))] if m.id == Id(5)));

    // answer it, then receive the duplicate
    let mut ack = Message::new(Type::Ack, Code::new(2, 5), Id(5), Token(Default::default()));
    ack.payload = crate::msg::Payload(b"hello".to_vec());
    core.submit(peer(), ack).unwrap();
    let ack_bytes = core.transport.sent().last().unwrap().clone();

    core.clock.set_millis(1_000);
    core.transport.push_inbound(Addrd(bytes, peer()));
    let happenings = core.poll().unwrap();

    // no new delivery, identical reply bytes replayed
    assert!(!happenings.iter()
                       .any(|h| matches!(h, Happening::InboundRequest(_))));
    assert_eq!(core.transport.sent().last().unwrap(), &ack_bytes);
  }

  /*
   * Scenario: CON carrying critical option 9, which nobody
   * recognizes. RST with the same Id goes back; nothing is
   * delivered upward.
   */
  #[test]
  fn unrecognized_critical_option_is_rst() {
    let mut core = core();

    let mut req = Message::new(Type::Con, Code::GET, Id(9), Token(Default::default()));
    req.add(OptNumber(9), OptValue(vec![1]));
    core.transport
        .push_inbound(Addrd(req.try_into_bytes().unwrap(), peer()));

    let happenings = core.poll().unwrap();
    assert!(happenings.is_empty());
    assert_eq!(core.transport.sent(),
               vec![Addrd(vec![0x70, 0x00, 0x00, 0x09], peer())]);
  }

  #[test]
  fn undecodable_con_is_rst_when_shell_is_known() {
    let mut core = core();

    // CON, code GET, id 7, then a reserved delta nibble
    core.transport
        .push_inbound(Addrd(vec![0x40, 0x01, 0x00, 0x07, 0xF1, 0x00], peer()));

    let happenings = core.poll().unwrap();
    assert!(happenings.is_empty());
    assert_eq!(core.transport.sent(),
               vec![Addrd(vec![0x70, 0x00, 0x00, 0x07], peer())]);

    // not even a shell: silence
    core.transport.push_inbound(Addrd(vec![0x40, 0x01], peer()));
    assert!(core.poll().unwrap().is_empty());
    assert_eq!(core.transport.sent().len(), 1);
  }

  #[test]
  fn transport_send_error_resolves_failed() {
    let mut core = core();
    core.transport.fail_sends.set(true);

    let handle = core.submit(peer(), Message::ping(Id(0x77))).unwrap();
    let happenings = std::mem::take(&mut core.pending);

    assert!(happenings.iter()
                      .any(|h| h == &Happening::Resolved(handle, Outcome::Failed)));
    assert_eq!(core.resolution(handle), Some(Resolution::Failed));
  }

  #[test]
  fn separate_response_matches_request_token() {
    let mut core = core();

    let token = Token(tinyvec_token(&[1, 2, 3]));
    let req = Message::new(Type::Con, Code::GET, Id(0), token);
    let handle = core.submit(peer(), req).unwrap();

    // peer ACKs, then responds in its own CON carrying our token
    core.transport
        .push_inbound(Addrd(vec![0x60, 0x00, 0x00, 0x01], peer()));
    core.poll().unwrap();

    let mut resp = Message::new(Type::Con, Code::new(2, 5), Id(0x0A0A), token);
    resp.payload = crate::msg::Payload(b"content".to_vec());
    core.transport
        .push_inbound(Addrd(resp.try_into_bytes().unwrap(), peer()));

    let happenings = core.poll().unwrap();
    assert!(happenings.iter().any(|h| {
             matches!(h,
                      Happening::InboundResponse(Addrd(m, _), Some(matched))
                      if m.id == Id(0x0A0A) && *matched == handle)
           }));
  }

  #[test]
  fn retransmissions_happen_through_poll() {
    let mut core = core();

    core.submit(peer(), Message::ping(Id(0x10))).unwrap();
    assert_eq!(core.transport.sent().len(), 1);

    core.clock.set_millis(1_999);
    core.poll().unwrap();
    assert_eq!(core.transport.sent().len(), 1);

    core.clock.set_millis(2_000);
    core.poll().unwrap();
    assert_eq!(core.transport.sent().len(), 2);

    // byte-identical
    let sent = core.transport.sent();
    assert_eq!(sent[0], sent[1]);
  }

  #[test]
  fn wakeup_is_earliest_across_peers() {
    let mut core = core();
    assert_eq!(core.next_wakeup_in().unwrap(), None);

    core.submit(peer(), Message::ping(Id(1))).unwrap();
    // τ₀ is 2s with factor 1.0
    assert_eq!(core.next_wakeup_in().unwrap(), Some(Milliseconds(2_000u64)));
  }

  #[test]
  fn bad_config_never_constructs() {
    let config = Config { nstart: 0,
                          ..Config::default() };
    assert!(Core::new(config, ClockMock::new(), TransportMock::new()).is_err());
  }
}
