use std::collections::VecDeque;
use std::rc::Rc;

use embedded_time::Instant;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::cache::{Outcome, ReceivedCache, ReceivedRecord, Resolution, SentCache, SentRecord};
use crate::config::{BytesPerSecond, Config, InvalidConfig};
use crate::msg::{CodeKind, Id, Message, MessageEncodeError, Type};
use crate::net::{Addrd, Endpoint};
use crate::retry::{RetryTimer, YouShould};
use crate::time::{since, Clock, Millis};
use embedded_time::duration::Milliseconds;

/// A weak reference to a transmission: the peer it went to and the
/// Message ID it went out under.
///
/// Handles stay valid as names even after the record behind them
/// expires; consulting one then simply finds nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SendHandle {
  /// The remote endpoint
  pub peer: Endpoint,
  /// The Message ID of the transmission
  pub id: Id,
}

/// Something the state machine wants done, emitted in the order it
/// wants it done.
///
/// The state machine never touches the transport or the upper layer
/// itself; the event loop drains these.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
  /// Hand these bytes to the transport (first transmission of a
  /// submitted message).
  Transmit(SendHandle, Addrd<Rc<Vec<u8>>>),
  /// Hand these bytes to the transport again (back-off refire);
  /// byte-identical to the original transmission.
  Retransmit(SendHandle, Addrd<Rc<Vec<u8>>>),
  /// Hand these bytes to the transport (an ACK/RST we generated or
  /// are replaying for a duplicate).
  SendReply(Addrd<Rc<Vec<u8>>>),
  /// Give this inbound message to the upper layer.
  Deliver(Addrd<Message>),
  /// An ACK/RST arrived for an outstanding transmission. Always
  /// emitted before the matching [`Effect::Resolved`].
  ReplyReceived(SendHandle, Message),
  /// A transmission reached its terminal disposition.
  Resolved(SendHandle, Outcome),
}

/// Why a submission was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
  /// The message named a Message ID that is still reserved by an
  /// earlier transmission to this peer
  MidStillLive(Id),
  /// No free Message ID exists for this peer
  MidSpaceExhausted,
  /// The message would not serialize
  Encode(MessageEncodeError),
}

/// Why a cancellation was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelError {
  /// No queued or recorded transmission has this Id
  UnknownHandle,
  /// The transmission already resolved
  AlreadyResolved,
  /// The final retransmission already happened; there is nothing
  /// left to stop
  RetransmitsExhausted,
}

/// PROBING_RATE bookkeeping: bytes sent toward a quiet peer since
/// the window opened.
#[derive(Debug, Clone, Copy)]
struct ProbingWindow<C: Clock> {
  start: Option<Instant<C>>,
  bytes: u64,
}

impl<C: Clock> ProbingWindow<C> {
  fn fresh() -> Self {
    ProbingWindow { start: None,
                    bytes: 0 }
  }

  /// Whether `nbytes` more fit under the budget
  /// `PROBING_RATE × elapsed`.
  ///
  /// The first send into a fresh window is always allowed; it is
  /// the probe the budget exists to pace.
  fn allows(&mut self, now: Instant<C>, rate: BytesPerSecond, nbytes: usize) -> bool {
    match self.start {
      | None => {
        self.start = Some(now);
        true
      },
      | Some(start) => {
        let budget = rate.0 as u64 * since(now, start).0 / 1_000;
        self.bytes + nbytes as u64 <= budget
      },
    }
  }

  /// Milliseconds until the budget will cover `nbytes` more
  fn covered_in(&self, now: Instant<C>, rate: BytesPerSecond, nbytes: usize) -> Millis {
    match self.start {
      | None => Milliseconds(0),
      | Some(start) => {
        let needed_ms = (self.bytes + nbytes as u64) * 1_000 / rate.0 as u64;
        Milliseconds(needed_ms.saturating_sub(since(now, start).0))
      },
    }
  }
}

/// The message-layer state for one remote endpoint: what we sent
/// it, what it sent us, and how much more we are allowed to say.
///
/// One `EndpointState` exists per distinct [`Endpoint`]; it owns
/// both Message ID caches outright. Events come in as method calls,
/// consequences come out as [`Effect`]s pushed onto the caller's
/// buffer, strictly in order.
#[derive(Debug)]
pub struct EndpointState<C: Clock> {
  peer: Endpoint,
  config: Config,
  sent: SentCache<C>,
  recvd: ReceivedCache<C>,
  queued: VecDeque<Message>,
  window: ProbingWindow<C>,
  responsive: bool,
  last_heard: Option<Instant<C>>,
  rand: ChaCha8Rng,
}

impl<C: Clock> EndpointState<C> {
  /// State for a peer we have not talked to yet.
  ///
  /// The config is validated here and copied in; nothing mutates it
  /// afterwards.
  pub fn new(peer: Endpoint, config: Config, seed: u64) -> Result<Self, InvalidConfig> {
    Ok(Self { peer,
              config: config.checked()?,
              sent: SentCache::new(),
              recvd: ReceivedCache::new(),
              queued: VecDeque::new(),
              window: ProbingWindow::fresh(),
              responsive: false,
              last_heard: None,
              rand: ChaCha8Rng::seed_from_u64(seed) })
  }

  /// The endpoint this state belongs to
  pub fn peer(&self) -> Endpoint {
    self.peer
  }

  /// Whether the peer has answered us recently
  pub fn responsive(&self) -> bool {
    self.responsive
  }

  /// Transmissions and exchanges currently in flight toward this
  /// peer; compared against NSTART before anything new goes out.
  pub fn outstanding_interactions(&self) -> usize {
    self.sent.iter().filter(|(_, rec)| rec.outstanding()).count()
  }

  /// The current resolution of a transmission, or `None` once (or
  /// before) the record exists.
  pub fn resolution(&self, id: Id) -> Option<Resolution> {
    if self.queued.iter().any(|m| m.id == id) {
      return Some(Resolution::Unresolved);
    }
    self.sent.get(id).map(|rec| rec.resolution)
  }

  /// Best-effort pairing of a separate response with the request
  /// that caused it, by token.
  ///
  /// Proper request/response matching belongs to the exchange
  /// layer; this only consults what the message layer happens to
  /// remember.
  pub fn find_by_token(&self, token: crate::msg::Token) -> Option<SendHandle> {
    self.sent
        .iter()
        .find(|(_, rec)| {
          rec.msg.token == token && rec.msg.code.kind() == CodeKind::Request
        })
        .map(|(id, _)| self.handle(*id))
  }

  fn handle(&self, id: Id) -> SendHandle {
    SendHandle { peer: self.peer,
                 id }
  }

  /// NSTART applies to CONs and to NON requests; ACK, RST and NON
  /// responses ride along without occupying a slot.
  fn gated(msg: &Message) -> bool {
    msg.ty == Type::Con || (msg.ty == Type::Non && msg.code.kind() == CodeKind::Request)
  }

  fn fresh_id(&mut self) -> Option<Id> {
    for _ in 0..=u16::MAX as u32 {
      let id = self.sent.next_id()?;
      if !self.queued.iter().any(|m| m.id == id) {
        return Some(id);
      }
    }

    None
  }

  /// Event: the upper layer wants `msg` sent to this peer.
  ///
  /// A message with `Id(0)` gets a fresh Message ID assigned.
  /// Congestion rules may park the message in a queue instead of
  /// transmitting immediately; the returned handle is valid either
  /// way.
  pub fn submit(&mut self,
                mut msg: Message,
                now: Instant<C>,
                effects: &mut Vec<Effect>)
                -> Result<SendHandle, SubmitError> {
    if msg.ty == Type::Ack || msg.ty == Type::Reset {
      return self.submit_reply(msg, now, effects);
    }

    msg.id = if msg.id == Id(0) {
      self.fresh_id().ok_or(SubmitError::MidSpaceExhausted)?
    } else if self.sent.is_live(msg.id) || self.queued.iter().any(|m| m.id == msg.id) {
      return Err(SubmitError::MidStillLive(msg.id));
    } else {
      msg.id
    };

    let handle = self.handle(msg.id);
    let bytes = Rc::new(msg.try_into_bytes().map_err(SubmitError::Encode)?);

    if self.may_transmit(&msg, bytes.len(), now) {
      self.transmit(msg, bytes, now, effects);
    } else {
      log::debug!("{:?} to {:?} queued behind congestion limits",
                  msg.id,
                  self.peer.addr);
      self.queued.push_back(msg);
    }

    Ok(handle)
  }

  /// ACKs and RSTs answer a message the peer sent; they carry the
  /// peer's Id, never occupy an NSTART slot, and resolve the moment
  /// they hit the wire.
  fn submit_reply(&mut self,
                  msg: Message,
                  now: Instant<C>,
                  effects: &mut Vec<Effect>)
                  -> Result<SendHandle, SubmitError> {
    let handle = self.handle(msg.id);
    let bytes = Rc::new(msg.try_into_bytes().map_err(SubmitError::Encode)?);

    if let Some(rec) = self.recvd.get_mut(msg.id) {
      rec.cached_reply = Some(Rc::clone(&bytes));
    }

    self.account_tx(bytes.len(), now);
    effects.push(Effect::SendReply(Addrd(bytes, self.peer)));
    effects.push(Effect::Resolved(handle, Outcome::Succeeded));

    Ok(handle)
  }

  fn may_transmit(&mut self, msg: &Message, nbytes: usize, now: Instant<C>) -> bool {
    if Self::gated(msg) && self.outstanding_interactions() >= self.config.nstart as usize {
      return false;
    }

    if !self.responsive
       && !self.window.allows(now, self.config.probing_rate, nbytes)
    {
      return false;
    }

    true
  }

  fn account_tx(&mut self, nbytes: usize, now: Instant<C>) {
    if !self.responsive {
      if self.window.start.is_none() {
        self.window.start = Some(now);
      }
      self.window.bytes += nbytes as u64;
    }
  }

  fn transmit(&mut self,
              msg: Message,
              bytes: Rc<Vec<u8>>,
              now: Instant<C>,
              effects: &mut Vec<Effect>) {
    let handle = self.handle(msg.id);

    let timer = match msg.ty {
      | Type::Con => {
        Some(RetryTimer::new(now,
                             self.config.ack_timeout,
                             self.config
                                 .ack_random_factor
                                 .apply(self.config.ack_timeout),
                             self.config.max_retransmit,
                             self.config.max_transmit_wait(),
                             &mut self.rand))
      },
      | _ => None,
    };

    let lifetime = match (msg.ty, msg.code.kind()) {
      | (Type::Con, CodeKind::Request) => self.config.exchange_lifetime(),
      | (Type::Con, _) => self.config.max_transmit_wait(),
      | (_, CodeKind::Request) => self.config.non_lifetime(),
      | _ => self.config.non_request_window(),
    };

    log::debug!("-> {:?} {:?} to {:?} ({} bytes)",
                msg.ty,
                msg.id,
                self.peer.addr,
                bytes.len());

    self.account_tx(bytes.len(), now);
    self.sent.insert(SentRecord { msg,
                                  bytes: Rc::clone(&bytes),
                                  first_tx: now,
                                  timer,
                                  lifetime,
                                  resolution: Resolution::Unresolved,
                                  cancelled: false });

    effects.push(Effect::Transmit(handle, Addrd(bytes, self.peer)));
  }

  /// Event: a decoded, validated message arrived from this peer.
  pub fn on_recv(&mut self, msg: Message, now: Instant<C>, effects: &mut Vec<Effect>) {
    match msg.ty {
      | Type::Ack | Type::Reset => self.on_reply(msg, now, effects),
      | Type::Con | Type::Non => self.on_inbound(msg, now, effects),
    }
  }

  fn on_reply(&mut self, msg: Message, now: Instant<C>, effects: &mut Vec<Effect>) {
    let outcome = match msg.ty {
      | Type::Ack => Outcome::Succeeded,
      | _ => Outcome::Failed,
    };

    match self.sent.get_mut(msg.id) {
      | Some(rec) if rec.outstanding() => {
        if let Some(timer) = rec.timer.as_mut() {
          timer.halt();
        }
        rec.resolution = outcome.into();
      },
      | Some(_) => {
        log::trace!("extra reply for {:?}, already resolved", msg.id);
        return;
      },
      | None => {
        log::warn!("reply {:?} {:?} matches no outstanding transmission; dropped",
                   msg.ty,
                   msg.id);
        return;
      },
    }

    self.responsive = true;
    self.last_heard = Some(now);

    let handle = self.handle(msg.id);
    effects.push(Effect::ReplyReceived(handle, msg));
    effects.push(Effect::Resolved(handle, outcome));

    self.flush_queue(now, effects);
  }

  fn on_inbound(&mut self, msg: Message, now: Instant<C>, effects: &mut Vec<Effect>) {
    if let Some(rec) = self.recvd.get(msg.id) {
      match &rec.cached_reply {
        | Some(bytes) => {
          log::debug!("duplicate {:?} from {:?}; replaying reply",
                      msg.id,
                      self.peer.addr);
          effects.push(Effect::SendReply(Addrd(Rc::clone(bytes), self.peer)));
        },
        | None => {
          log::debug!("duplicate {:?} from {:?}; dropped", msg.id, self.peer.addr);
        },
      }
      return;
    }

    let lifetime = match msg.ty {
      | Type::Con => self.config.exchange_lifetime(),
      | _ => self.config.non_lifetime(),
    };
    self.recvd.insert(msg.id,
                      ReceivedRecord { received_at: now,
                                       cached_reply: None,
                                       lifetime });

    if msg.code.kind() == CodeKind::Empty {
      match msg.ty {
        // empty CON is a ping; answer RST, deliver nothing
        | Type::Con => self.reject(msg.id, now, effects),
        | _ => log::debug!("empty {:?} {:?}; dropped", msg.ty, msg.id),
      }
      return;
    }

    effects.push(Effect::Deliver(Addrd(msg, self.peer)));
  }

  /// Event: an inbound message with this Id was unacceptable
  /// (unrecognized critical option, malformed body past the header,
  /// bad shape) and must be answered with RST instead of delivered.
  ///
  /// The RST is cached so retransmissions of the bad message get
  /// the identical rejection.
  pub fn reject(&mut self, id: Id, now: Instant<C>, effects: &mut Vec<Effect>) {
    if let Some(rec) = self.recvd.get(id) {
      if let Some(bytes) = &rec.cached_reply {
        effects.push(Effect::SendReply(Addrd(Rc::clone(bytes), self.peer)));
        return;
      }
    }

    let rst = Message::new(Type::Reset,
                           crate::msg::Code::EMPTY,
                           id,
                           crate::msg::Token::default());
    let bytes = match rst.try_into_bytes() {
      | Ok(bytes) => Rc::new(bytes),
      // an empty RST always serializes; nothing sane to do if not
      | Err(_) => return,
    };

    log::debug!("rejecting {:?} from {:?} with RST", id, self.peer.addr);

    if self.recvd.get(id).is_none() {
      self.recvd.insert(id,
                        ReceivedRecord { received_at: now,
                                         cached_reply: None,
                                         lifetime: self.config.exchange_lifetime() });
    }
    if let Some(rec) = self.recvd.get_mut(id) {
      rec.cached_reply = Some(Rc::clone(&bytes));
    }

    self.account_tx(bytes.len(), now);
    effects.push(Effect::SendReply(Addrd(bytes, self.peer)));
  }

  /// Event: the upper layer declared a transmission's fate itself
  /// (e.g. a matching response arrived through the exchange layer).
  ///
  /// Stops any retransmission immediately, but the record stays in
  /// the cache until its normal expiry so duplicates keep being
  /// recognized.
  pub fn upper_resolution(&mut self,
                          id: Id,
                          outcome: Outcome,
                          now: Instant<C>,
                          effects: &mut Vec<Effect>) {
    match self.sent.get_mut(id) {
      | Some(rec) if rec.outstanding() => {
        if let Some(timer) = rec.timer.as_mut() {
          timer.halt();
        }
        rec.resolution = outcome.into();
      },
      | _ => return,
    }

    if outcome == Outcome::Succeeded {
      self.responsive = true;
      self.last_heard = Some(now);
    }

    effects.push(Effect::Resolved(self.handle(id), outcome));
    self.flush_queue(now, effects);
  }

  /// Event: the sender does not want this transmission anymore.
  ///
  /// A still-queued message is dropped outright. One already on the
  /// wire merely stops retransmitting; its record stays until
  /// normal expiry so a late reply can still resolve it.
  pub fn cancel(&mut self, id: Id) -> Result<(), CancelError> {
    if let Some(ix) = self.queued.iter().position(|m| m.id == id) {
      self.queued.remove(ix);
      log::debug!("{:?} cancelled before first transmission", id);
      return Ok(());
    }

    let rec = self.sent.get_mut(id).ok_or(CancelError::UnknownHandle)?;

    if !rec.outstanding() {
      return Err(CancelError::AlreadyResolved);
    }

    match rec.timer.as_mut() {
      | Some(timer) if timer.exhausted() => Err(CancelError::RetransmitsExhausted),
      | Some(timer) => {
        timer.halt();
        rec.cancelled = true;
        Ok(())
      },
      | None => {
        rec.cancelled = true;
        Ok(())
      },
    }
  }

  /// Event: time passed. Fires back-off timers, reaps expired
  /// records, decays responsiveness, and un-queues whatever the
  /// congestion rules now allow.
  pub fn tick(&mut self, now: Instant<C>, effects: &mut Vec<Effect>) {
    self.recvd.prune(now);

    if self.responsive {
      let quiet_for = self.last_heard.map(|at| since(now, at));
      if quiet_for.map(|Milliseconds(ms)| ms >= self.config.quiet_period().0)
                  .unwrap_or(true)
      {
        log::debug!("{:?} quiet too long; probing rate applies again",
                    self.peer.addr);
        self.responsive = false;
        self.window = ProbingWindow::fresh();
      }
    }

    let peer = self.peer;
    let mut gave_up: Vec<Id> = Vec::new();
    let mut retransmitted: u64 = 0;

    for (id, rec) in self.sent.iter_mut() {
      if !rec.outstanding() {
        continue;
      }

      let timer = match rec.timer.as_mut() {
        | Some(timer) => timer,
        | None => continue,
      };

      match timer.what_should_i_do(now) {
        | Ok(YouShould::Retransmit) => {
          log::debug!("re-> {:?} to {:?} (attempt {:?})",
                      id,
                      peer.addr,
                      timer.attempts());
          retransmitted += rec.bytes.len() as u64;
          effects.push(Effect::Retransmit(SendHandle { peer, id: *id },
                                          Addrd(Rc::clone(&rec.bytes), peer)));
        },
        | Ok(YouShould::GiveUp) => {
          rec.resolution = Resolution::Failed;
          gave_up.push(*id);
        },
        | Err(nb::Error::WouldBlock) => (),
      }
    }

    if retransmitted > 0 && !self.responsive {
      if self.window.start.is_none() {
        self.window.start = Some(now);
      }
      self.window.bytes += retransmitted;
    }

    for id in gave_up {
      log::debug!("gave up on {:?} to {:?}", id, self.peer.addr);
      effects.push(Effect::Resolved(self.handle(id), Outcome::Failed));
    }

    for rec in self.sent.reap(now) {
      if rec.outstanding() {
        effects.push(Effect::Resolved(self.handle(rec.msg.id), rec.expiry_outcome()));
      }
    }

    self.flush_queue(now, effects);
  }

  fn flush_queue(&mut self, now: Instant<C>, effects: &mut Vec<Effect>) {
    loop {
      let msg = match self.queued.front() {
        | Some(msg) => msg.clone(),
        | None => return,
      };

      if !self.may_transmit(&msg, msg.encoded_len(), now) {
        return;
      }

      self.queued.pop_front();

      match msg.try_into_bytes() {
        | Ok(bytes) => self.transmit(msg, Rc::new(bytes), now, effects),
        | Err(e) => {
          log::warn!("queued {:?} no longer serializes: {:?}; dropped", msg.id, e)
        },
      }
    }
  }

  /// Milliseconds until this peer next needs attention, if
  /// anything is pending at all.
  pub fn next_wakeup_in(&self, now: Instant<C>) -> Option<Millis> {
    let sent = self.sent.next_deadline_in(now);
    let recvd = self.recvd.next_deadline_in(now);

    let quiet = match (self.responsive, self.last_heard) {
      | (true, Some(at)) => {
        Some(Milliseconds(self.config
                        .quiet_period()
                        .0
                        .saturating_sub(since(now, at).0)))
      },
      | _ => None,
    };

    let probing = self.queued
                      .front()
                      .filter(|_| !self.responsive)
                      .filter(|msg| {
                        // NSTART-blocked sends wake up on resolution, not time
                        !Self::gated(msg)
                        || self.outstanding_interactions() < self.config.nstart as usize
                      })
                      .map(|msg| {
                        self.window
                            .covered_in(now, self.config.probing_rate, msg.encoded_len())
                      });

    [sent, recvd, quiet, probing].into_iter().flatten().min()
  }
}
