use std::collections::BTreeMap;
use std::rc::Rc;

use embedded_time::Instant;

use crate::msg::{Id, Message, Type};
use crate::retry::RetryTimer;
use crate::time::{since, Clock, Millis};
use embedded_time::duration::Milliseconds;

/// The disposition of a sent message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
  /// No reply yet, not given up, not expired.
  Unresolved,
  /// Acknowledged, or quietly delivered (NON past its window).
  Succeeded,
  /// Reset by the peer, rejected by the transport, or given up on.
  Failed,
}

/// A terminal [`Resolution`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
  /// see [`Resolution::Succeeded`]
  Succeeded,
  /// see [`Resolution::Failed`]
  Failed,
}

impl From<Outcome> for Resolution {
  fn from(o: Outcome) -> Self {
    match o {
      | Outcome::Succeeded => Resolution::Succeeded,
      | Outcome::Failed => Resolution::Failed,
    }
  }
}

/// Everything we remember about a message we put on the wire.
///
/// The encoded bytes are kept (behind an [`Rc`], shared with any
/// reply cache that logged them) so retransmissions are
/// byte-identical to the first transmission.
#[derive(Debug, Clone)]
pub struct SentRecord<C: Clock> {
  /// The message itself
  pub msg: Message,
  /// Its wire bytes, exactly as first transmitted
  pub bytes: Rc<Vec<u8>>,
  /// When it was first handed to the transport
  pub first_tx: Instant<C>,
  /// Back-off state; `Some` only for confirmable messages
  pub timer: Option<RetryTimer<C>>,
  /// How long past `first_tx` the record stays interesting
  pub lifetime: Millis,
  /// see [`Resolution`]
  pub resolution: Resolution,
  /// The sender gave up on this transmission; retransmission has
  /// stopped but the record lives on so a late reply can still
  /// resolve it
  pub cancelled: bool,
}

impl<C: Clock> SentRecord<C> {
  /// Whether this record still counts toward the peer's in-flight
  /// interactions
  pub fn outstanding(&self) -> bool {
    self.resolution == Resolution::Unresolved
  }

  /// Whether the record's lifetime has fully elapsed
  pub fn expired(&self, now: Instant<C>) -> bool {
    since(now, self.first_tx) >= self.lifetime
  }

  /// The resolution an unresolved record reaches by expiring:
  /// failure for confirmable messages (nobody ever answered),
  /// success for everything else (nothing was owed to us).
  pub fn expiry_outcome(&self) -> Outcome {
    match self.ty() {
      | Type::Con => Outcome::Failed,
      | _ => Outcome::Succeeded,
    }
  }

  /// Message type shorthand
  pub fn ty(&self) -> Type {
    self.msg.ty
  }
}

/// The per-peer cache of messages we sent, keyed by [`Id`].
///
/// Doubles as the Message ID allocator for the peer: fresh IDs are
/// handed out monotonically (wrapping), skipping any ID whose
/// record is still live.
#[derive(Debug, Clone, Default)]
pub struct SentCache<C: Clock> {
  entries: BTreeMap<Id, SentRecord<C>>,
  next: u16,
}

impl<C: Clock> SentCache<C> {
  /// An empty cache
  pub fn new() -> Self {
    SentCache { entries: BTreeMap::new(),
                next: 0 }
  }

  /// Whether `id` may not be reused yet
  pub fn is_live(&self, id: Id) -> bool {
    self.entries.contains_key(&id)
  }

  /// Allocate a Message ID that is not live.
  ///
  /// `Id(0)` is never handed out; submission treats it as "assign
  /// me one". `None` only when every other ID is live, which a
  /// conforming peer can never cause (entries expire after one
  /// exchange lifetime).
  pub fn next_id(&mut self) -> Option<Id> {
    for _ in 0..=u16::MAX {
      let candidate = Id(self.next);
      self.next = self.next.wrapping_add(1);

      if candidate != Id(0) && !self.is_live(candidate) {
        return Some(candidate);
      }
    }

    None
  }

  /// Store a record under its message's Id
  pub fn insert(&mut self, record: SentRecord<C>) {
    self.entries.insert(record.msg.id, record);
  }

  /// Borrow the record for `id`
  pub fn get(&self, id: Id) -> Option<&SentRecord<C>> {
    self.entries.get(&id)
  }

  /// Mutably borrow the record for `id`
  pub fn get_mut(&mut self, id: Id) -> Option<&mut SentRecord<C>> {
    self.entries.get_mut(&id)
  }

  /// Iterate all records
  pub fn iter(&self) -> impl Iterator<Item = (&Id, &SentRecord<C>)> {
    self.entries.iter()
  }

  /// Mutably iterate all records
  pub fn iter_mut(&mut self) -> impl Iterator<Item = (&Id, &mut SentRecord<C>)> {
    self.entries.iter_mut()
  }

  /// Remove and yield every record whose lifetime has elapsed
  pub fn reap(&mut self, now: Instant<C>) -> Vec<SentRecord<C>> {
    let expired: Vec<Id> = self.entries
                               .iter()
                               .filter(|(_, rec)| rec.expired(now))
                               .map(|(id, _)| *id)
                               .collect();

    expired.into_iter()
           .filter_map(|id| self.entries.remove(&id))
           .collect()
  }

  /// Milliseconds until something in this cache needs attention:
  /// the earliest of any record's next back-off deadline or expiry.
  pub fn next_deadline_in(&self, now: Instant<C>) -> Option<Millis> {
    self.entries
        .values()
        .flat_map(|rec| {
          let expiry = Milliseconds(rec.lifetime
                                 .0
                                 .saturating_sub(since(now, rec.first_tx).0));
          let fire = rec.timer
                        .filter(|_| rec.outstanding() && !rec.cancelled)
                        .map(|t| t.next_fire_in(now));
          core::iter::once(expiry).chain(fire)
        })
        .min()
  }

  /// Number of live records
  pub fn len(&self) -> usize {
    self.entries.len()
  }

  /// Whether the cache is empty
  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

/// Everything we remember about a message a peer sent us: enough to
/// recognize a retransmission and answer it the same way twice.
#[derive(Debug, Clone)]
pub struct ReceivedRecord<C: Clock> {
  /// When the first copy arrived
  pub received_at: Instant<C>,
  /// The reply we sent, verbatim, if we replied
  pub cached_reply: Option<Rc<Vec<u8>>>,
  /// How long past `received_at` duplicates are recognized
  pub lifetime: Millis,
}

impl<C: Clock> ReceivedRecord<C> {
  /// Whether the record's lifetime has fully elapsed
  pub fn expired(&self, now: Instant<C>) -> bool {
    since(now, self.received_at) >= self.lifetime
  }
}

/// The per-peer cache of Message IDs a peer has used toward us.
///
/// Replies (ACK/RST) are never recorded here; they carry the Id of
/// the message they answer, in *our* Id space.
#[derive(Debug, Clone, Default)]
pub struct ReceivedCache<C: Clock> {
  entries: BTreeMap<Id, ReceivedRecord<C>>,
}

impl<C: Clock> ReceivedCache<C> {
  /// An empty cache
  pub fn new() -> Self {
    ReceivedCache { entries: BTreeMap::new() }
  }

  /// Borrow the record for `id`
  pub fn get(&self, id: Id) -> Option<&ReceivedRecord<C>> {
    self.entries.get(&id)
  }

  /// Mutably borrow the record for `id`
  pub fn get_mut(&mut self, id: Id) -> Option<&mut ReceivedRecord<C>> {
    self.entries.get_mut(&id)
  }

  /// Store a record for `id`
  pub fn insert(&mut self, id: Id, record: ReceivedRecord<C>) {
    self.entries.insert(id, record);
  }

  /// Drop every record whose lifetime has elapsed
  pub fn prune(&mut self, now: Instant<C>) {
    self.entries.retain(|_, rec| !rec.expired(now));
  }

  /// Milliseconds until the earliest record expires
  pub fn next_deadline_in(&self, now: Instant<C>) -> Option<Millis> {
    self.entries
        .values()
        .map(|rec| {
          Milliseconds(rec.lifetime
                    .0
                    .saturating_sub(since(now, rec.received_at).0))
        })
        .min()
  }

  /// Number of remembered Ids
  pub fn len(&self) -> usize {
    self.entries.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test::ClockMock;

  fn record(id: u16, at: u64, lifetime: u64) -> SentRecord<ClockMock> {
    use crate::msg::{Code, Token};

    let msg = Message::new(Type::Con, Code::GET, Id(id), Token(Default::default()));
    let bytes = Rc::new(msg.try_into_bytes().unwrap());
    SentRecord { msg,
                 bytes,
                 first_tx: ClockMock::instant_millis(at),
                 timer: None,
                 lifetime: Milliseconds(lifetime),
                 resolution: Resolution::Unresolved,
                 cancelled: false }
  }

  #[test]
  fn ids_are_monotonic_and_skip_live_entries() {
    let mut cache = SentCache::<ClockMock>::new();

    assert_eq!(cache.next_id(), Some(Id(1)));
    assert_eq!(cache.next_id(), Some(Id(2)));

    cache.insert(record(3, 0, 1_000));
    assert_eq!(cache.next_id(), Some(Id(4)));
  }

  #[test]
  fn ids_wrap_around_skipping_zero() {
    let mut cache = SentCache::<ClockMock>::new();
    cache.next = u16::MAX;

    assert_eq!(cache.next_id(), Some(Id(u16::MAX)));
    assert_eq!(cache.next_id(), Some(Id(1)));
  }

  #[test]
  fn reap_removes_only_expired() {
    let mut cache = SentCache::<ClockMock>::new();
    cache.insert(record(1, 0, 1_000));
    cache.insert(record(2, 0, 5_000));

    let reaped = cache.reap(ClockMock::instant_millis(1_000));
    assert_eq!(reaped.len(), 1);
    assert_eq!(reaped[0].msg.id, Id(1));
    assert!(cache.get(Id(2)).is_some());
  }

  #[test]
  fn expiry_outcomes() {
    let con = record(1, 0, 1_000);
    assert_eq!(con.expiry_outcome(), Outcome::Failed);

    let mut non = record(2, 0, 1_000);
    non.msg.ty = Type::Non;
    assert_eq!(non.expiry_outcome(), Outcome::Succeeded);
  }

  #[test]
  fn deadlines() {
    let mut cache = SentCache::<ClockMock>::new();
    assert_eq!(cache.next_deadline_in(ClockMock::instant_millis(0)), None);

    cache.insert(record(1, 0, 5_000));
    cache.insert(record(2, 0, 3_000));
    assert_eq!(cache.next_deadline_in(ClockMock::instant_millis(1_000)),
               Some(Milliseconds(2_000)));
  }

  #[test]
  fn received_cache_prunes() {
    let mut cache = ReceivedCache::<ClockMock>::new();
    cache.insert(Id(5),
                 ReceivedRecord { received_at: ClockMock::instant_millis(0),
                                  cached_reply: None,
                                  lifetime: Milliseconds(1_000) });

    cache.prune(ClockMock::instant_millis(999));
    assert!(cache.get(Id(5)).is_some());

    cache.prune(ClockMock::instant_millis(1_000));
    assert!(cache.get(Id(5)).is_none());
  }
}
