use core::convert::Infallible;

use embedded_time::Instant;
use rand::Rng;

use crate::time::{since, Clock, Millis};
use embedded_time::duration::Milliseconds;

/// A number of transmissions
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Attempts(pub u16);

/// Result of [`RetryTimer::what_should_i_do`].
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum YouShould {
  /// The message should be put on the wire again, byte-identical.
  Retransmit,
  /// Attempts and patience are both exhausted; the transmission
  /// should be resolved as failed.
  GiveUp,
}

/// Binary exponential back-off state for one confirmable message.
///
/// The schedule is fixed at creation: an initial timeout `τ₀` is
/// sampled uniformly from `[init_min, init_max]`, and every
/// retransmission doubles it. A message is put on the wire at most
/// `1 + MAX_RETRANSMIT` times; after the last retransmission the
/// timer idles until `max_wait` past the first transmission, then
/// tells the caller to give up.
///
/// The timer does not _contain_ the work to be done; it lives
/// alongside the stored message bytes and answers "what now?" when
/// polled (returning [`nb::Error::WouldBlock`] between deadlines).
#[derive(Debug)]
pub struct RetryTimer<C: Clock> {
  start: Instant<C>,
  init: Millis,
  attempts: Attempts,
  max_attempts: Attempts,
  max_wait: Millis,
  halted: bool,
}

impl<C: Clock> Copy for RetryTimer<C> {}
impl<C: Clock> Clone for RetryTimer<C> {
  fn clone(&self) -> Self {
    *self
  }
}

impl<C: Clock> RetryTimer<C> {
  /// Create a new retry timer for a message first transmitted at
  /// `start`.
  ///
  /// `max_retransmit` counts retransmissions, so the message may hit
  /// the wire `1 + max_retransmit` times in total.
  pub fn new<R: Rng>(start: Instant<C>,
                     init_min: Millis,
                     init_max: Millis,
                     max_retransmit: Attempts,
                     max_wait: Millis,
                     rand: &mut R)
                     -> Self {
    let init = if init_min == init_max {
      init_min
    } else {
      Milliseconds(rand.gen_range(init_min.0..=init_max.0))
    };

    Self { start,
           init,
           attempts: Attempts(1),
           max_attempts: Attempts(1 + max_retransmit.0),
           max_wait,
           halted: false }
  }

  /// Ask the timer what to do now.
  ///
  /// Returns `WouldBlock` when the next deadline has not yet
  /// arrived, [`YouShould::Retransmit`] while transmissions remain,
  /// and [`YouShould::GiveUp`] once `max_wait` has elapsed with
  /// nothing left to try.
  pub fn what_should_i_do(&mut self,
                          now: Instant<C>)
                          -> nb::Result<YouShould, Infallible> {
    let Milliseconds(elapsed) = since(now, self.start);

    if !self.halted && self.attempts < self.max_attempts {
      if elapsed >= Self::total_delay(self.init, self.attempts.0) {
        self.attempts.0 += 1;
        Ok(YouShould::Retransmit)
      } else {
        Err(nb::Error::WouldBlock)
      }
    } else if elapsed >= self.max_wait.0 {
      Ok(YouShould::GiveUp)
    } else {
      Err(nb::Error::WouldBlock)
    }
  }

  /// Stop retransmitting without resolving.
  ///
  /// Used when the sender cancels mid-flight: the record stays
  /// alive (a late reply can still resolve it) but the wire goes
  /// quiet, and the timer's only remaining answer is
  /// [`YouShould::GiveUp`] at `max_wait`.
  pub fn halt(&mut self) {
    self.halted = true;
  }

  /// Whether [`RetryTimer::halt`] was called
  pub fn halted(&self) -> bool {
    self.halted
  }

  /// Whether every allowed transmission has been performed
  pub fn exhausted(&self) -> bool {
    self.attempts >= self.max_attempts
  }

  /// How many times the message has been handed to the transport
  pub fn attempts(&self) -> Attempts {
    self.attempts
  }

  /// Milliseconds until this timer next wants to be polled
  /// (zero when a deadline is already due).
  pub fn next_fire_in(&self, now: Instant<C>) -> Millis {
    let Milliseconds(elapsed) = since(now, self.start);

    let due = if !self.halted && self.attempts < self.max_attempts {
      Self::total_delay(self.init, self.attempts.0)
    } else {
      self.max_wait.0
    };

    Milliseconds(due.saturating_sub(elapsed))
  }

  /// Given the initial timeout and the number of transmissions
  /// performed, the total time after `start` at which the next
  /// retransmission is due.
  const fn total_delay(Milliseconds(init): Millis, attempts: u16) -> u64 {
    // | attempts so far | next retransmission due at |
    // | 1               | τ₀                         |
    // | 2               | 3·τ₀                       |
    // | 3               | 7·τ₀                       |
    // | n               | (2^n - 1)·τ₀               |
    ((1u64 << attempts as u32) - 1) * init
  }
}
