use crate::retry::Attempts;
use crate::time::Millis;
use embedded_time::duration::Milliseconds;

/// Bytes / Second
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BytesPerSecond(pub u16);

/// A unitless multiplier stored in hundredths, so that the
/// protocol's `ACK_RANDOM_FACTOR = 1.5` is `Factor(150)`.
///
/// Keeping the factor integral keeps every timing computation in
/// integer milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Factor(pub u16);

impl Factor {
  /// Multiply a duration by this factor
  ///
  /// ```
  /// use newt::config::Factor;
  /// use embedded_time::duration::Milliseconds;
  ///
  /// assert_eq!(Factor(150).apply(Milliseconds(2_000)), Milliseconds(3_000));
  /// ```
  pub fn apply(&self, Milliseconds(ms): Millis) -> Millis {
    Milliseconds(ms * self.0 as u64 / 100)
  }
}

/// A parameter set that failed validation; fatal to startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidConfig {
  /// `ack_random_factor` must be at least 1.0 (`Factor(100)`)
  AckRandomFactorBelowOne(Factor),
  /// `nstart` must allow at least one in-flight interaction
  NstartZero,
  /// `probing_rate` must allow at least one byte per second
  ProbingRateZero,
  /// The worst-case back-off span for a confirmable message would
  /// outlive the (overridden) `max_transmit_wait`
  #[allow(missing_docs)]
  BeboExceedsMaxTransmitWait { span: Millis, max_wait: Millis },
}

/// Overrides for the derived transmission parameters.
///
/// The four derived durations follow from the base parameters by
/// the protocol's formulas; deployments that know their network
/// better may pin any of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Overrides {
  /// Pin `MAX_TRANSMIT_SPAN`
  pub max_transmit_span: Option<Millis>,
  /// Pin `MAX_TRANSMIT_WAIT`
  pub max_transmit_wait: Option<Millis>,
  /// Pin `EXCHANGE_LIFETIME`
  pub exchange_lifetime: Option<Millis>,
  /// Pin `NON_LIFETIME`
  pub non_lifetime: Option<Millis>,
}

/// The transmission parameters of RFC 7252 §4.8.
///
/// A `Config` is copied into each
/// [`EndpointState`](crate::state::EndpointState) at construction;
/// there is no process-global mutable record, and nothing re-reads
/// the parameters mid-event.
///
/// Construct with struct-update syntax off [`Config::default`],
/// then let [`Config::checked`] reject nonsense:
///
/// ```
/// use newt::config::{Config, Factor};
/// use embedded_time::duration::Milliseconds;
///
/// let cfg = Config { ack_timeout: Milliseconds(3_000),
///                    ack_random_factor: Factor(120),
///                    ..Config::default() }.checked()
///                                         .unwrap();
/// assert_eq!(cfg.max_transmit_wait(), Milliseconds(3_000 * 31 * 120 / 100));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
  /// Initial CON retransmission timeout lower bound.
  ///
  /// Defaults to 2 seconds.
  ///
  /// ```
  /// use newt::config::Config;
  /// use embedded_time::duration::Milliseconds;
  ///
  /// assert_eq!(Config::default().ack_timeout, Milliseconds(2_000));
  /// ```
  pub ack_timeout: Millis,

  /// Upper bound of the initial timeout, as a multiple of
  /// [`ack_timeout`](Config::ack_timeout).
  ///
  /// Defaults to 1.5 (`Factor(150)`).
  pub ack_random_factor: Factor,

  /// Number of times we are allowed to resend an unacknowledged
  /// CON before giving up.
  ///
  /// Defaults to 4 attempts.
  ///
  /// ```
  /// use newt::config::Config;
  /// use newt::retry::Attempts;
  ///
  /// assert_eq!(Config::default().max_retransmit, Attempts(4));
  /// ```
  pub max_retransmit: Attempts,

  /// Maximum number of interactions (unresolved transmissions and
  /// exchanges) we keep in flight toward one peer.
  ///
  /// Defaults to 1 (no concurrency).
  pub nstart: u8,

  /// Maximum amount of time we should delay a response to a
  /// multicast request.
  ///
  /// Defaults to 5 seconds.
  pub default_leisure: Millis,

  /// Average data rate we must not exceed toward a peer that is
  /// not currently responding, in bytes per second.
  ///
  /// Defaults to 1 B/s.
  ///
  /// ```
  /// use newt::config::{BytesPerSecond, Config};
  ///
  /// assert_eq!(Config::default().probing_rate, BytesPerSecond(1));
  /// ```
  pub probing_rate: BytesPerSecond,

  /// How long a peer may stay quiet before we stop considering it
  /// responsive (and PROBING_RATE kicks back in).
  ///
  /// `None` means "one exchange lifetime".
  pub responsiveness_quiet_period: Option<Millis>,

  /// See [`Overrides`]
  pub overrides: Overrides,
}

impl Default for Config {
  fn default() -> Self {
    Config { ack_timeout: Milliseconds(2_000),
             ack_random_factor: Factor(150),
             max_retransmit: Attempts(4),
             nstart: 1,
             default_leisure: Milliseconds(5_000),
             probing_rate: BytesPerSecond(1),
             responsiveness_quiet_period: None,
             overrides: Overrides::default() }
  }
}

impl Config {
  /// The protocol's assumed maximum one-way network latency
  /// (100 seconds).
  pub const MAX_LATENCY: Millis = Milliseconds(100_000);

  /// Validate this parameter set.
  ///
  /// Everything that constructs long-lived state from a `Config`
  /// calls this first; a bad parameter set never reaches a running
  /// event loop.
  pub fn checked(self) -> Result<Self, InvalidConfig> {
    if self.ack_random_factor < Factor(100) {
      return Err(InvalidConfig::AckRandomFactorBelowOne(self.ack_random_factor));
    }

    if self.nstart == 0 {
      return Err(InvalidConfig::NstartZero);
    }

    if self.probing_rate.0 == 0 {
      return Err(InvalidConfig::ProbingRateZero);
    }

    let span = self.worst_case_bebo_span();
    let max_wait = self.max_transmit_wait();
    if span > max_wait {
      return Err(InvalidConfig::BeboExceedsMaxTransmitWait { span, max_wait });
    }

    Ok(self)
  }

  /// `((2 ^ (1 + MAX_RETRANSMIT)) - 1) × initial_timeout`, with the
  /// initial timeout at its sampled maximum.
  ///
  /// This is the longest a confirmable message can spend
  /// retransmitting before its final wait begins.
  pub fn worst_case_bebo_span(&self) -> Millis {
    let Milliseconds(worst_init) = self.ack_random_factor.apply(self.ack_timeout);
    Milliseconds(((1u64 << (1 + self.max_retransmit.0 as u32)) - 1) * worst_init)
  }

  /// `MAX_TRANSMIT_SPAN`: the longest time between the first and
  /// last transmission of a confirmable message.
  pub fn max_transmit_span(&self) -> Millis {
    self.overrides.max_transmit_span.unwrap_or_else(|| {
      let Milliseconds(worst_init) = self.ack_random_factor.apply(self.ack_timeout);
      Milliseconds(((1u64 << self.max_retransmit.0 as u32) - 1) * worst_init)
    })
  }

  /// `MAX_TRANSMIT_WAIT`: the longest time from first transmission
  /// of a confirmable message to giving up on a reply.
  pub fn max_transmit_wait(&self) -> Millis {
    self.overrides
        .max_transmit_wait
        .unwrap_or_else(|| self.worst_case_bebo_span())
  }

  /// `EXCHANGE_LIFETIME`: how long a Message ID must not be reused
  /// and duplicates must be recognized.
  pub fn exchange_lifetime(&self) -> Millis {
    self.overrides.exchange_lifetime.unwrap_or_else(|| {
      Milliseconds(self.max_transmit_span().0
             + 2 * Self::MAX_LATENCY.0
             + self.processing_delay().0)
    })
  }

  /// `NON_LIFETIME`: how long a non-confirmable message's ID stays
  /// interesting.
  pub fn non_lifetime(&self) -> Millis {
    self.overrides
        .non_lifetime
        .unwrap_or(Milliseconds(self.max_transmit_span().0 + Self::MAX_LATENCY.0))
  }

  /// The time a peer is expected to take turning a request around
  /// (the protocol uses `ACK_TIMEOUT` for this).
  pub fn processing_delay(&self) -> Millis {
    self.ack_timeout
  }

  /// How long a sent non-confirmable non-request (or an ACK/RST)
  /// stays interesting: one worst-case initial timeout.
  pub fn non_request_window(&self) -> Millis {
    self.ack_random_factor.apply(self.ack_timeout)
  }

  /// See [`Config::responsiveness_quiet_period`]
  pub fn quiet_period(&self) -> Millis {
    self.responsiveness_quiet_period
        .unwrap_or_else(|| self.exchange_lifetime())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_is_valid() {
    assert!(Config::default().checked().is_ok());
  }

  #[test]
  fn rfc_default_durations() {
    let cfg = Config::default();

    // with the RFC defaults: 45s span, 93s wait, 247s lifetime
    assert_eq!(cfg.max_transmit_span(), Milliseconds(45_000));
    assert_eq!(cfg.max_transmit_wait(), Milliseconds(93_000));
    assert_eq!(cfg.exchange_lifetime(), Milliseconds(45_000 + 200_000 + 2_000));
    assert_eq!(cfg.non_lifetime(), Milliseconds(145_000));
  }

  #[test]
  fn factor_below_one_is_rejected() {
    let cfg = Config { ack_random_factor: Factor(99),
                       ..Config::default() };
    assert_eq!(cfg.checked(),
               Err(InvalidConfig::AckRandomFactorBelowOne(Factor(99))));
  }

  #[test]
  fn nstart_zero_is_rejected() {
    let cfg = Config { nstart: 0,
                       ..Config::default() };
    assert_eq!(cfg.checked(), Err(InvalidConfig::NstartZero));
  }

  #[test]
  fn overridden_wait_must_cover_bebo() {
    let cfg = Config { overrides: Overrides { max_transmit_wait: Some(Milliseconds(10_000)),
                                              ..Overrides::default() },
                       ..Config::default() };

    assert_eq!(cfg.checked(),
               Err(InvalidConfig::BeboExceedsMaxTransmitWait { span: Milliseconds(93_000),
                                                               max_wait: Milliseconds(10_000) }));

    let cfg = Config { overrides: Overrides { max_transmit_wait: Some(Milliseconds(93_000)),
                                              ..Overrides::default() },
                       ..Config::default() };
    assert!(cfg.checked().is_ok());
  }

  #[test]
  fn overrides_pin_derived_values() {
    let cfg = Config { overrides: Overrides { exchange_lifetime: Some(Milliseconds(10_000)),
                                              non_lifetime: Some(Milliseconds(4_000)),
                                              ..Overrides::default() },
                       ..Config::default() };
    assert_eq!(cfg.exchange_lifetime(), Milliseconds(10_000u64));
    assert_eq!(cfg.non_lifetime(), Milliseconds(4_000u64));
  }
}
