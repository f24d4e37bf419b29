use crate::config::InvalidConfig;
use crate::state::{CancelError, SubmitError};

/// The context that an error occurred in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum When {
  /// We were driving the event loop
  Polling,
  /// We were accepting a message from the upper layer
  Submitting,
  /// We were cancelling a transmission
  Cancelling,
}

impl When {
  /// Construct a specific error from the context the error
  /// occurred in
  pub fn what<E>(self, what: What<E>) -> Error<E> {
    Error { when: self, what }
  }
}

/// A contextless error with some additional debug data attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum What<E> {
  /// The transport failed receiving
  Transport(E),
  /// The transmission parameters failed validation
  Config(InvalidConfig),
  /// A submission was refused
  Submit(SubmitError),
  /// A cancellation was refused
  Cancel(CancelError),
  /// The clock failed to provide timing
  Clock,
}

/// An error encounterable from within [`Core`](crate::core::Core).
///
/// Note what is *not* here: malformed datagrams, unmatched replies
/// and transport send failures never surface as errors. They are
/// answered with RST, dropped with a diagnostic, or reported as a
/// failed resolution, and the loop keeps running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error<E> {
  /// What happened?
  pub what: What<E>,
  /// What were we doing when it happened?
  pub when: When,
}
