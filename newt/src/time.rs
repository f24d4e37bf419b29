use embedded_time::duration::Milliseconds;
use embedded_time::Instant;

/// A duration, in milliseconds
pub type Millis = Milliseconds<u64>;

/// Supertrait of [`embedded_time::Clock`] pinning the
/// type of "ticks" to u64
pub trait Clock: embedded_time::Clock<T = u64> {}
impl<C: embedded_time::Clock<T = u64>> Clock for C {}

/// Milliseconds elapsed between two instants.
///
/// Yields zero (rather than nothing) when `past` is in the future
/// of `now`, since every caller here treats "hasn't happened yet"
/// and "just happened" the same way.
pub fn since<C: Clock>(now: Instant<C>, past: Instant<C>) -> Millis {
  now.checked_duration_since(&past)
     .and_then(|d| Millis::try_from(d).ok())
     .unwrap_or(Milliseconds(0))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test::ClockMock;

  #[test]
  fn since_measures_millis() {
    let a = ClockMock::instant_millis(100);
    let b = ClockMock::instant_millis(350);
    assert_eq!(since(b, a), Milliseconds(250u64));
    // backwards clamps to zero
    assert_eq!(since(a, b), Milliseconds(0u64));
  }
}
