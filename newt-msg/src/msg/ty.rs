/// Indicates if this message is of
/// type Confirmable (0), Non-confirmable (1), Acknowledgement (2), or Reset (3).
#[derive(Copy, Clone, Hash, Eq, Ord, PartialEq, PartialOrd, Debug)]
pub enum Type {
  /// Messages that require an acknowledgement are "Confirmable".
  /// When no packets are lost, each Confirmable message elicits
  /// exactly one return message of type Acknowledgement or Reset.
  Con,
  /// Messages that do not require an acknowledgement, such as
  /// repeated readings from a sensor.
  Non,
  /// An Acknowledgement acknowledges that a specific Confirmable
  /// message arrived, and may carry a piggybacked response.
  Ack,
  /// A Reset indicates that a specific message (Confirmable or
  /// Non-confirmable) was received, but some context is missing to
  /// properly process it. Provoking a Reset (by sending an Empty
  /// Confirmable message) is also an inexpensive liveness check
  /// ("CoAP ping").
  Reset,
}

impl Type {
  /// Read a Type out of the 2-bit wire field.
  ///
  /// Only the low 2 bits of `b` are considered, so this cannot fail.
  pub fn from_bits(b: u8) -> Self {
    match b & 0b11 {
      | 0 => Type::Con,
      | 1 => Type::Non,
      | 2 => Type::Ack,
      | _ => Type::Reset,
    }
  }
}

impl From<Type> for u8 {
  fn from(t: Type) -> u8 {
    use Type::*;
    match t {
      | Con => 0,
      | Non => 1,
      | Ack => 2,
      | Reset => 3,
    }
  }
}
