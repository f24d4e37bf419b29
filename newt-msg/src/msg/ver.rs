/// Version of the CoAP protocol that the message adheres to.
///
/// Right now, this will always be 1; decoding rejects anything else.
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Version(pub u8);

impl Default for Version {
  fn default() -> Self {
    Version(1)
  }
}
