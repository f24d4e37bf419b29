use tinyvec::ArrayVec;

/// # Message Token
///
/// 0 to 8 opaque bytes chosen by the sender of a request, echoed
/// back in the response so the two can be correlated across an
/// exchange. Where the [`Id`](crate::Id) matches an ACK/RST to the
/// CON/NON it acknowledges, the Token matches a response to the
/// request that caused it.
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct Token(pub ArrayVec<[u8; 8]>);

impl Token {
  /// Derive an 8-byte token from arbitrary seed material, so
  /// applications don't hand-roll guessable token schemes.
  ///
  /// The seed is run through BLAKE2 with an 8-byte output.
  ///
  /// ```
  /// use newt_msg::Token;
  ///
  /// let token = Token::opaque(b"thermostat-7:reading:42");
  /// ```
  pub fn opaque(seed: &[u8]) -> Token {
    use blake2::digest::consts::U8;
    use blake2::{Blake2b, Digest};

    let hash: [u8; 8] = Blake2b::<U8>::digest(seed).into();
    Token(hash.into())
  }

  /// The token's bytes
  pub fn as_bytes(&self) -> &[u8] {
    &self.0
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn opaque_is_8_bytes_and_deterministic() {
    let a = Token::opaque(&[1, 2, 3]);
    let b = Token::opaque(&[1, 2, 3]);
    assert_eq!(a, b);
    assert_eq!(a.as_bytes().len(), 8);
    assert_ne!(a, Token::opaque(&[3, 2, 1]));
  }
}
