use super::opt::parse_error::OptParseError;
use super::{Id, Token, Type};

/// The identifying fields of a message whose body could not be
/// decoded.
///
/// Once the fixed header and token have been read, later failures
/// still carry these so the receiver can pair the garbage with an
/// outstanding transmission or reject it with a Reset bearing the
/// right [`Id`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Shell {
  /// Message type from the fixed header
  pub ty: Type,
  /// Message ID from the fixed header
  pub id: Id,
  /// Token (empty when the failure happened before it was read)
  pub token: Token,
}

/// Errors encounterable while parsing a message from bytes
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MessageParseError {
  /// Reached end of stream before parsing was finished
  UnexpectedEndOfStream,

  /// Version field was not 1
  InvalidVersion(u8),

  /// Token length was > 8
  InvalidTokenLength(u8),

  /// Error parsing the option sequence
  OptParseError(Shell, OptParseError),

  /// The payload marker (0xFF) was present but no payload
  /// bytes followed it
  PayloadMarkerWithNoPayload(Shell),

  /// The code was 0.00 (EMPTY) but the message carried a token,
  /// options or payload; empty messages are exactly 4 bytes
  EmptyCodeWithContent(Shell),
}

impl MessageParseError {
  /// Shorthand for [`MessageParseError::UnexpectedEndOfStream`]
  pub fn eof() -> Self {
    Self::UnexpectedEndOfStream
  }

  /// The identifying fields of the unparseable message, when the
  /// failure happened late enough for them to be known.
  pub fn shell(&self) -> Option<&Shell> {
    match self {
      | Self::OptParseError(shell, _)
      | Self::PayloadMarkerWithNoPayload(shell)
      | Self::EmptyCodeWithContent(shell) => Some(shell),
      | _ => None,
    }
  }
}
