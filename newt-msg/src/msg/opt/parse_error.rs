/// Errors encounterable while parsing an option from bytes
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OptParseError {
  /// Reached end of stream before parsing was finished
  UnexpectedEndOfStream,

  /// Option Delta nibble was set to 15, which is reserved
  /// (the payload marker is handled at the message level).
  OptionDeltaReservedValue(u8),

  /// Value Length nibble was set to 15, which is reserved.
  ValueLengthReservedValue(u8),

  /// Option value length exceeded the maximum this decoder
  /// will buffer.
  #[allow(missing_docs)]
  OptionValueTooLong { max: usize, actual: usize },
}

impl OptParseError {
  /// Shorthand for [`OptParseError::UnexpectedEndOfStream`]
  pub fn eof() -> Self {
    Self::UnexpectedEndOfStream
  }
}
