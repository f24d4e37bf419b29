use std_alloc::vec::Vec;

use crate::cursor::Cursor;

/// Message Code
pub mod code;

/// Message parsing errors
pub mod parse_error;

/// Message ID
pub mod id;

/// Message Options
pub mod opt;

/// Message Type
pub mod ty;

/// Message Token
pub mod token;

/// Message Version
pub mod ver;

pub use code::*;
pub use id::*;
pub use opt::*;
pub use parse_error::*;
pub use token::*;
pub use ty::*;
pub use ver::*;

/// The request/response body of a message, as raw bytes.
#[derive(Default, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Payload(pub Vec<u8>);

impl Payload {
  /// Convert a reference to a Payload to a byte slice
  pub fn as_bytes(&self) -> &[u8] {
    &self.0
  }
}

/// Struct representing the first byte of a message.
///
/// ```text
/// CoAP version
/// |
/// |  Message type (CON, NON, ACK, RST)
/// |  |
/// |  |  Length of token, in bytes. (4-bit integer)
/// |  |  |
/// vv vv vvvv
/// 01 00 0000
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Byte1 {
  pub(crate) ver: Version,
  pub(crate) ty: Type,
  pub(crate) tkl: u8,
}

impl From<Byte1> for u8 {
  fn from(b: Byte1) -> u8 {
    let ver = b.ver.0 << 6;
    let ty = u8::from(b.ty) << 4;
    let tkl = b.tkl;

    ver | ty | tkl
  }
}

/// Errors encounterable serializing a message to bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageEncodeError {
  /// The code was 0.00 (EMPTY) but the message carried a token,
  /// options or payload; empty messages are exactly 4 bytes on
  /// the wire.
  EmptyMessageWithContent,
}

/// # CoAP Messages
///
/// A datagram-shaped value very close to the CoAP wire layout:
/// the four header fields, a token, options, and a payload.
///
/// Messages should be treated as immutable once they have been
/// handed to a transport; retransmissions must be byte-identical.
///
/// ## Constructing
/// [`Message::new`] is the most straightforward way to initialize
/// messages; the fields are public for struct-literal construction
/// too.
///
/// ```
/// use newt_msg::{Code, Id, Message, Token, Type};
///
/// let mut req = Message::new(Type::Con, Code::GET, Id(1), Token(Default::default()));
/// req.add(newt_msg::num::URI_PATH, b"sensors".iter().copied().collect());
/// ```
///
/// ## Sending / Receiving
/// This crate explicitly does **not** know or care about how
/// messages are sent and received; for a runtime that uses this
/// library, see the `newt` crate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
  /// see [`Id`] for details
  pub id: Id,
  /// see [`Type`] for details
  pub ty: Type,
  /// see [`Version`] for details
  pub ver: Version,
  /// see [`Token`] for details
  pub token: Token,
  /// see [`Code`] for details
  pub code: Code,
  /// see [`OptMap`] for details
  pub opts: OptMap,
  /// see [`Payload`]
  pub payload: Payload,
}

impl Message {
  /// Create a new message with no options or payload
  pub fn new(ty: Type, code: Code, id: Id, token: Token) -> Self {
    Self { id,
           token,
           ty,
           code,
           ver: Version::default(),
           payload: Payload(Default::default()),
           opts: OptMap::default() }
  }

  /// An empty CON; provokes an RST from the peer, which is an
  /// inexpensive liveness check ("CoAP ping").
  pub fn ping(id: Id) -> Self {
    Self::new(Type::Con, Code::EMPTY, id, Token(Default::default()))
  }

  /// Create the empty ACK for this message.
  ///
  /// The acknowledgement carries the same [`Id`] as the message it
  /// acknowledges; that is how the peer pairs them.
  pub fn ack(&self) -> Self {
    Self::new(Type::Ack, Code::EMPTY, self.id, Token(Default::default()))
  }

  /// Create the RST rejecting this message.
  pub fn rst(&self) -> Self {
    Self::new(Type::Reset, Code::EMPTY, self.id, Token(Default::default()))
  }

  /// Insert a new value for a given option, alongside any existing
  /// values
  pub fn add(&mut self, n: OptNumber, v: OptValue) {
    self.opts.entry(n).or_default().push(v);
  }

  /// Replace any / all existing values with a new one, yielding the
  /// previous value(s)
  pub fn set(&mut self, n: OptNumber, v: OptValue) -> Option<Vec<OptValue>> {
    let old = self.remove(n);
    self.add(n, v);
    old
  }

  /// Get the value(s) of an option by number
  pub fn get(&self, n: OptNumber) -> Option<&Vec<OptValue>> {
    self.opts.get(&n)
  }

  /// Get the value of an option, taking the first if there are
  /// multiple
  pub fn get_first(&self, n: OptNumber) -> Option<&OptValue> {
    self.get(n).and_then(|vs| vs.first())
  }

  /// Get the number of values for a given option
  pub fn count(&self, n: OptNumber) -> usize {
    self.get(n).map(|vs| vs.len()).unwrap_or(0)
  }

  /// Remove all values for the option from this message, returning
  /// them if there were any
  pub fn remove(&mut self, n: OptNumber) -> Option<Vec<OptValue>> {
    self.opts.remove(&n)
  }

  /// Get the value of an option, and interpret it as a UTF-8 string
  pub fn get_str(&self, n: OptNumber) -> Option<&str> {
    self.get_first(n)
        .and_then(|v| core::str::from_utf8(&v.0).ok())
  }

  /// Get the value of an option, and interpret it as a big-endian
  /// unsigned integer
  pub fn get_uint(&self, n: OptNumber) -> Option<u64> {
    self.get_first(n).and_then(|v| decode_uint(&v.0))
  }

  /// Set an option to an unsigned integer value, encoded minimally
  /// (see [`encode_uint`])
  pub fn set_uint(&mut self, n: OptNumber, value: u64) {
    self.set(n, OptValue(encode_uint(value)));
  }

  /// Number of bytes this message occupies on the wire
  pub fn encoded_len(&self) -> usize {
    let opts: usize = {
      let mut last = 0u32;
      let mut sum = 0usize;
      for (num, values) in &self.opts {
        for (ix, value) in values.iter().enumerate() {
          let delta = if ix == 0 { num.0 - last } else { 0 };
          sum += Opt { delta: OptDelta(delta),
                       value: value.clone() }.encoded_len();
        }
        last = num.0;
      }
      sum
    };

    let payload = match self.payload.0.len() {
      | 0 => 0,
      | n => 1 + n, // marker + bytes
    };

    4 + self.token.0.len() + opts + payload
  }

  /// Serialize this message to its wire bytes.
  pub fn try_into_bytes(&self) -> Result<Vec<u8>, MessageEncodeError> {
    if self.code == Code::EMPTY
       && (self.token.0.len() > 0 || !self.opts.is_empty() || !self.payload.0.is_empty())
    {
      return Err(MessageEncodeError::EmptyMessageWithContent);
    }

    let mut bytes = Vec::with_capacity(self.encoded_len());

    bytes.push(Byte1 { ver: self.ver,
                       ty: self.ty,
                       tkl: self.token.0.len() as u8 }.into());
    bytes.push(self.code.into());
    bytes.extend(self.id.to_be_bytes());
    bytes.extend(self.token.0);

    encode_opts(&self.opts, &mut bytes);

    if !self.payload.0.is_empty() {
      bytes.push(0b11111111);
      bytes.extend(self.payload.0.iter().copied());
    }

    Ok(bytes)
  }

  /// Parse a message from its wire bytes.
  ///
  /// Failures that happen after the fixed header and token have
  /// been read still carry a [`Shell`] with the identifying fields,
  /// so the receiver can reject the datagram with a Reset bearing
  /// the right [`Id`].
  pub fn try_from_bytes(bytes: impl AsRef<[u8]>) -> Result<Self, MessageParseError> {
    let mut bytes = Cursor::new(bytes);

    let byte1 = bytes.next().ok_or_else(MessageParseError::eof)?;
    let ver = byte1 >> 6;
    let ty = Type::from_bits(byte1 >> 4);
    let tkl = byte1 & 0b1111;

    if ver != 1 {
      return Err(MessageParseError::InvalidVersion(ver));
    }

    if tkl > 8 {
      return Err(MessageParseError::InvalidTokenLength(tkl));
    }

    let code: Code = bytes.next().ok_or_else(MessageParseError::eof)?.into();
    let id = match bytes.take_exact(2) {
      | Some(&[a, b]) => Id::from_be_bytes([a, b]),
      | _ => return Err(MessageParseError::eof()),
    };

    let token = bytes.take_exact(tkl as usize)
                     .ok_or_else(MessageParseError::eof)?;
    let token = Token(token.iter().copied().collect());

    let shell = Shell { ty, id, token };

    let (opts, saw_marker) =
      decode_opts(&mut bytes).map_err(|e| MessageParseError::OptParseError(shell, e))?;

    let payload = Payload(bytes.take_until_end().to_vec());

    if saw_marker && payload.0.is_empty() {
      return Err(MessageParseError::PayloadMarkerWithNoPayload(shell));
    }

    if code == Code::EMPTY
       && (tkl > 0 || !opts.is_empty() || !payload.0.is_empty())
    {
      return Err(MessageParseError::EmptyCodeWithContent(shell));
    }

    Ok(Message { id,
                 ty,
                 ver: Version(ver),
                 code,
                 token,
                 opts,
                 payload })
  }
}
