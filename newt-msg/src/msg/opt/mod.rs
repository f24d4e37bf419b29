use std_alloc::collections::BTreeMap;
use std_alloc::vec::Vec;
use tinyvec::ArrayVec;

use crate::cursor::Cursor;

/// Option parsing errors
pub mod parse_error;
pub use parse_error::*;

/// The option registry: numbers, formats, length bounds,
/// multiplicity & applicability
pub mod registry;
pub use registry::*;

/// Registry-driven option (and message shape) validation
pub mod validate;
pub use validate::*;

/// The largest option value this decoder will buffer.
///
/// The longest option in the base registry (Proxy-Uri) caps out at
/// 1034 bytes; anything longer is rejected with
/// [`OptParseError::OptionValueTooLong`] rather than buffered.
pub const MAX_VALUE_LEN: usize = 1034;

/// # Option Number
///
/// Identifies which option an [`Opt`] is setting (e.g. Content-Format
/// has a Number of 12).
///
/// The low bits of the number encode the option's properties;
/// see [`OptNumber::is_critical`], [`OptNumber::is_unsafe`] and
/// [`OptNumber::is_no_cache_key`].
#[derive(Copy, Clone, Hash, PartialEq, PartialOrd, Eq, Ord, Debug, Default)]
pub struct OptNumber(pub u32);

impl OptNumber {
  /// Whether a receiver is allowed to ignore this option.
  ///
  /// Odd numbers are "critical": a message carrying one that the
  /// receiver does not recognize must be rejected.
  pub fn is_critical(&self) -> bool {
    self.0 & 0b1 == 1
  }

  /// Whether a proxy that does not recognize this option must
  /// refuse to forward the message ("UnSafe" in strict CoAP terms).
  pub fn is_unsafe(&self) -> bool {
    self.0 & 0b10 == 0b10
  }

  /// Whether different values for this option should yield a
  /// proxy's cached response anyway ("NoCacheKey").
  ///
  /// Only meaningful for safe-to-forward options.
  pub fn is_no_cache_key(&self) -> bool {
    self.0 & 0b11110 == 0b11100
  }
}

/// The "Option Delta": the difference between this Option's Number
/// and the previous Option's Number in the encoded sequence.
#[derive(Copy, Clone, Hash, PartialEq, PartialOrd, Eq, Ord, Debug, Default)]
pub struct OptDelta(pub u32);

/// # Option Value
///
/// The value of an option, as raw bytes.
///
/// How the bytes are interpreted is governed by the registered
/// format of the option's number; see [`OptFormat`].
#[derive(Clone, Hash, PartialEq, PartialOrd, Eq, Ord, Debug, Default)]
pub struct OptValue(pub Vec<u8>);

impl OptValue {
  /// Convert a reference to an OptValue to a byte slice
  pub fn as_bytes(&self) -> &[u8] {
    &self.0
  }
}

impl FromIterator<u8> for OptValue {
  fn from_iter<T: IntoIterator<Item = u8>>(iter: T) -> Self {
    Self(iter.into_iter().collect())
  }
}

/// Low-level representation of a CoAP Option, closely mirroring the
/// byte layout of message options.
///
/// Notably, this doesn't include the Number; numbers are recovered
/// by accumulating deltas over the encoded sequence.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Opt {
  /// See [`OptDelta`]
  pub delta: OptDelta,
  /// See [`OptValue`]
  pub value: OptValue,
}

/// The options of a message: a map from number to the values set
/// for that number, in insertion order.
///
/// `BTreeMap` iterates in ascending key order, which is exactly the
/// canonical encoded order of CoAP options; repeats of one number
/// keep their insertion order.
pub type OptMap = BTreeMap<OptNumber, Vec<OptValue>>;

/// Collect `(number, value)` pairs into canonical form.
///
/// Canonical form sorts by ascending option number, keeping the
/// relative order of values that share a number. The operation is
/// idempotent: feeding the pairs of a canonical map back in yields
/// an equal map.
pub fn canonical<I>(opts: I) -> OptMap
  where I: IntoIterator<Item = (OptNumber, OptValue)>
{
  let mut map = OptMap::new();
  for (num, value) in opts {
    map.entry(num).or_default().push(value);
  }
  map
}

pub(crate) fn parse_opt_len_or_delta<A: AsRef<[u8]>>(head: u8,
                                                     bytes: &mut Cursor<A>,
                                                     reserved_err: OptParseError)
                                                     -> Result<u32, OptParseError> {
  match head {
    | 13 => {
      let n = bytes.next().ok_or_else(OptParseError::eof)?;
      Ok(n as u32 + 13)
    },
    | 14 => match bytes.take_exact(2) {
      | Some(&[a, b]) => Ok(u16::from_be_bytes([a, b]) as u32 + 269),
      | _ => Err(OptParseError::eof()),
    },
    | 15 => Err(reserved_err),
    | _ => Ok(head as u32),
  }
}

pub(crate) fn opt_len_or_delta(val: u32) -> (u8, Option<ArrayVec<[u8; 2]>>) {
  match val {
    | n if n >= 269 => {
      let mut bytes = ArrayVec::new();
      bytes.extend(((n - 269) as u16).to_be_bytes());
      (14, Some(bytes))
    },
    | n if n >= 13 => {
      let mut bytes = ArrayVec::new();
      bytes.push((n as u8) - 13);
      (13, Some(bytes))
    },
    | n => (n as u8, None),
  }
}

impl Opt {
  /// Number of bytes this option occupies on the wire
  pub fn encoded_len(&self) -> usize {
    let ext = |n: u32| match n {
      | n if n >= 269 => 2,
      | n if n >= 13 => 1,
      | _ => 0,
    };

    1 + ext(self.delta.0) + ext(self.value.0.len() as u32) + self.value.0.len()
  }

  /// Add this option's wire bytes to `bytes`
  pub fn extend_bytes(&self, bytes: &mut impl Extend<u8>) {
    let (del, del_ext) = opt_len_or_delta(self.delta.0);
    let (len, len_ext) = opt_len_or_delta(self.value.0.len() as u32);

    bytes.extend(Some(del << 4 | len));

    if let Some(bs) = del_ext {
      bytes.extend(bs);
    }

    if let Some(bs) = len_ext {
      bytes.extend(bs);
    }

    bytes.extend(self.value.0.iter().copied());
  }

  fn try_consume_bytes<A: AsRef<[u8]>>(bytes: &mut Cursor<A>) -> Result<Option<Opt>, OptParseError> {
    let byte1 = match bytes.next() {
      // end of message or payload marker; both end the option sequence
      | None | Some(0b11111111) => return Ok(None),
      | Some(b) => b,
    };

    // Delta must be consumed before the value length; both may pull
    // extension bytes off the cursor.
    let delta = parse_opt_len_or_delta(byte1 >> 4,
                                       bytes,
                                       OptParseError::OptionDeltaReservedValue(15))?;
    let len = parse_opt_len_or_delta(byte1 & 0b00001111,
                                     bytes,
                                     OptParseError::ValueLengthReservedValue(15))?
              as usize;

    if len > MAX_VALUE_LEN {
      return Err(OptParseError::OptionValueTooLong { max: MAX_VALUE_LEN,
                                                     actual: len });
    }

    let value = bytes.take_exact(len).ok_or_else(OptParseError::eof)?;

    Ok(Some(Opt { delta: OptDelta(delta),
                  value: OptValue(value.to_vec()) }))
  }
}

/// Decode the option sequence of a message.
///
/// Returns the decoded map along with whether the sequence was
/// terminated by the `0xFF` payload marker (as opposed to the end
/// of the datagram).
pub(crate) fn decode_opts<A: AsRef<[u8]>>(bytes: &mut Cursor<A>)
                                          -> Result<(OptMap, bool), OptParseError> {
  let mut map = OptMap::new();
  let mut number = 0u32;

  loop {
    let before_marker = bytes.remaining();
    match Opt::try_consume_bytes(bytes)? {
      | Some(opt) => {
        number += opt.delta.0;
        map.entry(OptNumber(number)).or_default().push(opt.value);
      },
      // consumed either nothing (end of dgram) or the 0xFF marker
      | None => return Ok((map, before_marker > 0)),
    }
  }
}

/// Encode `opts` in canonical order, appending to `bytes`.
pub(crate) fn encode_opts(opts: &OptMap, bytes: &mut Vec<u8>) {
  let mut last = 0u32;

  for (num, values) in opts {
    for (ix, value) in values.iter().enumerate() {
      let delta = if ix == 0 { num.0 - last } else { 0 };
      Opt { delta: OptDelta(delta),
            value: value.clone() }.extend_bytes(bytes);
    }
    last = num.0;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn consume(bytes: &[u8]) -> Result<Option<Opt>, OptParseError> {
    Opt::try_consume_bytes(&mut Cursor::new(bytes))
  }

  #[test]
  fn parse_opt() {
    // both nibbles inline
    assert_eq!(consume(&[0b0011_0001, 5]).unwrap(),
               Some(Opt { delta: OptDelta(3),
                          value: OptValue(vec![5]) }));

    // delta through the 1-byte extension: 13 + 2
    assert_eq!(consume(&[0b1101_0001, 2, 5]).unwrap(),
               Some(Opt { delta: OptDelta(15),
                          value: OptValue(vec![5]) }));

    // delta through the 2-byte extension: 269 + 2
    assert_eq!(consume(&[0b1110_0001, 0, 2, 5]).unwrap(),
               Some(Opt { delta: OptDelta(271),
                          value: OptValue(vec![5]) }));

    // repeat of the previous number
    assert_eq!(consume(&[0b0000_0001, 5]).unwrap(),
               Some(Opt { delta: OptDelta(0),
                          value: OptValue(vec![5]) }));
  }

  #[test]
  fn parse_opt_errors() {
    assert_eq!(consume(&[0b11110001, 1]),
               Err(OptParseError::OptionDeltaReservedValue(15)));
    assert_eq!(consume(&[0b00011111, 1]),
               Err(OptParseError::ValueLengthReservedValue(15)));
    assert_eq!(consume(&[0b00000010, 1]), Err(OptParseError::eof()));
    assert_eq!(consume(&[0b11111111]).unwrap(), None);
    assert_eq!(consume(&[]).unwrap(), None);
  }

  #[test]
  fn serialize_opt() {
    // (delta, value, expected wire bytes); deltas and lengths chosen
    // to land on each side of the 13 and 269 extension boundaries
    let cases: [(u32, Vec<u8>, Vec<u8>); 4] =
      [(2, vec![9], vec![0b0010_0001, 9]),
       (21, vec![9], vec![0b1101_0001, 21 - 13, 9]),
       (21,
        vec![7; 50],
        [[0b1101_1101u8, 21 - 13, 50 - 13].as_ref(), [7; 50].as_ref()].concat()),
       (21,
        vec![7; 280],
        [[0b1101_1110u8, 21 - 13].as_ref(),
         (280u16 - 269).to_be_bytes().as_ref(),
         [7; 280].as_ref()].concat())];

    cases.into_iter().for_each(|(delta, value, expected)| {
                       let opt = Opt { delta: OptDelta(delta),
                                       value: OptValue(value) };
                       assert_eq!(opt.encoded_len(), expected.len());

                       let mut actual = Vec::<u8>::new();
                       opt.extend_bytes(&mut actual);
                       assert_eq!(actual, expected)
                     });
  }

  #[test]
  fn decode_opt_sequence() {
    let mut bytes = Cursor::new([0b00000001u8, 0b00000001, 0b00010001, 0b00000011, 0b11111111]);
    let (map, saw_marker) = decode_opts(&mut bytes).unwrap();
    assert!(saw_marker);
    assert_eq!(map,
               OptMap::from([(OptNumber(0), vec![OptValue(vec![1])]),
                             (OptNumber(1), vec![OptValue(vec![3])])]));
  }

  #[test]
  fn decode_repeated_number() {
    // two Uri-Path segments: delta 11 then delta 0
    let mut bytes = Cursor::new([0xB2u8, b'h', b'i', 0x05, b't', b'h', b'e', b'r', b'e']);
    let (map, saw_marker) = decode_opts(&mut bytes).unwrap();
    assert!(!saw_marker);
    assert_eq!(map.get(&OptNumber(11)).unwrap(),
               &vec![OptValue(b"hi".to_vec()), OptValue(b"there".to_vec())]);
  }

  #[test]
  fn canonical_is_stable_and_idempotent() {
    let pairs = vec![(OptNumber(11), OptValue(b"b".to_vec())),
                     (OptNumber(4), OptValue(vec![9])),
                     (OptNumber(11), OptValue(b"a".to_vec()))];

    let once = canonical(pairs);
    assert_eq!(once.get(&OptNumber(11)).unwrap(),
               &vec![OptValue(b"b".to_vec()), OptValue(b"a".to_vec())]);

    let twice = canonical(once.iter()
                              .flat_map(|(n, vs)| vs.iter().map(|v| (*n, v.clone()))));
    assert_eq!(once, twice);
  }

  #[test]
  fn opt_number_qualities() {
    // critical, safe-to-fwd, cache-key
    let if_match = OptNumber(1);

    // critical, unsafe-to-fwd, cache-key
    let uri_host = OptNumber(3);

    // elective, safe-to-fwd, cache-key
    let etag = OptNumber(4);

    // elective, safe-to-fwd, no-cache-key
    let size1 = OptNumber(60);

    assert!(if_match.is_critical());
    assert!(uri_host.is_critical());
    assert!(!etag.is_critical());
    assert!(!size1.is_critical());

    assert!(uri_host.is_unsafe());
    assert!(!if_match.is_unsafe());
    assert!(!etag.is_unsafe());

    assert!(size1.is_no_cache_key());
    assert!(!if_match.is_no_cache_key());
    assert!(!uri_host.is_no_cache_key());
    assert!(!etag.is_no_cache_key());
  }
}
