use std_alloc::collections::BTreeMap;
use std_alloc::vec::Vec;

use super::OptNumber;

/// How the bytes of an option value are to be interpreted.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OptFormat {
  /// Always zero bytes; the value is the unit.
  Empty,
  /// Bytes as-is.
  Opaque,
  /// Unsigned integer in the minimum number of big-endian bytes;
  /// 0 encodes to zero bytes, and no encoding has a leading zero
  /// byte. See [`encode_uint`] / [`decode_uint`].
  Uint,
  /// UTF-8 bytes.
  String,
}

/// Everything the registry knows about one option number.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OptDescriptor {
  /// The registered number
  pub number: OptNumber,
  /// Human name, e.g. `"Uri-Path"`
  pub name: &'static str,
  /// Value format
  pub format: OptFormat,
  /// Smallest acceptable packed length, in bytes
  pub min_len: usize,
  /// Largest acceptable packed length, in bytes
  pub max_len: usize,
  /// Whether the option may occur more than once in one message
  pub repeatable: bool,
  /// Whether the option may appear in requests
  pub in_request: bool,
  /// Whether the option may appear in responses
  pub in_response: bool,
}

impl OptDescriptor {
  /// Synthesize a descriptor for a number nobody registered.
  ///
  /// Unrecognized options are treated as opaque, any length,
  /// repeatable, valid anywhere; whether carrying one is an error
  /// depends only on [`OptNumber::is_critical`].
  pub fn unrecognized(number: OptNumber) -> Self {
    OptDescriptor { number,
                    name: "unrecognized",
                    format: OptFormat::Opaque,
                    min_len: 0,
                    max_len: usize::MAX,
                    repeatable: true,
                    in_request: true,
                    in_response: true }
  }
}

/// Registering a number that already has a different entry.
///
/// This is a configuration-time error and should be treated as
/// fatal to startup.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RegistryConflict {
  /// The number both entries claim
  pub number: OptNumber,
}

/// Well-known option numbers from the base registry
pub mod num {
  use super::OptNumber;

  /// If-Match
  pub const IF_MATCH: OptNumber = OptNumber(1);
  /// Uri-Host
  pub const URI_HOST: OptNumber = OptNumber(3);
  /// ETag
  pub const ETAG: OptNumber = OptNumber(4);
  /// If-None-Match
  pub const IF_NONE_MATCH: OptNumber = OptNumber(5);
  /// Uri-Port
  pub const URI_PORT: OptNumber = OptNumber(7);
  /// Location-Path
  pub const LOCATION_PATH: OptNumber = OptNumber(8);
  /// Uri-Path
  pub const URI_PATH: OptNumber = OptNumber(11);
  /// Content-Format
  pub const CONTENT_FORMAT: OptNumber = OptNumber(12);
  /// Max-Age
  pub const MAX_AGE: OptNumber = OptNumber(14);
  /// Uri-Query
  pub const URI_QUERY: OptNumber = OptNumber(15);
  /// Accept
  pub const ACCEPT: OptNumber = OptNumber(17);
  /// Location-Query
  pub const LOCATION_QUERY: OptNumber = OptNumber(20);
  /// Proxy-Uri
  pub const PROXY_URI: OptNumber = OptNumber(35);
  /// Proxy-Scheme
  pub const PROXY_SCHEME: OptNumber = OptNumber(39);
  /// Size1
  pub const SIZE1: OptNumber = OptNumber(60);
}

/// A flat table of option descriptors keyed by number.
///
/// Append-only once the runtime is up; registering new entries is a
/// startup activity and conflicts are fatal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Registry {
  entries: BTreeMap<OptNumber, OptDescriptor>,
}

impl Default for Registry {
  fn default() -> Self {
    Self::core()
  }
}

macro_rules! descriptor {
  ($num:expr, $name:literal, $format:ident, $min:literal ..= $max:literal, $repeat:literal, req: $req:literal, resp: $resp:literal) => {
    OptDescriptor { number: $num,
                    name: $name,
                    format: OptFormat::$format,
                    min_len: $min,
                    max_len: $max,
                    repeatable: $repeat,
                    in_request: $req,
                    in_response: $resp }
  };
}

impl Registry {
  /// An empty registry. Useful mostly for tests; real runtimes want
  /// [`Registry::core`].
  pub fn empty() -> Self {
    Registry { entries: BTreeMap::new() }
  }

  /// The base-CoAP option table.
  pub fn core() -> Self {
    use num::*;

    let mut reg = Self::empty();

    [descriptor!(IF_MATCH, "If-Match", Opaque, 0..=8, true, req: true, resp: false),
     descriptor!(URI_HOST, "Uri-Host", String, 1..=255, false, req: true, resp: false),
     descriptor!(ETAG, "ETag", Opaque, 1..=8, true, req: true, resp: true),
     descriptor!(IF_NONE_MATCH, "If-None-Match", Empty, 0..=0, false, req: true, resp: false),
     descriptor!(URI_PORT, "Uri-Port", Uint, 0..=2, false, req: true, resp: false),
     descriptor!(LOCATION_PATH, "Location-Path", String, 0..=255, true, req: false, resp: true),
     descriptor!(URI_PATH, "Uri-Path", String, 0..=255, true, req: true, resp: false),
     descriptor!(CONTENT_FORMAT, "Content-Format", Uint, 0..=2, false, req: true, resp: true),
     descriptor!(MAX_AGE, "Max-Age", Uint, 0..=4, false, req: false, resp: true),
     descriptor!(URI_QUERY, "Uri-Query", String, 0..=255, true, req: true, resp: false),
     descriptor!(ACCEPT, "Accept", Uint, 0..=2, false, req: true, resp: false),
     descriptor!(LOCATION_QUERY, "Location-Query", String, 0..=255, true, req: false, resp: true),
     descriptor!(PROXY_URI, "Proxy-Uri", String, 1..=1034, false, req: true, resp: false),
     descriptor!(PROXY_SCHEME, "Proxy-Scheme", String, 1..=255, false, req: true, resp: false),
     descriptor!(SIZE1, "Size1", Uint, 0..=4, false, req: true, resp: true)].into_iter()
                                                                            .for_each(|d| {
                                                                              reg.register(d)
                                                                                 .ok();
                                                                            });

    reg
  }

  /// Add a descriptor to the registry.
  ///
  /// Registering the exact same descriptor twice is fine;
  /// registering a different descriptor under an occupied number is
  /// a [`RegistryConflict`].
  pub fn register(&mut self, desc: OptDescriptor) -> Result<(), RegistryConflict> {
    match self.entries.get(&desc.number) {
      | Some(existing) if existing != &desc => {
        Err(RegistryConflict { number: desc.number })
      },
      | Some(_) => Ok(()),
      | None => {
        self.entries.insert(desc.number, desc);
        Ok(())
      },
    }
  }

  /// Look a number up, yielding its descriptor if anyone
  /// registered one.
  pub fn lookup(&self, number: OptNumber) -> Option<&OptDescriptor> {
    self.entries.get(&number)
  }

  /// Look a number up, synthesizing an
  /// [unrecognized](OptDescriptor::unrecognized) descriptor if
  /// nobody registered one.
  pub fn lookup_or_unrecognized(&self, number: OptNumber) -> OptDescriptor {
    self.lookup(number)
        .copied()
        .unwrap_or_else(|| OptDescriptor::unrecognized(number))
  }
}

/// Encode an unsigned integer option value in the minimum number of
/// big-endian bytes.
///
/// ```
/// use newt_msg::encode_uint;
///
/// assert_eq!(encode_uint(0), vec![]);
/// assert_eq!(encode_uint(60), vec![60]);
/// assert_eq!(encode_uint(1337), vec![0x05, 0x39]);
/// ```
pub fn encode_uint(n: u64) -> Vec<u8> {
  let bytes = n.to_be_bytes();
  let skip = bytes.iter().take_while(|b| **b == 0).count();
  bytes[skip..].to_vec()
}

/// Decode a big-endian unsigned integer option value.
///
/// Zero bytes decode to 0; at most 8 bytes are meaningful.
pub fn decode_uint(bytes: &[u8]) -> Option<u64> {
  if bytes.len() > 8 {
    return None;
  }

  Some(bytes.iter().fold(0u64, |acc, b| acc << 8 | *b as u64))
}
