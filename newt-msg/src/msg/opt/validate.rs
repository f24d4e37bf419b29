use core::str::from_utf8;

use std_alloc::vec::Vec;

use super::registry::{OptFormat, Registry};
use super::OptNumber;
use crate::msg::{Code, CodeKind, Message, Type};

/// Why a decoded message is unacceptable.
///
/// Wire-valid messages can still be nonsense: a Reset carrying a
/// request code, an Accept option in a response, three Uri-Hosts.
/// These only surface from [`validate`], after decoding succeeded.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ValidationError {
  /// An option nobody registered, whose number marks it critical.
  ///
  /// A receiver must reject the message rather than ignore the
  /// option.
  UnrecognizedCriticalOption {
    /// the offending number
    number: OptNumber,
  },

  /// An option value's length falls outside the bounds its
  /// registration declares.
  #[allow(missing_docs)]
  OptionLength {
    number: OptNumber,
    actual: usize,
    min: usize,
    max: usize,
  },

  /// A non-repeatable option occurred more than once.
  InvalidMultipleOption {
    /// the offending number
    number: OptNumber,
  },

  /// An option occurred in a context (request/response) its
  /// registration forbids.
  InvalidOption {
    /// the offending number
    number: OptNumber,
  },

  /// A string-format option whose bytes are not UTF-8.
  OptionNotUtf8 {
    /// the offending number
    number: OptNumber,
  },

  /// Code classes 1, 3, 6 and 7 are undefined.
  UndefinedCodeClass(Code),

  /// Reset messages must be empty (code 0.00).
  ResetNotEmpty(Code),

  /// Acknowledgements are either empty or carry a response code;
  /// this one carried a request code.
  AckWithRequestCode(Code),
}

/// Check a decoded message against the shape rules of the protocol
/// and the option registry.
///
/// Yields the first problem found. A message that passes is safe to
/// hand to the upper layer.
pub fn validate(msg: &Message, registry: &Registry) -> Result<(), ValidationError> {
  if !msg.code.class_is_defined() {
    return Err(ValidationError::UndefinedCodeClass(msg.code));
  }

  match (msg.ty, msg.code.kind()) {
    | (Type::Reset, kind) if kind != CodeKind::Empty => {
      return Err(ValidationError::ResetNotEmpty(msg.code))
    },
    | (Type::Ack, CodeKind::Request) => {
      return Err(ValidationError::AckWithRequestCode(msg.code))
    },
    | _ => (),
  }

  let kind = msg.code.kind();

  for (number, values) in msg.opts.iter() {
    let desc = match registry.lookup(*number) {
      | Some(desc) => desc,
      | None if number.is_critical() => {
        return Err(ValidationError::UnrecognizedCriticalOption { number: *number })
      },
      // elective & unrecognized; ignore
      | None => continue,
    };

    if values.len() > 1 && !desc.repeatable {
      return Err(ValidationError::InvalidMultipleOption { number: *number });
    }

    let applicable = match kind {
      | CodeKind::Request => desc.in_request,
      | CodeKind::Response => desc.in_response,
      // empty messages have no options at all; the decoder enforces that
      | CodeKind::Empty => true,
    };
    if !applicable {
      return Err(ValidationError::InvalidOption { number: *number });
    }

    for value in values {
      let len = value.0.len();
      if len < desc.min_len || len > desc.max_len {
        return Err(ValidationError::OptionLength { number: *number,
                                                   actual: len,
                                                   min: desc.min_len,
                                                   max: desc.max_len });
      }

      if desc.format == OptFormat::String && from_utf8(&value.0).is_err() {
        return Err(ValidationError::OptionNotUtf8 { number: *number });
      }
    }
  }

  Ok(())
}

/// Strip or repair options whose values are unacceptable but whose
/// number is known, returning the numbers that were touched.
///
/// Repair is only attempted where it is well-defined:
/// - elective options with out-of-bounds or non-UTF-8 values are
///   stripped
/// - supernumerary occurrences of elective non-repeatable options
///   are dropped, keeping the first
///
/// Critical options are never silently altered; they are left in
/// place for [`validate`] to report.
pub fn replace_unacceptable_options(msg: &mut Message, registry: &Registry) -> Vec<OptNumber> {
  let mut touched = Vec::new();

  let numbers: Vec<OptNumber> = msg.opts.keys().copied().collect();

  for number in numbers {
    if number.is_critical() {
      continue;
    }

    let desc = match registry.lookup(number) {
      | Some(desc) => *desc,
      | None => continue,
    };

    let acceptable = |value: &super::OptValue| {
      let len = value.0.len();
      len >= desc.min_len
      && len <= desc.max_len
      && (desc.format != OptFormat::String || from_utf8(&value.0).is_ok())
    };

    let values = match msg.opts.get_mut(&number) {
      | Some(values) => values,
      | None => continue,
    };
    let before = values.len();

    values.retain(acceptable);
    if !desc.repeatable {
      values.truncate(1);
    }

    if values.len() != before {
      touched.push(number);
    }
    if values.is_empty() {
      msg.opts.remove(&number);
    }
  }

  touched
}

#[cfg(test)]
mod tests {
  use super::super::registry::num;
  use super::*;
  use crate::msg::{Id, OptValue, Token};

  fn request() -> Message {
    Message::new(Type::Con, Code::GET, Id(1), Token(Default::default()))
  }

  #[test]
  fn unknown_critical_is_rejected() {
    let mut msg = request();
    msg.add(OptNumber(9), OptValue(vec![1]));

    assert_eq!(validate(&msg, &Registry::core()),
               Err(ValidationError::UnrecognizedCriticalOption { number: OptNumber(9) }));
  }

  #[test]
  fn unknown_elective_is_ignored() {
    let mut msg = request();
    msg.add(OptNumber(1000), OptValue(vec![1]));

    assert_eq!(validate(&msg, &Registry::core()), Ok(()));
  }

  #[test]
  fn length_bounds() {
    let mut msg = request();
    msg.add(num::ETAG, OptValue(vec![0; 9]));

    assert_eq!(validate(&msg, &Registry::core()),
               Err(ValidationError::OptionLength { number: num::ETAG,
                                                   actual: 9,
                                                   min: 1,
                                                   max: 8 }));
  }

  #[test]
  fn multiplicity() {
    let mut msg = request();
    msg.add(num::URI_HOST, OptValue(b"a.com".to_vec()));
    msg.add(num::URI_HOST, OptValue(b"b.com".to_vec()));

    assert_eq!(validate(&msg, &Registry::core()),
               Err(ValidationError::InvalidMultipleOption { number: num::URI_HOST }));

    // Uri-Path however repeats freely
    let mut msg = request();
    msg.add(num::URI_PATH, OptValue(b"a".to_vec()));
    msg.add(num::URI_PATH, OptValue(b"b".to_vec()));
    assert_eq!(validate(&msg, &Registry::core()), Ok(()));
  }

  #[test]
  fn applicability() {
    // Max-Age is response-only
    let mut msg = request();
    msg.add(num::MAX_AGE, OptValue(vec![60]));
    assert_eq!(validate(&msg, &Registry::core()),
               Err(ValidationError::InvalidOption { number: num::MAX_AGE }));

    let mut resp = Message::new(Type::Ack, Code::new(2, 5), Id(1), Token(Default::default()));
    resp.add(num::MAX_AGE, OptValue(vec![60]));
    assert_eq!(validate(&resp, &Registry::core()), Ok(()));
  }

  #[test]
  fn shape_rules() {
    let rst = Message::new(Type::Reset, Code::GET, Id(1), Token(Default::default()));
    assert_eq!(validate(&rst, &Registry::core()),
               Err(ValidationError::ResetNotEmpty(Code::GET)));

    let ack = Message::new(Type::Ack, Code::GET, Id(1), Token(Default::default()));
    assert_eq!(validate(&ack, &Registry::core()),
               Err(ValidationError::AckWithRequestCode(Code::GET)));

    let weird = Message::new(Type::Con, Code::new(7, 1), Id(1), Token(Default::default()));
    assert_eq!(validate(&weird, &Registry::core()),
               Err(ValidationError::UndefinedCodeClass(Code::new(7, 1))));
  }

  #[test]
  fn repair_strips_elective_junk() {
    let mut msg = request();
    msg.add(num::ETAG, OptValue(vec![0; 9])); // elective, too long
    msg.add(num::ETAG, OptValue(vec![1])); // fine
    msg.add(OptNumber(9), OptValue(vec![1])); // critical & unknown: untouchable

    let touched = replace_unacceptable_options(&mut msg, &Registry::core());
    assert_eq!(touched, vec![num::ETAG]);
    assert_eq!(msg.opts.get(&num::ETAG).unwrap(), &vec![OptValue(vec![1])]);
    assert!(msg.opts.contains_key(&OptNumber(9)));
  }

  #[test]
  fn repair_never_touches_critical() {
    let mut msg = request();
    msg.add(num::URI_HOST, OptValue(vec![0xff, 0xfe])); // critical, not utf8

    let touched = replace_unacceptable_options(&mut msg, &Registry::core());
    assert!(touched.is_empty());
    assert!(validate(&msg, &Registry::core()).is_err());
  }
}
