//! Low-level representation of CoAP messages.
//!
//! The most notable item in `newt_msg` is [`Message`]:
//! a CoAP message kept very close to the actual byte layout,
//! together with the option registry ([`Registry`]) used to
//! judge whether a decoded message's options are acceptable.
//!
//! ## Scope
//! This crate explicitly does **not** know or care about how
//! messages are sent and received, and is **just** concerned with
//! the data structures involved on the machines having a CoAP
//! conversation.
//!
//! Reliability, deduplication and congestion control live in the
//! `newt` runtime crate.
//!
//! ## Allocation
//! Messages store their token inline (tokens are at most 8 bytes)
//! and everything else in heap collections; the crate is `no_std`
//! compatible with an allocator.

// docs
#![doc(html_root_url = "https://docs.rs/newt-msg/0.1.0")]
// -
// deny
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![cfg_attr(not(test), deny(unsafe_code))]
// -
// warnings
#![cfg_attr(not(test), warn(unreachable_pub))]
// -
// features
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc as std_alloc;

pub(crate) mod cursor;

/// Message structs
pub mod msg;

#[doc(inline)]
pub use msg::*;

/// A PUT to `/fw` with a one-byte token and a short payload,
/// alongside its hand-assembled wire bytes.
#[cfg(test)]
pub(crate) fn test_msg() -> (Message, std_alloc::vec::Vec<u8>) {
  use std_alloc::vec::Vec;

  let mut bytes: Vec<u8> = Vec::new();
  bytes.push(0x41); // ver 1, CON, tkl 1
  bytes.push(0x02); // 0.02 PUT
  bytes.extend([0x01, 0x02]); // mid 0x0102
  bytes.push(0x21); // token
  bytes.extend([0xB2, b'f', b'w']); // Uri-Path (11), len 2
  bytes.push(0xFF);
  bytes.extend(b"running");

  let mut msg = Message::new(Type::Con,
                             Code::PUT,
                             Id(0x0102),
                             Token(tinyvec::array_vec!([u8; 8] => 0x21)));
  msg.add(num::URI_PATH, OptValue(b"fw".to_vec()));
  msg.payload = Payload(b"running".to_vec());
  (msg, bytes)
}
