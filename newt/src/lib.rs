//! `newt` is the message layer of a CoAP implementation: everything
//! between "here are the bytes of a datagram" and "here is a
//! request you should act on."
//!
//! ## What lives here
//! - **Reliability**: confirmable (CON) messages are retransmitted
//!   under binary exponential back-off until acknowledged, reset,
//!   or given up on ([`retry`]).
//! - **Deduplication**: received Message IDs are remembered for the
//!   exchange lifetime; duplicates are dropped and, where we already
//!   answered, the answer is replayed byte-for-byte ([`cache`]).
//! - **Congestion control**: at most NSTART interactions in flight
//!   per peer, and a byte budget (PROBING_RATE) toward peers that
//!   have gone quiet ([`state`]).
//! - **The event loop**: a single-threaded [`core::Core`] that owns
//!   an injected [`net::Transport`] and turns datagrams, deadlines
//!   and submissions into upper-layer happenings.
//!
//! ## What does not
//! Request/response semantics (tokens pairing a response to its
//! request), resource dispatch, URI handling, and transport security
//! all belong to the layers above and below; the types here carry
//! what those layers need (tokens, an opaque security-context id)
//! without interpreting it.
//!
//! Messages themselves come from the [`newt_msg`] crate, re-exported
//! here as [`msg`].

// docs
#![doc(html_root_url = "https://docs.rs/newt/0.1.0")]
// -
// deny
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![cfg_attr(not(test), deny(unsafe_code))]
// -
// warnings
#![cfg_attr(not(test), warn(unreachable_pub))]

#[cfg(test)]
pub(crate) mod test;

/// Low-level message representation (re-export of `newt-msg`)
pub use newt_msg as msg;

/// sent & received Message ID caches
pub mod cache;

/// runtime configuration (transmission parameters)
pub mod config;

/// the event loop
pub mod core;

/// network abstractions
pub mod net;

/// binary exponential back-off for confirmable messages
pub mod retry;

/// per-peer message-layer state
pub mod state;

/// `std` clock & UDP transport
pub mod std;

/// time abstractions
pub mod time;
