//! Wire-level codec shared by the OpenSMTPD filter and table engines.
//!
//! The host speaks a line-oriented protocol over the extension's stdio:
//! fields are separated by `|`, lines by `\n`, and the final logical field
//! of a line is allowed to contain further `|` characters. This crate
//! holds the pieces both engines need: field splitting and joining,
//! fractional-seconds timestamp parsing, and the peer address syntax used
//! by `link-connect` and the `connect` filter request.

pub mod address;
pub mod line;
pub mod timestamp;

pub use address::{AddressParseError, PeerAddress};
pub use line::{join, split, split_min, FieldCountError};
pub use timestamp::{parse_timestamp, TimestampParseError};
