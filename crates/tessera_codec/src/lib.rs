//! # tessera codec
//!
//! Encodings shared by every tessera store:
//!
//! - [`IndexKey`]: the order-preserving binary form of an indexed scalar.
//!   Byte order of encoded keys equals logical order, so a plain ordered
//!   map of bytes behaves like a typed index:
//!   `null < false < true < numbers < strings`.
//! - Row codec: JSON documents ([`Record`]) to compact CBOR bytes and back,
//!   plus generic [`encode`]/[`decode`] for other serde types.
//! - Casting helpers used by the write path and search engine.
//!
//! ## Usage
//!
//! ```
//! use tessera_codec::IndexKey;
//!
//! let small = IndexKey::Number(9.0).encode().unwrap();
//! let large = IndexKey::Number(10.0).encode().unwrap();
//! let text = IndexKey::Text("1".into()).encode().unwrap();
//! assert!(small < large);
//! assert!(large < text);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cast;
mod error;
mod key;
mod row;

pub use cast::{auto_cast, auto_cast_hash, render_value};
pub use error::{CodecError, CodecResult};
pub use key::{IndexKey, KeyBracket, MAX_KEY_SIZE};
pub use row::{decode, decode_row, encode, encode_row, Record};
