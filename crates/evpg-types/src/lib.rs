//! # evpg-types
//!
//! Query parameter encoding for the evpg connection pool.
//!
//! A [`ParamSet`] is the ordered array of parameters handed to the wire
//! protocol alongside the query text. Every entry carries its value bytes,
//! a [`Format`] tag and a type [`Oid`], which is exactly the shape the
//! PostgreSQL extended-query calls expect.
//!
//! ## Encoding rules
//!
//! - Text values are stored as-is, tagged [`Format::Text`], with a length
//!   equal to their byte length.
//! - Integers (`i16`, `i32`, `i64`) and floats (`f32`, `f64`) are tagged
//!   [`Format::Binary`] and stored big-endian regardless of host byte order.
//!   Floats go through their IEEE-754 bit pattern, never through decimal
//!   formatting.
//! - Raw bytes are stored as-is, tagged [`Format::Binary`] with the
//!   `bytea` type id.
//! - `None` produces a NULL parameter.
//!
//! ## Example
//!
//! ```
//! use evpg_types::{Format, Oid, ParamSet};
//!
//! let mut params = ParamSet::with_capacity(2, 16);
//! params.add("Joe").add(42_i32);
//!
//! assert_eq!(params.len(), 2);
//! let second = params.get(1).unwrap();
//! assert_eq!(second.format(), Format::Binary);
//! assert_eq!(second.oid(), Oid::INT4);
//! assert_eq!(second.value(), Some(&[0, 0, 0, 42][..]));
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod oid;
pub mod params;
pub mod to_param;

pub use error::ParamError;
pub use oid::Oid;
pub use params::{Format, ParamRef, ParamSet};
pub use to_param::{IsNull, ToParam};
