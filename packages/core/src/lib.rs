//! Core capsula types: the narrow waist of the capsula stack.
//!
//! Everything at this level is plain data - the dynamically-typed [`Value`]
//! tree that flows through ports and data cells, the [`Flow`] outcome of a
//! port filter, and the [`Error`] taxonomy with its stable numeric codes.
//! No execution semantics live here; those belong to `capsula-runtime`.
//!
//! # Example
//!
//! ```rust
//! use capsula_core::{Value, Args};
//!
//! let args: Args = vec![Value::from("hello"), Value::from(42)];
//! assert_eq!(args[1].as_integer(), Some(42));
//! ```

mod error;
mod value;

pub use error::{Error, Result};
pub use value::{Args, Flow, Value};
