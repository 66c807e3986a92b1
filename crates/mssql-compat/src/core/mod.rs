//! Core value types shared by the dialect pipeline and the executor.
//!
//! - [`value`]: [`Scalar`] parameters and [`Row`] results

pub mod value;

pub use value::{Row, RowSet, Scalar};
