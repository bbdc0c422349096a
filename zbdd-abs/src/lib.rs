#![allow(unused)]
/*!

Types/type aliases that abstract over the implementing backing type, shared between the engine
crate and (eventually) any frontend built on top of it.

# Background and Motivation

A motivating example is the `log` module. It could be backed by any of a number of logging
frameworks, or even a bespoke solution. Its (crate) public interface consists only of
`set_global_logging_threshold()`/`get_global_logging_threshold()` and the macros `critical!`,
`error!`, `warning!`, `info!`, `debug!`, and `trace!`. The backing implementation (currently
`tracing`) is encapsulated in the `log` module so swapping it out later only touches this crate.

*/

mod nat_set;
pub mod log;

// Arbitrary precision arithmetic
pub mod numeric;

// For vectors that are expected to have few or zero elements.
pub use smallvec::{SmallVec, smallvec};

// Logging
pub use tracing;

// A set of (small) natural numbers, backed by a bitmap.
pub use nat_set::NatSet;
