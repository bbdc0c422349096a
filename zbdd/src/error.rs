use crate::node::{NodeId, Var};

/// Everything that can go wrong calling into an [`Engine`](crate::engine::Engine).
///
/// The public API validates its inputs and returns one of these instead of panicking; the
/// internal `__`-prefixed operations assume their arguments have already been validated by their
/// public wrapper and never construct this type themselves except for [`EngineError::CapacityExhausted`],
/// which can surface from deep inside a recursive operation when growth genuinely has nowhere
/// left to go.
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum EngineError {
  #[error("variable {var} is not valid (last assigned variable is {last_var})")]
  InvalidVar { var: Var, last_var: Var },

  #[error("node id {id} is not a valid zbdd (arena capacity is {capacity})")]
  InvalidZbdd { id: NodeId, capacity: usize },

  #[error("capacity exhausted: {capacity} slots, {requested} more requested by the growth policy and refused")]
  CapacityExhausted { capacity: usize, requested: usize },

  #[error("unsupported operation: {reason}")]
  UnsupportedOperation { reason: &'static str },
}
