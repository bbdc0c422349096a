/*!

A pointer-free, hash-consed Zero-suppressed Binary Decision Diagram engine.

Every `zbdd` this crate hands back is a plain `u32` index into an [`Engine`]'s arena, not a
pointer: the engine is free to relocate, grow, or garbage-collect its backing storage without
invalidating anything a caller holds, and an `Engine` is an ordinary owned value with no global
or thread-local state of its own. A caller that needs to share one engine across threads wraps it
in a mutex itself; nothing inside this crate assumes single-threaded access on its own.

The two permanent nodes, [`EMPTY`](node::EMPTY) (the empty family of sets) and
[`BASE`](node::BASE) (the family containing only the empty set), exist in every engine and are
never collected.

*/

mod cache;
mod callbacks;
mod capacity;
mod engine;
mod error;
mod literal;
mod node;
mod variables;

pub use cache::{BoundedOperationCache, OpCode, OperationCache};
pub use callbacks::CallbackBus;
pub use capacity::{CapacityAdvisor, DefaultCapacityAdvisor, Stats};
pub use engine::{Engine, EngineConfig};
pub use error::EngineError;
pub use literal::LiteralResolver;
pub use node::{NodeId, Var, BASE, EMPTY};
pub use zbdd_abs::numeric::BigUint;
