/*!

The operation cache: a memo table keyed by `(opcode, left, right)` that lets the binary
set-algebra operations avoid repeating work over shared subgraphs. It is cleared unconditionally
whenever a collection runs, since node ids can be recycled to unrelated nodes by the following
allocation.

*/

use std::collections::{HashMap, VecDeque};
use crate::node::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
  Union,
  Intersect,
  Difference,
  Multiply,
  Divide,
}

pub trait OperationCache {
  fn get(&self, op: OpCode, left: NodeId, right: NodeId) -> Option<NodeId>;
  fn put(&mut self, op: OpCode, left: NodeId, right: NodeId, result: NodeId);
  fn clear(&mut self);
}

/// A fixed-capacity cache with FIFO eviction. Simple, and good enough: the cache only needs to
/// survive long enough to catch sharing within a single high-level call, not to be a perfect
/// oracle across a whole session.
pub struct BoundedOperationCache {
  capacity: usize,
  map: HashMap<(OpCode, NodeId, NodeId), NodeId>,
  order: VecDeque<(OpCode, NodeId, NodeId)>,
}

impl BoundedOperationCache {
  pub fn new(capacity: usize) -> Self {
    BoundedOperationCache { capacity, map: HashMap::new(), order: VecDeque::new() }
  }
}

impl Default for BoundedOperationCache {
  fn default() -> Self {
    BoundedOperationCache::new(1 << 16)
  }
}

impl OperationCache for BoundedOperationCache {
  fn get(&self, op: OpCode, left: NodeId, right: NodeId) -> Option<NodeId> {
    self.map.get(&(op, left, right)).copied()
  }

  fn put(&mut self, op: OpCode, left: NodeId, right: NodeId, result: NodeId) {
    let key = (op, left, right);
    if self.map.insert(key, result).is_some() {
      return;
    }
    self.order.push_back(key);
    if self.order.len() > self.capacity {
      if let Some(oldest) = self.order.pop_front() {
        self.map.remove(&oldest);
      }
    }
  }

  fn clear(&mut self) {
    self.map.clear();
    self.order.clear();
  }
}
