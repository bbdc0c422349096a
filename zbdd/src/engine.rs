/*!

The engine: an arena of [`NodeSlot`]s doubling as its own hash-cons table, a reference-counted
free-list, a mark-sweep collector, an operation cache, a callback bus, and a variable registry,
all owned by one plain value with no global state. Construct one, pass it around, drop it like
anything else; a caller that needs to share one across threads wraps it in a `Mutex` itself.

*/

use std::collections::HashMap;

use zbdd_abs::{debug, info, NatSet};
use zbdd_abs::numeric::BigUint;

use crate::cache::{BoundedOperationCache, OpCode, OperationCache};
use crate::callbacks::CallbackBus;
use crate::capacity::{CapacityAdvisor, DefaultCapacityAdvisor, Stats};
use crate::error::EngineError;
use crate::node::{NodeId, NodeSlot, Var, BASE, EMPTY, NIL, NONE_VAR};
use crate::variables::VariableRegistry;

pub struct EngineConfig {
  pub initial_capacity: Option<usize>,
  pub capacity_advisor: Box<dyn CapacityAdvisor>,
  pub operation_cache: Box<dyn OperationCache>,
}

impl Default for EngineConfig {
  fn default() -> Self {
    EngineConfig {
      initial_capacity: None,
      capacity_advisor: Box::new(DefaultCapacityAdvisor),
      operation_cache: Box::new(BoundedOperationCache::default()),
    }
  }
}

pub struct Engine {
  nodes: Vec<NodeSlot>,
  free_head: NodeId,
  free_count: usize,
  dead_count: usize,
  gc_count: u64,
  growth_count: u64,

  mark_bits: NatSet,
  count_memo: HashMap<NodeId, BigUint>,

  variables: VariableRegistry,
  capacity_advisor: Box<dyn CapacityAdvisor>,
  cache: Box<dyn OperationCache>,
  pub callbacks: CallbackBus,
}

impl Engine {
  pub fn new(config: EngineConfig) -> Self {
    let capacity = config.initial_capacity.unwrap_or_else(|| config.capacity_advisor.initial_capacity()).max(2);
    let mut nodes = Vec::with_capacity(capacity);
    nodes.push(NodeSlot::sentinel(EMPTY));
    nodes.push(NodeSlot::sentinel(BASE));
    for _ in 2..capacity {
      nodes.push(NodeSlot::free());
    }
    let mut engine = Engine {
      nodes,
      free_head: NIL,
      free_count: 0,
      dead_count: 0,
      gc_count: 0,
      growth_count: 0,
      mark_bits: NatSet::with_capacity(capacity),
      count_memo: HashMap::new(),
      variables: VariableRegistry::new(),
      capacity_advisor: config.capacity_advisor,
      cache: config.operation_cache,
      callbacks: CallbackBus::new(),
    };
    engine.rehash_all();
    engine
  }

  // ---------------------------------------------------------------- variables

  pub fn declare_variable(&mut self, label: Option<&str>) -> Result<Var, EngineError> {
    self.variables.declare(label)
  }

  pub fn last_var(&self) -> Var {
    self.variables.last_var()
  }

  pub fn variable_name(&self, v: Var) -> Option<&str> {
    self.variables.label(v)
  }

  // ----------------------------------------------------------------- validity

  pub fn is_valid_zbdd(&self, id: NodeId) -> bool {
    (id as usize) < self.nodes.len() && (id < 2 || self.nodes[id as usize].is_occupied())
  }

  pub fn is_valid_var(&self, v: Var) -> bool {
    self.variables.is_valid(v)
  }

  fn check_zbdd(&self, id: NodeId) -> Result<(), EngineError> {
    if self.is_valid_zbdd(id) {
      Ok(())
    } else {
      Err(EngineError::InvalidZbdd { id, capacity: self.nodes.len() })
    }
  }

  fn check_var(&self, v: Var) -> Result<(), EngineError> {
    if self.is_valid_var(v) {
      Ok(())
    } else {
      Err(EngineError::InvalidVar { var: v, last_var: self.variables.last_var() })
    }
  }

  #[inline(always)]
  fn top_var(&self, id: NodeId) -> Var {
    if id < 2 { NONE_VAR } else { self.nodes[id as usize].var }
  }

  #[inline(always)]
  fn children(&self, id: NodeId) -> (NodeId, NodeId) {
    let slot = &self.nodes[id as usize];
    (slot.p0, slot.p1)
  }

  // ----------------------------------------------------------------- refcount

  pub fn inc_ref(&mut self, id: NodeId) {
    if id < 2 {
      return;
    }
    let slot = &mut self.nodes[id as usize];
    match slot.refcount {
      -1 => slot.refcount = 1,
      0 => {
        slot.refcount = 1;
        self.dead_count -= 1;
      }
      k => slot.refcount = k + 1,
    }
  }

  pub fn dec_ref(&mut self, id: NodeId) {
    if id < 2 {
      return;
    }
    let slot = &mut self.nodes[id as usize];
    match slot.refcount {
      1 => {
        slot.refcount = 0;
        self.dead_count += 1;
      }
      k if k > 1 => slot.refcount = k - 1,
      _ => {}
    }
  }

  pub fn ref_count(&self, id: NodeId) -> i32 {
    if id < 2 { i32::MAX } else { self.nodes[id as usize].refcount }
  }

  // ----------------------------------------------------------------- stats

  fn stats(&self) -> Stats {
    let capacity = self.nodes.len();
    Stats {
      capacity,
      free_count: self.free_count,
      dead_count: self.dead_count,
      live_count: capacity.saturating_sub(self.free_count).saturating_sub(self.dead_count).saturating_sub(2),
      gc_count: self.gc_count,
      growth_count: self.growth_count,
    }
  }

  // ----------------------------------------------------------------- hashing

  #[inline(always)]
  fn bucket_hash(var: Var, p0: NodeId, p1: NodeId, capacity: usize) -> usize {
    let h: i64 = (var as i64) * 12_582_917 + (p0 as i64) * 4_256_249 + (p1 as i64) * 741_457;
    h.rem_euclid(capacity as i64) as usize
  }

  /// Rebuilds every hash chain and the free-list from scratch, reading only each slot's
  /// occupied/free state. Used both after a sweep (whose capacity is unchanged) and after growth
  /// (whose capacity, and therefore every hash value, has changed).
  fn rehash_all(&mut self) {
    let capacity = self.nodes.len();
    for slot in &mut self.nodes {
      slot.chain_head = NIL;
    }
    self.free_head = NIL;
    self.free_count = 0;
    for id in (2..capacity as NodeId).rev() {
      if self.nodes[id as usize].is_occupied() {
        let (var, p0, p1) = {
          let s = &self.nodes[id as usize];
          (s.var, s.p0, s.p1)
        };
        let bucket = Self::bucket_hash(var, p0, p1, capacity);
        self.nodes[id as usize].next = self.nodes[bucket].chain_head;
        self.nodes[bucket].chain_head = id;
      } else {
        self.nodes[id as usize].next = self.free_head;
        self.free_head = id;
        self.free_count += 1;
      }
    }
  }

  // ----------------------------------------------------------------- gc & growth

  fn ensure_capacity(&mut self) -> Result<(), EngineError> {
    if self.free_head != NIL {
      return Ok(());
    }
    let stats = self.stats();
    if self.capacity_advisor.gc_required(&stats) {
      self.collect_garbage();
    }
    let stats_after_gc = self.stats();
    if self.free_count < self.capacity_advisor.min_free_after_gc(&stats_after_gc) {
      let increment = self.capacity_advisor.growth_increment(&stats_after_gc);
      if increment == 0 {
        return Err(EngineError::CapacityExhausted { capacity: stats_after_gc.capacity, requested: increment });
      }
      self.grow(increment);
    }
    if self.free_head == NIL {
      return Err(EngineError::CapacityExhausted { capacity: self.nodes.len(), requested: 0 });
    }
    Ok(())
  }

  fn grow(&mut self, increment: usize) {
    let old_capacity = self.nodes.len();
    let new_capacity = old_capacity + increment;
    self.nodes.resize(new_capacity, NodeSlot::free());
    self.mark_bits.reserve_len(new_capacity);
    self.rehash_all();
    self.growth_count += 1;
    info!(1, old_capacity, new_capacity, "arena grown");
    #[cfg(feature = "gc_debug")]
    {
      let stats = self.stats();
      debug!(2, ?stats, "post-growth stats");
    }
  }

  /// Marks every node reachable from a live (`refcount > 0`) root, then releases every unmarked
  /// occupied slot and rebuilds the unique table and free-list.
  pub fn collect_garbage(&mut self) {
    #[cfg(feature = "gc_debug")]
    {
      let stats = self.stats();
      debug!(2, ?stats, "pre-gc stats");
    }
    self.callbacks.fire_before_gc();
    let capacity = self.nodes.len();
    self.mark_bits.clear();
    self.mark_bits.reserve_len(capacity);
    for id in 2..capacity as NodeId {
      if self.nodes[id as usize].is_occupied() && self.nodes[id as usize].refcount > 0 {
        self.mark(id);
      }
    }
    let mut released = 0usize;
    for id in 2..capacity as NodeId {
      if self.nodes[id as usize].is_occupied() && !self.mark_bits.contains(id as usize) {
        self.nodes[id as usize].var = NONE_VAR;
        self.nodes[id as usize].p0 = NIL;
        self.nodes[id as usize].p1 = NIL;
        released += 1;
      }
    }
    self.rehash_all();
    self.dead_count = 0;
    self.gc_count += 1;
    self.cache.clear();
    self.count_memo.clear();
    debug!(2, released, capacity, gc_count = self.gc_count, "gc complete");
    self.callbacks.fire_after_gc();
  }

  fn mark(&mut self, id: NodeId) {
    if id < 2 || self.mark_bits.contains(id as usize) {
      return;
    }
    self.mark_bits.insert(id as usize);
    let (p0, p1) = self.children(id);
    self.mark(p0);
    self.mark(p1);
  }

  /// Drops every node's refcount to fresh/dead state and collects; used to reclaim everything
  /// regardless of liveness, e.g. between independent problems sharing one engine.
  pub fn clear(&mut self) {
    self.callbacks.fire_before_clear();
    let capacity = self.nodes.len();
    for id in 2..capacity as NodeId {
      let slot = &mut self.nodes[id as usize];
      if slot.is_occupied() {
        slot.var = NONE_VAR;
        slot.p0 = NIL;
        slot.p1 = NIL;
        slot.refcount = 0;
      }
    }
    self.dead_count = 0;
    self.rehash_all();
    self.cache.clear();
    self.count_memo.clear();
    self.variables.reset();
    self.callbacks.fire_after_clear();
  }

  // ----------------------------------------------------------------- unique table

  fn alloc_slot(&mut self) -> Result<NodeId, EngineError> {
    self.ensure_capacity()?;
    let id = self.free_head;
    debug_assert!(id != NIL, "ensure_capacity returned Ok but the free-list is still empty");
    self.free_head = self.nodes[id as usize].next;
    self.free_count -= 1;
    Ok(id)
  }

  fn get_node(&mut self, var: Var, p0: NodeId, p1: NodeId) -> Result<NodeId, EngineError> {
    if p1 == EMPTY {
      return Ok(p0);
    }
    let capacity = self.nodes.len();
    let bucket = Self::bucket_hash(var, p0, p1, capacity);
    let mut cur = self.nodes[bucket].chain_head;
    while cur != NIL {
      let slot = &self.nodes[cur as usize];
      if slot.var == var && slot.p0 == p0 && slot.p1 == p1 {
        return Ok(cur);
      }
      cur = slot.next;
    }
    let id = self.alloc_slot()?;
    let capacity = self.nodes.len();
    let bucket = Self::bucket_hash(var, p0, p1, capacity);
    self.nodes[id as usize] = NodeSlot {
      var,
      p0,
      p1,
      next: self.nodes[bucket].chain_head,
      chain_head: NIL,
      refcount: -1,
    };
    self.nodes[bucket].chain_head = id;
    Ok(id)
  }

  /// Public constructor for a single node, validating its arguments first.
  pub fn make_node(&mut self, var: Var, p0: NodeId, p1: NodeId) -> Result<NodeId, EngineError> {
    self.check_var(var)?;
    self.check_zbdd(p0)?;
    self.check_zbdd(p1)?;
    if self.top_var(p0) >= var || self.top_var(p1) >= var {
      return Err(EngineError::UnsupportedOperation { reason: "child variable must be strictly below the parent's" });
    }
    self.get_node(var, p0, p1)
  }

  // ----------------------------------------------------------------- algebra

  pub fn cube(&mut self, vars: &[Var]) -> Result<NodeId, EngineError> {
    for &v in vars {
      self.check_var(v)?;
    }
    let mut sorted: Vec<Var> = vars.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    let mut z = BASE;
    for v in sorted {
      self.inc_ref(z);
      let next = self.get_node(v, EMPTY, z);
      self.dec_ref(z);
      z = next?;
    }
    Ok(z)
  }

  pub fn subset0(&mut self, z: NodeId, v: Var) -> Result<NodeId, EngineError> {
    self.check_zbdd(z)?;
    self.check_var(v)?;
    self.__subset0(z, v)
  }

  fn __subset0(&mut self, z: NodeId, v: Var) -> Result<NodeId, EngineError> {
    let top = self.top_var(z);
    if top < v {
      Ok(z)
    } else if top == v {
      Ok(self.children(z).0)
    } else {
      let (p0, p1) = self.children(z);
      let r0 = self.__subset0(p0, v)?;
      self.inc_ref(r0);
      let r1 = self.__subset0(p1, v)?;
      self.inc_ref(r1);
      let result = self.get_node(top, r0, r1);
      self.dec_ref(r0);
      self.dec_ref(r1);
      result
    }
  }

  pub fn subset1(&mut self, z: NodeId, v: Var) -> Result<NodeId, EngineError> {
    self.check_zbdd(z)?;
    self.check_var(v)?;
    self.__subset1(z, v)
  }

  fn __subset1(&mut self, z: NodeId, v: Var) -> Result<NodeId, EngineError> {
    let top = self.top_var(z);
    if top < v {
      Ok(EMPTY)
    } else if top == v {
      Ok(self.children(z).1)
    } else {
      let (p0, p1) = self.children(z);
      let r0 = self.__subset1(p0, v)?;
      self.inc_ref(r0);
      let r1 = self.__subset1(p1, v)?;
      self.inc_ref(r1);
      let result = self.get_node(top, r0, r1);
      self.dec_ref(r0);
      self.dec_ref(r1);
      result
    }
  }

  pub fn change(&mut self, z: NodeId, v: Var) -> Result<NodeId, EngineError> {
    self.check_zbdd(z)?;
    self.check_var(v)?;
    self.__change(z, v)
  }

  fn __change(&mut self, z: NodeId, v: Var) -> Result<NodeId, EngineError> {
    let top = self.top_var(z);
    if top < v {
      self.get_node(v, EMPTY, z)
    } else if top == v {
      let (p0, p1) = self.children(z);
      self.get_node(top, p1, p0)
    } else {
      let (p0, p1) = self.children(z);
      let r0 = self.__change(p0, v)?;
      self.inc_ref(r0);
      let r1 = self.__change(p1, v)?;
      self.inc_ref(r1);
      let result = self.get_node(top, r0, r1);
      self.dec_ref(r0);
      self.dec_ref(r1);
      result
    }
  }

  pub fn union(&mut self, p: NodeId, q: NodeId) -> Result<NodeId, EngineError> {
    self.check_zbdd(p)?;
    self.check_zbdd(q)?;
    self.__union(p, q)
  }

  fn __union(&mut self, p: NodeId, q: NodeId) -> Result<NodeId, EngineError> {
    if p == EMPTY {
      return Ok(q);
    }
    if q == EMPTY {
      return Ok(p);
    }
    if p == q {
      return Ok(p);
    }
    let (key_left, key_right) = if p <= q { (p, q) } else { (q, p) };
    if let Some(hit) = self.cache.get(OpCode::Union, key_left, key_right) {
      return Ok(hit);
    }
    let tp = self.top_var(p);
    let tq = self.top_var(q);
    let result = if tp == tq {
      let (p0, p1) = self.children(p);
      let (q0, q1) = self.children(q);
      let r0 = self.__union(p0, q0)?;
      self.inc_ref(r0);
      let r1 = self.__union(p1, q1)?;
      self.inc_ref(r1);
      let result = self.get_node(tp, r0, r1);
      self.dec_ref(r0);
      self.dec_ref(r1);
      result
    } else if tp > tq {
      let (p0, p1) = self.children(p);
      let r0 = self.__union(p0, q)?;
      self.inc_ref(r0);
      let result = self.get_node(tp, r0, p1);
      self.dec_ref(r0);
      result
    } else {
      let (q0, q1) = self.children(q);
      let r0 = self.__union(p, q0)?;
      self.inc_ref(r0);
      let result = self.get_node(tq, r0, q1);
      self.dec_ref(r0);
      result
    }?;
    self.cache.put(OpCode::Union, key_left, key_right, result);
    Ok(result)
  }

  pub fn intersect(&mut self, p: NodeId, q: NodeId) -> Result<NodeId, EngineError> {
    self.check_zbdd(p)?;
    self.check_zbdd(q)?;
    self.__intersect(p, q)
  }

  fn __intersect(&mut self, p: NodeId, q: NodeId) -> Result<NodeId, EngineError> {
    if p == EMPTY || q == EMPTY {
      return Ok(EMPTY);
    }
    if p == q {
      return Ok(p);
    }
    let (key_left, key_right) = if p <= q { (p, q) } else { (q, p) };
    if let Some(hit) = self.cache.get(OpCode::Intersect, key_left, key_right) {
      return Ok(hit);
    }
    let tp = self.top_var(p);
    let tq = self.top_var(q);
    let result = if tp == tq {
      let (p0, p1) = self.children(p);
      let (q0, q1) = self.children(q);
      let r0 = self.__intersect(p0, q0)?;
      self.inc_ref(r0);
      let r1 = self.__intersect(p1, q1)?;
      self.inc_ref(r1);
      let result = self.get_node(tp, r0, r1);
      self.dec_ref(r0);
      self.dec_ref(r1);
      result
    } else if tp > tq {
      let (p0, _p1) = self.children(p);
      self.__intersect(p0, q)
    } else {
      let (q0, _q1) = self.children(q);
      self.__intersect(p, q0)
    }?;
    self.cache.put(OpCode::Intersect, key_left, key_right, result);
    Ok(result)
  }

  pub fn difference(&mut self, p: NodeId, q: NodeId) -> Result<NodeId, EngineError> {
    self.check_zbdd(p)?;
    self.check_zbdd(q)?;
    self.__difference(p, q)
  }

  fn __difference(&mut self, p: NodeId, q: NodeId) -> Result<NodeId, EngineError> {
    if p == EMPTY || p == q {
      return Ok(EMPTY);
    }
    if q == EMPTY {
      return Ok(p);
    }
    if let Some(hit) = self.cache.get(OpCode::Difference, p, q) {
      return Ok(hit);
    }
    let tp = self.top_var(p);
    let tq = self.top_var(q);
    let result = if tp == tq {
      let (p0, p1) = self.children(p);
      let (q0, q1) = self.children(q);
      let r0 = self.__difference(p0, q0)?;
      self.inc_ref(r0);
      let r1 = self.__difference(p1, q1)?;
      self.inc_ref(r1);
      let result = self.get_node(tp, r0, r1);
      self.dec_ref(r0);
      self.dec_ref(r1);
      result
    } else if tp > tq {
      let (p0, p1) = self.children(p);
      let r0 = self.__difference(p0, q)?;
      self.inc_ref(r0);
      let result = self.get_node(tp, r0, p1);
      self.dec_ref(r0);
      result
    } else {
      let (q0, _q1) = self.children(q);
      self.__difference(p, q0)
    }?;
    self.cache.put(OpCode::Difference, p, q, result);
    Ok(result)
  }

  pub fn multiply(&mut self, p: NodeId, q: NodeId) -> Result<NodeId, EngineError> {
    self.check_zbdd(p)?;
    self.check_zbdd(q)?;
    self.__multiply(p, q)
  }

  fn __multiply(&mut self, p: NodeId, q: NodeId) -> Result<NodeId, EngineError> {
    if p == EMPTY || q == EMPTY {
      return Ok(EMPTY);
    }
    if p == BASE {
      return Ok(q);
    }
    if q == BASE {
      return Ok(p);
    }
    let (key_left, key_right) = if p <= q { (p, q) } else { (q, p) };
    if let Some(hit) = self.cache.get(OpCode::Multiply, key_left, key_right) {
      return Ok(hit);
    }
    let tp = self.top_var(p);
    let tq = self.top_var(q);
    let result = if tp == tq {
      let v = tp;
      let p0 = self.__subset0(p, v)?;
      self.inc_ref(p0);
      let p1 = self.__subset1(p, v)?;
      self.inc_ref(p1);
      let q0 = self.__subset0(q, v)?;
      self.inc_ref(q0);
      let q1 = self.__subset1(q, v)?;
      self.inc_ref(q1);

      let r0 = self.__multiply(p0, q0)?;
      self.inc_ref(r0);
      let a = self.__multiply(p0, q1)?;
      self.inc_ref(a);
      let b = self.__multiply(p1, q0)?;
      self.inc_ref(b);
      let c = self.__multiply(p1, q1)?;
      self.inc_ref(c);

      let u1 = self.__union(a, b)?;
      self.inc_ref(u1);
      let u2 = self.__union(u1, c)?;
      self.inc_ref(u2);

      let result = self.get_node(v, r0, u2);

      self.dec_ref(p0);
      self.dec_ref(p1);
      self.dec_ref(q0);
      self.dec_ref(q1);
      self.dec_ref(r0);
      self.dec_ref(a);
      self.dec_ref(b);
      self.dec_ref(c);
      self.dec_ref(u1);
      self.dec_ref(u2);
      result
    } else if tp > tq {
      let (p0, p1) = self.children(p);
      let r0 = self.__multiply(p0, q)?;
      self.inc_ref(r0);
      let r1 = self.__multiply(p1, q)?;
      self.inc_ref(r1);
      let result = self.get_node(tp, r0, r1);
      self.dec_ref(r0);
      self.dec_ref(r1);
      result
    } else {
      let (q0, q1) = self.children(q);
      let r0 = self.__multiply(p, q0)?;
      self.inc_ref(r0);
      let r1 = self.__multiply(p, q1)?;
      self.inc_ref(r1);
      let result = self.get_node(tq, r0, r1);
      self.dec_ref(r0);
      self.dec_ref(r1);
      result
    }?;
    self.cache.put(OpCode::Multiply, key_left, key_right, result);
    Ok(result)
  }

  pub fn divide(&mut self, p: NodeId, q: NodeId) -> Result<NodeId, EngineError> {
    self.check_zbdd(p)?;
    self.check_zbdd(q)?;
    self.__divide(p, q)
  }

  fn __divide(&mut self, p: NodeId, q: NodeId) -> Result<NodeId, EngineError> {
    // p == q (including p == q == BASE) and q == BASE must be checked ahead of the p-is-terminal
    // shortcut below, or divide(BASE, BASE) would wrongly fall through to EMPTY.
    if p == q {
      return Ok(BASE);
    }
    if q == BASE {
      return Ok(p);
    }
    if p < 2 {
      return Ok(EMPTY);
    }
    // Division by the empty family is vacuous: there is no factor to divide out. This completes
    // an input combination the written contract leaves implicit.
    if q == EMPTY {
      return Ok(EMPTY);
    }
    if let Some(hit) = self.cache.get(OpCode::Divide, p, q) {
      return Ok(hit);
    }
    let v = self.top_var(q);
    let p1 = self.__subset1(p, v)?;
    self.inc_ref(p1);
    let q1 = self.__subset1(q, v)?;
    self.inc_ref(q1);
    let r1 = self.__divide(p1, q1)?;
    self.dec_ref(p1);
    self.dec_ref(q1);

    let result = if r1 == EMPTY {
      Ok(EMPTY)
    } else {
      self.inc_ref(r1);
      let q0 = self.__subset0(q, v)?;
      let result = if q0 != EMPTY {
        self.inc_ref(q0);
        let p0 = self.__subset0(p, v)?;
        self.inc_ref(p0);
        let r0 = self.__divide(p0, q0)?;
        self.inc_ref(r0);
        let result = self.__intersect(r1, r0);
        self.dec_ref(p0);
        self.dec_ref(q0);
        self.dec_ref(r0);
        result
      } else {
        Ok(r1)
      };
      self.dec_ref(r1);
      result
    }?;
    self.cache.put(OpCode::Divide, p, q, result);
    Ok(result)
  }

  pub fn modulo(&mut self, p: NodeId, q: NodeId) -> Result<NodeId, EngineError> {
    self.check_zbdd(p)?;
    self.check_zbdd(q)?;
    let d = self.__divide(p, q)?;
    self.inc_ref(d);
    let m = self.__multiply(q, d);
    self.dec_ref(d);
    let m = m?;
    self.inc_ref(m);
    let result = self.__difference(p, m);
    self.dec_ref(m);
    result
  }

  pub fn atomize(&mut self, z: NodeId) -> Result<NodeId, EngineError> {
    self.check_zbdd(z)?;
    self.__atomize(z)
  }

  fn __atomize(&mut self, z: NodeId) -> Result<NodeId, EngineError> {
    if z < 2 {
      return Ok(EMPTY);
    }
    let (v, p0, p1) = {
      let s = &self.nodes[z as usize];
      (s.var, s.p0, s.p1)
    };
    let a0 = self.__atomize(p0)?;
    self.inc_ref(a0);
    let a1 = self.__atomize(p1)?;
    self.inc_ref(a1);
    // The atom for `v` itself is built directly rather than via a general union of a singleton
    // cube, since we already know its shape: a single node whose 1-branch is BASE.
    let atom_v = self.get_node(v, EMPTY, BASE)?;
    self.inc_ref(atom_v);
    let u1 = self.__union(a0, a1)?;
    self.inc_ref(u1);
    let result = self.__union(u1, atom_v);
    self.dec_ref(a0);
    self.dec_ref(a1);
    self.dec_ref(atom_v);
    self.dec_ref(u1);
    result
  }

  pub fn remove_base(&mut self, z: NodeId) -> Result<NodeId, EngineError> {
    self.check_zbdd(z)?;
    self.__remove_base(z)
  }

  fn __remove_base(&mut self, z: NodeId) -> Result<NodeId, EngineError> {
    if z < 2 {
      return Ok(EMPTY);
    }
    let (v, p0, p1) = {
      let s = &self.nodes[z as usize];
      (s.var, s.p0, s.p1)
    };
    let new_p0 = self.__remove_base(p0)?;
    if new_p0 == p0 {
      Ok(z)
    } else {
      self.inc_ref(new_p0);
      let result = self.get_node(v, new_p0, p1);
      self.dec_ref(new_p0);
      result
    }
  }

  pub fn contains(&mut self, p: NodeId, q: NodeId) -> Result<bool, EngineError> {
    self.check_zbdd(p)?;
    self.check_zbdd(q)?;
    if p == EMPTY || q == EMPTY {
      return Ok(false);
    }
    if p == q {
      return Ok(true);
    }
    let inter = self.__intersect(p, q)?;
    Ok(inter == q)
  }

  pub fn count(&mut self, z: NodeId) -> Result<BigUint, EngineError> {
    self.check_zbdd(z)?;
    self.__count(z)
  }

  fn __count(&mut self, z: NodeId) -> Result<BigUint, EngineError> {
    if z < 2 {
      return Ok(BigUint::from(z));
    }
    if let Some(c) = self.count_memo.get(&z) {
      return Ok(c.clone());
    }
    let (p0, p1) = self.children(z);
    let c0 = self.__count(p0)?;
    let c1 = self.__count(p1)?;
    let total = c0 + c1;
    self.count_memo.insert(z, total.clone());
    Ok(total)
  }

  // ----------------------------------------------------------------- traversal

  /// Depth-first enumeration of every cube (ascending slice of variables) represented by `z`.
  /// `visitor` returns `false` to stop the walk early.
  pub fn visit_cubes(&self, z: NodeId, mut visitor: impl FnMut(&[Var]) -> bool) -> Result<(), EngineError> {
    self.check_zbdd(z)?;
    let mut stack = Vec::new();
    self.visit_cubes_rec(z, &mut stack, &mut visitor);
    Ok(())
  }

  fn visit_cubes_rec(&self, z: NodeId, stack: &mut Vec<Var>, visitor: &mut dyn FnMut(&[Var]) -> bool) -> bool {
    if z == EMPTY {
      return true;
    }
    if z == BASE {
      return visitor(stack);
    }
    let (p0, p1) = self.children(z);
    stack.push(self.nodes[z as usize].var);
    let keep_going = self.visit_cubes_rec(p1, stack, visitor);
    stack.pop();
    if !keep_going {
      return false;
    }
    self.visit_cubes_rec(p0, stack, visitor)
  }

  /// A topological order (descendants before ancestors) over every occupied node, computed by
  /// repeatedly peeling off nodes whose children have already been placed.
  pub fn calculate_node_dependency(&mut self) -> Vec<NodeId> {
    self.collect_garbage();
    let capacity = self.nodes.len();
    let mut placed: NatSet = NatSet::with_capacity(capacity);
    let mut order = Vec::new();
    let mut remaining: Vec<NodeId> = (2..capacity as NodeId).filter(|&id| self.nodes[id as usize].is_occupied()).collect();
    while !remaining.is_empty() {
      let mut next_remaining = Vec::with_capacity(remaining.len());
      let mut progressed = false;
      for id in remaining {
        let (p0, p1) = self.children(id);
        let ready = (p0 < 2 || placed.contains(p0 as usize)) && (p1 < 2 || placed.contains(p1 as usize));
        if ready {
          placed.insert(id as usize);
          order.push(id);
          progressed = true;
        } else {
          next_remaining.push(id);
        }
      }
      remaining = next_remaining;
      if !progressed && !remaining.is_empty() {
        // Every valid zbdd is acyclic, so this cannot happen; guard against an infinite loop
        // from a corrupted arena rather than spinning forever.
        break;
      }
    }
    order
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use rand::Rng;

  fn fresh() -> Engine {
    Engine::new(EngineConfig::default())
  }

  fn capped(capacity: usize) -> Engine {
    Engine::new(EngineConfig { initial_capacity: Some(capacity), ..EngineConfig::default() })
  }

  #[test]
  fn singleton_canonicity() {
    let mut e = fresh();
    let v1 = e.declare_variable(None).unwrap();
    let n1 = e.cube(&[v1]).unwrap();
    let n2 = e.cube(&[v1]).unwrap();
    assert_eq!(n1, n2);
    assert_eq!(e.top_var(n1), v1);
    assert_eq!(e.children(n1), (EMPTY, BASE));
  }

  #[test]
  fn count_of_a_five_cube_family() {
    let mut e = fresh();
    let a = e.declare_variable(None).unwrap();
    let b = e.declare_variable(None).unwrap();
    let c = e.declare_variable(None).unwrap();
    let cab = e.cube(&[a, b]).unwrap();
    let cb = e.cube(&[b]).unwrap();
    let cc = e.cube(&[c]).unwrap();
    let cac = e.cube(&[a, c]).unwrap();
    let mut r = e.union(cab, cb).unwrap();
    r = e.union(r, cc).unwrap();
    r = e.union(r, cac).unwrap();
    r = e.union(r, BASE).unwrap();
    assert_eq!(e.count(r).unwrap(), BigUint::from(5u32));
    assert!(e.contains(r, BASE).unwrap());
  }

  #[test]
  fn multiply_matches_paper() {
    let mut e = fresh();
    let a = e.declare_variable(None).unwrap();
    let b = e.declare_variable(None).unwrap();
    let c = e.declare_variable(None).unwrap();
    let cab = e.cube(&[a, b]).unwrap();
    let cb = e.cube(&[b]).unwrap();
    let cc = e.cube(&[c]).unwrap();
    let mut p = e.union(cab, cb).unwrap();
    p = e.union(p, cc).unwrap();
    let q = e.union(cab, BASE).unwrap();

    let got = e.multiply(p, q).unwrap();

    let cabc = e.cube(&[a, b, c]).unwrap();
    let mut expected = e.union(cab, cabc).unwrap();
    expected = e.union(expected, cb).unwrap();
    expected = e.union(expected, cc).unwrap();

    assert_eq!(got, expected);
    assert_eq!(e.count(got).unwrap(), BigUint::from(4u32));
  }

  #[test]
  fn remove_base_scenario() {
    let mut e = fresh();
    let a = e.declare_variable(None).unwrap();
    let b = e.declare_variable(None).unwrap();
    let c = e.declare_variable(None).unwrap();
    let cab = e.cube(&[a, b]).unwrap();
    let cb = e.cube(&[b]).unwrap();
    let cc = e.cube(&[c]).unwrap();
    let cac = e.cube(&[a, c]).unwrap();
    let mut z = e.union(cab, cb).unwrap();
    z = e.union(z, cc).unwrap();
    z = e.union(z, cac).unwrap();

    let with_base = e.union(z, BASE).unwrap();
    assert_eq!(e.remove_base(with_base).unwrap(), z);
    assert_eq!(e.remove_base(BASE).unwrap(), EMPTY);
  }

  /// Enumerates n-queens solutions by plain backtracking (no ZBDD involved in the search itself)
  /// and folds each solution into the family as a cube, so the assertion exercises `union` and
  /// `count` over a realistically large, deeply shared DAG rather than a hand-picked tiny one.
  fn n_queens_family(e: &mut Engine, n: usize) -> NodeId {
    let vars: Vec<Vec<Var>> = (0..n).map(|_| (0..n).map(|_| e.declare_variable(None).unwrap()).collect()).collect();

    fn backtrack(n: usize, row: usize, cols: &mut Vec<usize>, solutions: &mut Vec<Vec<usize>>) {
      if row == n {
        solutions.push(cols.clone());
        return;
      }
      'col: for c in 0..n {
        for (r, &pc) in cols.iter().enumerate() {
          if pc == c || (r as isize - row as isize).abs() == (pc as isize - c as isize).abs() {
            continue 'col;
          }
        }
        cols.push(c);
        backtrack(n, row + 1, cols, solutions);
        cols.pop();
      }
    }

    let mut solutions = Vec::new();
    backtrack(n, 0, &mut Vec::new(), &mut solutions);

    let mut family = EMPTY;
    for solution in &solutions {
      let combo: Vec<Var> = solution.iter().enumerate().map(|(row, &col)| vars[row][col]).collect();
      let c = e.cube(&combo).unwrap();
      e.inc_ref(family);
      let next = e.union(family, c).unwrap();
      e.dec_ref(family);
      family = next;
    }
    family
  }

  #[test]
  fn n_queens_counts() {
    let expected = [(4usize, 2u32), (5, 10), (6, 4), (7, 40), (8, 92)];
    for (n, expected_count) in expected {
      let mut e = fresh();
      let family = n_queens_family(&mut e, n);
      assert_eq!(e.count(family).unwrap(), BigUint::from(expected_count), "n = {n}");
    }
  }

  #[test]
  fn gc_preserves_live_roots() {
    let mut e = capped(128);
    let a = e.declare_variable(None).unwrap();
    let b = e.declare_variable(None).unwrap();
    let c = e.declare_variable(None).unwrap();
    let r = e.cube(&[a, b, c]).unwrap();
    e.inc_ref(r);

    // Generate well over a hundred transient intermediates that are never kept live, forcing at
    // least one collection (and likely growth) before this loop finishes.
    for i in 0..200u32 {
      let v = ((i % 3) + 1) as Var;
      let _ = e.change(r, v).unwrap();
    }

    let (p0, p1) = e.children(r);
    assert_eq!(e.top_var(r), a);
    assert_eq!(p0, EMPTY);
    assert!(e.is_valid_zbdd(p1));
    assert_eq!(e.count(r).unwrap(), BigUint::from(1u32));
  }

  #[test]
  fn commutativity_and_associativity() {
    let mut rng = rand::thread_rng();
    for _ in 0..20 {
      let mut e = fresh();
      let vars: Vec<Var> = (0..5).map(|_| e.declare_variable(None).unwrap()).collect();
      let random_family = |e: &mut Engine, rng: &mut rand::rngs::ThreadRng| -> NodeId {
        let mut z = EMPTY;
        for _ in 0..rng.gen_range(1..6) {
          let k = rng.gen_range(1..=vars.len());
          let chosen: Vec<Var> = {
            let mut v = vars.clone();
            v.truncate(k);
            v
          };
          let c = e.cube(&chosen).unwrap();
          e.inc_ref(z);
          let next = e.union(z, c).unwrap();
          e.dec_ref(z);
          z = next;
        }
        z
      };
      let p = random_family(&mut e, &mut rng);
      let q = random_family(&mut e, &mut rng);
      let s = random_family(&mut e, &mut rng);

      assert_eq!(e.union(p, q).unwrap(), e.union(q, p).unwrap());
      assert_eq!(e.intersect(p, q).unwrap(), e.intersect(q, p).unwrap());
      assert_eq!(e.multiply(p, q).unwrap(), e.multiply(q, p).unwrap());

      let lhs = e.union(e.union(p, q).unwrap(), s).unwrap();
      let rhs = e.union(p, e.union(q, s).unwrap()).unwrap();
      assert_eq!(lhs, rhs);

      let lhs = e.intersect(e.intersect(p, q).unwrap(), s).unwrap();
      let rhs = e.intersect(p, e.intersect(q, s).unwrap()).unwrap();
      assert_eq!(lhs, rhs);

      let lhs = e.multiply(e.multiply(p, q).unwrap(), s).unwrap();
      let rhs = e.multiply(p, e.multiply(q, s).unwrap()).unwrap();
      assert_eq!(lhs, rhs);

      let absorbed = e.intersect(p, q).unwrap();
      assert_eq!(e.union(p, absorbed).unwrap(), p);

      assert_eq!(e.difference(p, p).unwrap(), EMPTY);
      assert_eq!(e.difference(p, EMPTY).unwrap(), p);
      assert_eq!(e.difference(EMPTY, p).unwrap(), EMPTY);

      let union_count = e.count(e.union(p, q).unwrap()).unwrap();
      let intersect_count = e.count(e.intersect(p, q).unwrap()).unwrap();
      let p_count = e.count(p).unwrap();
      let q_count = e.count(q).unwrap();
      assert_eq!(union_count + intersect_count, p_count + q_count);

      assert_eq!(e.contains(p, q).unwrap(), e.union(p, q).unwrap() == p);

      let atomized_once = e.atomize(p).unwrap();
      let atomized_twice = e.atomize(atomized_once).unwrap();
      assert_eq!(atomized_once, atomized_twice);
    }
  }

  #[test]
  fn division_round_trip_when_exact() {
    let mut e = fresh();
    let a = e.declare_variable(None).unwrap();
    let b = e.declare_variable(None).unwrap();
    let c = e.declare_variable(None).unwrap();
    let cb = e.cube(&[b]).unwrap();
    let q = cb; // divisor: {b}
    let cab = e.cube(&[a, b]).unwrap();
    let cac = e.cube(&[a, c]).unwrap();
    // p = {a,b} ∪ {a,c}: dividing by {b} yields {a} exactly (with {a,c} as the remainder/modulo).
    let p = e.union(cab, cac).unwrap();

    let d = e.divide(p, q).unwrap();
    let m = e.modulo(p, q).unwrap();
    let qd = e.multiply(q, d).unwrap();
    let roundtrip = e.union(qd, m).unwrap();
    assert_eq!(roundtrip, p);
  }

  #[test]
  fn divide_sentinel_operands() {
    let mut e = fresh();
    let a = e.declare_variable(None).unwrap();
    let ca = e.cube(&[a]).unwrap();

    // Any family divided by itself is BASE, including the degenerate p == q == BASE case.
    assert_eq!(e.divide(BASE, BASE).unwrap(), BASE);
    assert_eq!(e.divide(ca, ca).unwrap(), BASE);
    assert_eq!(e.divide(EMPTY, EMPTY).unwrap(), BASE);

    // Dividing by BASE returns the dividend unchanged.
    assert_eq!(e.divide(ca, BASE).unwrap(), ca);
    assert_eq!(e.divide(EMPTY, BASE).unwrap(), EMPTY);

    // Dividing by EMPTY is vacuous.
    assert_eq!(e.divide(ca, EMPTY).unwrap(), EMPTY);

    // BASE has no factor other than itself.
    assert_eq!(e.divide(BASE, ca).unwrap(), EMPTY);
  }
}
