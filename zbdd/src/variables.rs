/*!

The variable registry: a monotonically increasing counter of assigned variables, plus an optional
per-variable display label. This is the entire state needed to answer "is this a variable this
engine knows about" and "what should I call it when printing a cube".

*/

use crate::error::EngineError;
use crate::node::{Var, NONE_VAR};

#[derive(Default)]
pub struct VariableRegistry {
  last_var: Var,
  labels: Vec<Option<Box<str>>>,
}

impl VariableRegistry {
  pub fn new() -> Self {
    VariableRegistry { last_var: NONE_VAR, labels: Vec::new() }
  }

  /// Assigns and returns the next variable, optionally tagging it with a display label. Fails
  /// once the variable counter has reached `Var::MAX` and cannot be incremented further.
  pub fn declare(&mut self, label: Option<&str>) -> Result<Var, EngineError> {
    if self.last_var == Var::MAX {
      return Err(EngineError::InvalidVar { var: Var::MAX, last_var: self.last_var });
    }
    self.last_var += 1;
    self.labels.push(label.map(|s| s.into()));
    Ok(self.last_var)
  }

  /// Resets the counter and every label as if the registry were newly constructed, without
  /// touching any other engine state. Used by `Engine::clear`.
  pub fn reset(&mut self) {
    self.last_var = NONE_VAR;
    self.labels.clear();
  }

  pub fn last_var(&self) -> Var {
    self.last_var
  }

  pub fn is_valid(&self, v: Var) -> bool {
    v >= 1 && v <= self.last_var
  }

  pub fn label(&self, v: Var) -> Option<&str> {
    if v == NONE_VAR || v > self.last_var {
      return None;
    }
    self.labels[(v - 1) as usize].as_deref()
  }

  pub fn set_label(&mut self, v: Var, label: Option<&str>) -> bool {
    if !self.is_valid(v) {
      return false;
    }
    self.labels[(v - 1) as usize] = label.map(|s| s.into());
    true
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn declare_assigns_monotonically() {
    let mut reg = VariableRegistry::new();
    assert_eq!(reg.declare(Some("x")).unwrap(), 1);
    assert_eq!(reg.declare(Some("y")).unwrap(), 2);
    assert_eq!(reg.declare(None).unwrap(), 3);
    assert_eq!(reg.last_var(), 3);
    assert_eq!(reg.label(1), Some("x"));
    assert_eq!(reg.label(3), None);
  }

  #[test]
  fn validity_excludes_zero_and_unassigned() {
    let mut reg = VariableRegistry::new();
    reg.declare(None).unwrap();
    assert!(!reg.is_valid(0));
    assert!(reg.is_valid(1));
    assert!(!reg.is_valid(2));
  }

  #[test]
  fn declare_fails_once_counter_is_exhausted() {
    let mut reg = VariableRegistry::new();
    reg.last_var = Var::MAX;
    assert!(reg.declare(None).is_err());
  }

  #[test]
  fn reset_clears_counter_and_labels() {
    let mut reg = VariableRegistry::new();
    reg.declare(Some("x")).unwrap();
    reg.reset();
    assert_eq!(reg.last_var(), 0);
    assert!(!reg.is_valid(1));
  }
}
