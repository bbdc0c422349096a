/*!

The callback bus: hooks an embedder can register to observe garbage collection and `clear` without
being given a way to mutate the engine mid-operation. A callback that panics is caught and
discarded rather than being allowed to unwind through the engine's own call stack, since a
misbehaving observer should not be able to corrupt arena state that was mid-mutation when it fired.

*/

use std::panic::{self, AssertUnwindSafe};
use zbdd_abs::warning;

type Hook = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
pub struct CallbackBus {
  before_gc: Vec<Hook>,
  after_gc: Vec<Hook>,
  before_clear: Vec<Hook>,
  after_clear: Vec<Hook>,
}

impl CallbackBus {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn on_before_gc(&mut self, hook: impl Fn() + Send + Sync + 'static) {
    self.before_gc.push(Box::new(hook));
  }

  pub fn on_after_gc(&mut self, hook: impl Fn() + Send + Sync + 'static) {
    self.after_gc.push(Box::new(hook));
  }

  pub fn on_before_clear(&mut self, hook: impl Fn() + Send + Sync + 'static) {
    self.before_clear.push(Box::new(hook));
  }

  pub fn on_after_clear(&mut self, hook: impl Fn() + Send + Sync + 'static) {
    self.after_clear.push(Box::new(hook));
  }

  pub fn fire_before_gc(&self) {
    Self::fire(&self.before_gc);
  }

  pub fn fire_after_gc(&self) {
    Self::fire(&self.after_gc);
  }

  pub fn fire_before_clear(&self) {
    Self::fire(&self.before_clear);
  }

  pub fn fire_after_clear(&self) {
    Self::fire(&self.after_clear);
  }

  fn fire(hooks: &[Hook]) {
    for hook in hooks {
      if panic::catch_unwind(AssertUnwindSafe(|| hook())).is_err() {
        warning!(1, "engine callback panicked; ignoring");
      }
    }
  }
}
