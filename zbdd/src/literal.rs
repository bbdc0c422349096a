/*!

The literal resolver interface: the seam a caller uses to attach display names to variables
without the core engine needing to know anything about where those names come from. The engine
only ever needs a `Var -> Option<&str>` lookup; anything richer (parsing literal expressions,
mapping application-level symbols to variables) lives entirely outside this crate.

*/

use crate::node::Var;

pub trait LiteralResolver {
  /// The display name for a variable, if one has been assigned.
  fn variable_name(&self, v: Var) -> Option<&str>;

  /// Renders a cube (an ascending slice of variables) as a human-readable set, falling back to
  /// `v<n>` for any variable without a registered name.
  fn format_cube(&self, vars: &[Var]) -> String {
    let mut out = String::from("{");
    for (i, &v) in vars.iter().enumerate() {
      if i > 0 {
        out.push_str(", ");
      }
      match self.variable_name(v) {
        Some(name) => out.push_str(name),
        None => out.push_str(&format!("v{v}")),
      }
    }
    out.push('}');
    out
  }
}
