//! Scope-tree symbol table.
//!
//! Scopes and symbols live in one arena (`ScopeTree`) and are addressed by
//! index. The tree is walked through one of two cursors:
//!
//! - `ScopeBuilder` is used once, while semantic analysis walks the AST. It
//!   creates a child scope every time a block is entered and records every
//!   declaration.
//! - `ReplayCursor` is used once per code generation pass. It revisits the
//!   finished tree in the order the scopes were created without changing its
//!   shape.
//!
//! `ScopeBuilder::finish` consumes the builder, so a tree can only be replayed
//! after construction is over.

use std::fmt;

use crate::error::{CompileError, CompileResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
  Variable,
  Function,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
  pub kind: SymbolKind,
  pub name: String,
  /// Byte offset of the defining identifier.
  pub loc: usize,
  /// Virtual stack slot, filled in by `ScopeTree::assign_addresses`.
  pub slot: Option<usize>,
  /// Suffix making a function's label unique, filled in alongside `slot`.
  pub mangle: Option<usize>,
}

impl Symbol {
  pub fn new(kind: SymbolKind, name: impl Into<String>, loc: usize) -> Self {
    Self {
      kind,
      name: name.into(),
      loc,
      slot: None,
      mangle: None,
    }
  }

  pub fn variable(name: impl Into<String>, loc: usize) -> Self {
    Self::new(SymbolKind::Variable, name, loc)
  }

  pub fn function(name: impl Into<String>, loc: usize) -> Self {
    Self::new(SymbolKind::Function, name, loc)
  }

  pub fn is_function(&self) -> bool {
    self.kind == SymbolKind::Function
  }
}

#[derive(Debug, Clone, Default)]
pub struct Scope {
  /// Declarations in the order they were made.
  pub symbols: Vec<SymbolId>,
  /// Child scopes in the order they were first entered.
  pub children: Vec<ScopeId>,
}

/// Arena owning every scope and symbol of one program.
#[derive(Debug, Clone)]
pub struct ScopeTree {
  scopes: Vec<Scope>,
  symbols: Vec<Symbol>,
}

impl Default for ScopeTree {
  fn default() -> Self {
    Self {
      scopes: vec![Scope::default()],
      symbols: Vec::new(),
    }
  }
}

impl ScopeTree {
  pub fn root(&self) -> ScopeId {
    ScopeId(0)
  }

  pub fn scope(&self, id: ScopeId) -> &Scope {
    &self.scopes[id.0]
  }

  pub fn symbol(&self, id: SymbolId) -> &Symbol {
    &self.symbols[id.0]
  }

  pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
    self.symbols.iter()
  }

  /// Find `name` declared directly in `scope`.
  pub fn find_in(&self, scope: ScopeId, name: &str) -> Option<SymbolId> {
    self
      .scope(scope)
      .symbols
      .iter()
      .copied()
      .find(|id| self.symbol(*id).name == name)
  }

  /// Search a position stack from its top down to the root.
  fn find_in_stack(
    &self,
    stack: impl DoubleEndedIterator<Item = ScopeId>,
    name: &str,
  ) -> Option<SymbolId> {
    stack.rev().find_map(|scope| self.find_in(scope, name))
  }

  /// Give every symbol a virtual slot and every function a mangle index.
  ///
  /// Slots are consecutive in declaration order. A child scope starts
  /// counting where its parent's own symbols stopped; sibling scopes start
  /// from the same value. Mangle indices are handed out in visiting order
  /// starting at `first_mangle`. Returns the next unused mangle index.
  pub fn assign_addresses(&mut self, first_mangle: usize) -> usize {
    let mut next_mangle = first_mangle;
    let mut pending = vec![(self.root(), 0)];

    while let Some((scope, mut slot)) = pending.pop() {
      for id in self.scopes[scope.0].symbols.clone() {
        let symbol = &mut self.symbols[id.0];
        symbol.slot = Some(slot);
        slot += 1;
        if symbol.is_function() {
          symbol.mangle = Some(next_mangle);
          next_mangle += 1;
        }
      }
      // Reversed so the left-most child is popped first.
      for child in self.scopes[scope.0].children.iter().rev() {
        pending.push((*child, slot));
      }
    }

    next_mangle
  }

  /// Start a replay at the root.
  pub fn replay(&self) -> ReplayCursor<'_> {
    ReplayCursor::new(self)
  }

  fn fmt_scope(&self, f: &mut fmt::Formatter<'_>, scope: ScopeId, depth: usize) -> fmt::Result {
    let indent = "  ".repeat(depth);
    writeln!(f, "{indent}scope#{}", scope.0)?;
    for id in &self.scope(scope).symbols {
      let symbol = self.symbol(*id);
      let kind = match symbol.kind {
        SymbolKind::Variable => "var",
        SymbolKind::Function => "fn",
      };
      write!(f, "{indent}  {kind} {}", symbol.name)?;
      if let Some(slot) = symbol.slot {
        write!(f, " @{slot}")?;
      }
      if let Some(mangle) = symbol.mangle {
        write!(f, " -> {}_{mangle}", symbol.name)?;
      }
      writeln!(f)?;
    }
    for child in &self.scope(scope).children {
      self.fmt_scope(f, *child, depth + 1)?;
    }
    Ok(())
  }
}

impl fmt::Display for ScopeTree {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    self.fmt_scope(f, self.root(), 0)
  }
}

/// Construction cursor: grows the tree while semantic analysis walks the AST.
#[derive(Debug)]
pub struct ScopeBuilder {
  tree: ScopeTree,
  stack: Vec<ScopeId>,
}

impl Default for ScopeBuilder {
  fn default() -> Self {
    Self::new()
  }
}

impl ScopeBuilder {
  pub fn new() -> Self {
    let tree = ScopeTree::default();
    let stack = vec![tree.root()];
    Self { tree, stack }
  }

  fn current(&self) -> ScopeId {
    self.stack.last().copied().unwrap_or(ScopeId(0))
  }

  /// Create a scope as the last child of the current one and move into it.
  pub fn enter_new_scope(&mut self) -> ScopeId {
    let id = ScopeId(self.tree.scopes.len());
    self.tree.scopes.push(Scope::default());
    let parent = self.current();
    self.tree.scopes[parent.0].children.push(id);
    self.stack.push(id);
    id
  }

  /// Return to the parent scope. Leaving the root keeps us at the root.
  pub fn leave_scope(&mut self) {
    if self.stack.len() > 1 {
      self.stack.pop();
    }
  }

  /// Add a symbol to the current scope. Duplicates are not rejected here;
  /// callers check with `lookup`/`is_local` first.
  pub fn declare(&mut self, symbol: Symbol) -> SymbolId {
    let id = SymbolId(self.tree.symbols.len());
    self.tree.symbols.push(symbol);
    let scope = self.current();
    self.tree.scopes[scope.0].symbols.push(id);
    id
  }

  /// Innermost visible symbol called `name`.
  pub fn lookup(&self, name: &str) -> Option<&Symbol> {
    let id = self.tree.find_in_stack(self.stack.iter().copied(), name)?;
    Some(self.tree.symbol(id))
  }

  /// Symbol called `name` declared in the current scope itself.
  pub fn is_local(&self, name: &str) -> Option<&Symbol> {
    let id = self.tree.find_in(self.current(), name)?;
    Some(self.tree.symbol(id))
  }

  /// End construction and hand over the finished tree.
  pub fn finish(self) -> ScopeTree {
    self.tree
  }
}

#[derive(Debug, Clone, Copy)]
struct Frame {
  scope: ScopeId,
  /// Index of the next child to enter from this scope.
  next_child: usize,
}

/// Replay cursor: walks a finished tree in construction order.
///
/// Each frame of the position stack remembers how many of its children have
/// been entered, so consecutive statements at the same nesting level land in
/// consecutive child scopes.
#[derive(Debug)]
pub struct ReplayCursor<'a> {
  tree: &'a ScopeTree,
  stack: Vec<Frame>,
}

impl<'a> ReplayCursor<'a> {
  fn new(tree: &'a ScopeTree) -> Self {
    let mut cursor = Self {
      tree,
      stack: Vec::new(),
    };
    cursor.reset_to_root();
    cursor
  }

  pub fn reset_to_root(&mut self) {
    self.stack.clear();
    self.stack.push(Frame {
      scope: self.tree.root(),
      next_child: 0,
    });
  }

  pub fn current(&self) -> ScopeId {
    self.stack.last().map_or(self.tree.root(), |frame| frame.scope)
  }

  /// Move into the child after the last one entered from the current scope.
  pub fn enter_next_child(&mut self) -> CompileResult<ScopeId> {
    let Some(frame) = self.stack.last_mut() else {
      return Err(CompileError::internal("replay position stack is empty"));
    };
    let children = &self.tree.scope(frame.scope).children;
    let Some(child) = children.get(frame.next_child).copied() else {
      return Err(CompileError::internal(format!(
        "scope#{} has no child #{} to replay",
        frame.scope.0, frame.next_child
      )));
    };
    frame.next_child += 1;
    self.stack.push(Frame {
      scope: child,
      next_child: 0,
    });
    Ok(child)
  }

  /// Return to the parent scope. Leaving the root keeps us at the root.
  pub fn leave_scope(&mut self) {
    if self.stack.len() > 1 {
      self.stack.pop();
    }
  }

  pub fn lookup(&self, name: &str) -> Option<(SymbolId, &'a Symbol)> {
    let tree = self.tree;
    let id = tree.find_in_stack(self.stack.iter().map(|frame| frame.scope), name)?;
    Some((id, tree.symbol(id)))
  }

  pub fn is_local(&self, name: &str) -> Option<(SymbolId, &'a Symbol)> {
    let tree = self.tree;
    let id = tree.find_in(self.current(), name)?;
    Some((id, tree.symbol(id)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn slot_of(tree: &ScopeTree, name: &str) -> usize {
    tree
      .symbols()
      .find(|symbol| symbol.name == name)
      .and_then(|symbol| symbol.slot)
      .unwrap_or_else(|| panic!("no slot for {name}"))
  }

  #[test]
  fn inner_scopes_see_outer_symbols() {
    let mut builder = ScopeBuilder::new();
    builder.declare(Symbol::variable("x", 0));
    builder.enter_new_scope();
    builder.declare(Symbol::variable("y", 0));
    assert!(builder.lookup("x").is_some());
    assert!(builder.lookup("y").is_some());
    assert!(builder.is_local("x").is_none());
    assert!(builder.is_local("y").is_some());

    builder.leave_scope();
    assert!(builder.lookup("y").is_none());
    assert!(builder.lookup("x").is_some());
  }

  #[test]
  fn sibling_scopes_are_isolated() {
    let mut builder = ScopeBuilder::new();
    builder.enter_new_scope();
    builder.declare(Symbol::variable("a", 0));
    builder.leave_scope();
    builder.enter_new_scope();
    builder.declare(Symbol::variable("b", 0));
    assert!(builder.lookup("a").is_none());
    assert!(builder.lookup("b").is_some());
  }

  #[test]
  fn inner_declarations_shadow_outer_ones() {
    let mut builder = ScopeBuilder::new();
    builder.declare(Symbol::variable("f", 1));
    builder.enter_new_scope();
    builder.declare(Symbol::function("f", 2));
    assert_eq!(builder.lookup("f").map(|s| s.kind), Some(SymbolKind::Function));
    builder.leave_scope();
    assert_eq!(builder.lookup("f").map(|s| s.kind), Some(SymbolKind::Variable));
  }

  #[test]
  fn lookup_compares_names_by_text() {
    let mut builder = ScopeBuilder::new();
    builder.declare(Symbol::variable(String::from("count"), 0));
    let probe = format!("{}{}", "cou", "nt");
    assert!(builder.lookup(&probe).is_some());
  }

  #[test]
  fn leaving_the_root_stays_at_the_root() {
    let mut builder = ScopeBuilder::new();
    builder.leave_scope();
    builder.leave_scope();
    builder.declare(Symbol::variable("x", 0));
    let tree = builder.finish();
    assert_eq!(tree.scope(tree.root()).symbols.len(), 1);
  }

  #[test]
  fn replay_visits_children_in_creation_order() {
    let mut builder = ScopeBuilder::new();
    let first = builder.enter_new_scope();
    builder.leave_scope();
    let second = builder.enter_new_scope();
    builder.leave_scope();
    let tree = builder.finish();

    let mut cursor = tree.replay();
    cursor.reset_to_root();
    assert_eq!(cursor.enter_next_child().expect("first child"), first);
    cursor.leave_scope();
    assert_eq!(cursor.enter_next_child().expect("second child"), second);
    cursor.leave_scope();
    assert_eq!(cursor.current(), tree.root());
    assert!(cursor.enter_next_child().unwrap_err().is_internal());
  }

  #[test]
  fn replay_tracks_each_level_independently() {
    let mut builder = ScopeBuilder::new();
    let outer = builder.enter_new_scope();
    let inner_a = builder.enter_new_scope();
    builder.leave_scope();
    let inner_b = builder.enter_new_scope();
    builder.declare(Symbol::variable("deep", 0));
    builder.leave_scope();
    builder.leave_scope();
    let sibling = builder.enter_new_scope();
    let tree = builder.finish();

    let mut cursor = tree.replay();
    assert_eq!(cursor.enter_next_child().ok(), Some(outer));
    assert_eq!(cursor.enter_next_child().ok(), Some(inner_a));
    cursor.leave_scope();
    assert_eq!(cursor.enter_next_child().ok(), Some(inner_b));
    assert!(cursor.is_local("deep").is_some());
    cursor.leave_scope();
    cursor.leave_scope();
    assert!(cursor.lookup("deep").is_none());
    assert_eq!(cursor.enter_next_child().ok(), Some(sibling));
  }

  #[test]
  fn sibling_branches_share_their_starting_slot() {
    let mut builder = ScopeBuilder::new();
    builder.declare(Symbol::variable("x", 0));
    builder.enter_new_scope();
    builder.declare(Symbol::variable("then_a", 0));
    builder.declare(Symbol::variable("then_b", 0));
    builder.leave_scope();
    builder.enter_new_scope();
    builder.declare(Symbol::variable("else_a", 0));
    builder.leave_scope();
    let mut tree = builder.finish();
    tree.assign_addresses(0);

    assert_eq!(slot_of(&tree, "x"), 0);
    assert_eq!(slot_of(&tree, "then_a"), 1);
    assert_eq!(slot_of(&tree, "then_b"), 2);
    assert_eq!(slot_of(&tree, "else_a"), 1);
  }

  #[test]
  fn function_slot_precedes_its_locals() {
    let mut builder = ScopeBuilder::new();
    builder.declare(Symbol::function("f", 0));
    builder.enter_new_scope();
    builder.declare(Symbol::variable("local", 0));
    builder.declare(Symbol::function("g", 0));
    builder.leave_scope();
    builder.declare(Symbol::function("h", 0));
    let mut tree = builder.finish();
    let next = tree.assign_addresses(0);

    assert!(slot_of(&tree, "f") < slot_of(&tree, "local"));
    assert_eq!(slot_of(&tree, "local"), 2);
    let mangles: Vec<_> = ["f", "h", "g"]
      .iter()
      .map(|name| {
        tree
          .symbols()
          .find(|symbol| symbol.name == *name)
          .and_then(|symbol| symbol.mangle)
      })
      .collect();
    assert_eq!(mangles, [Some(0), Some(1), Some(2)]);
    assert_eq!(next, 3);
  }

  #[test]
  fn display_lists_the_annotated_tree() {
    let mut builder = ScopeBuilder::new();
    builder.declare(Symbol::function("f", 0));
    builder.enter_new_scope();
    builder.declare(Symbol::variable("x", 0));
    let mut tree = builder.finish();
    tree.assign_addresses(0);
    assert_eq!(
      tree.to_string(),
      "scope#0\n  fn f @0 -> f_0\n  scope#1\n    var x @1\n"
    );
  }
}
