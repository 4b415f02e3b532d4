//! Semantic analysis: checks definitions and uses while building the scope tree.
//!
//! Every function body and every branch of a condition opens a fresh child
//! scope, in source order. Code generation later replays exactly this shape,
//! so the order in which scopes are entered here is part of the contract.

use snafu::ensure;

use crate::error::{
  CompileResult, NotAVariableSnafu, NotCallableSnafu, RedefinitionSnafu, UndefinedNameSnafu,
  position,
};
use crate::parser::{Block, Expr, Ident, Operand, Program, Stmt};
use crate::symbol::{ScopeBuilder, ScopeTree, Symbol, SymbolKind};

/// Check the program and return the finished scope tree.
pub fn analyze(program: &Program, source: &str) -> CompileResult<ScopeTree> {
  let mut checker = Checker {
    scopes: ScopeBuilder::new(),
    source,
  };
  checker.check_stmts(&program.body)?;
  Ok(checker.scopes.finish())
}

struct Checker<'a> {
  scopes: ScopeBuilder,
  source: &'a str,
}

impl Checker<'_> {
  fn check_stmts(&mut self, stmts: &[Stmt]) -> CompileResult<()> {
    for stmt in stmts {
      self.check_stmt(stmt)?;
    }
    Ok(())
  }

  fn check_stmt(&mut self, stmt: &Stmt) -> CompileResult<()> {
    match stmt {
      Stmt::FunctionDef { name, body } => {
        if let Some(first) = self.scopes.is_local(&name.name) {
          let (line, column) = position(self.source, name.loc);
          let (first_line, first_column) = position(self.source, first.loc);
          return RedefinitionSnafu {
            name: &name.name,
            line,
            column,
            first_line,
            first_column,
          }
          .fail();
        }
        // Declared before the body so the function may call itself.
        self
          .scopes
          .declare(Symbol::function(&name.name, name.loc));
        self.scopes.enter_new_scope();
        self.check_stmts(body)?;
        self.scopes.leave_scope();
      }
      Stmt::FunctionCall { name } => {
        let (line, column) = position(self.source, name.loc);
        let symbol = self.scopes.lookup(&name.name);
        ensure!(
          symbol.is_some(),
          UndefinedNameSnafu {
            name: &name.name,
            line,
            column
          }
        );
        ensure!(
          symbol.is_some_and(Symbol::is_function),
          NotCallableSnafu {
            name: &name.name,
            line,
            column
          }
        );
      }
      Stmt::Assign { target, value } => {
        self.check_expr(value)?;
        self.check_target(target)?;
      }
      Stmt::Condition(condition) => {
        for operand in condition.test.operands() {
          self.check_operand(operand)?;
        }
        self.check_block(&condition.then_branch)?;
        if let Some(else_branch) = &condition.else_branch {
          self.check_block(else_branch)?;
        }
      }
    }
    Ok(())
  }

  fn check_block(&mut self, block: &Block) -> CompileResult<()> {
    self.scopes.enter_new_scope();
    self.check_stmts(&block.body)?;
    self.scopes.leave_scope();
    Ok(())
  }

  fn check_expr(&self, expr: &Expr) -> CompileResult<()> {
    for operand in expr.operands() {
      self.check_operand(operand)?;
    }
    Ok(())
  }

  fn check_operand(&self, operand: &Operand) -> CompileResult<()> {
    match operand {
      Operand::Int(_) => Ok(()),
      Operand::Var(ident) => self.check_variable_use(ident),
    }
  }

  fn check_variable_use(&self, ident: &Ident) -> CompileResult<()> {
    let (line, column) = position(self.source, ident.loc);
    let symbol = self.scopes.lookup(&ident.name);
    ensure!(
      symbol.is_some(),
      UndefinedNameSnafu {
        name: &ident.name,
        line,
        column
      }
    );
    ensure!(
      symbol.is_some_and(|s| s.kind == SymbolKind::Variable),
      NotAVariableSnafu {
        name: &ident.name,
        line,
        column
      }
    );
    Ok(())
  }

  /// The first assignment to a name that is not visible yet declares it in
  /// the current scope; later ones write to the visible variable.
  fn check_target(&mut self, target: &Ident) -> CompileResult<()> {
    match self.scopes.lookup(&target.name) {
      None => {
        self
          .scopes
          .declare(Symbol::variable(&target.name, target.loc));
        Ok(())
      }
      Some(symbol) => {
        let (line, column) = position(self.source, target.loc);
        ensure!(
          !symbol.is_function(),
          NotAVariableSnafu {
            name: &target.name,
            line,
            column
          }
        );
        Ok(())
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::CompileError;
  use crate::parser::parse;
  use crate::tokenizer::tokenize;

  fn analyze_source(source: &str) -> CompileResult<ScopeTree> {
    let program = parse(tokenize(source)?, source)?;
    analyze(&program, source)
  }

  #[test]
  fn builds_one_scope_per_body_and_branch() {
    let tree = analyze_source(
      "x = 1\nfunction f { y = x }\nif (x == 1) { z = 2 } else { z = 3 }\nf()",
    )
    .expect("analyze");
    let root = tree.scope(tree.root());
    assert_eq!(root.children.len(), 3);
    let names: Vec<_> = root
      .symbols
      .iter()
      .map(|id| tree.symbol(*id).name.as_str())
      .collect();
    assert_eq!(names, ["x", "f"]);
    for child in &root.children {
      assert_eq!(tree.scope(*child).symbols.len(), 1);
    }
  }

  #[test]
  fn reassignment_does_not_redeclare() {
    let tree = analyze_source("a = 1\na = a + 1\nif (a != 0) { a = 5 }").expect("analyze");
    assert_eq!(tree.symbols().count(), 1);
  }

  #[test]
  fn undefined_names_are_reported() {
    let err = analyze_source("y = z").unwrap_err();
    assert!(
      matches!(&err, CompileError::UndefinedName { name, line: 1, column: 5 } if name == "z"),
      "{err:?}"
    );
    assert!(analyze_source("g()").is_err());
    assert!(analyze_source("if (q == 1) { }").is_err());
  }

  #[test]
  fn self_reference_in_first_assignment_is_undefined() {
    let err = analyze_source("x = x + 1").unwrap_err();
    assert!(matches!(err, CompileError::UndefinedName { .. }));
  }

  #[test]
  fn redefining_a_function_in_the_same_scope_fails() {
    let err = analyze_source("function f { }\nfunction f { }").unwrap_err();
    assert_eq!(
      err.to_string(),
      "2:10: redefinition of 'f' (first defined at 1:10)"
    );
  }

  #[test]
  fn function_cannot_reuse_a_local_variable_name() {
    let err = analyze_source("x = 1\nfunction x { }").unwrap_err();
    assert!(
      matches!(
        &err,
        CompileError::Redefinition { name, line: 2, column: 10, first_line: 1, first_column: 1 }
          if name == "x"
      ),
      "{err:?}"
    );
  }

  #[test]
  fn nested_function_may_shadow_an_outer_one() {
    assert!(analyze_source("function f { function f { } f() }").is_ok());
  }

  #[test]
  fn calling_a_variable_fails() {
    let err = analyze_source("v = 1\nv()").unwrap_err();
    assert!(matches!(err, CompileError::NotCallable { .. }));
  }

  #[test]
  fn functions_are_not_values() {
    let err = analyze_source("function f { }\nx = f").unwrap_err();
    assert!(matches!(err, CompileError::NotAVariable { .. }));
    let err = analyze_source("function f { }\nf = 1").unwrap_err();
    assert!(matches!(err, CompileError::NotAVariable { .. }));
  }

  #[test]
  fn branch_locals_do_not_leak() {
    let err = analyze_source("if (1 == 1) { t = 1 }\nu = t").unwrap_err();
    assert!(matches!(err, CompileError::UndefinedName { .. }));
  }

  #[test]
  fn recursion_is_allowed() {
    assert!(analyze_source("function loop { loop() }").is_ok());
  }
}
