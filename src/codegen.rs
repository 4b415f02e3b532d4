//! Code generation: lower the checked AST into x86-64 NASM assembly.
//!
//! Every symbol owns a virtual slot handed out by
//! `ScopeTree::assign_addresses`; a slot maps to `[rbp - offset]`, where the
//! offset also accounts for the saved stack pointers of the functions we are
//! currently nested in. `rax` is the main scratch register; `rbx` holds the
//! right-hand literal of comparisons and of arithmetic on wide literals.
//! Only `mov` into a register takes a 64-bit immediate, so literals outside
//! the `i32` range are loaded into a register before any other use.
//!
//! The emitter walks the AST and the scope tree in lockstep: every function
//! body and condition branch moves the replay cursor into the next child
//! scope, exactly as semantic analysis created them. Function bodies are
//! written to their own deferred units and appended after the exit sequence,
//! so the main instruction stream never has to jump over them.

use std::collections::HashSet;

use crate::error::{CompileError, CompileResult};
use crate::parser::{
  Block, Boolean, CompareOp, Condition, Expr, Ident, IntLiteral, Operand, Program, Stmt,
};
use crate::symbol::{ReplayCursor, ScopeTree, Symbol, SymbolId};

const WORD_SIZE: usize = 8;

/// Emit assembly for a whole program, annotating `tree` with addresses.
pub fn generate(program: &Program, tree: &mut ScopeTree) -> CompileResult<String> {
  let mut asm = String::new();
  asm.push_str("section .text\n");
  asm.push_str("global _start\n\n");
  asm.push_str("_start:\n");
  asm.push_str("    mov rbp, rsp\n\n");

  let next_mangle = tree.assign_addresses(0);
  let mut generator = Generator::new(tree, next_mangle);
  generator.emit_stmts(&program.body, &mut asm)?;

  asm.push_str("    mov rax, 60\n");
  asm.push_str("    mov rdi, 0\n");
  asm.push_str("    syscall\n");

  generator.merge_deferred(&mut asm);
  Ok(asm)
}

/// State of one code generation run.
struct Generator<'a> {
  cursor: ReplayCursor<'a>,
  /// Saved stack pointers sitting between `rbp` and the locals in scope.
  stack_depth_bias: usize,
  /// Next free suffix for `else_`/`end_` labels; shares its range with
  /// function mangling.
  mangle_index: usize,
  /// Variables whose stack word has already been pushed.
  initialized: HashSet<SymbolId>,
  /// Finished function bodies waiting to be appended, in definition order.
  deferred: Vec<String>,
}

impl<'a> Generator<'a> {
  fn new(tree: &'a ScopeTree, mangle_index: usize) -> Self {
    let mut cursor = tree.replay();
    cursor.reset_to_root();
    Self {
      cursor,
      stack_depth_bias: 0,
      mangle_index,
      initialized: HashSet::new(),
      deferred: Vec::new(),
    }
  }

  fn physical_offset(&self, slot: usize) -> usize {
    (self.stack_depth_bias + 1 + slot) * WORD_SIZE
  }

  fn emit_stmts(&mut self, stmts: &[Stmt], asm: &mut String) -> CompileResult<()> {
    for stmt in stmts {
      match stmt {
        Stmt::Assign { target, value } => self.emit_assign(target, value, asm)?,
        Stmt::FunctionCall { name } => {
          let label = self.function_label(name)?;
          asm.push_str(&format!("    call {label}\n\n"));
        }
        Stmt::FunctionDef { name, body } => self.emit_function(name, body)?,
        Stmt::Condition(condition) => self.emit_condition(condition, asm)?,
      }
    }
    Ok(())
  }

  fn emit_assign(&mut self, target: &Ident, value: &Expr, asm: &mut String) -> CompileResult<()> {
    // First write to a variable of this scope: grow the stack by one word.
    let is_initial = match self.cursor.is_local(&target.name) {
      Some((id, symbol)) if !symbol.is_function() => self.initialized.insert(id),
      _ => false,
    };

    if is_initial {
      match value {
        Expr::Operand(Operand::Int(lit)) if is_imm32(lit) => {
          asm.push_str(&format!("    push {}\n", lit.text));
        }
        Expr::Operand(Operand::Int(lit)) => {
          asm.push_str(&format!("    mov rax, {}\n", lit.text));
          asm.push_str("    push rax\n");
        }
        Expr::Operand(Operand::Var(var)) => {
          let addr = self.variable_addr(var)?;
          asm.push_str(&format!("    push qword {addr}\n"));
        }
        Expr::Add(lhs, rhs) | Expr::Sub(lhs, rhs) => {
          self.emit_arith(value, lhs, rhs, asm)?;
          asm.push_str("    push rax\n");
        }
      }
      asm.push('\n');
      return Ok(());
    }

    let dest = self.variable_addr(target)?;
    match value {
      Expr::Operand(Operand::Int(lit)) if is_imm32(lit) => {
        asm.push_str(&format!("    mov qword {dest}, {}\n", lit.text));
      }
      Expr::Operand(Operand::Int(lit)) => {
        asm.push_str(&format!("    mov rax, {}\n", lit.text));
        asm.push_str(&format!("    mov {dest}, rax\n"));
      }
      Expr::Operand(Operand::Var(var)) => {
        asm.push_str(&format!("    mov rax, {}\n", self.variable_addr(var)?));
        asm.push_str(&format!("    mov {dest}, rax\n"));
      }
      Expr::Add(Operand::Int(lhs), Operand::Int(rhs))
      | Expr::Sub(Operand::Int(lhs), Operand::Int(rhs))
        if is_imm32(lhs) && is_imm32(rhs) =>
      {
        asm.push_str(&format!("    mov qword {dest}, {}\n", lhs.text));
        asm.push_str(&format!("    {} qword {dest}, {}\n", mnemonic(value), rhs.text));
      }
      Expr::Add(lhs, rhs) | Expr::Sub(lhs, rhs) => {
        self.emit_arith(value, lhs, rhs, asm)?;
        asm.push_str(&format!("    mov {dest}, rax\n"));
      }
    }
    asm.push('\n');
    Ok(())
  }

  /// Leave `lhs +/- rhs` in `rax`.
  fn emit_arith(
    &self,
    value: &Expr,
    lhs: &Operand,
    rhs: &Operand,
    asm: &mut String,
  ) -> CompileResult<()> {
    asm.push_str(&format!("    mov rax, {}\n", self.operand(lhs)?));
    let rhs = match rhs {
      Operand::Int(lit) if !is_imm32(lit) => {
        asm.push_str(&format!("    mov rbx, {}\n", lit.text));
        String::from("rbx")
      }
      other => self.operand(other)?,
    };
    asm.push_str(&format!("    {} rax, {rhs}\n", mnemonic(value)));
    Ok(())
  }

  fn emit_function(&mut self, name: &Ident, body: &[Stmt]) -> CompileResult<()> {
    let Some((_, symbol)) = self.cursor.is_local(&name.name) else {
      return Err(missing_symbol(name));
    };
    let label = label_of(symbol)?;
    let own_slot = slot_of(symbol)?;

    // Reserve the unit now so nested definitions land after this one.
    let unit = self.deferred.len();
    self.deferred.push(String::new());

    let mut out = format!("{label}:\n");
    self.cursor.enter_next_child()?;
    self.stack_depth_bias += 1;
    if body.is_empty() {
      out.push_str("    nop\n");
    } else {
      out.push_str("    push rsp\n");
      self.emit_stmts(body, &mut out)?;
      out.push_str(&format!(
        "    mov rsp, [rbp - {}]\n",
        self.physical_offset(own_slot)
      ));
    }
    out.push_str("    ret\n\n");
    self.stack_depth_bias -= 1;
    self.cursor.leave_scope();

    self.deferred[unit] = out;
    Ok(())
  }

  fn emit_condition(&mut self, condition: &Condition, asm: &mut String) -> CompileResult<()> {
    let index = self.mangle_index;
    self.mangle_index += 1;

    self.emit_compare(&condition.test, asm)?;
    let jump = match condition.test.op {
      CompareOp::Equal => "jne",
      CompareOp::NotEqual => "je",
    };
    let skip_to = if condition.else_branch.is_some() {
      format!("else_{index}")
    } else {
      format!("end_{index}")
    };
    asm.push_str(&format!("    {jump} {skip_to}\n\n"));

    self.emit_branch(&condition.then_branch, asm)?;

    if let Some(else_branch) = &condition.else_branch {
      asm.push_str(&format!("    jmp end_{index}\n\n"));
      asm.push_str(&format!("else_{index}:\n"));
      self.emit_branch(else_branch, asm)?;
    }
    asm.push_str(&format!("end_{index}:\n\n"));
    Ok(())
  }

  fn emit_branch(&mut self, block: &Block, asm: &mut String) -> CompileResult<()> {
    self.cursor.enter_next_child()?;
    self.emit_stmts(&block.body, asm)?;
    self.cursor.leave_scope();
    Ok(())
  }

  /// Set the flags for `lhs == rhs`.
  fn emit_compare(&self, test: &Boolean, asm: &mut String) -> CompileResult<()> {
    match (&test.lhs, &test.rhs) {
      (Operand::Int(lhs), Operand::Int(rhs)) => {
        asm.push_str(&format!("    mov rax, {}\n", lhs.text));
        asm.push_str(&format!("    mov rbx, {}\n", rhs.text));
        asm.push_str("    cmp rax, rbx\n");
      }
      (Operand::Var(var), Operand::Int(lit)) | (Operand::Int(lit), Operand::Var(var)) => {
        asm.push_str(&format!("    mov rax, {}\n", lit.text));
        asm.push_str(&format!("    cmp qword {}, rax\n", self.variable_addr(var)?));
      }
      (Operand::Var(lhs), Operand::Var(rhs)) => {
        asm.push_str(&format!("    mov rax, {}\n", self.variable_addr(lhs)?));
        asm.push_str(&format!("    cmp rax, {}\n", self.variable_addr(rhs)?));
      }
    }
    Ok(())
  }

  fn operand(&self, operand: &Operand) -> CompileResult<String> {
    match operand {
      Operand::Int(lit) => Ok(lit.text.clone()),
      Operand::Var(var) => self.variable_addr(var),
    }
  }

  /// `[rbp - offset]` of the visible variable called `var`.
  fn variable_addr(&self, var: &Ident) -> CompileResult<String> {
    let Some((_, symbol)) = self.cursor.lookup(&var.name) else {
      return Err(missing_symbol(var));
    };
    if symbol.is_function() {
      return Err(CompileError::internal(format!(
        "function '{}' reached codegen as a variable",
        var.name
      )));
    }
    Ok(format!("[rbp - {}]", self.physical_offset(slot_of(symbol)?)))
  }

  fn function_label(&self, name: &Ident) -> CompileResult<String> {
    let Some((_, symbol)) = self.cursor.lookup(&name.name) else {
      return Err(missing_symbol(name));
    };
    if !symbol.is_function() {
      return Err(CompileError::internal(format!(
        "variable '{}' reached codegen as a call target",
        name.name
      )));
    }
    label_of(symbol)
  }

  /// Append every deferred function body to the main output, draining them.
  fn merge_deferred(&mut self, asm: &mut String) {
    if self.deferred.is_empty() {
      return;
    }
    asm.push('\n');
    for unit in self.deferred.drain(..) {
      asm.push_str(&unit);
    }
  }
}

fn mnemonic(expr: &Expr) -> &'static str {
  match expr {
    Expr::Sub(..) => "sub",
    _ => "add",
  }
}

/// Whether `lit` fits a sign-extended 32-bit immediate.
fn is_imm32(lit: &IntLiteral) -> bool {
  i32::try_from(lit.value).is_ok()
}

fn slot_of(symbol: &Symbol) -> CompileResult<usize> {
  symbol.slot.ok_or_else(|| {
    CompileError::internal(format!("'{}' has no stack slot assigned", symbol.name))
  })
}

fn label_of(symbol: &Symbol) -> CompileResult<String> {
  let mangle = symbol.mangle.ok_or_else(|| {
    CompileError::internal(format!("function '{}' has no mangle index", symbol.name))
  })?;
  Ok(format!("{}_{mangle}", symbol.name))
}

fn missing_symbol(ident: &Ident) -> CompileError {
  CompileError::internal(format!(
    "'{}' is not in the replayed scope tree",
    ident.name
  ))
}
