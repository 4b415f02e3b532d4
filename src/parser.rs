//! Backtracking recursive-descent parser producing the program AST.
//!
//! Every grammar rule is a function from the current stream position to an
//! optional node. A rule that matches leaves the stream just past what it
//! consumed; a rule that does not match hands the stream back exactly where
//! it found it, so alternatives can simply be tried in order. Rules of a known
//! shape undo their speculation with `rewind(n)`; rules that swallow a
//! statement list of unknown length snapshot the position instead.
//!
//! ```text
//! summand    := identifier | integer-literal
//! expression := summand (('+' | '-') summand)?
//! boolean    := summand ('==' | '!=') summand
//! call       := identifier '(' ')'
//! assignment := identifier '=' expression
//! function   := 'function' identifier '{' statement* '}'
//! condition  := 'if' '(' boolean ')' '{' statement* '}' ('else' '{' statement* '}')?
//! statement  := assignment | call | function | condition
//! program    := statement*
//! ```

use crate::error::{CompileError, CompileResult};
use crate::tokenizer::{Token, TokenKind, describe_token};

/// A name as written in the source, together with its byte offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ident {
  pub name: String,
  pub loc: usize,
}

/// Integer literal; `text` is the decimal spelling emitted verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntLiteral {
  pub value: i64,
  pub text: String,
  pub loc: usize,
}

/// Leaf of every expression: a variable read or an integer literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
  Int(IntLiteral),
  Var(Ident),
}

/// Right-hand side of an assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
  Operand(Operand),
  Add(Operand, Operand),
  Sub(Operand, Operand),
}

impl Expr {
  /// Walk the operands left to right, whatever the shape.
  pub fn operands(&self) -> impl Iterator<Item = &Operand> {
    let (lhs, rhs) = match self {
      Expr::Operand(operand) => (operand, None),
      Expr::Add(lhs, rhs) | Expr::Sub(lhs, rhs) => (lhs, Some(rhs)),
    };
    std::iter::once(lhs).chain(rhs)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
  Equal,
  NotEqual,
}

/// Test of a condition: `lhs == rhs` or `lhs != rhs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Boolean {
  pub op: CompareOp,
  pub lhs: Operand,
  pub rhs: Operand,
}

impl Boolean {
  pub fn operands(&self) -> impl Iterator<Item = &Operand> {
    [&self.lhs, &self.rhs].into_iter()
  }
}

/// Statement list of one branch of a condition.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Block {
  pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
  pub test: Boolean,
  pub then_branch: Block,
  pub else_branch: Option<Block>,
}

/// Statements are the only things that may appear in a body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stmt {
  FunctionDef { name: Ident, body: Vec<Stmt> },
  FunctionCall { name: Ident },
  Assign { target: Ident, value: Expr },
  Condition(Condition),
}

/// Root of the tree: the top-level statements in source order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Program {
  pub body: Vec<Stmt>,
}

/// Parse a whole program. Fails only when some tokens cannot be consumed.
pub fn parse(tokens: Vec<Token>, source: &str) -> CompileResult<Program> {
  let mut stream = TokenStream::new(tokens);
  let body = statement_list(&mut stream);

  if let Some(token) = stream.current().filter(|t| t.kind != TokenKind::Eof) {
    let got = describe_token(Some(token));
    return Err(CompileError::at(
      source,
      token.loc,
      format!("unexpected token \"{got}\""),
    ));
  }

  Ok(Program { body })
}

fn statement_list(stream: &mut TokenStream) -> Vec<Stmt> {
  let mut body = Vec::new();
  while !stream.is_eof() {
    let Some(stmt) = statement(stream) else {
      break;
    };
    body.push(stmt);
  }
  body
}

fn statement(stream: &mut TokenStream) -> Option<Stmt> {
  assignment(stream)
    .or_else(|| call(stream))
    .or_else(|| function(stream))
    .or_else(|| condition(stream))
}

fn summand(stream: &mut TokenStream) -> Option<Operand> {
  let token = stream.current()?;
  let operand = match token.kind {
    TokenKind::Ident => Operand::Var(Ident {
      name: token.text.to_string(),
      loc: token.loc,
    }),
    TokenKind::Num => Operand::Int(IntLiteral {
      value: token.text.parse().ok()?,
      text: token.text.to_string(),
      loc: token.loc,
    }),
    _ => return None,
  };
  stream.advance();
  Some(operand)
}

fn expression(stream: &mut TokenStream) -> Option<Expr> {
  let lhs = summand(stream)?;

  let is_add = if stream.equal("+") {
    true
  } else if stream.equal("-") {
    false
  } else {
    // A lone summand is still a valid expression.
    return Some(Expr::Operand(lhs));
  };

  let Some(rhs) = summand(stream) else {
    stream.rewind(1);
    return Some(Expr::Operand(lhs));
  };

  Some(if is_add {
    Expr::Add(lhs, rhs)
  } else {
    Expr::Sub(lhs, rhs)
  })
}

fn boolean(stream: &mut TokenStream) -> Option<Boolean> {
  let lhs = summand(stream)?;

  let op = if stream.equal("==") {
    CompareOp::Equal
  } else if stream.equal("!=") {
    CompareOp::NotEqual
  } else {
    stream.rewind(1);
    return None;
  };

  let Some(rhs) = summand(stream) else {
    stream.rewind(2);
    return None;
  };

  Some(Boolean { op, lhs, rhs })
}

fn call(stream: &mut TokenStream) -> Option<Stmt> {
  let name = stream.ident()?;
  if !stream.equal("(") {
    stream.rewind(1);
    return None;
  }
  if !stream.equal(")") {
    stream.rewind(2);
    return None;
  }
  Some(Stmt::FunctionCall { name })
}

fn assignment(stream: &mut TokenStream) -> Option<Stmt> {
  let target = stream.ident()?;
  if !stream.equal("=") {
    stream.rewind(1);
    return None;
  }
  let Some(value) = expression(stream) else {
    stream.rewind(2);
    return None;
  };
  Some(Stmt::Assign { target, value })
}

fn function(stream: &mut TokenStream) -> Option<Stmt> {
  if !stream.keyword("function") {
    return None;
  }
  let Some(name) = stream.ident() else {
    stream.rewind(1);
    return None;
  };
  let Some(body) = block(stream) else {
    stream.rewind(2);
    return None;
  };
  Some(Stmt::FunctionDef { name, body })
}

fn condition(stream: &mut TokenStream) -> Option<Stmt> {
  let start = stream.mark();
  if !stream.keyword("if") {
    return None;
  }
  let Some((test, then_body)) = condition_head(stream) else {
    stream.reset(start);
    return None;
  };

  let else_branch = if stream.keyword("else") {
    match block(stream) {
      Some(body) => Some(Block { body }),
      None => {
        // Keep the plain `if`; the stray `else` is left for the caller.
        stream.rewind(1);
        None
      }
    }
  } else {
    None
  };

  Some(Stmt::Condition(Condition {
    test,
    then_branch: Block { body: then_body },
    else_branch,
  }))
}

/// `'(' boolean ')' '{' statement* '}'`; the caller restores the stream on failure.
fn condition_head(stream: &mut TokenStream) -> Option<(Boolean, Vec<Stmt>)> {
  if !stream.equal("(") {
    return None;
  }
  let test = boolean(stream)?;
  if !stream.equal(")") {
    return None;
  }
  let body = block(stream)?;
  Some((test, body))
}

/// `'{' statement* '}'`. On a missing closing brace the stream goes back to
/// the opening brace and the partial body is dropped.
fn block(stream: &mut TokenStream) -> Option<Vec<Stmt>> {
  let start = stream.mark();
  if !stream.equal("{") {
    return None;
  }
  let body = statement_list(stream);
  if !stream.equal("}") {
    stream.reset(start);
    return None;
  }
  Some(body)
}

/// Lightweight cursor over the token vector.
///
/// The last token is always `Eof`; the cursor never moves past it.
pub struct TokenStream {
  tokens: Vec<Token>,
  pos: usize,
}

impl TokenStream {
  /// Take ownership of the token stream; the parser will advance `pos` as it consumes input.
  pub fn new(tokens: Vec<Token>) -> Self {
    Self { tokens, pos: 0 }
  }

  pub fn current(&self) -> Option<&Token> {
    self.tokens.get(self.pos)
  }

  pub fn advance(&mut self) {
    if !self.is_eof() {
      self.pos += 1;
    }
  }

  /// Step back over `distance` previously consumed tokens.
  pub fn rewind(&mut self, distance: usize) {
    debug_assert!(distance <= self.pos, "rewind past the start of the stream");
    self.pos = self.pos.saturating_sub(distance);
  }

  pub fn mark(&self) -> usize {
    self.pos
  }

  pub fn reset(&mut self, mark: usize) {
    self.pos = mark;
  }

  /// Consume the current token if it is the given punctuator.
  pub fn equal(&mut self, op: &str) -> bool {
    self.consume_if(TokenKind::Punctuator, op)
  }

  pub fn keyword(&mut self, kw: &str) -> bool {
    self.consume_if(TokenKind::Keyword, kw)
  }

  /// Consume the current token if it is an identifier.
  pub fn ident(&mut self) -> Option<Ident> {
    let token = self.current().filter(|t| t.kind == TokenKind::Ident)?;
    let ident = Ident {
      name: token.text.to_string(),
      loc: token.loc,
    };
    self.advance();
    Some(ident)
  }

  pub fn is_eof(&self) -> bool {
    matches!(self.current().map(|token| token.kind), Some(TokenKind::Eof) | None)
  }

  fn consume_if(&mut self, kind: TokenKind, text: &str) -> bool {
    if self.current().is_some_and(|token| token.is(kind, text)) {
      self.advance();
      return true;
    }
    false
  }
}
