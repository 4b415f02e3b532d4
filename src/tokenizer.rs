//! Lexical analysis: turns the raw input string into a vector of tokens.
//!
//! The tokenizer is intentionally tiny – it knows nothing about semantics
//! beyond recognising keywords, identifiers, punctuators and numeric
//! literals. Multi-character punctuators are matched before single-character
//! ones to avoid ambiguity, and comments are dropped on the floor.

use std::borrow::Cow;

use crate::error::{CompileError, CompileResult};

/// Kinds of tokens recognised by the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
  Keyword,
  Ident,
  Num,
  Punctuator,
  Eof,
}

const KEYWORDS: [&str; 3] = ["function", "if", "else"];
const PUNCTUATORS: [&str; 9] = ["==", "!=", "=", "+", "-", "{", "}", "(", ")"];

/// Thin wrapper for lexical information needed by later stages.
///
/// Identifiers and literals own their text; keywords and punctuators point at
/// static strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
  pub kind: TokenKind,
  pub text: Cow<'static, str>,
  pub loc: usize,
  pub len: usize,
}

impl Token {
  /// Convenience constructor to keep the `tokenize` loop readable.
  pub fn new(kind: TokenKind, text: Cow<'static, str>, loc: usize, len: usize) -> Self {
    Self {
      kind,
      text,
      loc,
      len,
    }
  }

  pub fn is(&self, kind: TokenKind, text: &str) -> bool {
    self.kind == kind && self.text == text
  }
}

/// Lex the input into a flat vector of tokens terminated by an `Eof` marker.
pub fn tokenize(input: &str) -> CompileResult<Vec<Token>> {
  let mut tokens = Vec::new();
  let bytes = input.as_bytes();
  let mut i = 0;

  while i < bytes.len() {
    let c = bytes[i];
    if c.is_ascii_whitespace() {
      i += 1;
      continue;
    }

    if input[i..].starts_with("//") {
      i = input[i..].find('\n').map_or(input.len(), |end| i + end + 1);
      continue;
    }

    if input[i..].starts_with("/*") {
      let Some(end) = input[i + 2..].find("*/") else {
        return Err(CompileError::at(input, i, "unclosed block comment"));
      };
      i += 2 + end + 2;
      continue;
    }

    if c.is_ascii_digit() {
      let start = i;
      while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
      }
      let text = &input[start..i];
      text
        .parse::<i64>()
        .map_err(|err| CompileError::at(input, start, format!("invalid number: {err}")))?;
      tokens.push(Token::new(
        TokenKind::Num,
        Cow::Owned(text.to_string()),
        start,
        i - start,
      ));
      continue;
    }

    if c.is_ascii_alphabetic() || c == b'_' {
      let start = i;
      while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
        i += 1;
      }
      let text = &input[start..i];
      let token = match KEYWORDS.into_iter().find(|kw| *kw == text) {
        Some(kw) => Token::new(TokenKind::Keyword, Cow::Borrowed(kw), start, i - start),
        None => Token::new(
          TokenKind::Ident,
          Cow::Owned(text.to_string()),
          start,
          i - start,
        ),
      };
      tokens.push(token);
      continue;
    }

    if let Some(op) = PUNCTUATORS
      .into_iter()
      .find(|op| input[i..].starts_with(op))
    {
      tokens.push(Token::new(
        TokenKind::Punctuator,
        Cow::Borrowed(op),
        i,
        op.len(),
      ));
      i += op.len();
      continue;
    }

    let invalid_char = input[i..].chars().next().unwrap_or('\0');
    return Err(CompileError::at(
      input,
      i,
      format!("unrecognized character '{invalid_char}'"),
    ));
  }

  tokens.push(Token::new(TokenKind::Eof, Cow::Borrowed(""), input.len(), 0));
  Ok(tokens)
}

/// Human-friendly description used in diagnostics.
pub fn describe_token(token: Option<&Token>) -> String {
  match token {
    Some(t) => match t.kind {
      TokenKind::Eof => "EOF".to_string(),
      _ => t.text.to_string(),
    },
    None => "EOF".to_string(),
  }
}
