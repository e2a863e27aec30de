use regex::Regex;
/// Simple recursive-descent reader for the S-expressions used by grammars,
/// formulas, values and types
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SexpError {
  #[error("unbalanced parenthesis at `{0}`")]
  Unbalanced(String),
  #[error("unterminated string at `{0}`")]
  UnterminatedString(String),
  #[error("unexpected `)` at `{0}`")]
  UnexpectedClose(String),
  #[error("expected a single expression, got {0}")]
  NotSingle(usize),
}

/// A leaf or a parenthesized list of expressions
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Sexp {
  Leaf(String),
  List(Vec<Sexp>),
}

impl Sexp {
  pub fn leaf(s: impl Into<String>) -> Self {
    Self::Leaf(s.into())
  }

  pub fn list(children: Vec<Sexp>) -> Self {
    Self::List(children)
  }

  pub fn is_leaf(&self) -> bool {
    matches!(self, Self::Leaf(_))
  }

  pub fn as_leaf(&self) -> Option<&str> {
    match self {
      Self::Leaf(s) => Some(s),
      _ => None,
    }
  }

  pub fn children(&self) -> &[Sexp] {
    match self {
      Self::List(v) => v,
      Self::Leaf(_) => &[],
    }
  }

  pub fn child(&self, i: usize) -> Option<&Sexp> {
    self.children().get(i)
  }

  /// Leaf value of the i-th child, if that child is a leaf
  pub fn child_leaf(&self, i: usize) -> Option<&str> {
    self.child(i).and_then(Sexp::as_leaf)
  }

  /// The leaf at the head of a list, e.g. `rule` in `(rule $A (a) ...)`
  pub fn head(&self) -> Option<&str> {
    self.child_leaf(0)
  }

  pub fn len(&self) -> usize {
    self.children().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Substitutes leaves through `f`, rebuilding lists
  pub fn map_leaves<E>(&self, f: &mut impl FnMut(&str) -> Result<Sexp, E>) -> Result<Sexp, E> {
    match self {
      Self::Leaf(s) => f(s),
      Self::List(children) => {
        let mut out = Vec::with_capacity(children.len());
        for c in children {
          out.push(c.map_leaves(f)?);
        }
        Ok(Self::List(out))
      }
    }
  }

  /// Reads every top-level expression in `s`
  pub fn parse_all(s: &str) -> Result<Vec<Sexp>, SexpError> {
    let mut exprs = Vec::new();
    let mut rem = skip_whitespace(s);
    while !rem.is_empty() {
      let (expr, rest) = parse_expr(rem)?;
      exprs.push(expr);
      rem = skip_whitespace(rest);
    }
    Ok(exprs)
  }
}

impl FromStr for Sexp {
  type Err = SexpError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let mut exprs = Self::parse_all(s)?;
    if exprs.len() != 1 {
      return Err(SexpError::NotSingle(exprs.len()));
    }
    Ok(exprs.remove(0))
  }
}

fn needs_quotes(s: &str) -> bool {
  s.is_empty()
    || s.starts_with('#')
    || s.chars().any(|c| c.is_whitespace() || c == '(' || c == ')' || c == '"')
}

impl fmt::Display for Sexp {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Leaf(s) if needs_quotes(s) => {
        write!(f, "\"")?;
        for c in s.chars() {
          match c {
            '"' => write!(f, "\\\"")?,
            '\\' => write!(f, "\\\\")?,
            '\n' => write!(f, "\\n")?,
            '\t' => write!(f, "\\t")?,
            c => write!(f, "{}", c)?,
          }
        }
        write!(f, "\"")
      }
      Self::Leaf(s) => write!(f, "{}", s),
      Self::List(children) => {
        write!(f, "(")?;
        for (idx, c) in children.iter().enumerate() {
          if idx > 0 {
            write!(f, " ")?;
          }
          write!(f, "{}", c)?;
        }
        write!(f, ")")
      }
    }
  }
}

type Infallible<'a, T> = (T, &'a str);
type ParseResult<'a, T> = Result<(T, &'a str), SexpError>;

/// helper macro for initializing a regex with lazy_static!
macro_rules! regex_static {
  ($name:ident, $pattern:expr) => {
    lazy_static! {
      static ref $name: Regex = Regex::new($pattern).unwrap();
    }
  };
}

/// Try to consume a regex, returning None if it doesn't match
fn optional_re<'a>(re: &'static Regex, s: &'a str) -> Infallible<'a, Option<&'a str>> {
  match re.find(s) {
    Some(m) if m.start() == 0 => {
      let (_, rest) = s.split_at(m.end());
      (Some(m.as_str()), rest)
    }
    _ => (None, s),
  }
}

/// Try to consume a char, returning None if it doesn't match
fn optional_char(c: char, s: &str) -> Infallible<'_, Option<char>> {
  match s.strip_prefix(c) {
    Some(rest) => (Some(c), rest),
    None => (None, s),
  }
}

fn snippet(s: &str) -> String {
  s.chars().take(30).collect()
}

/// Skips whitespace and `#` comments running to the end of the line
fn skip_whitespace(s: &str) -> &str {
  regex_static!(WHITESPACE_OR_COMMENT, r"^(\s+|#[^\n]*)+");
  optional_re(&*WHITESPACE_OR_COMMENT, s).1
}

fn unescape(body: &str) -> String {
  let mut out = String::with_capacity(body.len());
  let mut chars = body.chars();
  while let Some(c) = chars.next() {
    if c != '\\' {
      out.push(c);
      continue;
    }
    match chars.next() {
      Some('n') => out.push('\n'),
      Some('t') => out.push('\t'),
      Some(other) => out.push(other),
      None => out.push('\\'),
    }
  }
  out
}

fn parse_atom(s: &str) -> ParseResult<'_, Sexp> {
  regex_static!(QUOTED, r#"^"([^"\\]|\\.)*""#);
  regex_static!(BARE, r#"^[^\s()"]+"#);

  if s.starts_with('"') {
    return match optional_re(&*QUOTED, s) {
      (Some(q), rest) => Ok((Sexp::Leaf(unescape(&q[1..q.len() - 1])), rest)),
      (None, _) => Err(SexpError::UnterminatedString(snippet(s))),
    };
  }
  match optional_re(&*BARE, s) {
    (Some(name), rest) => Ok((Sexp::Leaf(name.to_string()), rest)),
    (None, _) => Err(SexpError::UnexpectedClose(snippet(s))),
  }
}

fn parse_expr(s: &str) -> ParseResult<'_, Sexp> {
  let (open, mut rem) = optional_char('(', s);
  if open.is_none() {
    return parse_atom(s);
  }

  let mut children = Vec::new();
  loop {
    rem = skip_whitespace(rem);
    if rem.is_empty() {
      return Err(SexpError::Unbalanced(snippet(s)));
    }
    if let (Some(_), rest) = optional_char(')', rem) {
      return Ok((Sexp::List(children), rest));
    }
    let (child, rest) = parse_expr(rem)?;
    children.push(child);
    rem = rest;
  }
}

#[test]
fn test_parse_nested() {
  let e: Sexp = "(rule $A ($B (c optional)) (ConstantFn (string \"x y\")))"
    .parse()
    .unwrap();
  assert_eq!(e.head(), Some("rule"));
  assert_eq!(e.len(), 4);
  assert_eq!(e.child(2).unwrap().child(1).unwrap().child_leaf(1), Some("optional"));
  assert_eq!(
    e.to_string(),
    "(rule $A ($B (c optional)) (ConstantFn (string \"x y\")))"
  );
}

#[test]
fn test_comments_and_many_forms() {
  let src = r#"
    # a comment line
    (def @x 3)   # trailing comment
    (rule $A (a) (IdentityFn))
  "#;
  let exprs = Sexp::parse_all(src).unwrap();
  assert_eq!(exprs.len(), 2);
  assert_eq!(exprs[1].child_leaf(1), Some("$A"));
}

#[test]
fn test_unbalanced() {
  assert!(matches!(
    "(a (b c)".parse::<Sexp>(),
    Err(SexpError::Unbalanced(_))
  ));
  assert!(matches!(")".parse::<Sexp>(), Err(SexpError::UnexpectedClose(_))));
  assert!(matches!("a b".parse::<Sexp>(), Err(SexpError::NotSingle(2))));
}

#[test]
fn test_escaped_string_roundtrip() {
  let e = Sexp::leaf("say \"hi\"");
  let text = e.to_string();
  assert_eq!(text, "\"say \\\"hi\\\"\"");
  assert_eq!(text.parse::<Sexp>().unwrap(), e);
}
