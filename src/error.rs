use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::sexp::SexpError;

/// Malformed formula, value or type text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormulaError {
  #[error(transparent)]
  Sexp(#[from] SexpError),
  #[error("invalid value: {0}")]
  InvalidValue(String),
  #[error("invalid formula: {0}")]
  InvalidFormula(String),
  #[error("invalid type: {0}")]
  InvalidType(String),
}

/// Fatal grammar compile-time errors. Each names the offending statement.
#[derive(Debug, Error)]
pub enum GrammarError {
  #[error(transparent)]
  Sexp(#[from] SexpError),
  #[error("{stmt}: {source}")]
  Formula {
    stmt: String,
    #[source]
    source: FormulaError,
  },
  #[error("couldn't read {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
  #[error("invalid command: {0}")]
  InvalidCommand(String),
  #[error("undefined macro {name} in {stmt}")]
  UndefinedMacro { name: String, stmt: String },
  #[error("malformed statement {stmt}: {reason}")]
  Malformed { stmt: String, reason: String },
  #[error("include {0} has no file context to resolve against")]
  NoIncludeContext(String),
  #[error("can't binarize {rule}: {reason}")]
  Binarize { rule: String, reason: String },
  #[error("found cycle of unaries involving {0}")]
  UnaryCycle(String),
  #[error("unknown semantic function {0}")]
  UnknownSemanticFn(String),
  #[error("invalid semantic function {tree}: {reason}")]
  InvalidSemanticFn { tree: String, reason: String },
}

/// Raised by a semantic function while building derivations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SemanticError {
  #[error("expected {expected} argument(s), got {got}")]
  Arity { expected: usize, got: usize },
  #[error("{0}")]
  Invalid(String),
  #[error(transparent)]
  Formula(#[from] FormulaError),
}

/// Aborts a single parse
#[derive(Debug, Error)]
pub enum ParseError {
  #[error("composition failed: rule = {rule}, children = [{children}]: {source}")]
  Composition {
    rule: String,
    children: String,
    #[source]
    source: SemanticError,
  },
  #[error("compatibility is not set on {0}")]
  CompatibilityNotSet(String),
}
