use std::fmt;
use std::sync::Arc;

use crate::semfn::{IdentityFn, SemanticFn};

/// Category of the sentence-level derivations
pub const ROOT_CAT: &str = "$ROOT";
/// Built-in categories seeded by the parser
pub const TOKEN_CAT: &str = "$TOKEN";
pub const LEMMA_TOKEN_CAT: &str = "$LEMMA_TOKEN";
pub const PHRASE_CAT: &str = "$PHRASE";
pub const LEMMA_PHRASE_CAT: &str = "$LEMMA_PHRASE";

pub const BUILTIN_CATS: [&str; 4] = [TOKEN_CAT, LEMMA_TOKEN_CAT, PHRASE_CAT, LEMMA_PHRASE_CAT];

/// Prefix of categories invented by binarization
pub const INTERMEDIATE_PREFIX: &str = "$Intermediate";

const NULL_LHS: &str = "<null>";

lazy_static! {
  /// Attached to the seeded token and phrase derivations
  pub static ref NULL_RULE: Arc<Rule> = Arc::new(Rule::new(NULL_LHS, Vec::new(), Arc::new(IdentityFn::new())));
}

/// Categories start with `$`; everything else on a right-hand side is a token
pub fn is_cat(symbol: &str) -> bool {
  symbol.starts_with('$')
}

/// A binarized (or, before binarization, arbitrary-arity) production
#[derive(Debug, Clone)]
pub struct Rule {
  pub lhs: String,
  pub rhs: Vec<String>,
  pub sem: Arc<dyn SemanticFn>,
  /// Numeric metadata, e.g. `(floating 1)`
  pub info: Vec<(String, f64)>,
  /// The statement this rule was compiled from
  pub source: Option<String>,
}

impl Rule {
  pub fn new(lhs: impl Into<String>, rhs: Vec<String>, sem: Arc<dyn SemanticFn>) -> Self {
    Self {
      lhs: lhs.into(),
      rhs,
      sem,
      info: Vec::new(),
      source: None,
    }
  }

  pub fn with_info(mut self, info: Vec<(String, f64)>) -> Self {
    self.info = info;
    self
  }

  pub fn with_source(mut self, source: Option<String>) -> Self {
    self.source = source;
    self
  }

  pub fn is_null(&self) -> bool {
    self.lhs == NULL_LHS
  }

  pub fn len(&self) -> usize {
    self.rhs.len()
  }

  pub fn is_empty(&self) -> bool {
    self.rhs.is_empty()
  }

  /// `$A -> $B`
  pub fn is_cat_unary(&self) -> bool {
    self.rhs.len() == 1 && is_cat(&self.rhs[0])
  }

  pub fn is_rhs_terminals(&self) -> bool {
    self.rhs.iter().all(|s| !is_cat(s))
  }

  pub fn info_value(&self, key: &str) -> Option<f64> {
    self.info.iter().find(|(k, _)| k == key).map(|(_, v)| *v)
  }

  fn info_flag(&self, key: &str) -> bool {
    self.info_value(key).map(|v| v != 0.0).unwrap_or(false)
  }

  /// Floating rules are matched without anchoring to the utterance
  pub fn is_floating(&self, default_is_floating: bool) -> bool {
    match self.info_value("floating") {
      Some(v) => v != 0.0,
      None if self.info_flag("anchored") => false,
      None => default_is_floating,
    }
  }

  pub fn is_anchored(&self) -> bool {
    self.info_flag("anchored") || (self.info_value("floating").is_some() && !self.info_flag("floating"))
  }

  pub fn is_induced(&self) -> bool {
    self.info_flag("induced")
  }

  /// Text of the semantic function, as it appears in the grammar
  pub fn sem_repr(&self) -> String {
    self.sem.to_sexp().to_string()
  }
}

impl fmt::Display for Rule {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} ->", self.lhs)?;
    for s in self.rhs.iter() {
      write!(f, " {}", s)?;
    }
    write!(f, " {}", self.sem.to_sexp())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::semfn::ConstantFn;
  use crate::formula::Formula;

  #[test]
  fn test_rule_display() {
    let sem = Arc::new(ConstantFn::new(Formula::string("a"), None));
    let r = Rule::new("$X", vec!["a".to_string()], sem);
    assert_eq!(r.to_string(), "$X -> a (ConstantFn (string a))");
    assert!(r.is_rhs_terminals());
    assert!(!r.is_cat_unary());
  }

  #[test]
  fn test_rule_info() {
    let r = Rule::new("$A", vec!["$B".to_string()], Arc::new(IdentityFn::new()))
      .with_info(vec![("anchored".to_string(), 1.0)]);
    assert!(r.is_cat_unary());
    assert!(r.is_anchored());
    assert!(!r.is_floating(true));
    assert!(!r.is_induced());
    assert!(NULL_RULE.is_null());
  }
}
