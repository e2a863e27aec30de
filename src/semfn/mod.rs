//! Semantic functions: the code attached to each grammar rule that turns the
//! children's derivations into zero or more new derivations.

mod basic;
mod join;
mod lexicon;
mod merge;
mod number;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub use self::basic::{ConcatFn, ConstantFn, IdentityFn, SelectFn};
pub use self::join::{JoinFn, JoinTypeCheck};
pub use self::lexicon::{LexicalEntry, SimpleLexicon, SimpleLexiconFn};
pub use self::merge::MergeFn;
pub use self::number::{NumberFn, NumberFnOptions};

use crate::derivation::{DerivIdx, Derivation, DerivationStream};
use crate::error::{GrammarError, SemanticError};
use crate::example::Example;
use crate::formula::Formula;
use crate::params::FeatureVector;
use crate::rules::Rule;
use crate::semtype::{SemType, TypeHierarchy};
use crate::sexp::Sexp;
use crate::type_inference::{infer_type, NullTypeLookup, TypeLookup};

pub trait SemanticFn: fmt::Debug + Send + Sync {
  /// Builds the derivations for one application of the owning rule
  fn call<'a>(&'a self, ctx: &'a SemContext, ex: &'a Example, ci: CallInfo) -> DerivationStream<'a>;

  /// Grammar text of this function, e.g. `(JoinFn forward)`
  fn to_sexp(&self) -> Sexp;

  /// True for a `JoinFn` that already carries its first argument
  fn has_bound_arg0(&self) -> bool {
    false
  }
}

/// What a semantic function knows about one child
#[derive(Debug, Clone)]
pub struct ChildInfo {
  pub idx: DerivIdx,
  pub cat: String,
  pub start: usize,
  pub end: usize,
  pub formula: Formula,
  pub sem_type: SemType,
  pub canonical_utterance: String,
}

impl ChildInfo {
  pub fn of(idx: DerivIdx, deriv: &Derivation) -> Self {
    Self {
      idx,
      cat: deriv.cat.clone(),
      start: deriv.start,
      end: deriv.end,
      formula: deriv.formula.clone(),
      sem_type: deriv.sem_type.clone(),
      canonical_utterance: deriv.canonical_utterance.clone(),
    }
  }
}

/// The rule being applied, the span it covers and the children it is applied to
#[derive(Debug, Clone)]
pub struct CallInfo {
  pub cat: String,
  pub start: usize,
  pub end: usize,
  pub rule: Arc<Rule>,
  pub children: Vec<ChildInfo>,
}

impl CallInfo {
  pub fn new(start: usize, end: usize, rule: Arc<Rule>, children: Vec<ChildInfo>) -> Self {
    Self {
      cat: rule.lhs.clone(),
      start,
      end,
      rule,
      children,
    }
  }

  pub fn child(&self, i: usize) -> Result<&ChildInfo, SemanticError> {
    self.children.get(i).ok_or(SemanticError::Arity {
      expected: i + 1,
      got: self.children.len(),
    })
  }

  pub fn expect_children(&self, n: usize) -> Result<(), SemanticError> {
    if self.children.len() != n {
      return Err(SemanticError::Arity {
        expected: n,
        got: self.children.len(),
      });
    }
    Ok(())
  }

  /// The string carried by child `i`, e.g. the text of a `$PHRASE`
  pub fn child_string_value(&self, i: usize) -> Result<String, SemanticError> {
    let child = self.child(i)?;
    child
      .formula
      .string_of()
      .ok_or_else(|| SemanticError::Invalid(format!("expected a string, got {}", child.formula)))
  }

  /// Children rendered for error messages
  pub fn describe_children(&self) -> String {
    self
      .children
      .iter()
      .map(|c| format!("{}({},{}) {}", c.cat, c.start, c.end, c.formula))
      .collect::<Vec<_>>()
      .join(", ")
  }
}

/// How a semantic function treats a candidate whose type came out invalid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TypeCheckPolicy {
  /// Drop the candidate
  #[default]
  Hard,
  /// Keep it, marked with a `typeCheck` feature
  Soft,
}

impl TypeCheckPolicy {
  /// Returns whether a candidate of type `sem_type` survives. Under the soft
  /// policy an invalid candidate gets the feature `typeCheck :: mismatch`.
  pub fn admit(&self, sem_type: &SemType, mismatch: &str, features: &mut FeatureVector) -> bool {
    if sem_type.is_valid() {
      return true;
    }
    match self {
      Self::Hard => false,
      Self::Soft => {
        features.add("typeCheck", mismatch, 1.0);
        true
      }
    }
  }
}

/// Session-wide state shared by the semantic functions of one parser
pub struct SemContext {
  pub hierarchy: TypeHierarchy,
  pub lookup: Box<dyn TypeLookup>,
  pub lexicon: SimpleLexicon,
  pub number: NumberFnOptions,
  pub join_coarse_check: JoinTypeCheck,
  pub join_type_check: TypeCheckPolicy,
  pub merge_type_check: TypeCheckPolicy,
}

impl Default for SemContext {
  fn default() -> Self {
    Self {
      hierarchy: TypeHierarchy::default(),
      lookup: Box::new(NullTypeLookup),
      lexicon: SimpleLexicon::default(),
      number: NumberFnOptions::default(),
      join_coarse_check: JoinTypeCheck::Apply,
      join_type_check: TypeCheckPolicy::Hard,
      merge_type_check: TypeCheckPolicy::Hard,
    }
  }
}

impl fmt::Debug for SemContext {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SemContext")
      .field("lexicon", &self.lexicon.len())
      .field("number", &self.number)
      .field("join_coarse_check", &self.join_coarse_check)
      .field("join_type_check", &self.join_type_check)
      .field("merge_type_check", &self.merge_type_check)
      .finish()
  }
}

impl SemContext {
  pub fn infer_type(&self, formula: &Formula) -> SemType {
    infer_type(formula, self.lookup.as_ref(), &self.hierarchy)
  }
}

type Constructor = Box<dyn Fn(&Sexp) -> Result<Arc<dyn SemanticFn>, GrammarError> + Send + Sync>;

/// Maps the head of a `(FooFn ...)` tree to a constructor
pub struct SemanticFnRegistry {
  constructors: HashMap<String, Constructor>,
}

impl fmt::Debug for SemanticFnRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut names = self.constructors.keys().collect::<Vec<_>>();
    names.sort();
    f.debug_struct("SemanticFnRegistry").field("names", &names).finish()
  }
}

impl Default for SemanticFnRegistry {
  fn default() -> Self {
    let mut registry = Self {
      constructors: HashMap::new(),
    };
    registry.register("ConstantFn", |t| Ok(Arc::new(ConstantFn::from_sexp(t)?)));
    registry.register("IdentityFn", |t| Ok(Arc::new(IdentityFn::from_sexp(t)?)));
    registry.register("SelectFn", |t| Ok(Arc::new(SelectFn::from_sexp(t)?)));
    registry.register("ConcatFn", |t| Ok(Arc::new(ConcatFn::from_sexp(t)?)));
    registry.register("NumberFn", |t| Ok(Arc::new(NumberFn::from_sexp(t)?)));
    registry.register("JoinFn", |t| Ok(Arc::new(JoinFn::from_sexp(t)?)));
    registry.register("MergeFn", |t| Ok(Arc::new(MergeFn::from_sexp(t)?)));
    registry.register("SimpleLexiconFn", |t| Ok(Arc::new(SimpleLexiconFn::from_sexp(t)?)));
    registry
  }
}

impl SemanticFnRegistry {
  /// Registers (or replaces) the constructor for `name`
  pub fn register<F>(&mut self, name: &str, constructor: F)
  where
    F: Fn(&Sexp) -> Result<Arc<dyn SemanticFn>, GrammarError> + Send + Sync + 'static,
  {
    self.constructors.insert(name.to_string(), Box::new(constructor));
  }

  pub fn contains(&self, name: &str) -> bool {
    self.constructors.contains_key(name)
  }

  /// Builds a semantic function from its grammar tree
  pub fn build(&self, tree: &Sexp) -> Result<Arc<dyn SemanticFn>, GrammarError> {
    let name = tree
      .head()
      .ok_or_else(|| GrammarError::UnknownSemanticFn(tree.to_string()))?;
    let constructor = self
      .constructors
      .get(name)
      .ok_or_else(|| GrammarError::UnknownSemanticFn(name.to_string()))?;
    constructor(tree)
  }
}

/// Shorthand for semantic function constructors rejecting their arguments
pub(crate) fn invalid_fn(tree: &Sexp, reason: impl Into<String>) -> GrammarError {
  GrammarError::InvalidSemanticFn {
    tree: tree.to_string(),
    reason: reason.into(),
  }
}
