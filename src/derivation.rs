//! Derivations, the arena that owns them, and the lazy streams semantic
//! functions produce them through.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::iter::Peekable;
use std::ops::{Index, IndexMut};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use crate::error::SemanticError;
use crate::evaluation::Evaluation;
use crate::example::ContextValue;
use crate::executor::Executor;
use crate::formula::Formula;
use crate::params::{FeatureVector, Params};
use crate::rules::{Rule, NULL_RULE};
use crate::semfn::CallInfo;
use crate::semtype::SemType;
use crate::sexp::Sexp;
use crate::value::Value;

static CREATION_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_creation_index() -> u64 {
  CREATION_COUNTER.fetch_add(1, AtomicOrdering::Relaxed)
}

/// Handle of a derivation inside a `DerivationArena`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DerivIdx(pub u32);

/// A category over a span, built by a rule from child derivations.
///
/// What a derivation is (its span, category, rule, children, formula and
/// type) is fixed when it is created and only readable from outside the
/// crate; scores, features, value and compatibility are filled in later.
///
/// ```
/// use semparse::Derivation;
///
/// let d = Derivation::terminal("$TOKEN", 0, 1, "boston", "boston");
/// assert_eq!((d.cat(), d.start(), d.end()), ("$TOKEN", 0, 1));
/// assert_eq!(d.formula().to_string(), "(string boston)");
/// assert!(d.children().is_empty());
/// ```
///
/// ```compile_fail
/// let mut d = semparse::Derivation::terminal("$TOKEN", 0, 1, "boston", "boston");
/// d.formula = semparse::Formula::string("new york");
/// ```
#[derive(Debug, Clone)]
pub struct Derivation {
  pub(crate) cat: String,
  pub(crate) start: usize,
  pub(crate) end: usize,
  pub(crate) rule: Arc<Rule>,
  pub(crate) children: Vec<DerivIdx>,
  pub(crate) formula: Formula,
  pub(crate) sem_type: SemType,
  pub canonical_utterance: String,
  pub local_features: FeatureVector,
  /// NaN until featurized and scored
  pub score: f64,
  pub prob: f64,
  compatibility: f64,
  value: Option<Value>,
  pub executor_stats: Option<Evaluation>,
  /// Tie-break for equal scores; increases with every derivation created
  pub creation_index: u64,
  pub max_beam_position: i32,
  pub max_unsorted_beam_position: i32,
  pub pre_sort_beam_position: i32,
  pub post_sort_beam_position: i32,
}

impl Derivation {
  #[allow(clippy::too_many_arguments)]
  fn build(
    cat: String,
    start: usize,
    end: usize,
    rule: Arc<Rule>,
    children: Vec<DerivIdx>,
    formula: Formula,
    sem_type: SemType,
    canonical_utterance: String,
  ) -> Self {
    Self {
      cat,
      start,
      end,
      rule,
      children,
      formula,
      sem_type,
      canonical_utterance,
      local_features: FeatureVector::new(),
      score: f64::NAN,
      prob: f64::NAN,
      compatibility: f64::NAN,
      value: None,
      executor_stats: None,
      creation_index: next_creation_index(),
      max_beam_position: -1,
      max_unsorted_beam_position: -1,
      pre_sort_beam_position: -1,
      post_sort_beam_position: -1,
    }
  }

  /// A derivation produced by applying `ci.rule` to `ci.children`
  pub fn from_call(ci: &CallInfo, formula: Formula, sem_type: SemType) -> Self {
    let canonical_utterance = ci
      .children
      .iter()
      .map(|c| c.canonical_utterance.as_str())
      .collect::<Vec<_>>()
      .join(" ");
    Self::build(
      ci.cat.clone(),
      ci.start,
      ci.end,
      ci.rule.clone(),
      ci.children.iter().map(|c| c.idx).collect(),
      formula,
      sem_type,
      canonical_utterance,
    )
  }

  /// A token or phrase derivation, carrying its text as a string formula
  pub fn terminal(cat: &str, start: usize, end: usize, text: &str, canonical_utterance: &str) -> Self {
    Self::build(
      cat.to_string(),
      start,
      end,
      NULL_RULE.clone(),
      Vec::new(),
      Formula::string(text),
      SemType::text(),
      canonical_utterance.to_string(),
    )
  }

  pub fn with_feature(mut self, domain: &str, name: &str, value: f64) -> Self {
    self.local_features.add(domain, name, value);
    self
  }

  pub fn is_featurized_and_scored(&self) -> bool {
    !self.score.is_nan()
  }

  pub fn is_root(&self, num_tokens: usize) -> bool {
    self.cat == crate::rules::ROOT_CAT && self.start == 0 && self.end == num_tokens
  }

  pub fn cat(&self) -> &str {
    &self.cat
  }

  pub fn start(&self) -> usize {
    self.start
  }

  pub fn end(&self) -> usize {
    self.end
  }

  pub fn rule(&self) -> &Arc<Rule> {
    &self.rule
  }

  pub fn children(&self) -> &[DerivIdx] {
    &self.children
  }

  pub fn formula(&self) -> &Formula {
    &self.formula
  }

  pub fn sem_type(&self) -> &SemType {
    &self.sem_type
  }

  pub fn compatibility(&self) -> f64 {
    self.compatibility
  }

  /// Compatibility is assigned once, by the value evaluator
  pub fn set_compatibility(&mut self, compatibility: f64) {
    if self.compatibility.is_nan() {
      self.compatibility = compatibility;
    }
  }

  pub fn value(&self) -> Option<&Value> {
    self.value.as_ref()
  }

  pub fn is_executed(&self) -> bool {
    self.value.is_some()
  }

  /// Runs the executor on the formula, unless that already happened
  pub fn ensure_executed(&mut self, executor: &dyn Executor, context: Option<&ContextValue>) {
    if self.is_executed() {
      return;
    }
    let response = executor.execute(&self.formula, context);
    self.value = Some(response.value);
    self.executor_stats = Some(response.stats);
  }

  /// Score from the local features plus the (already computed) children scores
  pub fn compute_score_local(&mut self, arena: &DerivationArena, params: &Params) {
    self.score = self.local_features.dot_product(params)
      + self.children.iter().map(|&c| arena[c].score).sum::<f64>();
  }

  pub fn increment_local_feature_vector(&self, factor: f64, map: &mut HashMap<String, f64>) {
    self.local_features.increment(factor, map);
  }

  /// Adds `factor` times the features of this derivation and all of its descendants
  pub fn increment_all_feature_vector(&self, arena: &DerivationArena, factor: f64, map: &mut HashMap<String, f64>) {
    self.local_features.increment(factor, map);
    for &c in self.children.iter() {
      arena[c].increment_all_feature_vector(arena, factor, map);
    }
  }

  /// Features of the whole derivation tree
  pub fn all_feature_vector(&self, arena: &DerivationArena) -> HashMap<String, f64> {
    let mut map = HashMap::new();
    self.increment_all_feature_vector(arena, 1.0, &mut map);
    map
  }

  /// `(derivation (formula ..) (value ..) (type ..) ...)`, with the children
  /// nested when `recursive`
  pub fn to_lisp_tree(&self, arena: &DerivationArena, recursive: bool) -> Sexp {
    let pair = |key: &str, value: Sexp| Sexp::list(vec![Sexp::leaf(key), value]);
    let mut children = vec![Sexp::leaf("derivation")];
    children.push(pair("formula", self.formula.to_sexp()));
    if let Some(value) = &self.value {
      children.push(pair("value", value.to_sexp()));
    }
    children.push(pair("type", self.sem_type.to_sexp()));
    if !self.score.is_nan() {
      children.push(pair("score", Sexp::leaf(format!("{}", self.score))));
    }
    if !self.prob.is_nan() {
      children.push(pair("prob", Sexp::leaf(format!("{}", self.prob))));
    }
    if !self.compatibility.is_nan() {
      children.push(pair("compatibility", Sexp::leaf(format!("{}", self.compatibility))));
    }
    children.push(pair("canonicalUtterance", Sexp::leaf(self.canonical_utterance.clone())));
    children.push(pair("cat", Sexp::leaf(self.cat.clone())));
    if recursive {
      for &c in self.children.iter() {
        children.push(arena[c].to_lisp_tree(arena, true));
      }
    }
    Sexp::list(children)
  }
}

/// Descending score, then ascending creation index. Unscored derivations sort last.
pub fn compare_by_score(a: &Derivation, b: &Derivation) -> Ordering {
  let key = |d: &Derivation| if d.score.is_nan() { f64::NEG_INFINITY } else { d.score };
  key(b)
    .partial_cmp(&key(a))
    .unwrap_or(Ordering::Equal)
    .then(a.creation_index.cmp(&b.creation_index))
}

/// Normalized `exp(score / temperature)` over `scores`
pub fn probs(scores: &[f64], temperature: f64) -> Vec<f64> {
  if scores.is_empty() {
    return Vec::new();
  }
  let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
  if max == f64::NEG_INFINITY || max.is_nan() {
    return vec![1.0 / scores.len() as f64; scores.len()];
  }
  let exps = scores
    .iter()
    .map(|s| ((s - max) / temperature).exp())
    .collect::<Vec<_>>();
  let sum = exps.iter().sum::<f64>();
  exps.into_iter().map(|e| e / sum).collect()
}

/// Owns every derivation created while parsing one example
#[derive(Debug, Default)]
pub struct DerivationArena {
  derivations: Vec<Derivation>,
}

impl DerivationArena {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&mut self, deriv: Derivation) -> DerivIdx {
    let idx = DerivIdx(self.derivations.len() as u32);
    self.derivations.push(deriv);
    idx
  }

  pub fn get(&self, idx: DerivIdx) -> Option<&Derivation> {
    self.derivations.get(idx.0 as usize)
  }

  pub fn get_mut(&mut self, idx: DerivIdx) -> Option<&mut Derivation> {
    self.derivations.get_mut(idx.0 as usize)
  }

  pub fn len(&self) -> usize {
    self.derivations.len()
  }

  pub fn is_empty(&self) -> bool {
    self.derivations.is_empty()
  }

  /// Sorts handles with `compare_by_score`
  pub fn sort_by_score(&self, idxs: &mut [DerivIdx]) {
    idxs.sort_by(|&a, &b| compare_by_score(&self[a], &self[b]));
  }

  /// Rescores the whole tree below `idx` bottom-up
  pub fn compute_score(&mut self, idx: DerivIdx, params: &Params) -> f64 {
    let children = self[idx].children.clone();
    let mut score = self[idx].local_features.dot_product(params);
    for c in children {
      score += self.compute_score(c, params);
    }
    self[idx].score = score;
    score
  }

  /// Whether every rule below `idx` is anchored to the utterance
  pub fn all_anchored(&self, idx: DerivIdx, default_is_floating: bool) -> bool {
    let deriv = &self[idx];
    if !deriv.rule.is_null() && deriv.rule.is_floating(default_is_floating) {
      return false;
    }
    deriv.children.iter().all(|&c| self.all_anchored(c, default_is_floating))
  }
}

impl Index<DerivIdx> for DerivationArena {
  type Output = Derivation;

  fn index(&self, idx: DerivIdx) -> &Derivation {
    &self.derivations[idx.0 as usize]
  }
}

impl IndexMut<DerivIdx> for DerivationArena {
  fn index_mut(&mut self, idx: DerivIdx) -> &mut Derivation {
    &mut self.derivations[idx.0 as usize]
  }
}

pub type DerivationResult = Result<Derivation, SemanticError>;

type BoxedDerivations<'a> = Box<dyn Iterator<Item = DerivationResult> + 'a>;

/// Lazily produces the derivations of one rule application. Single pass,
/// never rewound.
pub struct DerivationStream<'a> {
  inner: Peekable<BoxedDerivations<'a>>,
  estimated_size: usize,
}

impl fmt::Debug for DerivationStream<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("DerivationStream")
      .field("estimated_size", &self.estimated_size)
      .finish()
  }
}

impl<'a> DerivationStream<'a> {
  /// `estimated_size` is an upper bound on the number of items
  pub fn new(iter: impl Iterator<Item = DerivationResult> + 'a, estimated_size: usize) -> Self {
    let boxed: BoxedDerivations<'a> = Box::new(iter);
    Self {
      inner: boxed.peekable(),
      estimated_size,
    }
  }

  pub fn empty() -> Self {
    Self::new(std::iter::empty(), 0)
  }

  pub fn single(deriv: Derivation) -> Self {
    Self::new(std::iter::once(Ok(deriv)), 1)
  }

  pub fn from_vec(derivs: Vec<Derivation>) -> Self {
    let n = derivs.len();
    Self::new(derivs.into_iter().map(Ok), n)
  }

  /// A stream whose only item is `err`
  pub fn error(err: SemanticError) -> Self {
    Self::new(std::iter::once(Err(err)), 1)
  }

  pub fn has_next(&mut self) -> bool {
    self.inner.peek().is_some()
  }

  pub fn peek(&mut self) -> Option<&DerivationResult> {
    self.inner.peek()
  }

  /// The next derivation, left in place, if it isn't an error
  pub fn peek_mut(&mut self) -> Option<&mut Derivation> {
    match self.inner.peek_mut() {
      Some(Ok(deriv)) => Some(deriv),
      _ => None,
    }
  }

  pub fn estimated_size(&self) -> usize {
    self.estimated_size
  }
}

impl Iterator for DerivationStream<'_> {
  type Item = DerivationResult;

  fn next(&mut self) -> Option<DerivationResult> {
    let item = self.inner.next()?;
    self.estimated_size = self.estimated_size.saturating_sub(1);
    Some(item)
  }
}
