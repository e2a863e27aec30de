use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, trace, warn};

use crate::chart::{Beam, Chart};
use crate::derivation::{DerivIdx, Derivation, DerivationArena, DerivationStream};
use crate::error::{ParseError, SemanticError};
use crate::example::Example;
use crate::params::Params;
use crate::rules::{Rule, LEMMA_PHRASE_CAT, LEMMA_TOKEN_CAT, NULL_RULE, PHRASE_CAT, ROOT_CAT, TOKEN_CAT};
use crate::semfn::{CallInfo, ChildInfo};

use super::coarse::CoarseChart;
use super::Parser;

/// The stream of one rule application, with what it was applied to
pub(crate) struct RuleApplication<'a> {
  pub rule: Arc<Rule>,
  pub children: Vec<DerivIdx>,
  pub stream: DerivationStream<'a>,
}

impl<'a> RuleApplication<'a> {
  /// A single derivation with no rule behind it, e.g. a token
  pub fn single(deriv: Derivation) -> Self {
    Self {
      rule: NULL_RULE.clone(),
      children: Vec::new(),
      stream: DerivationStream::single(deriv),
    }
  }

  pub fn next(&mut self, arena: &DerivationArena) -> Result<Option<Derivation>, ParseError> {
    match self.stream.next() {
      None => Ok(None),
      Some(Ok(deriv)) => Ok(Some(deriv)),
      Some(Err(source)) => Err(self.failure(arena, source)),
    }
  }

  /// The next derivation, left in the stream
  pub fn peek(&mut self, arena: &DerivationArena) -> Result<Option<&mut Derivation>, ParseError> {
    if matches!(self.stream.peek(), Some(Err(_))) {
      if let Some(Err(source)) = self.stream.next() {
        return Err(self.failure(arena, source));
      }
    }
    Ok(self.stream.peek_mut())
  }

  fn failure(&self, arena: &DerivationArena, source: SemanticError) -> ParseError {
    let children = self
      .children
      .iter()
      .map(|&c| {
        let child = &arena[c];
        format!("{}({},{}) {}", child.cat, child.start, child.end, child.formula)
      })
      .collect::<Vec<_>>()
      .join(", ");
    error!("Composition failed: rule = {}, children = [{}]: {}", self.rule, children, source);
    ParseError::Composition {
      rule: self.rule.to_string(),
      children,
      source,
    }
  }
}

/// Everything one parse of one example owns: the derivations, the chart
/// and the coarse pass that prunes it
pub(crate) struct ParserState<'a> {
  pub parser: &'a Parser,
  pub params: &'a Params,
  pub ex: &'a Example,
  pub num_tokens: usize,
  pub arena: DerivationArena,
  pub chart: Chart,
  pub coarse: Option<CoarseChart>,
  started: Instant,
}

impl<'a> ParserState<'a> {
  pub fn new(parser: &'a Parser, params: &'a Params, ex: &'a Example, coarse: Option<CoarseChart>) -> Self {
    let options = &parser.options;
    let beam = Beam::new(
      ex.beam_size.unwrap_or(options.beam_size),
      options.prune,
      options.derivation_score_noise,
      options.noise_seed,
    );
    Self {
      parser,
      params,
      ex,
      num_tokens: ex.num_tokens(),
      arena: DerivationArena::new(),
      chart: Chart::new(ex.num_tokens(), beam),
      coarse,
      started: Instant::now(),
    }
  }

  pub fn beam_size(&self) -> usize {
    self.chart.beam.size
  }

  pub fn parse_time(&self) -> Duration {
    self.started.elapsed()
  }

  pub fn coarse_allows(&self, cat: &str, start: usize, end: usize) -> bool {
    self.coarse.as_ref().map(|c| c.allows(cat, start, end)).unwrap_or(true)
  }

  pub fn coarse_allows_any<'c>(&self, mut cats: impl Iterator<Item = &'c str>, start: usize, end: usize) -> bool {
    match &self.coarse {
      Some(coarse) => cats.any(|cat| coarse.allows(cat, start, end)),
      None => true,
    }
  }

  /// Root rules only apply over the whole utterance
  pub fn can_build(&self, rule: &Rule, start: usize, end: usize) -> bool {
    if rule.lhs == ROOT_CAT && !(start == 0 && end == self.num_tokens) {
      return false;
    }
    self.coarse_allows(&rule.lhs, start, end)
  }

  pub fn derivation_limit_reached(&self) -> bool {
    self
      .parser
      .options
      .max_total_derivations
      .map(|max| self.chart.stats.total_derivs >= max)
      .unwrap_or(false)
  }

  /// Every token and every phrase, in plain and lemmatized form
  pub fn token_and_phrase_derivations(&self) -> Vec<Derivation> {
    let ex = self.ex;
    let mut derivs = Vec::new();
    for i in 0..self.num_tokens {
      derivs.push(Derivation::terminal(TOKEN_CAT, i, i + 1, ex.token(i), ex.token(i)));
      derivs.push(Derivation::terminal(LEMMA_TOKEN_CAT, i, i + 1, ex.lemma_token(i), ex.token(i)));
    }
    for i in 0..self.num_tokens {
      for j in (i + 1)..=self.num_tokens {
        let phrase = ex.phrase(i, j);
        derivs.push(Derivation::terminal(PHRASE_CAT, i, j, &phrase, &phrase));
        derivs.push(Derivation::terminal(LEMMA_PHRASE_CAT, i, j, &ex.lemma_phrase(i, j), &phrase));
      }
    }
    derivs
  }

  /// Runs the semantic function of `rule` over `children`
  pub fn apply_rule(&self, start: usize, end: usize, rule: &'a Arc<Rule>, children: &[DerivIdx]) -> RuleApplication<'a> {
    trace!("apply_rule {} {} {}", start, end, rule);
    let parser: &'a Parser = self.parser;
    let ex: &'a Example = self.ex;
    let infos = children.iter().map(|&c| ChildInfo::of(c, &self.arena[c])).collect();
    let ci = CallInfo::new(start, end, Arc::clone(rule), infos);
    let sem: &'a Rule = rule;
    RuleApplication {
      rule: Arc::clone(rule),
      children: children.to_vec(),
      stream: sem.sem.call(&parser.ctx, ex, ci),
    }
  }

  pub fn featurize_and_score(&mut self, deriv: &mut Derivation) {
    if deriv.is_featurized_and_scored() {
      warn!("Derivation already featurized: {} {}", deriv.cat, deriv.formula);
      return;
    }
    self.parser.extractor.extract_local(self.ex, &self.arena, deriv);
    deriv.compute_score_local(&self.arena, self.params);
    trace!(
      "featurized (score={}) {} {}: {} [rule: {}]",
      deriv.score,
      deriv.cat,
      self.ex.span_string(deriv.start, deriv.end),
      deriv.formula,
      deriv.rule
    );
    self.chart.stats.num_featurized += 1;
  }

  /// Appends to the chart; the cell is pruned later
  pub fn add_to_chart(&mut self, deriv: Derivation) -> Option<DerivIdx> {
    if self.parser.options.prune_error_values && deriv.value().map(|v| v.is_error()).unwrap_or(false) {
      return None;
    }
    self.chart.stats.total_derivs += 1;
    let (start, end, cat) = (deriv.start, deriv.end, deriv.cat.clone());
    let idx = self.arena.push(deriv);
    self.chart.push(start, end, &cat, idx);
    Some(idx)
  }

  /// Adds to the chart only if the cell isn't full, keeping the cell sorted
  pub fn add_to_bounded_chart(&mut self, deriv: Derivation) -> Option<DerivIdx> {
    self.chart.stats.total_derivs += 1;
    let (start, end, cat) = (deriv.start, deriv.end, deriv.cat.clone());
    if self.chart.get(start, end, &cat).len() >= self.beam_size() {
      self.chart.stats.fall_off_beam = true;
      return None;
    }
    let idx = self.arena.push(deriv);
    self.chart.push(start, end, &cat, idx);
    self.chart.sort_cell(&self.arena, start, end, &cat);
    Some(idx)
  }

  /// The root derivations over the whole utterance, best first
  pub fn root_derivations(&self) -> Vec<DerivIdx> {
    if self.num_tokens == 0 {
      return Vec::new();
    }
    self.chart.get(0, self.num_tokens, ROOT_CAT).to_vec()
  }
}
