//! Parsing an example into scored root derivations, with the CYK beam parser
//! or the best-first agenda parser.

mod agenda;
mod beam;
mod coarse;
mod expected;
mod state;
mod trie;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

pub use self::agenda::{AgendaOptions, ListAgenda, ParserAgenda, QueueAgenda, SamplingStrategy, SiblingIndex};
pub use self::coarse::{CoarseChart, CoarseParser};
pub use self::expected::{compute_expected_counts, exp_normalize, ExpectedCountsMode};
pub use self::trie::{sort_cat_unary_rules, Trie};

use self::agenda::AgendaSearch;
use self::state::ParserState;
use crate::chart::{Chart, PrunePolicy};
use crate::derivation::{probs, DerivIdx, Derivation, DerivationArena};
use crate::error::{GrammarError, ParseError};
use crate::evaluation::Evaluation;
use crate::example::Example;
use crate::executor::{ExactValueEvaluator, Executor, FormulaMatchExecutor, ValueEvaluator};
use crate::grammar::Grammar;
use crate::params::{FeatureExtractor, Params, RuleFeatureExtractor};
use crate::rules::Rule;
use crate::semfn::SemContext;
use crate::value::Value;

#[derive(Debug, Clone, Default)]
pub enum ParserKind {
  /// Span-length ordered CYK over the trie of rules
  #[default]
  Beam,
  /// Best-first over an agenda; needs a binarized grammar
  Agenda(AgendaOptions),
}

#[derive(Debug, Clone)]
pub struct ParserOptions {
  pub kind: ParserKind,
  /// Derivations kept per category and span
  pub beam_size: usize,
  pub prune: PrunePolicy,
  /// Uniform noise added to scores before pruning
  pub derivation_score_noise: f64,
  pub noise_seed: u64,
  /// Stop creating derivations after this many
  pub max_total_derivations: Option<usize>,
  /// Run a recognizer first and only build what can reach the root
  pub coarse_prune: bool,
  /// When not learning, execute only the best prediction
  pub execute_top_formula_only: bool,
  /// Keep derivations whose value is an error out of the chart
  pub prune_error_values: bool,
  pub expected_counts: ExpectedCountsMode,
  pub contrastive_margin: f64,
}

impl Default for ParserOptions {
  fn default() -> Self {
    Self {
      kind: ParserKind::default(),
      beam_size: 500,
      prune: PrunePolicy::default(),
      derivation_score_noise: 0.0,
      noise_seed: 1,
      max_total_derivations: None,
      coarse_prune: false,
      execute_top_formula_only: false,
      prune_error_values: false,
      expected_counts: ExpectedCountsMode::default(),
      contrastive_margin: 1e6,
    }
  }
}

enum Search {
  Beam,
  Agenda(AgendaOptions, SiblingIndex),
}

/// A compiled grammar with everything needed to parse examples against it.
/// Shared read-only by concurrent parses.
pub struct Parser {
  pub grammar: Grammar,
  pub ctx: SemContext,
  pub options: ParserOptions,
  extractor: Box<dyn FeatureExtractor>,
  executor: Box<dyn Executor>,
  value_evaluator: Box<dyn ValueEvaluator>,
  trie: Trie,
  cat_unary_rules: Vec<Arc<Rule>>,
  coarse: Option<CoarseParser>,
  search: Search,
}

impl Parser {
  pub fn new(grammar: Grammar, options: ParserOptions) -> Result<Self, GrammarError> {
    let mut trie = Trie::new();
    for rule in grammar.rules().iter().filter(|r| !r.is_cat_unary()) {
      trie.add(rule.clone());
    }
    let cat_unary_rules = sort_cat_unary_rules(grammar.rules())?;
    let coarse = if options.coarse_prune {
      Some(CoarseParser::new(grammar.rules())?)
    } else {
      None
    };
    let search = match &options.kind {
      ParserKind::Beam => Search::Beam,
      ParserKind::Agenda(agenda) => Search::Agenda(agenda.clone(), SiblingIndex::new(grammar.rules())?),
    };
    debug!(
      "parser: {} rules, {} cat unary, coarse pruning {}",
      grammar.rules().len(),
      cat_unary_rules.len(),
      if coarse.is_some() { "on" } else { "off" }
    );
    Ok(Self {
      grammar,
      ctx: SemContext::default(),
      options,
      extractor: Box::new(RuleFeatureExtractor),
      executor: Box::new(FormulaMatchExecutor),
      value_evaluator: Box::new(ExactValueEvaluator),
      trie,
      cat_unary_rules,
      coarse,
      search,
    })
  }

  pub fn with_context(mut self, ctx: SemContext) -> Self {
    self.ctx = ctx;
    self
  }

  pub fn with_extractor(mut self, extractor: impl FeatureExtractor + 'static) -> Self {
    self.extractor = Box::new(extractor);
    self
  }

  pub fn with_executor(mut self, executor: impl Executor + 'static) -> Self {
    self.executor = Box::new(executor);
    self
  }

  pub fn with_value_evaluator(mut self, evaluator: impl ValueEvaluator + 'static) -> Self {
    self.value_evaluator = Box::new(evaluator);
    self
  }

  /// Parses `ex`, executes the predictions, and compares them with the
  /// target if there is one. With `learning`, also computes the expected
  /// feature counts.
  pub fn parse(&self, params: &Params, ex: &Example, learning: bool) -> Result<ParseResult, ParseError> {
    let coarse = self.coarse.as_ref().map(|c| c.parse(ex));
    let coarse_time = coarse.as_ref().map(CoarseChart::parse_time);
    let mut state = ParserState::new(self, params, ex, coarse);
    match &self.search {
      Search::Beam => state.infer_beam()?,
      Search::Agenda(options, siblings) => AgendaSearch::new(options, siblings).infer(&mut state)?,
    }
    let parse_time = state.parse_time();
    let predictions = state.root_derivations();

    let ParserState { mut arena, chart, .. } = state;

    let target_value = match &ex.target_formula {
      Some(formula) => Some(self.executor.execute(formula, ex.context.as_ref()).value),
      None => ex.target_value.clone(),
    };
    for &idx in predictions.iter() {
      let deriv = &mut arena[idx];
      deriv.ensure_executed(self.executor.as_ref(), ex.context.as_ref());
      if let Some(target) = &target_value {
        deriv.set_compatibility(self.value_evaluator.compatibility(target, deriv.value()));
      }
      if self.options.execute_top_formula_only && !learning {
        break;
      }
    }

    let expected_counts = if learning {
      compute_expected_counts(&arena, &predictions, self.options.expected_counts, self.options.contrastive_margin)
    } else {
      None
    };

    let mut evaluation = Evaluation::new();
    evaluate_predictions(&mut arena, &predictions, target_value.is_some(), &mut evaluation);
    if let Some(time) = coarse_time {
      evaluation.add("coarseParseTime", time.as_secs_f64() * 1000.0);
    }
    chart.stats.add_to(&mut evaluation, ex.num_tokens(), parse_time);
    info!(
      "parsed {:?}: {} candidates, {}",
      ex.utterance,
      predictions.len(),
      evaluation.summary(" ")
    );

    Ok(ParseResult {
      arena,
      predictions,
      chart,
      target_value,
      evaluation,
      expected_counts,
    })
  }
}

/// Sets the probabilities of the predictions and records accuracy figures
fn evaluate_predictions(arena: &mut DerivationArena, predictions: &[DerivIdx], has_target: bool, eval: &mut Evaluation) {
  let scores = predictions.iter().map(|&i| arena[i].score).collect::<Vec<_>>();
  let probs = probs(&scores, 1.0);
  for (&idx, &prob) in predictions.iter().zip(probs.iter()) {
    arena[idx].prob = prob;
  }
  let compatibilities = predictions
    .iter()
    .map(|&i| {
      let c = arena[i].compatibility();
      if has_target && !c.is_nan() { c } else { 0.0 }
    })
    .collect::<Vec<_>>();

  // ties with the best prediction share the credit
  let mut num_top = 0;
  let mut top_mass = 0.0;
  while num_top < predictions.len() && (scores[num_top] - scores[0]).abs() < 1e-10 {
    top_mass += probs[num_top];
    num_top += 1;
  }
  let mut correct = 0.0;
  let mut part_correct = 0.0;
  for i in 0..num_top {
    if compatibilities[i] == 1.0 {
      correct += probs[i] / top_mass;
    }
    part_correct += compatibilities[i] * probs[i] / top_mass;
  }
  let oracle = compatibilities.iter().any(|&c| c == 1.0);
  let part_oracle = compatibilities.iter().cloned().fold(0.0, f64::max);

  eval.add("correct", correct);
  eval.add_bool("oracle", oracle);
  eval.add("partCorrect", part_correct);
  eval.add("partOracle", part_oracle);
  eval.add("numCandidates", predictions.len() as f64);
  if !predictions.is_empty() {
    eval.add("parsedNumCandidates", predictions.len() as f64);
  }
  if let Some(i) = compatibilities.iter().position(|&c| c == 1.0) {
    let deriv = &arena[predictions[i]];
    eval.add("correctMaxBeamPosition", deriv.max_beam_position as f64);
    eval.add("correctMaxUnsortedBeamPosition", deriv.max_unsorted_beam_position as f64);
  }
  for &idx in predictions.iter() {
    if let Some(stats) = &arena[idx].executor_stats {
      eval.merge(stats);
    }
  }
}

/// Everything one parse produced. The derivations live in `arena`; the
/// predictions are the root derivations over the whole utterance, best first.
#[derive(Debug)]
pub struct ParseResult {
  pub arena: DerivationArena,
  pub predictions: Vec<DerivIdx>,
  pub chart: Chart,
  /// What the predictions were compared against, if anything
  pub target_value: Option<Value>,
  pub evaluation: Evaluation,
  /// Feature gradient, when parsed for learning
  pub expected_counts: Option<HashMap<String, f64>>,
}

impl ParseResult {
  pub fn predictions(&self) -> impl Iterator<Item = &Derivation> {
    self.predictions.iter().map(|&i| &self.arena[i])
  }

  pub fn best(&self) -> Option<&Derivation> {
    self.predictions().next()
  }

  pub fn len(&self) -> usize {
    self.predictions.len()
  }

  pub fn is_empty(&self) -> bool {
    self.predictions.is_empty()
  }

  /// Predictions whose value matches the target exactly. The guard against
  /// unset compatibilities compares with NaN, so it never fires and unset
  /// compatibilities simply count as wrong.
  #[allow(invalid_nan_comparisons)]
  pub fn correct_derivations(&self) -> Result<Vec<DerivIdx>, ParseError> {
    let mut correct = Vec::new();
    for &idx in self.predictions.iter() {
      let deriv = &self.arena[idx];
      if deriv.compatibility() == f64::NAN {
        return Err(ParseError::CompatibilityNotSet(deriv.formula.to_string()));
      }
      if deriv.compatibility() == 1.0 {
        correct.push(idx);
      }
    }
    Ok(correct)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::example::{LanguageAnalyzer, LanguageInfo, SimpleAnalyzer};
  use crate::executor::ArithmeticExecutor;
  use crate::formula::Formula;
  use crate::rules::ROOT_CAT;

  const NUMBERS: &str = r#"
    (rule $Number ($TOKEN) (NumberFn))
    (rule $Number ($Number $Number) (ConcatFn " "))
    (rule $ROOT ($Number) (IdentityFn))
  "#;

  fn example(utterance: &str) -> Example {
    Example::new(utterance).analyze(&SimpleAnalyzer::default())
  }

  fn parser(grammar: &str, options: ParserOptions) -> Parser {
    Parser::new(grammar.parse().unwrap(), options).unwrap()
  }

  fn count(parser: &Parser, utterance: &str) -> usize {
    parser.parse(&Params::new(), &example(utterance), false).unwrap().len()
  }

  fn agenda_options() -> ParserOptions {
    ParserOptions {
      kind: ParserKind::Agenda(AgendaOptions::default()),
      ..ParserOptions::default()
    }
  }

  #[test]
  fn test_ambiguity_counts() {
    let beam = parser(NUMBERS, ParserOptions::default());
    assert_eq!(count(&beam, "1 +"), 0);
    assert_eq!(count(&beam, "1"), 1);
    assert_eq!(count(&beam, "1 2"), 1);
    assert_eq!(count(&beam, "1 2 3"), 2);
    assert_eq!(count(&beam, "10 20 30 40 50 60"), 42);
    assert_eq!(count(&beam, ""), 0);
  }

  struct NoLemmas;

  impl LanguageAnalyzer for NoLemmas {
    fn analyze(&self, utterance: &str) -> LanguageInfo {
      LanguageInfo {
        tokens: utterance.split_whitespace().map(str::to_string).collect(),
        ..Default::default()
      }
    }
  }

  #[test]
  fn test_analyzer_without_lemmas() {
    let words = r#"
      (rule $Word ($LEMMA_TOKEN) (IdentityFn))
      (rule $Word ($Word $Word) (ConcatFn " "))
      (rule $ROOT ($Word) (IdentityFn))
    "#;
    let ex = Example::new("red green blue").analyze(&NoLemmas);
    for options in [ParserOptions::default(), agenda_options()] {
      let result = parser(words, options).parse(&Params::new(), &ex, false).unwrap();
      assert_eq!(result.len(), 2);
    }
  }

  #[test]
  fn test_agenda_counts_match_beam() {
    let agenda = parser(NUMBERS, agenda_options());
    assert_eq!(count(&agenda, "1 +"), 0);
    assert_eq!(count(&agenda, "1"), 1);
    assert_eq!(count(&agenda, "1 2 3"), 2);
    assert_eq!(count(&agenda, "10 20 30 40 50 60"), 42);
  }

  #[test]
  fn test_coarse_pruning_keeps_results() {
    let coarse = parser(
      NUMBERS,
      ParserOptions {
        coarse_prune: true,
        ..ParserOptions::default()
      },
    );
    let plain = parser(NUMBERS, ParserOptions::default());
    for utterance in ["1 +", "1 2 3", "10 20 30 40 50 60"] {
      let a = coarse.parse(&Params::new(), &example(utterance), false).unwrap();
      let b = plain.parse(&Params::new(), &example(utterance), false).unwrap();
      let formulas = |r: &ParseResult| r.predictions().map(|d| d.formula.to_string()).collect::<Vec<_>>();
      assert_eq!(formulas(&a), formulas(&b));
      assert!(a.evaluation.get("coarseParseTime").is_some());
      assert!(a.chart.stats.total_derivs <= b.chart.stats.total_derivs);
    }
  }

  #[test]
  fn test_concatenated_bracketings() {
    let beam = parser(NUMBERS, ParserOptions::default());
    let result = beam.parse(&Params::new(), &example("1 2 3"), false).unwrap();
    let formulas = result.predictions().map(|d| d.formula.clone()).collect::<Vec<_>>();
    assert_eq!(formulas, vec![Formula::string("1 2 3"), Formula::string("1 2 3")]);
    let trees = result
      .predictions()
      .map(|d| {
        let child = &result.arena[d.children[0]];
        (result.arena[child.children[0]].end, child.end)
      })
      .collect::<Vec<_>>();
    assert!(trees.contains(&(1, 3)));
    assert!(trees.contains(&(2, 3)));
    assert!(result.predictions().all(|d| d.is_root(3)));
  }

  #[test]
  fn test_terminal_rules_in_both_parsers() {
    let grammar = r#"
      (rule $ROOT (hello world) (ConstantFn (string hi)))
      (rule $ROOT ($Greeting world) (IdentityFn))
      (rule $Greeting (hi) (ConstantFn (string hey)))
    "#;
    for options in [ParserOptions::default(), agenda_options()] {
      let p = parser(grammar, options);
      let hello = p.parse(&Params::new(), &example("hello world"), false).unwrap();
      assert_eq!(hello.best().map(|d| d.formula.clone()), Some(Formula::string("hi")));
      let hi = p.parse(&Params::new(), &example("hi world"), false).unwrap();
      assert_eq!(hi.best().map(|d| d.formula.clone()), Some(Formula::string("hey")));
      assert_eq!(count(&p, "goodbye world"), 0);
    }
  }

  #[test]
  fn test_root_only_over_the_whole_utterance() {
    for options in [ParserOptions::default(), agenda_options()] {
      let p = parser(NUMBERS, options);
      let result = p.parse(&Params::new(), &example("1 2"), false).unwrap();
      assert_eq!(result.len(), 1);
      assert_eq!(result.chart.get(0, 1, "$Number").len(), 1);
      assert!(result.chart.get(0, 1, ROOT_CAT).is_empty());
      assert!(result.chart.get(1, 2, ROOT_CAT).is_empty());
    }
  }

  #[test]
  fn test_execution_and_evaluation() {
    let grammar = r#"
      (rule $Number ($TOKEN) (NumberFn))
      (rule $Sum ($Number plus $Number) (lambda x (lambda y (+ (var x) (var y)))))
      (rule $ROOT ($Sum) (IdentityFn))
    "#;
    let p = parser(grammar, ParserOptions::default()).with_executor(ArithmeticExecutor);
    let ex = example("3 plus 4").with_target_value(Value::number(7.0));
    let result = p.parse(&Params::new(), &ex, false).unwrap();
    let best = result.best().unwrap();
    assert_eq!(best.value(), Some(&Value::number(7.0)));
    assert_eq!(best.compatibility(), 1.0);
    assert_eq!(result.correct_derivations().unwrap(), vec![result.predictions[0]]);
    assert_eq!(result.evaluation.mean("correct"), Some(1.0));
    assert_eq!(result.evaluation.mean("oracle"), Some(1.0));
    assert_eq!(result.evaluation.mean("numCandidates"), Some(1.0));
    assert_eq!(result.evaluation.mean("numTokens"), Some(3.0));
    assert!((best.prob - 1.0).abs() < 1e-12);

    let wrong = example("3 plus 4").with_target_value(Value::number(8.0));
    let result = p.parse(&Params::new(), &wrong, false).unwrap();
    assert!(result.correct_derivations().unwrap().is_empty());
    assert_eq!(result.evaluation.mean("correct"), Some(0.0));
  }

  #[test]
  fn test_unset_compatibility_counts_as_wrong() {
    let p = parser(NUMBERS, ParserOptions::default());
    let result = p.parse(&Params::new(), &example("1 2"), false).unwrap();
    assert!(result.best().unwrap().compatibility().is_nan());
    assert!(result.correct_derivations().unwrap().is_empty());
  }

  #[test]
  fn test_rule_weights_rank_predictions() {
    let grammar = r#"
      (rule $ROOT ($TOKEN) (ConstantFn (string a)))
      (rule $ROOT ($TOKEN) (ConstantFn (string b)))
    "#;
    let p = parser(grammar, ParserOptions::default());
    let params = Params::new();
    let b_rule = p.grammar.rules()[1].to_string();
    params.set_weight(&format!("rule :: {}", b_rule), 2.0);
    let result = p.parse(&params, &example("x"), false).unwrap();
    let formulas = result.predictions().map(|d| d.formula.clone()).collect::<Vec<_>>();
    assert_eq!(formulas, vec![Formula::string("b"), Formula::string("a")]);
    assert!(result.best().unwrap().score > 1.9);
  }

  #[test]
  fn test_learning_moves_weights_to_the_target() {
    let grammar = r#"
      (rule $ROOT ($TOKEN) (ConstantFn (string a)))
      (rule $ROOT ($TOKEN) (ConstantFn (string b)))
    "#;
    for kind in [ParserKind::Beam, ParserKind::Agenda(AgendaOptions::default())] {
      let p = parser(
        grammar,
        ParserOptions {
          kind,
          ..ParserOptions::default()
        },
      );
      let params = Params::new();
      let ex = example("x").with_target_value(Value::string("b"));
      let result = p.parse(&params, &ex, true).unwrap();
      let counts = result.expected_counts.clone().unwrap();
      params.update(&counts);
      let result = p.parse(&params, &ex, false).unwrap();
      assert_eq!(result.best().map(|d| d.formula.clone()), Some(Formula::string("b")));
      assert_eq!(result.evaluation.mean("correct"), Some(1.0));
    }
  }

  #[test]
  fn test_beam_prunes_cells() {
    let p = parser(
      NUMBERS,
      ParserOptions {
        beam_size: 3,
        ..ParserOptions::default()
      },
    );
    let result = p.parse(&Params::new(), &example("10 20 30 40 50 60"), false).unwrap();
    assert_eq!(result.len(), 3);
    assert!(result.chart.stats.fall_off_beam);
    assert_eq!(result.evaluation.mean("fallOffBeam"), Some(1.0));

    let mut ex = example("10 20 30 40 50 60");
    ex.beam_size = Some(1);
    assert_eq!(p.parse(&Params::new(), &ex, false).unwrap().len(), 1);
  }

  #[test]
  fn test_agenda_stops_when_the_root_is_full() {
    let mut options = agenda_options();
    options.beam_size = 5;
    let p = parser(NUMBERS, options);
    let result = p.parse(&Params::new(), &example("10 20 30 40 50 60"), false).unwrap();
    assert_eq!(result.len(), 5);
  }

  #[test]
  fn test_sampling_agenda() {
    let options = ParserOptions {
      kind: ParserKind::Agenda(AgendaOptions {
        sampling: SamplingStrategy::Sample { seed: 7 },
        always_unroll: true,
      }),
      ..ParserOptions::default()
    };
    let p = parser(NUMBERS, options);
    assert_eq!(count(&p, "1 2 3 4"), 5);
  }

  #[test]
  fn test_max_total_derivations() {
    let p = parser(
      NUMBERS,
      ParserOptions {
        max_total_derivations: Some(10),
        ..ParserOptions::default()
      },
    );
    let result = p.parse(&Params::new(), &example("10 20 30 40 50 60"), false).unwrap();
    assert!(result.is_empty());
    // tokens and phrases are always seeded
    assert_eq!(result.chart.stats.total_derivs, 6 * 2 + 21 * 2);
  }

  #[test]
  fn test_composition_error_aborts_the_parse() {
    let grammar = r#"
      (rule $ROOT ($TOKEN $TOKEN) (SelectFn 5))
    "#;
    let p = parser(grammar, ParserOptions::default());
    let err = p.parse(&Params::new(), &example("a b"), false).unwrap_err();
    assert!(matches!(err, ParseError::Composition { .. }));
  }

  #[test]
  fn test_agenda_needs_a_binarized_grammar() {
    let mut g = Grammar::new(crate::grammar::GrammarOptions {
      binarize: false,
      ..Default::default()
    });
    g.add_statements("(rule $ROOT ($TOKEN $TOKEN $TOKEN) (ConcatFn \",\"))", None).unwrap();
    assert!(matches!(Parser::new(g, agenda_options()), Err(GrammarError::Binarize { .. })));
  }
}
