//! Best-first parsing: pending rule applications wait on an agenda ordered
//! by the score of the next derivation they would produce.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use indexmap::IndexMap;
use ordered_float::OrderedFloat;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace, warn};

use crate::derivation::{probs, DerivIdx, DerivationStream};
use crate::error::{GrammarError, ParseError};
use crate::rules::{Rule, ROOT_CAT};

use super::state::{ParserState, RuleApplication};

/// Tie-break between equal scores: earlier pushes win
const EPSILON: f64 = 10e-20;

/// Agendas of sorted lists get re-sorted after this many pushes
const SORT_EVERY: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SamplingStrategy {
  /// Always pop the best item
  #[default]
  Max,
  /// Pop an item drawn from the softmax over the items' scores
  Sample { seed: u64 },
}

#[derive(Debug, Clone, Default)]
pub struct AgendaOptions {
  pub sampling: SamplingStrategy,
  /// Split streams that promise more than one derivation into one item each
  pub always_unroll: bool,
}

/// A worklist of items with priorities
pub trait ParserAgenda<T> {
  fn add(&mut self, item: T, priority: f64);
  /// Removes and returns the highest-priority item
  fn pop(&mut self) -> Option<T>;
  fn sort(&mut self);
  fn len(&self) -> usize;
  fn is_empty(&self) -> bool {
    self.len() == 0
  }
  fn clear(&mut self);
  /// Random access, where the agenda supports it
  fn get(&self, i: usize) -> Option<&T>;
  fn remove(&mut self, i: usize) -> Option<T>;
}

/// Unordered list; pop scans for the maximum
#[derive(Debug)]
pub struct ListAgenda<T> {
  items: Vec<(T, f64)>,
}

impl<T> Default for ListAgenda<T> {
  fn default() -> Self {
    Self { items: Vec::new() }
  }
}

impl<T> ListAgenda<T> {
  pub fn new() -> Self {
    Self::default()
  }
}

impl<T> ParserAgenda<T> for ListAgenda<T> {
  fn add(&mut self, item: T, priority: f64) {
    self.items.push((item, priority));
  }

  fn pop(&mut self) -> Option<T> {
    let mut best: Option<(usize, f64)> = None;
    for (i, (_, priority)) in self.items.iter().enumerate() {
      if best.map(|(_, p)| *priority > p).unwrap_or(true) {
        best = Some((i, *priority));
      }
    }
    best.and_then(|(i, _)| self.remove(i))
  }

  /// Stable, highest priority first
  fn sort(&mut self) {
    self
      .items
      .sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
  }

  fn len(&self) -> usize {
    self.items.len()
  }

  fn clear(&mut self) {
    self.items.clear();
  }

  fn get(&self, i: usize) -> Option<&T> {
    self.items.get(i).map(|(item, _)| item)
  }

  fn remove(&mut self, i: usize) -> Option<T> {
    if i < self.items.len() {
      Some(self.items.swap_remove(i).0)
    } else {
      None
    }
  }
}

struct QueueEntry<T> {
  priority: OrderedFloat<f64>,
  seq: Reverse<u64>,
  item: T,
}

impl<T> PartialEq for QueueEntry<T> {
  fn eq(&self, other: &Self) -> bool {
    self.cmp(other) == Ordering::Equal
  }
}

impl<T> Eq for QueueEntry<T> {}

impl<T> PartialOrd for QueueEntry<T> {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl<T> Ord for QueueEntry<T> {
  fn cmp(&self, other: &Self) -> Ordering {
    self.priority.cmp(&other.priority).then(self.seq.cmp(&other.seq))
  }
}

/// Binary heap; no random access
pub struct QueueAgenda<T> {
  heap: BinaryHeap<QueueEntry<T>>,
  seq: u64,
}

impl<T> Default for QueueAgenda<T> {
  fn default() -> Self {
    Self {
      heap: BinaryHeap::new(),
      seq: 0,
    }
  }
}

impl<T> QueueAgenda<T> {
  pub fn new() -> Self {
    Self::default()
  }
}

impl<T> ParserAgenda<T> for QueueAgenda<T> {
  fn add(&mut self, item: T, priority: f64) {
    self.heap.push(QueueEntry {
      priority: OrderedFloat(priority),
      seq: Reverse(self.seq),
      item,
    });
    self.seq += 1;
  }

  fn pop(&mut self) -> Option<T> {
    self.heap.pop().map(|entry| entry.item)
  }

  fn sort(&mut self) {}

  fn len(&self) -> usize {
    self.heap.len()
  }

  fn clear(&mut self) {
    warn!("clearing a queue agenda with {} pending items", self.heap.len());
    self.heap.clear();
  }

  fn get(&self, _i: usize) -> Option<&T> {
    None
  }

  fn remove(&mut self, _i: usize) -> Option<T> {
    None
  }
}

/// A rule application waiting on the agenda, with the score of the
/// derivation it will produce next
pub(crate) struct PrioritizedStream<'a> {
  app: RuleApplication<'a>,
  score: f64,
}

type RulesBySibling = HashMap<String, IndexMap<String, Vec<Arc<Rule>>>>;

/// Rules of a binarized grammar indexed by each symbol of their right-hand side
#[derive(Debug, Default)]
pub struct SiblingIndex {
  /// left symbol -> right symbol -> rules
  left_to_right: RulesBySibling,
  /// right symbol -> left symbol -> rules
  right_to_left: RulesBySibling,
  cat_unary: HashMap<String, Vec<Arc<Rule>>>,
  terminals: HashMap<String, Vec<Arc<Rule>>>,
}

impl SiblingIndex {
  pub fn new(rules: &[Arc<Rule>]) -> Result<Self, GrammarError> {
    let mut index = Self::default();
    for rule in rules.iter() {
      if rule.rhs.len() > 2 {
        return Err(GrammarError::Binarize {
          rule: rule.to_string(),
          reason: "the agenda parser needs a binarized grammar".to_string(),
        });
      }
      if rule.is_cat_unary() {
        index.cat_unary.entry(rule.rhs[0].clone()).or_default().push(rule.clone());
      } else if rule.is_rhs_terminals() {
        index.terminals.entry(rule.rhs.join(" ")).or_default().push(rule.clone());
      } else if let [left, right] = rule.rhs.as_slice() {
        index
          .left_to_right
          .entry(left.clone())
          .or_default()
          .entry(right.clone())
          .or_default()
          .push(rule.clone());
        index
          .right_to_left
          .entry(right.clone())
          .or_default()
          .entry(left.clone())
          .or_default()
          .push(rule.clone());
      }
    }
    Ok(index)
  }

  fn terminal_rules(&self, phrase: &str) -> &[Arc<Rule>] {
    self.terminals.get(phrase).map(Vec::as_slice).unwrap_or(&[])
  }
}

/// One best-first parse
pub(crate) struct AgendaSearch<'a> {
  options: &'a AgendaOptions,
  siblings: &'a SiblingIndex,
  agenda: Box<dyn ParserAgenda<PrioritizedStream<'a>> + 'a>,
  rng: Option<StdRng>,
  pushed: u64,
}

impl<'a> AgendaSearch<'a> {
  pub fn new(options: &'a AgendaOptions, siblings: &'a SiblingIndex) -> Self {
    let agenda: Box<dyn ParserAgenda<PrioritizedStream<'a>> + 'a> = match options.sampling {
      SamplingStrategy::Max => Box::new(QueueAgenda::new()),
      SamplingStrategy::Sample { .. } => Box::new(ListAgenda::new()),
    };
    let rng = match options.sampling {
      SamplingStrategy::Max => None,
      SamplingStrategy::Sample { seed } => Some(StdRng::seed_from_u64(seed)),
    };
    Self {
      options,
      siblings,
      agenda,
      rng,
      pushed: 0,
    }
  }

  pub fn infer(&mut self, state: &mut ParserState<'a>) -> Result<(), ParseError> {
    self.seed(state)?;
    while self.continue_parsing(state) {
      let Some(mut item) = self.pop() else {
        break;
      };
      let Some(deriv) = item.app.next(&state.arena)? else {
        continue;
      };
      trace!("agenda: popped {} {} [score={}]", deriv.cat, deriv.formula, item.score);
      if let Some(idx) = state.add_to_bounded_chart(deriv) {
        self.combine(state, idx)?;
      }
      self.push(state, item.app)?;
      if state.derivation_limit_reached() {
        debug!("stopping at {} derivations", state.chart.stats.total_derivs);
        break;
      }
    }
    self.rerank_root(state);
    debug!(
      "agenda parse: {} pushes, {} derivations created, {} items left",
      self.pushed,
      state.chart.stats.total_derivs,
      self.agenda.len()
    );
    Ok(())
  }

  fn continue_parsing(&self, state: &ParserState<'a>) -> bool {
    if self.agenda.is_empty() || state.num_tokens == 0 {
      return false;
    }
    state.chart.get(0, state.num_tokens, ROOT_CAT).len() < state.beam_size()
  }

  fn seed(&mut self, state: &mut ParserState<'a>) -> Result<(), ParseError> {
    for deriv in state.token_and_phrase_derivations() {
      self.push(state, RuleApplication::single(deriv))?;
    }
    let siblings: &'a SiblingIndex = self.siblings;
    for i in 0..state.num_tokens {
      for j in (i + 1)..=state.num_tokens {
        let phrase = state.ex.phrase(i, j);
        for rule in siblings.terminal_rules(&phrase) {
          if state.can_build(rule, i, j) {
            let app = state.apply_rule(i, j, rule, &[]);
            self.push(state, app)?;
          }
        }
      }
    }
    Ok(())
  }

  fn pop(&mut self) -> Option<PrioritizedStream<'a>> {
    let Some(rng) = self.rng.as_mut() else {
      return self.agenda.pop();
    };
    let scores = (0..self.agenda.len())
      .map_while(|i| self.agenda.get(i).map(|item| item.score))
      .collect::<Vec<_>>();
    if scores.len() != self.agenda.len() {
      return self.agenda.pop();
    }
    let probs = probs(&scores, 1.0);
    let mut draw = rng.gen_range(0.0..1.0);
    let mut chosen = probs.len().saturating_sub(1);
    for (i, p) in probs.iter().enumerate() {
      if draw < *p {
        chosen = i;
        break;
      }
      draw -= p;
    }
    self.agenda.remove(chosen)
  }

  /// Featurizes the next derivation of `app` and queues it under that score
  fn push(&mut self, state: &mut ParserState<'a>, mut app: RuleApplication<'a>) -> Result<(), ParseError> {
    if self.options.always_unroll && app.stream.estimated_size() > 1 {
      while let Some(deriv) = app.next(&state.arena)? {
        let single = RuleApplication {
          rule: app.rule.clone(),
          children: app.children.clone(),
          stream: DerivationStream::single(deriv),
        };
        self.push(state, single)?;
      }
      return Ok(());
    }

    let Some(deriv) = app.peek(&state.arena)? else {
      return Ok(());
    };
    if !deriv.is_featurized_and_scored() {
      state.featurize_and_score(deriv);
    }
    let score = deriv.score;
    if score == f64::NEG_INFINITY {
      return Ok(());
    }
    let priority = score - self.pushed as f64 * EPSILON;
    self.agenda.add(PrioritizedStream { app, score }, priority);
    self.pushed += 1;
    if self.pushed % SORT_EVERY == 0 {
      self.agenda.sort();
    }
    Ok(())
  }

  /// Applies every rule that can take the new derivation `idx` together
  /// with what is already in the chart next to it
  fn combine(&mut self, state: &mut ParserState<'a>, idx: DerivIdx) -> Result<(), ParseError> {
    let (cat, start, end) = {
      let deriv = &state.arena[idx];
      (deriv.cat.clone(), deriv.start, deriv.end)
    };
    let n = state.num_tokens;
    let siblings: &'a SiblingIndex = self.siblings;

    if let Some(right_siblings) = siblings.left_to_right.get(&cat) {
      for i in (end + 1)..=n {
        for (right_cat, rules) in right_siblings.iter() {
          let rights = state.chart.get(end, i, right_cat).to_vec();
          for rule in rules.iter() {
            if !state.can_build(rule, start, i) {
              continue;
            }
            for &right in rights.iter() {
              let app = state.apply_rule(start, i, rule, &[idx, right]);
              self.push(state, app)?;
            }
          }
        }
      }
      if end < n {
        let word = state.ex.phrase(end, end + 1);
        for rule in right_siblings.get(&word).into_iter().flatten() {
          if state.can_build(rule, start, end + 1) {
            let app = state.apply_rule(start, end + 1, rule, &[idx]);
            self.push(state, app)?;
          }
        }
      }
    }

    if let Some(left_siblings) = siblings.right_to_left.get(&cat) {
      for i in (0..start).rev() {
        for (left_cat, rules) in left_siblings.iter() {
          let lefts = state.chart.get(i, start, left_cat).to_vec();
          for rule in rules.iter() {
            if !state.can_build(rule, i, end) {
              continue;
            }
            for &left in lefts.iter() {
              let app = state.apply_rule(i, end, rule, &[left, idx]);
              self.push(state, app)?;
            }
          }
        }
      }
      if start > 0 {
        let word = state.ex.phrase(start - 1, start);
        for rule in left_siblings.get(&word).into_iter().flatten() {
          if state.can_build(rule, start - 1, end) {
            let app = state.apply_rule(start - 1, end, rule, &[idx]);
            self.push(state, app)?;
          }
        }
      }
    }

    for rule in siblings.cat_unary.get(&cat).into_iter().flatten() {
      if state.can_build(rule, start, end) {
        let app = state.apply_rule(start, end, rule, &[idx]);
        self.push(state, app)?;
      }
    }
    Ok(())
  }

  /// Root scores are recomputed from the weights and the cell re-sorted
  fn rerank_root(&self, state: &mut ParserState<'a>) {
    if state.num_tokens == 0 {
      return;
    }
    let n = state.num_tokens;
    for idx in state.chart.get(0, n, ROOT_CAT).to_vec() {
      state.arena.compute_score(idx, state.params);
    }
    state.chart.sort_cell(&state.arena, 0, n, ROOT_CAT);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::grammar::Grammar;

  #[test]
  fn test_list_agenda_pops_best_first() {
    let mut agenda = ListAgenda::new();
    agenda.add("b", 1.0);
    agenda.add("a", 3.0);
    agenda.add("c", 3.0);
    agenda.add("d", -1.0);
    assert_eq!(agenda.len(), 4);
    assert_eq!(agenda.pop(), Some("a"));
    assert_eq!(agenda.pop(), Some("c"));
    assert_eq!(agenda.pop(), Some("b"));
    assert_eq!(agenda.get(0), Some(&"d"));
    assert_eq!(agenda.remove(0), Some("d"));
    assert!(agenda.pop().is_none());
  }

  #[test]
  fn test_list_agenda_sort() {
    let mut agenda = ListAgenda::new();
    for (item, priority) in [("x", 0.5), ("y", 2.0), ("z", 0.5)] {
      agenda.add(item, priority);
    }
    agenda.sort();
    let order = (0..agenda.len()).filter_map(|i| agenda.get(i).copied()).collect::<Vec<_>>();
    assert_eq!(order, vec!["y", "x", "z"]);
  }

  #[test]
  fn test_queue_agenda() {
    let mut agenda = QueueAgenda::new();
    agenda.add(1, 0.0);
    agenda.add(2, 5.0);
    agenda.add(3, 5.0);
    assert_eq!(agenda.pop(), Some(2));
    assert_eq!(agenda.pop(), Some(3));
    assert!(agenda.get(0).is_none());
    assert!(agenda.remove(0).is_none());
    agenda.clear();
    assert!(agenda.is_empty());
  }

  #[test]
  fn test_sibling_index() {
    let g: Grammar = r#"
      (rule $A ($B $C) (ConcatFn " "))
      (rule $A ($B plus) (IdentityFn))
      (rule $B (hello) (ConstantFn (string hi)))
      (rule $ROOT ($A) (IdentityFn))
    "#
    .parse()
    .unwrap();
    let index = SiblingIndex::new(g.rules()).unwrap();
    let right = &index.left_to_right["$B"];
    assert_eq!(right.keys().collect::<Vec<_>>(), vec!["$C", "plus"]);
    assert_eq!(index.right_to_left["$C"]["$B"][0].lhs, "$A");
    assert_eq!(index.terminal_rules("hello").len(), 1);
    assert!(index.terminal_rules("goodbye").is_empty());
    assert_eq!(index.cat_unary["$A"][0].lhs, "$ROOT");
  }
}
