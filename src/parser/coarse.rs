use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use indexmap::{IndexMap, IndexSet};
use tracing::{debug, trace};

use crate::error::GrammarError;
use crate::example::Example;
use crate::rules::{Rule, BUILTIN_CATS, LEMMA_PHRASE_CAT, LEMMA_TOKEN_CAT, PHRASE_CAT, ROOT_CAT, TOKEN_CAT};

use super::trie::sort_cat_unary_rules;

/// A category over a span
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CatSpan {
  cat: String,
  start: usize,
  end: usize,
}

impl CatSpan {
  fn new(cat: &str, start: usize, end: usize) -> Self {
    Self {
      cat: cat.to_string(),
      start,
      end,
    }
  }
}

/// Recognizer over a binarized grammar: no semantics, no scores, only which
/// categories can cover which spans
#[derive(Debug)]
pub struct CoarseParser {
  /// left symbol -> right symbol -> parent categories
  binary: HashMap<String, HashMap<String, IndexSet<String>>>,
  cat_unary_rules: Vec<Arc<Rule>>,
  terminals_to_rules: HashMap<String, Vec<Arc<Rule>>>,
}

impl CoarseParser {
  pub fn new(rules: &[Arc<Rule>]) -> Result<Self, GrammarError> {
    let mut binary: HashMap<String, HashMap<String, IndexSet<String>>> = HashMap::new();
    let mut terminals_to_rules: HashMap<String, Vec<Arc<Rule>>> = HashMap::new();
    for rule in rules.iter() {
      if rule.rhs.len() > 2 {
        return Err(GrammarError::Binarize {
          rule: rule.to_string(),
          reason: "the coarse parser needs a binarized grammar".to_string(),
        });
      }
      if rule.is_cat_unary() {
        continue;
      }
      if rule.rhs.len() == 2 {
        binary
          .entry(rule.rhs[0].clone())
          .or_default()
          .entry(rule.rhs[1].clone())
          .or_default()
          .insert(rule.lhs.clone());
      } else {
        terminals_to_rules.entry(rule.rhs.join(" ")).or_default().push(rule.clone());
      }
    }
    let cat_unary_rules = sort_cat_unary_rules(rules)?;
    debug!(
      "coarse parser: {} cat unary rules (sorted), {} others",
      cat_unary_rules.len(),
      rules.len() - cat_unary_rules.len()
    );
    Ok(Self {
      binary,
      cat_unary_rules,
      terminals_to_rules,
    })
  }

  /// Fills a chart bottom-up, then keeps only what the root over the whole
  /// utterance can reach
  pub fn parse(&self, ex: &Example) -> CoarseChart {
    let started = Instant::now();
    let mut chart = CoarseChart::new(ex);
    chart.add_tokens_and_phrases();
    let n = chart.num_tokens;
    for len in 1..=n {
      for start in 0..=(n - len) {
        self.add_binary(&mut chart, start, start + len);
        self.add_unary(&mut chart, start, start + len);
      }
    }
    chart.keep_top_down_reachable();
    chart.parse_time = started.elapsed();
    chart
  }

  fn add_binary(&self, chart: &mut CoarseChart, start: usize, end: usize) {
    for i in (start + 1)..end {
      let mut left = chart.cats(start, i);
      let mut right = chart.cats(i, end);
      // a single token may stand on either side of a binary rule
      if i - start == 1 {
        left.push(chart.phrases[start][i].clone());
      }
      if end - i == 1 {
        right.push(chart.phrases[i][end].clone());
      }
      for l in left.iter() {
        let Some(by_right) = self.binary.get(l) else {
          continue;
        };
        for r in right.iter() {
          for parent in by_right.get(r).into_iter().flatten() {
            trace!("coarse: {}({},{}) -> {}({},{}) {}({},{})", parent, start, end, l, start, i, r, i, end);
            chart.add_child(parent, CatSpan::new(l, start, i), start, end);
            chart.add_child(parent, CatSpan::new(r, i, end), start, end);
          }
        }
      }
    }
  }

  fn add_unary(&self, chart: &mut CoarseChart, start: usize, end: usize) {
    let phrase = chart.phrases[start][end].clone();
    for rule in self.terminals_to_rules.get(&phrase).into_iter().flatten() {
      chart.add(&rule.lhs, start, end);
    }
    for rule in self.cat_unary_rules.iter() {
      let rhs = &rule.rhs[0];
      if chart.allows(rhs, start, end) {
        chart.add_child(&rule.lhs, CatSpan::new(rhs, start, end), start, end);
      }
    }
  }
}

/// Which categories survive over each span, after the coarse pass
#[derive(Debug)]
pub struct CoarseChart {
  num_tokens: usize,
  /// `cells[start][end]`: category -> the category spans it was built from
  cells: Vec<Vec<IndexMap<String, Vec<CatSpan>>>>,
  phrases: Vec<Vec<String>>,
  parse_time: Duration,
}

impl CoarseChart {
  fn new(ex: &Example) -> Self {
    let n = ex.num_tokens();
    let cells = (0..n).map(|_| (0..=n).map(|_| IndexMap::new()).collect()).collect();
    let phrases = (0..n)
      .map(|start| {
        (0..=n)
          .map(|end| if end > start { ex.phrase(start, end) } else { String::new() })
          .collect()
      })
      .collect();
    Self {
      num_tokens: n,
      cells,
      phrases,
      parse_time: Duration::ZERO,
    }
  }

  pub fn allows(&self, cat: &str, start: usize, end: usize) -> bool {
    self
      .cells
      .get(start)
      .and_then(|row| row.get(end))
      .map(|cell| cell.contains_key(cat))
      .unwrap_or(false)
  }

  pub fn parse_time(&self) -> Duration {
    self.parse_time
  }

  /// Number of (category, span) pairs left
  pub fn len(&self) -> usize {
    self.cells.iter().flatten().map(IndexMap::len).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn cats(&self, start: usize, end: usize) -> Vec<String> {
    self.cells[start][end].keys().cloned().collect()
  }

  fn add(&mut self, cat: &str, start: usize, end: usize) {
    self.cells[start][end].entry(cat.to_string()).or_default();
  }

  fn add_child(&mut self, cat: &str, child: CatSpan, start: usize, end: usize) {
    self.cells[start][end].entry(cat.to_string()).or_default().push(child);
  }

  fn add_tokens_and_phrases(&mut self) {
    for i in 0..self.num_tokens {
      self.add(TOKEN_CAT, i, i + 1);
      self.add(LEMMA_TOKEN_CAT, i, i + 1);
    }
    for i in 0..self.num_tokens {
      for j in (i + 1)..=self.num_tokens {
        self.add(PHRASE_CAT, i, j);
        self.add(LEMMA_PHRASE_CAT, i, j);
      }
    }
  }

  fn keep_top_down_reachable(&mut self) {
    if self.num_tokens == 0 {
      return;
    }
    let mut reachable = HashSet::new();
    let mut stack = vec![CatSpan::new(ROOT_CAT, 0, self.num_tokens)];
    while let Some(span) = stack.pop() {
      if reachable.contains(&span) {
        continue;
      }
      let Some(children) = self.cells[span.start][span.end].get(&span.cat) else {
        continue;
      };
      stack.extend(children.iter().cloned());
      reachable.insert(span);
    }
    for (start, row) in self.cells.iter_mut().enumerate() {
      for (end, cell) in row.iter_mut().enumerate() {
        cell.retain(|cat, _| {
          let keep = reachable.contains(&CatSpan::new(cat, start, end));
          if !keep && !BUILTIN_CATS.contains(&cat.as_str()) {
            trace!("coarse: pruning {}({},{})", cat, start, end);
          }
          keep
        });
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::example::SimpleAnalyzer;
  use crate::grammar::Grammar;

  fn coarse(grammar: &str, utterance: &str) -> CoarseChart {
    let g: Grammar = grammar.parse().unwrap();
    let parser = CoarseParser::new(g.rules()).unwrap();
    parser.parse(&Example::new(utterance).analyze(&SimpleAnalyzer::default()))
  }

  const NUMBERS: &str = r#"
    (rule $Number ($TOKEN) (NumberFn))
    (rule $Number ($Number $Number) (ConcatFn " "))
    (rule $ROOT ($Number) (IdentityFn))
    (rule $Unused ($Number) (IdentityFn))
  "#;

  #[test]
  fn test_reachable_categories() {
    let chart = coarse(NUMBERS, "1 2 3");
    assert!(chart.allows(ROOT_CAT, 0, 3));
    assert!(chart.allows("$Number", 0, 2));
    assert!(chart.allows("$Number", 1, 2));
    assert!(chart.allows(TOKEN_CAT, 1, 2));
    assert!(!chart.allows("$Unused", 0, 3));
    assert!(!chart.allows(ROOT_CAT, 0, 2));
    assert!(!chart.allows(PHRASE_CAT, 0, 3));
  }

  const TERMINALS: &str = r#"
    (rule $Op (plus) (ConstantFn (string +)))
    (rule $Expr ($TOKEN $Op) (SelectFn 1))
    (rule $ROOT ($Expr $TOKEN) (SelectFn 0))
    (rule $ROOT (hello world) (ConstantFn (string hi)))
  "#;

  #[test]
  fn test_terminal_rules() {
    let grammar = TERMINALS;
    let chart = coarse(grammar, "1 plus 2");
    assert!(chart.allows("$Op", 1, 2));
    assert!(chart.allows("$Expr", 0, 2));
    assert!(chart.allows(ROOT_CAT, 0, 3));
    let chart = coarse(grammar, "hello world");
    assert!(chart.allows(ROOT_CAT, 0, 2));
    assert!(!chart.allows(TOKEN_CAT, 0, 1));
  }

  #[test]
  fn test_unparsable_leaves_nothing() {
    let chart = coarse(TERMINALS, "goodbye world");
    assert!(chart.is_empty());
    assert!(coarse(NUMBERS, "").is_empty());
  }

  #[test]
  fn test_unbinarized_grammar_is_rejected() {
    let mut g = Grammar::new(crate::grammar::GrammarOptions {
      binarize: false,
      ..Default::default()
    });
    g.add_statements("(rule $A ($TOKEN $TOKEN $TOKEN) (ConcatFn \",\"))", None).unwrap();
    assert!(matches!(CoarseParser::new(g.rules()), Err(GrammarError::Binarize { .. })));
  }
}
