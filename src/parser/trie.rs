use std::collections::HashMap;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};

use crate::error::GrammarError;
use crate::rules::Rule;

/// Right-hand sides of rules, one symbol per level. Each node knows the
/// left-hand sides of every rule below it, so a walk can stop as soon as none
/// of them is wanted.
#[derive(Debug, Default)]
pub struct Trie {
  rules: Vec<Arc<Rule>>,
  children: IndexMap<String, Trie>,
  cats: IndexSet<String>,
}

impl Trie {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add(&mut self, rule: Arc<Rule>) {
    self.add_from(rule, 0);
  }

  fn add_from(&mut self, rule: Arc<Rule>, i: usize) {
    self.cats.insert(rule.lhs.clone());
    match rule.rhs.get(i).cloned() {
      Some(symbol) => self.children.entry(symbol).or_default().add_from(rule, i + 1),
      None => {
        if !self.rules.iter().any(|r| Arc::ptr_eq(r, &rule)) {
          self.rules.push(rule);
        }
      }
    }
  }

  pub fn next(&self, symbol: &str) -> Option<&Trie> {
    self.children.get(symbol)
  }

  /// Rules whose right-hand side ends at this node
  pub fn rules(&self) -> &[Arc<Rule>] {
    &self.rules
  }

  pub fn cats(&self) -> impl Iterator<Item = &str> {
    self.cats.iter().map(String::as_str)
  }
}

/// `$A -> $B` rules ordered so that each rule comes after every rule
/// producing its right-hand side
pub fn sort_cat_unary_rules(rules: &[Arc<Rule>]) -> Result<Vec<Arc<Rule>>, GrammarError> {
  let mut graph: IndexMap<&str, Vec<&Arc<Rule>>> = IndexMap::new();
  for rule in rules.iter().filter(|r| r.is_cat_unary()) {
    graph.entry(rule.lhs.as_str()).or_default().push(rule);
  }
  let mut sorted = Vec::new();
  let mut done = HashMap::new();
  for &node in graph.keys() {
    traverse(&mut sorted, node, &graph, &mut done)?;
  }
  Ok(sorted)
}

fn traverse<'g>(
  sorted: &mut Vec<Arc<Rule>>,
  node: &'g str,
  graph: &IndexMap<&'g str, Vec<&'g Arc<Rule>>>,
  done: &mut HashMap<&'g str, bool>,
) -> Result<(), GrammarError> {
  match done.get(node) {
    Some(true) => return Ok(()),
    Some(false) => return Err(GrammarError::UnaryCycle(node.to_string())),
    None => {}
  }
  done.insert(node, false);
  for &rule in graph.get(node).into_iter().flatten() {
    traverse(sorted, rule.rhs[0].as_str(), graph, done)?;
    sorted.push(Arc::clone(rule));
  }
  done.insert(node, true);
  Ok(())
}
