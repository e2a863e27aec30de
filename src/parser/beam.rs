use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::derivation::DerivIdx;
use crate::error::ParseError;
use crate::rules::Rule;

use super::state::ParserState;
use super::trie::Trie;
use super::Parser;

impl<'a> ParserState<'a> {
  /// Bottom-up CYK: fill every span by increasing length, pruning each cell
  /// to the beam once it is complete
  pub fn infer_beam(&mut self) -> Result<(), ParseError> {
    for mut deriv in self.token_and_phrase_derivations() {
      self.featurize_and_score(&mut deriv);
      self.add_to_chart(deriv);
    }
    let n = self.num_tokens;
    for len in 1..=n {
      for start in 0..=(n - len) {
        self.build(start, start + len)?;
      }
    }
    debug!(
      "beam parse: {} derivations created, {} left in the chart",
      self.chart.stats.total_derivs,
      self.chart.len()
    );
    Ok(())
  }

  fn build(&mut self, start: usize, end: usize) -> Result<(), ParseError> {
    let parser: &'a Parser = self.parser;
    let mut children = Vec::new();
    self.apply_non_cat_unary_rules(start, end, start, &parser.trie, &mut children)?;

    let mut pruned = HashSet::new();
    for rule in parser.cat_unary_rules.iter() {
      if !self.can_build(rule, start, end) {
        continue;
      }
      let rhs = rule.rhs[0].as_str();
      self.prune_cell_once(&mut pruned, start, end, rhs);
      for child in self.chart.get(start, end, rhs).to_vec() {
        self.apply_to_chart(start, end, rule, &[child])?;
      }
    }

    let cats = self.chart.cats(start, end).map(str::to_string).collect::<Vec<_>>();
    for cat in cats.iter() {
      self.prune_cell_once(&mut pruned, start, end, cat);
    }
    Ok(())
  }

  fn prune_cell_once(&mut self, pruned: &mut HashSet<String>, start: usize, end: usize, cat: &str) {
    if pruned.insert(cat.to_string()) {
      self.chart.prune_cell(&mut self.arena, start, end, cat);
    }
  }

  /// Walks the trie along every way of covering `[i, end)` with tokens and
  /// chart entries, applying the rules found once the span is covered
  fn apply_non_cat_unary_rules(
    &mut self,
    start: usize,
    end: usize,
    i: usize,
    node: &'a Trie,
    children: &mut Vec<DerivIdx>,
  ) -> Result<(), ParseError> {
    if !self.coarse_allows_any(node.cats(), start, end) {
      return Ok(());
    }
    if i == end {
      for rule in node.rules() {
        if self.can_build(rule, start, end) {
          self.apply_to_chart(start, end, rule, children)?;
        }
      }
      return Ok(());
    }

    if let Some(next) = node.next(self.ex.token(i)) {
      self.apply_non_cat_unary_rules(start, end, i + 1, next, children)?;
    }

    for j in (i + 1)..=end {
      for (cat, derivs) in self.chart.snapshot(i, j) {
        let Some(next) = node.next(&cat) else {
          continue;
        };
        for deriv in derivs {
          children.push(deriv);
          self.apply_non_cat_unary_rules(start, end, j, next, children)?;
          children.pop();
        }
      }
    }
    Ok(())
  }

  fn apply_to_chart(&mut self, start: usize, end: usize, rule: &'a Arc<Rule>, children: &[DerivIdx]) -> Result<(), ParseError> {
    if self.derivation_limit_reached() {
      return Ok(());
    }
    let mut app = self.apply_rule(start, end, rule, children);
    while let Some(mut deriv) = app.next(&self.arena)? {
      self.featurize_and_score(&mut deriv);
      self.add_to_chart(deriv);
      if self.derivation_limit_reached() {
        debug!("stopping at {} derivations", self.chart.stats.total_derivs);
        break;
      }
    }
    Ok(())
  }
}
