//! The span-indexed table of derivations, and beam pruning of its cells

use std::fmt;
use std::time::Duration;

use indexmap::IndexMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::derivation::{DerivIdx, DerivationArena};
use crate::evaluation::Evaluation;

/// How a cell is cut down once sorted
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum PrunePolicy {
  /// Keep the `beam_size` best derivations
  #[default]
  TopK,
  /// Drop every derivation scoring more than `ln(threshold)` below the best one
  ProbDiff(f64),
}

/// Beam settings of one parse, plus the generator for score noise
#[derive(Debug)]
pub struct Beam {
  pub size: usize,
  pub policy: PrunePolicy,
  /// Scale of the uniform noise added to scores before sorting
  pub score_noise: f64,
  rng: StdRng,
}

impl Beam {
  pub fn new(size: usize, policy: PrunePolicy, score_noise: f64, seed: u64) -> Self {
    Self {
      size,
      policy,
      score_noise,
      rng: StdRng::seed_from_u64(seed),
    }
  }
}

/// Diagnostics gathered while filling a chart
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChartStats {
  /// Largest cell seen before pruning, and which one it was
  pub max_cell_size: usize,
  pub max_cell_description: Option<String>,
  /// Whether pruning (or a full cell) ever dropped a derivation
  pub fall_off_beam: bool,
  pub total_derivs: usize,
  pub num_featurized: usize,
}

impl ChartStats {
  pub fn add_to(&self, eval: &mut Evaluation, num_tokens: usize, parse_time: Duration) {
    eval.add("numTokens", num_tokens as f64);
    eval.add("parseTime", parse_time.as_secs_f64() * 1000.0);
    eval.add_keyed(
      "maxCellSize",
      self.max_cell_description.as_deref(),
      self.max_cell_size as f64,
    );
    eval.add_bool("fallOffBeam", self.fall_off_beam);
    eval.add("totalDerivs", self.total_derivs as f64);
    eval.add("numOfFeaturizedDerivs", self.num_featurized as f64);
  }
}

type Cell = IndexMap<String, Vec<DerivIdx>>;

/// `cells[start][end]` maps a category to the derivations over `[start, end)`
#[derive(Debug)]
pub struct Chart {
  num_tokens: usize,
  cells: Vec<Vec<Cell>>,
  pub beam: Beam,
  pub stats: ChartStats,
}

impl Chart {
  pub fn new(num_tokens: usize, beam: Beam) -> Self {
    let cells = (0..num_tokens)
      .map(|_| (0..=num_tokens).map(|_| Cell::new()).collect())
      .collect();
    Self {
      num_tokens,
      cells,
      beam,
      stats: ChartStats::default(),
    }
  }

  pub fn num_tokens(&self) -> usize {
    self.num_tokens
  }

  pub fn cell(&self, start: usize, end: usize) -> Option<&Cell> {
    self.cells.get(start)?.get(end)
  }

  fn cell_mut(&mut self, start: usize, end: usize) -> Option<&mut Cell> {
    self.cells.get_mut(start)?.get_mut(end)
  }

  pub fn get(&self, start: usize, end: usize, cat: &str) -> &[DerivIdx] {
    self
      .cell(start, end)
      .and_then(|cell| cell.get(cat))
      .map(Vec::as_slice)
      .unwrap_or(&[])
  }

  pub fn contains(&self, start: usize, end: usize, cat: &str) -> bool {
    self.cell(start, end).map(|cell| cell.contains_key(cat)).unwrap_or(false)
  }

  pub fn cats(&self, start: usize, end: usize) -> impl Iterator<Item = &str> {
    self.cell(start, end).into_iter().flat_map(|cell| cell.keys().map(String::as_str))
  }

  /// Owned copy of a cell, for walking it while the chart grows
  pub fn snapshot(&self, start: usize, end: usize) -> Vec<(String, Vec<DerivIdx>)> {
    self
      .cell(start, end)
      .map(|cell| cell.iter().map(|(cat, derivs)| (cat.clone(), derivs.clone())).collect())
      .unwrap_or_default()
  }

  pub fn push(&mut self, start: usize, end: usize, cat: &str, idx: DerivIdx) {
    if let Some(cell) = self.cell_mut(start, end) {
      cell.entry(cat.to_string()).or_default().push(idx);
    }
  }

  /// Number of derivations over all cells
  pub fn len(&self) -> usize {
    self.cells.iter().flatten().flat_map(|cell| cell.values()).map(Vec::len).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Re-sorts one cell by score without pruning it
  pub fn sort_cell(&mut self, arena: &DerivationArena, start: usize, end: usize, cat: &str) {
    if let Some(derivs) = self.cell_mut(start, end).and_then(|cell| cell.get_mut(cat)) {
      arena.sort_by_score(derivs);
    }
  }

  /// Sorts the `cat` cell over `[start, end)` by score, records beam positions
  /// on its derivations, then cuts it down with the beam policy
  pub fn prune_cell(&mut self, arena: &mut DerivationArena, start: usize, end: usize, cat: &str) {
    let Some(derivs) = self.cells.get_mut(start).and_then(|row| row.get_mut(end)).and_then(|cell| cell.get_mut(cat)) else {
      return;
    };
    if derivs.is_empty() {
      return;
    }
    let description = format!("{}:{}:{}", cat, start, end);

    if derivs.len() > self.stats.max_cell_size {
      self.stats.max_cell_size = derivs.len();
      self.stats.max_cell_description = Some(description.clone());
      if derivs.len() > 5000 {
        info!("prune_cell {}: max cell size = {} entries (not pruned yet)", description, derivs.len());
      }
    }

    for (i, &idx) in derivs.iter().enumerate() {
      let from_children = arena[idx]
        .children
        .iter()
        .map(|&c| arena[c].max_unsorted_beam_position)
        .max()
        .unwrap_or(-1);
      let deriv = &mut arena[idx];
      deriv.max_unsorted_beam_position = (i as i32).max(from_children);
      // a cell may be pruned more than once; only the first order counts
      if deriv.pre_sort_beam_position == -1 {
        deriv.pre_sort_beam_position = i as i32;
      }
    }

    if self.beam.score_noise > 0.0 {
      for &idx in derivs.iter() {
        arena[idx].score += self.beam.rng.gen_range(0.0..1.0) * self.beam.score_noise;
      }
    }

    arena.sort_by_score(derivs);

    for (i, &idx) in derivs.iter().enumerate() {
      let from_children = arena[idx]
        .children
        .iter()
        .map(|&c| arena[c].max_beam_position)
        .max()
        .unwrap_or(-1);
      let deriv = &mut arena[idx];
      deriv.max_beam_position = (i as i32).max(from_children);
      deriv.post_sort_beam_position = i as i32;
    }

    match self.beam.policy {
      PrunePolicy::ProbDiff(threshold) => {
        let best = arena[derivs[0]].score;
        while let Some(&last) = derivs.last() {
          if best - arena[last].score <= threshold.ln() {
            break;
          }
          derivs.pop();
          self.stats.fall_off_beam = true;
        }
      }
      PrunePolicy::TopK => {
        if derivs.len() > self.beam.size {
          debug!("prune_cell {}: pruning {} -> {} derivations", description, derivs.len(), self.beam.size);
          derivs.truncate(self.beam.size);
          self.stats.fall_off_beam = true;
        }
      }
    }
  }

  /// Displays the chart with the formulas of its derivations
  pub fn display<'c>(&'c self, arena: &'c DerivationArena) -> ChartDisplay<'c> {
    ChartDisplay { chart: self, arena }
  }
}

pub struct ChartDisplay<'c> {
  chart: &'c Chart,
  arena: &'c DerivationArena,
}

impl fmt::Display for ChartDisplay<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (start, row) in self.chart.cells.iter().enumerate() {
      for (end, cell) in row.iter().enumerate() {
        for (cat, derivs) in cell.iter() {
          writeln!(f, "{}..{} {}: {} derivation(s)", start, end, cat, derivs.len())?;
          for &idx in derivs.iter() {
            let deriv = &self.arena[idx];
            writeln!(f, "  {} [score={}]", deriv.formula, deriv.score)?;
          }
        }
      }
    }
    Ok(())
  }
}
