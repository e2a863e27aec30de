//! Named statistics collected while parsing and evaluating

use std::fmt;
use std::sync::Mutex;

use indexmap::IndexMap;

/// Running summary of one statistic
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatFig {
  pub count: usize,
  pub sum: f64,
  pub sum_sq: f64,
  pub min: Option<(f64, Option<String>)>,
  pub max: Option<(f64, Option<String>)>,
}

impl StatFig {
  pub fn add(&mut self, key: Option<&str>, value: f64) {
    self.count += 1;
    self.sum += value;
    self.sum_sq += value * value;
    if self.min.as_ref().map(|(m, _)| value < *m).unwrap_or(true) {
      self.min = Some((value, key.map(str::to_string)));
    }
    if self.max.as_ref().map(|(m, _)| value > *m).unwrap_or(true) {
      self.max = Some((value, key.map(str::to_string)));
    }
  }

  pub fn merge(&mut self, that: &StatFig) {
    self.count += that.count;
    self.sum += that.sum;
    self.sum_sq += that.sum_sq;
    if let Some((v, k)) = &that.min {
      if self.min.as_ref().map(|(m, _)| v < m).unwrap_or(true) {
        self.min = Some((*v, k.clone()));
      }
    }
    if let Some((v, k)) = &that.max {
      if self.max.as_ref().map(|(m, _)| v > m).unwrap_or(true) {
        self.max = Some((*v, k.clone()));
      }
    }
  }

  pub fn mean(&self) -> f64 {
    if self.count == 0 {
      return 0.0;
    }
    self.sum / self.count as f64
  }

  pub fn stddev(&self) -> f64 {
    if self.count == 0 {
      return 0.0;
    }
    let mean = self.mean();
    (self.sum_sq / self.count as f64 - mean * mean).max(0.0).sqrt()
  }
}

impl fmt::Display for StatFig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:.4} (n={}", self.mean(), self.count)?;
    if let Some((max, key)) = &self.max {
      write!(f, ", max={}", max)?;
      if let Some(key) = key {
        write!(f, " @ {}", key)?;
      }
    }
    write!(f, ")")
  }
}

/// Statistics in the order they were first recorded
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
  figs: IndexMap<String, StatFig>,
}

impl Evaluation {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add(&mut self, name: &str, value: f64) {
    self.add_keyed(name, None, value);
  }

  pub fn add_bool(&mut self, name: &str, value: bool) {
    self.add(name, if value { 1.0 } else { 0.0 });
  }

  /// Records `value`, remembering `key` if it becomes the min or max
  pub fn add_keyed(&mut self, name: &str, key: Option<&str>, value: f64) {
    self.figs.entry(name.to_string()).or_default().add(key, value);
  }

  pub fn merge(&mut self, that: &Evaluation) {
    for (name, fig) in that.figs.iter() {
      self.figs.entry(name.clone()).or_default().merge(fig);
    }
  }

  pub fn get(&self, name: &str) -> Option<&StatFig> {
    self.figs.get(name)
  }

  pub fn mean(&self, name: &str) -> Option<f64> {
    self.get(name).map(StatFig::mean)
  }

  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.figs.keys().map(String::as_str)
  }

  pub fn is_empty(&self) -> bool {
    self.figs.is_empty()
  }

  /// `name=mean` pairs joined by `delim`
  pub fn summary(&self, delim: &str) -> String {
    self
      .figs
      .iter()
      .map(|(name, fig)| format!("{}={:.4}", name, fig.mean()))
      .collect::<Vec<_>>()
      .join(delim)
  }
}

impl fmt::Display for Evaluation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (name, fig) in self.figs.iter() {
      writeln!(f, "{} = {}", name, fig)?;
    }
    Ok(())
  }
}

/// Aggregate evaluation shared by parallel parses; merges take the lock once
#[derive(Debug, Default)]
pub struct SharedEvaluation {
  inner: Mutex<Evaluation>,
}

impl SharedEvaluation {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn merge(&self, eval: &Evaluation) {
    let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
    inner.merge(eval);
  }

  pub fn snapshot(&self) -> Evaluation {
    let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
    inner.clone()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_stat_fig() {
    let mut eval = Evaluation::new();
    eval.add("x", 1.0);
    eval.add("x", 3.0);
    eval.add_bool("ok", true);
    eval.add_keyed("cell", Some("[$A a b]"), 7.0);
    let x = eval.get("x").unwrap();
    assert_eq!(x.count, 2);
    assert_eq!(x.mean(), 2.0);
    assert_eq!(x.stddev(), 1.0);
    assert_eq!(eval.get("cell").unwrap().max, Some((7.0, Some("[$A a b]".to_string()))));
    assert_eq!(eval.names().collect::<Vec<_>>(), vec!["x", "ok", "cell"]);
    assert_eq!(eval.summary(" "), "x=2.0000 ok=1.0000 cell=7.0000");
  }

  #[test]
  fn test_shared_merge_across_threads() {
    let shared = SharedEvaluation::new();
    std::thread::scope(|s| {
      for i in 0..4 {
        let shared = &shared;
        s.spawn(move || {
          let mut eval = Evaluation::new();
          eval.add("n", i as f64);
          shared.merge(&eval);
        });
      }
    });
    let total = shared.snapshot();
    assert_eq!(total.get("n").unwrap().count, 4);
    assert_eq!(total.get("n").unwrap().max.as_ref().unwrap().0, 3.0);
  }
}
