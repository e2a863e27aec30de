//! Sparse feature vectors, the shared weight vector, and local feature extraction

use std::collections::HashMap;
use std::sync::RwLock;

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::derivation::{Derivation, DerivationArena};
use crate::example::Example;

/// Separates the domain from the feature name in a feature key
pub const DOMAIN_SEPARATOR: &str = " :: ";

pub fn feature_key(domain: &str, name: &str) -> String {
  format!("{}{}{}", domain, DOMAIN_SEPARATOR, name)
}

/// Sparse feature vector keyed by `domain :: name`, in insertion order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureVector {
  features: IndexMap<String, f64>,
}

impl FeatureVector {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add(&mut self, domain: &str, name: &str, value: f64) {
    *self.features.entry(feature_key(domain, name)).or_insert(0.0) += value;
  }

  pub fn add_key(&mut self, key: &str, value: f64) {
    *self.features.entry(key.to_string()).or_insert(0.0) += value;
  }

  /// Adds `scale` times `that`
  pub fn add_scaled(&mut self, scale: f64, that: &FeatureVector) {
    for (k, v) in that.features.iter() {
      self.add_key(k, scale * v);
    }
  }

  pub fn get(&self, key: &str) -> Option<f64> {
    self.features.get(key).copied()
  }

  pub fn len(&self) -> usize {
    self.features.len()
  }

  pub fn is_empty(&self) -> bool {
    self.features.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
    self.features.iter().map(|(k, v)| (k.as_str(), *v))
  }

  pub fn dot_product(&self, params: &Params) -> f64 {
    params.dot_product(self)
  }

  /// Adds `factor` times every feature into `map`
  pub fn increment(&self, factor: f64, map: &mut HashMap<String, f64>) {
    for (k, v) in self.features.iter() {
      *map.entry(k.clone()).or_insert(0.0) += factor * v;
    }
  }

  pub fn clear(&mut self) {
    self.features.clear();
  }
}

#[derive(Debug, Clone)]
pub struct ParamsOptions {
  pub init_step_size: f64,
  /// AdaGrad-style per-feature step size
  pub adaptive_step_size: bool,
  /// Step size is `init_step_size / num_updates^step_size_reduction` when not adaptive
  pub step_size_reduction: f64,
  pub default_weight: f64,
}

impl Default for ParamsOptions {
  fn default() -> Self {
    Self {
      init_step_size: 1.0,
      adaptive_step_size: false,
      step_size_reduction: 0.0,
      default_weight: 0.0,
    }
  }
}

#[derive(Debug, Default)]
struct Weights {
  weights: HashMap<String, f64>,
  sum_squared_gradients: HashMap<String, f64>,
  num_updates: u64,
}

/// The weight vector. Shared by concurrent parses; every read or update takes the lock once.
#[derive(Debug, Default)]
pub struct Params {
  pub options: ParamsOptions,
  inner: RwLock<Weights>,
}

impl Params {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_options(options: ParamsOptions) -> Self {
    Self {
      options,
      inner: RwLock::new(Weights::default()),
    }
  }

  pub fn from_weights(weights: impl IntoIterator<Item = (String, f64)>) -> Self {
    let params = Self::new();
    for (k, v) in weights {
      params.set_weight(&k, v);
    }
    params
  }

  pub fn weight(&self, key: &str) -> f64 {
    let inner = self.inner.read().unwrap_or_else(|p| p.into_inner());
    inner.weights.get(key).copied().unwrap_or(self.options.default_weight)
  }

  pub fn set_weight(&self, key: &str, value: f64) {
    let mut inner = self.inner.write().unwrap_or_else(|p| p.into_inner());
    inner.weights.insert(key.to_string(), value);
  }

  pub fn dot_product(&self, features: &FeatureVector) -> f64 {
    let inner = self.inner.read().unwrap_or_else(|p| p.into_inner());
    features
      .iter()
      .map(|(k, v)| v * inner.weights.get(k).copied().unwrap_or(self.options.default_weight))
      .sum()
  }

  /// Adds the step-size-scaled gradient to the weights
  pub fn update(&self, gradient: &HashMap<String, f64>) {
    let mut inner = self.inner.write().unwrap_or_else(|p| p.into_inner());
    inner.num_updates += 1;
    let num_updates = inner.num_updates;
    for (f, &g) in gradient.iter() {
      if g * g == 0.0 {
        continue;
      }
      let step_size = if self.options.adaptive_step_size {
        let sum = inner.sum_squared_gradients.entry(f.clone()).or_insert(0.0);
        *sum += g * g;
        self.options.init_step_size / sum.sqrt()
      } else {
        self.options.init_step_size / (num_updates as f64).powf(self.options.step_size_reduction)
      };
      if !(step_size * g).is_finite() {
        warn!("skipping weird feature update: feature={}, step={}, gradient={}", f, step_size, g);
        continue;
      }
      *inner.weights.entry(f.clone()).or_insert(self.options.default_weight) += step_size * g;
    }
    debug!("params updated: {} features, {} updates", gradient.len(), inner.num_updates);
  }

  /// Snapshot of all weights
  pub fn weights(&self) -> HashMap<String, f64> {
    let inner = self.inner.read().unwrap_or_else(|p| p.into_inner());
    inner.weights.clone()
  }

  pub fn is_empty(&self) -> bool {
    let inner = self.inner.read().unwrap_or_else(|p| p.into_inner());
    inner.weights.is_empty()
  }
}

/// Fills in the local features of a freshly built derivation
pub trait FeatureExtractor: Send + Sync {
  fn extract_local(&self, ex: &Example, arena: &DerivationArena, deriv: &mut Derivation);
}

/// Fires `rule :: fire` and `rule :: <rule>` for every non-terminal derivation
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleFeatureExtractor;

impl FeatureExtractor for RuleFeatureExtractor {
  fn extract_local(&self, _ex: &Example, _arena: &DerivationArena, deriv: &mut Derivation) {
    if deriv.rule.is_null() {
      return;
    }
    let rule = deriv.rule.to_string();
    deriv.local_features.add("rule", "fire", 1.0);
    deriv.local_features.add("rule", &rule, 1.0);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_feature_vector_accumulates() {
    let mut fv = FeatureVector::new();
    fv.add("rule", "fire", 1.0);
    fv.add("rule", "fire", 1.0);
    fv.add("lex", "x", 0.5);
    assert_eq!(fv.get("rule :: fire"), Some(2.0));
    assert_eq!(fv.len(), 2);
    let keys = fv.iter().map(|(k, _)| k.to_string()).collect::<Vec<_>>();
    assert_eq!(keys, vec!["rule :: fire", "lex :: x"]);

    let mut map = HashMap::new();
    fv.increment(-2.0, &mut map);
    assert_eq!(map.get("lex :: x"), Some(&-1.0));
  }

  #[test]
  fn test_params_update_and_dot() {
    let params = Params::new();
    let mut gradient = HashMap::new();
    gradient.insert("a :: x".to_string(), 2.0);
    gradient.insert("a :: zero".to_string(), 0.0);
    params.update(&gradient);
    params.update(&gradient);
    assert_eq!(params.weight("a :: x"), 4.0);
    assert!(!params.weights().contains_key("a :: zero"));

    let mut fv = FeatureVector::new();
    fv.add("a", "x", 0.5);
    fv.add("a", "unknown", 3.0);
    assert_eq!(fv.dot_product(&params), 2.0);
  }

  #[test]
  fn test_adaptive_step_size() {
    let params = Params::with_options(ParamsOptions {
      adaptive_step_size: true,
      ..ParamsOptions::default()
    });
    let mut gradient = HashMap::new();
    gradient.insert("f".to_string(), 3.0);
    params.update(&gradient);
    // 1 / sqrt(9) * 3
    assert!((params.weight("f") - 1.0).abs() < 1e-12);
  }
}
