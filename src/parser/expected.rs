use std::collections::HashMap;

use tracing::trace;

use crate::derivation::{DerivIdx, DerivationArena};

/// Which distributions the learning gradient contrasts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpectedCountsMode {
  /// Model distribution restricted to correct derivations, against the model
  #[default]
  Standard,
  /// Uniform over correct derivations, against uniform over all
  Uniform,
  /// Best correct derivation against the best wrong one, unless the margin
  /// between them is already large enough
  Top,
}

/// In-place softmax over log weights. False if there is no mass to normalize.
pub fn exp_normalize(weights: &mut [f64]) -> bool {
  let max = weights.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
  if !max.is_finite() {
    return false;
  }
  let mut sum = 0.0;
  for w in weights.iter_mut() {
    *w = (*w - max).exp();
    sum += *w;
  }
  if sum == 0.0 || !sum.is_finite() {
    return false;
  }
  for w in weights.iter_mut() {
    *w /= sum;
  }
  true
}

/// Gradient of the log-likelihood of the correct derivations, over the
/// features of every derivation in `predictions`. `None` when there is
/// nothing to learn from.
pub fn compute_expected_counts(
  arena: &DerivationArena,
  predictions: &[DerivIdx],
  mode: ExpectedCountsMode,
  contrastive_margin: f64,
) -> Option<HashMap<String, f64>> {
  let n = predictions.len();
  if n == 0 {
    return None;
  }
  let reward = |idx: DerivIdx| if arena[idx].compatibility() == 1.0 { 1.0 } else { 0.0 };

  let (mut true_scores, mut pred_scores) = match mode {
    ExpectedCountsMode::Standard => predictions
      .iter()
      .map(|&idx| (arena[idx].score + f64::ln(reward(idx)), arena[idx].score))
      .unzip::<_, _, Vec<_>, Vec<_>>(),
    ExpectedCountsMode::Uniform => predictions
      .iter()
      .map(|&idx| (f64::ln(reward(idx)), 0.0))
      .unzip(),
    ExpectedCountsMode::Top => {
      let best_of = |good: bool| {
        predictions
          .iter()
          .enumerate()
          .filter(|(_, idx)| (reward(**idx) == 1.0) == good)
          .max_by(|(i, a), (j, b)| {
            arena[**a]
              .score
              .partial_cmp(&arena[**b].score)
              .unwrap_or(std::cmp::Ordering::Equal)
              .then(j.cmp(i))
          })
          .map(|(i, _)| i)
      };
      let (good, bad) = (best_of(true)?, best_of(false)?);
      let (good_score, bad_score) = (arena[predictions[good]].score, arena[predictions[bad]].score);
      if good_score >= bad_score + contrastive_margin {
        trace!("expected counts: margin {} already met", good_score - bad_score);
        return None;
      }
      let one_hot = |at: usize| (0..n).map(|i| if i == at { 0.0 } else { f64::NEG_INFINITY }).collect::<Vec<_>>();
      (one_hot(good), one_hot(bad))
    }
  };

  if !exp_normalize(&mut true_scores) || !exp_normalize(&mut pred_scores) {
    return None;
  }

  let mut counts = HashMap::new();
  for (i, &idx) in predictions.iter().enumerate() {
    let incr = true_scores[i] - pred_scores[i];
    if incr == 0.0 {
      continue;
    }
    arena[idx].increment_all_feature_vector(arena, incr, &mut counts);
  }
  Some(counts)
}
