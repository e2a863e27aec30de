use crate::derivation::{Derivation, DerivationStream};
use crate::error::{GrammarError, SemanticError};
use crate::example::Example;
use crate::formula::{Formula, MergeMode};
use crate::params::FeatureVector;
use crate::sexp::Sexp;

use super::{invalid_fn, CallInfo, SemContext, SemanticFn};

/// Intersects (`and`) or unions (`or`) two unaries, optionally also merging
/// in a fixed formula: `(MergeFn and [formula])`
#[derive(Debug, Clone)]
pub struct MergeFn {
  mode: MergeMode,
  formula: Option<Formula>,
  tree: Sexp,
}

impl MergeFn {
  pub fn from_sexp(tree: &Sexp) -> Result<Self, GrammarError> {
    if tree.head() != Some("MergeFn") || !(2..=3).contains(&tree.len()) {
      return Err(invalid_fn(tree, "expected (MergeFn mode [formula])"));
    }
    let mode = tree
      .child_leaf(1)
      .and_then(MergeMode::parse)
      .ok_or_else(|| invalid_fn(tree, "mode must be `and` or `or`"))?;
    let formula = tree
      .child(2)
      .map(Formula::from_sexp)
      .transpose()
      .map_err(|e| invalid_fn(tree, e.to_string()))?;
    Ok(Self {
      mode,
      formula,
      tree: tree.clone(),
    })
  }
}

impl SemanticFn for MergeFn {
  fn call<'a>(&'a self, ctx: &'a SemContext, _ex: &'a Example, ci: CallInfo) -> DerivationStream<'a> {
    let (result, sem_type) = match ci.children.as_slice() {
      [c] => (c.formula.clone(), c.sem_type.clone()),
      [c0, c1] => (
        Formula::merge(self.mode, c0.formula.clone(), c1.formula.clone()),
        c0.sem_type.meet(&c1.sem_type, &ctx.hierarchy),
      ),
      children => {
        return DerivationStream::error(SemanticError::Arity {
          expected: 2,
          got: children.len(),
        });
      }
    };

    let mut features = FeatureVector::new();
    if !ctx.merge_type_check.admit(&sem_type, "mergeMismatch", &mut features) {
      return DerivationStream::empty();
    }
    let result = match &self.formula {
      Some(f) => Formula::merge(self.mode, f.clone(), result),
      None => result,
    };
    let mut deriv = Derivation::from_call(&ci, result, sem_type);
    deriv.local_features = features;
    DerivationStream::single(deriv)
  }

  fn to_sexp(&self) -> Sexp {
    self.tree.clone()
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;
  use crate::derivation::{DerivationArena, DerivationResult};
  use crate::rules::Rule;
  use crate::semfn::{ChildInfo, TypeCheckPolicy};
  use crate::semtype::SemType;

  fn run(ctx: &SemContext, merge: &str, children: &[(&str, SemType)]) -> Vec<DerivationResult> {
    let mut arena = DerivationArena::new();
    let infos = children
      .iter()
      .enumerate()
      .map(|(i, (f, t))| {
        let mut d = Derivation::terminal("$X", i, i + 1, "x", "x");
        d.formula = f.parse().unwrap();
        d.sem_type = t.clone();
        let idx = arena.push(d);
        ChildInfo::of(idx, &arena[idx])
      })
      .collect::<Vec<_>>();
    let merge = Arc::new(MergeFn::from_sexp(&merge.parse().unwrap()).unwrap());
    let rule = Arc::new(Rule::new("$Y", vec!["$X".to_string(); infos.len()], merge.clone()));
    let ci = CallInfo::new(0, infos.len(), rule, infos);
    merge.call(ctx, &Example::new("x y"), ci).collect()
  }

  #[test]
  fn test_merge_and() {
    let ctx = SemContext::default();
    let out = run(
      &ctx,
      "(MergeFn and)",
      &[("fb:en.a", SemType::entity()), ("fb:en.b", SemType::entity())],
    );
    let d = out[0].as_ref().unwrap();
    assert_eq!(d.formula.to_string(), "(and fb:en.a fb:en.b)");
    assert_eq!(d.sem_type, SemType::entity());

    let out = run(&ctx, "(MergeFn or fb:en.c)", &[("fb:en.a", SemType::entity())]);
    assert_eq!(out[0].as_ref().unwrap().formula.to_string(), "(or fb:en.c fb:en.a)");
  }

  #[test]
  fn test_merge_mismatch() {
    let mut ctx = SemContext::default();
    let children = [("fb:en.a", SemType::entity()), ("(number 3)", SemType::number())];
    assert!(run(&ctx, "(MergeFn and)", &children).is_empty());
    ctx.merge_type_check = TypeCheckPolicy::Soft;
    let out = run(&ctx, "(MergeFn and)", &children);
    assert_eq!(
      out[0].as_ref().unwrap().local_features.get("typeCheck :: mergeMismatch"),
      Some(1.0)
    );
  }

  #[test]
  fn test_merge_bad_mode() {
    assert!(MergeFn::from_sexp(&"(MergeFn xor)".parse().unwrap()).is_err());
  }
}
