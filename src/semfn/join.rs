use tracing::trace;

use crate::derivation::{Derivation, DerivationResult, DerivationStream};
use crate::error::{GrammarError, SemanticError};
use crate::example::Example;
use crate::formula::Formula;
use crate::params::FeatureVector;
use crate::semtype::{SemType, TypeHierarchy};
use crate::sexp::Sexp;

use super::{invalid_fn, CallInfo, SemContext, SemanticFn};

/// The coarse check done before a join is built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinTypeCheck {
  /// `binary.apply(unary)`
  #[default]
  Apply,
  /// Stricter: some atomic member of the unary's type must have the binary's
  /// argument type among its supertypes. An unknown (top) unary never joins.
  Specialized,
}

impl JoinTypeCheck {
  pub fn check(&self, binary: &SemType, unary: &SemType, hierarchy: &TypeHierarchy) -> SemType {
    if *self == Self::Apply {
      return binary.apply(unary, hierarchy);
    }
    let arg_type = binary.arg_type(hierarchy);
    let members = match unary {
      SemType::Top => return SemType::bottom(),
      SemType::Atomic(_) => std::slice::from_ref(unary),
      SemType::Union(members) => members.as_slice(),
      SemType::Func(..) => return binary.apply(unary, hierarchy),
    };
    let SemType::Atomic(arg_name) = &arg_type else {
      return binary.apply(unary, hierarchy);
    };
    let matches = members.iter().any(|m| match m {
      SemType::Atomic(name) => hierarchy.supertypes(name).contains(arg_name),
      _ => false,
    });
    if matches {
      binary.ret_type(hierarchy)
    } else {
      SemType::bottom()
    }
  }
}

/// Which slot of the binary the unary fills
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
  Arg0,
  Arg1,
}

/// Combines a binary and a unary, either as a join `(binary unary)` or, with
/// `betaReduce`, by applying the binary lambda to the unary.
///
/// Options: `binary,unary`, `unary,binary` (child order), `unaryCanBeArg0`,
/// `unaryCanBeArg1`, `forward` (= binary,unary + unaryCanBeArg1), `backward`
/// (= unary,binary + unaryCanBeArg1), `betaReduce`, and `(arg0 formula [type])`
/// to fix the first child so that the rule takes a single one.
#[derive(Debug, Clone)]
pub struct JoinFn {
  unary_first: bool,
  unary_can_be_arg0: bool,
  unary_can_be_arg1: bool,
  beta_reduce: bool,
  arg0: Option<(Formula, Option<SemType>)>,
  tree: Sexp,
}

impl JoinFn {
  pub fn from_sexp(tree: &Sexp) -> Result<Self, GrammarError> {
    if tree.head() != Some("JoinFn") {
      return Err(invalid_fn(tree, "expected (JoinFn option...)"));
    }
    let mut join = Self {
      unary_first: false,
      unary_can_be_arg0: false,
      unary_can_be_arg1: false,
      beta_reduce: false,
      arg0: None,
      tree: tree.clone(),
    };
    for arg in &tree.children()[1..] {
      match arg.as_leaf() {
        Some("binary,unary") => join.unary_first = false,
        Some("unary,binary") => join.unary_first = true,
        Some("unaryCanBeArg0") => join.unary_can_be_arg0 = true,
        Some("unaryCanBeArg1") => join.unary_can_be_arg1 = true,
        Some("forward") => {
          join.unary_first = false;
          join.unary_can_be_arg1 = true;
        }
        Some("backward") => {
          join.unary_first = true;
          join.unary_can_be_arg1 = true;
        }
        Some("betaReduce") => join.beta_reduce = true,
        Some(other) => return Err(invalid_fn(tree, format!("invalid argument {}", other))),
        None if arg.head() == Some("arg0") && (2..=3).contains(&arg.len()) => {
          let bad = |e: crate::error::FormulaError| invalid_fn(tree, e.to_string());
          let formula = Formula::from_sexp(&arg.children()[1]).map_err(bad)?;
          let sem_type = arg.child(2).map(SemType::from_sexp).transpose().map_err(bad)?;
          join.arg0 = Some((formula, sem_type));
        }
        None => return Err(invalid_fn(tree, format!("invalid argument {}", arg))),
      }
    }
    if !join.unary_can_be_arg0 && !join.unary_can_be_arg1 {
      return Err(invalid_fn(tree, "at least one of unaryCanBeArg0 and unaryCanBeArg1 must be set"));
    }
    Ok(join)
  }

  /// Left-to-right function application, `(JoinFn forward betaReduce)`
  pub fn forward_beta_reduce() -> Self {
    let tree = Sexp::list(vec![
      Sexp::leaf("JoinFn"),
      Sexp::leaf("forward"),
      Sexp::leaf("betaReduce"),
    ]);
    Self {
      unary_first: false,
      unary_can_be_arg0: false,
      unary_can_be_arg1: true,
      beta_reduce: true,
      arg0: None,
      tree,
    }
  }

  /// `(JoinFn betaReduce forward (arg0 body))`: applies `body` to the only child
  pub fn applying(body: Formula) -> Self {
    let tree = Sexp::list(vec![
      Sexp::leaf("JoinFn"),
      Sexp::leaf("betaReduce"),
      Sexp::leaf("forward"),
      Sexp::list(vec![Sexp::leaf("arg0"), body.to_sexp()]),
    ]);
    Self {
      unary_first: false,
      unary_can_be_arg0: false,
      unary_can_be_arg1: true,
      beta_reduce: true,
      arg0: Some((body, None)),
      tree,
    }
  }

  /// Builds the candidate for one slot, or `None` if it doesn't type check
  fn do_join(
    &self,
    ctx: &SemContext,
    ci: &CallInfo,
    (binary, binary_type): (&Formula, &SemType),
    (unary, unary_type): (&Formula, &SemType),
    slot: Slot,
  ) -> Result<Option<Derivation>, SemanticError> {
    let (binary, binary_type) = match slot {
      Slot::Arg0 => (binary.reverse_binary(), binary_type.reverse()),
      Slot::Arg1 => (binary.clone(), binary_type.clone()),
    };

    let mut features = FeatureVector::new();
    let mut sem_type = ctx.join_coarse_check.check(&binary_type, unary_type, &ctx.hierarchy);
    if !ctx.join_type_check.admit(&sem_type, "joinMismatch", &mut features) {
      trace!("join type check failed: [{} : {}] JOIN [{} : {}]", binary, binary_type, unary, unary_type);
      return Ok(None);
    }

    let formula = if self.beta_reduce {
      binary.lambda_apply(unary).ok_or_else(|| {
        SemanticError::Invalid(format!("expected a lambda as the binary, got {} (unary is {})", binary, unary))
      })?
    } else {
      Formula::join(binary, unary.clone())
    };

    let full_type = ctx.infer_type(&formula);
    if full_type.is_valid() {
      sem_type = full_type;
    } else if !ctx.join_type_check.admit(&full_type, "joinMismatch", &mut features) {
      trace!("join ruled out by type inference: {}", formula);
      return Ok(None);
    }

    let mut deriv = Derivation::from_call(ci, formula, sem_type);
    deriv.local_features = features;
    Ok(Some(deriv))
  }
}

impl SemanticFn for JoinFn {
  fn call<'a>(&'a self, ctx: &'a SemContext, _ex: &'a Example, ci: CallInfo) -> DerivationStream<'a> {
    let (child0, child1) = match &self.arg0 {
      Some((formula, sem_type)) => {
        if let Err(e) = ci.expect_children(1) {
          return DerivationStream::error(e);
        }
        let sem_type = sem_type.clone().unwrap_or_else(|| ctx.infer_type(formula));
        let child = &ci.children[0];
        ((formula.clone(), sem_type), (child.formula.clone(), child.sem_type.clone()))
      }
      None => {
        if let Err(e) = ci.expect_children(2) {
          return DerivationStream::error(e);
        }
        let (c0, c1) = (&ci.children[0], &ci.children[1]);
        ((c0.formula.clone(), c0.sem_type.clone()), (c1.formula.clone(), c1.sem_type.clone()))
      }
    };
    let (binary, unary) = if self.unary_first { (child1, child0) } else { (child0, child1) };

    let slots = [
      Some(Slot::Arg0).filter(|_| self.unary_can_be_arg0),
      Some(Slot::Arg1).filter(|_| self.unary_can_be_arg1),
    ];
    let joins = slots.into_iter().flatten().filter_map(move |slot| -> Option<DerivationResult> {
      self
        .do_join(ctx, &ci, (&binary.0, &binary.1), (&unary.0, &unary.1), slot)
        .transpose()
    });
    DerivationStream::new(joins, 2)
  }

  fn to_sexp(&self) -> Sexp {
    self.tree.clone()
  }

  fn has_bound_arg0(&self) -> bool {
    self.arg0.is_some()
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;
  use crate::derivation::DerivationArena;
  use crate::rules::Rule;
  use crate::semfn::ChildInfo;
  use crate::semfn::TypeCheckPolicy;

  fn child(arena: &mut DerivationArena, formula: &str, sem_type: SemType, start: usize) -> ChildInfo {
    let mut d = Derivation::terminal("$X", start, start + 1, "x", "x");
    d.formula = formula.parse().unwrap();
    d.sem_type = sem_type;
    let idx = arena.push(d);
    ChildInfo::of(idx, &arena[idx])
  }

  fn run(ctx: &SemContext, join: JoinFn, children: Vec<ChildInfo>) -> Vec<DerivationResult> {
    let ex = Example::new("x y");
    let join = Arc::new(join);
    let rule = Arc::new(Rule::new("$Y", vec!["$X".to_string(); children.len()], join.clone()));
    let ci = CallInfo::new(0, 2, rule, children);
    join.call(ctx, &ex, ci).collect()
  }

  fn join_fn(s: &str) -> JoinFn {
    JoinFn::from_sexp(&s.parse().unwrap()).unwrap()
  }

  #[test]
  fn test_forward_join() {
    let ctx = SemContext::default();
    let mut arena = DerivationArena::new();
    let children = vec![
      child(&mut arena, "fb:people.person.place_of_birth", SemType::any_any_func(), 0),
      child(&mut arena, "fb:en.honolulu", SemType::entity(), 1),
    ];
    let out = run(&ctx, join_fn("(JoinFn forward)"), children);
    assert_eq!(out.len(), 1);
    assert_eq!(
      out[0].as_ref().unwrap().formula,
      "(fb:people.person.place_of_birth fb:en.honolulu)".parse::<Formula>().unwrap()
    );
  }

  #[test]
  fn test_both_slots() {
    let ctx = SemContext::default();
    let mut arena = DerivationArena::new();
    let children = vec![
      child(&mut arena, "fb:en.obama", SemType::entity(), 0),
      child(&mut arena, "fb:people.person.place_of_birth", SemType::any_any_func(), 1),
    ];
    let out = run(&ctx, join_fn("(JoinFn unary,binary unaryCanBeArg0 unaryCanBeArg1)"), children);
    let formulas = out.into_iter().map(|d| d.unwrap().formula.to_string()).collect::<Vec<_>>();
    assert_eq!(
      formulas,
      vec![
        "(!fb:people.person.place_of_birth fb:en.obama)",
        "(fb:people.person.place_of_birth fb:en.obama)"
      ]
    );
  }

  #[test]
  fn test_beta_reduce_and_bound_arg0() {
    let ctx = SemContext::default();
    let mut arena = DerivationArena::new();
    let join = JoinFn::applying("(lambda x (call .length (var x)))".parse().unwrap());
    assert!(join.has_bound_arg0());
    let children = vec![child(&mut arena, "(string abc)", SemType::text(), 0)];
    let out = run(&ctx, join, children);
    let d = out[0].as_ref().unwrap();
    assert_eq!(d.formula, "(call .length (string abc))".parse::<Formula>().unwrap());
    assert_eq!(d.sem_type, SemType::int());

    // a non-lambda binary can't be beta-reduced
    let children = vec![
      child(&mut arena, "fb:a.b", SemType::Top, 0),
      child(&mut arena, "fb:en.c", SemType::Top, 1),
    ];
    let out = run(&ctx, JoinFn::forward_beta_reduce(), children);
    assert!(matches!(out[0], Err(SemanticError::Invalid(_))));
  }

  #[test]
  fn test_type_check_policies() {
    let mut ctx = SemContext::default();
    let mut arena = DerivationArena::new();
    let binary = SemType::func(SemType::int(), SemType::int());
    let children = vec![
      child(&mut arena, "(lambda x (var x))", binary.clone(), 0),
      child(&mut arena, "(string abc)", SemType::text(), 1),
    ];
    assert!(run(&ctx, join_fn("(JoinFn forward)"), children.clone()).is_empty());

    ctx.join_type_check = TypeCheckPolicy::Soft;
    let out = run(&ctx, join_fn("(JoinFn forward)"), children);
    let d = out[0].as_ref().unwrap();
    assert!(d.local_features.get("typeCheck :: joinMismatch").is_some());
  }

  #[test]
  fn test_specialized_check() {
    let mut h = TypeHierarchy::default();
    h.add_entity_supertypes("fb:cvg.cvg_publisher");
    h.add_supertype("fb:cvg.cvg_publisher", "fb:business.employer");
    let binary = SemType::func(SemType::atomic("fb:cvg.cvg_publisher"), SemType::entity());
    let unary = SemType::union([SemType::atomic("fb:business.employer"), SemType::atomic("fb:x.y")]);
    assert!(JoinTypeCheck::Apply.check(&binary, &unary, &h).is_valid());
    assert!(!JoinTypeCheck::Specialized.check(&binary, &unary, &h).is_valid());
    assert!(!JoinTypeCheck::Specialized.check(&binary, &SemType::Top, &h).is_valid());
    let unary = SemType::atomic("fb:cvg.cvg_publisher");
    assert_eq!(JoinTypeCheck::Specialized.check(&binary, &unary, &h), SemType::entity());
  }

  #[test]
  fn test_rejects_bad_options() {
    assert!(JoinFn::from_sexp(&"(JoinFn betaReduce)".parse().unwrap()).is_err());
    assert!(JoinFn::from_sexp(&"(JoinFn forward (foo x))".parse().unwrap()).is_err());
  }
}
