use crate::derivation::{Derivation, DerivationStream};
use crate::error::GrammarError;
use crate::example::Example;
use crate::formula::Formula;
use crate::semtype::SemType;
use crate::sexp::Sexp;

use super::{invalid_fn, CallInfo, SemContext, SemanticFn};

fn head_is(tree: &Sexp, name: &str) -> bool {
  tree.head() == Some(name)
}

/// Ignores the children and produces a fixed formula
#[derive(Debug, Clone)]
pub struct ConstantFn {
  formula: Formula,
  sem_type: Option<SemType>,
  tree: Sexp,
}

impl ConstantFn {
  /// With no type given, the type is inferred when the rule fires
  pub fn new(formula: Formula, sem_type: Option<SemType>) -> Self {
    let mut tree = vec![Sexp::leaf("ConstantFn"), formula.to_sexp()];
    if let Some(t) = &sem_type {
      tree.push(t.to_sexp());
    }
    Self {
      formula,
      sem_type,
      tree: Sexp::list(tree),
    }
  }

  /// Stand-in for dropped optional symbols
  pub fn null() -> Self {
    Self::new(Formula::null(), None)
  }

  pub fn from_sexp(tree: &Sexp) -> Result<Self, GrammarError> {
    if !head_is(tree, "ConstantFn") || !(2..=3).contains(&tree.len()) {
      return Err(invalid_fn(tree, "expected (ConstantFn formula [type])"));
    }
    let formula = tree
      .child(1)
      .map(Formula::from_sexp)
      .transpose()
      .map_err(|e| invalid_fn(tree, e.to_string()))?
      .unwrap_or_else(Formula::null);
    let sem_type = tree
      .child(2)
      .map(SemType::from_sexp)
      .transpose()
      .map_err(|e| invalid_fn(tree, e.to_string()))?;
    Ok(Self {
      formula,
      sem_type,
      tree: tree.clone(),
    })
  }

  pub fn formula(&self) -> &Formula {
    &self.formula
  }
}

impl SemanticFn for ConstantFn {
  fn call<'a>(&'a self, ctx: &'a SemContext, _ex: &'a Example, ci: CallInfo) -> DerivationStream<'a> {
    let sem_type = match &self.sem_type {
      Some(t) => t.clone(),
      None => ctx.infer_type(&self.formula),
    };
    DerivationStream::single(Derivation::from_call(&ci, self.formula.clone(), sem_type))
  }

  fn to_sexp(&self) -> Sexp {
    self.tree.clone()
  }
}

/// Passes its only child through
#[derive(Debug, Clone, Default)]
pub struct IdentityFn;

impl IdentityFn {
  pub fn new() -> Self {
    Self
  }

  pub fn from_sexp(tree: &Sexp) -> Result<Self, GrammarError> {
    if !head_is(tree, "IdentityFn") || tree.len() != 1 {
      return Err(invalid_fn(tree, "expected (IdentityFn)"));
    }
    Ok(Self)
  }
}

impl SemanticFn for IdentityFn {
  fn call<'a>(&'a self, _ctx: &'a SemContext, _ex: &'a Example, ci: CallInfo) -> DerivationStream<'a> {
    let child = match ci.expect_children(1).and_then(|_| ci.child(0)) {
      Ok(child) => child,
      Err(e) => return DerivationStream::error(e),
    };
    let (formula, sem_type) = (child.formula.clone(), child.sem_type.clone());
    DerivationStream::single(Derivation::from_call(&ci, formula, sem_type))
  }

  fn to_sexp(&self) -> Sexp {
    Sexp::list(vec![Sexp::leaf("IdentityFn")])
  }
}

/// Passes child `position` through, ignoring the rest
#[derive(Debug, Clone)]
pub struct SelectFn {
  position: usize,
}

impl SelectFn {
  pub fn new(position: usize) -> Self {
    Self { position }
  }

  pub fn from_sexp(tree: &Sexp) -> Result<Self, GrammarError> {
    if !head_is(tree, "SelectFn") || tree.len() != 2 {
      return Err(invalid_fn(tree, "expected (SelectFn position)"));
    }
    let position = tree
      .child_leaf(1)
      .and_then(|p| p.parse::<usize>().ok())
      .ok_or_else(|| invalid_fn(tree, "position must be a non-negative integer"))?;
    Ok(Self { position })
  }

  pub fn position(&self) -> usize {
    self.position
  }
}

impl SemanticFn for SelectFn {
  fn call<'a>(&'a self, _ctx: &'a SemContext, _ex: &'a Example, ci: CallInfo) -> DerivationStream<'a> {
    let child = match ci.child(self.position) {
      Ok(child) => child,
      Err(e) => return DerivationStream::error(e),
    };
    let (formula, sem_type) = (child.formula.clone(), child.sem_type.clone());
    DerivationStream::single(Derivation::from_call(&ci, formula, sem_type))
  }

  fn to_sexp(&self) -> Sexp {
    Sexp::list(vec![Sexp::leaf("SelectFn"), Sexp::leaf(self.position.to_string())])
  }
}

/// Joins the children's plain string values with a delimiter
#[derive(Debug, Clone)]
pub struct ConcatFn {
  delim: String,
}

impl ConcatFn {
  pub fn new(delim: impl Into<String>) -> Self {
    Self { delim: delim.into() }
  }

  pub fn from_sexp(tree: &Sexp) -> Result<Self, GrammarError> {
    if !head_is(tree, "ConcatFn") || tree.len() != 2 {
      return Err(invalid_fn(tree, "expected (ConcatFn delimiter)"));
    }
    let delim = tree
      .child_leaf(1)
      .ok_or_else(|| invalid_fn(tree, "delimiter must be a string"))?;
    Ok(Self::new(delim))
  }
}

impl SemanticFn for ConcatFn {
  fn call<'a>(&'a self, _ctx: &'a SemContext, _ex: &'a Example, ci: CallInfo) -> DerivationStream<'a> {
    let parts = (0..ci.children.len())
      .map(|i| ci.child_string_value(i))
      .collect::<Result<Vec<_>, _>>();
    match parts {
      Ok(parts) => {
        let formula = Formula::string(parts.join(&self.delim));
        DerivationStream::single(Derivation::from_call(&ci, formula, SemType::text()))
      }
      Err(e) => DerivationStream::error(e),
    }
  }

  fn to_sexp(&self) -> Sexp {
    Sexp::list(vec![Sexp::leaf("ConcatFn"), Sexp::leaf(self.delim.clone())])
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;
  use crate::derivation::{DerivIdx, DerivationArena};
  use crate::error::SemanticError;
  use crate::rules::{Rule, TOKEN_CAT};
  use crate::semfn::ChildInfo;

  fn call_with(sem: Arc<dyn SemanticFn>, children: &[Derivation]) -> Vec<Result<Derivation, SemanticError>> {
    let ctx = SemContext::default();
    let ex = Example::new("x");
    let mut arena = DerivationArena::new();
    let infos = children
      .iter()
      .map(|d| {
        let idx: DerivIdx = arena.push(d.clone());
        ChildInfo::of(idx, &arena[idx])
      })
      .collect::<Vec<_>>();
    let rule = Arc::new(Rule::new("$X", vec![TOKEN_CAT.to_string(); children.len()], sem.clone()));
    let ci = CallInfo::new(0, children.len(), rule, infos);
    sem.call(&ctx, &ex, ci).collect()
  }

  #[test]
  fn test_constant_fn_infers_type() {
    let sem = Arc::new(ConstantFn::from_sexp(&"(ConstantFn (number 3))".parse().unwrap()).unwrap());
    let out = call_with(sem, &[]);
    let d = out[0].as_ref().unwrap();
    assert_eq!(d.formula, "(number 3)".parse::<Formula>().unwrap());
    assert_eq!(d.sem_type, SemType::number());

    let sem = Arc::new(ConstantFn::new(Formula::name("fb:en.x"), Some(SemType::atomic("fb:type.y"))));
    let out = call_with(sem, &[]);
    assert_eq!(out[0].as_ref().unwrap().sem_type, SemType::atomic("fb:type.y"));
  }

  #[test]
  fn test_concat_fn() {
    let sem = Arc::new(ConcatFn::new(" "));
    let children = [
      Derivation::terminal(TOKEN_CAT, 0, 1, "a", "a"),
      Derivation::terminal(TOKEN_CAT, 1, 2, "b", "b"),
    ];
    let out = call_with(sem, &children);
    let d = out[0].as_ref().unwrap();
    assert_eq!(d.formula, Formula::string("a b"));
    assert_eq!(d.canonical_utterance, "a b");
    assert_eq!(d.children.len(), 2);
  }

  #[test]
  fn test_identity_fn_arity() {
    let children = [
      Derivation::terminal(TOKEN_CAT, 0, 1, "a", "a"),
      Derivation::terminal(TOKEN_CAT, 1, 2, "b", "b"),
    ];
    let out = call_with(Arc::new(IdentityFn::new()), &children);
    assert_eq!(out[0].as_ref().unwrap_err(), &SemanticError::Arity { expected: 1, got: 2 });

    let out = call_with(Arc::new(SelectFn::new(1)), &children);
    assert_eq!(out[0].as_ref().unwrap().formula, Formula::string("b"));
    let out = call_with(Arc::new(SelectFn::new(2)), &children);
    assert!(out[0].is_err());
  }
}
