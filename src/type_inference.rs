//! Upper-bound type inference for formulas. The result doesn't have to be
//! tight: it only exists to prune combinations that can't possibly be right.

use tracing::{trace, warn};

use crate::formula::{AggregateMode, Formula};
use crate::names;
use crate::semtype::{SemType, TypeHierarchy};
use crate::value::Value;

/// Source of types for entities and properties, e.g. a loaded schema
pub trait TypeLookup: Send + Sync {
  /// Type of a unary such as `fb:people.person`, if known
  fn entity_type(&self, id: &str) -> Option<SemType>;
  /// Type of a (non-reversed) binary such as `fb:people.person.place_of_birth`
  fn property_type(&self, id: &str) -> Option<SemType>;
}

/// Knows nothing, so every name gets the most generic type
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTypeLookup;

impl TypeLookup for NullTypeLookup {
  fn entity_type(&self, _id: &str) -> Option<SemType> {
    None
  }

  fn property_type(&self, _id: &str) -> Option<SemType> {
    None
  }
}

/// Argument and return types of the functions that may appear in `(call f ...)`
fn call_signature(func: &str) -> Option<(Vec<SemType>, SemType)> {
  match func {
    "Math.cos" => Some((vec![SemType::float()], SemType::float())),
    ".concat" => Some((vec![SemType::text(), SemType::text()], SemType::text())),
    ".length" => Some((vec![SemType::text()], SemType::int())),
    ".toString" => Some((vec![SemType::any()], SemType::text())),
    _ => None,
  }
}

fn special_type(id: &str) -> Option<SemType> {
  match id {
    names::STAR => Some(SemType::any()),
    "!=" | names::COLON => Some(SemType::any_any_func()),
    "<" | ">" | "<=" | ">=" => Some(SemType::compare_func()),
    _ => None,
  }
}

/// Raised internally as soon as any intermediate type becomes bottom
struct Mismatch;

type Inferred = Result<SemType, Mismatch>;

fn check(t: SemType) -> Inferred {
  if t.is_valid() { Ok(t) } else { Err(Mismatch) }
}

struct Inferer<'a> {
  lookup: &'a dyn TypeLookup,
  hierarchy: &'a TypeHierarchy,
  allow_free_vars: bool,
  /// Innermost binding last
  env: Vec<(String, SemType)>,
}

impl<'a> Inferer<'a> {
  fn meet(&self, a: &SemType, b: &SemType) -> SemType {
    a.meet(b, self.hierarchy)
  }

  fn func(&self, arg: SemType, ret: SemType) -> SemType {
    SemType::func(arg, ret)
  }

  /// Narrows the innermost binding of `var` by `t`
  fn update_var(&mut self, var: &str, t: &SemType) -> Inferred {
    let hierarchy = self.hierarchy;
    match self.env.iter_mut().rev().find(|(name, _)| name == var) {
      Some((_, bound)) => {
        let narrowed = bound.meet(t, hierarchy);
        if !narrowed.is_valid() {
          trace!("invalid type from [{} MEET {}]", bound, t);
        }
        *bound = narrowed.clone();
        check(narrowed)
      }
      None if self.allow_free_vars => check(t.clone()),
      None => {
        warn!("free variable not defined: {}", var);
        Err(Mismatch)
      }
    }
  }

  fn with_var<T>(&mut self, var: &str, body: impl FnOnce(&mut Self) -> T) -> (T, SemType) {
    self.env.push((var.to_string(), SemType::Top));
    let result = body(self);
    let (_, bound) = self.env.pop().unwrap_or_else(|| (var.to_string(), SemType::Top));
    (result, bound)
  }

  fn infer_name(&self, id: &str, t: &SemType) -> Inferred {
    if names::is_unary(id) && special_type(id).is_none() {
      let unary = self.lookup.entity_type(id).unwrap_or_else(SemType::entity);
      return check(self.meet(t, &unary));
    }
    let property = if let Some(special) = special_type(id) {
      Some(special)
    } else if !names::is_reverse_property(id) {
      self.lookup.property_type(id)
    } else {
      self
        .lookup
        .property_type(&names::reverse_property(id))
        .map(|p| p.reverse())
    };
    let property = property.unwrap_or_else(SemType::any_any_func);
    check(self.meet(t, &property))
  }

  fn infer(&mut self, formula: &Formula, t: SemType) -> Inferred {
    trace!("infer({}, {})", formula, t);
    match formula {
      Formula::Variable(name) => self.update_var(name, &t),
      Formula::Value(value) => match value {
        Value::Number { .. } => check(self.meet(&t, &SemType::number())),
        Value::String(_) => check(self.meet(&t, &SemType::text())),
        Value::Date(_) => check(self.meet(&t, &SemType::date())),
        Value::Boolean(_) => check(self.meet(&t, &SemType::boolean())),
        Value::Name { id, .. } => self.infer_name(id, &t),
        Value::List(_) => check(self.meet(&t, &SemType::any())),
        Value::Error(_) => Err(Mismatch),
      },
      Formula::Join { relation, child } => {
        if relation.name_id() == Some(names::TYPE) {
          if let Some(type_name) = child.string_of() {
            return check(self.meet(&t, &SemType::atomic(type_name)));
          }
        }
        if matches!(relation.name_id(), Some("<" | ">" | "<=" | ">=")) {
          let child_type = self.infer(child, SemType::number_or_date())?;
          return check(self.meet(&t, &child_type));
        }
        let relation_type = self.infer(relation, self.func(SemType::Top, t.clone()))?;
        let child_type = self.infer(child, relation_type.arg_type(self.hierarchy))?;
        let relation_type = self.infer(relation, self.func(child_type, t))?;
        check(relation_type.ret_type(self.hierarchy))
      }
      Formula::Merge { child1, child2, .. } => {
        // not higher-order
        let t = check(self.meet(&t, &SemType::any()))?;
        let t = self.infer(child1, t)?;
        self.infer(child2, t)
      }
      Formula::Mark { var, body } => {
        let t = check(self.meet(&t, &SemType::any()))?;
        let (body_type, _) = self.with_var(var, |me| {
          let body_type = me.infer(body, t)?;
          me.update_var(var, &body_type)
        });
        body_type
      }
      Formula::Lambda { var, body } => {
        let ret = t.ret_type(self.hierarchy);
        let arg = t.arg_type(self.hierarchy);
        let (body_type, _) = self.with_var(var, |me| {
          let body_type = me.infer(body, ret)?;
          let var_type = me.update_var(var, &arg)?;
          Ok(SemType::func(var_type, body_type))
        });
        body_type
      }
      Formula::Not(child) => {
        let t = check(self.meet(&t, &SemType::any()))?;
        self.infer(child, t)
      }
      Formula::Aggregate { mode, child } => {
        let child_type = self.infer(child, SemType::any())?;
        if *mode == AggregateMode::Count {
          check(self.meet(&SemType::number(), &t))
        } else {
          let bound = self.meet(&SemType::number_or_date(), &t);
          check(self.meet(&bound, &child_type))
        }
      }
      Formula::Arithmetic { child1, child2, .. } => {
        let t = self.infer(child1, t)?;
        let t = self.infer(child2, t)?;
        check(self.meet(&t, &SemType::number_or_date()))
      }
      Formula::Reverse(child) => {
        let reversed = self.infer(child, t.reverse())?;
        check(reversed.reverse())
      }
      Formula::Superlative {
        rank,
        count,
        head,
        relation,
        ..
      } => {
        self.infer(rank, SemType::number())?;
        self.infer(count, SemType::number())?;
        let t = check(self.meet(&t, &SemType::any()))?;
        let t = self.infer(head, t)?;
        let relation_type = self.infer(relation, self.func(SemType::number_or_date(), t))?;
        self.infer(head, relation_type.ret_type(self.hierarchy))
      }
      Formula::Call { func, args } => {
        let Some(func) = func.name_id() else {
          return Ok(SemType::bottom());
        };
        let Some((arg_types, ret_type)) = call_signature(func) else {
          // unknown function, anything goes
          return Ok(SemType::any());
        };
        if arg_types.len() != args.len() {
          return Ok(SemType::bottom());
        }
        for (arg, arg_type) in args.iter().zip(arg_types) {
          self.infer(arg, arg_type)?;
        }
        check(self.meet(&t, &ret_type))
      }
    }
  }
}

/// Infers an upper bound on the type of `formula`. Free variables make the
/// result bottom.
pub fn infer_type(formula: &Formula, lookup: &dyn TypeLookup, hierarchy: &TypeHierarchy) -> SemType {
  infer_type_with(formula, lookup, hierarchy, false)
}

/// Like `infer_type`, optionally treating free variables as unconstrained
pub fn infer_type_with(
  formula: &Formula,
  lookup: &dyn TypeLookup,
  hierarchy: &TypeHierarchy,
  allow_free_vars: bool,
) -> SemType {
  let mut inferer = Inferer {
    lookup,
    hierarchy,
    allow_free_vars,
    env: Vec::new(),
  };
  let result = inferer.infer(formula, SemType::Top).unwrap_or_else(|Mismatch| SemType::bottom());
  trace!("type inference: {} => {}", formula, result);
  result
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  fn infer(s: &str) -> SemType {
    infer_type(&s.parse().unwrap(), &NullTypeLookup, &TypeHierarchy::default())
  }

  fn t(s: &str) -> SemType {
    s.parse().unwrap()
  }

  #[test]
  fn test_values() {
    assert_eq!(infer("(number 3)"), SemType::number());
    assert_eq!(infer("(string hello)"), SemType::text());
    assert_eq!(infer("(date 2012 3 4)"), SemType::date());
    assert_eq!(infer("fb:en.barack_obama"), SemType::entity());
    assert_eq!(infer("fb:people.person.place_of_birth"), SemType::any_any_func());
  }

  #[test]
  fn test_lambda_over_unknown_call() {
    assert_eq!(
      infer("(lambda y (lambda x (call + (var x) (var y))))"),
      t("(-> top (-> top fb:type.any))")
    );
  }

  #[test]
  fn test_known_calls() {
    assert_eq!(infer("(call .length (string abc))"), SemType::int());
    assert_eq!(infer("(call .concat (string a) (string b))"), SemType::text());
    assert!(!infer("(call .length (number 3))").is_valid());
    assert!(!infer("(call .length (string a) (string b))").is_valid());
    assert!(!infer("(call (lambda x (var x)) (string a))").is_valid());
    assert_eq!(
      infer("(lambda x (call .length (var x)))"),
      t("(-> fb:type.text fb:type.int)")
    );
  }

  #[test]
  fn test_joins() {
    assert_eq!(
      infer("(fb:type.object.type fb:people.person)"),
      SemType::atomic("fb:people.person")
    );
    assert_eq!(infer("(< (number 3))"), SemType::number());
    assert!(!infer("(< (string a))").is_valid());
    assert_eq!(infer("(fb:people.person.place_of_birth fb:en.honolulu)"), SemType::any());
  }

  #[test]
  fn test_aggregates_and_arithmetic() {
    assert_eq!(infer("(count (fb:type.object.type fb:people.person))"), SemType::number());
    assert_eq!(infer("(+ (number 1) (number 2))"), SemType::number());
    assert!(!infer("(+ (string a) (number 2))").is_valid());
    assert!(!infer("(not (lambda x (var x)))").is_valid());
  }

  #[test]
  fn test_free_variables() {
    let formula: Formula = "(fb:a.b.c (var x))".parse().unwrap();
    let h = TypeHierarchy::default();
    assert!(!infer_type(&formula, &NullTypeLookup, &h).is_valid());
    assert_eq!(infer_type_with(&formula, &NullTypeLookup, &h, true), SemType::any());
  }

  struct MapLookup(HashMap<&'static str, SemType>);

  impl TypeLookup for MapLookup {
    fn entity_type(&self, id: &str) -> Option<SemType> {
      self.0.get(id).cloned()
    }

    fn property_type(&self, id: &str) -> Option<SemType> {
      self.0.get(id).cloned()
    }
  }

  #[test]
  fn test_lookup() {
    let mut h = TypeHierarchy::default();
    h.add_entity_supertypes("fb:location.location");
    h.add_entity_supertypes("fb:people.person");
    let lookup = MapLookup(
      [
        ("fb:en.honolulu", SemType::atomic("fb:location.location")),
        (
          "fb:people.person.place_of_birth",
          t("(-> fb:location.location fb:people.person)"),
        ),
      ]
      .into_iter()
      .collect(),
    );
    let f = |s: &str| infer_type(&s.parse().unwrap(), &lookup, &h);
    assert_eq!(
      f("(fb:people.person.place_of_birth fb:en.honolulu)"),
      SemType::atomic("fb:people.person")
    );
    assert_eq!(
      f("(!fb:people.person.place_of_birth (fb:type.object.type fb:people.person))"),
      SemType::atomic("fb:location.location")
    );
    assert!(!f("(fb:people.person.place_of_birth (number 3))").is_valid());
  }
}
