use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::error::FormulaError;
use crate::names;
use crate::sexp::Sexp;

/// A type describing the domain and range of a formula.
///
/// Types form a lattice with `Top` at the top and the empty union as bottom
/// (the invalid type). Unions built through [`SemType::union`] are always
/// simplified: flat, sorted, without duplicates or invalid members, collapsed
/// to `Top` when they contain it and to the sole member when there is one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SemType {
  Top,
  Atomic(String),
  /// (argument, return)
  Func(Box<SemType>, Box<SemType>),
  Union(Vec<SemType>),
}

impl SemType {
  pub fn bottom() -> Self {
    Self::Union(Vec::new())
  }

  pub fn atomic(name: impl Into<String>) -> Self {
    Self::Atomic(name.into())
  }

  pub fn func(arg: SemType, ret: SemType) -> Self {
    Self::Func(Box::new(arg), Box::new(ret))
  }

  pub fn any() -> Self {
    Self::atomic(names::ANY)
  }

  pub fn entity() -> Self {
    Self::atomic(names::ENTITY)
  }

  pub fn boolean() -> Self {
    Self::atomic(names::BOOLEAN)
  }

  pub fn int() -> Self {
    Self::atomic(names::INT)
  }

  pub fn float() -> Self {
    Self::atomic(names::FLOAT)
  }

  pub fn number() -> Self {
    Self::atomic(names::NUMBER)
  }

  pub fn text() -> Self {
    Self::atomic(names::TEXT)
  }

  pub fn date() -> Self {
    Self::atomic(names::DATE)
  }

  pub fn time() -> Self {
    Self::atomic(names::TIME)
  }

  pub fn number_or_date() -> Self {
    Self::union([Self::number(), Self::date()])
  }

  pub fn any_any_func() -> Self {
    Self::func(Self::any(), Self::any())
  }

  pub fn compare_func() -> Self {
    Self::func(Self::number_or_date(), Self::number_or_date())
  }

  /// Builds a simplified union
  pub fn union(types: impl IntoIterator<Item = SemType>) -> Self {
    fn flatten_into(out: &mut Vec<SemType>, t: SemType) {
      match t {
        SemType::Union(inner) => {
          for m in inner {
            flatten_into(out, m);
          }
        }
        t if t.is_valid() => out.push(t),
        _ => {}
      }
    }

    let mut members = Vec::new();
    for t in types {
      flatten_into(&mut members, t);
    }
    if members.contains(&SemType::Top) {
      return SemType::Top;
    }
    members.sort();
    members.dedup();
    if members.len() == 1 {
      members.remove(0)
    } else {
      SemType::Union(members)
    }
  }

  /// Whether this is not bottom
  pub fn is_valid(&self) -> bool {
    match self {
      Self::Top | Self::Atomic(_) => true,
      Self::Func(arg, ret) => arg.is_valid() && ret.is_valid(),
      Self::Union(members) => members.iter().any(SemType::is_valid),
    }
  }

  /// Greatest lower bound
  pub fn meet(&self, that: &SemType, hierarchy: &TypeHierarchy) -> SemType {
    match (self, that) {
      (Self::Top, t) | (t, Self::Top) => t.clone(),
      (Self::Union(members), t) => Self::union(members.iter().map(|m| m.meet(t, hierarchy))),
      (t, Self::Union(members)) => Self::union(members.iter().map(|m| t.meet(m, hierarchy))),
      (Self::Atomic(a), Self::Atomic(b)) => {
        if hierarchy.is_subtype(a, b) {
          self.clone()
        } else if hierarchy.is_subtype(b, a) {
          that.clone()
        } else {
          Self::bottom()
        }
      }
      (Self::Func(a1, r1), Self::Func(a2, r2)) => {
        let arg = a1.meet(a2, hierarchy);
        if !arg.is_valid() {
          return Self::bottom();
        }
        let ret = r1.meet(r2, hierarchy);
        if !ret.is_valid() {
          return Self::bottom();
        }
        Self::func(arg, ret)
      }
      _ => Self::bottom(),
    }
  }

  /// Treats `self` as a function type and applies it to an argument of type `arg`
  pub fn apply(&self, arg: &SemType, hierarchy: &TypeHierarchy) -> SemType {
    match self {
      Self::Top => Self::Top,
      Self::Atomic(_) => Self::bottom(),
      Self::Func(a, r) => {
        if a.meet(arg, hierarchy).is_valid() {
          (**r).clone()
        } else {
          Self::bottom()
        }
      }
      Self::Union(members) => Self::union(members.iter().map(|m| m.apply(arg, hierarchy))),
    }
  }

  /// Swaps argument and return: (s -> t) becomes (t -> s)
  pub fn reverse(&self) -> SemType {
    match self {
      Self::Top => Self::Top,
      Self::Atomic(_) => Self::bottom(),
      Self::Func(a, r) => Self::Func(r.clone(), a.clone()),
      Self::Union(members) => Self::union(members.iter().map(SemType::reverse)),
    }
  }

  pub fn arg_type(&self, hierarchy: &TypeHierarchy) -> SemType {
    self.reverse().apply(&Self::Top, hierarchy)
  }

  pub fn ret_type(&self, hierarchy: &TypeHierarchy) -> SemType {
    self.apply(&Self::Top, hierarchy)
  }

  pub fn to_sexp(&self) -> Sexp {
    match self {
      Self::Top => Sexp::leaf("top"),
      Self::Atomic(name) => Sexp::leaf(name.clone()),
      Self::Func(arg, ret) => Sexp::list(vec![Sexp::leaf("->"), arg.to_sexp(), ret.to_sexp()]),
      Self::Union(members) => {
        let mut children = vec![Sexp::leaf("union")];
        children.extend(members.iter().map(SemType::to_sexp));
        Sexp::list(children)
      }
    }
  }

  pub fn from_sexp(tree: &Sexp) -> Result<SemType, FormulaError> {
    let invalid = || FormulaError::InvalidType(tree.to_string());
    if let Some(name) = tree.as_leaf() {
      return Ok(if name == "top" { Self::Top } else { Self::atomic(name) });
    }
    match tree.head() {
      Some("union") => {
        let members = tree.children()[1..]
          .iter()
          .map(SemType::from_sexp)
          .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::union(members))
      }
      // (-> a b c) is (-> a (-> b c))
      Some("->") if tree.len() >= 3 => {
        let children = &tree.children()[1..];
        let mut result = Self::from_sexp(&children[children.len() - 1])?;
        for child in children[..children.len() - 1].iter().rev() {
          result = Self::func(Self::from_sexp(child)?, result);
        }
        Ok(result)
      }
      _ => Err(invalid()),
    }
  }
}

impl fmt::Display for SemType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.to_sexp())
  }
}

impl FromStr for SemType {
  type Err = FormulaError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::from_sexp(&s.parse::<Sexp>()?)
  }
}

/// A DAG over atomic type names: subtype < type < supertype.
///
/// Types that were never registered behave as entity subtypes. Looking them
/// up never mutates the hierarchy, so one instance can be shared by
/// concurrent parses.
#[derive(Debug, Clone)]
pub struct TypeHierarchy {
  supertypes: HashMap<String, HashSet<String>>,
}

impl Default for TypeHierarchy {
  fn default() -> Self {
    let mut h = Self {
      supertypes: HashMap::new(),
    };
    for t in [
      names::BOOLEAN,
      names::INT,
      names::FLOAT,
      names::DATE,
      names::TEXT,
      names::NUMBER,
      names::ENTITY,
      names::ANY,
    ] {
      h.add_supertype(t, t);
      h.add_supertype(t, names::ANY);
    }
    h.add_supertype(names::INT, names::NUMBER);
    h.add_supertype(names::FLOAT, names::NUMBER);
    h
  }
}

impl TypeHierarchy {
  pub fn new() -> Self {
    Default::default()
  }

  pub fn add_supertype(&mut self, subtype: &str, supertype: &str) {
    self
      .supertypes
      .entry(subtype.to_string())
      .or_default()
      .insert(supertype.to_string());
  }

  pub fn add_entity_supertypes(&mut self, t: &str) {
    self.add_supertype(t, t);
    self.add_supertype(t, names::ENTITY);
    self.add_supertype(t, names::ANY);
  }

  pub fn is_subtype(&self, subtype: &str, supertype: &str) -> bool {
    match self.supertypes.get(subtype) {
      Some(set) => set.contains(supertype),
      None => supertype == subtype || supertype == names::ENTITY || supertype == names::ANY,
    }
  }

  /// All supertypes of `t` (including itself), sorted
  pub fn supertypes(&self, t: &str) -> Vec<String> {
    let mut out: Vec<String> = match self.supertypes.get(t) {
      Some(set) => set.iter().cloned().collect(),
      None => vec![t.to_string(), names::ENTITY.to_string(), names::ANY.to_string()],
    };
    out.sort();
    out
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn t(s: &str) -> SemType {
    s.parse().unwrap()
  }

  fn all_types() -> Vec<SemType> {
    [
      "top",
      "city",
      "fb:type.int",
      "fb:type.number",
      "fb:type.any",
      "(union city country)",
      "(-> city fb:type.int)",
      "(-> top (-> a b))",
      "(union)",
    ]
    .iter()
    .map(|s| t(s))
    .collect()
  }

  #[test]
  fn test_meet_examples() {
    let h = TypeHierarchy::default();
    assert_eq!(t("city").meet(&t("country"), &h).to_string(), "(union)");
    assert_eq!(
      t("(-> (-> a b) top)").meet(&t("(-> top (-> a b))"), &h).to_string(),
      "(-> (-> a b) (-> a b))"
    );
    assert_eq!(
      t("(-> (union city country) person)")
        .meet(&t("(-> city (union person dog))"), &h)
        .to_string(),
      "(-> city person)"
    );
    assert_eq!(t("fb:type.any").meet(&t("city"), &h), t("city"));
    assert_eq!(t("fb:type.int").meet(&t("fb:type.number"), &h), t("fb:type.int"));
  }

  #[test]
  fn test_apply_and_reverse() {
    let h = TypeHierarchy::default();
    let f = t("(-> city fb:type.int)");
    assert_eq!(f.apply(&t("(union city country)"), &h), t("fb:type.int"));
    assert!(!f.apply(&t("country"), &h).is_valid());
    assert_eq!(f.reverse(), t("(-> fb:type.int city)"));
    assert_eq!(f.arg_type(&h), t("city"));
    assert_eq!(f.ret_type(&h), t("fb:type.int"));
    assert!(!t("city").apply(&SemType::Top, &h).is_valid());
    assert_eq!(SemType::Top.apply(&t("city"), &h), SemType::Top);
  }

  #[test]
  fn test_lattice_laws() {
    let h = TypeHierarchy::default();
    let bottom = SemType::bottom();
    for a in all_types() {
      assert_eq!(a.meet(&SemType::Top, &h), a);
      assert!(!a.meet(&bottom, &h).is_valid());
      for b in all_types() {
        assert_eq!(a.meet(&b, &h), b.meet(&a, &h), "{} meet {}", a, b);
      }
    }
  }

  #[test]
  fn test_union_simplification() {
    let h = TypeHierarchy::default();
    let plain = t("(union city country)");
    let dup = SemType::union([t("city"), t("country"), t("city"), SemType::bottom()]);
    assert_eq!(plain, dup);
    let single = SemType::union([t("city")]);
    assert_eq!(single, t("city"));
    assert_eq!(single.meet(&t("fb:type.any"), &h), t("city"));
    assert_eq!(SemType::union([t("city"), SemType::Top]), SemType::Top);
    assert_eq!(
      SemType::union([t("(union a b)"), t("(union b c)")]).to_string(),
      "(union a b c)"
    );
  }

  #[test]
  fn test_right_nested_arrow() {
    assert_eq!(t("(-> a b c)"), t("(-> a (-> b c))"));
    assert!("(-> a)".parse::<SemType>().is_err());
  }

  #[test]
  fn test_unknown_types_are_entities() {
    let h = TypeHierarchy::default();
    assert!(h.is_subtype("fb:people.person", names::ENTITY));
    assert!(!h.is_subtype("fb:people.person", names::NUMBER));
    assert_eq!(
      t("fb:people.person").meet(&SemType::entity(), &h),
      t("fb:people.person")
    );
    assert_eq!(h.supertypes("fb:type.int").len(), 3);
  }
}
