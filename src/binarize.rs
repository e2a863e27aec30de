//! Rewrites rules with long or partly optional right-hand sides into rules
//! with at most two symbols each.

use std::sync::Arc;

use crate::error::GrammarError;
use crate::rules::{is_cat, Rule, INTERMEDIATE_PREFIX};
use crate::semfn::{ConstantFn, JoinFn, SelectFn, SemanticFn};

/// Hands out `$Intermediate1`, `$Intermediate2`, ...
#[derive(Debug, Default, Clone)]
pub struct FreshCats {
  next: usize,
}

impl FreshCats {
  pub fn fresh(&mut self) -> String {
    self.next += 1;
    format!("{}{}", INTERMEDIATE_PREFIX, self.next)
  }

  /// Number of categories handed out so far
  pub fn count(&self) -> usize {
    self.next
  }
}

fn binarize_error(rule: &Rule, optionals: &[bool], reason: &str) -> GrammarError {
  GrammarError::Binarize {
    rule: format!("{} {:?}", rule, optionals),
    reason: reason.to_string(),
  }
}

/// A rule derived from `parent`, carrying over its info and source
fn derived(parent: &Rule, lhs: String, rhs: Vec<String>, sem: Arc<dyn SemanticFn>) -> Rule {
  Rule::new(lhs, rhs, sem)
    .with_info(parent.info.clone())
    .with_source(parent.source.clone())
}

/// Binarizes `rule`, where `optionals[i]` marks `rule.rhs[i]` as optional.
///
/// Only required categories are arguments to the semantic function. Each
/// emitted rule combines two symbols (or one, when the other was dropped as
/// optional); a pair whose members aren't both arguments gets a `SelectFn`
/// or null `ConstantFn` stand-in. With `binarize` off, the rule passes
/// through as is and may not have optional symbols.
pub fn binarize_rule(
  rule: Rule,
  optionals: &[bool],
  binarize: bool,
  fresh: &mut FreshCats,
) -> Result<Vec<Rule>, GrammarError> {
  if optionals.len() != rule.rhs.len() {
    return Err(binarize_error(&rule, optionals, "optional markers don't match the right-hand side"));
  }
  if !binarize {
    if optionals.contains(&true) {
      return Err(binarize_error(&rule, optionals, "optional symbols need binarization"));
    }
    return Ok(vec![rule]);
  }

  let required_at = |i: usize| is_cat(&rule.rhs[i]) && !optionals[i];

  // A function with a bound first argument takes only the first required
  // category; the rest are applied to its result one at a time:
  //   $A -> a $B $C $D (JoinFn (arg0 ...))
  // becomes
  //   $I -> a $B (JoinFn (arg0 ...))
  //   $A -> $I $C $D (JoinFn forward betaReduce)
  if rule.sem.has_bound_arg0() {
    let n = rule.rhs.len();
    let i = (0..n).find(|&i| required_at(i)).unwrap_or(n);
    let j = (i + 1..n).find(|&j| required_at(j)).unwrap_or(n);
    if j < n {
      let int_cat = fresh.fresh();
      let mut rules = binarize_rule(
        derived(&rule, int_cat.clone(), rule.rhs[..=i].to_vec(), rule.sem.clone()),
        &optionals[..=i],
        binarize,
        fresh,
      )?;
      let mut rhs2 = vec![int_cat];
      rhs2.extend_from_slice(&rule.rhs[i + 1..]);
      // the intermediate category takes the place of rhs[i], which is required
      rules.extend(binarize_rule(
        derived(&rule, rule.lhs.clone(), rhs2, Arc::new(JoinFn::forward_beta_reduce())),
        &optionals[i..],
        binarize,
        fresh,
      )?);
      return Ok(rules);
    }
  }

  if !optionals.contains(&false) {
    return Err(binarize_error(&rule, optionals, "can't have every symbol be optional"));
  }
  if rule.rhs.len() <= 1 {
    return Ok(vec![rule]);
  }

  let mut rules = Vec::new();
  let mut new_rhs: Vec<String> = Vec::with_capacity(2);
  let mut new_optional: Vec<bool> = Vec::with_capacity(2);
  let mut required: Vec<bool> = Vec::with_capacity(2);
  let mut applied_rule_sem = false;

  for (i, symbol) in rule.rhs.iter().enumerate() {
    new_rhs.push(symbol.clone());
    new_optional.push(optionals[i]);
    required.push(required_at(i));
    if new_rhs.len() < 2 {
      continue;
    }

    if required[0] && required[1] {
      applied_rule_sem = true;
    }
    let at_end = i == rule.rhs.len() - 1;
    let lhs = if at_end && applied_rule_sem {
      rule.lhs.clone()
    } else {
      fresh.fresh()
    };

    let mut all_can_be_optional = false;
    for b0 in [false, true] {
      if !b0 && !new_optional[0] {
        continue;
      }
      for b1 in [false, true] {
        if !b1 && !new_optional[1] {
          continue;
        }
        let rhs = [(b0, &new_rhs[0]), (b1, &new_rhs[1])]
          .into_iter()
          .filter(|(included, _)| *included)
          .map(|(_, s)| s.clone())
          .collect::<Vec<_>>();
        let sem: Arc<dyn SemanticFn> = if required[0] && required[1] {
          rule.sem.clone()
        } else if b0 && is_cat(&rhs[0]) && required[1] {
          Arc::new(SelectFn::new(1))
        } else if required[0] || required[1] {
          Arc::new(SelectFn::new(0))
        } else {
          Arc::new(ConstantFn::null())
        };
        if rhs.is_empty() {
          all_can_be_optional = true;
        } else {
          rules.push(derived(&rule, lhs.clone(), rhs, sem));
        }
      }
    }
    let req = required[0] || required[1];

    new_rhs = vec![lhs];
    new_optional = vec![all_can_be_optional];
    required = vec![req];
  }

  if !applied_rule_sem {
    rules.push(derived(&rule, rule.lhs.clone(), new_rhs, rule.sem.clone()));
  }
  Ok(rules)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::semfn::IdentityFn;
  use crate::utils::combinations;

  fn rule(lhs: &str, rhs: &str, sem: Arc<dyn SemanticFn>) -> Rule {
    Rule::new(lhs, rhs.split_whitespace().map(str::to_string).collect(), sem)
  }

  fn strings(rules: &[Rule]) -> Vec<String> {
    rules.iter().map(|r| r.to_string()).collect()
  }

  /// Every sequence of symbols `cat` can rewrite to, down to the symbols that
  /// aren't left-hand sides of `rules`
  fn expansions(rules: &[Rule], cat: &str) -> Vec<Vec<String>> {
    let mut out = Vec::new();
    for r in rules.iter().filter(|r| r.lhs == cat) {
      let choices = r
        .rhs
        .iter()
        .map(|s| {
          if rules.iter().any(|r| &r.lhs == s) {
            expansions(rules, s)
          } else {
            vec![vec![s.clone()]]
          }
        })
        .collect::<Vec<_>>();
      for combo in combinations(&choices) {
        out.push(combo.concat());
      }
    }
    out.sort();
    out
  }

  #[test]
  fn test_short_rules_pass_through() {
    let mut fresh = FreshCats::default();
    let rules = binarize_rule(rule("$A", "$B $C", Arc::new(IdentityFn::new())), &[false, false], true, &mut fresh).unwrap();
    assert_eq!(strings(&rules), vec!["$A -> $B $C (IdentityFn)"]);
    let rules = binarize_rule(rule("$A", "a", Arc::new(IdentityFn::new())), &[false], true, &mut fresh).unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(fresh.count(), 0);
  }

  #[test]
  fn test_three_categories() {
    let mut fresh = FreshCats::default();
    let rules = binarize_rule(
      rule("$A", "$B $C $D", Arc::new(IdentityFn::new())),
      &[false, false, false],
      true,
      &mut fresh,
    )
    .unwrap();
    assert_eq!(
      strings(&rules),
      vec![
        "$Intermediate1 -> $B $C (IdentityFn)",
        "$A -> $Intermediate1 $D (IdentityFn)",
      ]
    );
  }

  #[test]
  fn test_optionals_cover_every_subsequence() {
    let mut fresh = FreshCats::default();
    let sem: Arc<dyn SemanticFn> = Arc::new(IdentityFn::new());
    let rules = binarize_rule(
      rule("$A", "stop $B $Stop stop2 $C", sem),
      &[true, false, true, false, false],
      true,
      &mut fresh,
    )
    .unwrap();
    for r in rules.iter() {
      assert!(!r.rhs.is_empty() && r.rhs.len() <= 2, "{}", r);
    }
    let mut expected = Vec::new();
    for (with_stop, with_cat) in [(false, false), (false, true), (true, false), (true, true)] {
      let mut seq = Vec::new();
      if with_stop {
        seq.push("stop");
      }
      seq.push("$B");
      if with_cat {
        seq.push("$Stop");
      }
      seq.extend(["stop2", "$C"]);
      expected.push(seq.into_iter().map(str::to_string).collect::<Vec<_>>());
    }
    expected.sort();
    assert_eq!(expansions(&rules, "$A"), expected);

    // the rule's own function sees exactly the two required categories
    let top = rules.iter().filter(|r| r.lhs == "$A").collect::<Vec<_>>();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].sem_repr(), "(IdentityFn)");
    assert_eq!(top[0].rhs.len(), 2);
  }

  #[test]
  fn test_select_and_null_stand_ins() {
    let mut fresh = FreshCats::default();
    let rules = binarize_rule(
      rule("$A", "the $B", Arc::new(IdentityFn::new())),
      &[true, false],
      true,
      &mut fresh,
    )
    .unwrap();
    assert_eq!(
      strings(&rules),
      vec![
        "$Intermediate1 -> $B (SelectFn 0)",
        "$Intermediate1 -> the $B (SelectFn 0)",
        "$A -> $Intermediate1 (IdentityFn)",
      ]
    );

    let rules = binarize_rule(
      rule("$A", "$X $B", Arc::new(IdentityFn::new())),
      &[true, false],
      true,
      &mut fresh,
    )
    .unwrap();
    assert_eq!(rules[1].to_string(), "$Intermediate2 -> $X $B (SelectFn 1)");

    let rules = binarize_rule(
      rule("$A", "what is", Arc::new(IdentityFn::new())),
      &[false, false],
      true,
      &mut fresh,
    )
    .unwrap();
    assert_eq!(
      strings(&rules),
      vec![
        "$Intermediate3 -> what is (ConstantFn null)",
        "$A -> $Intermediate3 (IdentityFn)",
      ]
    );
  }

  #[test]
  fn test_all_optional_rejected() {
    let mut fresh = FreshCats::default();
    let err = binarize_rule(
      rule("$A", "$B $C", Arc::new(IdentityFn::new())),
      &[true, true],
      true,
      &mut fresh,
    );
    assert!(matches!(err, Err(GrammarError::Binarize { .. })));
  }

  #[test]
  fn test_no_binarize() {
    let mut fresh = FreshCats::default();
    let long = || rule("$A", "$B $C $D", Arc::new(IdentityFn::new()));
    let rules = binarize_rule(long(), &[false; 3], false, &mut fresh).unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].rhs.len(), 3);
    assert!(binarize_rule(long(), &[true, false, false], false, &mut fresh).is_err());
  }

  #[test]
  fn test_bound_arg0_splits_application() {
    let mut fresh = FreshCats::default();
    let sem = Arc::new(JoinFn::applying(
      "(lambda b (lambda c (+ (var b) (var c))))".parse().unwrap(),
    ));
    let rules = binarize_rule(
      rule("$A", "add $B and $C", sem),
      &[false, false, false, false],
      true,
      &mut fresh,
    )
    .unwrap();
    let lines = strings(&rules);
    assert_eq!(lines.len(), 4, "{:#?}", lines);
    // tokens aren't arguments, so $B is argument 0
    assert_eq!(lines[0], "$Intermediate2 -> add $B (SelectFn 0)");
    assert!(lines[1].starts_with("$Intermediate1 -> $Intermediate2 (JoinFn betaReduce forward (arg0"));
    assert_eq!(lines[2], "$Intermediate3 -> $Intermediate1 and (SelectFn 0)");
    assert_eq!(lines[3], "$A -> $Intermediate3 $C (JoinFn forward betaReduce)");
  }
}
