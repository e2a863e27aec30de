use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::FormulaError;
use crate::names;
use crate::sexp::Sexp;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MergeMode {
  And,
  Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AggregateMode {
  Count,
  Sum,
  Avg,
  Min,
  Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArithmeticMode {
  Add,
  Sub,
  Mul,
  Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SuperlativeMode {
  Argmax,
  Argmin,
}

macro_rules! mode_names {
  ($ty:ident { $($variant:ident => $name:expr),* $(,)? }) => {
    impl $ty {
      pub fn parse(s: &str) -> Option<Self> {
        match s {
          $($name => Some(Self::$variant),)*
          _ => None,
        }
      }

      pub fn as_str(&self) -> &'static str {
        match self {
          $(Self::$variant => $name,)*
        }
      }
    }

    impl fmt::Display for $ty {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
      }
    }
  };
}

mode_names!(MergeMode { And => "and", Or => "or" });
mode_names!(AggregateMode {
  Count => "count",
  Sum => "sum",
  Avg => "avg",
  Min => "min",
  Max => "max",
});
mode_names!(ArithmeticMode { Add => "+", Sub => "-", Mul => "*", Div => "/" });
mode_names!(SuperlativeMode { Argmax => "argmax", Argmin => "argmin" });

/// A logical form. Compared and hashed structurally; subtrees are shared
/// behind `Arc` so cloning is cheap.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Formula {
  Value(Value),
  Variable(String),
  Join {
    relation: Arc<Formula>,
    child: Arc<Formula>,
  },
  Merge {
    mode: MergeMode,
    child1: Arc<Formula>,
    child2: Arc<Formula>,
  },
  Not(Arc<Formula>),
  Lambda {
    var: String,
    body: Arc<Formula>,
  },
  Mark {
    var: String,
    body: Arc<Formula>,
  },
  Reverse(Arc<Formula>),
  Aggregate {
    mode: AggregateMode,
    child: Arc<Formula>,
  },
  Arithmetic {
    mode: ArithmeticMode,
    child1: Arc<Formula>,
    child2: Arc<Formula>,
  },
  Superlative {
    mode: SuperlativeMode,
    rank: Arc<Formula>,
    count: Arc<Formula>,
    head: Arc<Formula>,
    relation: Arc<Formula>,
  },
  Call {
    func: Arc<Formula>,
    args: Vec<Formula>,
  },
}

impl Formula {
  /// The formula used for "no semantics", e.g. for dropped optional symbols
  pub fn null() -> Self {
    Self::Value(Value::name("null"))
  }

  pub fn name(id: impl Into<String>) -> Self {
    Self::Value(Value::name(id))
  }

  pub fn string(s: impl Into<String>) -> Self {
    Self::Value(Value::string(s))
  }

  pub fn var(name: impl Into<String>) -> Self {
    Self::Variable(name.into())
  }

  pub fn join(relation: Formula, child: Formula) -> Self {
    Self::Join {
      relation: Arc::new(relation),
      child: Arc::new(child),
    }
  }

  pub fn merge(mode: MergeMode, child1: Formula, child2: Formula) -> Self {
    Self::Merge {
      mode,
      child1: Arc::new(child1),
      child2: Arc::new(child2),
    }
  }

  pub fn lambda(var: impl Into<String>, body: Formula) -> Self {
    Self::Lambda {
      var: var.into(),
      body: Arc::new(body),
    }
  }

  pub fn reverse(child: Formula) -> Self {
    Self::Reverse(Arc::new(child))
  }

  pub fn as_value(&self) -> Option<&Value> {
    match self {
      Self::Value(v) => Some(v),
      _ => None,
    }
  }

  /// The text of a string value formula
  pub fn string_value(&self) -> Option<&str> {
    match self {
      Self::Value(Value::String(s)) => Some(s),
      _ => None,
    }
  }

  /// The id of a name value formula
  pub fn name_id(&self) -> Option<&str> {
    match self {
      Self::Value(Value::Name { id, .. }) => Some(id),
      _ => None,
    }
  }

  /// Text of any value formula: strings verbatim, names by id, numbers bare
  pub fn string_of(&self) -> Option<String> {
    self.as_value().map(Value::plain_string)
  }

  /// Rewrites top-down: wherever `f` returns a replacement it is used as is,
  /// otherwise the node is rebuilt from its mapped children.
  pub fn map(&self, f: &mut impl FnMut(&Formula) -> Option<Formula>) -> Formula {
    if let Some(replacement) = f(self) {
      return replacement;
    }
    let mut m = |c: &Arc<Formula>| Arc::new(c.map(&mut *f));
    match self {
      Self::Value(_) | Self::Variable(_) => self.clone(),
      Self::Join { relation, child } => Self::Join {
        relation: m(relation),
        child: m(child),
      },
      Self::Merge {
        mode,
        child1,
        child2,
      } => Self::Merge {
        mode: *mode,
        child1: m(child1),
        child2: m(child2),
      },
      Self::Not(child) => Self::Not(m(child)),
      Self::Lambda { var, body } => Self::Lambda {
        var: var.clone(),
        body: m(body),
      },
      Self::Mark { var, body } => Self::Mark {
        var: var.clone(),
        body: m(body),
      },
      Self::Reverse(child) => Self::Reverse(m(child)),
      Self::Aggregate { mode, child } => Self::Aggregate {
        mode: *mode,
        child: m(child),
      },
      Self::Arithmetic {
        mode,
        child1,
        child2,
      } => Self::Arithmetic {
        mode: *mode,
        child1: m(child1),
        child2: m(child2),
      },
      Self::Superlative {
        mode,
        rank,
        count,
        head,
        relation,
      } => Self::Superlative {
        mode: *mode,
        rank: m(rank),
        count: m(count),
        head: m(head),
        relation: m(relation),
      },
      Self::Call { func, args } => {
        let func = m(func);
        Self::Call {
          func,
          args: args.iter().map(|a| a.map(&mut *f)).collect(),
        }
      }
    }
  }

  /// Immediate subformulas, in display order
  pub fn children(&self) -> Vec<&Formula> {
    match self {
      Self::Value(_) | Self::Variable(_) => Vec::new(),
      Self::Join { relation, child } => vec![&**relation, &**child],
      Self::Merge { child1, child2, .. } | Self::Arithmetic { child1, child2, .. } => {
        vec![&**child1, &**child2]
      }
      Self::Not(child) | Self::Reverse(child) | Self::Aggregate { child, .. } => vec![&**child],
      Self::Lambda { body, .. } | Self::Mark { body, .. } => vec![&**body],
      Self::Superlative {
        rank,
        count,
        head,
        relation,
        ..
      } => vec![&**rank, &**count, &**head, &**relation],
      Self::Call { func, args } => {
        let mut v: Vec<&Formula> = vec![&**func];
        v.extend(args.iter());
        v
      }
    }
  }

  /// Pre-order visit; returning `true` from `f` stops descent below that node
  pub fn for_each(&self, f: &mut impl FnMut(&Formula) -> bool) {
    if !f(self) {
      for c in self.children() {
        c.for_each(&mut *f);
      }
    }
  }

  /// Collects `f` over the tree. Children are only visited when `f` returned
  /// nothing for their parent, unless `always_recurse` is set.
  pub fn map_to_list<T>(
    &self,
    f: &mut impl FnMut(&Formula) -> Vec<T>,
    always_recurse: bool,
  ) -> Vec<T> {
    let mut res = f(self);
    if always_recurse || res.is_empty() {
      for c in self.children() {
        res.extend(c.map_to_list(&mut *f, always_recurse));
      }
    }
    res
  }

  /// Replaces free occurrences of `var` by `replacement`
  pub fn substitute_var(&self, var: &str, replacement: &Formula) -> Formula {
    self.map(&mut |f| match f {
      Self::Variable(name) if name == var => Some(replacement.clone()),
      // bound here, so nothing below refers to the outer variable
      Self::Lambda { var: bound, .. } if bound == var => Some(f.clone()),
      _ => None,
    })
  }

  /// Beta-reduces `self` (which must be a lambda) applied to `arg`
  pub fn lambda_apply(&self, arg: &Formula) -> Option<Formula> {
    match self {
      Self::Lambda { var, body } => Some(body.substitute_var(var, arg)),
      _ => None,
    }
  }

  /// Applies all the nested lambdas
  pub fn beta_reduce(&self) -> Formula {
    self.map(&mut |f| match f {
      Self::Join { relation, child } => {
        let relation = relation.beta_reduce();
        relation
          .lambda_apply(child)
          .map(|applied| applied.beta_reduce())
      }
      _ => None,
    })
  }

  /// Whether `var` occurs free. Lambdas bind; marks are transparent.
  pub fn contains_free_var(&self, var: &str) -> bool {
    match self {
      Self::Variable(name) => name == var,
      Self::Lambda { var: bound, body } => bound != var && body.contains_free_var(var),
      _ => self.children().iter().any(|c| c.contains_free_var(var)),
    }
  }

  pub fn free_vars(&self) -> BTreeSet<String> {
    fn collect(f: &Formula, bound: &mut Vec<String>, out: &mut BTreeSet<String>) {
      match f {
        Formula::Variable(name) => {
          if !bound.contains(name) {
            out.insert(name.clone());
          }
        }
        Formula::Lambda { var, body } => {
          bound.push(var.clone());
          collect(body, bound, out);
          bound.pop();
        }
        _ => {
          for c in f.children() {
            collect(c, bound, out);
          }
        }
      }
    }
    let mut out = BTreeSet::new();
    collect(self, &mut Vec::new(), &mut out);
    out
  }

  /// Swaps the argument order of a binary: `r` <=> `!r`, and
  /// `(lambda x (r1 (r2 (var x))))` <=> `(lambda x (!r2 (!r1 (var x))))`.
  /// Anything else is wrapped in `Reverse`.
  pub fn reverse_binary(&self) -> Formula {
    fn reverse_chain(source: &Formula, result: Formula) -> Option<Formula> {
      match source {
        Formula::Join { relation, child } => {
          reverse_chain(child, Formula::join(relation.reverse_binary(), result))
        }
        Formula::Variable(_) => Some(result),
        _ => None,
      }
    }

    match self {
      Self::Value(Value::Name { id, .. }) => Self::name(names::reverse_property(id)),
      Self::Lambda { var, body } if matches!(**body, Self::Join { .. } | Self::Variable(_)) => {
        match reverse_chain(body, Self::var(var.clone())) {
          Some(chain) => Self::lambda(var.clone(), chain),
          None => Self::reverse(self.clone()),
        }
      }
      _ => Self::reverse(self.clone()),
    }
  }

  pub fn to_sexp(&self) -> Sexp {
    let list = |head: &str, rest: Vec<Sexp>| {
      let mut children = vec![Sexp::leaf(head)];
      children.extend(rest);
      Sexp::list(children)
    };
    match self {
      Self::Value(v) => v.to_sexp(),
      Self::Variable(name) => list("var", vec![Sexp::leaf(name.clone())]),
      Self::Join { relation, child } => Sexp::list(vec![relation.to_sexp(), child.to_sexp()]),
      Self::Merge {
        mode,
        child1,
        child2,
      } => list(mode.as_str(), vec![child1.to_sexp(), child2.to_sexp()]),
      Self::Not(child) => list("not", vec![child.to_sexp()]),
      Self::Lambda { var, body } => list("lambda", vec![Sexp::leaf(var.clone()), body.to_sexp()]),
      Self::Mark { var, body } => list("mark", vec![Sexp::leaf(var.clone()), body.to_sexp()]),
      Self::Reverse(child) => list("reverse", vec![child.to_sexp()]),
      Self::Aggregate { mode, child } => list(mode.as_str(), vec![child.to_sexp()]),
      Self::Arithmetic {
        mode,
        child1,
        child2,
      } => list(mode.as_str(), vec![child1.to_sexp(), child2.to_sexp()]),
      Self::Superlative {
        mode,
        rank,
        count,
        head,
        relation,
      } => list(
        mode.as_str(),
        vec![
          rank.to_sexp(),
          count.to_sexp(),
          head.to_sexp(),
          relation.to_sexp(),
        ],
      ),
      Self::Call { func, args } => {
        let mut rest = vec![func.to_sexp()];
        rest.extend(args.iter().map(Formula::to_sexp));
        list("call", rest)
      }
    }
  }

  pub fn from_sexp(tree: &Sexp) -> Result<Formula, FormulaError> {
    let invalid = |why: &str| FormulaError::InvalidFormula(format!("{}: {}", why, tree));
    if tree.is_leaf() {
      return Ok(Self::Value(Value::from_sexp(tree)?));
    }
    let child = |i: usize| -> Result<Arc<Formula>, FormulaError> {
      let c = tree.child(i).ok_or_else(|| invalid("missing argument"))?;
      Ok(Arc::new(Formula::from_sexp(c)?))
    };
    let leaf = |i: usize| -> Result<String, FormulaError> {
      tree
        .child_leaf(i)
        .map(str::to_string)
        .ok_or_else(|| invalid("expected a name"))
    };
    let arity = |n: usize| -> Result<(), FormulaError> {
      if tree.len() == n + 1 {
        Ok(())
      } else {
        Err(invalid(&format!("expected {} argument(s)", n)))
      }
    };
    // superlative rank/count are usually bare integers
    let int_or_formula = |i: usize| -> Result<Arc<Formula>, FormulaError> {
      match tree.child_leaf(i).map(str::parse::<i64>) {
        Some(Ok(n)) => Ok(Arc::new(Self::Value(Value::number(n as f64)))),
        _ => child(i),
      }
    };

    if let Some(head) = tree.head() {
      match head {
        "boolean" | "number" | "string" | "date" | "name" => {
          return Ok(Self::Value(Value::from_sexp(tree)?));
        }
        "var" => {
          arity(1)?;
          return Ok(Self::Variable(leaf(1)?));
        }
        "lambda" => {
          arity(2)?;
          return Ok(Self::Lambda {
            var: leaf(1)?,
            body: child(2)?,
          });
        }
        "mark" => {
          arity(2)?;
          return Ok(Self::Mark {
            var: leaf(1)?,
            body: child(2)?,
          });
        }
        "not" => {
          arity(1)?;
          return Ok(Self::Not(child(1)?));
        }
        "reverse" => {
          arity(1)?;
          return Ok(Self::Reverse(child(1)?));
        }
        "call" => {
          if tree.len() < 2 {
            return Err(invalid("call needs a function"));
          }
          let args = tree.children()[2..]
            .iter()
            .map(Formula::from_sexp)
            .collect::<Result<Vec<_>, _>>()?;
          return Ok(Self::Call {
            func: child(1)?,
            args,
          });
        }
        _ => {}
      }
      if let Some(mode) = MergeMode::parse(head) {
        arity(2)?;
        return Ok(Self::Merge {
          mode,
          child1: child(1)?,
          child2: child(2)?,
        });
      }
      if let Some(mode) = AggregateMode::parse(head) {
        arity(1)?;
        return Ok(Self::Aggregate {
          mode,
          child: child(1)?,
        });
      }
      if let Some(mode) = ArithmeticMode::parse(head) {
        if tree.len() == 3 {
          return Ok(Self::Arithmetic {
            mode,
            child1: child(1)?,
            child2: child(2)?,
          });
        }
      }
      if let Some(mode) = SuperlativeMode::parse(head) {
        arity(4)?;
        return Ok(Self::Superlative {
          mode,
          rank: int_or_formula(1)?,
          count: int_or_formula(2)?,
          head: child(3)?,
          relation: child(4)?,
        });
      }
    }

    // default is a join: (fb:type.object.type fb:people.person)
    if tree.len() != 2 {
      return Err(invalid("invalid number of arguments for join (want 2)"));
    }
    Ok(Self::Join {
      relation: child(0)?,
      child: child(1)?,
    })
  }
}

impl fmt::Display for Formula {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.to_sexp())
  }
}

impl FromStr for Formula {
  type Err = FormulaError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::from_sexp(&s.parse::<Sexp>()?)
  }
}

impl From<Value> for Formula {
  fn from(v: Value) -> Self {
    Self::Value(v)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashSet;

  fn f(s: &str) -> Formula {
    s.parse().unwrap()
  }

  #[test]
  fn test_canonical_roundtrip() {
    for s in [
      "(fb:people.person.place_of_birth fb:en.honolulu)",
      "(and (fb:type.object.type fb:people.person) (!fb:a.b.c (var x)))",
      "(lambda x (call + (var x) (number 1)))",
      "(count (fb:type.object.type fb:people.person))",
      "(argmax (number 1) (number 1) (fb:type.object.type city) (reverse fb:a.b.c))",
      "(mark x (not (fb:a.b.c (var x))))",
      "(- (number 3) (number 1))",
      "(string \"1 2 3\")",
    ] {
      assert_eq!(f(s).to_string(), s);
    }
    assert_eq!(
      f("(argmax 1 1 city fb:a.b.c)").to_string(),
      "(argmax (number 1) (number 1) city fb:a.b.c)"
    );
  }

  #[test]
  fn test_structural_equality_and_hash() {
    let a = f("(lambda x (fb:a.b.c (var x)))");
    let b = Formula::lambda("x", Formula::join(Formula::name("fb:a.b.c"), Formula::var("x")));
    assert_eq!(a, b);
    let set: HashSet<Formula> = [a, b].into_iter().collect();
    assert_eq!(set.len(), 1);
  }

  #[test]
  fn test_malformed() {
    assert!("(a b c)".parse::<Formula>().is_err());
    assert!("(lambda x)".parse::<Formula>().is_err());
    assert!("(var)".parse::<Formula>().is_err());
  }

  #[test]
  fn test_beta_reduce() {
    let applied = f("((lambda y (lambda x (call + (var x) (var y)))) (number 2))");
    assert_eq!(
      applied.beta_reduce(),
      f("(lambda x (call + (var x) (number 2)))")
    );
    let full = f("(((lambda y (lambda x (call * (var x) (var y)))) (number 3)) (number 2))");
    assert_eq!(full.beta_reduce(), f("(call * (number 2) (number 3))"));
  }

  #[test]
  fn test_substitution_respects_binding() {
    let g = f("(and (var x) (lambda x (var x)))");
    assert_eq!(
      g.substitute_var("x", &Formula::name("fb:en.a")),
      f("(and fb:en.a (lambda x (var x)))")
    );
  }

  #[test]
  fn test_free_vars() {
    let g = f("(lambda x (and (var x) (mark y (var z))))");
    assert!(!g.contains_free_var("x"));
    assert!(g.contains_free_var("z"));
    assert_eq!(g.free_vars().into_iter().collect::<Vec<_>>(), vec!["z"]);
  }

  #[test]
  fn test_reverse_binary() {
    assert_eq!(f("fb:a.b.c").reverse_binary(), f("!fb:a.b.c"));
    assert_eq!(f("!fb:a.b.c").reverse_binary(), f("fb:a.b.c"));
    assert_eq!(
      f("(lambda x (fb:r.a.b (fb:r.c.d (var x))))").reverse_binary(),
      f("(lambda x (!fb:r.c.d (!fb:r.a.b (var x))))")
    );
    assert_eq!(
      f("(lambda x (count (var x)))").reverse_binary(),
      f("(reverse (lambda x (count (var x))))")
    );
  }

  #[test]
  fn test_traversals() {
    let g = f("(and (fb:a.b.c fb:en.x) (not fb:en.y))");
    let mut names = Vec::new();
    g.for_each(&mut |node| {
      if let Some(id) = node.name_id() {
        names.push(id.to_string());
      }
      matches!(node, Formula::Not(_))
    });
    assert_eq!(names, vec!["fb:a.b.c", "fb:en.x"]);

    let joins = g.map_to_list(
      &mut |node| match node {
        Formula::Join { .. } => vec![node.to_string()],
        _ => vec![],
      },
      false,
    );
    assert_eq!(joins, vec!["(fb:a.b.c fb:en.x)"]);
  }
}
