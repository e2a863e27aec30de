/// Interpretation of grammar statements into rules
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use tracing::warn;

use crate::error::GrammarError;
use crate::grammar::Grammar;
use crate::rules::{Rule, INTERMEDIATE_PREFIX};
use crate::semfn::SemanticFn;
use crate::sexp::Sexp;

fn malformed(stmt: &Sexp, reason: impl Into<String>) -> GrammarError {
  GrammarError::Malformed {
    stmt: stmt.to_string(),
    reason: reason.into(),
  }
}

fn is_valid_var(var: &str) -> bool {
  var.starts_with('@')
}

fn check_var(stmt: &Sexp, var: &str) -> Result<(), GrammarError> {
  if !is_valid_var(var) {
    return Err(malformed(stmt, format!("variable {} doesn't start with '@'", var)));
  }
  Ok(())
}

fn check_cat_name(cat: &str) -> &str {
  if cat.starts_with(INTERMEDIATE_PREFIX) {
    warn!(
      "Category '{}' starts with '{}'; it may collide with categories made by binarization",
      cat, INTERMEDIATE_PREFIX
    );
  }
  cat
}

/// Evaluates a `when` condition: a tag, or `and`/`or`/`not` over conditions
fn interpret_boolean(tree: &Sexp, tags: &HashSet<String>) -> Result<bool, GrammarError> {
  if let Some(tag) = tree.as_leaf() {
    return Ok(tags.contains(tag));
  }
  let args = tree.children().get(1..).unwrap_or(&[]);
  match tree.head() {
    Some("not") => {
      if args.len() != 1 {
        return Err(malformed(tree, "`not` takes exactly one argument"));
      }
      Ok(!interpret_boolean(&args[0], tags)?)
    }
    Some("and") => {
      for arg in args {
        if !interpret_boolean(arg, tags)? {
          return Ok(false);
        }
      }
      Ok(true)
    }
    Some("or") => {
      for arg in args {
        if interpret_boolean(arg, tags)? {
          return Ok(true);
        }
      }
      Ok(false)
    }
    _ => Err(malformed(tree, "expected a tag or (and|or|not ...)")),
  }
}

impl Grammar {
  /// Interprets one top-level statement. `context` is the file it came from.
  pub(crate) fn interpret(
    &mut self,
    context: Option<&Path>,
    tree: &Sexp,
    tags: &HashSet<String>,
  ) -> Result<(), GrammarError> {
    if tree.is_leaf() {
      return Err(malformed(tree, "expected a list"));
    }
    match tree.head() {
      Some("rule") => self.interpret_rule(tree),
      Some("include") => {
        let context = context.ok_or_else(|| GrammarError::NoIncludeContext(tree.to_string()))?;
        for name in &tree.children()[1..] {
          let name = name.as_leaf().ok_or_else(|| malformed(tree, "include paths must be leaves"))?;
          self.read_one_path(&Self::resolve_include(context, name))?;
        }
        Ok(())
      }
      Some("when") => {
        let cond = tree.child(1).ok_or_else(|| malformed(tree, "(when condition statement...)"))?;
        if interpret_boolean(cond, tags)? {
          for stmt in &tree.children()[2..] {
            self.interpret(context, stmt, tags)?;
          }
        }
        Ok(())
      }
      Some("def") => self.interpret_macro_def(tree),
      Some("for") => self.interpret_for(context, tree, tags),
      _ => Err(GrammarError::InvalidCommand(tree.to_string())),
    }
  }

  /// Replaces every leaf naming a macro with its value
  pub(crate) fn apply_macros(&self, tree: &Sexp) -> Result<Sexp, GrammarError> {
    tree.map_leaves(&mut |leaf| match self.macros.get(leaf) {
      Some(value) => Ok(value.clone()),
      None if is_valid_var(leaf) => Err(GrammarError::UndefinedMacro {
        name: leaf.to_string(),
        stmt: tree.to_string(),
      }),
      None => Ok(Sexp::leaf(leaf)),
    })
  }

  /// `(def @name value)`
  fn interpret_macro_def(&mut self, tree: &Sexp) -> Result<(), GrammarError> {
    let var = match (tree.len(), tree.child_leaf(1)) {
      (3, Some(var)) => var,
      _ => return Err(malformed(tree, "expected (def @name value)")),
    };
    check_var(tree, var)?;
    let value = self.apply_macros(&tree.children()[2])?;
    self.macros.insert(var.to_string(), value);
    Ok(())
  }

  /// `(for @var (value...) statement...)`, restoring any outer binding of `@var`
  fn interpret_for(
    &mut self,
    context: Option<&Path>,
    tree: &Sexp,
    tags: &HashSet<String>,
  ) -> Result<(), GrammarError> {
    let var = match (tree.len() > 3, tree.child_leaf(1)) {
      (true, Some(var)) => var,
      _ => return Err(malformed(tree, "expected (for @var (value...) statement...)")),
    };
    check_var(tree, var)?;
    let values = self.apply_macros(&tree.children()[2])?;
    let old = self.macros.remove(var);
    let mut result = Ok(());
    'values: for value in values.children() {
      self.macros.insert(var.to_string(), value.clone());
      for stmt in &tree.children()[3..] {
        result = self.interpret(context, stmt, tags);
        if result.is_err() {
          break 'values;
        }
      }
    }
    match old {
      Some(old) => self.macros.insert(var.to_string(), old),
      None => self.macros.remove(var),
    };
    result
  }

  /// `(rule lhs (rhs...) semanticFn (key value)...)`, where a right-hand side
  /// symbol may be written `(symbol optional)`
  fn interpret_rule(&mut self, tree: &Sexp) -> Result<(), GrammarError> {
    if tree.len() < 4 {
      return Err(malformed(tree, "expected (rule lhs (rhs...) semanticFn (key value)...)"));
    }
    let source = tree.to_string();
    let tree = self.apply_macros(tree)?;

    let lhs = tree
      .child_leaf(1)
      .map(check_cat_name)
      .ok_or_else(|| malformed(&tree, "left-hand side must be a leaf"))?;

    let rhs_tree = &tree.children()[2];
    if rhs_tree.is_leaf() {
      return Err(malformed(&tree, format!("right-hand side must be a list, got {}", rhs_tree)));
    }
    let mut rhs = Vec::with_capacity(rhs_tree.len());
    let mut optionals = Vec::with_capacity(rhs_tree.len());
    for item in rhs_tree.children() {
      let (symbol, params) = match item {
        Sexp::Leaf(symbol) => (symbol.as_str(), &[][..]),
        Sexp::List(_) => (
          item
            .head()
            .ok_or_else(|| malformed(&tree, format!("invalid right-hand side symbol {}", item)))?,
          &item.children()[1..],
        ),
      };
      rhs.push(check_cat_name(symbol).to_string());
      optionals.push(params.iter().any(|p| p.as_leaf() == Some("optional")));
    }

    let sem = self.parse_semantic_fn(&tree.children()[3])?;

    let mut info = Vec::new();
    for item in &tree.children()[4..] {
      let pair = match (item.len(), item.child_leaf(0), item.child_leaf(1)) {
        (2, Some(key), Some(value)) => value.parse::<f64>().ok().map(|v| (key.to_string(), v)),
        _ => None,
      };
      info.push(pair.ok_or_else(|| malformed(&tree, format!("invalid key-value pair {}", item)))?);
    }

    let rule = Rule::new(lhs, rhs, sem).with_info(info).with_source(Some(source));
    self.add_rule_with_optionals(rule, &optionals)
  }

  /// Builds a semantic function, expanding two shorthands:
  /// `foo` is `(ConstantFn foo)`, and `(lambda x ...)` is
  /// `(JoinFn betaReduce forward (arg0 (lambda x ...)))`
  pub(crate) fn parse_semantic_fn(&self, tree: &Sexp) -> Result<Arc<dyn SemanticFn>, GrammarError> {
    let tree = match tree {
      Sexp::Leaf(_) => Sexp::list(vec![Sexp::leaf("ConstantFn"), tree.clone()]),
      Sexp::List(_) if tree.head() == Some("lambda") => Sexp::list(vec![
        Sexp::leaf("JoinFn"),
        Sexp::leaf("betaReduce"),
        Sexp::leaf("forward"),
        Sexp::list(vec![Sexp::leaf("arg0"), tree.clone()]),
      ]),
      Sexp::List(_) => tree.clone(),
    };
    self.registry.build(&tree)
  }

  /// Records the tags mentioned by `when` conditions, including nested ones
  pub(crate) fn collect_valid_tags(&mut self, tree: &Sexp) {
    match tree.head() {
      Some("when") => {
        if let Some(cond) = tree.child(1) {
          self.collect_valid_tags_boolean(cond);
        }
        for stmt in tree.children().get(2..).unwrap_or(&[]) {
          self.collect_valid_tags(stmt);
        }
      }
      Some("for") => {
        for stmt in tree.children().get(3..).unwrap_or(&[]) {
          self.collect_valid_tags(stmt);
        }
      }
      _ => {}
    }
  }

  fn collect_valid_tags_boolean(&mut self, tree: &Sexp) {
    if let Some(tag) = tree.as_leaf() {
      self.valid_tags.insert(tag.to_string());
      return;
    }
    if let Some("not" | "and" | "or") = tree.head() {
      for arg in &tree.children()[1..] {
        self.collect_valid_tags_boolean(arg);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::grammar::GrammarOptions;

  fn compile(options: GrammarOptions, src: &str) -> Result<Grammar, GrammarError> {
    let mut g = Grammar::new(options);
    g.add_statements(src, None)?;
    Ok(g)
  }

  fn rule_strings(g: &Grammar) -> Vec<String> {
    g.rules().iter().map(|r| r.to_string()).collect()
  }

  #[test]
  fn test_rule_with_info_and_sugar() {
    let g = compile(
      GrammarOptions::default(),
      "(rule $Entity (obama) fb:en.barack_obama (floating 1) (weight 0.5))",
    )
    .unwrap();
    let rule = &g.rules()[0];
    assert_eq!(rule.to_string(), "$Entity -> obama (ConstantFn fb:en.barack_obama)");
    assert_eq!(rule.info_value("weight"), Some(0.5));
    assert!(rule.is_floating(false));
    assert!(rule.source.as_deref().unwrap().starts_with("(rule $Entity"));
  }

  #[test]
  fn test_lambda_sugar() {
    let g = compile(
      GrammarOptions::default(),
      "(rule $Len (length of $PHRASE) (lambda x (call .length (var x))))",
    )
    .unwrap();
    let last = g.rules().last().unwrap();
    assert_eq!(last.lhs, "$Len");
    assert_eq!(
      last.sem_repr(),
      "(JoinFn betaReduce forward (arg0 (lambda x (call .length (var x)))))"
    );
    assert!(last.sem.has_bound_arg0());
  }

  #[test]
  fn test_when_tags() {
    let src = r#"
      (when (and arith (not nocount))
        (rule $A (a) (ConstantFn fb:en.a)))
      (when (or other nocount)
        (rule $B (b) (ConstantFn fb:en.b)))
    "#;
    let mut g = compile(GrammarOptions::with_tags(["arith"]), src).unwrap();
    assert_eq!(rule_strings(&g), vec!["$A -> a (ConstantFn fb:en.a)"]);
    for tree in Sexp::parse_all(src).unwrap() {
      g.collect_valid_tags(&tree);
    }
    assert_eq!(
      g.valid_tags().iter().cloned().collect::<Vec<_>>(),
      vec!["arith", "nocount", "other"]
    );

    let g = compile(GrammarOptions::with_tags(["nocount"]), src).unwrap();
    assert_eq!(rule_strings(&g), vec!["$B -> b (ConstantFn fb:en.b)"]);

    assert!(compile(
      GrammarOptions::default(),
      "(when (not a b) (rule $A (a) (IdentityFn)))"
    )
    .is_err());
    assert!(compile(
      GrammarOptions::default(),
      "(when (xor a b) (rule $A (a) (IdentityFn)))"
    )
    .is_err());
  }

  #[test]
  fn test_def_and_for() {
    let g = compile(
      GrammarOptions::default(),
      r#"
      (def @x fb:en.outer)
      (for @x (red green)
        (rule $Color (@x) (ConstantFn (string @x))))
      (rule $Outer (outer) (ConstantFn @x))
      "#,
    )
    .unwrap();
    assert_eq!(
      rule_strings(&g),
      vec![
        "$Color -> red (ConstantFn (string red))",
        "$Color -> green (ConstantFn (string green))",
        "$Outer -> outer (ConstantFn fb:en.outer)",
      ]
    );
    assert!(!g.macros.contains_key("@y"));
  }

  #[test]
  fn test_errors() {
    let cases = [
      ("(rule $A (@nope) (IdentityFn))", "undefined macro"),
      ("(frobnicate $A)", "invalid command"),
      ("(include other.grammar)", "no file context"),
      ("(rule $A (a))", "malformed"),
      ("(rule $A a (IdentityFn))", "malformed"),
      ("(rule $A (a) (IdentityFn) (weight heavy))", "malformed"),
      ("(def x 3)", "malformed"),
      ("(rule $A (a) (FrobnicateFn))", "unknown semantic function"),
    ];
    for (src, expected) in cases {
      let err = compile(GrammarOptions::default(), src).unwrap_err();
      let matched = match &err {
        GrammarError::UndefinedMacro { .. } => expected == "undefined macro",
        GrammarError::InvalidCommand(_) => expected == "invalid command",
        GrammarError::NoIncludeContext(_) => expected == "no file context",
        GrammarError::Malformed { .. } => expected == "malformed",
        GrammarError::UnknownSemanticFn(_) => expected == "unknown semantic function",
        _ => false,
      };
      assert!(matched, "{}: {}", src, err);
    }
  }

  #[test]
  fn test_for_restores_binding_on_error() {
    let mut g = Grammar::default();
    g.add_statements("(def @v fb:en.kept)", None).unwrap();
    assert!(g
      .add_statements("(for @v (a b) (rule $A (@v) (FrobnicateFn)))", None)
      .is_err());
    assert_eq!(g.macros["@v"], Sexp::leaf("fb:en.kept"));
  }
}
