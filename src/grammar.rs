use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use tracing::{info, warn};

use crate::binarize::{binarize_rule, FreshCats};
use crate::error::GrammarError;
use crate::rules::{is_cat, Rule, BUILTIN_CATS};
use crate::semfn::SemanticFnRegistry;
use crate::sexp::Sexp;

#[derive(Debug, Clone)]
pub struct GrammarOptions {
  /// Tags that `when` statements are evaluated against
  pub tags: HashSet<String>,
  pub binarize: bool,
  /// Whether rules without `floating`/`anchored` info count as floating
  pub default_is_floating: bool,
}

impl Default for GrammarOptions {
  fn default() -> Self {
    Self {
      tags: HashSet::new(),
      binarize: true,
      default_is_floating: false,
    }
  }
}

impl GrammarOptions {
  pub fn with_tags<I, S>(tags: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      tags: tags.into_iter().map(Into::into).collect(),
      ..Self::default()
    }
  }
}

/// A set of binarized rules, compiled from grammar statements:
///
/// ```text
/// (rule lhs (rhs...) semanticFn (key value)...)
/// (include path...)
/// (when (and tag (not tag)) statement...)
/// (def @name value)
/// (for @var (value...) statement...)
/// ```
///
/// Only compiled into; read-only once parsing starts.
#[derive(Debug)]
pub struct Grammar {
  pub options: GrammarOptions,
  pub(crate) rules: Vec<Arc<Rule>>,
  pub(crate) macros: HashMap<String, Sexp>,
  /// Every tag some `when` statement mentions
  pub(crate) valid_tags: BTreeSet<String>,
  /// Verbatim copy of the statements read
  pub(crate) statements: Vec<String>,
  pub(crate) fresh_cats: FreshCats,
  pub(crate) registry: SemanticFnRegistry,
}

impl Default for Grammar {
  fn default() -> Self {
    Self::new(GrammarOptions::default())
  }
}

impl fmt::Display for Grammar {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "# tags:")?;
    for tag in self.valid_tags.iter() {
      write!(f, " {}", tag)?;
    }
    writeln!(f)?;
    for rule in self.rules.iter() {
      writeln!(f, "{}", rule)?;
    }
    Ok(())
  }
}

impl Grammar {
  pub fn new(options: GrammarOptions) -> Self {
    Self::with_registry(options, SemanticFnRegistry::default())
  }

  /// A grammar whose rules may name the semantic functions in `registry`
  pub fn with_registry(options: GrammarOptions, registry: SemanticFnRegistry) -> Self {
    Self {
      options,
      rules: Vec::new(),
      macros: HashMap::new(),
      valid_tags: BTreeSet::new(),
      statements: Vec::new(),
      fresh_cats: FreshCats::default(),
      registry,
    }
  }

  pub fn rules(&self) -> &[Arc<Rule>] {
    &self.rules
  }

  pub fn statements(&self) -> &[String] {
    &self.statements
  }

  pub fn valid_tags(&self) -> &BTreeSet<String> {
    &self.valid_tags
  }

  /// Reads a grammar file; `include`s resolve relative to it
  pub fn read_file(&mut self, path: impl AsRef<Path>) -> Result<(), GrammarError> {
    self.read_one_path(path.as_ref())?;
    self.verify_valid();
    info!("{} rules", self.rules.len());
    Ok(())
  }

  pub(crate) fn read_one_path(&mut self, path: &Path) -> Result<(), GrammarError> {
    let src = fs::read_to_string(path).map_err(|source| GrammarError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    if !self.statements.is_empty() {
      self.statements.push(String::new());
    }
    self.statements.push(format!("####### {}", path.display()));
    self.statements.extend(src.lines().map(str::to_string));
    self.interpret_all(&src, Some(path))
  }

  /// Interprets statements given as text. `context` is the file `include`s
  /// resolve against; without one, `include` is an error.
  pub fn add_statements(&mut self, src: &str, context: Option<&Path>) -> Result<(), GrammarError> {
    self.statements.push(src.to_string());
    self.interpret_all(src, context)
  }

  fn interpret_all(&mut self, src: &str, context: Option<&Path>) -> Result<(), GrammarError> {
    let tags = self.options.tags.clone();
    for tree in Sexp::parse_all(src)? {
      self.interpret(context, &tree, &tags)?;
      self.collect_valid_tags(&tree);
    }
    Ok(())
  }

  /// Binarizes `rule` (no optional symbols) and adds the result
  pub fn add_rule(&mut self, rule: Rule) -> Result<(), GrammarError> {
    let optionals = vec![false; rule.rhs.len()];
    self.add_rule_with_optionals(rule, &optionals)
  }

  pub fn add_rule_with_optionals(&mut self, rule: Rule, optionals: &[bool]) -> Result<(), GrammarError> {
    let rules = binarize_rule(rule, optionals, self.options.binarize, &mut self.fresh_cats)?;
    self.rules.extend(rules.into_iter().map(Arc::new));
    Ok(())
  }

  /// Warns about categories used but never defined, and about tags in the
  /// options that no `when` mentions
  pub fn verify_valid(&self) {
    let defined = self.categories();
    for rule in self.rules.iter() {
      for item in rule.rhs.iter() {
        if is_cat(item) && !defined.contains(item.as_str()) {
          warn!("Category not defined in the grammar: {}; used in rule: {}", item, rule);
        }
      }
    }
    for tag in self.options.tags.iter() {
      if !self.valid_tags.contains(tag) {
        warn!("Tag {} not defined in grammar", tag);
      }
    }
  }

  /// Every left-hand side plus the built-in categories
  pub fn categories(&self) -> BTreeSet<&str> {
    let mut cats = BUILTIN_CATS.iter().copied().collect::<BTreeSet<_>>();
    cats.extend(self.rules.iter().map(|r| r.lhs.as_str()));
    cats
  }

  pub fn rules_by_lhs(&self) -> HashMap<&str, Vec<&Arc<Rule>>> {
    self.rules.iter().fold(HashMap::new(), |mut map, rule| {
      map.entry(rule.lhs.as_str()).or_insert_with(Vec::new).push(rule);
      map
    })
  }

  /// The file an `include` inside `context` refers to
  pub(crate) fn resolve_include(context: &Path, name: &str) -> PathBuf {
    match context.parent() {
      Some(dir) => dir.join(name),
      None => PathBuf::from(name),
    }
  }
}

impl FromStr for Grammar {
  type Err = GrammarError;

  /// Compiles grammar statements with the default options
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let mut grammar = Self::default();
    grammar.add_statements(s, None)?;
    grammar.verify_valid();
    Ok(grammar)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_rules_by_lhs_and_categories() {
    let g: Grammar = r#"
      (rule $Number ($TOKEN) (NumberFn))
      (rule $Number ($Number $Number) (ConcatFn " "))
      (rule $ROOT ($Number) (IdentityFn))
    "#
    .parse()
    .unwrap();
    assert_eq!(g.rules().len(), 3);
    let by_lhs = g.rules_by_lhs();
    assert_eq!(by_lhs["$Number"].len(), 2);
    assert_eq!(by_lhs["$ROOT"].len(), 1);
    let cats = g.categories();
    assert!(cats.contains("$ROOT"));
    assert!(cats.contains("$LEMMA_PHRASE"));
  }

  #[test]
  fn test_read_file_with_include() {
    let dir = std::env::temp_dir().join(format!("semparse-grammar-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("base.grammar"), "(rule $A (a) (ConstantFn fb:en.a))\n").unwrap();
    fs::write(
      dir.join("main.grammar"),
      "(include base.grammar)\n(rule $ROOT ($A) (IdentityFn))\n",
    )
    .unwrap();
    let mut g = Grammar::default();
    g.read_file(dir.join("main.grammar")).unwrap();
    assert_eq!(g.rules().len(), 2);
    assert_eq!(g.rules()[0].lhs, "$A");
    assert!(g.statements().iter().any(|s| s.starts_with("####### ") && s.ends_with("base.grammar")));
    fs::remove_dir_all(&dir).unwrap();
  }

  #[test]
  fn test_missing_file() {
    let mut g = Grammar::default();
    assert!(matches!(
      g.read_file("/nonexistent/semparse.grammar"),
      Err(GrammarError::Io { .. })
    ));
  }
}
