use std::collections::HashMap;

use tracing::{debug, trace};

use crate::derivation::{Derivation, DerivationStream};
use crate::error::GrammarError;
use crate::example::Example;
use crate::formula::Formula;
use crate::semtype::{SemType, TypeHierarchy};
use crate::sexp::Sexp;
use crate::type_inference::{infer_type, TypeLookup};

use super::{invalid_fn, CallInfo, SemContext, SemanticFn};

#[derive(Debug, Clone, PartialEq)]
pub struct LexicalEntry {
  /// The phrase as written in the lexicon
  pub raw_phrase: String,
  pub formula: Formula,
  pub sem_type: SemType,
  pub features: Vec<(String, f64)>,
}

/// Maps lowercased phrases to their lexical entries
#[derive(Debug, Clone, Default)]
pub struct SimpleLexicon {
  entries: HashMap<String, Vec<LexicalEntry>>,
}

impl SimpleLexicon {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add(&mut self, entry: LexicalEntry) {
    self
      .entries
      .entry(entry.raw_phrase.to_lowercase())
      .or_default()
      .push(entry);
  }

  pub fn lookup(&self, phrase: &str) -> &[LexicalEntry] {
    self.entries.get(phrase).map(Vec::as_slice).unwrap_or(&[])
  }

  /// Number of distinct phrases
  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Reads entries written as `(entry "phrase" formula [type] [(features (name value)...)])`.
  /// Entries without a type get the inferred one.
  pub fn read_str(
    &mut self,
    src: &str,
    lookup: &dyn TypeLookup,
    hierarchy: &TypeHierarchy,
  ) -> Result<usize, GrammarError> {
    let forms = Sexp::parse_all(src)?;
    let n = forms.len();
    for form in forms {
      let malformed = |reason: &str| GrammarError::Malformed {
        stmt: form.to_string(),
        reason: reason.to_string(),
      };
      if form.head() != Some("entry") || form.len() < 3 {
        return Err(malformed("expected (entry phrase formula ...)"));
      }
      let raw_phrase = form.child_leaf(1).ok_or_else(|| malformed("phrase must be a string"))?;
      let as_formula_err = |e| GrammarError::Formula {
        stmt: form.to_string(),
        source: e,
      };
      let formula = Formula::from_sexp(&form.children()[2]).map_err(as_formula_err)?;
      let mut sem_type = None;
      let mut features = Vec::new();
      for extra in &form.children()[3..] {
        if extra.head() == Some("features") {
          for f in &extra.children()[1..] {
            let name = f.child_leaf(0).ok_or_else(|| malformed("feature name must be a leaf"))?;
            let value = f
              .child_leaf(1)
              .and_then(|v| v.parse::<f64>().ok())
              .ok_or_else(|| malformed("feature value must be a number"))?;
            features.push((name.to_string(), value));
          }
        } else {
          sem_type = Some(SemType::from_sexp(extra).map_err(as_formula_err)?);
        }
      }
      let sem_type = sem_type.unwrap_or_else(|| infer_type(&formula, lookup, hierarchy));
      self.add(LexicalEntry {
        raw_phrase: raw_phrase.to_string(),
        formula,
        sem_type,
        features,
      });
    }
    debug!("read {} lexicon entries, {} phrases total", n, self.len());
    Ok(n)
  }
}

/// Looks the phrase of its only child up in the session lexicon, yielding one
/// derivation per entry whose type meets the restriction:
/// `(SimpleLexiconFn [(type T)])`
#[derive(Debug, Clone)]
pub struct SimpleLexiconFn {
  restrict_type: SemType,
  tree: Sexp,
}

impl SimpleLexiconFn {
  pub fn from_sexp(tree: &Sexp) -> Result<Self, GrammarError> {
    if tree.head() != Some("SimpleLexiconFn") {
      return Err(invalid_fn(tree, "expected (SimpleLexiconFn [(type T)])"));
    }
    let mut restrict_type = SemType::Top;
    for arg in &tree.children()[1..] {
      match (arg.head(), arg.child(1)) {
        (Some("type"), Some(t)) if arg.len() == 2 => {
          restrict_type = SemType::from_sexp(t).map_err(|e| invalid_fn(tree, e.to_string()))?;
        }
        _ => return Err(invalid_fn(tree, format!("invalid argument {}", arg))),
      }
    }
    Ok(Self {
      restrict_type,
      tree: tree.clone(),
    })
  }
}

impl SemanticFn for SimpleLexiconFn {
  fn call<'a>(&'a self, ctx: &'a SemContext, _ex: &'a Example, ci: CallInfo) -> DerivationStream<'a> {
    let phrase = match ci.child_string_value(0) {
      Ok(phrase) => phrase,
      Err(e) => return DerivationStream::error(e),
    };
    let entries = ctx
      .lexicon
      .lookup(&phrase)
      .iter()
      .filter(|e| {
        let meet = self.restrict_type.meet(&e.sem_type, &ctx.hierarchy);
        trace!("SimpleLexiconFn: {} => {} [type = {} meet-> {}]", phrase, e.formula, e.sem_type, meet);
        meet.is_valid()
      })
      .collect::<Vec<_>>();
    let n = entries.len();
    let derivs = entries.into_iter().map(move |entry| {
      let mut deriv = Derivation::from_call(&ci, entry.formula.clone(), entry.sem_type.clone());
      for (name, value) in entry.features.iter() {
        deriv.local_features.add("basicStats", name, *value);
      }
      deriv.local_features.add("lexAlign", &format!("{} --- {}", phrase, entry.formula), 1.0);
      Ok(deriv)
    });
    DerivationStream::new(derivs, n)
  }

  fn to_sexp(&self) -> Sexp {
    self.tree.clone()
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;
  use crate::derivation::DerivationArena;
  use crate::rules::{Rule, PHRASE_CAT};
  use crate::semfn::ChildInfo;
  use crate::type_inference::NullTypeLookup;

  fn ctx() -> SemContext {
    let mut ctx = SemContext::default();
    ctx
      .lexicon
      .read_str(
        r#"
        (entry "Born" fb:people.person.place_of_birth (-> fb:location.location fb:people.person)
          (features (popularity 2)))
        (entry "born" (string born))
        (entry "obama" fb:en.barack_obama fb:people.person)
        "#,
        &NullTypeLookup,
        &TypeHierarchy::default(),
      )
      .unwrap();
    ctx
  }

  fn run(ctx: &SemContext, sem: &str, phrase: &str) -> Vec<Derivation> {
    let sem = Arc::new(SimpleLexiconFn::from_sexp(&sem.parse().unwrap()).unwrap());
    let mut arena = DerivationArena::new();
    let idx = arena.push(Derivation::terminal(PHRASE_CAT, 0, 1, phrase, phrase));
    let rule = Arc::new(Rule::new("$Y", vec![PHRASE_CAT.to_string()], sem.clone()));
    let ci = CallInfo::new(0, 1, rule, vec![ChildInfo::of(idx, &arena[idx])]);
    sem.call(ctx, &Example::new(phrase), ci).map(|d| d.unwrap()).collect()
  }

  #[test]
  fn test_lookup_is_lowercased() {
    let ctx = ctx();
    assert_eq!(ctx.lexicon.len(), 2);
    assert_eq!(ctx.lexicon.lookup("born").len(), 2);
    assert!(ctx.lexicon.lookup("Born").is_empty());
    assert_eq!(ctx.lexicon.lookup("born")[1].sem_type, SemType::text());
  }

  #[test]
  fn test_lexicon_fn_filters_by_type() {
    let ctx = ctx();
    let all = run(&ctx, "(SimpleLexiconFn)", "born");
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].local_features.get("basicStats :: popularity"), Some(2.0));
    assert_eq!(
      all[0]
        .local_features
        .get("lexAlign :: born --- fb:people.person.place_of_birth"),
      Some(1.0)
    );

    let text_only = run(&ctx, "(SimpleLexiconFn (type fb:type.text))", "born");
    assert_eq!(text_only.len(), 1);
    assert_eq!(text_only[0].formula, Formula::string("born"));
    assert!(run(&ctx, "(SimpleLexiconFn)", "nobody").is_empty());
  }
}
