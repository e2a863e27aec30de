use tracing::warn;

use crate::derivation::{Derivation, DerivationStream};
use crate::error::GrammarError;
use crate::example::{Example, LanguageInfo};
use crate::formula::Formula;
use crate::semtype::SemType;
use crate::sexp::Sexp;
use crate::value::Value;

use super::{invalid_fn, CallInfo, SemContext, SemanticFn};

const REQUESTS: [&str; 4] = ["NUMBER", "ORDINAL", "PERCENT", "MONEY"];

#[derive(Debug, Clone, Default)]
pub struct NumberFnOptions {
  /// Drop the units of ordinals and money, and don't scale percents
  pub unitless: bool,
  /// Also accept a single token that parses as a number, whatever its NER tag
  pub also_test_by_conversion: bool,
  /// Inclusive bounds on NUMBER values
  pub allowed_range: Option<(f64, f64)>,
}

/// Reads a number off the NER annotation of the span:
/// `(NumberFn [NUMBER] [ORDINAL] [PERCENT] [MONEY])`, all four by default
#[derive(Debug, Clone)]
pub struct NumberFn {
  requests: Option<Vec<String>>,
}

impl NumberFn {
  pub fn new() -> Self {
    Self { requests: None }
  }

  pub fn from_sexp(tree: &Sexp) -> Result<Self, GrammarError> {
    if tree.head() != Some("NumberFn") {
      return Err(invalid_fn(tree, "expected (NumberFn request...)"));
    }
    if tree.len() == 1 {
      return Ok(Self::new());
    }
    let requests = tree.children()[1..]
      .iter()
      .map(|r| match r.as_leaf() {
        Some(r) if REQUESTS.contains(&r) => Ok(r.to_string()),
        _ => Err(invalid_fn(tree, format!("unknown request {}", r))),
      })
      .collect::<Result<Vec<_>, _>>()?;
    Ok(Self {
      requests: Some(requests),
    })
  }

  fn request(&self, req: &str) -> bool {
    match &self.requests {
      Some(requests) => requests.iter().any(|r| r == req),
      None => true,
    }
  }

  fn number_type(value: f64) -> SemType {
    if value == value.trunc() {
      SemType::int()
    } else {
      SemType::float()
    }
  }

  fn parse_ner(tag: &str, value: &str) -> Option<f64> {
    let parsed = value.parse::<f64>().ok();
    if parsed.is_none() {
      warn!("NumberFn: can't convert {} span {:?} to a number", tag, value);
    }
    parsed
  }

  /// The first requested NER reading of `[start, end)`
  fn check(&self, opts: &NumberFnOptions, info: &LanguageInfo, start: usize, end: usize) -> Option<(Value, SemType)> {
    if self.request("NUMBER") {
      if let Some(value) = info.normalized_ner_span("NUMBER", start, end) {
        if let Some(x) = Self::parse_ner("NUMBER", &value) {
          if let Some((lo, hi)) = opts.allowed_range {
            if x < lo || x > hi {
              warn!("NumberFn: {} is outside of the allowed range [{}, {}]", x, lo, hi);
              return None;
            }
          }
          return Some((Value::number(x), Self::number_type(x)));
        }
      }
    }
    if self.request("ORDINAL") {
      if let Some(x) = info
        .normalized_ner_span("ORDINAL", start, end)
        .and_then(|v| Self::parse_ner("ORDINAL", &v))
      {
        let value = if opts.unitless {
          Value::number(x)
        } else {
          Value::number_with_unit(x, "fb:en.ordinal_number")
        };
        return Some((value, SemType::int()));
      }
    }
    // percents and money carry a leading symbol, e.g. %50 and $3
    let symbol_stripped = |tag: &str| {
      info
        .normalized_ner_span(tag, start, end)
        .and_then(|v| Self::parse_ner(tag, v.get(1..).unwrap_or("")))
    };
    if self.request("PERCENT") {
      if let Some(x) = symbol_stripped("PERCENT") {
        let value = if opts.unitless { x } else { 0.01 * x };
        return Some((Value::number(value), SemType::float()));
      }
    }
    if self.request("MONEY") {
      if let Some(x) = symbol_stripped("MONEY") {
        let value = if opts.unitless {
          Value::number(x)
        } else {
          Value::number_with_unit(x, "fb:en.dollar")
        };
        return Some((value, SemType::float()));
      }
    }
    None
  }
}

impl Default for NumberFn {
  fn default() -> Self {
    Self::new()
  }
}

impl SemanticFn for NumberFn {
  fn call<'a>(&'a self, ctx: &'a SemContext, ex: &'a Example, ci: CallInfo) -> DerivationStream<'a> {
    let opts = &ctx.number;
    let found = self.check(opts, &ex.language_info, ci.start, ci.end).or_else(|| {
      if !(opts.also_test_by_conversion && self.request("NUMBER") && ci.end - ci.start == 1) {
        return None;
      }
      let x = ex.language_info.tokens.get(ci.start)?.parse::<f64>().ok()?;
      Some((Value::number(x), Self::number_type(x)))
    });
    match found {
      Some((value, sem_type)) => DerivationStream::single(Derivation::from_call(&ci, Formula::Value(value), sem_type)),
      None => DerivationStream::empty(),
    }
  }

  fn to_sexp(&self) -> Sexp {
    let mut tree = vec![Sexp::leaf("NumberFn")];
    if let Some(requests) = &self.requests {
      tree.extend(requests.iter().map(Sexp::leaf));
    }
    Sexp::list(tree)
  }
}
