#[macro_use]
extern crate lazy_static;

pub mod binarize;
pub mod chart;
pub mod derivation;
pub mod error;
pub mod evaluation;
pub mod example;
pub mod executor;
pub mod formula;
pub mod grammar;
pub mod names;
pub mod params;
pub mod parse_grammar;
pub mod parser;
pub mod rules;
pub mod semfn;
pub mod semtype;
pub mod sexp;
pub mod type_inference;
pub mod utils;
pub mod value;

pub use crate::derivation::{DerivIdx, Derivation, DerivationArena, DerivationStream};
pub use crate::error::{FormulaError, GrammarError, ParseError, SemanticError};
pub use crate::example::{Example, SimpleAnalyzer};
pub use crate::formula::Formula;
pub use crate::grammar::{Grammar, GrammarOptions};
pub use crate::params::Params;
pub use crate::parser::{ParseResult, Parser, ParserKind, ParserOptions};
pub use crate::semtype::SemType;
pub use crate::utils::Err;
pub use crate::value::Value;

#[cfg(test)]
const CITIES: &str = r#"
  (def @from fb:travel.flight.from)
  (rule $City (boston) (ConstantFn fb:en.boston fb:location.citytown))
  (rule $City (new york) (ConstantFn fb:en.new_york fb:location.citytown))
  (rule $Rel (from) (ConstantFn @from (-> fb:location.citytown fb:travel.flight)))
  (rule $Flights (flights ($Rel optional) $City) (lambda c (@from (var c))))
  (rule $ROOT ((show optional) (me optional) $Flights) (IdentityFn))
"#;

#[test]
fn test_optional_words_and_lambda_rules() {
  let parser = Parser::new(CITIES.parse().unwrap(), ParserOptions::default()).unwrap();
  let params = Params::new();
  let target: Formula = "(fb:travel.flight.from fb:en.new_york)".parse().unwrap();
  for utterance in ["show me flights from new york", "flights new york", "me flights from new york"] {
    let ex = Example::new(utterance).analyze(&SimpleAnalyzer::default());
    let result = parser.parse(&params, &ex, false).unwrap();
    assert_eq!(result.len(), 1, "{}", utterance);
    assert_eq!(result.best().map(|d| &d.formula), Some(&target), "{}", utterance);
  }
  let ex = Example::new("flights from").analyze(&SimpleAnalyzer::default());
  assert!(parser.parse(&params, &ex, false).unwrap().is_empty());
}

#[test]
fn test_same_results_from_both_parsers() {
  let beam = Parser::new(CITIES.parse().unwrap(), ParserOptions::default()).unwrap();
  let agenda = Parser::new(
    CITIES.parse().unwrap(),
    ParserOptions {
      kind: ParserKind::Agenda(Default::default()),
      coarse_prune: true,
      ..ParserOptions::default()
    },
  )
  .unwrap();
  let params = Params::new();
  let ex = Example::new("show flights from boston").analyze(&SimpleAnalyzer::default());
  let formulas = |p: &Parser| {
    let result = p.parse(&params, &ex, false).unwrap();
    result.predictions().map(|d| d.formula.to_string()).collect::<Vec<_>>()
  };
  assert_eq!(formulas(&beam), formulas(&agenda));
  assert_eq!(formulas(&beam), vec!["(fb:travel.flight.from fb:en.boston)"]);
}

#[test]
fn test_lisp_tree_of_a_parse() {
  let parser = Parser::new(CITIES.parse().unwrap(), ParserOptions::default()).unwrap();
  let ex = Example::new("flights from boston")
    .analyze(&SimpleAnalyzer::default())
    .with_target_formula("(fb:travel.flight.from fb:en.boston)".parse().unwrap());
  let result = parser.parse(&Params::new(), &ex, false).unwrap();
  let best = result.best().unwrap();
  assert_eq!(best.compatibility(), 1.0);
  let tree = best.to_lisp_tree(&result.arena, false).to_string();
  assert!(tree.starts_with("(derivation (formula (fb:travel.flight.from fb:en.boston))"), "{}", tree);
  assert!(tree.contains("(compatibility 1)"), "{}", tree);
}
