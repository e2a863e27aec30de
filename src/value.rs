use std::fmt;
use std::str::FromStr;

use ordered_float::OrderedFloat;

use crate::error::FormulaError;
use crate::sexp::Sexp;

/// Calendar date; missing parts are -1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DateValue {
  pub year: i32,
  pub month: i32,
  pub day: i32,
}

impl DateValue {
  /// Parses `2012-03-28`, `2012-03`, or `2012`
  pub fn parse_iso(s: &str) -> Option<Self> {
    let mut parts = s.split('-').map(|p| p.parse::<i32>().ok());
    let year = parts.next()??;
    let month = parts.next().unwrap_or(Some(-1))?;
    let day = parts.next().unwrap_or(Some(-1))?;
    if parts.next().is_some() {
      return None;
    }
    Some(Self { year, month, day })
  }
}

/// The denotation of a formula, or a literal embedded in one
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
  Boolean(bool),
  Number {
    value: OrderedFloat<f64>,
    unit: Option<String>,
  },
  String(String),
  /// An entity or relation id, e.g. `fb:en.barack_obama`
  Name {
    id: String,
    description: Option<String>,
  },
  Date(DateValue),
  List(Vec<Value>),
  Error(String),
}

impl Value {
  pub fn number(value: f64) -> Self {
    Self::Number {
      value: OrderedFloat(value),
      unit: None,
    }
  }

  pub fn number_with_unit(value: f64, unit: impl Into<String>) -> Self {
    Self::Number {
      value: OrderedFloat(value),
      unit: Some(unit.into()),
    }
  }

  pub fn string(s: impl Into<String>) -> Self {
    Self::String(s.into())
  }

  pub fn name(id: impl Into<String>) -> Self {
    Self::Name {
      id: id.into(),
      description: None,
    }
  }

  pub fn error(msg: impl Into<String>) -> Self {
    Self::Error(msg.into())
  }

  pub fn is_error(&self) -> bool {
    matches!(self, Self::Error(_))
  }

  pub fn as_number(&self) -> Option<f64> {
    match self {
      Self::Number { value, .. } => Some(value.0),
      _ => None,
    }
  }

  /// Bare text of a primitive value, as used when gluing values into strings
  pub fn plain_string(&self) -> String {
    match self {
      Self::String(s) => s.clone(),
      Self::Number { value, .. } => format!("{}", value.0),
      Self::Name { id, .. } => id.clone(),
      Self::Boolean(b) => b.to_string(),
      other => other.to_string(),
    }
  }

  pub fn to_sexp(&self) -> Sexp {
    let list = |head: &str, rest: Vec<Sexp>| {
      let mut children = vec![Sexp::leaf(head)];
      children.extend(rest);
      Sexp::list(children)
    };
    match self {
      Self::Boolean(b) => list("boolean", vec![Sexp::leaf(b.to_string())]),
      Self::Number { value, unit } => {
        let mut rest = vec![Sexp::leaf(format!("{}", value.0))];
        if let Some(unit) = unit {
          rest.push(Sexp::leaf(unit.clone()));
        }
        list("number", rest)
      }
      Self::String(s) => list("string", vec![Sexp::leaf(s.clone())]),
      Self::Name {
        id,
        description: None,
      } => Sexp::leaf(id.clone()),
      Self::Name {
        id,
        description: Some(d),
      } => list("name", vec![Sexp::leaf(id.clone()), Sexp::leaf(d.clone())]),
      Self::Date(d) => list(
        "date",
        vec![
          Sexp::leaf(d.year.to_string()),
          Sexp::leaf(d.month.to_string()),
          Sexp::leaf(d.day.to_string()),
        ],
      ),
      Self::List(values) => list("list", values.iter().map(Value::to_sexp).collect()),
      Self::Error(msg) => list("error", vec![Sexp::leaf(msg.clone())]),
    }
  }

  pub fn from_sexp(tree: &Sexp) -> Result<Value, FormulaError> {
    let invalid = || FormulaError::InvalidValue(tree.to_string());
    if let Some(id) = tree.as_leaf() {
      return Ok(Self::name(id));
    }
    let arg = |i: usize| tree.child_leaf(i).ok_or_else(invalid);
    match tree.head() {
      Some("boolean") => match arg(1)? {
        "true" => Ok(Self::Boolean(true)),
        "false" => Ok(Self::Boolean(false)),
        _ => Err(invalid()),
      },
      Some("number") => {
        let value = arg(1)?.parse::<f64>().map_err(|_| invalid())?;
        Ok(match tree.child_leaf(2) {
          Some(unit) => Self::number_with_unit(value, unit),
          None => Self::number(value),
        })
      }
      Some("string") => Ok(Self::string(arg(1)?)),
      Some("name") => Ok(Self::Name {
        id: arg(1)?.to_string(),
        description: tree.child_leaf(2).map(str::to_string),
      }),
      Some("date") if tree.len() == 2 => DateValue::parse_iso(arg(1)?)
        .map(Self::Date)
        .ok_or_else(invalid),
      Some("date") => {
        let part = |i: usize| -> Result<i32, FormulaError> {
          arg(i)?.parse::<i32>().map_err(|_| invalid())
        };
        Ok(Self::Date(DateValue {
          year: part(1)?,
          month: part(2)?,
          day: part(3)?,
        }))
      }
      Some("list") => Ok(Self::List(
        tree.children()[1..]
          .iter()
          .map(Value::from_sexp)
          .collect::<Result<_, _>>()?,
      )),
      Some("error") => Ok(Self::error(tree.child(1).map(|c| c.to_string()).unwrap_or_default())),
      _ => Err(invalid()),
    }
  }
}

impl fmt::Display for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.to_sexp())
  }
}

impl FromStr for Value {
  type Err = FormulaError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::from_sexp(&s.parse::<Sexp>()?)
  }
}

#[test]
fn test_value_display() {
  assert_eq!(Value::number(3.0).to_string(), "(number 3)");
  assert_eq!(Value::number(0.5).to_string(), "(number 0.5)");
  assert_eq!(Value::string("a,b").to_string(), "(string a,b)");
  assert_eq!(Value::string("1 2 3").to_string(), "(string \"1 2 3\")");
  assert_eq!(Value::name("fb:en.x").to_string(), "fb:en.x");
  assert_eq!(
    "(date 2012 -1 -1)".parse::<Value>().unwrap(),
    "(date 2012)".parse::<Value>().unwrap()
  );
}

#[test]
fn test_value_parse() {
  let v: Value = "(list (number 2 fb:en.meter) (boolean true) (string \"x y\"))"
    .parse()
    .unwrap();
  match &v {
    Value::List(items) => {
      assert_eq!(items.len(), 3);
      assert_eq!(items[0].as_number(), Some(2.0));
      assert_eq!(items[2].plain_string(), "x y");
    }
    other => panic!("expected a list, got {}", other),
  }
  assert!("(number abc)".parse::<Value>().is_err());
  assert!("(boolean maybe)".parse::<Value>().is_err());
}
