//! Executing formulas into values, and judging predicted values

use tracing::trace;

use crate::evaluation::Evaluation;
use crate::example::ContextValue;
use crate::formula::{ArithmeticMode, Formula};
use crate::value::Value;

/// What an executor returns for one formula
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
  pub value: Value,
  pub stats: Evaluation,
}

impl Response {
  pub fn new(value: Value) -> Self {
    Self {
      value,
      stats: Evaluation::new(),
    }
  }
}

pub trait Executor: Send + Sync {
  fn execute(&self, formula: &Formula, context: Option<&ContextValue>) -> Response;
}

/// Value formulas evaluate to their value; anything else to a name carrying
/// the formula text
#[derive(Debug, Clone, Copy, Default)]
pub struct FormulaMatchExecutor;

impl Executor for FormulaMatchExecutor {
  fn execute(&self, formula: &Formula, _context: Option<&ContextValue>) -> Response {
    let value = match formula.as_value() {
      Some(value) => value.clone(),
      None => Value::name(formula.to_string()),
    };
    Response::new(value)
  }
}

/// Beta-reduces, then evaluates arithmetic and a few string builtins
#[derive(Debug, Clone, Copy, Default)]
pub struct ArithmeticExecutor;

fn number_arg(v: &Value) -> Result<f64, String> {
  v.as_number().ok_or_else(|| format!("expected a number, got {}", v))
}

fn string_arg(v: &Value) -> Result<String, String> {
  match v {
    Value::String(s) => Ok(s.clone()),
    other => Err(format!("expected a string, got {}", other)),
  }
}

fn arithmetic(op: &str, a: f64, b: f64) -> Result<f64, String> {
  match op {
    "+" => Ok(a + b),
    "-" => Ok(a - b),
    "*" => Ok(a * b),
    "/" if b == 0.0 => Err("division by zero".to_string()),
    "/" => Ok(a / b),
    _ => Err(format!("unknown operator {}", op)),
  }
}

impl ArithmeticExecutor {
  fn eval(&self, formula: &Formula) -> Result<Value, String> {
    match formula {
      Formula::Value(v) => Ok(v.clone()),
      Formula::Arithmetic { mode, child1, child2 } => {
        let a = number_arg(&self.eval(child1)?)?;
        let b = number_arg(&self.eval(child2)?)?;
        let op = match mode {
          ArithmeticMode::Add => "+",
          ArithmeticMode::Sub => "-",
          ArithmeticMode::Mul => "*",
          ArithmeticMode::Div => "/",
        };
        Ok(Value::number(arithmetic(op, a, b)?))
      }
      Formula::Call { func, args } => {
        let func = func
          .name_id()
          .ok_or_else(|| format!("bad function {}", func))?;
        let args = args.iter().map(|a| self.eval(a)).collect::<Result<Vec<_>, _>>()?;
        match (func, args.as_slice()) {
          ("+" | "-" | "*" | "/", [a, b]) => Ok(Value::number(arithmetic(func, number_arg(a)?, number_arg(b)?)?)),
          (".concat", [a, b]) => Ok(Value::string(string_arg(a)? + &string_arg(b)?)),
          (".length", [a]) => Ok(Value::number(string_arg(a)?.chars().count() as f64)),
          (".toString", [a]) => Ok(Value::string(a.plain_string())),
          _ => Err(format!("can't call {} with {} argument(s)", func, args.len())),
        }
      }
      other => Err(format!("can't execute {}", other)),
    }
  }
}

impl Executor for ArithmeticExecutor {
  fn execute(&self, formula: &Formula, _context: Option<&ContextValue>) -> Response {
    let reduced = formula.beta_reduce();
    let value = self.eval(&reduced).unwrap_or_else(Value::error);
    trace!("executed {} => {}", reduced, value);
    Response::new(value)
  }
}

/// Scores a predicted value against the target, in `[0, 1]`
pub trait ValueEvaluator: Send + Sync {
  fn compatibility(&self, target: &Value, predicted: Option<&Value>) -> f64;
}

/// 1 for an identical value, 0 otherwise
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactValueEvaluator;

impl ValueEvaluator for ExactValueEvaluator {
  fn compatibility(&self, target: &Value, predicted: Option<&Value>) -> f64 {
    match predicted {
      Some(p) if p == target => 1.0,
      _ => 0.0,
    }
  }
}
