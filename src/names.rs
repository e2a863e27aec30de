//! Canonical type and relation names shared by the type system and the
//! formula utilities.

pub const BOOLEAN: &str = "fb:type.boolean";
pub const INT: &str = "fb:type.int";
pub const FLOAT: &str = "fb:type.float";
pub const DATE: &str = "fb:type.datetime";
pub const TIME: &str = "fb:type.time";
pub const TEXT: &str = "fb:type.text";
pub const NUMBER: &str = "fb:type.number";
pub const ENTITY: &str = "fb:common.topic";
pub const ANY: &str = "fb:type.any";

pub const TYPE: &str = "fb:type.object.type";
pub const NAME: &str = "fb:type.object.name";

pub const STAR: &str = "*";
pub const COLON: &str = ":";

pub const COMPARATORS: [&str; 5] = ["!=", "<", ">", "<=", ">="];

/// Comparator with its arguments swapped
pub fn reverse_comparator(op: &str) -> Option<&'static str> {
  match op {
    "!=" => Some("!="),
    "<" => Some(">="),
    ">" => Some("<="),
    "<=" => Some(">"),
    ">=" => Some("<"),
    _ => None,
  }
}

pub fn is_comparator(s: &str) -> bool {
  COMPARATORS.contains(&s)
}

/// `fb:domain.type`: exactly one period (or the special `*`)
pub fn is_unary(s: &str) -> bool {
  s == STAR || s.matches('.').count() == 1
}

/// `fb:domain.type.property`: two or more periods, comparators and `:`
pub fn is_binary(s: &str) -> bool {
  is_comparator(s) || s == COLON || s.matches('.').count() >= 2
}

/// `!` prefixes a reversed property
pub fn is_reverse_property(s: &str) -> bool {
  s.starts_with('!') && s != "!="
}

pub fn reverse_property(s: &str) -> String {
  if let Some(op) = reverse_comparator(s) {
    op.to_string()
  } else if is_reverse_property(s) {
    s[1..].to_string()
  } else {
    format!("!{}", s)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_arity_by_periods() {
    assert!(is_unary("fb:people.person"));
    assert!(!is_binary("fb:people.person"));
    assert!(is_binary("fb:people.person.place_of_birth"));
    assert!(is_binary("<="));
    assert!(is_unary("*"));
    assert!(!is_unary("plus"));
  }

  #[test]
  fn test_reverse_property() {
    assert_eq!(reverse_property("fb:a.b.c"), "!fb:a.b.c");
    assert_eq!(reverse_property("!fb:a.b.c"), "fb:a.b.c");
    assert_eq!(reverse_property("<"), ">=");
    assert!(!is_reverse_property("!="));
  }
}
