//! Examples to parse and the linguistic annotation they carry

use tracing::debug;

use crate::formula::Formula;
use crate::value::{DateValue, Value};

/// A labeled dependency arc from a head token to `modifier`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyEdge {
  pub label: String,
  pub modifier: usize,
}

/// Tokens plus per-token annotations, all of the same length
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LanguageInfo {
  pub tokens: Vec<String>,
  pub lemma_tokens: Vec<String>,
  pub pos_tags: Vec<String>,
  pub ner_tags: Vec<String>,
  pub ner_values: Vec<Option<String>>,
  pub dependency_children: Vec<Vec<DependencyEdge>>,
}

fn slice(items: &[String], start: usize, end: usize) -> String {
  items[start..end].join(" ")
}

impl LanguageInfo {
  pub fn num_tokens(&self) -> usize {
    self.tokens.len()
  }

  /// Brings every annotation to the length of `tokens`: missing lemmas are
  /// the tokens themselves, missing tags `UNK`, extra entries are dropped.
  pub fn align_to_tokens(&mut self) {
    let n = self.tokens.len();
    if self.lemma_tokens.len() < n {
      let missing = self.tokens[self.lemma_tokens.len()..].to_vec();
      self.lemma_tokens.extend(missing);
    }
    self.lemma_tokens.truncate(n);
    self.pos_tags.resize(n, "UNK".to_string());
    self.ner_tags.resize(n, "UNK".to_string());
    self.ner_values.resize(n, None);
    self.dependency_children.resize(n, Vec::new());
  }

  pub fn phrase(&self, start: usize, end: usize) -> String {
    slice(&self.tokens, start, end)
  }

  pub fn lemma_phrase(&self, start: usize, end: usize) -> String {
    slice(&self.lemma_tokens, start, end)
  }

  pub fn pos_seq(&self, start: usize, end: usize) -> String {
    slice(&self.pos_tags, start, end)
  }

  pub fn ner_seq(&self, start: usize, end: usize) -> String {
    slice(&self.ner_tags, start, end)
  }

  /// The NER value of `[start, end)` if the span is tagged `tag` throughout
  /// and is maximal (its neighbours carry a different value). Leading
  /// comparison operators are dropped from the value.
  pub fn normalized_ner_span(&self, tag: &str, start: usize, end: usize) -> Option<String> {
    let value = self.ner_values.get(start)?.as_deref()?;
    if self.ner_tags.get(start).map(String::as_str) != Some(tag) {
      return None;
    }
    let same = |i: usize| self.ner_values.get(i).and_then(|v| v.as_deref()) == Some(value);
    if start > 0 && same(start - 1) {
      return None;
    }
    if end < self.ner_values.len() && same(end) {
      return None;
    }
    if !(start + 1..end).all(same) {
      return None;
    }
    let value = ["<=", ">=", "<", ">"]
      .iter()
      .find_map(|op| value.strip_prefix(op))
      .unwrap_or(value);
    Some(value.to_string())
  }
}

/// One earlier turn of a conversation
#[derive(Debug, Clone, PartialEq)]
pub struct Exchange {
  pub utterance: String,
  pub formula: Formula,
  pub value: Value,
}

/// Situational context handed to the executor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextValue {
  pub user: Option<String>,
  pub date: Option<DateValue>,
  pub exchanges: Vec<Exchange>,
}

/// Turns raw utterances into `LanguageInfo`
pub trait LanguageAnalyzer: Send + Sync {
  fn analyze(&self, utterance: &str) -> LanguageInfo;
}

/// An utterance with its analysis and, for training, its target
#[derive(Debug, Clone, Default)]
pub struct Example {
  pub id: Option<String>,
  pub utterance: String,
  pub context: Option<ContextValue>,
  pub target_formula: Option<Formula>,
  pub target_value: Option<Value>,
  pub language_info: LanguageInfo,
  /// Overrides the parser's beam size
  pub beam_size: Option<usize>,
}

impl Example {
  pub fn new(utterance: impl Into<String>) -> Self {
    Self {
      utterance: utterance.into(),
      ..Self::default()
    }
  }

  pub fn with_id(mut self, id: impl Into<String>) -> Self {
    self.id = Some(id.into());
    self
  }

  pub fn with_target_formula(mut self, formula: Formula) -> Self {
    self.target_formula = Some(formula);
    self
  }

  pub fn with_target_value(mut self, value: Value) -> Self {
    self.target_value = Some(value);
    self
  }

  /// Runs `analyzer` over the utterance
  pub fn analyze(mut self, analyzer: &dyn LanguageAnalyzer) -> Self {
    self.language_info = analyzer.analyze(&self.utterance);
    self.language_info.align_to_tokens();
    debug!(
      "analyzed {:?}: tokens={:?} pos={:?} ner={:?}",
      self.utterance, self.language_info.tokens, self.language_info.pos_tags, self.language_info.ner_tags
    );
    self
  }

  pub fn num_tokens(&self) -> usize {
    self.language_info.num_tokens()
  }

  pub fn token(&self, i: usize) -> &str {
    &self.language_info.tokens[i]
  }

  pub fn lemma_token(&self, i: usize) -> &str {
    &self.language_info.lemma_tokens[i]
  }

  pub fn tokens(&self) -> &[String] {
    &self.language_info.tokens
  }

  pub fn phrase(&self, start: usize, end: usize) -> String {
    self.language_info.phrase(start, end)
  }

  pub fn lemma_phrase(&self, start: usize, end: usize) -> String {
    self.language_info.lemma_phrase(start, end)
  }

  /// `[tokens]` of a span, for log messages
  pub fn span_string(&self, start: usize, end: usize) -> String {
    format!("{}:{}[{}]", start, end, self.phrase(start, end))
  }
}

const NUMBER_WORDS: [&str; 11] = [
  "zero", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten",
];

/// Crude whitespace tokenizer with a few heuristics for numbers and punctuation
#[derive(Debug, Clone)]
pub struct SimpleAnalyzer {
  pub lower_case_tokens: bool,
}

impl Default for SimpleAnalyzer {
  fn default() -> Self {
    Self {
      lower_case_tokens: true,
    }
  }
}

/// Replaces hyphens followed by a letter with spaces: `Spanish-speaking`
/// splits, `2012-03-28` doesn't
pub fn break_hyphens(utterance: &str) -> String {
  let chars = utterance.chars().collect::<Vec<_>>();
  chars
    .iter()
    .enumerate()
    .map(|(i, &c)| {
      if c == '-' && chars.get(i + 1).map(|n| n.is_alphabetic()).unwrap_or(false) {
        ' '
      } else {
        c
      }
    })
    .collect()
}

fn separate_punctuation(utterance: &str) -> String {
  let chars = utterance.chars().collect::<Vec<_>>();
  let mut buf = String::with_capacity(utterance.len() + 8);
  for (i, &c) in chars.iter().enumerate() {
    let boundary_before = i == 0 || chars[i - 1] == ' ';
    let boundary_after = i + 1 >= chars.len() || chars[i + 1] == ' ';
    // periods inside numbers like 3.5 stay put
    let separate = if c == '.' {
      boundary_before || boundary_after
    } else {
      ",?'\"[]".contains(c)
    };
    if separate {
      buf.push(' ');
    }
    match c {
      '"' => buf.push_str(if boundary_before { "``" } else { "''" }),
      '\'' => buf.push_str(if boundary_before { "`" } else { "'" }),
      c => buf.push(c),
    }
    if separate {
      buf.push(' ');
    }
  }
  buf
}

impl LanguageAnalyzer for SimpleAnalyzer {
  fn analyze(&self, utterance: &str) -> LanguageInfo {
    let mut info = LanguageInfo::default();
    let utterance = separate_punctuation(&break_hyphens(utterance));
    let case = |s: &str| if self.lower_case_tokens { s.to_lowercase() } else { s.to_string() };

    for token in utterance.split_whitespace() {
      info.tokens.push(case(token));
      let lemma = match token.strip_suffix('s') {
        Some(stem) if !stem.is_empty() => stem,
        _ => token,
      };
      info.lemma_tokens.push(case(lemma));
      info.dependency_children.push(Vec::new());

      if let Some(x) = NUMBER_WORDS.iter().position(|w| *w == token) {
        info.pos_tags.push("CD".to_string());
        info.ner_tags.push("NUMBER".to_string());
        info.ner_values.push(Some(x.to_string()));
        continue;
      }
      if token.parse::<f64>().is_ok() {
        info.pos_tags.push("CD".to_string());
        info.ner_tags.push("NUMBER".to_string());
        info.ner_values.push(Some(token.to_string()));
        continue;
      }
      // capitalized nouns are probably proper
      let pos = if token.chars().next().map(char::is_uppercase).unwrap_or(false) {
        "NNP"
      } else if matches!(token, "'" | "\"" | "''" | "``") {
        "''"
      } else {
        "UNK"
      };
      info.pos_tags.push(pos.to_string());
      info.ner_tags.push("UNK".to_string());
      info.ner_values.push(Some("UNK".to_string()));
    }
    info
  }
}
