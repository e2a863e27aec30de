use std::io;
use std::io::{BufRead, Write};
use std::path::PathBuf;

use clap::Parser as ClapParser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use semparse::parser::AgendaOptions;
use semparse::{Err, Example, Grammar, GrammarOptions, Params, Parser, ParserKind, ParserOptions, SimpleAnalyzer};

/// Reads utterances from stdin and prints their derivations
#[derive(Debug, ClapParser)]
#[command(name = "semparse", version)]
struct Args {
  /// Grammar files, read in order
  #[arg(required = true)]
  grammars: Vec<PathBuf>,

  /// Tags for `when` statements in the grammar
  #[arg(short, long = "tag")]
  tags: Vec<String>,

  /// Derivations kept per chart cell
  #[arg(short, long, default_value_t = 500)]
  beam: usize,

  /// Use the agenda parser instead of the bottom-up beam parser
  #[arg(short, long)]
  agenda: bool,

  /// Run a coarse recognition pass first and only build what it allows
  #[arg(long)]
  coarse: bool,

  /// Print the parse chart
  #[arg(short, long)]
  chart: bool,
}

fn parse(parser: &Parser, params: &Params, utterance: &str, print_chart: bool) -> Result<(), Err> {
  let ex = Example::new(utterance).analyze(&SimpleAnalyzer::default());
  let result = parser.parse(params, &ex, false)?;

  if print_chart {
    println!("chart:\n{}\n", result.chart.display(&result.arena));
  }

  println!(
    "Parsed {} derivation{}",
    result.len(),
    if result.len() == 1 { "" } else { "s" }
  );

  for deriv in result.predictions() {
    let value = deriv.value().map(ToString::to_string).unwrap_or_default();
    println!("{:.3}\t{}\t{}", deriv.score, deriv.formula(), value);
  }
  println!();

  Ok(())
}

fn main() -> Result<(), Err> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_writer(io::stderr)
    .init();

  let args = Args::parse();

  let mut grammar = Grammar::new(GrammarOptions::with_tags(args.tags.iter().cloned()));
  for path in args.grammars.iter() {
    grammar.read_file(path)?;
  }
  info!("read {} rules from {} files", grammar.rules().len(), args.grammars.len());

  let kind = if args.agenda {
    ParserKind::Agenda(AgendaOptions::default())
  } else {
    ParserKind::Beam
  };
  let parser = Parser::new(
    grammar,
    ParserOptions {
      kind,
      beam_size: args.beam,
      coarse_prune: args.coarse,
      ..ParserOptions::default()
    },
  )?;
  let params = Params::new();

  let failed = repl(&parser, &params, &mut io::stdin().lock(), args.chart)?;
  info!("{} utterance(s) failed to parse", failed);
  Ok(())
}

/// Parses one utterance per line until end of input, returning how many
/// utterances failed. A failed parse is reported and the loop continues.
fn repl(parser: &Parser, params: &Params, input: &mut impl BufRead, print_chart: bool) -> Result<usize, Err> {
  let mut failed = 0;
  let mut line = String::new();
  loop {
    print!("> ");
    io::stdout().flush()?;

    line.clear();
    if input.read_line(&mut line)? == 0 {
      // ctrl+d
      println!();
      return Ok(failed);
    }
    line.make_ascii_lowercase();
    if let Err(e) = parse(parser, params, line.trim(), print_chart) {
      eprintln!("error: {}", e);
      failed += 1;
    }
  }
}

#[cfg(test)]
mod tests {
  use std::io::Cursor;

  use super::*;

  #[test]
  fn test_repl_continues_after_a_failed_parse() {
    let grammar: Grammar = r#"
      (rule $ROOT ($TOKEN $TOKEN) (SelectFn 5))
      (rule $ROOT ($TOKEN) (IdentityFn))
    "#
    .parse()
    .unwrap();
    let parser = Parser::new(grammar, ParserOptions::default()).unwrap();
    let mut input = Cursor::new("a b\nC\na b\n");
    assert_eq!(repl(&parser, &Params::new(), &mut input, false).unwrap(), 2);
    assert_eq!(repl(&parser, &Params::new(), &mut Cursor::new(""), true).unwrap(), 0);
  }
}
