use clap::{Parser, ValueEnum};

use triform::expr::{ExprArena, ExprId};
use triform::function::{Function, Options};
use triform::regex::Regex;
use triform::solver::Backend;
use triform::types::Type;
use triform::value::Value;

#[derive(Debug, Copy, Clone, ValueEnum)]
enum Engine {
    Smt,
    Dd,
}

#[derive(Debug, Parser)]
#[command(author, version)]
struct Cli {
    /// Longest symbolic string.
    #[arg(value_name = "INT", default_value = "4")]
    max_length: usize,

    /// Decision procedure.
    #[clap(long, value_enum, default_value = "dd")]
    engine: Engine,

    /// Case-split nesting compiled before falling back to the interpreter.
    #[clap(long, value_name = "INT", default_value = "3")]
    unroll: usize,
}

/// A toy classifier: 0 for empty input, 1 for identifiers, 2 for numbers,
/// 3 for anything else.
fn classify(arena: &ExprArena, s: ExprId) -> triform::error::Result<ExprId> {
    let letter = Regex::range(Value::Char('a' as u32), Value::Char('z' as u32));
    let digit = Regex::range(Value::Char('0' as u32), Value::Char('9' as u32));
    let identifier = Regex::concat(letter.clone(), Regex::star(Regex::union(letter, digit.clone())));
    let number = Regex::plus(digit);

    let is_identifier = arena.seq_matches(s, identifier)?;
    let is_number = arena.seq_matches(s, number)?;
    let (zero, one, two, three) = (arena.u8(0), arena.u8(1), arena.u8(2), arena.u8(3));
    let non_empty = arena.if_then_else(
        is_identifier,
        one,
        arena.if_then_else(is_number, two, three)?,
    )?;
    arena.seq_case(s, zero, move |_, _, _| Ok(non_empty))
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    simplelog::TermLogger::init(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )?;

    let args = Cli::parse();
    println!("args = {:?}", args);

    let backend = match args.engine {
        Engine::Smt => Backend::default(),
        Engine::Dd => Backend::DecisionDiagram,
    };

    let f = Function::new(vec![Type::string()], |arena, xs| classify(arena, xs[0]))?.with_options(Options {
        max_list_length: args.max_length,
        ..Options::default()
    });
    let compiled = f.compile(args.unroll)?;

    // Printable ASCII only.
    let generated = f.generate_inputs(
        |arena, xs| {
            let printable = Regex::star(Regex::range(Value::Char(' ' as u32), Value::Char('~' as u32)));
            arena.seq_matches(xs[0], printable)
        },
        &backend,
    )?;
    for (i, input) in generated.enumerate() {
        let input = input?;
        let text: String = input[0]
            .as_seq()
            .unwrap_or_default()
            .iter()
            .filter_map(|c| match c {
                Value::Char(c) => char::from_u32(*c),
                _ => None,
            })
            .collect();
        let class = compiled.call(&input)?;
        assert_eq!(class, f.evaluate(&input)?);
        println!("path {}: {:?} -> {}", i, text, class);
    }

    Ok(())
}
