use std::time::Duration;

use clap::{Parser, ValueEnum};

use triform::function::Function;
use triform::solver::{Backend, SmtOptions};
use triform::types::Type;

#[derive(Debug, Copy, Clone, ValueEnum)]
enum Engine {
    Smt,
    Dd,
}

#[derive(Debug, Parser)]
#[command(author, version)]
struct Cli {
    /// Bit width of the integer.
    #[arg(value_name = "INT", default_value = "32")]
    width: u32,

    /// Use a signed integer.
    #[clap(long)]
    signed: bool,

    /// Decision procedure.
    #[clap(long, value_enum, default_value = "smt")]
    engine: Engine,

    /// SMT timeout in milliseconds.
    #[clap(long, value_name = "MS")]
    timeout: Option<u64>,

    /// Print the SMT-LIB text of every query.
    #[clap(long)]
    trace: bool,
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
        Engine::Dd => Backend::DecisionDiagram,
        Engine::Smt => {
            let mut options = SmtOptions::default();
            if let Some(ms) = args.timeout {
                options = options.with_timeout(Duration::from_millis(ms));
            }
            if args.trace {
                options = options.with_trace(|text| println!("{}", text));
            }
            Backend::Smt(options)
        }
    };

    let ty = Type::fixed(args.width, args.signed)?;
    let succ = Function::new(vec![ty.clone()], |arena, xs| {
        let one = arena.fixed(1, args.width, args.signed)?;
        arena.add(xs[0], one)
    })?;

    // x + 1 < x only when the addition wraps.
    let time = std::time::Instant::now();
    let witness = succ.find(|arena, output, xs| arena.lt(output, xs[0]), &backend)?;
    match witness {
        Some(inputs) => println!("{} + 1 wraps around at x = {}", ty, inputs[0]),
        None => println!("{} + 1 never wraps", ty),
    }

    let all: Vec<_> = succ
        .find_all(|arena, output, xs| arena.lt(output, xs[0]), &backend)?
        .collect::<Result<_, _>>()?;
    println!("{} overflowing input(s) in total", all.len());

    let largest = succ.maximize(
        |_, output, _| Ok(output),
        |arena, _, _| Ok(arena.tt()),
        &backend,
    )?;
    if let Some(inputs) = largest {
        println!("x + 1 is largest at x = {} ({})", inputs[0], succ.evaluate(&inputs)?);
    }

    println!("Done in {:.3} s", time.elapsed().as_secs_f64());

    Ok(())
}
