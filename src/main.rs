//! VeLa command line
//!
//! ```bash
//! # Run a script, printing its value
//! vela script.vela
//!
//! # Evaluate one expression
//! vela --expr "seq(1 10 3)"
//!
//! # Interactive prompt, showing each tree as it is built
//! vela --sexpr
//!
//! # Drop to the prompt if the script fails
//! vela --restart script.vela
//! ```

use std::{
    io::{self, BufRead, Write},
    path::PathBuf,
    rc::Rc,
};

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info};
use vela::{Ast, Interpreter, InterpreterConfig};

#[derive(Parser)]
#[command(name = "vela", version = env!("CARGO_PKG_VERSION"), about = "VeLa expression language interpreter")]
struct Cli {
    /// Script to run. Without one (and without --expr) a prompt reads stdin.
    file: Option<PathBuf>,

    /// Evaluate this program instead of a file
    #[arg(short, long, conflicts_with = "file")]
    expr: Option<String>,

    /// JSON interpreter configuration
    #[arg(short, long, env = "VELA_CONFIG")]
    config: Option<PathBuf>,

    /// Extra directories of .vl/.vela files to load at startup
    #[arg(short = 'I', long = "include")]
    include: Vec<PathBuf>,

    /// Decimal places when printing reals
    #[arg(long)]
    precision: Option<usize>,

    /// Skip loading the standard library
    #[arg(long)]
    no_stdlib: bool,

    /// Print the S-expression of every evaluated tree
    #[arg(long)]
    sexpr: bool,

    /// Print the Graphviz DOT of every evaluated tree
    #[arg(long)]
    dot: bool,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,

    /// After a failing script, continue at the prompt instead of exiting
    #[arg(short, long)]
    restart: bool,
}

fn setup_logging(verbose: u8, quiet: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if let Ok(filter) = EnvFilter::try_from_default_env() {
        filter
    } else if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    let formatter = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(io::stderr)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .with_level(true);

    tracing_subscriber::registry()
        .with(formatter)
        .with(filter)
        .init();
}

fn load_config(cli: &Cli) -> anyhow::Result<InterpreterConfig> {
    let config = match &cli.config {
        Some(path) => InterpreterConfig::from_json_file(path)?,
        None => InterpreterConfig::default(),
    };
    let mut config = config.with_env_overrides()?;

    config.source_directories.extend(cli.include.iter().cloned());
    if let Some(precision) = cli.precision {
        config.precision = precision;
    }
    if cli.no_stdlib {
        config.standard_library = false;
    }
    config.verbose = config.verbose || cli.verbose > 0;
    Ok(config)
}

fn show_tree(cli: &Cli, ast: &Rc<Ast>) {
    if cli.sexpr {
        println!("{}", ast.to_sexpr());
    }
    if cli.dot {
        println!("{}", ast.to_dot());
    }
}

fn run_source(cli: &Cli, interpreter: &mut Interpreter, source: &str) -> anyhow::Result<()> {
    let (result, ast) = interpreter.program_with_ast(source)?;
    show_tree(cli, &ast);
    if let Some(value) = result {
        println!("{}", value.to_string_with(interpreter.config().precision));
    }
    Ok(())
}

fn repl(cli: &Cli, interpreter: &mut Interpreter) -> anyhow::Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut lines = stdin.lock().lines();

    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;

        let Some(line) = lines.next() else { break };
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        if let Err(err) = run_source(cli, interpreter, &line) {
            eprintln!("Error: {:#}", err);
        }
    }

    let stats = interpreter.cache_stats();
    debug!(
        ast_hits = stats.ast_hits,
        ast_misses = stats.ast_misses,
        result_hits = stats.result_hits,
        "cache statistics"
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.quiet);

    let config = load_config(&cli)?;
    info!(precision = config.precision, directories = config.source_directories.len(), "starting interpreter");
    let mut interpreter = Interpreter::new(config)?;

    let outcome = match (&cli.expr, &cli.file) {
        (Some(source), _) => run_source(&cli, &mut interpreter, source),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))
            .and_then(|source| run_source(&cli, &mut interpreter, &source)),
        (None, None) => return repl(&cli, &mut interpreter),
    };

    match outcome {
        Err(err) if cli.restart => {
            eprintln!("Error: {:#}", err);
            repl(&cli, &mut interpreter)
        }
        outcome => outcome,
    }
}
