use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod disprove;
mod error;
mod ir;
mod mining;
mod parser;
mod search;
mod semantics;
mod validation;

use disprove::{DisproveConfig, disprove_nonconvex};
use ir::Expr;
use mining::{FilterConfig, GuardConfig, MiningConfig, Rule, check_rule, filter_rules, find_rules, read_rules, write_rule_files};
use parser::parse_file;
use search::parallel::config::DEFAULT_STACK_SIZE;
use search::{BoundDirection, CegisConfig, PoolConfig, SynthesisStatistics, Synthesizer, run_pool};
use semantics::{SolverConfig, Z3Solver};

// --- Command Line Arguments ---

#[derive(Parser)]
#[command(name = "term-superopt")]
#[command(about = "Superoptimizer and rewrite rule miner for integer/boolean terms")]
#[command(version)]
#[command(subcommand_required = true)]
#[command(arg_required_else_help = true)]
struct Args {
    /// SMT solver executable, looked up on PATH
    #[arg(long, global = true, default_value = "z3")]
    solver: String,
    /// Solver timeout per query in seconds
    #[arg(long, global = true, default_value = "10")]
    timeout_secs: u64,
    /// Number of worker threads (defaults to the CPU count)
    #[arg(long, short = 'j', global = true)]
    jobs: Option<usize>,
    /// Raise log verbosity (-v debug, -vv trace). RUST_LOG overrides it.
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Find the smallest equivalent of every term in a file
    Simplify {
        /// File with one term per line
        input: PathBuf,
        /// Largest program size tried, in instructions
        #[arg(long, default_value = "3")]
        max_size: usize,
    },
    /// Synthesize a bound of every term over its variables' .min/.max companions
    Bound {
        /// File with one term per line
        input: PathBuf,
        /// Synthesize lower bounds instead of upper bounds
        #[arg(long)]
        lower: bool,
        /// Largest program size tried, in instructions
        #[arg(long, default_value = "3")]
        max_size: usize,
    },
    /// Try to prove every boolean term in a file unsatisfiable without a solver
    Disprove {
        /// File with one boolean term per line
        input: PathBuf,
        /// Constraint systems kept after each beam expansion
        #[arg(long, default_value = "16")]
        beam_width: usize,
    },
    /// Verify the guard of every rule in a file, synthesizing one where it is missing or wrong
    Predicate {
        /// File of rewrite(lhs, rhs[, guard]) lines
        input: PathBuf,
    },
    /// Mine rewrite rules from a corpus of terms
    FindRules {
        /// Corpus file with one term per line
        corpus: PathBuf,
        /// Directory receiving one Simplify_<Op>.inc file per root operator
        output: PathBuf,
        /// Patterns known not to simplify; read at start and appended to
        #[arg(long)]
        blacklist: Option<PathBuf>,
        /// Largest left-hand side searched, in operations
        #[arg(long, default_value = "6")]
        max_lhs_ops: usize,
    },
    /// Check, canonicalize and prune a set of rewrite rules
    FilterRules {
        /// File of rewrite(lhs, rhs[, guard]) lines
        input: PathBuf,
        /// Directory receiving one Simplify_<Op>.inc file per root operator
        output: PathBuf,
        /// Skip verifying rules against the solver
        #[arg(long)]
        no_check: bool,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Everything the subcommands share
struct Session {
    solver: Z3Solver,
    pool: PoolConfig,
}

impl Session {
    fn new(args: &Args) -> Self {
        let solver = Z3Solver::new(SolverConfig::with_timeout_secs(args.timeout_secs).with_binary(args.solver.clone()));
        let pool = PoolConfig::default().with_workers_option(args.jobs);
        Self { solver, pool }
    }

    /// Warn once, up front, rather than once per failed query
    fn require_solver(&self) {
        if !self.solver.is_available() {
            warn!(solver = %self.solver.config().binary, "solver not found, every query will come back unknown");
        }
    }
}

fn read_terms(path: &Path) -> anyhow::Result<Vec<Expr>> {
    parse_file(path).with_context(|| format!("reading terms from {}", path.display()))
}

fn run_simplify(ctx: &Session, input: &Path, max_size: usize) -> anyhow::Result<()> {
    ctx.require_solver();
    let terms = read_terms(input)?;
    let cegis = CegisConfig::default();
    let outcome = run_pool(terms, &ctx.pool, |_, term| {
        Synthesizer::new(&ctx.solver, cegis.clone()).superoptimize(&term, max_size)
    })?;

    let mut found = 0;
    let mut totals = SynthesisStatistics::new();
    for result in &outcome.results {
        totals.merge(&result.statistics);
        match &result.program {
            Some(program) => {
                found += 1;
                println!("{}", Rule::new(result.target.clone(), program.clone()));
            }
            None => println!("# failed: {}", result.target),
        }
    }
    info!(terms = outcome.results.len(), found, elapsed = ?outcome.elapsed_time, "simplify finished");
    debug!("synthesis statistics:\n{}", totals.format_summary());
    Ok(())
}

fn run_bound(ctx: &Session, input: &Path, direction: BoundDirection, max_size: usize) -> anyhow::Result<()> {
    ctx.require_solver();
    let terms = read_terms(input)?;
    let outcome = run_pool(terms, &ctx.pool, |_, term| {
        Synthesizer::new(&ctx.solver, CegisConfig::default()).bound(&term, direction, max_size)
    })?;

    for result in &outcome.results {
        match (&result.program, result.size) {
            (Some(bound), Some(_)) => println!("{} bound of {}: {}", direction, result.target, bound),
            (Some(bound), None) => {
                warn!(target = %result.target, "no bound synthesized, using interval arithmetic");
                println!("{} bound of {} (interval): {}", direction, result.target, bound);
            }
            (None, _) => println!("# failed: {}", result.target),
        }
    }
    Ok(())
}

fn run_disprove(ctx: &Session, input: &Path, beam_width: usize) -> anyhow::Result<()> {
    let terms = read_terms(input)?;
    let config = DisproveConfig::default().with_beam_width(beam_width);
    let outcome = run_pool(terms, &ctx.pool, |_, goal| {
        let disproof = disprove_nonconvex(&goal, &config);
        (goal, disproof)
    })?;

    let mut disproved = 0;
    for (goal, disproof) in &outcome.results {
        if disproof.disproved {
            disproved += 1;
            println!("{}: disproved", goal);
        } else {
            println!("{}: not disproved", goal);
            if !disproof.implication.is_const() {
                println!("  implies {}", disproof.implication);
            }
        }
    }
    info!(goals = outcome.results.len(), disproved, "disprove finished");
    Ok(())
}

fn run_predicate(ctx: &Session, input: &Path) -> anyhow::Result<()> {
    ctx.require_solver();
    let rules = read_rules(input).with_context(|| format!("reading rules from {}", input.display()))?;
    let guard = GuardConfig::default();
    let outcome = run_pool(rules, &ctx.pool, |_, rule| check_rule(&rule, &ctx.solver, &guard))?;
    for rule in &outcome.results {
        println!("{}", rule);
    }
    Ok(())
}

fn write_rules(output: &Path, rules: &[Rule]) -> anyhow::Result<()> {
    let files = write_rule_files(output, rules).with_context(|| format!("writing rules to {}", output.display()))?;
    info!(rules = rules.len(), files = files.len(), dir = %output.display(), "wrote rule files");
    Ok(())
}

fn run_find_rules(
    ctx: &Session,
    corpus: &Path,
    output: &Path,
    blacklist: Option<PathBuf>,
    max_lhs_ops: usize,
) -> anyhow::Result<()> {
    ctx.require_solver();
    let terms = read_terms(corpus)?;
    let config = MiningConfig::default()
        .with_max_lhs_ops(max_lhs_ops)
        .with_blacklist(blacklist)
        .with_pool(ctx.pool.clone());
    let rules = find_rules(&terms, &ctx.solver, &config)?;
    for rule in &rules {
        println!("{}", rule);
    }
    write_rules(output, &rules)
}

fn run_filter_rules(ctx: &Session, input: &Path, output: &Path, no_check: bool) -> anyhow::Result<()> {
    if !no_check {
        ctx.require_solver();
    }
    let rules = read_rules(input).with_context(|| format!("reading rules from {}", input.display()))?;
    let config = FilterConfig::default().with_pool(ctx.pool.clone()).with_check(!no_check);
    let rules = filter_rules(rules, &ctx.solver, &config)?;
    for rule in &rules {
        println!("{}", rule);
    }
    write_rules(output, &rules)
}

fn run(args: Args) -> anyhow::Result<()> {
    let ctx = Session::new(&args);
    match args.command {
        Commands::Simplify { input, max_size } => run_simplify(&ctx, &input, max_size),
        Commands::Bound { input, lower, max_size } => {
            let direction = if lower {
                BoundDirection::Lower
            } else {
                BoundDirection::Upper
            };
            run_bound(&ctx, &input, direction, max_size)
        }
        Commands::Disprove { input, beam_width } => run_disprove(&ctx, &input, beam_width),
        Commands::Predicate { input } => run_predicate(&ctx, &input),
        Commands::FindRules {
            corpus,
            output,
            blacklist,
            max_lhs_ops,
        } => run_find_rules(&ctx, &corpus, &output, blacklist, max_lhs_ops),
        Commands::FilterRules { input, output, no_check } => run_filter_rules(&ctx, &input, &output, no_check),
    }
}

// --- Main Function ---
fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    // Term walks recurse deeply on long let chains
    std::thread::Builder::new()
        .name("main-worker".to_string())
        .stack_size(DEFAULT_STACK_SIZE)
        .spawn(move || run(args))?
        .join()
        .map_err(|_| anyhow!("worker thread panicked"))?
}
