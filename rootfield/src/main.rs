use clap::{Parser, Subcommand};
use colored::*;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, Level};
use tracing_subscriber::FmtSubscriber;

use rootfield::solver::pool::run_worker;
use rootfield::{
    DomainConfig, Engine, InputVariable, NativeLibrary, ParameterSpec, RenderRequest, RenderResponse, RootSolver,
    SparseTerm, WorkerPool,
};

// =============================================================================
// CLI
// =============================================================================
#[derive(Parser, Debug)]
#[command(name = "rootfield")]
#[command(version)]
#[command(about = "Root density fields of parametric complex polynomials")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// High-precision solver library
    #[arg(long, global = true, env = "ROOTFIELD_NATIVE_LIB", value_name = "FILE")]
    native_lib: Option<PathBuf>,

    /// More log output on stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render one JSON request and write the JSON response
    Render {
        #[arg(value_name = "REQUEST")]
        request: PathBuf,

        /// Response file (stdout if omitted)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Render the built-in showcase families
    Demo {
        #[arg(long, default_value = "5000")]
        n_pairs: usize,

        #[arg(long, default_value = "256")]
        resolution: usize,
    },
    /// Solve one chunk read from stdin (used by parallel mode)
    #[command(hide = true)]
    Worker,
}

fn init_tracing(verbose: u8) -> Result<(), String> {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    // stdout carries worker answers and responses
    let subscriber = FmtSubscriber::builder().with_max_level(level).with_writer(io::stderr).finish();
    tracing::subscriber::set_global_default(subscriber).map_err(|e| format!("Failed to set tracing subscriber: {}", e))
}

fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(message) = init_tracing(args.verbose) {
        eprintln!("{}", message.red());
        return ExitCode::FAILURE;
    }

    let outcome = match args.command {
        Command::Worker => run_worker(io::stdin().lock(), io::stdout().lock()).map_err(|e| e.to_string()),
        Command::Render { request, output } => {
            engine(args.native_lib).and_then(|engine| render_file(&engine, &request, output.as_deref()))
        }
        Command::Demo { n_pairs, resolution } => engine(args.native_lib).map(|engine| run_demo(&engine, n_pairs, resolution)),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            error!(%message, "rootfield failed");
            eprintln!("{}", message.red());
            ExitCode::FAILURE
        }
    }
}

fn engine(native_lib: Option<PathBuf>) -> Result<Engine, String> {
    let native = Arc::new(native_lib.map(NativeLibrary::new).unwrap_or_default());
    let pool = WorkerPool::current_exe().map_err(|e| format!("cannot locate worker executable: {}", e))?;
    Ok(Engine::new(RootSolver::new(native, pool)))
}

// =============================================================================
// RENDER
// =============================================================================
fn render_file(engine: &Engine, path: &Path, output: Option<&Path>) -> Result<(), String> {
    let body = fs::read_to_string(path).map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    let request: RenderRequest =
        serde_json::from_str(&body).map_err(|e| format!("invalid request {}: {}", path.display(), e))?;

    let response = engine.respond(&request);
    for line in summary(&path.display().to_string(), &response) {
        eprintln!("{}", line);
    }

    let json = serde_json::to_string(&response).map_err(|e| e.to_string())?;
    match output {
        Some(file) => fs::write(file, json).map_err(|e| format!("cannot write {}: {}", file.display(), e)),
        None => {
            let mut stdout = io::stdout().lock();
            writeln!(stdout, "{}", json).map_err(|e| e.to_string())
        }
    }
}

fn summary(label: &str, response: &RenderResponse) -> Vec<String> {
    let mut lines = vec![format!("{}{}", "Family: ".cyan().bold(), label.cyan())];
    match response {
        RenderResponse::Success(output) => {
            let t = &output.timing;
            lines.push(format!("{}{}", "Roots:  ".green(), output.total_roots.to_string().green().bold()));
            lines.push(format!(
                "{}[{:.4}, {:.4}] x [{:.4}, {:.4}]",
                "Bounds: ".green(),
                output.bounds.x_min,
                output.bounds.x_max,
                output.bounds.y_min,
                output.bounds.y_max
            ));
            let stages = format!(
                "compile {:.3}s | vector {:.3}s | roots {:.3}s | post {:.3}s | grid {:.3}s | total {:.3}s",
                t.compile, t.vector, t.roots, t.post, t.grid, t.total
            );
            lines.push(stages.dimmed().to_string());
        }
        RenderResponse::Failure { error } => lines.push(format!("{}{}", "Error:  ".red().bold(), error.red())),
    }
    lines.push("-".repeat(40));
    lines
}

// =============================================================================
// DEMO
// =============================================================================
fn showcase(n_pairs: usize, resolution: usize) -> Vec<(&'static str, RenderRequest)> {
    let base = RenderRequest { n_pairs, grid_resolution: resolution, ..RenderRequest::default() };
    let terms = |list: &[(i64, &str)]| list.iter().map(|&(k, c)| SparseTerm::new(k, c)).collect::<Vec<_>>();
    let freeform = |d: &str| ParameterSpec::Freeform { definition: d.to_string() };

    let mut littlewood = RenderRequest {
        degree: 7,
        terms: terms(&[(7, "1"), (5, "a"), (3, "b"), (1, "a*b"), (0, "1")]),
        ..base.clone()
    };
    littlewood.params.insert("a".into(), freeform("t1"));
    littlewood.params.insert("b".into(), freeform("t2^2"));

    let mut chebyshev = RenderRequest {
        degree: 6,
        terms: terms(&[(6, "1"), (3, "c"), (0, "I*c - 1")]),
        ..base.clone()
    };
    chebyshev.params.insert("c".into(), ParameterSpec::Chebyshev { input_variable: InputVariable::T1, n: 5 });

    let mut geometric = RenderRequest {
        degree: 8,
        terms: terms(&[(8, "1"), (4, "g"), (1, "h"), (0, "-1")]),
        t2_domain: DomainConfig { domain_type: "uniform_disk".into(), max_radius: Some(1.5), ..DomainConfig::unit_circle() },
        ..base.clone()
    };
    geometric.params.insert(
        "g".into(),
        ParameterSpec::AlternatingGeometric { input_variable: InputVariable::T1, amplitude: "0.5*I".into(), k: 6 },
    );
    geometric.params.insert("h".into(), freeform("t1*conj(t2)"));

    let mut annulus = RenderRequest {
        degree: 5,
        terms: terms(&[(5, "1"), (2, "p"), (0, "p - t")]),
        t1_domain: DomainConfig {
            domain_type: "annulus".into(),
            min_radius: Some(0.5),
            max_radius: Some(1.0),
            ..DomainConfig::unit_circle()
        },
        t2_domain: DomainConfig {
            domain_type: "line".into(),
            start: Some([-1.0, -1.0]),
            end: Some([1.0, 1.0]),
            ..DomainConfig::unit_circle()
        },
        ..base
    };
    annulus.params.insert("p".into(), freeform("exp(I*pi*t1)"));
    annulus.params.insert("t".into(), freeform("t2"));

    vec![
        ("littlewood-like", littlewood),
        ("chebyshev", chebyshev),
        ("alternating geometric", geometric),
        ("annulus x line", annulus),
    ]
}

fn run_demo(engine: &Engine, n_pairs: usize, resolution: usize) {
    println!("{}", "=== ROOTFIELD SHOWCASE ===\n".magenta().bold());
    let families = showcase(n_pairs, resolution);
    let start = Instant::now();
    for (name, request) in &families {
        for line in summary(name, &engine.respond(request)) {
            println!("{}", line);
        }
    }
    let elapsed = start.elapsed();

    println!("\n{}", "=== PERFORMANCE SUMMARY ===".magenta().bold());
    println!("Families ({}):        {:?}", families.len(), elapsed);
    println!("Average per family:  {:?}", elapsed / families.len().max(1) as u32);
}
