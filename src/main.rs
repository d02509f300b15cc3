use anyhow::Context;
use clap::Parser;
use colored::Colorize;
use std::io;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod cli;
mod config;
mod engine;
mod errors;
mod extract;
mod log;
mod prompt;
mod provider;
mod reconcile;
mod ux;
mod wire;

fn init_tracing(debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "prompt_forge=debug" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn apply_overrides(cfg: &mut config::Config, args: &cli::Args) {
    if let Some(m) = &args.model {
        cfg.model = m.clone();
    }
    if let Some(n) = args.max_rounds {
        cfg.max_rounds = n;
    }
    if let Some(p) = &args.results {
        cfg.results_path = p.clone();
    }
    if let Some(t) = args.timeout_secs {
        cfg.timeout_secs = t;
    }
    if args.strict_verdicts {
        cfg.strict_verdicts = true;
    }
    if args.model_placeholders {
        cfg.placeholder_detection = config::PlaceholderDetection::Model;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();
    init_tracing(args.debug);

    let mut cfg = config::Config::load(args.config.as_deref().map(Path::new))?;
    apply_overrides(&mut cfg, &args);

    // Fail before asking the user anything.
    let api_key = config::api_key_from_env()?;
    let prov = provider::make_provider(&cfg, api_key)?;

    let stdin = io::stdin();
    let goal = match (&args.goal, args.preset) {
        (Some(g), _) => ux::goal_from_text(g),
        (None, Some(n)) => ux::goal_from_preset(n).context("unknown preset")?,
        (None, None) => ux::ask_goal(&mut stdin.lock())?,
    };
    let count = match args.test_cases {
        Some(n) => n,
        None => ux::ask_test_case_count(&mut stdin.lock())?,
    };

    let console = ux::Console::new();
    let on_event = |e: engine::EngineEvent| console.handle(e);
    let mut eng = engine::Engine::new(prov.as_ref(), &cfg, &on_event);
    let outcome = eng.run(&goal, count).await;

    // The log is written whether or not the run succeeded.
    let results_path = PathBuf::from(&cfg.results_path);
    if let Err(e) = log::save_results(&results_path, eng.records()) {
        eprintln!("{} could not save results: {e:#}", "error:".red().bold());
    }

    match outcome {
        Ok(report) => {
            ux::print_report(&report, eng.test_results(), &results_path);
            Ok(())
        }
        Err(e) => {
            if !eng.records().is_empty() {
                eprintln!("Partial results saved to {}", results_path.display());
            }
            Err(e.into())
        }
    }
}
