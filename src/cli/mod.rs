use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "prompt_forge",
    version,
    about = "Drafts an LLM prompt for a goal, tests it against generated cases, and refines it until every case passes"
)]
pub struct Args {
    /// Goal for the prompt; asked interactively when omitted.
    #[arg(long, conflicts_with = "preset")]
    pub goal: Option<String>,

    /// Use one of the built-in goals (1-9).
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=9))]
    pub preset: Option<u8>,

    /// Number of test cases to generate (0-10); asked interactively when omitted.
    #[arg(long, value_parser = clap::value_parser!(u32).range(0..=10))]
    pub test_cases: Option<u32>,

    /// TOML file overriding the built-in configuration.
    #[arg(long)]
    pub config: Option<String>,

    #[arg(long)]
    pub model: Option<String>,

    /// Give up after this many rounds (0 = never).
    #[arg(long)]
    pub max_rounds: Option<u32>,

    #[arg(long)]
    pub results: Option<String>,

    /// Count unrecognized verdicts as failures.
    #[arg(long, default_value_t = false)]
    pub strict_verdicts: bool,

    /// Ask the model to identify placeholders instead of scanning locally.
    #[arg(long, default_value_t = false)]
    pub model_placeholders: bool,

    #[arg(long)]
    pub timeout_secs: Option<u64>,

    #[arg(long, default_value_t = false)]
    pub debug: bool,
}
