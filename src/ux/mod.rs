use anyhow::{bail, Result};
use colored::{ColoredString, Colorize};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use crate::engine::{EngineEvent, MAX_TEST_CASES};
use crate::wire::{RunOutcome, RunReport, TestResult, Verdict};

pub const GOAL_PREFIX: &str = "The prompt should guide the LLM to: ";

const MAX_INPUT_ATTEMPTS: u32 = 3;

pub const PRESETS: [&str; 9] = [
    "Redact personally identifiable information (PII) from a given text with 'XXX' and return the redacted text.",
    "Solve the given reasoning question.",
    "Extract phone numbers from a given text and list them in a standard format.",
    "Extract and list all names from a given text.",
    "Compose a haiku on a given topic.",
    "Act as a helpful chatbot for home-office IT issues. Answer user questions using LLM general knowledge. Take a user question as input.",
    "Act as a virtual customer service agent for Anthropic with access to an FAQ document. Take a user question as input.",
    "Create a short rap about a given inanimate object.",
    "Organize information from a given student info text file into JSON with keys 'name', 'grade', 'gpa', 'major'.",
];

pub fn goal_from_text(text: &str) -> String {
    format!("{GOAL_PREFIX}{}", text.trim())
}

pub fn goal_from_preset(n: u8) -> Option<String> {
    let idx = usize::from(n).checked_sub(1)?;
    PRESETS.get(idx).map(|p| goal_from_text(p))
}

fn read_answer<R: BufRead>(input: &mut R, prompt: &str) -> Result<String> {
    print!("{prompt}");
    let _ = io::stdout().flush();
    let mut s = String::new();
    if input.read_line(&mut s)? == 0 {
        bail!("input closed");
    }
    Ok(s.trim().to_string())
}

/// Custom goal or a preset, chosen interactively.
pub fn ask_goal<R: BufRead>(input: &mut R) -> Result<String> {
    println!("\n{}", "*** Prompt Forge ***".bold());
    println!("Describe what the LLM should do, or pick a preset and the tool will draft,");
    println!("test, and refine a prompt for it.\n");
    println!("{}. Enter a custom goal", "0".bold());
    for (i, p) in PRESETS.iter().enumerate() {
        println!("{}. {}", (i + 1).to_string().bold(), p);
    }

    for _ in 0..MAX_INPUT_ATTEMPTS {
        let choice = read_answer(input, "\nEnter the number of your choice: ")?;
        if choice == "0" {
            let custom = read_answer(input, "This prompt should guide the LLM to: ")?;
            if custom.is_empty() {
                println!("{}", "A goal cannot be empty.".yellow());
                continue;
            }
            return Ok(goal_from_text(&custom));
        }
        if let Some(goal) = choice.parse::<u8>().ok().and_then(goal_from_preset) {
            println!("You have selected: {}", goal.trim_start_matches(GOAL_PREFIX).cyan());
            return Ok(goal);
        }
        println!("{}", format!("Invalid selection '{choice}'. Enter a number from 0 to 9.").yellow());
    }
    bail!("no valid goal after {MAX_INPUT_ATTEMPTS} attempts")
}

pub fn ask_test_case_count<R: BufRead>(input: &mut R) -> Result<u32> {
    for _ in 0..MAX_INPUT_ATTEMPTS {
        let answer = read_answer(
            input,
            &format!("\nHow many test cases should be generated (0-{MAX_TEST_CASES}, 0 skips evaluation)? "),
        )?;
        match answer.parse::<u32>() {
            Ok(n) if n <= MAX_TEST_CASES => return Ok(n),
            _ => println!("{}", format!("Please enter a whole number from 0 to {MAX_TEST_CASES}.").yellow()),
        }
    }
    bail!("no valid test case count after {MAX_INPUT_ATTEMPTS} attempts")
}

/// Renders engine progress: a spinner while a gateway call is pending and
/// colored lines for everything else.
pub struct Console {
    spinner: Mutex<Option<ProgressBar>>,
    interactive: bool,
}

impl Console {
    pub fn new() -> Self {
        let interactive = io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none();
        Self { spinner: Mutex::new(None), interactive }
    }

    fn start_spinner(&self, label: &str) {
        let Ok(mut slot) = self.spinner.lock() else { return };
        if let Some(pb) = slot.take() {
            pb.finish_and_clear();
        }
        if !self.interactive {
            println!("{}...", label.dimmed());
            return;
        }
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner} {msg} ({elapsed})") {
            pb.set_style(style);
        }
        pb.set_message(label.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        *slot = Some(pb);
    }

    fn stop_spinner(&self) {
        if let Ok(mut slot) = self.spinner.lock() {
            if let Some(pb) = slot.take() {
                pb.finish_and_clear();
            }
        }
    }

    pub fn handle(&self, event: EngineEvent) {
        if let EngineEvent::Working { label } = event {
            self.start_spinner(label);
            return;
        }
        self.stop_spinner();

        match event {
            EngineEvent::Working { .. } => {}
            EngineEvent::RoundStarted { round } => {
                println!("\n{}", format!("=== ROUND {round} ===").bold());
            }
            EngineEvent::PromptGenerated { prompt, revised, .. } => {
                let title = if revised { "Revised prompt:" } else { "Generated prompt:" };
                println!("{}\n{}\n", title.bold(), prompt);
            }
            EngineEvent::PlaceholdersDetected { names } => {
                if names.is_empty() {
                    println!("No placeholders found; evaluating the prompt as-is.");
                } else {
                    println!("Placeholders: {}", names.join(", ").cyan());
                }
            }
            EngineEvent::TestCasesReady { count, attempts } => {
                let note = if attempts > 1 { format!(" (after {attempts} attempts)") } else { String::new() };
                println!("{}", format!("{count} test case(s) ready{note}. Evaluating concurrently...").dimmed());
            }
            EngineEvent::TestCaseSkipped { id, reason } => {
                println!("{}  {}  {}", "[SKIPPED]".yellow().bold(), id, reason.dimmed());
            }
            EngineEvent::TestCaseEvaluated { id, inputs, response, verdict } => {
                println!("{}  {}", verdict_label(&verdict), id.bold());
                if let Some(inputs) = inputs {
                    for (k, v) in &inputs {
                        println!("  {}: {}", k.cyan(), indent(v, 4).trim_start());
                    }
                }
                println!("  {}\n{}", "response:".dimmed(), indent(&response, 4));
            }
            EngineEvent::RoundFinished { round, evaluated, failed, skipped } => {
                println!(
                    "Round {round}: {} evaluated, {} failed, {} skipped",
                    evaluated,
                    if failed > 0 { failed.to_string().red() } else { failed.to_string().green() },
                    skipped
                );
            }
        }
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

pub fn print_report(report: &RunReport, latest: &BTreeMap<String, TestResult>, results_path: &Path) {
    println!(
        "\n{}",
        "┏━━━━━━━━━━━━━━━━━━━━━━━━ Result ━━━━━━━━━━━━━━━━━━━━━━━━━┓".bold()
    );
    let status = match &report.outcome {
        RunOutcome::Passed => "all test cases passed".green().bold(),
        RunOutcome::Untested => "not evaluated".yellow().bold(),
        RunOutcome::GaveUp { rounds } => format!("no passing prompt after {rounds} round(s)").red().bold(),
    };
    println!("  {}: {}   {}: {}", "Status".bold(), status, "Rounds".bold(), report.rounds);
    if !report.placeholders.is_empty() {
        println!("  {}: {}", "Placeholders".bold(), report.placeholders.join(", "));
    }
    println!("  {}: {}", "Run".bold(), report.run_id);
    for (id, r) in latest {
        println!("    {:<14} {}", id, verdict_label(&r.verdict));
    }
    println!("{}", "┗━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━┛".bold());

    println!("\n{}\n{}\n", "Final prompt:".bold(), report.final_prompt);
    println!("Results saved to {}", results_path.display().to_string().cyan());
}

fn verdict_label(v: &Verdict) -> ColoredString {
    match v {
        Verdict::Pass => "[PASS]".green().bold(),
        Verdict::Fail => "[FAIL]".red().bold(),
        Verdict::Unrecognized => "[UNKNOWN]".magenta().bold(),
    }
}

fn indent(s: &str, n: usize) -> String {
    let pad = " ".repeat(n);
    s.lines()
        .map(|l| format!("{}{}", pad, l))
        .collect::<Vec<_>>()
        .join("\n")
}
