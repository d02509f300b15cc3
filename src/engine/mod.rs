//! The generate -> test -> evaluate -> refine loop.
//!
//! Rounds run strictly one after another; within a round every test case is
//! executed and evaluated concurrently, and results are folded back into the
//! engine's state only after all of them have resolved.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{Config, PlaceholderDetection};
use crate::errors::EngineError;
use crate::extract::{self, EVALUATION_RESULT_TAG, EVALUATION_SCRATCHPAD_TAG};
use crate::prompt;
use crate::provider::Provider;
use crate::reconcile::{reconcile, Reconciliation};
use crate::wire::{
    Inputs, ResultRecord, RunOutcome, RunReport, TestCase, TestCases, TestResult, Verdict,
};

pub const MAX_TEST_CASES: u32 = 10;

/// Key of the single result recorded for a prompt without placeholders.
pub const NO_INPUT_CASE: &str = "evaluation";

/// Progress notifications for whoever drives the console.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    RoundStarted { round: u32 },
    /// A gateway call the user will be waiting on.
    Working { label: &'static str },
    PromptGenerated { round: u32, prompt: String, revised: bool },
    PlaceholdersDetected { names: Vec<String> },
    TestCasesReady { count: usize, attempts: u32 },
    TestCaseSkipped { id: String, reason: String },
    TestCaseEvaluated { id: String, inputs: Option<Inputs>, response: String, verdict: Verdict },
    RoundFinished { round: u32, evaluated: usize, failed: usize, skipped: usize },
}

enum CaseOutcome {
    Skipped { id: String, reason: String },
    Evaluated {
        id: String,
        inputs: Option<Inputs>,
        loaded: String,
        response: String,
        evaluation: String,
        verdict: Verdict,
    },
}

#[derive(Default)]
struct Tally {
    evaluated: usize,
    failed: usize,
    skipped: usize,
}

pub struct Engine<'a> {
    provider: &'a dyn Provider,
    cfg: &'a Config,
    on_event: &'a (dyn Fn(EngineEvent) + Send + Sync),
    results: BTreeMap<String, TestResult>,
    records: Vec<ResultRecord>,
}

impl<'a> Engine<'a> {
    pub fn new(
        provider: &'a dyn Provider,
        cfg: &'a Config,
        on_event: &'a (dyn Fn(EngineEvent) + Send + Sync),
    ) -> Self {
        Self { provider, cfg, on_event, results: BTreeMap::new(), records: Vec::new() }
    }

    /// Everything executed so far, in execution order, for the results log.
    pub fn records(&self) -> &[ResultRecord] {
        &self.records
    }

    /// Latest outcome per test case.
    pub fn test_results(&self) -> &BTreeMap<String, TestResult> {
        &self.results
    }

    /// Runs rounds until every test case passes, the round cap is hit, or a
    /// fatal error occurs. `test_case_count` of zero returns the first
    /// generated prompt without evaluating it.
    pub async fn run(&mut self, goal: &str, test_case_count: u32) -> Result<RunReport, EngineError> {
        let run_id = Uuid::new_v4();
        let count = test_case_count.min(MAX_TEST_CASES);
        self.run_rounds(run_id, goal, count)
            .instrument(info_span!("run", %run_id))
            .await
    }

    async fn run_rounds(&mut self, run_id: Uuid, goal: &str, count: u32) -> Result<RunReport, EngineError> {
        let mut test_cases: Option<TestCases> = None;
        let mut last_prompt: Option<String> = None;
        let mut last_placeholders: Vec<String> = Vec::new();
        let mut round = 0u32;

        loop {
            round += 1;
            if self.cfg.max_rounds > 0 && round > self.cfg.max_rounds {
                let rounds = round - 1;
                warn!(rounds, "giving up without a passing prompt");
                return Ok(RunReport {
                    run_id,
                    outcome: RunOutcome::GaveUp { rounds },
                    placeholders: last_placeholders,
                    final_prompt: last_prompt.unwrap_or_default(),
                    rounds,
                });
            }
            self.emit(EngineEvent::RoundStarted { round });
            info!(round, "round started");

            let template = self.generate_prompt(round, goal, last_prompt.as_deref()).await?;

            let placeholders = self.detect_placeholders(&template).await;
            self.emit(EngineEvent::PlaceholdersDetected { names: placeholders.clone() });

            if count == 0 {
                info!("no test cases requested, skipping evaluation");
                return Ok(RunReport {
                    run_id,
                    outcome: RunOutcome::Untested,
                    placeholders,
                    final_prompt: template,
                    rounds: round,
                });
            }

            let outcomes = if placeholders.is_empty() {
                vec![self.execute_and_evaluate(NO_INPUT_CASE.to_string(), None, template.clone()).await]
            } else {
                if test_cases.is_none() {
                    test_cases = Some(self.setup_test_cases(&template, &placeholders, count).await?);
                }
                let cases = test_cases.as_deref().unwrap_or_default();
                info!(count = cases.len(), "evaluating test cases concurrently");
                stream::iter(cases.iter().map(|case| self.run_case(&template, case)))
                    .buffered(self.cfg.max_concurrency.max(1))
                    .collect::<Vec<_>>()
                    .await
            };

            let tally = self.absorb(round, &template, outcomes);
            self.emit(EngineEvent::RoundFinished {
                round,
                evaluated: tally.evaluated,
                failed: tally.failed,
                skipped: tally.skipped,
            });

            let passed = if tally.evaluated == 0 {
                warn!(round, "nothing could be scored this round");
                false
            } else {
                tally.failed == 0
            };

            if passed {
                info!(round, "all test cases passed");
                return Ok(RunReport {
                    run_id,
                    outcome: RunOutcome::Passed,
                    final_prompt: template,
                    rounds: round,
                    placeholders,
                });
            }
            info!(round, failed = tally.failed, "iterating prompt");
            last_prompt = Some(template);
            last_placeholders = placeholders;
        }
    }

    fn emit(&self, event: EngineEvent) {
        (self.on_event)(event);
    }

    async fn generate_prompt(
        &self,
        round: u32,
        goal: &str,
        previous: Option<&str>,
    ) -> Result<String, EngineError> {
        let (meta, revised) = match previous {
            Some(prev) if !self.results.is_empty() => {
                (prompt::prompt_generation_feedback(goal, prev, &self.results), true)
            }
            _ => (prompt::prompt_generation_cold(goal), false),
        };

        self.emit(EngineEvent::Working {
            label: if revised { "Iterating prompt due to failed test case(s)" } else { "Generating an initial prompt" },
        });
        let raw = self
            .provider
            .send(&meta, self.cfg.temperatures.prompt_generation)
            .await
            .map_err(|e| EngineError::PromptGeneration(e.to_string()))?;
        let template = extract::extract_generated_prompt(&raw)?;

        debug!(round, chars = template.len(), "generated prompt");
        self.emit(EngineEvent::PromptGenerated { round, prompt: template.clone(), revised });
        Ok(template)
    }

    async fn detect_placeholders(&self, template: &str) -> Vec<String> {
        if self.cfg.placeholder_detection == PlaceholderDetection::Scan {
            return extract::detect_placeholders(template);
        }

        self.emit(EngineEvent::Working { label: "Identifying placeholders" });
        let listed = match self
            .provider
            .send(&prompt::placeholder_identification(template), self.cfg.temperatures.placeholder_identification)
            .await
        {
            Ok(raw) => extract::extract_placeholder_list(&raw).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match listed {
            Ok(names) => names,
            Err(e) => {
                warn!("placeholder identification failed ({e}), scanning template instead");
                extract::detect_placeholders(template)
            }
        }
    }

    async fn setup_test_cases(
        &self,
        template: &str,
        placeholders: &[String],
        count: u32,
    ) -> Result<TestCases, EngineError> {
        let meta = prompt::test_case_generation(template, placeholders, count);
        let attempts = self.cfg.max_test_case_attempts.max(1);

        for attempt in 1..=attempts {
            self.emit(EngineEvent::Working { label: "Generating test cases" });
            let raw = self
                .provider
                .send(&meta, self.cfg.temperatures.test_case_generation)
                .await
                .map_err(|e| EngineError::TestCaseGeneration(e.to_string()))?;
            let mut cases = extract::extract_test_cases(&raw)?;

            match reconcile(placeholders, &mut cases) {
                Reconciliation::Accepted | Reconciliation::Corrected { .. } => {
                    info!(count = cases.len(), attempt, "test cases set up");
                    self.emit(EngineEvent::TestCasesReady { count: cases.len(), attempts: attempt });
                    return Ok(cases);
                }
                Reconciliation::Retry { reason } => {
                    debug!(attempt, %reason, "test case batch rejected");
                }
            }
        }
        Err(EngineError::TestCaseAttemptsExhausted { attempts })
    }

    async fn run_case(&self, template: &str, case: &TestCase) -> CaseOutcome {
        let id = case.id();
        let Some(inputs) = case.usable_inputs() else {
            warn!(%id, "skipping test case because it contains invalid input");
            return CaseOutcome::Skipped { id, reason: "invalid input".into() };
        };
        let loaded = extract::fill_placeholders(template, inputs);
        self.execute_and_evaluate(id, Some(inputs.clone()), loaded).await
    }

    async fn execute_and_evaluate(&self, id: String, inputs: Option<Inputs>, loaded: String) -> CaseOutcome {
        let temps = &self.cfg.temperatures;
        let response = match self.provider.send(&loaded, temps.execution).await {
            Ok(r) => r,
            Err(e) => {
                warn!(%id, "prompt execution failed: {e}");
                return CaseOutcome::Skipped { id, reason: format!("execution failed: {e}") };
            }
        };
        let evaluation = match self
            .provider
            .send(&prompt::evaluation(&loaded, &response), temps.evaluation)
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(%id, "self-evaluation failed: {e}");
                return CaseOutcome::Skipped { id, reason: format!("evaluation failed: {e}") };
            }
        };
        let verdict = extract::extract_verdict(&evaluation);
        CaseOutcome::Evaluated { id, inputs, loaded, response, evaluation, verdict }
    }

    /// Folds one round's outcomes into the results and the log, in order.
    /// Results only ever describe the round just finished.
    fn absorb(&mut self, round: u32, template: &str, outcomes: Vec<CaseOutcome>) -> Tally {
        self.results.clear();
        let mut tally = Tally::default();
        for outcome in outcomes {
            match outcome {
                CaseOutcome::Skipped { id, reason } => {
                    tally.skipped += 1;
                    self.emit(EngineEvent::TestCaseSkipped { id, reason });
                }
                CaseOutcome::Evaluated { id, inputs, loaded, response, evaluation, verdict } => {
                    tally.evaluated += 1;
                    if verdict == Verdict::Unrecognized {
                        info!(%id, strict = self.cfg.strict_verdicts, "evaluation result not recognized");
                    }
                    if verdict.is_failure(self.cfg.strict_verdicts) {
                        tally.failed += 1;
                    }
                    self.emit(EngineEvent::TestCaseEvaluated {
                        id: id.clone(),
                        inputs: inputs.clone(),
                        response: response.clone(),
                        verdict: verdict.clone(),
                    });

                    self.records.push(ResultRecord {
                        round,
                        test_case: id.clone(),
                        prompt_template: template.to_string(),
                        prompt_loaded: loaded,
                        raw_response: response.clone(),
                        parsed_response: extract::parse_structured(&response, None),
                        parsed_evaluation: extract::parse_structured(
                            &evaluation,
                            Some(&[EVALUATION_SCRATCHPAD_TAG, EVALUATION_RESULT_TAG]),
                        ),
                        verdict: verdict.clone(),
                        recorded_at: Utc::now(),
                    });
                    self.results.insert(
                        id,
                        TestResult {
                            prompt_template: template.to_string(),
                            inputs,
                            response,
                            evaluation,
                            verdict,
                        },
                    );
                }
            }
        }
        tally
    }
}
