use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// ========================================
/// Records exchanged between the extraction layer,
/// the reconciler and the orchestration loop
/// ========================================

/// Placeholder name -> literal input value.
pub type Inputs = BTreeMap<String, String>;

/// Outcome of a structured (one level of nested tags) parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Structured {
    Parsed(BTreeMap<String, String>),
    /// Markup could not be parsed; carries the raw text untouched.
    Unparsed(String),
}

impl Structured {
    pub fn fields(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            Structured::Parsed(m) => Some(m),
            Structured::Unparsed(_) => None,
        }
    }

    pub fn fields_mut(&mut self) -> Option<&mut BTreeMap<String, String>> {
        match self {
            Structured::Parsed(m) => Some(m),
            Structured::Unparsed(_) => None,
        }
    }
}

impl Serialize for Structured {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Structured::Parsed(m) => m.serialize(serializer),
            Structured::Unparsed(raw) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("unparsed", raw)?;
                map.end()
            }
        }
    }
}

/// One generated test case, e.g. `<TEST_CASE_3>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    pub number: u32,
    pub inputs: Structured,
}

impl TestCase {
    pub fn id(&self) -> String {
        format!("test_case_{}", self.number)
    }

    /// Inputs usable for substitution, or `None` when the case must be skipped
    /// (unparsed markup, empty values, or a literal `None`).
    pub fn usable_inputs(&self) -> Option<&Inputs> {
        let inputs = self.inputs.fields()?;
        let invalid = inputs
            .values()
            .any(|v| v.trim().is_empty() || v.trim() == "None");
        if invalid { None } else { Some(inputs) }
    }
}

/// A batch of test cases ordered by number.
pub type TestCases = Vec<TestCase>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    Fail,
    Unrecognized,
}

impl Verdict {
    /// Unrecognized verdicts only count against the prompt in strict mode.
    pub fn is_failure(&self, strict: bool) -> bool {
        match self {
            Verdict::Fail => true,
            Verdict::Pass => false,
            Verdict::Unrecognized => strict,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass => write!(f, "PASS"),
            Verdict::Fail => write!(f, "FAIL"),
            Verdict::Unrecognized => write!(f, "UNKNOWN"),
        }
    }
}

/// Latest outcome of one test case; the feedback payload for the next round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestResult {
    pub prompt_template: String,
    /// `None` for a prompt without placeholders.
    pub inputs: Option<Inputs>,
    pub response: String,
    pub evaluation: String,
    pub verdict: Verdict,
}

/// One element of the results log file.
#[derive(Debug, Clone, Serialize)]
pub struct ResultRecord {
    pub round: u32,
    pub test_case: String,
    pub prompt_template: String,
    pub prompt_loaded: String,
    pub raw_response: String,
    pub parsed_response: Structured,
    pub parsed_evaluation: Structured,
    pub verdict: Verdict,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunOutcome {
    /// Every evaluated test case passed.
    Passed,
    /// Zero test cases requested; the first prompt is returned unevaluated.
    Untested,
    GaveUp { rounds: u32 },
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub outcome: RunOutcome,
    pub final_prompt: String,
    pub rounds: u32,
    pub placeholders: Vec<String>,
}
