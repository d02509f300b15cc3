use thiserror::Error;

/// An expected delimited region was missing from model output.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("<{tag}> region not found in model output")] NotFound { tag: String },
}

/// Any reason a gateway call produced no usable text.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("ANTHROPIC_API_KEY is not set")] MissingCredential,
    #[error("http request failed: {0}")] Http(String),
    #[error("api error ({status}): {body}")] Status { status: u16, body: String },
    #[error("gave up after {attempts} attempts: {last}")] RetriesExhausted { attempts: u32, last: String },
    #[error("completion stopped unexpectedly (stop_reason: {stop_reason})")] Incomplete { stop_reason: String },
    #[error("model declined to answer")] Refusal,
    #[error("could not decode response: {0}")] Decode(String),
}

/// Fatal conditions that end an orchestration run.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("prompt generation failed: {0}")] PromptGeneration(String),
    #[error("test case generation failed: {0}")] TestCaseGeneration(String),
    #[error("no consistent test case batch after {attempts} attempts")] TestCaseAttemptsExhausted { attempts: u32 },
    #[error(transparent)] Extraction(#[from] ExtractError),
}
