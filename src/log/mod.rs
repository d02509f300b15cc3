use fs_err as fs;
use serde_json::to_string_pretty;
use std::path::Path;
use tracing::info;

use crate::wire::ResultRecord;

/// Writes every record as one pretty-printed JSON array, replacing any
/// previous file at `path`.
pub fn save_results(path: &Path, records: &[ResultRecord]) -> anyhow::Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    fs::write(path, to_string_pretty(records)?)?;
    info!(path = %path.display(), records = records.len(), "results saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{Structured, Verdict};
    use chrono::Utc;
    use serde_json::Value;
    use std::collections::BTreeMap;

    fn record(test_case: &str, parsed_response: Structured) -> ResultRecord {
        let mut eval = BTreeMap::new();
        eval.insert("EVALUATION_RESULT".to_string(), "PASS".to_string());
        ResultRecord {
            round: 1,
            test_case: test_case.into(),
            prompt_template: "Redact {TEXT}".into(),
            prompt_loaded: "Redact 555-0100".into(),
            raw_response: "<ANSWER>Redact XXX</ANSWER>".into(),
            parsed_response,
            parsed_evaluation: Structured::Parsed(eval),
            verdict: Verdict::Pass,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_writes_json_array_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("results.json");

        let mut answer = BTreeMap::new();
        answer.insert("ANSWER".to_string(), "Redact XXX".to_string());
        let records = vec![
            record("test_case_1", Structured::Parsed(answer)),
            record("test_case_2", Structured::Unparsed("<ANSWER>oops".into())),
        ];
        save_results(&path, &records).unwrap();

        let v: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let arr = v.as_array().unwrap();
        assert_eq!(arr.len(), 2);
        assert_eq!(arr[0]["prompt_template"], "Redact {TEXT}");
        assert_eq!(arr[0]["parsed_response"]["ANSWER"], "Redact XXX");
        assert_eq!(arr[0]["parsed_evaluation"]["EVALUATION_RESULT"], "PASS");
        assert_eq!(arr[0]["verdict"], "pass");
        assert_eq!(arr[1]["parsed_response"]["unparsed"], "<ANSWER>oops");

        save_results(&path, &records[..1]).unwrap();
        let v: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(v.as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_empty_run_writes_empty_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");
        save_results(&path, &[]).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[]");
    }
}
