use tracing::{info, warn};

use crate::wire::TestCases;

/// What to do with a freshly generated test-case batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// Keys already match the declared placeholders exactly.
    Accepted,
    /// Keys differed only by letter case and were renamed as `(from, to)`.
    Corrected { renamed: Vec<(String, String)> },
    /// Irreconcilable; the whole batch must be regenerated.
    Retry { reason: String },
}

fn sorted_ci(names: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut v: Vec<String> = names.into_iter().collect();
    v.sort_by(|a, b| a.to_lowercase().cmp(&b.to_lowercase()).then_with(|| a.cmp(b)));
    v
}

/// Aligns test-case keys with the declared placeholder names.
///
/// Only the first test case is inspected; case-only renames are applied to
/// every case in the batch, values untouched.
pub fn reconcile(placeholders: &[String], cases: &mut TestCases) -> Reconciliation {
    let retry = |reason: String| {
        warn!("{reason}; regenerating test cases");
        Reconciliation::Retry { reason }
    };

    let Some(first) = cases.first() else {
        return retry("no test cases were generated".into());
    };
    let Some(first_inputs) = first.inputs.fields() else {
        return retry(format!("{} could not be parsed", first.id()));
    };

    let declared = sorted_ci(placeholders.iter().cloned());
    let used = sorted_ci(first_inputs.keys().cloned());
    if declared.len() != used.len() {
        return retry(format!(
            "placeholders {declared:?} do not match test case variables {used:?}"
        ));
    }

    let mut renamed = Vec::new();
    for (placeholder, key) in declared.iter().zip(used.iter()) {
        if placeholder == key {
            continue;
        }
        if placeholder.to_lowercase() == key.to_lowercase() {
            renamed.push((key.clone(), placeholder.clone()));
        } else {
            return retry(format!(
                "placeholder '{placeholder}' does not match test case variable '{key}'"
            ));
        }
    }

    if renamed.is_empty() {
        return Reconciliation::Accepted;
    }

    for case in cases.iter_mut() {
        let Some(inputs) = case.inputs.fields_mut() else { continue };
        for (from, to) in &renamed {
            if let Some(value) = inputs.remove(from) {
                inputs.insert(to.clone(), value);
            }
        }
    }
    info!(?renamed, "corrected test case variable names");
    Reconciliation::Corrected { renamed }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{Structured, TestCase};
    use std::collections::BTreeMap;

    fn case(number: u32, pairs: &[(&str, &str)]) -> TestCase {
        let inputs: BTreeMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        TestCase { number, inputs: Structured::Parsed(inputs) }
    }

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_exact_match_accepted() {
        let mut cases = vec![case(1, &[("TEXT", "a")]), case(2, &[("TEXT", "b")])];
        let before = cases.clone();
        assert_eq!(reconcile(&names(&["TEXT"]), &mut cases), Reconciliation::Accepted);
        assert_eq!(cases, before);
    }

    #[test]
    fn test_case_only_mismatch_corrected_in_every_case() {
        let mut cases = vec![
            case(1, &[("text", "Call 555-0100")]),
            case(2, &[("text", "Nothing here")]),
            case(3, &[("text", "Two: 555-0101, 555-0102")]),
        ];
        let outcome = reconcile(&names(&["TEXT"]), &mut cases);
        assert_eq!(
            outcome,
            Reconciliation::Corrected { renamed: vec![("text".into(), "TEXT".into())] }
        );
        for c in &cases {
            let f = c.inputs.fields().unwrap();
            assert_eq!(f.len(), 1);
            assert!(f.contains_key("TEXT"));
        }
        assert_eq!(cases[0].inputs.fields().unwrap()["TEXT"], "Call 555-0100");
        assert_eq!(cases[2].inputs.fields().unwrap()["TEXT"], "Two: 555-0101, 555-0102");
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let mut cases = vec![case(1, &[("question", "q"), ("Document", "d")])];
        let declared = names(&["DOCUMENT", "QUESTION"]);
        assert!(matches!(reconcile(&declared, &mut cases), Reconciliation::Corrected { .. }));
        let once = cases.clone();
        assert_eq!(reconcile(&declared, &mut cases), Reconciliation::Accepted);
        assert_eq!(cases, once);
    }

    #[test]
    fn test_different_name_requests_retry() {
        let mut cases = vec![case(1, &[("INPUT", "x")])];
        assert!(matches!(
            reconcile(&names(&["TEXT"]), &mut cases),
            Reconciliation::Retry { .. }
        ));
    }

    #[test]
    fn test_missing_or_extra_names_request_retry() {
        let mut extra = vec![case(1, &[("TEXT", "x"), ("LANG", "en")])];
        assert!(matches!(reconcile(&names(&["TEXT"]), &mut extra), Reconciliation::Retry { .. }));
        let mut missing = vec![case(1, &[("TEXT", "x")])];
        assert!(matches!(
            reconcile(&names(&["TEXT", "LANG"]), &mut missing),
            Reconciliation::Retry { .. }
        ));
    }

    #[test]
    fn test_unparsed_or_empty_batch_requests_retry() {
        let mut unparsed = vec![TestCase { number: 1, inputs: Structured::Unparsed("<TEXT>".into()) }];
        assert!(matches!(reconcile(&names(&["TEXT"]), &mut unparsed), Reconciliation::Retry { .. }));
        let mut empty: TestCases = Vec::new();
        assert!(matches!(reconcile(&names(&["TEXT"]), &mut empty), Reconciliation::Retry { .. }));
    }
}
