//! Pulls structured fields out of free-form model output.
//!
//! Everything here works on tag-delimited regions (`<NAME>...</NAME>`),
//! matched case-insensitively and across lines. Absent regions surface as
//! [`ExtractError::NotFound`]; malformed nested markup degrades to
//! [`Structured::Unparsed`] instead of failing.

use regex::{Captures, Regex, RegexBuilder};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;
use tracing::{debug, info, warn};

use crate::errors::ExtractError;
use crate::wire::{Inputs, Structured, TestCase, TestCases, Verdict};

pub const GENERATED_PROMPT_TAG: &str = "GENERATED_PROMPT";
pub const PLACEHOLDERS_TAG: &str = "PLACEHOLDERS";
pub const TEST_CASE_PREFIX: &str = "TEST_CASE";
pub const EVALUATION_SCRATCHPAD_TAG: &str = "EVALUATION_SCRATCHPAD";
pub const EVALUATION_RESULT_TAG: &str = "EVALUATION_RESULT";

/// Stands in for spaces inside tag names while the markup is scanned.
const SPACE_TOKEN: &str = "_SPACE_";

// Brackets of tags neutralised by an allow-list parse. Private-use code
// points, so text that already contains entities round-trips untouched.
const OPEN_MARK: char = '\u{E000}';
const CLOSE_MARK: char = '\u{E001}';

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z_](?:[A-Za-z0-9_ \-]*[A-Za-z0-9_])?)\}").expect("placeholder regex")
});

// Anything that looks like `<name with spaces>` or `</name with spaces>`.
static SPACED_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<(/?)\s*([A-Za-z_][A-Za-z0-9_.\- ]*?)\s*(/?)>").expect("spaced tag regex")
});

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<(/?)([A-Za-z_][A-Za-z0-9_.\-]*)\s*(/?)>").expect("tag regex")
});

fn region_regex(tag: &str) -> Option<Regex> {
    let escaped = regex::escape(tag);
    RegexBuilder::new(&format!(r"<{escaped}>(.*?)</{escaped}>"))
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
        .ok()
}

/// Inner content of the first `<tag>...</tag>` region, trimmed.
pub fn extract_tag(text: &str, tag: &str) -> Result<String, ExtractError> {
    let not_found = || ExtractError::NotFound { tag: tag.to_string() };
    let re = region_regex(tag).ok_or_else(not_found)?;
    let cap = re.captures(text).ok_or_else(not_found)?;
    Ok(cap[1].trim().to_string())
}

pub fn extract_generated_prompt(text: &str) -> Result<String, ExtractError> {
    extract_tag(text, GENERATED_PROMPT_TAG)
}

/// Placeholder names listed one per line inside `<PLACEHOLDERS>`.
///
/// Braces are stripped; a lone `None` means the prompt takes no inputs.
pub fn extract_placeholder_list(text: &str) -> Result<Vec<String>, ExtractError> {
    let body = extract_tag(text, PLACEHOLDERS_TAG)?;
    let mut seen = BTreeSet::new();
    let mut names = Vec::new();
    for line in body.lines() {
        let name = line.trim().trim_start_matches('{').trim_end_matches('}').trim();
        if name.is_empty() || name.eq_ignore_ascii_case("none") {
            continue;
        }
        if seen.insert(name.to_string()) {
            names.push(name.to_string());
        }
    }
    Ok(names)
}

/// Unique `{NAME}` placeholders in order of first appearance.
pub fn detect_placeholders(template: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    PLACEHOLDER_RE
        .captures_iter(template)
        .map(|c| c[1].to_string())
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

/// Substitutes every `{NAME}` with its input value.
pub fn fill_placeholders(template: &str, inputs: &Inputs) -> String {
    inputs.iter().fold(template.to_string(), |acc, (name, value)| {
        acc.replace(&format!("{{{name}}}", name = name), value)
    })
}

/// All `<PREFIX_n>` sections, ordered by `n`.
///
/// The section count is discovered by scanning for opening tags; a section
/// whose closing tag is missing yields `None` for its body.
pub fn extract_numbered(text: &str, prefix: &str) -> Result<Vec<(u32, Option<String>)>, ExtractError> {
    let not_found = || ExtractError::NotFound { tag: format!("{prefix}_#") };
    let opener = RegexBuilder::new(&format!(r"<{}_(\d+)>", regex::escape(prefix)))
        .case_insensitive(true)
        .build()
        .map_err(|_| not_found())?;

    let numbers: BTreeSet<u32> = opener
        .captures_iter(text)
        .filter_map(|c| c[1].parse().ok())
        .collect();
    if numbers.is_empty() {
        return Err(not_found());
    }

    Ok(numbers
        .into_iter()
        .map(|n| (n, extract_tag(text, &format!("{prefix}_{n}")).ok()))
        .collect())
}

pub fn extract_test_cases(text: &str) -> Result<TestCases, ExtractError> {
    let sections = extract_numbered(text, TEST_CASE_PREFIX)?;
    let cases: TestCases = sections
        .into_iter()
        .map(|(number, body)| {
            let inputs = match body {
                Some(body) => parse_structured(&body, None),
                None => {
                    warn!(number, "test case has no closing tag");
                    Structured::Unparsed(String::new())
                }
            };
            TestCase { number, inputs }
        })
        .collect();
    debug!(count = cases.len(), "extracted test cases");
    Ok(cases)
}

fn encode_tag_spaces(text: &str) -> String {
    SPACED_TAG_RE
        .replace_all(text, |c: &Captures| {
            format!("<{}{}{}>", &c[1], c[2].replace(' ', SPACE_TOKEN), &c[3])
        })
        .into_owned()
}

fn decode_tag_spaces(s: &str) -> String {
    s.replace(SPACE_TOKEN, " ")
}

/// Allow-list spelling of `name`, compared ASCII-case-insensitively.
fn allowed_name<'a>(allowed: &'a [String], name: &str) -> Option<&'a str> {
    allowed.iter().find(|a| a.eq_ignore_ascii_case(name)).map(String::as_str)
}

fn escape_unlisted_tags(text: &str, allowed: &[String]) -> String {
    TAG_RE
        .replace_all(text, |c: &Captures| {
            if allowed_name(allowed, &c[2]).is_some() {
                c[0].to_string()
            } else {
                format!("{OPEN_MARK}{}{}{}{CLOSE_MARK}", &c[1], &c[2], &c[3])
            }
        })
        .into_owned()
}

fn unescape_marks(s: &str) -> String {
    s.replace(OPEN_MARK, "<").replace(CLOSE_MARK, ">")
}

/// Top-level children of `text` as `(name, inner)` pairs, or `None` when the
/// markup does not nest properly.
fn scan_children(text: &str) -> Option<Vec<(String, String)>> {
    let mut stack: Vec<(String, usize)> = Vec::new();
    let mut children = Vec::new();

    for cap in TAG_RE.captures_iter(text) {
        let whole = cap.get(0)?;
        let closing = !cap[1].is_empty();
        let self_closing = !cap[3].is_empty();
        let name = cap[2].to_string();

        if self_closing {
            if closing {
                return None;
            }
            if stack.is_empty() {
                children.push((name, String::new()));
            }
        } else if closing {
            let (open, start) = stack.pop()?;
            if open != name {
                return None;
            }
            if stack.is_empty() {
                children.push((name, text[start..whole.start()].to_string()));
            }
        } else {
            stack.push((name, whole.end()));
        }
    }

    stack.is_empty().then_some(children)
}

/// Parses one level of nested tags into a name -> text mapping.
///
/// With an allow-list, every other tag is escaped to text first so stray
/// markup cannot break the structure, and only listed names are returned.
/// Tag names may contain spaces. Never fails: malformed markup comes back
/// as [`Structured::Unparsed`] carrying the raw input.
pub fn parse_structured(text: &str, allow: Option<&[&str]>) -> Structured {
    let mut work = encode_tag_spaces(text.trim());
    let allowed: Option<Vec<String>> =
        allow.map(|names| names.iter().map(|n| n.replace(' ', SPACE_TOKEN)).collect());
    if let Some(allowed) = &allowed {
        work = escape_unlisted_tags(&work, allowed);
    }

    let Some(children) = scan_children(&work) else {
        info!("could not parse markup in model output, keeping raw text");
        return Structured::Unparsed(text.to_string());
    };

    let mut fields = BTreeMap::new();
    for (name, inner) in children {
        let key = match &allowed {
            Some(allowed) => match allowed_name(allowed, &name) {
                Some(spelling) => spelling.to_string(),
                None => continue,
            },
            None => name,
        };
        let value = decode_tag_spaces(&unescape_marks(inner.trim()));
        fields.insert(decode_tag_spaces(&key), value);
    }
    Structured::Parsed(fields)
}

/// Classifies raw verdict text.
pub fn classify_verdict(text: &str) -> Verdict {
    let t = text.trim().to_lowercase();
    if t == "fail" {
        Verdict::Fail
    } else if t == "pass" || (t.contains("pass") && !t.contains("fail")) {
        Verdict::Pass
    } else {
        Verdict::Unrecognized
    }
}

/// Verdict from an evaluation's `<EVALUATION_RESULT>` region.
pub fn extract_verdict(evaluation: &str) -> Verdict {
    match extract_tag(evaluation, EVALUATION_RESULT_TAG) {
        Ok(result) => classify_verdict(&result),
        Err(e) => {
            info!("{e}");
            Verdict::Unrecognized
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(s: Structured) -> BTreeMap<String, String> {
        match s {
            Structured::Parsed(m) => m,
            Structured::Unparsed(raw) => panic!("expected parsed, got unparsed: {raw}"),
        }
    }

    #[test]
    fn test_extract_tag_trims_content() {
        let text = "thinking...\n<GENERATED_PROMPT>\n  Redact {TEXT}  \n</GENERATED_PROMPT>\ntrailer";
        assert_eq!(extract_tag(text, "GENERATED_PROMPT").unwrap(), "Redact {TEXT}");
    }

    #[test]
    fn test_extract_tag_case_insensitive_multiline() {
        let text = "<generated_prompt>line one\nline two</Generated_Prompt>";
        assert_eq!(extract_generated_prompt(text).unwrap(), "line one\nline two");
    }

    #[test]
    fn test_extract_tag_missing_is_not_found() {
        let err = extract_generated_prompt("no tags here").unwrap_err();
        assert_eq!(err, ExtractError::NotFound { tag: "GENERATED_PROMPT".into() });
        // Opening tag alone is not a region.
        assert!(extract_generated_prompt("<GENERATED_PROMPT>half").is_err());
    }

    #[test]
    fn test_detect_placeholders_unique_in_order() {
        let tpl = "Read {DOCUMENT}. Answer {QUESTION} using {DOCUMENT}.";
        assert_eq!(detect_placeholders(tpl), vec!["DOCUMENT", "QUESTION"]);
    }

    #[test]
    fn test_detect_placeholders_ignores_json_braces() {
        let tpl = r#"Return {"name": "x"} for {TEXT}"#;
        assert_eq!(detect_placeholders(tpl), vec!["TEXT"]);
        assert!(detect_placeholders("Write a haiku about autumn.").is_empty());
    }

    #[test]
    fn test_fill_placeholders_replaces_all_occurrences() {
        let mut inputs = Inputs::new();
        inputs.insert("TEXT".into(), "call 555-1234".into());
        let loaded = fill_placeholders("<TEXT>{TEXT}</TEXT> again: {TEXT}", &inputs);
        assert_eq!(loaded, "<TEXT>call 555-1234</TEXT> again: call 555-1234");
    }

    #[test]
    fn test_placeholder_list_strips_braces_and_none() {
        let text = "<PLACEHOLDERS>\n{NAME}\n{AGE}\n{NAME}\n</PLACEHOLDERS>";
        assert_eq!(extract_placeholder_list(text).unwrap(), vec!["NAME", "AGE"]);
        let none = "<placeholders>\nNone\n</placeholders>";
        assert!(extract_placeholder_list(none).unwrap().is_empty());
        assert!(extract_placeholder_list("nothing").is_err());
    }

    #[test]
    fn test_numbered_sections_discovered_by_scan() {
        let text = "<TEST_CASE_2><A>b</A></TEST_CASE_2>\n<test_case_1><A>a</A></test_case_1>\n<TEST_CASE_3><A>c";
        let sections = extract_numbered(text, "TEST_CASE").unwrap();
        assert_eq!(sections.len(), 3);
        assert_eq!(sections[0], (1, Some("<A>a</A>".to_string())));
        assert_eq!(sections[1], (2, Some("<A>b</A>".to_string())));
        assert_eq!(sections[2], (3, None));
    }

    #[test]
    fn test_numbered_sections_absent() {
        assert!(matches!(
            extract_numbered("plain", "TEST_CASE"),
            Err(ExtractError::NotFound { .. })
        ));
    }

    #[test]
    fn test_extract_test_cases() {
        let text = "<PROMPT_ANALYSIS>x</PROMPT_ANALYSIS>\n\
            <TEST_CASE_1>\n<TEXT>\nCall me at 555-0100.\n</TEXT>\n</TEST_CASE_1>\n\
            <TEST_CASE_2>\n<TEXT>\nNo numbers here.\n</TEXT>\n</TEST_CASE_2>";
        let cases = extract_test_cases(text).unwrap();
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0].id(), "test_case_1");
        assert_eq!(fields(cases[0].inputs.clone())["TEXT"], "Call me at 555-0100.");
        assert_eq!(fields(cases[1].inputs.clone())["TEXT"], "No numbers here.");
    }

    #[test]
    fn test_parse_structured_preserves_names_and_values() {
        let parsed = fields(parse_structured("<DOCUMENT>doc body</DOCUMENT>\n<QUESTION>why?</QUESTION>", None));
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed["DOCUMENT"], "doc body");
        assert_eq!(parsed["QUESTION"], "why?");
    }

    #[test]
    fn test_parse_structured_tag_names_with_spaces() {
        let parsed = fields(parse_structured("<customer name>Ada</customer name><order id>42</order id>", None));
        assert_eq!(parsed["customer name"], "Ada");
        assert_eq!(parsed["order id"], "42");
    }

    #[test]
    fn test_parse_structured_keeps_nested_markup_verbatim() {
        let parsed = fields(parse_structured("<ANSWER>see <b>this</b></ANSWER>", None));
        assert_eq!(parsed["ANSWER"], "see <b>this</b>");
    }

    #[test]
    fn test_parse_structured_allow_list_filters_and_tolerates_strays() {
        let eval = "<EVALUATION_SCRATCHPAD>The response used <sanitized> but never closed it</EVALUATION_SCRATCHPAD>\n\
            <NOTES>extra</NOTES>\n<EVALUATION_RESULT>FAIL</EVALUATION_RESULT>";
        let parsed = fields(parse_structured(eval, Some(&[EVALUATION_SCRATCHPAD_TAG, EVALUATION_RESULT_TAG])));
        assert_eq!(parsed.len(), 2);
        assert!(!parsed.contains_key("NOTES"));
        assert_eq!(parsed["EVALUATION_SCRATCHPAD"], "The response used <sanitized> but never closed it");
        assert_eq!(parsed["EVALUATION_RESULT"], "FAIL");
    }

    #[test]
    fn test_parse_structured_allow_list_ignores_case() {
        let eval = "<evaluation_scratchpad>fine</evaluation_scratchpad>\n<evaluation_result>PASS</evaluation_result>";
        let parsed = fields(parse_structured(eval, Some(&[EVALUATION_SCRATCHPAD_TAG, EVALUATION_RESULT_TAG])));
        assert_eq!(parsed["EVALUATION_RESULT"], "PASS");
        assert_eq!(parsed["EVALUATION_SCRATCHPAD"], "fine");
    }

    #[test]
    fn test_parse_structured_keeps_existing_entities() {
        let eval = "<EVALUATION_SCRATCHPAD>wrote &lt;b&gt; and &amp; around <i>x</i></EVALUATION_SCRATCHPAD>\
            <EVALUATION_RESULT>PASS</EVALUATION_RESULT>";
        let parsed = fields(parse_structured(eval, Some(&[EVALUATION_SCRATCHPAD_TAG, EVALUATION_RESULT_TAG])));
        assert_eq!(parsed["EVALUATION_SCRATCHPAD"], "wrote &lt;b&gt; and &amp; around <i>x</i>");
    }

    #[test]
    fn test_parse_structured_malformed_degrades() {
        let raw = "<A>open <B>never closed</A>";
        assert_eq!(parse_structured(raw, None), Structured::Unparsed(raw.to_string()));
        let stray = "</A> dangling";
        assert_eq!(parse_structured(stray, None), Structured::Unparsed(stray.to_string()));
    }

    #[test]
    fn test_parse_structured_plain_text_is_empty_mapping() {
        assert_eq!(parse_structured("just prose", None), Structured::Parsed(BTreeMap::new()));
    }

    #[test]
    fn test_classify_verdict() {
        assert_eq!(classify_verdict("PASS"), Verdict::Pass);
        assert_eq!(classify_verdict(" fail "), Verdict::Fail);
        assert_eq!(classify_verdict("The response passes."), Verdict::Pass);
        assert_eq!(classify_verdict("Mostly failed"), Verdict::Unrecognized);
        assert_eq!(classify_verdict("This does not fail"), Verdict::Unrecognized);
        assert_eq!(classify_verdict("FAIL - partially"), Verdict::Unrecognized);
        assert_eq!(classify_verdict("pass/fail unclear"), Verdict::Unrecognized);
        assert_eq!(classify_verdict("N/A"), Verdict::Unrecognized);
    }

    #[test]
    fn test_extract_verdict_missing_region_is_unrecognized() {
        assert_eq!(extract_verdict("<EVALUATION_RESULT>PASS</EVALUATION_RESULT>"), Verdict::Pass);
        assert_eq!(extract_verdict("I think it passed"), Verdict::Unrecognized);
    }
}
