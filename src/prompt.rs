//! Prompt templates and deterministic assembly.
//!
//! Templates use `{name}` placeholders. [`fill`] substitutes them in a single
//! left-to-right pass: substituted values are copied verbatim and never
//! scanned again, so braces inside user input or documentation cannot
//! trigger a second expansion. Unknown placeholders are left as written.

use serde::Deserialize;

use crate::models::TestCase;

pub const TEST_CASE_TEMPLATE: &str = "You are an expert QA engineer. Based on the following context from project documentation, \
generate comprehensive test cases for the given requirement.

Context:
{context}

Requirement: {requirement}

Output Format:
Provide a JSON list of test cases. Each test case should have:
- Test_ID
- Feature
- Test_Scenario
- Preconditions (list of setup steps required before the scenario; empty list if none)
- Expected_Result
- Grounded_In (Source document filename, exactly as it appears after \"Source:\" in the context)

Ensure no hallucinations. Only use features mentioned in the context.
Output ONLY the JSON list.
";

pub const SCRIPT_TEMPLATE: &str = "You are an expert Selenium Python automation engineer.
Generate a robust, runnable Selenium script for the following test case.

Test Case:
{test_case}
{setup_steps}
Target HTML Content:
{html_content}

Relevant Documentation Context:
{context}

Instructions:
1. Use `webdriver.Chrome()`.
2. Use explicit waits (`WebDriverWait`) for element interaction.
3. Use precise selectors based on the provided HTML (IDs, Classes, Names).
4. Include comments explaining the steps.
5. Handle potential errors gracefully.
6. Do NOT use pytest, unittest, or classes. Generate a simple standalone script with a `if __name__ == \"__main__\":` block.
7. Ensure all imports are correct and necessary. Do NOT import built-in Python exceptions (like AssertionError) from selenium modules.
8. Before the action under test, perform any setup the test case implies (for example creating an account or adding items to a cart), in the order listed under Setup Steps when present.
9. Output ONLY the Python code, no markdown formatting like ```python.
";

/// Substitute `{key}` placeholders in `template` in one pass.
pub fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let replacement = after.find('}').and_then(|close| {
            let key = &after[..close];
            values
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| (close, *v))
        });
        match replacement {
            Some((close, value)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Remove Markdown code fences wrapped around model output.
///
/// If the text contains a fenced block, the contents of the first block are
/// returned; prose before or after it is dropped. Text without fences is
/// returned trimmed.
pub fn strip_code_fences(raw: &str) -> String {
    let lines: Vec<&str> = raw.lines().collect();
    let Some(open) = lines.iter().position(|l| l.trim_start().starts_with("```")) else {
        return raw.trim().to_string();
    };

    let body = &lines[open + 1..];
    let close = body
        .iter()
        .position(|l| l.trim() == "```")
        .unwrap_or(body.len());
    body[..close].join("\n").trim().to_string()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TestCaseEnvelope {
    List(Vec<TestCase>),
    Wrapped { test_cases: Vec<TestCase> },
    Single(TestCase),
}

impl TestCaseEnvelope {
    fn into_cases(self) -> Vec<TestCase> {
        match self {
            TestCaseEnvelope::List(list) => list,
            TestCaseEnvelope::Wrapped { test_cases } => test_cases,
            TestCaseEnvelope::Single(tc) => vec![tc],
        }
    }
}

/// Parse model output as a list of test cases.
///
/// Accepts a bare JSON list, an object with a `test_cases` list, or a single
/// test-case object. Prose around the JSON is tolerated, including prose
/// that itself contains brackets: every `[` or `{` is tried in order and the
/// first one that opens a complete value wins. The error of the first
/// attempt is reported when none does.
pub fn parse_test_cases(text: &str) -> Result<Vec<TestCase>, String> {
    let mut first_error = None;
    for (start, _) in text.match_indices(['[', '{']) {
        let mut values =
            serde_json::Deserializer::from_str(&text[start..]).into_iter::<TestCaseEnvelope>();
        match values.next() {
            Some(Ok(envelope)) => return Ok(envelope.into_cases()),
            Some(Err(e)) => {
                first_error.get_or_insert_with(|| e.to_string());
            }
            None => {}
        }
    }
    Err(first_error.unwrap_or_else(|| "no JSON list or object found".to_string()))
}

/// Interpret a script-generation input as a structured test case, if it is one.
///
/// A list (as printed by `qah generate cases`) yields its first test case.
pub fn parse_test_case(input: &str) -> Option<TestCase> {
    let trimmed = strip_code_fences(input);
    if !trimmed.starts_with(['{', '[']) {
        return None;
    }
    parse_test_cases(&trimmed).ok()?.into_iter().next()
}

/// Ordered setup section for the script prompt; empty when there is nothing to set up.
pub fn setup_section(test_case: Option<&TestCase>) -> String {
    let steps = match test_case {
        Some(tc) if !tc.preconditions.is_empty() => &tc.preconditions,
        _ => return String::new(),
    };
    let mut out = String::from("\nSetup Steps (perform in this order before the action under test):\n");
    for (i, step) in steps.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, step));
    }
    out
}

pub fn test_case_prompt(context: &str, requirement: &str) -> String {
    fill(
        TEST_CASE_TEMPLATE,
        &[("context", context), ("requirement", requirement)],
    )
}

pub fn script_prompt(context: &str, test_case: &str, html_content: &str) -> String {
    let parsed = parse_test_case(test_case);
    let setup = setup_section(parsed.as_ref());
    fill(
        SCRIPT_TEMPLATE,
        &[
            ("test_case", test_case.trim()),
            ("setup_steps", &setup),
            ("html_content", html_content),
            ("context", context),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_is_single_pass() {
        let out = fill(
            "Req: {requirement}\nCtx: {context}",
            &[("requirement", "use {context} literally"), ("context", "C")],
        );
        assert_eq!(out, "Req: use {context} literally\nCtx: C");
    }

    #[test]
    fn test_fill_leaves_unknown_and_unbalanced_braces() {
        assert_eq!(fill("a {x} b", &[]), "a {x} b");
        assert_eq!(fill("open { only", &[("only", "no")]), "open { only");
        assert_eq!(fill("{k}{k}", &[("k", "v")]), "vv");
    }

    #[test]
    fn test_test_case_prompt_contains_inputs() {
        let prompt = test_case_prompt("CTX\n(Source: policy.md)", "Discount codes");
        assert!(prompt.contains("Context:\nCTX\n(Source: policy.md)"));
        assert!(prompt.contains("Requirement: Discount codes"));
        assert!(prompt.contains("Grounded_In"));
        assert!(!prompt.contains("{context}"));
    }

    #[test]
    fn test_strip_code_fences_variants() {
        assert_eq!(strip_code_fences("```python\nprint(1)\n```"), "print(1)");
        assert_eq!(strip_code_fences("Here you go:\n```\nx = 1\n```\nEnjoy"), "x = 1");
        assert_eq!(strip_code_fences("```json\n[]"), "[]");
        assert_eq!(strip_code_fences("  plain  \n"), "plain");
    }

    #[test]
    fn test_script_prompt_renders_ordered_setup_steps() {
        let tc = r#"{"Test_ID":"TC-1","Test_Scenario":"Apply SAVE20 at checkout",
            "Preconditions":["Register an account","Add an item to the cart"]}"#;
        let prompt = script_prompt("ctx", tc, "<button id=\"apply\">Apply</button>");
        let setup = prompt.find("Setup Steps").unwrap();
        let first = prompt.find("1. Register an account").unwrap();
        let second = prompt.find("2. Add an item to the cart").unwrap();
        let markup = prompt.find("Target HTML Content").unwrap();
        assert!(setup < first && first < second && second < markup);
        assert!(prompt.contains("<button id=\"apply\">Apply</button>"));
    }

    #[test]
    fn test_free_text_test_case_has_no_setup_section() {
        let prompt = script_prompt("ctx", "User applies SAVE20", "<html></html>");
        assert!(!prompt.contains("Setup Steps (perform"));
        assert!(prompt.contains("Test Case:\nUser applies SAVE20\n"));
    }

    #[test]
    fn test_parse_bare_list_with_prose() {
        let text = "Here are the cases:\n[{\"Test_ID\":\"TC-1\",\"Grounded_In\":\"policy.md\"}]\nDone.";
        let cases = parse_test_cases(text).unwrap();
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].grounded_in, vec!["policy.md"]);
    }

    #[test]
    fn test_parse_skips_brackets_in_leading_prose() {
        let text = "Here are the test cases [based on policy.md]:\n\
                    [{\"Test_ID\":\"TC-1\",\"Grounded_In\":\"policy.md\"}]";
        let cases = parse_test_cases(text).unwrap();
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].test_id, "TC-1");
        assert_eq!(cases[0].grounded_in, vec!["policy.md"]);
    }

    #[test]
    fn test_parse_wrapped_and_single() {
        let wrapped = r#"{"test_cases":[{"Test_ID":"TC-1"},{"Test_ID":"TC-2"}]}"#;
        assert_eq!(parse_test_cases(wrapped).unwrap().len(), 2);
        let single = r#"{"Test_ID":"TC-9","Feature":"Cart"}"#;
        assert_eq!(parse_test_cases(single).unwrap()[0].test_id, "TC-9");
    }

    #[test]
    fn test_parse_rejects_non_json() {
        assert!(parse_test_cases("I cannot help with that.").is_err());
        assert!(parse_test_cases("[not json]").is_err());
    }

    #[test]
    fn test_script_prompt_uses_first_case_of_a_list() {
        let cases = r#"[{"Test_ID":"TC-1","Preconditions":["Register an account"]},
            {"Test_ID":"TC-2","Preconditions":["Log out"]}]"#;
        let prompt = script_prompt("ctx", cases, "<html></html>");
        assert!(prompt.contains("Setup Steps (perform"));
        assert!(prompt.contains("1. Register an account"));
        assert!(!prompt.contains("1. Log out"));
    }
}
