/// Harness Builder - Wraps Candidate Code With a Test Driver
///
/// **Core Responsibility:**
/// Turn raw candidate code into a self-contained Python script that finds the
/// entry point, calls it per test case and prints exactly one JSON document.
///
/// **Output Isolation:**
/// The prelude swaps `sys.stdout` for `sys.stderr` before the candidate code
/// runs, and the trailer writes its document to the saved real stdout. Calls
/// to `print` in candidate code therefore never corrupt the result document.
///
/// **Data Embedding:**
/// Test data never becomes source text. Local harnesses read their case from
/// a file named on the command line; batch harnesses decode a base64 literal.
/// The only interpolated value is the entry point, which is a validated
/// identifier.

use base64::{engine::general_purpose, Engine as _};
use grader_common::types::{ExecutionResult, GradeError, TestCase};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

/// Entry point assumed by the remote judge contract
pub const REMOTE_ENTRY_POINT: &str = "solution";

/// How a test input is handed to the entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentStyle {
    /// The input is passed as one positional argument
    Single,
    /// JSON arrays are unpacked into positional arguments
    Spread,
}

/// A generated, ready-to-run script
#[derive(Debug, Clone)]
pub struct Harness {
    pub source: String,
    pub entry_point: String,
}

const PRELUDE: &str = r#"import json as _grader_json
import sys as _grader_sys
import traceback as _grader_traceback

_grader_stdout = _grader_sys.stdout
_grader_sys.stdout = _grader_sys.stderr

"#;

const DRIVER: &str = r#"

def _grader_encode(value):
    if hasattr(value, "tolist"):
        return value.tolist()
    raise TypeError("Object of type %s is not JSON serializable" % type(value).__name__)


def _grader_call(value):
    entry = globals()["__ENTRY__"]
    if __SPREAD__ and isinstance(value, (list, tuple)):
        return entry(*value)
    return entry(value)


def _grader_run(value):
    try:
        output = _grader_call(value)
        output = _grader_json.loads(
            _grader_json.dumps(output, default=_grader_encode, allow_nan=False)
        )
        return {"status": "success", "output": output}
    except BaseException as exc:
        # SystemExit and friends end only this case, never the batch
        message = str(exc)
        if not isinstance(exc, Exception):
            message = "%s: %s" % (type(exc).__name__, message)
        return {
            "status": "error",
            "error": message,
            "trace": _grader_traceback.format_exc(),
        }


def _grader_emit(document):
    _grader_stdout.write(_grader_json.dumps(document) + "\n")
    _grader_stdout.flush()
"#;

const LOCAL_MAIN: &str = r#"

def _grader_main():
    with open(_grader_sys.argv[1], encoding="utf-8") as handle:
        case = _grader_json.load(handle)
    _grader_emit(_grader_run(case["input"]))


if __name__ == "__main__":
    _grader_main()
"#;

const BATCH_MAIN: &str = r#"

def _grader_main():
    import base64 as _grader_base64

    cases = _grader_json.loads(_grader_base64.b64decode("__CASES__").decode("utf-8"))
    _grader_emit([_grader_run(case["input"]) for case in cases])


if __name__ == "__main__":
    _grader_main()
"#;

/// Builds harness scripts for one piece of candidate code
#[derive(Debug, Clone)]
pub struct HarnessBuilder<'a> {
    code: &'a str,
    entry_point: Option<&'a str>,
    style: ArgumentStyle,
}

impl<'a> HarnessBuilder<'a> {
    pub fn new(code: &'a str) -> Self {
        Self {
            code,
            entry_point: None,
            style: ArgumentStyle::Single,
        }
    }

    /// Require a specific entry point instead of taking the first definition
    pub fn entry_point(mut self, name: Option<&'a str>) -> Self {
        self.entry_point = name;
        self
    }

    pub fn argument_style(mut self, style: ArgumentStyle) -> Self {
        self.style = style;
        self
    }

    /// Resolve the function the harness will call.
    ///
    /// An explicit name must match a top-level definition. Otherwise the first
    /// top-level definition wins; later definitions are not an error.
    pub fn resolve_entry_point(&self) -> Result<String, GradeError> {
        let functions = top_level_functions(self.code);
        match self.entry_point {
            Some(name) if functions.iter().any(|f| f == name) => Ok(name.to_string()),
            Some(name) => Err(GradeError::NoFunctionFound {
                expected: Some(name.to_string()),
            }),
            None => functions
                .into_iter()
                .next()
                .ok_or(GradeError::NoFunctionFound { expected: None }),
        }
    }

    /// Script that runs one case read from the file named in `argv[1]`
    pub fn build_local(&self) -> Result<Harness, GradeError> {
        let entry_point = self.resolve_entry_point()?;
        let source = self.assemble(&entry_point, LOCAL_MAIN.to_string());
        Ok(Harness {
            source,
            entry_point,
        })
    }

    /// Script that runs every case and prints one JSON array of documents
    pub fn build_batch(&self, cases: &[TestCase]) -> Result<Harness, GradeError> {
        let entry_point = self.resolve_entry_point()?;
        let inputs: Vec<_> = cases.iter().map(|c| json!({ "input": c.input })).collect();
        let encoded = general_purpose::STANDARD.encode(json!(inputs).to_string());
        let source = self.assemble(&entry_point, BATCH_MAIN.replace("__CASES__", &encoded));
        Ok(Harness {
            source,
            entry_point,
        })
    }

    fn assemble(&self, entry_point: &str, main: String) -> String {
        let (future_imports, body) = split_future_imports(self.code);
        let spread = match self.style {
            ArgumentStyle::Single => "False",
            ArgumentStyle::Spread => "True",
        };
        let driver = DRIVER
            .replace("__ENTRY__", entry_point)
            .replace("__SPREAD__", spread);

        let mut source = String::with_capacity(self.code.len() + PRELUDE.len() + driver.len() + main.len());
        source.push_str(&future_imports);
        source.push_str(PRELUDE);
        source.push_str(&body);
        if !body.ends_with('\n') {
            source.push('\n');
        }
        source.push_str(&driver);
        source.push_str(&main);
        source
    }
}

/// The document a harness prints for one test case
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HarnessDocument {
    Success {
        #[serde(default)]
        output: Value,
    },
    Error {
        #[serde(default)]
        error: String,
        #[serde(default)]
        trace: Option<String>,
    },
}

impl From<HarnessDocument> for ExecutionResult {
    fn from(document: HarnessDocument) -> Self {
        match document {
            HarnessDocument::Success { output } => ExecutionResult::Success { output },
            HarnessDocument::Error { error, trace } => ExecutionResult::RuntimeFailure {
                message: error,
                trace,
            },
        }
    }
}

/// Parse output that must hold exactly one JSON document.
///
/// Empty output, trailing garbage or a second document all yield `None`.
pub fn parse_document<T: DeserializeOwned>(stdout: &str) -> Option<T> {
    let mut documents = serde_json::Deserializer::from_str(stdout).into_iter::<T>();
    let first = documents.next()?.ok()?;
    match documents.next() {
        None => Some(first),
        Some(_) => None,
    }
}

/// Contents of the side-channel file read by a local harness
pub fn case_payload(case: &TestCase) -> String {
    json!({ "input": case.input }).to_string()
}

/// Names of top-level function definitions, in source order.
///
/// Only unindented `def` / `async def` lines count, so methods and nested
/// functions are skipped. Lines inside triple-quoted strings are ignored.
pub fn top_level_functions(code: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut open_quote: Option<&'static str> = None;

    for line in code.lines() {
        let inside_string = open_quote.is_some();
        open_quote = scan_quotes(line, open_quote);
        if inside_string {
            continue;
        }

        if let Some(name) = parse_def(line) {
            names.push(name);
        }
    }

    names
}

const TRIPLE_QUOTES: [&str; 2] = ["\"\"\"", "'''"];

/// Follow string state through one line and return the triple-quote
/// delimiter still open at its end.
///
/// Comments and single-line literals are skipped, so a `"""` inside
/// `'...'` or after `#` does not open a string.
fn scan_quotes(line: &str, mut open: Option<&'static str>) -> Option<&'static str> {
    let mut rest = line;
    loop {
        if let Some(quote) = open {
            let Some(end) = rest.find(quote) else {
                return open;
            };
            rest = &rest[end + quote.len()..];
            open = None;
            continue;
        }

        let start = rest.find(|c: char| c == '#' || c == '"' || c == '\'')?;
        rest = &rest[start..];
        if rest.starts_with('#') {
            return None;
        }
        if let Some(quote) = TRIPLE_QUOTES.into_iter().find(|q| rest.starts_with(q)) {
            open = Some(quote);
            rest = &rest[quote.len()..];
            continue;
        }

        let delimiter = rest.as_bytes()[0];
        rest = &rest[1..];
        let mut escaped = false;
        let close = rest.bytes().position(|b| {
            if escaped {
                escaped = false;
                false
            } else if b == b'\\' {
                escaped = true;
                false
            } else {
                b == delimiter
            }
        })?;
        rest = &rest[close + 1..];
    }
}

fn parse_def(line: &str) -> Option<String> {
    if line.starts_with(char::is_whitespace) {
        return None;
    }

    let rest = match line.strip_prefix("async") {
        Some(after) if after.starts_with(char::is_whitespace) => after.trim_start(),
        _ => line,
    };
    let rest = rest.strip_prefix("def")?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }

    let rest = rest.trim_start();
    let end = rest.find(|c: char| c == '(' || c.is_whitespace())?;
    let name = &rest[..end];
    is_identifier(name).then(|| name.to_string())
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first == '_' || first.is_alphabetic() => {
            chars.all(|c| c == '_' || c.is_alphanumeric())
        }
        _ => false,
    }
}

/// `from __future__` imports must stay first in the module
fn split_future_imports(code: &str) -> (String, String) {
    let mut hoisted = String::new();
    let mut body = String::with_capacity(code.len());
    for line in code.lines() {
        if line.starts_with("from __future__ import") {
            hoisted.push_str(line);
            hoisted.push('\n');
        } else {
            body.push_str(line);
            body.push('\n');
        }
    }
    (hoisted, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_first_definition_wins() {
        let code = "def helper(x):\n    return x\n\ndef solution(x):\n    return helper(x) * 2\n";
        let builder = HarnessBuilder::new(code);
        assert_eq!(builder.resolve_entry_point().unwrap(), "helper");
    }

    #[test]
    fn test_no_function_found() {
        let builder = HarnessBuilder::new("x = 1\nprint(x)\n");
        let err = builder.build_local().unwrap_err();
        assert!(matches!(err, GradeError::NoFunctionFound { expected: None }));
    }

    #[test]
    fn test_nested_and_method_definitions_are_skipped() {
        let code = "class Solver:\n    def solve(self, x):\n        def inner():\n            pass\n        return x\n\ndef solution(x):\n    return Solver().solve(x)\n";
        assert_eq!(top_level_functions(code), vec!["solution"]);
    }

    #[test]
    fn test_decorated_and_async_definitions() {
        let code = "import functools\n\n@functools.lru_cache(None)\ndef fib(n):\n    return n if n < 2 else fib(n - 1) + fib(n - 2)\n\nasync def later():\n    pass\n";
        assert_eq!(top_level_functions(code), vec!["fib", "later"]);
    }

    #[test]
    fn test_multiline_signature() {
        let code = "def solution(\n    a,\n    b,\n):\n    return a + b\n";
        assert_eq!(top_level_functions(code), vec!["solution"]);
    }

    #[test]
    fn test_definitions_inside_docstrings_are_ignored() {
        let code = "\"\"\"Module docs.\n\ndef fake(x):\n    pass\n\"\"\"\n\ndef real(x):\n    return x\n";
        assert_eq!(top_level_functions(code), vec!["real"]);
    }

    #[test]
    fn test_triple_quotes_in_comments_and_literals_are_ignored() {
        let code = "s = '\"\"\"'\n# use ''' here\nt = \"it\\\"s '''\"\n\ndef solution(x):\n    return x\n";
        assert_eq!(top_level_functions(code), vec!["solution"]);

        let code = "x = 1  # \"\"\"\ndoc = \"\"\"one line\"\"\"\ndef first(x):\n    return x\n";
        assert_eq!(top_level_functions(code), vec!["first"]);
    }

    #[test]
    fn test_non_definitions_are_not_matched() {
        let code = "define = 1\ndefault(x)\ndef\ndef 1bad(x):\n    pass\n";
        assert!(top_level_functions(code).is_empty());
    }

    #[test]
    fn test_explicit_entry_point() {
        let code = "def helper(x):\n    return x\n\ndef solution(x):\n    return x\n";
        let builder = HarnessBuilder::new(code).entry_point(Some("solution"));
        assert_eq!(builder.resolve_entry_point().unwrap(), "solution");

        let builder = HarnessBuilder::new(code).entry_point(Some("missing"));
        assert!(matches!(
            builder.resolve_entry_point(),
            Err(GradeError::NoFunctionFound { expected: Some(ref n) }) if n == "missing"
        ));
    }

    #[test]
    fn test_local_harness_contains_code_verbatim() {
        let code = "def solution(x):\n    print('debug')\n    return x * 2\n";
        let harness = HarnessBuilder::new(code).build_local().unwrap();

        assert_eq!(harness.entry_point, "solution");
        assert!(harness.source.contains(code));
        assert!(harness.source.contains(r#"globals()["solution"]"#));
        assert!(harness.source.contains("if False and isinstance"));
        assert!(harness.source.contains("_grader_sys.argv[1]"));
        // stdout is swapped before the candidate code runs
        let swap = harness.source.find("_grader_sys.stdout = _grader_sys.stderr").unwrap();
        let body = harness.source.find(code).unwrap();
        assert!(swap < body);
    }

    #[test]
    fn test_batch_harness_embeds_cases_as_base64() {
        let code = "def solution(a, b):\n    return a + b\n";
        let cases = vec![
            TestCase::new(json!([1, "\"\"\"); import os"]), None),
            TestCase::new(json!([3, 4]), Some(json!(7))),
        ];
        let harness = HarnessBuilder::new(code)
            .argument_style(ArgumentStyle::Spread)
            .entry_point(Some(REMOTE_ENTRY_POINT))
            .build_batch(&cases)
            .unwrap();

        assert!(!harness.source.contains("import os"));
        assert!(!harness.source.contains("__CASES__"));
        assert!(harness.source.contains("if True and isinstance"));

        let expected = general_purpose::STANDARD
            .encode(json!([{"input": cases[0].input}, {"input": cases[1].input}]).to_string());
        assert!(harness.source.contains(&expected));
    }

    #[test]
    fn test_future_imports_are_hoisted() {
        let code = "from __future__ import annotations\n\ndef solution(x: int) -> int:\n    return x\n";
        let harness = HarnessBuilder::new(code).build_local().unwrap();
        assert!(harness.source.starts_with("from __future__ import annotations\n"));
        assert_eq!(harness.source.matches("from __future__").count(), 1);
    }

    #[test]
    fn test_parse_single_document() {
        let doc: Option<HarnessDocument> =
            parse_document("{\"status\": \"success\", \"output\": [1, 2]}\n");
        assert_eq!(doc, Some(HarnessDocument::Success { output: json!([1, 2]) }));

        let doc: Option<HarnessDocument> =
            parse_document(r#"{"status": "error", "error": "division by zero", "trace": "Traceback"}"#);
        let result: ExecutionResult = doc.unwrap().into();
        assert_eq!(
            result,
            ExecutionResult::RuntimeFailure {
                message: "division by zero".to_string(),
                trace: Some("Traceback".to_string()),
            }
        );
    }

    #[test]
    fn test_none_output_is_null() {
        let doc: Option<HarnessDocument> = parse_document(r#"{"status": "success", "output": null}"#);
        assert_eq!(doc, Some(HarnessDocument::Success { output: Value::Null }));
    }

    #[test]
    fn test_parse_rejects_other_shapes() {
        assert_eq!(parse_document::<HarnessDocument>(""), None);
        assert_eq!(parse_document::<HarnessDocument>("   \n"), None);
        assert_eq!(parse_document::<HarnessDocument>("hello"), None);
        assert_eq!(parse_document::<HarnessDocument>(r#"{"output": 1}"#), None);
        assert_eq!(
            parse_document::<HarnessDocument>(
                "{\"status\": \"success\", \"output\": 1}\n{\"status\": \"success\", \"output\": 2}\n"
            ),
            None
        );
        assert_eq!(
            parse_document::<HarnessDocument>(r#"{"status": "success", "output": 1} trailing"#),
            None
        );
    }

    #[test]
    fn test_case_payload() {
        let case = TestCase::new(json!([[1, 2], [3, 4]]), Some(json!(10)));
        let payload: serde_json::Value = serde_json::from_str(&case_payload(&case)).unwrap();
        assert_eq!(payload, json!({"input": [[1, 2], [3, 4]]}));
    }
}
