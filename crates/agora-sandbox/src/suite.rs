//! Declarative acceptance-suite runner and criteria validation.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use agora_core::canonical::canonical_json;
use agora_core::config::SandboxConfig;
use agora_core::constants::MAX_TESTS_PER_SUITE;
use agora_core::MarketError;

use crate::expr::{evaluate_assertion, validate_expression};
use crate::schema;
use crate::script::{SandboxResult, ScriptSpec};

const KNOWN_TEST_TYPES: &[&str] = &[
    "json_schema",
    "count_gte",
    "count_lte",
    "contains",
    "latency_lte",
    "http_status",
    "checksum",
    "assertion",
];

/// How a job's acceptance criteria are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationMode {
    /// Base64 script executed in the isolated worker.
    Script,
    /// In-process typed test suite.
    Declarative,
    /// No criteria; verification auto-completes.
    None,
}

pub fn mode_of(criteria: Option<&Value>) -> VerificationMode {
    match criteria {
        Some(c) if c.get("script").is_some() => VerificationMode::Script,
        Some(c) if c.get("tests").is_some() => VerificationMode::Declarative,
        _ => VerificationMode::None,
    }
}

// ── Results ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestOutcome {
    pub test_id: String,
    pub passed: bool,
    pub message: String,
}

impl TestOutcome {
    fn pass(test_id: &str, message: impl Into<String>) -> Self {
        Self { test_id: test_id.to_string(), passed: true, message: message.into() }
    }

    fn fail(test_id: &str, message: impl Into<String>) -> Self {
        Self { test_id: test_id.to_string(), passed: false, message: message.into() }
    }
}

/// Uniform verification report: one row per test (scripts get a single
/// synthetic row), the threshold that was applied and the execution trace
/// where one exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteReport {
    pub passed: bool,
    pub threshold: Value,
    pub results: Vec<TestOutcome>,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<SandboxResult>,
}

impl SuiteReport {
    pub fn from_results(threshold: Value, results: Vec<TestOutcome>) -> Self {
        let passed_count = results.iter().filter(|r| r.passed).count();
        let passed = threshold_met(&threshold, passed_count, results.len());
        let summary = format!("{passed_count}/{} passed", results.len());
        Self { passed, threshold, results, summary, sandbox: None }
    }

    /// Wrap a script run: a single synthetic test row plus the truncated
    /// execution trace.
    pub fn from_sandbox(result: SandboxResult) -> Self {
        let message = if result.passed {
            let mut m = result.stdout.clone();
            m.truncate(500);
            m
        } else if let Some(err) = &result.error {
            err.clone()
        } else {
            let mut m = result.stderr.clone();
            m.truncate(500);
            m
        };
        let outcome = TestOutcome {
            test_id: "script".to_string(),
            passed: result.passed,
            message,
        };
        Self {
            passed: result.passed,
            threshold: Value::String("all".into()),
            results: vec![outcome],
            summary: if result.passed { "1/1 passed".into() } else { "0/1 passed".into() },
            sandbox: Some(result.surfaced()),
        }
    }
}

fn threshold_met(threshold: &Value, passed: usize, total: usize) -> bool {
    if total == 0 {
        return true;
    }
    match threshold {
        Value::String(s) if s == "majority" => passed * 2 > total,
        Value::Object(map) => match map.get("min_pass").and_then(Value::as_u64) {
            Some(min) => passed as u64 >= min,
            None => passed == total,
        },
        // "all" and anything unrecognized default to all.
        _ => passed == total,
    }
}

// ── Criteria validation (proposal time) ──────────────────────────────────────

/// Validate acceptance criteria when a job is proposed, so malformed suites
/// and scripts are rejected before any money moves.
pub fn validate_criteria(criteria: &Value, sandbox_cfg: &SandboxConfig) -> Result<(), MarketError> {
    match mode_of(Some(criteria)) {
        VerificationMode::Script => {
            ScriptSpec::from_criteria(criteria, sandbox_cfg)?;
            Ok(())
        }
        VerificationMode::Declarative => validate_declarative(criteria),
        VerificationMode::None => Ok(()),
    }
}

fn validate_declarative(criteria: &Value) -> Result<(), MarketError> {
    let tests = criteria
        .get("tests")
        .and_then(Value::as_array)
        .ok_or_else(|| MarketError::Validation("'tests' must be an array".into()))?;
    if tests.len() > MAX_TESTS_PER_SUITE {
        return Err(MarketError::Validation(format!(
            "Maximum {MAX_TESTS_PER_SUITE} tests per suite"
        )));
    }
    if let Some(threshold) = criteria.get("pass_threshold") {
        let valid = match threshold {
            Value::String(s) => s == "all" || s == "majority",
            Value::Object(map) => map.get("min_pass").and_then(Value::as_u64).is_some(),
            _ => false,
        };
        if !valid {
            return Err(MarketError::Validation(
                "pass_threshold must be \"all\", \"majority\" or {\"min_pass\": N}".into(),
            ));
        }
    }
    for (i, test) in tests.iter().enumerate() {
        let test_type = test
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| MarketError::Validation(format!("tests[{i}] is missing 'type'")))?;
        if !KNOWN_TEST_TYPES.contains(&test_type) {
            return Err(MarketError::Validation(format!("Unknown test type: {test_type}")));
        }
        if test_type == "assertion" {
            let expression = test
                .get("params")
                .and_then(|p| p.get("expression"))
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    MarketError::Validation(format!("tests[{i}] assertion needs params.expression"))
                })?;
            validate_expression(expression)
                .map_err(|e| MarketError::Validation(format!("tests[{i}]: {e}")))?;
        }
    }
    Ok(())
}

// ── Suite execution ──────────────────────────────────────────────────────────

/// Run a declarative acceptance suite against a deliverable.
pub fn run_suite(criteria: &Value, output: &Value) -> Result<SuiteReport, MarketError> {
    let tests = criteria
        .get("tests")
        .and_then(Value::as_array)
        .ok_or_else(|| MarketError::Validation("'tests' must be an array".into()))?;
    if tests.len() > MAX_TESTS_PER_SUITE {
        return Err(MarketError::Validation(format!(
            "Maximum {MAX_TESTS_PER_SUITE} tests per suite"
        )));
    }
    let threshold = criteria
        .get("pass_threshold")
        .cloned()
        .unwrap_or_else(|| Value::String("all".into()));

    let empty = Value::Object(serde_json::Map::new());
    let mut results = Vec::with_capacity(tests.len());
    for test in tests {
        let test_id = test.get("test_id").and_then(Value::as_str).unwrap_or("unknown");
        let test_type = test.get("type").and_then(Value::as_str).unwrap_or("");
        let params = test.get("params").unwrap_or(&empty);
        results.push(run_test(test_id, test_type, params, output));
    }
    Ok(SuiteReport::from_results(threshold, results))
}

fn run_test(test_id: &str, test_type: &str, params: &Value, output: &Value) -> TestOutcome {
    match test_type {
        "json_schema" => run_json_schema(test_id, params, output),
        "count_gte" => run_count(test_id, params, output, true),
        "count_lte" => run_count(test_id, params, output, false),
        "contains" => run_contains(test_id, params, output),
        "latency_lte" => run_latency(test_id, params, output),
        "http_status" => run_http_status(test_id, params, output),
        "checksum" => run_checksum(test_id, params, output),
        "assertion" => run_assertion(test_id, params, output),
        other => TestOutcome::fail(test_id, format!("Unknown test type: {other}")),
    }
}

fn run_json_schema(test_id: &str, params: &Value, output: &Value) -> TestOutcome {
    let Some(schema) = params.get("schema") else {
        return TestOutcome::fail(test_id, "missing params.schema");
    };
    match schema::validate(schema, output) {
        Ok(()) => TestOutcome::pass(test_id, ""),
        Err(mut e) => {
            e.truncate(200);
            TestOutcome::fail(test_id, e)
        }
    }
}

/// Resolve a simple JSON path: `$`, `.field` and `[index]` segments.
fn resolve_jsonpath<'a>(data: &'a Value, path: &str) -> Result<&'a Value, String> {
    if path == "$" {
        return Ok(data);
    }
    let re = Regex::new(r"\.(\w+)|\[(\d+)\]").expect("static jsonpath pattern");
    let mut current = data;
    for cap in re.captures_iter(path.trim_start_matches('$')) {
        if let Some(field) = cap.get(1) {
            current = current
                .get(field.as_str())
                .ok_or_else(|| format!("missing field '{}'", field.as_str()))?;
        } else if let Some(index) = cap.get(2) {
            let i: usize = index.as_str().parse().map_err(|_| "bad index".to_string())?;
            current = current.get(i).ok_or_else(|| format!("index {i} out of range"))?;
        }
    }
    Ok(current)
}

fn run_count(test_id: &str, params: &Value, output: &Value, gte: bool) -> TestOutcome {
    let path = params.get("path").and_then(Value::as_str).unwrap_or("$");
    let target = match resolve_jsonpath(output, path) {
        Ok(v) => v,
        Err(e) => return TestOutcome::fail(test_id, e),
    };
    let Some(items) = target.as_array() else {
        return TestOutcome::fail(test_id, "Target is not an array");
    };
    let count = items.len() as u64;
    if gte {
        let Some(min) = params.get("min_count").and_then(Value::as_u64) else {
            return TestOutcome::fail(test_id, "missing params.min_count");
        };
        if count >= min {
            TestOutcome::pass(test_id, format!("Count {count} >= {min}"))
        } else {
            TestOutcome::fail(test_id, format!("Count {count} < {min}"))
        }
    } else {
        let Some(max) = params.get("max_count").and_then(Value::as_u64) else {
            return TestOutcome::fail(test_id, "missing params.max_count");
        };
        if count <= max {
            TestOutcome::pass(test_id, format!("Count {count} <= {max}"))
        } else {
            TestOutcome::fail(test_id, format!("Count {count} > {max}"))
        }
    }
}

fn run_contains(test_id: &str, params: &Value, output: &Value) -> TestOutcome {
    let pattern = params.get("pattern").and_then(Value::as_str).unwrap_or("");
    let is_regex = params.get("is_regex").and_then(Value::as_bool).unwrap_or(false);
    let haystack = match output {
        Value::String(s) => s.clone(),
        other => canonical_json(other),
    };
    if is_regex {
        match Regex::new(pattern) {
            Ok(re) if re.is_match(&haystack) => TestOutcome::pass(test_id, ""),
            Ok(_) => TestOutcome::fail(test_id, format!("Pattern '{pattern}' not found")),
            Err(e) => TestOutcome::fail(test_id, format!("Bad pattern: {e}")),
        }
    } else if haystack.contains(pattern) {
        TestOutcome::pass(test_id, "")
    } else {
        TestOutcome::fail(test_id, format!("Substring '{pattern}' not found"))
    }
}

fn run_latency(test_id: &str, params: &Value, output: &Value) -> TestOutcome {
    let actual = params.get("actual_seconds").and_then(Value::as_f64).or_else(|| {
        let meta = output.get("_delivery_meta")?;
        let started = meta.get("started_at")?.as_str()?;
        let delivered = meta.get("delivered_at")?.as_str()?;
        let started = chrono::DateTime::parse_from_rfc3339(started).ok()?;
        let delivered = chrono::DateTime::parse_from_rfc3339(delivered).ok()?;
        Some((delivered - started).num_milliseconds() as f64 / 1_000.0)
    });
    let Some(actual) = actual else {
        return TestOutcome::fail(test_id, "Cannot determine delivery latency");
    };
    let Some(max_seconds) = params.get("max_seconds").and_then(Value::as_f64) else {
        return TestOutcome::fail(test_id, "missing params.max_seconds");
    };
    if actual <= max_seconds {
        TestOutcome::pass(test_id, format!("Latency {actual}s <= {max_seconds}s"))
    } else {
        TestOutcome::fail(test_id, format!("Latency {actual}s > {max_seconds}s"))
    }
}

fn run_http_status(test_id: &str, params: &Value, output: &Value) -> TestOutcome {
    let expected = params.get("expected_status").and_then(Value::as_i64).unwrap_or(200);
    let actual = output
        .get("http_status")
        .or_else(|| output.get("status_code"))
        .and_then(Value::as_i64);
    match actual {
        Some(actual) if actual == expected => {
            TestOutcome::pass(test_id, format!("HTTP status {actual} == {expected}"))
        }
        Some(actual) => TestOutcome::fail(test_id, format!("HTTP status {actual} != {expected}")),
        None => TestOutcome::fail(test_id, "No http_status or status_code in output"),
    }
}

fn run_checksum(test_id: &str, params: &Value, output: &Value) -> TestOutcome {
    let expected = params.get("expected_hash").and_then(Value::as_str).unwrap_or("");
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(output).as_bytes());
    let actual = hex::encode(hasher.finalize());
    if actual == expected {
        TestOutcome::pass(test_id, "")
    } else {
        let shown_actual: String = actual.chars().take(16).collect();
        let shown_expected: String = expected.chars().take(16).collect();
        TestOutcome::fail(test_id, format!("Hash mismatch: {shown_actual}... != {shown_expected}..."))
    }
}

fn run_assertion(test_id: &str, params: &Value, output: &Value) -> TestOutcome {
    let Some(expression) = params.get("expression").and_then(Value::as_str) else {
        return TestOutcome::fail(test_id, "missing params.expression");
    };
    match evaluate_assertion(expression, output) {
        Ok(true) => TestOutcome::pass(test_id, ""),
        Ok(false) => TestOutcome::fail(test_id, format!("Assertion failed: {expression}")),
        Err(e) => TestOutcome::fail(test_id, format!("Assertion error: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn records(n: usize) -> Value {
        let items: Vec<Value> = (0..n).map(|i| json!({"id": i, "name": format!("r{i}")})).collect();
        json!({ "records": items })
    }

    fn sample_suite() -> Value {
        json!({
            "pass_threshold": "all",
            "tests": [
                {
                    "test_id": "shape",
                    "type": "json_schema",
                    "params": {"schema": {
                        "type": "object",
                        "required": ["records"],
                        "properties": {"records": {"type": "array"}}
                    }}
                },
                {
                    "test_id": "volume",
                    "type": "count_gte",
                    "params": {"path": "$.records", "min_count": 400}
                },
                {
                    "test_id": "ids",
                    "type": "assertion",
                    "params": {"expression": "len(output['records']) >= 400 and output['records'][0]['id'] == 0"}
                }
            ]
        })
    }

    #[test]
    fn full_suite_passes_on_good_deliverable() {
        let report = run_suite(&sample_suite(), &records(450)).unwrap();
        assert!(report.passed);
        assert_eq!(report.summary, "3/3 passed");
    }

    #[test]
    fn short_deliverable_fails_count_and_assertion() {
        let report = run_suite(&sample_suite(), &records(165)).unwrap();
        assert!(!report.passed);
        let failed: Vec<&str> = report
            .results
            .iter()
            .filter(|r| !r.passed)
            .map(|r| r.test_id.as_str())
            .collect();
        assert_eq!(failed, vec!["volume", "ids"]);
    }

    #[test]
    fn majority_threshold() {
        let criteria = json!({
            "pass_threshold": "majority",
            "tests": [
                {"test_id": "a", "type": "assertion", "params": {"expression": "1 == 1"}},
                {"test_id": "b", "type": "assertion", "params": {"expression": "1 == 1"}},
                {"test_id": "c", "type": "assertion", "params": {"expression": "1 == 2"}}
            ]
        });
        assert!(run_suite(&criteria, &json!(null)).unwrap().passed);
    }

    #[test]
    fn min_pass_threshold() {
        let criteria = json!({
            "pass_threshold": {"min_pass": 1},
            "tests": [
                {"test_id": "a", "type": "assertion", "params": {"expression": "1 == 1"}},
                {"test_id": "b", "type": "assertion", "params": {"expression": "1 == 2"}}
            ]
        });
        assert!(run_suite(&criteria, &json!(null)).unwrap().passed);
    }

    #[test]
    fn checksum_and_contains() {
        let output = json!({"x": 1});
        let mut hasher = Sha256::new();
        hasher.update(canonical_json(&output).as_bytes());
        let digest = hex::encode(hasher.finalize());
        let criteria = json!({
            "tests": [
                {"test_id": "sum", "type": "checksum", "params": {"expected_hash": digest}},
                {"test_id": "has", "type": "contains", "params": {"pattern": "\"x\":1"}},
                {"test_id": "re", "type": "contains", "params": {"pattern": "x.:1", "is_regex": true}}
            ]
        });
        let report = run_suite(&criteria, &output).unwrap();
        assert!(report.passed, "{:?}", report.results);
    }

    #[test]
    fn http_status_and_latency() {
        let output = json!({
            "status_code": 200,
            "_delivery_meta": {
                "started_at": "2026-08-01T10:00:00+00:00",
                "delivered_at": "2026-08-01T10:00:30+00:00"
            }
        });
        let criteria = json!({
            "tests": [
                {"test_id": "status", "type": "http_status", "params": {"expected_status": 200}},
                {"test_id": "fast", "type": "latency_lte", "params": {"max_seconds": 60}}
            ]
        });
        assert!(run_suite(&criteria, &output).unwrap().passed);
    }

    #[test]
    fn suite_cap_enforced() {
        let tests: Vec<Value> = (0..21)
            .map(|i| json!({"test_id": format!("t{i}"), "type": "assertion", "params": {"expression": "1"}}))
            .collect();
        let criteria = json!({"tests": tests});
        assert!(run_suite(&criteria, &json!(null)).is_err());
        assert!(validate_criteria(&criteria, &SandboxConfig::default()).is_err());
    }

    #[test]
    fn validation_rejects_bad_assertion_at_proposal() {
        let criteria = json!({
            "tests": [{"test_id": "evil", "type": "assertion", "params": {"expression": "__import__('os')"}}]
        });
        assert!(validate_criteria(&criteria, &SandboxConfig::default()).is_err());
    }

    #[test]
    fn validation_rejects_unknown_type_and_bad_threshold() {
        let criteria = json!({"tests": [{"test_id": "x", "type": "telepathy"}]});
        assert!(validate_criteria(&criteria, &SandboxConfig::default()).is_err());
        let criteria = json!({"pass_threshold": 7, "tests": []});
        assert!(validate_criteria(&criteria, &SandboxConfig::default()).is_err());
    }

    #[test]
    fn mode_selection() {
        assert_eq!(mode_of(Some(&json!({"script": "AA=="}))), VerificationMode::Script);
        assert_eq!(mode_of(Some(&json!({"tests": []}))), VerificationMode::Declarative);
        assert_eq!(mode_of(Some(&json!({"notes": 1}))), VerificationMode::None);
        assert_eq!(mode_of(None), VerificationMode::None);
    }

    #[test]
    fn script_report_shape() {
        let report = SuiteReport::from_sandbox(SandboxResult {
            passed: false,
            exit_code: 1,
            stdout: String::new(),
            stderr: "records missing".into(),
            timed_out: false,
            error: None,
            elapsed_seconds: 2.5,
        });
        assert!(!report.passed);
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].test_id, "script");
        assert!(report.sandbox.is_some());
    }
}
