//! Recovering failing test names from an opaque harness's output.
//!
//! Two output shapes are recognised:
//!
//! pytest's short test summary
//!
//! ```text
//! FAILED tests/test_hypothesis.py::test_roundtrip - AssertionError: 1 != 2
//! ```
//!
//! and unittest's failure blocks
//!
//! ```text
//! ======================================================================
//! FAIL: test_roundtrip (test_issue1.TestMpack)
//! ----------------------------------------------------------------------
//! Traceback (most recent call last):
//!   ...
//! AssertionError: 1 != 2
//! ```

use super::types::TestFailure;

/// Number of trailing output lines used as the cause when nothing is recognised.
const TAIL_LINES: usize = 20;

/// Extract failures from harness output, de-duplicated by name in order of appearance.
pub fn parse_failures(output: &str) -> Vec<TestFailure> {
  let lines: Vec<&str> = output.lines().collect();
  let mut failures: Vec<TestFailure> = Vec::new();

  let mut push = |failure: TestFailure| {
    if let Some(existing) = failures.iter_mut().find(|f| f.name == failure.name) {
      if existing.cause.is_empty() {
        existing.cause = failure.cause;
      }
    } else {
      failures.push(failure);
    }
  };

  for (idx, line) in lines.iter().enumerate() {
    let line = line.trim_end();

    if let Some(rest) = line.strip_prefix("FAILED ").or_else(|| line.strip_prefix("ERROR ")) {
      if let Some(failure) = parse_pytest_summary(rest) {
        push(failure);
      }
    } else if let Some(rest) = line.strip_prefix("FAIL: ").or_else(|| line.strip_prefix("ERROR: ")) {
      push(parse_unittest_block(rest, &lines[idx + 1..]));
    }
  }

  failures
}

/// Build the single failure reported when the harness fails without recognisable output.
pub fn fallback_failure(test_cmd: &str, code: Option<i32>, output: &str) -> TestFailure {
  let tail: Vec<&str> = output.lines().filter(|l| !l.trim().is_empty()).collect();
  let start = tail.len().saturating_sub(TAIL_LINES);
  let cause = if tail.is_empty() {
    match code {
      Some(code) => format!("exited with code {code}"),
      None => "terminated by signal".to_string(),
    }
  } else {
    tail[start..].join("\n")
  };

  TestFailure {
    name: test_cmd.to_string(),
    cause,
  }
}

/// `path::Class::test_name[param] - cause` → (`test_name[param]`, `cause`).
fn parse_pytest_summary(rest: &str) -> Option<TestFailure> {
  let (node, cause) = match rest.split_once(" - ") {
    Some((node, cause)) => (node.trim(), cause.trim()),
    None => (rest.trim(), ""),
  };
  // unittest's closing `FAILED (failures=1)` line shares the prefix.
  if node.is_empty() || node.starts_with('(') {
    return None;
  }

  // Split on the last `::` outside of parametrize brackets.
  let bracket = node.find('[').unwrap_or(node.len());
  let name = match node[..bracket].rfind("::") {
    Some(pos) => &node[pos + 2..],
    None => node,
  };

  Some(TestFailure {
    name: name.to_string(),
    cause: cause.to_string(),
  })
}

/// `test_name (module.Class)` plus the traceback that follows it.
fn parse_unittest_block(header: &str, following: &[&str]) -> TestFailure {
  let name = header.split_whitespace().next().unwrap_or(header).to_string();

  let mut cause = "";
  for line in following
    .iter()
    .skip_while(|l| l.starts_with("---"))
    .take_while(|l| !l.starts_with("===") && !l.starts_with("---"))
  {
    if !line.trim().is_empty() {
      cause = line.trim();
    }
  }

  TestFailure {
    name,
    cause: cause.to_string(),
  }
}
