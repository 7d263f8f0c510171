use std::{cell::RefCell, io::{BufRead, Write}, path::{Path, PathBuf}, rc::Rc};

use anyhow::bail;
use itertools::Itertools;
use serde::{de::{Visitor, Error}, Deserialize, Serialize};

use crate::operand::Operand;

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TestOutput {
    Nothing(()), // The program produced no value
    Boolean(bool),
    Integer(i64),
    Real(f64),
    String(String),
    List(Vec<TestOutput>)
}

/// Either the expected value or the kind of the expected error
#[derive(Debug)]
pub struct EvaluationResult(Result<TestOutput, String>);

impl From<EvaluationResult> for Result<TestOutput, String> {
    fn from(value: EvaluationResult) -> Self {
        value.0
    }
}

impl<'de> Deserialize<'de> for EvaluationResult {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where
            D: serde::Deserializer<'de> {

        deserializer.deserialize_map(EvaluationResultVisitor)
    }
}

struct EvaluationResultVisitor;

impl<'de> Visitor<'de> for EvaluationResultVisitor {
    type Value = EvaluationResult;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(formatter, "an object with 'ok' and either 'output' or 'type'")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: serde::de::MapAccess<'de>, {

        let mut ok: Option<bool> = None;
        let mut output: Option<TestOutput> = None;
        let mut kind: Option<String> = None;

        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "ok" if ok.is_none() => ok = Some(map.next_value()?),
                "output" if output.is_none() => output = Some(map.next_value()?),
                "type" if kind.is_none() => kind = Some(map.next_value()?),
                other => return Err(A::Error::custom(format!("unexpected or repeated key '{}'", other))),
            }
        }

        match (ok, output, kind) {
            (Some(true), Some(output), None) => Ok(EvaluationResult(Ok(output))),
            (Some(false), None, Some(kind)) if kind == "ParseError" || kind == "EvalError" => {
                Ok(EvaluationResult(Err(kind)))
            }
            (Some(false), None, Some(kind)) => Err(A::Error::custom(format!("Unrecognized VeLa error: {}", kind))),
            _ => Err(A::Error::custom("'ok: true' needs 'output', 'ok: false' needs 'type'")),
        }
    }
}

/// Reals compare with a tolerance, everything else exactly
pub fn output_matches(expected: &TestOutput, actual: Option<&Operand>) -> bool {
    match (expected, actual) {
        (TestOutput::Nothing(()), None) => true,
        (TestOutput::Boolean(a), Some(Operand::Boolean(b))) => a == b,
        (TestOutput::Integer(a), Some(Operand::Integer(b))) => a == b,
        (TestOutput::Real(a), Some(Operand::Real(b))) => (a - b).abs() <= 1e-9 * a.abs().max(1.0),
        (TestOutput::String(a), Some(Operand::String(b))) => a == b,
        (TestOutput::List(a), Some(Operand::List(b))) => {
            a.len() == b.len() && a.iter().zip(b.iter()).all(|(a, b)| output_matches(a, Some(b)))
        }
        _ => false,
    }
}

/// An output sink the test can read back after handing a clone to the interpreter
#[derive(Clone, Default)]
pub struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn load_input_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Vec<String>> {
    let source = std::fs::read(path)?;
    Ok(source.lines().collect::<Result<Vec<String>, _>>()?)
}

fn load_output_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Vec<EvaluationResult>> {
    let source = std::fs::read(path)?;
    let result: Vec<EvaluationResult> = serde_json::from_slice(&source)?;
    Ok(result)
}

/// Each line of `test_inputs/NAME.vela` is one program, checked against the
/// entry at the same index of `test_outputs/NAME.json`
pub fn load_test_pair(testcase: &str) -> anyhow::Result<Vec<(String, EvaluationResult)>> {
    let base_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let input = load_input_file(base_path.join("test_inputs").join(format!("{}.vela", testcase)))?;
    let output = load_output_file(base_path.join("test_outputs").join(format!("{}.json", testcase)))?;

    if input.len() != output.len() { bail!("Input and output of testcase {} do not match", testcase); }
    Ok(input.into_iter().zip(output.into_iter()).collect_vec())
}

pub fn all_testcases() -> impl Iterator<Item = &'static str> {
    [
        "arithmetic",
        "strings",
        "lists",
        "bindings",
        "selection",
        "functions",
        "closures",
        "recursion",
        "intrinsics",
        "stdlib",
        "errors",
    ].into_iter()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_expected_results() {
        let parsed: Vec<EvaluationResult> = serde_json::from_str(
            r#"[{"ok": true, "output": null}, {"output": [1, "a"], "ok": true}, {"ok": false, "type": "EvalError"}]"#
        ).unwrap();
        let parsed = parsed.into_iter().map(Result::<TestOutput, String>::from).collect_vec();

        assert!(matches!(parsed[0], Ok(TestOutput::Nothing(()))));
        assert!(matches!(&parsed[1], Ok(TestOutput::List(items)) if items.len() == 2));
        assert_eq!(parsed[2].as_ref().unwrap_err(), "EvalError");
    }

    #[test]
    fn rejects_malformed_results() {
        assert!(serde_json::from_str::<EvaluationResult>(r#"{"ok": true}"#).is_err());
        assert!(serde_json::from_str::<EvaluationResult>(r#"{"ok": false, "type": "NameError"}"#).is_err());
        assert!(serde_json::from_str::<EvaluationResult>(r#"{"ok": true, "output": 1, "type": "EvalError"}"#).is_err());
    }

    #[test]
    fn compares_nested_values() {
        let expected: TestOutput = serde_json::from_str(r#"[1, 2.5, "a", [true]]"#).unwrap();
        let actual = Operand::list(vec![
            Operand::Integer(1),
            Operand::Real(2.5 + 1e-12),
            Operand::string("a"),
            Operand::list(vec![Operand::Boolean(true)]),
        ]);
        assert!(output_matches(&expected, Some(&actual)));
        assert!(!output_matches(&TestOutput::Integer(2), Some(&Operand::Real(2.0))));
        assert!(output_matches(&TestOutput::Nothing(()), None));
    }
}
