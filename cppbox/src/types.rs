use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

/// A request to compile (and possibly run) one C++ source snippet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileRequest {
    /// Source text to compile
    pub code: String,
    /// Data fed to the program's standard input
    #[serde(default)]
    pub input: Option<String>,
}

impl CompileRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            input: None,
        }
    }

    /// Strict extraction from a JSON body. Absent or wrongly typed fields are
    /// rejected, never coerced.
    pub fn from_json(body: &Value) -> Result<Self, Error> {
        let code = match body.get("code") {
            Some(Value::String(code)) => code.clone(),
            Some(_) => return Err(Error::Validation("`code` must be a string".into())),
            None => return Err(Error::Validation("`code` is required".into())),
        };
        let input = match body.get("input") {
            None | Some(Value::Null) => None,
            Some(Value::String(input)) => Some(input.clone()),
            Some(_) => return Err(Error::Validation("`input` must be a string".into())),
        };

        let request = Self { code, input };
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.code.is_empty() {
            return Err(Error::Validation("`code` must not be empty".into()));
        }
        Ok(())
    }
}

/// Severity of a single compiler diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// One structured marker parsed from compiler stderr, addressed to the
/// submitted source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub line: u32,
    #[serde(rename = "col")]
    pub column: u32,
    pub severity: Severity,
    pub message: String,
}

/// Lifecycle state of one supervised execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionStatus {
    Running,
    Completed,
    TimedOut,
    Killed,
    Failed,
}

/// Final product of one supervised execution. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Exit code of the process, absent when it was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Whether the wall-clock deadline expired before the process finished
    pub timed_out: bool,
}

/// The toolchain's verdict on a rejected compilation, raw text and
/// structured markers side by side.
#[derive(Debug, Clone)]
pub struct CompileFailure {
    pub diagnostics: Vec<Diagnostic>,
    pub stdout: String,
    pub stderr: String,
    /// The compiler was killed at its deadline rather than exiting on its own
    pub timed_out: bool,
}

/// What became of a compile-and-run request that got past validation.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// The toolchain rejected the source, or ran out of time doing so
    CompileFailed(CompileFailure),
    /// The artifact was executed to a terminal state
    Executed(ExecutionResult),
}

/// What became of a compile-only request that got past validation.
#[derive(Debug, Clone)]
pub enum CompileOnly {
    /// The artifact stays on disk under this public name until a run claims
    /// it or the sweep reclaims it
    Compiled { executable: String },
    CompileFailed(CompileFailure),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_json_accepts_code_and_input() {
        let request =
            CompileRequest::from_json(&json!({"code": "int main(){}", "input": "42"})).unwrap();
        assert_eq!(request.code, "int main(){}");
        assert_eq!(request.input.as_deref(), Some("42"));
    }

    #[test]
    fn from_json_rejects_missing_or_empty_code() {
        assert!(matches!(
            CompileRequest::from_json(&json!({})),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            CompileRequest::from_json(&json!({"code": ""})),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn from_json_never_coerces_types() {
        assert!(matches!(
            CompileRequest::from_json(&json!({"code": 42})),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            CompileRequest::from_json(&json!({"code": "int main(){}", "input": 7})),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn null_input_means_absent() {
        let request =
            CompileRequest::from_json(&json!({"code": "int main(){}", "input": null})).unwrap();
        assert!(request.input.is_none());
    }

    #[test]
    fn diagnostic_serializes_with_col_key() {
        let marker = Diagnostic {
            line: 3,
            column: 7,
            severity: Severity::Warning,
            message: "unused variable".into(),
        };
        let value = serde_json::to_value(&marker).unwrap();
        assert_eq!(value, json!({
            "line": 3,
            "col": 7,
            "severity": "warning",
            "message": "unused variable",
        }));
    }
}
