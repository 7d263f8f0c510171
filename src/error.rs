use thiserror::Error;

/// Errors raised while turning VeLa source into a value.
///
/// Parse errors are always reported before any part of the source is
/// evaluated. Evaluation errors propagate out of the innermost call to
/// whoever asked for the evaluation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VelaError {
    #[error("parse error at {line}:{column}: {message}")]
    Parse {
        message: String,
        line: usize,
        column: usize,
    },

    #[error("{0}")]
    Eval(String),
}

impl VelaError {
    pub fn parse(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self::Parse { message: message.into(), line, column }
    }

    pub fn eval(message: impl Into<String>) -> Self {
        Self::Eval(message.into())
    }

    /// Name of the error kind, as used by the fixture files
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "ParseError",
            Self::Eval(_) => "EvalError",
        }
    }
}

pub type Result<T> = std::result::Result<T, VelaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_carries_position() {
        let error = VelaError::parse("unexpected '='", 2, 7);
        assert_eq!(error.to_string(), "parse error at 2:7: unexpected '='");
        assert_eq!(error.kind(), "ParseError");
    }

    #[test]
    fn eval_error_is_the_message() {
        let error = VelaError::eval("42/0: division by zero error");
        assert_eq!(error.to_string(), "42/0: division by zero error");
        assert_eq!(error.kind(), "EvalError");
    }
}
