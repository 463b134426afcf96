use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EmuError {
    /// Recoverable: the name is not bound in any scope or registry.
    #[error("Undefined variable: {0}")]
    UndefinedVariable(String),
    /// An error raised by the emulated program, routed through the error state machine.
    #[error("Runtime error {number}: {message}")]
    Runtime { number: i32, message: String },
    #[error("Maximum call depth exceeded ({depth})")]
    RecursionLimit { depth: usize },
    #[error("Execution timed out")]
    Timeout,
}

impl EmuError {
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            number: 5,
            message: message.into(),
        }
    }

    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Self::Runtime {
            number: 13,
            message: message.into(),
        }
    }

    pub fn subscript_out_of_range(message: impl Into<String>) -> Self {
        Self::Runtime {
            number: 9,
            message: message.into(),
        }
    }

    pub fn out_of_memory(message: impl Into<String>) -> Self {
        Self::Runtime {
            number: 7,
            message: message.into(),
        }
    }

    pub fn out_of_string_space(message: impl Into<String>) -> Self {
        Self::Runtime {
            number: 14,
            message: message.into(),
        }
    }

    pub fn division_by_zero() -> Self {
        Self::Runtime {
            number: 11,
            message: "Division by zero".to_string(),
        }
    }

    /// Resource exhaustion aborts the whole run and is never handled by emulated code.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::RecursionLimit { .. } | Self::Timeout)
    }

    /// VBA `Err.Number` for this error.
    pub fn number(&self) -> i32 {
        match self {
            Self::UndefinedVariable(_) => 424,
            Self::Runtime { number, .. } => *number,
            Self::RecursionLimit { .. } => 28,
            Self::Timeout => 18,
        }
    }
}
