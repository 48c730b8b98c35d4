use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeError {
    pub message: String,
    /// Innermost function first.
    pub call_stack: Vec<String>,
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "runtime error: {}", self.message)?;

        if !self.call_stack.is_empty() {
            write!(f, "\n  call stack:")?;

            for (i, frame) in self.call_stack.iter().rev().enumerate() {
                write!(f, "\n    {}: {}", i, frame)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}

impl RuntimeError {
    pub fn new(msg: &str) -> Self {
        RuntimeError {
            message: msg.to_string(),
            call_stack: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: &str) -> Self {
        self.call_stack.push(context.to_string());
        self
    }
}

pub fn division_by_zero() -> RuntimeError {
    RuntimeError::new("division by zero")
}

pub fn stack_underflow(needed: usize, had: usize) -> RuntimeError {
    RuntimeError::new(&format!(
        "stack underflow: needed {} words, had {}",
        needed, had
    ))
}

pub fn index_out_of_bounds(index: i32, len: u32) -> RuntimeError {
    RuntimeError::new(&format!(
        "index {} out of range for array of {}",
        index, len
    ))
}

pub fn bad_address(addr: u32, len: usize) -> RuntimeError {
    RuntimeError::new(&format!(
        "memory access of {} bytes at {:#x} outside of RAM",
        len, addr
    ))
}

/// Failures of a host-initiated function call, as opposed to faults inside
/// the script.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VmError {
    #[error("invalid bind point {0}")]
    InvalidBindPoint(i32),

    #[error("state was not initialized by this assembly; run it first")]
    StateNotReady,

    #[error("input is {got} bytes, function expects {expected}")]
    InputSizeMismatch { expected: usize, got: usize },

    #[error("output is {got} bytes, function returns {expected}")]
    OutputSizeMismatch { expected: usize, got: usize },

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_stack_prints_outermost_last() {
        let err = RuntimeError::new("boom").with_context("Inner").with_context("Outer");
        let text = err.to_string();
        assert!(text.starts_with("runtime error: boom"));
        let outer = text.find("0: Outer").unwrap();
        let inner = text.find("1: Inner").unwrap();
        assert!(outer < inner, "text was: {}", text);
    }

    #[test]
    fn test_vm_error_wraps_runtime() {
        let err: VmError = division_by_zero().into();
        assert_eq!(err.to_string(), "runtime error: division by zero");
    }
}
