// Analysis Errors - argument validation failures raised by the analytics layer

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl AnalysisError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        AnalysisError::InvalidArgument(msg.into())
    }
}

pub type AnalysisResult<T> = Result<T, AnalysisError>;

/// Reject a zero period or window
pub fn ensure_positive(name: &str, value: usize) -> AnalysisResult<()> {
    if value == 0 {
        return Err(AnalysisError::invalid(format!("{} must be > 0", name)));
    }
    Ok(())
}

/// Reject high/low/close slices of differing lengths
pub fn ensure_same_len(high: &[f64], low: &[f64], close: &[f64]) -> AnalysisResult<()> {
    if high.len() != low.len() || low.len() != close.len() {
        return Err(AnalysisError::invalid(format!(
            "high, low, close must have same length (got {}, {}, {})",
            high.len(),
            low.len(),
            close.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guards() {
        assert!(ensure_positive("period", 1).is_ok());
        assert_eq!(
            ensure_positive("period", 0),
            Err(AnalysisError::InvalidArgument("period must be > 0".to_string()))
        );
        assert!(ensure_same_len(&[1.0], &[1.0], &[1.0]).is_ok());
        assert!(ensure_same_len(&[1.0, 2.0], &[1.0], &[1.0]).is_err());
    }
}
