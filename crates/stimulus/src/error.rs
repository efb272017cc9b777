use std::fmt;

/// Stimulus errors.
#[derive(Debug)]
pub enum StimulusError {
    /// Every connection attempt was refused.
    UnreachableTarget {
        target: String,
        attempts: u32,
        last: std::io::Error,
    },
    Io(std::io::Error),
}

impl fmt::Display for StimulusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnreachableTarget {
                target,
                attempts,
                last,
            } => write!(
                f,
                "{target} unreachable after {attempts} attempts (last error: {last})"
            ),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for StimulusError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::UnreachableTarget { last, .. } => Some(last),
            Self::Io(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for StimulusError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
