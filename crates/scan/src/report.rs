use std::fmt::{Display, Formatter, Result as FmtResult};

/// Which stage of a scrape a problem was recorded in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    Retrieve,
    Scan,
    Metadata,
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(match self {
            Phase::Retrieve => "retrieve",
            Phase::Scan => "scan",
            Phase::Metadata => "metadata",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Recorded, but the resource is still usable.
    Warning,
    Error,
}

/// An error or warning, tagged with where it happened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Problem {
    /// The error itself, rendered.
    pub error: String,
    pub phase: Phase,
    /// What was being done, and to what.
    pub explanation: String,
    pub severity: Severity,
}

impl Problem {
    pub fn warning(phase: Phase, error: impl Display, explanation: impl Into<String>) -> Self {
        Self { error: error.to_string(), phase, explanation: explanation.into(), severity: Severity::Warning }
    }

    pub fn error(phase: Phase, error: impl Display, explanation: impl Into<String>) -> Self {
        Self { error: error.to_string(), phase, explanation: explanation.into(), severity: Severity::Error }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl Display for Problem {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let severity = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "[{}] {severity}: {} ({})", self.phase, self.error, self.explanation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn problem_display() {
        let problem = Problem::warning(Phase::Metadata, "no name", "cookbooks/apache");
        assert_eq!(problem.to_string(), "[metadata] warning: no name (cookbooks/apache)");
        assert!(!problem.is_error());
        assert!(Problem::error(Phase::Retrieve, "git unavailable", "https://example.com/x.git").is_error());
    }
}
