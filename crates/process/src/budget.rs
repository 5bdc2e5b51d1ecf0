use std::time::Duration;

/// Space and time ceiling for a supervised process.
///
/// Both limits are optional; an absent limit is unlimited. The budget is
/// owned by the caller and only ever read by the supervisor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Budget {
    /// Maximum cumulative size, in bytes, of the watched directory.
    pub max_bytes: Option<u64>,
    /// Maximum wall-clock time the process may run for.
    pub max_duration: Option<Duration>,
}

impl Budget {
    /// A budget with no limits at all.
    #[must_use]
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Build a budget from raw, possibly negative, limits as they appear in
    /// configuration files. Absent or negative values mean "unlimited".
    #[must_use]
    pub fn from_limits(max_bytes: Option<i64>, max_seconds: Option<i64>) -> Self {
        Self {
            max_bytes: max_bytes.and_then(|b| u64::try_from(b).ok()),
            max_duration: max_seconds.and_then(|s| u64::try_from(s).ok()).map(Duration::from_secs),
        }
    }

    #[must_use]
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    #[must_use]
    pub fn with_max_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration = Some(max_duration);
        self
    }

    /// Whether `bytes` is over the byte limit (never, when unlimited).
    #[must_use]
    pub fn exceeds_bytes(&self, bytes: u64) -> bool {
        self.max_bytes.is_some_and(|max| bytes > max)
    }

    /// Whether `elapsed` is over the time limit (never, when unlimited).
    #[must_use]
    pub fn exceeds_duration(&self, elapsed: Duration) -> bool {
        self.max_duration.is_some_and(|max| elapsed > max)
    }
}
