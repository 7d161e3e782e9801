use std::time::Duration;

/// TTL applied when neither an explicit TTL nor a configured default is available.
pub const FALLBACK_TTL_SECS: u64 = 60;

/// Build the physical key stored on a node: `_{namespace}_{key}`.
pub fn physical_key(namespace: &str, key: &str) -> String {
    format!("_{}_{}", namespace, key)
}

/// How long an added entry should live.
///
/// Resolution order: an explicit `duration`, then an explicit `seconds`
/// count, then `use_default` which picks the provider's configured default
/// TTL (or [`FALLBACK_TTL_SECS`] when none is configured). With nothing set
/// the fallback applies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TtlSpec {
    pub duration: Option<Duration>,
    pub seconds: Option<u64>,
    pub use_default: bool,
}

impl TtlSpec {
    pub fn duration(duration: Duration) -> Self {
        Self {
            duration: Some(duration),
            ..Default::default()
        }
    }

    pub fn seconds(seconds: u64) -> Self {
        Self {
            seconds: Some(seconds),
            ..Default::default()
        }
    }

    pub fn configured_default() -> Self {
        Self {
            use_default: true,
            ..Default::default()
        }
    }

    pub fn fallback() -> Self {
        Self::default()
    }

    pub fn with_default_flag(mut self, use_default: bool) -> Self {
        self.use_default = use_default;
        self
    }

    pub fn resolve(&self, configured_default_secs: Option<u64>) -> Duration {
        if let Some(duration) = self.duration {
            return duration;
        }
        if let Some(seconds) = self.seconds {
            return Duration::from_secs(seconds);
        }
        let secs = match (self.use_default, configured_default_secs) {
            (true, Some(secs)) => secs,
            _ => FALLBACK_TTL_SECS,
        };
        Duration::from_secs(secs)
    }
}

impl From<Duration> for TtlSpec {
    fn from(duration: Duration) -> Self {
        Self::duration(duration)
    }
}

impl From<u64> for TtlSpec {
    fn from(seconds: u64) -> Self {
        Self::seconds(seconds)
    }
}

impl From<bool> for TtlSpec {
    fn from(use_default: bool) -> Self {
        Self::default().with_default_flag(use_default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_physical_key_format() {
        assert_eq!(physical_key("svc1", "k"), "_svc1_k");
        assert_eq!(physical_key("", "orders:1001"), "__orders:1001");
    }

    #[test]
    fn test_ttl_precedence() {
        let configured = Some(3600);
        assert_eq!(TtlSpec::from(true).resolve(configured), Duration::from_secs(3600));
        assert_eq!(TtlSpec::from(false).resolve(configured), Duration::from_secs(60));
        assert_eq!(
            TtlSpec::duration(Duration::from_secs(120))
                .with_default_flag(true)
                .resolve(configured),
            Duration::from_secs(120)
        );
        assert_eq!(
            TtlSpec::seconds(90).with_default_flag(true).resolve(configured),
            Duration::from_secs(90)
        );
    }

    #[test]
    fn test_duration_beats_seconds() {
        let ttl = TtlSpec {
            duration: Some(Duration::from_millis(1500)),
            seconds: Some(10),
            use_default: false,
        };
        assert_eq!(ttl.resolve(None), Duration::from_millis(1500));
    }

    #[test]
    fn test_default_flag_without_configured_default() {
        assert_eq!(TtlSpec::configured_default().resolve(None), Duration::from_secs(60));
        assert_eq!(TtlSpec::fallback().resolve(Some(5)), Duration::from_secs(60));
    }
}
