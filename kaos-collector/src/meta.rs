//! Collector metadata (§3): three sibling keys per registered collector,
//! no TTL. A missing triple means "never ran".

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectorStatus {
    Ok,
    Degraded,
    Error,
    Unknown,
}

impl CollectorStatus {
    /// §4.3 step 5: degraded below 3 consecutive errors, error at/above.
    pub fn from_consecutive_errors(consecutive_errors: u32) -> Self {
        if consecutive_errors == 0 {
            CollectorStatus::Ok
        } else if consecutive_errors < 3 {
            CollectorStatus::Degraded
        } else {
            CollectorStatus::Error
        }
    }
}

impl std::fmt::Display for CollectorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CollectorStatus::Ok => "ok",
            CollectorStatus::Degraded => "degraded",
            CollectorStatus::Error => "error",
            CollectorStatus::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

pub fn status_key(name: &str) -> String {
    format!("kaos:meta:{name}:status")
}

pub fn last_run_key(name: &str) -> String {
    format!("kaos:meta:{name}:last-run")
}

pub fn error_count_key(name: &str) -> String {
    format!("kaos:meta:{name}:error-count")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_staircase_matches_spec() {
        assert_eq!(
            CollectorStatus::from_consecutive_errors(0),
            CollectorStatus::Ok
        );
        assert_eq!(
            CollectorStatus::from_consecutive_errors(1),
            CollectorStatus::Degraded
        );
        assert_eq!(
            CollectorStatus::from_consecutive_errors(2),
            CollectorStatus::Degraded
        );
        assert_eq!(
            CollectorStatus::from_consecutive_errors(3),
            CollectorStatus::Error
        );
        assert_eq!(
            CollectorStatus::from_consecutive_errors(100),
            CollectorStatus::Error
        );
    }

    #[test]
    fn keys_follow_dotted_colon_convention() {
        assert_eq!(status_key("seismic"), "kaos:meta:seismic:status");
        assert_eq!(last_run_key("seismic"), "kaos:meta:seismic:last-run");
        assert_eq!(error_count_key("seismic"), "kaos:meta:seismic:error-count");
    }
}
