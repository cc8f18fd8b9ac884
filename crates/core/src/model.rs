use std::fmt;

use serde::{Deserialize, Serialize};

/// Discrete health of a tracked resource.
///
/// Only [`StatusKind::Operational`] satisfies a gate; every other value blocks.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusKind {
    /// Fully up; the only status that satisfies a gate.
    Operational,
    /// Up but degraded.
    PerformanceIssues,
    /// Partly unavailable.
    PartialOutage,
    /// Down.
    MajorOutage,
    /// Status could not be determined, or the resource is not known to any source.
    #[default]
    Unknown,
}

impl StatusKind {
    /// Parses a human-readable status label.
    ///
    /// Total: labels are matched case-insensitively with spaces, underscores and
    /// hyphens treated alike, and anything unrecognized maps to `Unknown`.
    pub fn from_label(label: &str) -> Self {
        let normalized: String = label
            .trim()
            .chars()
            .filter(|c| !matches!(c, ' ' | '_' | '-'))
            .flat_map(char::to_lowercase)
            .collect();
        match normalized.as_str() {
            "operational" => Self::Operational,
            "performanceissues" => Self::PerformanceIssues,
            "partialoutage" => Self::PartialOutage,
            "majoroutage" => Self::MajorOutage,
            _ => Self::Unknown,
        }
    }

    /// Maps a Cachet component status code (1..=4).
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => Self::Operational,
            2 => Self::PerformanceIssues,
            3 => Self::PartialOutage,
            4 => Self::MajorOutage,
            _ => Self::Unknown,
        }
    }

    /// True only for `Operational`.
    pub fn is_operational(self) -> bool {
        self == Self::Operational
    }

    /// Human-readable label, as shown in build logs.
    pub fn label(self) -> &'static str {
        match self {
            Self::Operational => "Operational",
            Self::PerformanceIssues => "Performance Issues",
            Self::PartialOutage => "Partial Outage",
            Self::MajorOutage => "Major Outage",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A named external dependency and its last reported status.
///
/// Snapshot value: the registry replaces resources wholesale on refresh.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resource {
    /// Case-sensitive unique key.
    pub name: String,
    /// Last reported status.
    pub status: StatusKind,
}

impl Resource {
    /// Resource with a known status.
    pub fn new(name: impl Into<String>, status: StatusKind) -> Self {
        Self {
            name: name.into(),
            status,
        }
    }

    /// Placeholder for a name no source reported.
    pub fn unknown(name: impl Into<String>) -> Self {
        Self::new(name, StatusKind::Unknown)
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_parsing_is_total() {
        assert_eq!(StatusKind::from_label("Operational"), StatusKind::Operational);
        assert_eq!(StatusKind::from_label("Major Outage"), StatusKind::MajorOutage);
        assert_eq!(StatusKind::from_label("MAJOR_OUTAGE"), StatusKind::MajorOutage);
        assert_eq!(StatusKind::from_label("partial-outage"), StatusKind::PartialOutage);
        assert_eq!(
            StatusKind::from_label("  performance issues "),
            StatusKind::PerformanceIssues
        );
        assert_eq!(StatusKind::from_label("Under Maintenance"), StatusKind::Unknown);
        assert_eq!(StatusKind::from_label(""), StatusKind::Unknown);
    }

    #[test]
    fn codes_map_to_cachet_statuses() {
        assert_eq!(StatusKind::from_code(1), StatusKind::Operational);
        assert_eq!(StatusKind::from_code(4), StatusKind::MajorOutage);
        assert_eq!(StatusKind::from_code(0), StatusKind::Unknown);
        assert_eq!(StatusKind::from_code(99), StatusKind::Unknown);
    }

    #[test]
    fn labels_round_trip_through_parser() {
        for kind in [
            StatusKind::Operational,
            StatusKind::PerformanceIssues,
            StatusKind::PartialOutage,
            StatusKind::MajorOutage,
            StatusKind::Unknown,
        ] {
            assert_eq!(StatusKind::from_label(kind.label()), kind);
        }
    }

    #[test]
    fn only_operational_satisfies() {
        assert!(StatusKind::Operational.is_operational());
        assert!(!StatusKind::PerformanceIssues.is_operational());
        assert!(!StatusKind::Unknown.is_operational());
        assert_eq!(StatusKind::default(), StatusKind::Unknown);
    }

    #[test]
    fn status_serializes_screaming_snake() {
        let s = serde_json::to_string(&StatusKind::MajorOutage).unwrap();
        assert_eq!(s, r#""MAJOR_OUTAGE""#);
    }
}
