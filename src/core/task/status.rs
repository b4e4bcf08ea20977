/// Lifecycle state shared by query tasks and their execution cells.
///
/// The backend encodes it as a small integer. Codes outside the four known
/// values are kept as [`Status::Unknown`] so a newer server never breaks
/// decoding; every known value maps to a concrete descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum Status {
    Pending,
    Running,
    Completed,
    Failed,
    Unknown(i64),
}

/// Visual tone of a status, independent of the output device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTone {
    Neutral,
    Processing,
    Success,
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusDescriptor {
    pub label: &'static str,
    pub tone: StatusTone,
    pub icon: &'static str,
}

impl From<i64> for Status {
    fn from(code: i64) -> Self {
        match code {
            0 => Status::Pending,
            1 => Status::Running,
            2 => Status::Completed,
            3 => Status::Failed,
            other => Status::Unknown(other),
        }
    }
}

impl From<Status> for i64 {
    fn from(status: Status) -> Self {
        status.code()
    }
}

impl Status {
    pub fn code(self) -> i64 {
        match self {
            Status::Pending => 0,
            Status::Running => 1,
            Status::Completed => 2,
            Status::Failed => 3,
            Status::Unknown(code) => code,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Running => "running",
            Status::Completed => "completed",
            Status::Failed => "failed",
            Status::Unknown(_) => "unknown",
        }
    }

    /// Accepts either a name (`running`) or the numeric code (`1`).
    pub fn from_name(value: &str) -> Option<Self> {
        let value = value.trim().to_lowercase();
        match value.as_str() {
            "pending" => Some(Status::Pending),
            "running" => Some(Status::Running),
            "completed" | "done" => Some(Status::Completed),
            "failed" => Some(Status::Failed),
            other => match other.parse::<i64>() {
                Ok(code @ 0..=3) => Some(Status::from(code)),
                _ => None,
            },
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Completed | Status::Failed)
    }

    pub fn is_running(self) -> bool {
        self == Status::Running
    }

    /// A run may be triggered from any known state except `Running`.
    pub fn can_run(self) -> bool {
        matches!(self, Status::Pending | Status::Completed | Status::Failed)
    }

    pub fn descriptor(self) -> StatusDescriptor {
        match self {
            Status::Pending => StatusDescriptor {
                label: "Pending",
                tone: StatusTone::Neutral,
                icon: "○",
            },
            Status::Running => StatusDescriptor {
                label: "Running",
                tone: StatusTone::Processing,
                icon: "◐",
            },
            Status::Completed => StatusDescriptor {
                label: "Completed",
                tone: StatusTone::Success,
                icon: "●",
            },
            Status::Failed => StatusDescriptor {
                label: "Failed",
                tone: StatusTone::Error,
                icon: "✕",
            },
            Status::Unknown(_) => StatusDescriptor {
                label: "Unknown",
                tone: StatusTone::Warning,
                icon: "?",
            },
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Unknown(code) => write!(f, "unknown({})", code),
            other => f.write_str(other.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Status, StatusTone};

    #[test]
    fn decodes_known_and_unknown_codes() {
        let parsed: Vec<Status> = serde_json::from_str("[0,1,2,3,9]").expect("statuses");
        assert_eq!(
            parsed,
            vec![
                Status::Pending,
                Status::Running,
                Status::Completed,
                Status::Failed,
                Status::Unknown(9)
            ]
        );
        assert_eq!(serde_json::to_string(&Status::Failed).expect("json"), "3");
        assert_eq!(serde_json::to_string(&Status::Unknown(7)).expect("json"), "7");
    }

    #[test]
    fn every_known_status_has_a_specific_descriptor() {
        for status in [
            Status::Pending,
            Status::Running,
            Status::Completed,
            Status::Failed,
        ] {
            assert_ne!(status.descriptor().tone, StatusTone::Warning, "{:?}", status);
        }
        assert_eq!(Status::Unknown(42).descriptor().tone, StatusTone::Warning);
    }

    #[test]
    fn run_is_only_allowed_outside_running() {
        assert!(Status::Pending.can_run());
        assert!(Status::Completed.can_run());
        assert!(Status::Failed.can_run());
        assert!(!Status::Running.can_run());
        assert!(!Status::Unknown(5).can_run());
    }

    #[test]
    fn parses_names_and_codes() {
        assert_eq!(Status::from_name("Running"), Some(Status::Running));
        assert_eq!(Status::from_name("2"), Some(Status::Completed));
        assert_eq!(Status::from_name("7"), None);
        assert_eq!(Status::from_name("nope"), None);
    }
}
