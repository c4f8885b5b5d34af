//! Status enumerations shared by host and workload snapshots

use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Readiness condition reported for a host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HostCondition {
    Ready,
    NotReady,
    #[default]
    Unknown,
}

impl HostCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostCondition::Ready => "Ready",
            HostCondition::NotReady => "NotReady",
            HostCondition::Unknown => "Unknown",
        }
    }
}

/// Parses case-insensitively; anything unrecognized is `Unknown`
impl FromStr for HostCondition {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "ready" => HostCondition::Ready,
            "notready" => HostCondition::NotReady,
            _ => HostCondition::Unknown,
        })
    }
}

impl fmt::Display for HostCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle phase of a workload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkloadPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    #[default]
    Unknown,
}

impl WorkloadPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadPhase::Pending => "Pending",
            WorkloadPhase::Running => "Running",
            WorkloadPhase::Succeeded => "Succeeded",
            WorkloadPhase::Failed => "Failed",
            WorkloadPhase::Unknown => "Unknown",
        }
    }

    /// Whether the workload has reached a terminal phase
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkloadPhase::Succeeded | WorkloadPhase::Failed)
    }
}

impl FromStr for WorkloadPhase {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "pending" => WorkloadPhase::Pending,
            "running" => WorkloadPhase::Running,
            "succeeded" => WorkloadPhase::Succeeded,
            "failed" => WorkloadPhase::Failed,
            _ => WorkloadPhase::Unknown,
        })
    }
}

impl fmt::Display for WorkloadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quality-of-service classification of a workload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QosClass {
    BestEffort,
    Burstable,
    Guaranteed,
    #[default]
    Unknown,
}

impl QosClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            QosClass::BestEffort => "BestEffort",
            QosClass::Burstable => "Burstable",
            QosClass::Guaranteed => "Guaranteed",
            QosClass::Unknown => "Unknown",
        }
    }
}

impl FromStr for QosClass {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "besteffort" => QosClass::BestEffort,
            "burstable" => QosClass::Burstable,
            "guaranteed" => QosClass::Guaranteed,
            _ => QosClass::Unknown,
        })
    }
}

impl fmt::Display for QosClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_parse_is_case_insensitive() {
        assert_eq!("READY".parse::<HostCondition>().unwrap(), HostCondition::Ready);
        assert_eq!("NotReady".parse::<HostCondition>().unwrap(), HostCondition::NotReady);
        assert_eq!("bogus".parse::<HostCondition>().unwrap(), HostCondition::Unknown);
    }

    #[test]
    fn test_phase_roundtrips_through_display() {
        for phase in [
            WorkloadPhase::Pending,
            WorkloadPhase::Running,
            WorkloadPhase::Succeeded,
            WorkloadPhase::Failed,
            WorkloadPhase::Unknown,
        ] {
            assert_eq!(phase.to_string().parse::<WorkloadPhase>().unwrap(), phase);
        }
        assert!(WorkloadPhase::Failed.is_terminal());
        assert!(!WorkloadPhase::Running.is_terminal());
    }

    #[test]
    fn test_qos_fallback() {
        assert_eq!("besteffort".parse::<QosClass>().unwrap(), QosClass::BestEffort);
        assert_eq!("".parse::<QosClass>().unwrap(), QosClass::Unknown);
        assert_eq!(QosClass::default(), QosClass::Unknown);
    }

    #[test]
    fn test_serde_uses_variant_names() {
        let json = serde_json::to_string(&HostCondition::NotReady).unwrap();
        assert_eq!(json, "\"NotReady\"");
        let qos: QosClass = serde_json::from_str("\"Guaranteed\"").unwrap();
        assert_eq!(qos, QosClass::Guaranteed);
    }
}
