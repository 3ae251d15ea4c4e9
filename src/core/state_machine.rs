//! State machine for tracking the stages of one publish run
//!
//! The run is never resumed from disk: a retried CI run starts over and relies
//! on the already-published checks instead. The history only feeds logs and
//! the run summary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Publish run stage
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PublishStage {
    Initial,
    CollectingReleases,
    ResolvingTargets,
    Authenticating,
    Building,
    PreValidating,
    Publishing,
    Attesting,
    Done,
    BuildFailed,
    PreValidationFailed,
}

impl PublishStage {
    /// Terminal stages accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PublishStage::Done | PublishStage::BuildFailed | PublishStage::PreValidationFailed
        )
    }

    /// Stages that may legally follow this one
    fn successors(&self) -> &'static [PublishStage] {
        use PublishStage::*;
        match self {
            Initial => &[CollectingReleases],
            // An empty release set short-circuits straight to done
            CollectingReleases => &[ResolvingTargets, Done],
            ResolvingTargets => &[Authenticating, Done],
            Authenticating => &[Building],
            Building => &[PreValidating, BuildFailed],
            PreValidating => &[Publishing, PreValidationFailed],
            Publishing => &[Attesting, Done],
            Attesting => &[Done],
            Done | BuildFailed | PreValidationFailed => &[],
        }
    }
}

/// State transition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageTransition {
    pub from: PublishStage,
    pub to: PublishStage,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Error for a transition the pipeline never makes
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid stage transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: PublishStage,
    pub to: PublishStage,
}

/// State machine for tracking a publish run
#[derive(Debug, Clone)]
pub struct PublishStateMachine {
    current: PublishStage,
    transitions: Vec<StageTransition>,
}

impl Default for PublishStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PublishStateMachine {
    pub fn new() -> Self {
        Self {
            current: PublishStage::Initial,
            transitions: Vec::new(),
        }
    }

    /// Transition to a new stage
    pub fn transition(
        &mut self,
        to: PublishStage,
        note: Option<String>,
    ) -> Result<(), InvalidTransition> {
        if !self.current.successors().contains(&to) {
            return Err(InvalidTransition {
                from: self.current,
                to,
            });
        }

        tracing::debug!(from = ?self.current, to = ?to, "publish stage");
        self.transitions.push(StageTransition {
            from: self.current,
            to,
            timestamp: Utc::now(),
            note,
        });
        self.current = to;

        Ok(())
    }

    pub fn stage(&self) -> PublishStage {
        self.current
    }

    pub fn transitions(&self) -> &[StageTransition] {
        &self.transitions
    }

    /// Milliseconds between the first and the last transition
    pub fn elapsed_ms(&self) -> i64 {
        match (self.transitions.first(), self.transitions.last()) {
            (Some(first), Some(last)) => (last.timestamp - first.timestamp).num_milliseconds(),
            _ => 0,
        }
    }

    /// Get transition history as human-readable string
    pub fn history(&self) -> String {
        self.transitions
            .iter()
            .map(|t| {
                let note = t
                    .note
                    .as_ref()
                    .map(|n| format!(" ({})", n))
                    .unwrap_or_default();
                format!("{}: {:?} → {:?}{}", t.timestamp.to_rfc3339(), t.from, t.to, note)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
