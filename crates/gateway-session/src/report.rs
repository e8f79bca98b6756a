//! Per-tier outcome reports and acceptance policies.

use gateway_core::TierKind;
use serde::{Deserialize, Serialize};

/// Outcome of one tier operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum TierOutcome {
    Success,
    Failure(String),
    /// Tier is disabled and was not attempted.
    Skipped,
}

impl TierOutcome {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Outcomes of one operation across every configured tier, in priority order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierReport {
    pub outcomes: Vec<(TierKind, TierOutcome)>,
}

impl TierReport {
    pub(crate) fn record(&mut self, kind: TierKind, outcome: TierOutcome) {
        self.outcomes.push((kind, outcome));
    }

    /// Outcome for a tier kind, if that tier is configured.
    #[must_use]
    pub fn outcome(&self, kind: TierKind) -> Option<&TierOutcome> {
        self.outcomes
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, outcome)| outcome)
    }

    /// Tiers that succeeded.
    #[must_use]
    pub fn succeeded(&self) -> Vec<TierKind> {
        self.outcomes
            .iter()
            .filter(|(_, o)| o.is_success())
            .map(|(k, _)| *k)
            .collect()
    }

    /// Tiers that were attempted and failed.
    #[must_use]
    pub fn failed(&self) -> Vec<TierKind> {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, TierOutcome::Failure(_)))
            .map(|(k, _)| *k)
            .collect()
    }

    /// Whether at least one tier succeeded.
    #[must_use]
    pub fn any_succeeded(&self) -> bool {
        self.outcomes.iter().any(|(_, o)| o.is_success())
    }

    /// Evaluate the report against an acceptance policy.
    #[must_use]
    pub fn accepted_by(&self, policy: &AcceptancePolicy) -> bool {
        match policy {
            AcceptancePolicy::AnyTier => self.any_succeeded(),
            AcceptancePolicy::AllEnabled => {
                let mut attempted = self
                    .outcomes
                    .iter()
                    .filter(|(_, o)| !matches!(o, TierOutcome::Skipped))
                    .peekable();
                attempted.peek().is_some() && attempted.all(|(_, o)| o.is_success())
            }
            AcceptancePolicy::Require(kinds) => kinds
                .iter()
                .all(|kind| self.outcome(*kind).is_some_and(TierOutcome::is_success)),
        }
    }
}

/// How many tier writes must succeed for a save to count.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AcceptancePolicy {
    /// At least one enabled tier.
    #[default]
    AnyTier,
    /// Every enabled tier.
    AllEnabled,
    /// Each of the listed tiers.
    Require(Vec<TierKind>),
}
