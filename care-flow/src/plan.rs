//! Plan model: the ordered record of what has been decided, attempted and completed.
//!
//! The orchestrator owns step statuses. Oracle-proposed plans only enter the
//! context through [`Plan::merge`], which keeps every existing step and appends
//! new ones as pending.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{capability::Capability, error::PlanError};

/// Literal used for the terminal marker on the wire
pub const TERMINAL_MARKER: &str = "END";

/// Routing target: a capability to dispatch, or the terminal marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Route {
    Dispatch(Capability),
    End,
}

impl Route {
    pub fn capability(&self) -> Option<Capability> {
        match self {
            Route::Dispatch(capability) => Some(*capability),
            Route::End => None,
        }
    }

    pub fn is_end(&self) -> bool {
        matches!(self, Route::End)
    }
}

impl TryFrom<String> for Route {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value == TERMINAL_MARKER {
            return Ok(Route::End);
        }
        value.parse::<Capability>().map(Route::Dispatch)
    }
}

impl From<Route> for String {
    fn from(route: Route) -> Self {
        route.to_string()
    }
}

impl From<Capability> for Route {
    fn from(capability: Capability) -> Self {
        Route::Dispatch(capability)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Dispatch(capability) => capability.fmt(f),
            Route::End => f.write_str(TERMINAL_MARKER),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Current,
    Completed,
    Skipped,
}

impl StepStatus {
    /// Completed and skipped steps are both resolved
    pub fn is_resolved(&self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Skipped)
    }

    /// Statuses only move forward: pending -> current -> completed, or -> skipped
    pub fn can_advance_to(&self, next: StepStatus) -> bool {
        matches!(
            (self, next),
            (StepStatus::Pending, StepStatus::Current)
                | (StepStatus::Pending, StepStatus::Skipped)
                | (StepStatus::Current, StepStatus::Completed)
                | (StepStatus::Current, StepStatus::Skipped)
        )
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StepStatus::Pending => "pending",
            StepStatus::Current => "current",
            StepStatus::Completed => "completed",
            StepStatus::Skipped => "skipped",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub capability: Route,
    pub description: String,
    /// Why the step exists
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub status: StepStatus,
    /// Error or skip annotation attached when the step resolved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Step {
    pub fn new(
        capability: impl Into<Route>,
        description: impl Into<String>,
        goal: impl Into<String>,
    ) -> Self {
        Self {
            capability: capability.into(),
            description: description.into(),
            goal: goal.into(),
            status: StepStatus::Pending,
            note: None,
        }
    }

    pub fn with_status(mut self, status: StepStatus) -> Self {
        self.status = status;
        self
    }

    fn is_pending_for(&self, capability: Capability) -> bool {
        self.status == StepStatus::Pending && self.capability == Route::Dispatch(capability)
    }
}

/// Outcome of merging an oracle-proposed plan into the current one
#[derive(Debug, Clone, PartialEq)]
pub struct MergedPlan {
    pub plan: Plan,
    /// Human-readable notes on every proposal the merge ignored or rewrote
    pub adjustments: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Plan {
    steps: Vec<Step>,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a plan from raw steps, checking the single-current invariant
    pub fn from_steps(steps: Vec<Step>) -> Result<Self, PlanError> {
        let plan = Self { steps };
        plan.validate()?;
        Ok(plan)
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Every step is completed or skipped. Vacuously true for an empty plan.
    pub fn is_resolved(&self) -> bool {
        self.steps.iter().all(|s| s.status.is_resolved())
    }

    pub fn validate(&self) -> Result<(), PlanError> {
        let current = self
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Current)
            .count();
        if current > 1 {
            return Err(PlanError::MultipleCurrent(current));
        }
        Ok(())
    }

    pub fn current_index(&self) -> Option<usize> {
        self.steps
            .iter()
            .position(|s| s.status == StepStatus::Current)
    }

    /// Route of the first pending step, in plan order
    pub fn next_pending_route(&self) -> Option<Route> {
        self.steps
            .iter()
            .find(|s| s.status == StepStatus::Pending)
            .map(|s| s.capability)
    }

    pub fn has_pending(&self, capability: Capability) -> bool {
        self.steps.iter().any(|s| s.is_pending_for(capability))
    }

    pub fn last_completed(&self) -> Option<&Step> {
        self.steps
            .iter()
            .rev()
            .find(|s| s.status == StepStatus::Completed)
    }

    pub fn completed_capabilities(&self) -> BTreeSet<Capability> {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .filter_map(|s| s.capability.capability())
            .collect()
    }

    pub fn push(&mut self, step: Step) {
        self.steps.push(step);
    }

    /// Append a pending step for `capability` unless one is already waiting
    pub fn ensure_pending(
        &mut self,
        capability: Capability,
        description: impl Into<String>,
        goal: impl Into<String>,
    ) -> bool {
        if self.has_pending(capability) {
            return false;
        }
        self.steps.push(Step::new(capability, description, goal));
        true
    }

    /// Mark the step about to be dispatched as current and return its index.
    ///
    /// Uses the first pending step for `capability`, appending a new one when the
    /// plan has none. Completed steps are never reopened.
    pub fn begin(&mut self, capability: Capability, goal: &str) -> Result<usize, PlanError> {
        if let Some(index) = self.current_index() {
            return Err(PlanError::IllegalTransition {
                index,
                from: StepStatus::Current,
                to: StepStatus::Current,
            });
        }
        let index = match self.steps.iter().position(|s| s.is_pending_for(capability)) {
            Some(index) => index,
            None => {
                self.steps.push(Step::new(
                    capability,
                    format!("Run {capability}"),
                    goal.to_string(),
                ));
                self.steps.len() - 1
            }
        };
        self.transition(index, StepStatus::Current)?;
        Ok(index)
    }

    pub fn complete(&mut self, index: usize, error: Option<String>) -> Result<(), PlanError> {
        self.transition(index, StepStatus::Completed)?;
        self.steps[index].note = error;
        Ok(())
    }

    pub fn skip(&mut self, index: usize, reason: impl Into<String>) -> Result<(), PlanError> {
        self.transition(index, StepStatus::Skipped)?;
        self.steps[index].note = Some(reason.into());
        Ok(())
    }

    /// Skip every pending step for `capability`, returning how many were skipped
    pub fn skip_pending(&mut self, capability: Capability, reason: &str) -> usize {
        let mut skipped = 0;
        for step in self.steps.iter_mut().filter(|s| s.is_pending_for(capability)) {
            step.status = StepStatus::Skipped;
            step.note = Some(reason.to_string());
            skipped += 1;
        }
        skipped
    }

    /// Skip everything still pending, used when a run is cut short
    pub fn skip_all_pending(&mut self, reason: &str) -> usize {
        let mut skipped = 0;
        for step in self
            .steps
            .iter_mut()
            .filter(|s| s.status == StepStatus::Pending)
        {
            step.status = StepStatus::Skipped;
            step.note = Some(reason.to_string());
            skipped += 1;
        }
        skipped
    }

    /// Remove every pending step, returning them in plan order
    pub fn withdraw_pending(&mut self) -> Vec<Step> {
        let (withdrawn, kept): (Vec<Step>, Vec<Step>) = std::mem::take(&mut self.steps)
            .into_iter()
            .partition(|s| s.status == StepStatus::Pending);
        self.steps = kept;
        withdrawn
    }

    /// Resolve pending terminal markers once the run actually terminates
    pub fn close_terminal_markers(&mut self) {
        for step in self
            .steps
            .iter_mut()
            .filter(|s| s.capability.is_end() && s.status == StepStatus::Pending)
        {
            step.status = StepStatus::Completed;
        }
    }

    fn transition(&mut self, index: usize, to: StepStatus) -> Result<(), PlanError> {
        let step = self.steps.get_mut(index).ok_or(PlanError::OutOfRange(index))?;
        if !step.status.can_advance_to(to) {
            return Err(PlanError::IllegalTransition {
                index,
                from: step.status,
                to,
            });
        }
        step.status = to;
        Ok(())
    }

    /// Merge an oracle-proposed plan into this one.
    ///
    /// Existing steps always survive with their engine-owned statuses; the oracle
    /// may only move a pending step to skipped. Proposed steps beyond the existing
    /// ones are appended as pending. A proposal that drops or reorders existing
    /// steps is accepted only when this plan is fully resolved, in which case its
    /// unresolved steps are appended after the completed history.
    pub fn merge(&self, proposed: &[Step]) -> Result<MergedPlan, PlanError> {
        let proposed_current = proposed
            .iter()
            .filter(|s| s.status == StepStatus::Current)
            .count();
        if proposed_current > 1 {
            return Err(PlanError::MultipleCurrent(proposed_current));
        }

        let mut merged = self.clone();
        let mut adjustments = Vec::new();

        let keeps_prefix = proposed.len() >= self.steps.len()
            && self
                .steps
                .iter()
                .zip(proposed)
                .all(|(mine, theirs)| mine.capability == theirs.capability);

        let appended: Vec<&Step> = if keeps_prefix {
            for (index, (mine, theirs)) in self.steps.iter().zip(proposed).enumerate() {
                if theirs.status == mine.status {
                    continue;
                }
                if mine.status == StepStatus::Pending && theirs.status == StepStatus::Skipped {
                    merged.steps[index].status = StepStatus::Skipped;
                    merged.steps[index].note = Some("skipped by decision oracle".to_string());
                    adjustments.push(format!("step {index} ({}) skipped by oracle", mine.capability));
                } else {
                    adjustments.push(format!(
                        "ignored oracle status {} for step {index} ({}), kept {}",
                        theirs.status, mine.capability, mine.status
                    ));
                }
            }
            proposed[self.steps.len()..].iter().collect()
        } else if self.is_resolved() {
            // A fresh plan after completed work: restated history is dropped,
            // the new work extends the existing record.
            let fresh: Vec<&Step> = proposed
                .iter()
                .filter(|s| !s.status.is_resolved())
                .collect();
            if fresh.len() != proposed.len() {
                adjustments.push(format!(
                    "dropped {} resolved steps restated by oracle",
                    proposed.len() - fresh.len()
                ));
            }
            fresh
        } else {
            let index = self
                .steps
                .iter()
                .zip(proposed.iter().map(Some).chain(std::iter::repeat(None)))
                .position(|(mine, theirs)| theirs.is_none_or(|t| t.capability != mine.capability))
                .unwrap_or(0);
            return Err(PlanError::UnresolvedStepDropped {
                index,
                expected: self.steps[index].capability.to_string(),
                found: proposed
                    .get(index)
                    .map(|s| s.capability.to_string())
                    .unwrap_or_else(|| "nothing".to_string()),
            });
        };

        for step in appended {
            let status = match step.status {
                StepStatus::Pending | StepStatus::Skipped => step.status,
                other => {
                    adjustments.push(format!(
                        "new step {} proposed as {other}, reset to pending",
                        step.capability
                    ));
                    StepStatus::Pending
                }
            };
            merged.steps.push(Step {
                status,
                note: None,
                ..step.clone()
            });
        }

        merged.validate()?;
        Ok(MergedPlan {
            plan: merged,
            adjustments,
        })
    }
}
