//! Reconciliation run state machine.
//!
//! Each reconcile invocation walks through the phases below once. `Failed`
//! is reachable from every non-terminal phase; terminal phases never change.
//!
//! ```text
//!   ┌───────────┐     ┌─────────┐     ┌──────────┐     ┌─────────┐
//!   │ Rendering │────▶│ Diffing │────▶│ Applying │────▶│ Settled │
//!   └─────┬─────┘     └────┬────┘     └────┬─────┘     └─────────┘
//!         │                │               │
//!         └────────────────┴───────┬───────┘
//!                                  ▼
//!                             ┌────────┐
//!                             │ Failed │
//!                             └────────┘
//! ```

use modsync_core::ModuleName;
use modsync_store::ReconcilePhase;

use crate::error::{ControlError, Result};

/// Check if a phase transition is valid according to the state machine.
#[must_use]
pub const fn is_valid_transition(from: ReconcilePhase, to: ReconcilePhase) -> bool {
    use ReconcilePhase::{Applying, Diffing, Failed, Rendering, Settled};

    matches!(
        (from, to),
        (Rendering, Diffing)
            | (Diffing, Applying)
            | (Applying, Settled)
            | (Rendering | Diffing | Applying, Failed)
    )
}

/// Returns the list of valid target phases from the given phase.
#[must_use]
pub fn valid_transitions_from(phase: ReconcilePhase) -> Vec<ReconcilePhase> {
    use ReconcilePhase::{Applying, Diffing, Failed, Rendering, Settled};

    match phase {
        Rendering => vec![Diffing, Failed],
        Diffing => vec![Applying, Failed],
        Applying => vec![Settled, Failed],
        Settled | Failed => vec![],
    }
}

/// Tracks the phase of a single reconcile run.
#[derive(Debug)]
pub struct ReconcileRun {
    module: ModuleName,
    phase: ReconcilePhase,
}

impl ReconcileRun {
    /// Start a run in the `Rendering` phase.
    #[must_use]
    pub fn start(module: ModuleName) -> Self {
        tracing::debug!(module = %module, "Reconcile started");
        Self {
            module,
            phase: ReconcilePhase::Rendering,
        }
    }

    /// The current phase.
    #[must_use]
    pub const fn phase(&self) -> ReconcilePhase {
        self.phase
    }

    /// Move to `to`.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Internal` if the transition is not allowed.
    pub fn advance(&mut self, to: ReconcilePhase) -> Result<()> {
        if !is_valid_transition(self.phase, to) {
            return Err(ControlError::Internal(format!(
                "invalid reconcile transition for module {}: {:?} -> {:?}",
                self.module, self.phase, to
            )));
        }

        tracing::debug!(module = %self.module, from = ?self.phase, to = ?to, "Reconcile phase");
        self.phase = to;
        Ok(())
    }

    /// Move to `Failed`.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Internal` if the run already finished.
    pub fn fail(&mut self) -> Result<()> {
        self.advance(ReconcilePhase::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ReconcilePhase::{Applying, Diffing, Failed, Rendering, Settled};

    fn run() -> ReconcileRun {
        ReconcileRun::start(ModuleName::new("app").unwrap())
    }

    #[test]
    fn valid_transitions() {
        assert!(is_valid_transition(Rendering, Diffing));
        assert!(is_valid_transition(Diffing, Applying));
        assert!(is_valid_transition(Applying, Settled));
        assert!(is_valid_transition(Rendering, Failed));
        assert!(is_valid_transition(Applying, Failed));
    }

    #[test]
    fn invalid_transitions() {
        // Can't skip phases
        assert!(!is_valid_transition(Rendering, Applying));
        assert!(!is_valid_transition(Diffing, Settled));
        // Can't go backwards
        assert!(!is_valid_transition(Applying, Diffing));
        // Terminal phases are final
        assert!(!is_valid_transition(Settled, Failed));
        assert!(!is_valid_transition(Failed, Rendering));
    }

    #[test]
    fn transitions_from_matches_validator() {
        for from in [Rendering, Diffing, Applying, Settled, Failed] {
            for to in [Rendering, Diffing, Applying, Settled, Failed] {
                assert_eq!(
                    valid_transitions_from(from).contains(&to),
                    is_valid_transition(from, to),
                    "{from:?} -> {to:?}"
                );
            }
            assert_eq!(valid_transitions_from(from).is_empty(), from.is_terminal());
        }
    }

    #[test]
    fn run_walks_happy_path() {
        let mut run = run();
        assert_eq!(run.phase(), Rendering);

        run.advance(Diffing).unwrap();
        run.advance(Applying).unwrap();
        run.advance(Settled).unwrap();
        assert_eq!(run.phase(), Settled);
    }

    #[test]
    fn invalid_transition_is_internal_error() {
        let mut run = run();
        let err = run.advance(Settled).unwrap_err();

        assert!(matches!(err, ControlError::Internal(_)));
        assert_eq!(run.phase(), Rendering);
    }

    #[test]
    fn fail_after_settled_is_rejected() {
        let mut run = run();
        run.fail().unwrap();
        assert_eq!(run.phase(), Failed);
        assert!(run.fail().is_err());
    }
}
