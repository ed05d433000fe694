use crate::campaign::IterationOutcome;

/// An `Observer` is notified of every iteration outcome a campaign produces.
///
/// Observers are for reporting only: they cannot influence selection or the
/// oracle's verdict. An error returned from [`Observer::observe`] is logged by the
/// campaign and the run continues.
pub trait Observer: Send + Sync {
    /// Returns a static string name identifying the observer.
    fn name(&self) -> &'static str;

    /// Called once per iteration, after the population has been updated.
    ///
    /// # Arguments
    /// * `iteration`: 1-based iteration index within the current run.
    /// * `outcome`: what the iteration did.
    fn observe(&mut self, iteration: u64, outcome: &IterationOutcome)
    -> Result<(), anyhow::Error>;
}

/// An observer that does nothing.
#[derive(Default, Debug, Clone, Copy)]
pub struct NoOpObserver;

impl Observer for NoOpObserver {
    fn name(&self) -> &'static str {
        "NoOpObserver"
    }

    fn observe(&mut self, _iteration: u64, _outcome: &IterationOutcome) -> Result<(), anyhow::Error> {
        Ok(())
    }
}

/// Keeps every outcome in order, for tests and post-run reporting.
#[derive(Default, Debug, Clone)]
pub struct OutcomeRecorder {
    pub outcomes: Vec<(u64, IterationOutcome)>,
}

impl OutcomeRecorder {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn accepted(&self) -> impl Iterator<Item = &IterationOutcome> {
        self.outcomes
            .iter()
            .map(|(_, outcome)| outcome)
            .filter(|outcome| matches!(outcome, IterationOutcome::Accepted { .. }))
    }
}

impl Observer for OutcomeRecorder {
    fn name(&self) -> &'static str {
        "OutcomeRecorder"
    }

    fn observe(&mut self, iteration: u64, outcome: &IterationOutcome) -> Result<(), anyhow::Error> {
        self.outcomes.push((iteration, outcome.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutator::Mutation;
    use crate::oracle::OracleError;
    use std::path::PathBuf;

    #[test]
    fn recorder_keeps_order_and_filters_accepted() {
        let mut recorder = OutcomeRecorder::new();
        assert_eq!(recorder.name(), "OutcomeRecorder");
        let mutation = Mutation::BitFlip { index: 0, bit: 1 };
        let outcomes = [
            IterationOutcome::Skipped {
                reason: "source gone".to_string(),
            },
            IterationOutcome::Accepted {
                path: PathBuf::from("mutated_1.png"),
                mutation,
            },
            IterationOutcome::Rejected {
                path: PathBuf::from("mutated_2.png"),
                mutation,
                reason: OracleError::DecodeRejected("bad crc".to_string()),
            },
        ];
        for (i, outcome) in outcomes.iter().enumerate() {
            recorder.observe(i as u64 + 1, outcome).unwrap();
        }
        assert_eq!(recorder.outcomes.len(), 3);
        assert_eq!(recorder.outcomes[2].0, 3);
        assert_eq!(recorder.accepted().count(), 1);
    }

    #[test]
    fn no_op_observer_accepts_everything() {
        let mut observer = NoOpObserver;
        assert_eq!(observer.name(), "NoOpObserver");
        let outcome = IterationOutcome::Skipped {
            reason: String::new(),
        };
        assert!(observer.observe(1, &outcome).is_ok());
    }
}
