use crate::population::Population;
use rand::Rng;
use rand_core::RngCore;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// Nothing to select from.
    #[error("Population is empty, cannot schedule next member")]
    PopulationEmpty,
}

/// A `Scheduler` picks the population member the next candidate is mutated from.
///
/// Schedulers may hold state between calls, but any randomness must come from the
/// `rng` argument so that a seeded campaign is reproducible.
pub trait Scheduler {
    /// Returns the index of the selected member within `population`.
    ///
    /// # Errors
    /// `SchedulerError::PopulationEmpty` if there is nothing to select.
    fn next(
        &mut self,
        population: &Population,
        rng: &mut dyn RngCore,
    ) -> Result<usize, SchedulerError>;
}

/// Uniform selection with replacement over every current member, seeds and
/// promoted candidates alike.
#[derive(Default, Debug, Clone, Copy)]
pub struct RandomScheduler;

impl RandomScheduler {
    pub fn new() -> Self {
        RandomScheduler
    }
}

impl Scheduler for RandomScheduler {
    fn next(
        &mut self,
        population: &Population,
        rng: &mut dyn RngCore,
    ) -> Result<usize, SchedulerError> {
        if population.is_empty() {
            return Err(SchedulerError::PopulationEmpty);
        }
        Ok(rng.random_range(0..population.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::FormatTag;
    use rand_chacha::ChaCha8Rng;
    use rand_core::SeedableRng;
    use std::collections::HashSet;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn random_scheduler_covers_every_member() {
        let dir = tempdir().unwrap();
        let seeds: Vec<_> = (1..=3)
            .map(|i| {
                let path = dir.path().join(format!("image_{i}.bmp"));
                fs::write(&path, b"BM").unwrap();
                path
            })
            .collect();
        let population = Population::new(dir.path(), FormatTag::Bmp, &seeds).unwrap();
        let mut scheduler = RandomScheduler::new();
        let mut rng = ChaCha8Rng::from_seed([1; 32]);

        let mut selected = HashSet::new();
        for i in 0..60 {
            let id = scheduler
                .next(&population, &mut rng)
                .unwrap_or_else(|e| panic!("next() failed on iteration {i}: {e:?}"));
            assert!(id < population.len(), "selected id {id} out of bounds");
            selected.insert(id);
        }
        assert_eq!(
            selected.len(),
            population.len(),
            "uniform selection should reach every member of a small population, got {selected:?}"
        );
    }
}
