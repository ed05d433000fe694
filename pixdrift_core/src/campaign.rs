use crate::factory::{CandidateFactory, FactoryError};
use crate::mutator::{Mutation, Mutator};
use crate::observer::{NoOpObserver, Observer};
use crate::oracle::{Oracle, OracleError, Verdict};
use crate::population::Population;
use crate::scheduler::{RandomScheduler, Scheduler};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_core::{RngCore, SeedableRng};
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

/// Builds the campaign generator. Without a fixed seed one is drawn from the
/// thread generator; either way it is logged so a run can be replayed.
pub fn seeded_rng(seed: Option<u64>) -> ChaCha8Rng {
    let seed = seed.unwrap_or_else(|| rand::rng().random());
    info!("Random generator seed: {seed}");
    ChaCha8Rng::seed_from_u64(seed)
}

/// Lifecycle of a [`Campaign`]. `Done` may be followed by another run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampaignState {
    Idle,
    Running,
    Done,
}

/// What one iteration did to the population.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationOutcome {
    /// The factory produced no candidate. Nothing changed on disk.
    Skipped { reason: String },
    /// The candidate passed and was appended to the population.
    Accepted { path: PathBuf, mutation: Mutation },
    /// The candidate failed and its file was removed.
    Rejected {
        path: PathBuf,
        mutation: Mutation,
        reason: OracleError,
    },
}

/// Tallies for one run. Reset at the start of every run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CampaignStats {
    pub iterations: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub skipped: u64,
}

/// A fixed-budget fuzzing loop over one population.
///
/// Each iteration runs to completion (create, test, promote or discard) before the
/// next begins, so stopping the process between iterations always leaves a valid
/// population on disk.
pub struct Campaign<O, M, R, S = RandomScheduler> {
    population: Population,
    factory: CandidateFactory<M, S>,
    oracle: O,
    rng: R,
    state: CampaignState,
    stats: CampaignStats,
}

impl<O, M, R> Campaign<O, M, R>
where
    O: Oracle,
    R: RngCore,
    M: Mutator<R>,
{
    /// Creates an idle campaign that selects sources uniformly at random.
    ///
    /// # Arguments
    /// * `population`: the seeded population to grow.
    /// * `mutator`: produces each candidate's edit.
    /// * `oracle`: decides whether a candidate is kept.
    /// * `rng`: the only source of randomness for the whole campaign.
    pub fn new(population: Population, mutator: M, oracle: O, rng: R) -> Self {
        Self::with_scheduler(population, mutator, RandomScheduler, oracle, rng)
    }
}

impl<O, M, R, S> Campaign<O, M, R, S>
where
    O: Oracle,
    R: RngCore,
    M: Mutator<R>,
    S: Scheduler,
{
    pub fn with_scheduler(
        population: Population,
        mutator: M,
        scheduler: S,
        oracle: O,
        rng: R,
    ) -> Self {
        Self {
            population,
            factory: CandidateFactory::with_scheduler(mutator, scheduler),
            oracle,
            rng,
            state: CampaignState::Idle,
            stats: CampaignStats::default(),
        }
    }

    /// [`Campaign::run_with`] without an observer.
    pub fn run(&mut self, iterations: u64) -> CampaignStats {
        self.run_with(iterations, &mut NoOpObserver)
    }

    /// Runs exactly `iterations` iterations, reporting each outcome to `observer`.
    /// There is no early exit.
    pub fn run_with(&mut self, iterations: u64, observer: &mut dyn Observer) -> CampaignStats {
        self.state = CampaignState::Running;
        self.stats = CampaignStats::default();
        self.check_seeds();
        info!(
            "Starting campaign: {iterations} iterations, {} members, oracle {}",
            self.population.len(),
            self.oracle.name()
        );

        for iteration in 1..=iterations {
            let outcome = self.step(iteration);
            self.stats.iterations += 1;
            match outcome {
                IterationOutcome::Skipped { .. } => self.stats.skipped += 1,
                IterationOutcome::Accepted { .. } => self.stats.accepted += 1,
                IterationOutcome::Rejected { .. } => self.stats.rejected += 1,
            }
            if let Err(e) = observer.observe(iteration, &outcome) {
                warn!("Observer {} failed on iteration {iteration}: {e:#}", observer.name());
            }
        }

        self.state = CampaignState::Done;
        info!(
            "Campaign done: {} accepted, {} rejected, {} skipped, population size {}",
            self.stats.accepted,
            self.stats.rejected,
            self.stats.skipped,
            self.population.len()
        );
        self.stats
    }

    fn check_seeds(&self) {
        for path in self.population.seeds() {
            if let Verdict::Fail(reason) = self.oracle.test(path) {
                warn!("Seed {} does not pass the oracle: {reason}", path.display());
            }
        }
    }

    fn step(&mut self, iteration: u64) -> IterationOutcome {
        let candidate = match self.factory.try_create(&self.population, &mut self.rng) {
            Ok(candidate) => candidate,
            Err(e) => {
                match &e {
                    FactoryError::SourceUnavailable { .. }
                    | FactoryError::Write { .. }
                    | FactoryError::NoFreeName { .. } => warn!("[{iteration}] SKIP: {e}"),
                    _ => info!("[{iteration}] SKIP: {e}"),
                }
                return IterationOutcome::Skipped {
                    reason: e.to_string(),
                };
            }
        };

        let source = self
            .population
            .get(candidate.source())
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let path = candidate.path().to_path_buf();
        let mutation = *candidate.mutation();

        match self.oracle.test(&path) {
            Verdict::Pass => {
                info!(
                    "[{iteration}] {source}: {} -> PASS {} (md5 {:x})",
                    candidate.describe(),
                    path.display(),
                    candidate.digest()
                );
                self.population.promote(candidate);
                IterationOutcome::Accepted { path, mutation }
            }
            Verdict::Fail(reason) => {
                info!(
                    "[{iteration}] {source}: {} -> FAIL {}",
                    candidate.describe(),
                    path.display()
                );
                debug!("[{iteration}] {reason}");
                if let Err(e) = self.population.discard(candidate) {
                    error!("[{iteration}] Could not remove rejected candidate: {e}");
                }
                IterationOutcome::Rejected {
                    path,
                    mutation,
                    reason,
                }
            }
        }
    }

    /// The population as grown so far.
    pub fn population(&self) -> &Population {
        &self.population
    }

    /// Ends the campaign and hands back its population.
    pub fn into_population(self) -> Population {
        self.population
    }

    /// `Idle` before the first run, `Running` inside one, `Done` after.
    pub fn state(&self) -> CampaignState {
        self.state
    }

    /// Tallies of the most recent run.
    pub fn stats(&self) -> CampaignStats {
        self.stats
    }
}
