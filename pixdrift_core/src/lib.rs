pub mod campaign;
pub mod config;
pub mod factory;
pub mod format;
pub mod mutator;
pub mod observer;
pub mod oracle;
pub mod population;
pub mod scheduler;
pub mod seed;

pub use campaign::{Campaign, CampaignState, CampaignStats, IterationOutcome, seeded_rng};
pub use config::{ConfigError, PixdriftConfig};
pub use factory::{Candidate, CandidateFactory, FactoryError};
pub use format::FormatTag;
pub use mutator::{ModeMutator, Mutation, MutationError, MutationMode, MutationOp, Mutator};
pub use observer::{NoOpObserver, Observer, OutcomeRecorder};
pub use oracle::{DecodeLimits, OpenOracle, Oracle, OracleError, OracleStrength, Verdict, VerifyOracle};
pub use population::{Population, PopulationError};
pub use scheduler::{RandomScheduler, Scheduler, SchedulerError};
pub use seed::{
    BmpSeedProvider, PngSeedProvider, Seed, SeedConstraints, SeedError, SeedProvider,
    provider_for, write_seed_files,
};
