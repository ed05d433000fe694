use crate::mutator::{MutationError, Mutation, Mutator};
use crate::population::Population;
use crate::scheduler::{RandomScheduler, Scheduler, SchedulerError};
use rand::Rng;
use rand_core::RngCore;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Candidate names are `mutated_<n>.<ext>` with `n` drawn from `0..=MAX_NAME_SUFFIX`.
pub const MAX_NAME_SUFFIX: u32 = 1_000_000;
/// Fresh names drawn before giving up on one candidate.
pub const MAX_NAME_ATTEMPTS: usize = 16;

/// Reasons the factory produced no candidate. None of these abort a campaign.
#[derive(Error, Debug)]
pub enum FactoryError {
    #[error("source {path:?} is unavailable: {source}")]
    SourceUnavailable { path: PathBuf, source: io::Error },
    #[error(transparent)]
    Schedule(#[from] SchedulerError),
    #[error(transparent)]
    Mutation(#[from] MutationError),
    #[error("no free candidate name after {attempts} attempts in {dir:?}")]
    NoFreeName { dir: PathBuf, attempts: usize },
    #[error("failed to write candidate {path:?}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

/// A mutated file awaiting the oracle's verdict. Handing it to
/// [`Population::promote`] or [`Population::discard`] consumes it.
#[derive(Debug)]
pub struct Candidate {
    source: usize,
    path: PathBuf,
    mutation: Mutation,
    original: Option<u8>,
    replacement: Option<u8>,
    digest: md5::Digest,
}

impl Candidate {
    /// Population index of the member this candidate was mutated from.
    pub fn source(&self) -> usize {
        self.source
    }

    /// Where the candidate was written, inside the working directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mutation(&self) -> &Mutation {
        &self.mutation
    }

    /// Byte at the mutated index before the edit. `None` for an insertion or an
    /// unchanged buffer.
    pub fn original(&self) -> Option<u8> {
        self.original
    }

    pub fn replacement(&self) -> Option<u8> {
        self.replacement
    }

    /// MD5 of the candidate's bytes.
    pub fn digest(&self) -> md5::Digest {
        self.digest
    }

    /// The edit plus the byte values it touched, e.g.
    /// `BitFlip at index 12, bit 3 (0x42 -> 0x4a)`.
    pub fn describe(&self) -> String {
        match (self.original, self.replacement) {
            (Some(before), Some(after)) => {
                format!("{} ({before:#04x} -> {after:#04x})", self.mutation)
            }
            (Some(before), None) => format!("{} (removed {before:#04x})", self.mutation),
            _ => self.mutation.to_string(),
        }
    }

    pub(crate) fn into_path(self) -> PathBuf {
        self.path
    }

    #[cfg(test)]
    pub(crate) fn for_test(source: usize, path: PathBuf, mutation: Mutation) -> Self {
        Self {
            source,
            path,
            mutation,
            original: None,
            replacement: None,
            digest: md5::compute(b""),
        }
    }
}

/// Selects a member, mutates its bytes and writes the result as a new file in the
/// population's working directory.
#[derive(Debug)]
pub struct CandidateFactory<M, S = RandomScheduler> {
    mutator: M,
    scheduler: S,
}

impl<M> CandidateFactory<M> {
    /// A factory that picks sources with [`RandomScheduler`].
    pub fn new(mutator: M) -> Self {
        Self::with_scheduler(mutator, RandomScheduler)
    }
}

impl<M, S: Scheduler> CandidateFactory<M, S> {
    pub fn with_scheduler(mutator: M, scheduler: S) -> Self {
        Self { mutator, scheduler }
    }

    /// Creates one candidate. On success exactly one new file exists; on error none
    /// was left behind.
    ///
    /// # Arguments
    /// * `population`: supplies the source member and the working directory.
    /// * `rng`: every random choice is drawn from it, file names included.
    ///
    /// # Errors
    /// Any [`FactoryError`]. None of them leaves a file behind.
    pub fn try_create<R: RngCore>(
        &mut self,
        population: &Population,
        rng: &mut R,
    ) -> Result<Candidate, FactoryError>
    where
        M: Mutator<R>,
    {
        let source = self.scheduler.next(population, rng)?;
        let source_path = population
            .get(source)
            .ok_or(SchedulerError::PopulationEmpty)?;
        let input = fs::read(source_path).map_err(|e| FactoryError::SourceUnavailable {
            path: source_path.to_path_buf(),
            source: e,
        })?;
        let mutated = self.mutator.mutate(&input, rng)?;
        let path = write_new(
            population.working_dir(),
            population.extension(),
            &mutated.bytes,
            rng,
        )?;
        Ok(Candidate {
            source,
            path,
            mutation: mutated.mutation,
            original: mutated.original,
            replacement: mutated.replacement(),
            digest: md5::compute(&mutated.bytes),
        })
    }

    /// Like [`CandidateFactory::try_create`], but reports failure as "no candidate".
    pub fn create<R: RngCore>(&mut self, population: &Population, rng: &mut R) -> Option<Candidate>
    where
        M: Mutator<R>,
    {
        match self.try_create(population, rng) {
            Ok(candidate) => Some(candidate),
            Err(e) => {
                warn!("No candidate produced: {e}");
                None
            }
        }
    }
}

fn write_new<R: RngCore>(
    dir: &Path,
    extension: &str,
    bytes: &[u8],
    rng: &mut R,
) -> Result<PathBuf, FactoryError> {
    for _ in 0..MAX_NAME_ATTEMPTS {
        let n = rng.random_range(0..=MAX_NAME_SUFFIX);
        let path = dir.join(format!("mutated_{n}.{extension}"));
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(source) => return Err(FactoryError::Write { path, source }),
        };
        if let Err(source) = file.write_all(bytes) {
            drop(file);
            let _ = fs::remove_file(&path);
            return Err(FactoryError::Write { path, source });
        }
        return Ok(path);
    }
    Err(FactoryError::NoFreeName {
        dir: dir.to_path_buf(),
        attempts: MAX_NAME_ATTEMPTS,
    })
}
