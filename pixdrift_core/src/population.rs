use crate::config::ConfigError;
use crate::factory::Candidate;
use crate::format::FormatTag;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum PopulationError {
    #[error("I/O error on {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("Population path {0:?} exists but is not a directory")]
    NotADirectory(PathBuf),
    #[error("Seed {0:?} does not exist")]
    SeedMissing(PathBuf),
    #[error("Seed {path:?} is not a {expected} file")]
    FormatMismatch { path: PathBuf, expected: FormatTag },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl PopulationError {
    fn io(path: &Path, source: io::Error) -> Self {
        PopulationError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// The evolving corpus: an ordered list of member files sharing one format.
///
/// Members keep insertion order: seeds as loaded, candidates as promoted. Members
/// are never removed; only undecided candidates are ever deleted, through
/// [`Population::discard`].
#[derive(Debug)]
pub struct Population {
    working_dir: PathBuf,
    format: FormatTag,
    members: Vec<PathBuf>,
    seed_ids: Vec<usize>,
}

impl Population {
    /// Loads `seeds` as the initial members (see
    /// [`Population::load_initial_seeds`]), then creates the working directory if
    /// absent. Nothing is created unless every seed loads.
    ///
    /// # Arguments
    /// * `working_dir`: where candidates are written.
    /// * `format`: the format every member must share.
    /// * `seeds`: seed files, or directories of them.
    ///
    /// # Errors
    /// `NotADirectory` when `working_dir` names a file. Seed errors come from
    /// [`Population::add_seed`], and loading zero seeds is `ConfigError::NoSeeds`.
    pub fn new(
        working_dir: impl Into<PathBuf>,
        format: FormatTag,
        seeds: &[PathBuf],
    ) -> Result<Self, PopulationError> {
        let working_dir = working_dir.into();
        if working_dir.exists() && !working_dir.is_dir() {
            return Err(PopulationError::NotADirectory(working_dir));
        }

        let mut population = Self {
            working_dir,
            format,
            members: Vec::new(),
            seed_ids: Vec::new(),
        };
        if population.load_initial_seeds(seeds)? == 0 {
            return Err(ConfigError::NoSeeds.into());
        }
        if !population.working_dir.exists() {
            fs::create_dir_all(&population.working_dir)
                .map_err(|e| PopulationError::io(&population.working_dir, e))?;
        }
        Ok(population)
    }

    /// Appends one seed file. Its extension must match the population's format.
    pub fn add_seed(&mut self, path: PathBuf) -> Result<usize, PopulationError> {
        if !path.is_file() {
            return Err(PopulationError::SeedMissing(path));
        }
        if FormatTag::from_path(&path).ok() != Some(self.format) {
            return Err(PopulationError::FormatMismatch {
                path,
                expected: self.format,
            });
        }
        debug!("Seeding population with {}", path.display());
        self.members.push(path);
        let id = self.members.len() - 1;
        self.seed_ids.push(id);
        Ok(id)
    }

    /// Adds every path in `seed_paths`. A directory contributes its files with
    /// the population's extension (non-recursive, dotfiles skipped), in name order.
    /// Returns the number of seeds loaded.
    pub fn load_initial_seeds(&mut self, seed_paths: &[PathBuf]) -> Result<usize, PopulationError> {
        let mut loaded = 0;
        for path in seed_paths {
            if path.is_dir() {
                let mut entries = Vec::new();
                for entry in fs::read_dir(path).map_err(|e| PopulationError::io(path, e))? {
                    let entry = entry.map_err(|e| PopulationError::io(path, e))?;
                    let file = entry.path();
                    let hidden = file
                        .file_name()
                        .and_then(|name| name.to_str())
                        .is_some_and(|name| name.starts_with('.'));
                    if file.is_file()
                        && !hidden
                        && FormatTag::from_path(&file).ok() == Some(self.format)
                    {
                        entries.push(file);
                    }
                }
                entries.sort();
                for file in entries {
                    self.add_seed(file)?;
                    loaded += 1;
                }
            } else {
                self.add_seed(path.clone())?;
                loaded += 1;
            }
        }
        Ok(loaded)
    }

    /// Accepts a candidate: its file stays on disk and its path is appended.
    pub fn promote(&mut self, candidate: Candidate) -> usize {
        self.members.push(candidate.into_path());
        self.members.len() - 1
    }

    /// Rejects a candidate by deleting its file. A file that is already gone
    /// counts as discarded.
    pub fn discard(&self, candidate: Candidate) -> Result<(), PopulationError> {
        let path = candidate.into_path();
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PopulationError::io(&path, e)),
        }
    }

    /// Path of member `id`, where ids are positions in insertion order.
    pub fn get(&self, id: usize) -> Option<&Path> {
        self.members.get(id).map(PathBuf::as_path)
    }

    /// Every member, seeds first, then promoted candidates in promotion order.
    pub fn members(&self) -> &[PathBuf] {
        &self.members
    }

    /// Number of members, seeds included.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Number of members that were loaded as seeds rather than promoted.
    pub fn seed_count(&self) -> usize {
        self.seed_ids.len()
    }

    /// The seed members, in load order.
    pub fn seeds(&self) -> impl Iterator<Item = &Path> {
        self.seed_ids.iter().map(|&id| self.members[id].as_path())
    }

    /// Directory candidates are written to. Seeds may live elsewhere.
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// The format every member shares.
    pub fn format(&self) -> FormatTag {
        self.format
    }

    /// File extension of the population's format, without the dot.
    pub fn extension(&self) -> &'static str {
        self.format.extension()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutator::Mutation;
    use tempfile::tempdir;

    fn touch(path: &Path) -> PathBuf {
        fs::write(path, b"seed").unwrap();
        path.to_path_buf()
    }

    #[test]
    fn new_creates_working_dir_and_loads_seed() {
        let dir = tempdir().unwrap();
        let seed = touch(&dir.path().join("image_1.png"));
        let work = dir.path().join("populations");
        assert!(!work.exists());

        let population = Population::new(&work, FormatTag::Png, &[seed.clone()]).unwrap();
        assert!(work.is_dir());
        assert_eq!(population.members(), &[seed]);
        assert_eq!(population.seed_count(), 1);
        assert_eq!(population.format(), FormatTag::Png);
        assert_eq!(population.extension(), "png");
    }

    #[test]
    fn bad_seeds_leave_no_working_dir_behind() {
        let dir = tempdir().unwrap();
        let work = dir.path().join("out");
        assert!(matches!(
            Population::new(&work, FormatTag::Png, &[dir.path().join("gone.png")]),
            Err(PopulationError::SeedMissing(_))
        ));
        assert!(!work.exists());

        let bmp = touch(&dir.path().join("image_1.bmp"));
        assert!(Population::new(&work, FormatTag::Png, &[bmp]).is_err());
        assert!(Population::new(&work, FormatTag::Png, &[]).is_err());
        assert!(!work.exists());
    }

    #[test]
    fn working_dir_must_be_a_directory() {
        let dir = tempdir().unwrap();
        let seed = touch(&dir.path().join("image_1.bmp"));
        let file = touch(&dir.path().join("not_a_dir"));
        assert!(matches!(
            Population::new(&file, FormatTag::Bmp, &[seed]),
            Err(PopulationError::NotADirectory(_))
        ));
    }

    #[test]
    fn seeds_are_required() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            Population::new(dir.path(), FormatTag::Png, &[]),
            Err(PopulationError::Config(ConfigError::NoSeeds))
        ));
        assert!(matches!(
            Population::new(dir.path(), FormatTag::Png, &[dir.path().join("gone.png")]),
            Err(PopulationError::SeedMissing(_))
        ));
    }

    #[test]
    fn seed_format_must_match() {
        let dir = tempdir().unwrap();
        let bmp = touch(&dir.path().join("image_1.bmp"));
        assert!(matches!(
            Population::new(dir.path(), FormatTag::Png, &[bmp]),
            Err(PopulationError::FormatMismatch {
                expected: FormatTag::Png,
                ..
            })
        ));
    }

    #[test]
    fn seed_directory_filters_by_extension() {
        let dir = tempdir().unwrap();
        let seeds = dir.path().join("seeds");
        fs::create_dir(&seeds).unwrap();
        touch(&seeds.join("image_2.png"));
        touch(&seeds.join("image_1.png"));
        touch(&seeds.join("notes.txt"));
        touch(&seeds.join(".hidden.png"));

        let population = Population::new(dir.path().join("work"), FormatTag::Png, &[seeds.clone()])
            .unwrap();
        assert_eq!(
            population.members(),
            &[seeds.join("image_1.png"), seeds.join("image_2.png")]
        );
    }

    #[test]
    fn promote_appends_and_discard_deletes() {
        let dir = tempdir().unwrap();
        let seed = touch(&dir.path().join("image_1.png"));
        let mut population = Population::new(dir.path(), FormatTag::Png, &[seed]).unwrap();
        let mutation = Mutation::ByteDelete { index: None };

        let kept = touch(&dir.path().join("mutated_1.png"));
        let id = population.promote(Candidate::for_test(0, kept.clone(), mutation));
        assert_eq!(id, 1);
        assert_eq!(population.get(1), Some(kept.as_path()));
        assert!(kept.exists());

        let dropped = touch(&dir.path().join("mutated_2.png"));
        population
            .discard(Candidate::for_test(0, dropped.clone(), mutation))
            .unwrap();
        assert!(!dropped.exists());
        assert_eq!(population.len(), 2);

        // Discarding a file that vanished on its own is not an error.
        population
            .discard(Candidate::for_test(0, dropped, mutation))
            .unwrap();
    }
}
