use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
}

impl TestCase {
    pub fn new(input: impl Into<String>, expected_output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            expected_output: expected_output.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Problem {
    pub id: String,
    pub public_tests: Vec<TestCase>,
    pub hidden_tests: Vec<TestCase>,
}

impl Problem {
    /// Every test in evaluation order: public tests first, then hidden ones
    pub fn all_tests(&self) -> impl Iterator<Item = &TestCase> {
        self.public_tests.iter().chain(self.hidden_tests.iter())
    }

    pub fn total_tests(&self) -> usize {
        self.public_tests.len() + self.hidden_tests.len()
    }
}

/// Read-only source of problem definitions
pub trait ProblemStore: Send + Sync {
    /// `Ok(None)` when no problem has this id
    fn get_problem(&self, problem_id: &str) -> Result<Option<Problem>>;

    /// Ids of every available problem, sorted
    fn list_problem_ids(&self) -> Result<Vec<String>>;
}

/// On-disk layout of one problem file
#[derive(Deserialize, Debug)]
struct ProblemFile {
    public_tests: Option<Vec<TestCase>>,
    hidden_tests: Option<Vec<TestCase>>,
}

/// Problems stored as `{dir}/{problem_id}.json`
pub struct DirProblemStore {
    dir: PathBuf,
}

impl DirProblemStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn read_problem_file(path: &Path) -> Result<Option<ProblemFile>> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };
        let file = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(file))
    }
}

/// Ids become file names, so anything that could leave the directory is refused
fn is_valid_problem_id(problem_id: &str) -> bool {
    !problem_id.is_empty()
        && problem_id != "."
        && problem_id != ".."
        && !problem_id.contains(['/', '\\', '\0'])
}

impl ProblemStore for DirProblemStore {
    fn get_problem(&self, problem_id: &str) -> Result<Option<Problem>> {
        if !is_valid_problem_id(problem_id) {
            log::debug!("Rejected malformed problem id {problem_id:?}");
            return Ok(None);
        }

        let path = self.dir.join(format!("{problem_id}.json"));
        let Some(file) = Self::read_problem_file(&path)? else {
            return Ok(None);
        };

        Ok(Some(Problem {
            id: problem_id.to_string(),
            public_tests: file.public_tests.unwrap_or_default(),
            hidden_tests: file.hidden_tests.unwrap_or_default(),
        }))
    }

    fn list_problem_ids(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to list {}", self.dir.display()));
            }
        };

        let mut ids = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };

            // Unreadable files and files without any test list are not problems
            match Self::read_problem_file(&path) {
                Ok(Some(file)) if file.public_tests.is_some() || file.hidden_tests.is_some() => {
                    ids.push(id.to_string());
                }
                Ok(_) => {}
                Err(e) => log::warn!("Skipping problem file: {e:#}"),
            }
        }

        ids.sort();
        Ok(ids)
    }
}

/// Problems held in memory, for embedding and tests
#[derive(Default)]
pub struct MemoryProblemStore {
    problems: HashMap<String, Problem>,
}

impl MemoryProblemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, problem: Problem) {
        self.problems.insert(problem.id.clone(), problem);
    }

    pub fn with_problem(mut self, problem: Problem) -> Self {
        self.insert(problem);
        self
    }
}

impl ProblemStore for MemoryProblemStore {
    fn get_problem(&self, problem_id: &str) -> Result<Option<Problem>> {
        Ok(self.problems.get(problem_id).cloned())
    }

    fn list_problem_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.problems.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
