use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::config::LanguageConfig;

const STDIN_FILE_NAME: &str = "stdin.txt";

/// A disposable directory holding one runnable copy of a submission
///
/// The directory and everything in it is removed when the unit is dropped,
/// whichever way the run ended.
pub(super) struct ExecutionUnit {
    dir: TempDir,
    source_path: PathBuf,
    stdin_path: PathBuf,
}

impl ExecutionUnit {
    /// Writes `code` followed by the language epilogue, and `stdin_input` beside it
    pub(super) fn materialize(
        language: &LanguageConfig,
        code: &str,
        stdin_input: &str,
    ) -> std::io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("grader-").tempdir()?;

        let source_path = dir.path().join(&language.file_name);
        fs::write(&source_path, format!("{code}\n{}", language.epilogue))?;

        let stdin_path = dir.path().join(STDIN_FILE_NAME);
        fs::write(&stdin_path, stdin_input)?;

        Ok(Self {
            dir,
            source_path,
            stdin_path,
        })
    }

    pub(super) fn work_dir(&self) -> &Path {
        self.dir.path()
    }

    /// Expands the launch command template for this unit
    pub(super) fn command(&self, language: &LanguageConfig) -> Vec<String> {
        let source = self.source_path.to_string_lossy();
        let stdin = self.stdin_path.to_string_lossy();

        let mut mapping = HashMap::<&str, &str>::new();
        mapping.insert("%INPUT%", &*source);
        mapping.insert("%STDIN%", &*stdin);

        language
            .command
            .iter()
            .map(|s| {
                let mut t = s.clone();
                for (k, v) in mapping.iter() {
                    t = t.replace(k, v);
                }
                t
            })
            .collect()
    }
}
