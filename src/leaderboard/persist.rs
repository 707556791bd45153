use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering as AtomicOrdering;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::{Leaderboard, SubmissionRecord};

const LEADERBOARD_FILE_NAME: &str = "leaderboard.json";

pub fn default_leaderboard_path() -> Result<PathBuf> {
    use directories::ProjectDirs;

    let proj_dirs = ProjectDirs::from("", "", "grader").context("Unable to find user directory")?;
    let data_dir = proj_dirs.data_local_dir();

    fs::create_dir_all(data_dir)
        .with_context(|| format!("Failed to create local data dir {}", data_dir.display()))?;

    Ok(data_dir.join(LEADERBOARD_FILE_NAME))
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

pub fn remove_leaderboard(path: impl AsRef<Path>) {
    let path = path.as_ref();
    // A leftover from an interrupted flush may or may not exist
    let _ = fs::remove_file(tmp_path(path));

    match fs::remove_file(path) {
        Ok(()) => log::info!("Removed leaderboard at {}", path.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            log::info!("No leaderboard to remove at {}", path.display());
        }
        Err(e) => log::warn!("Unable to remove leaderboard at {}: {e}", path.display()),
    }
}

impl Leaderboard {
    /// Reads a leaderboard written by `flush`; a missing file is an empty board
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::info!("No leaderboard at {}, starting empty", path.display());
                return Ok(Self::new());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };

        let records: Vec<SubmissionRecord> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse leaderboard {}", path.display()))?;
        let board = Self::from_records(records);
        log::info!("Loaded {} leaderboard entries from {}", board.len(), path.display());
        Ok(board)
    }

    /// Writes the board to `path` if it changed since the last flush
    ///
    /// The file is replaced atomically through a sibling `.tmp` file.
    /// Returns whether anything was written.
    pub fn flush(&self, path: impl AsRef<Path>) -> Result<bool> {
        let path = path.as_ref();
        // Cleared before the snapshot so a concurrent record marks it dirty again
        if !self.dirty.swap(false, AtomicOrdering::AcqRel) {
            return Ok(false);
        }

        let result = self.write_snapshot(path);
        if result.is_err() {
            self.dirty.store(true, AtomicOrdering::Release);
        }
        result.map(|()| true)
    }

    fn write_snapshot(&self, path: &Path) -> Result<()> {
        let snapshot = self.snapshot();
        let json = serde_json::to_vec_pretty(&snapshot).context("Failed to serialize leaderboard")?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let tmp = tmp_path(path);
        fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("Failed to move {} into place", tmp.display()))?;

        log::debug!("Flushed {} leaderboard entries to {}", snapshot.len(), path.display());
        Ok(())
    }
}

async fn flush_blocking(leaderboard: &Arc<Leaderboard>, path: &Path) -> Result<bool> {
    let leaderboard = Arc::clone(leaderboard);
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || leaderboard.flush(path)).await?
}

/// Flushes `leaderboard` every `interval` until `token` is cancelled,
/// then once more before returning
pub async fn run_flusher(
    leaderboard: Arc<Leaderboard>,
    path: PathBuf,
    interval: Duration,
    token: CancellationToken,
) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;
    log::info!("Leaderboard flusher started for {}", path.display());

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                log::info!("Leaderboard flusher received shutdown signal, stopping");
                break;
            }

            _ = ticker.tick() => {
                if let Err(e) = flush_blocking(&leaderboard, &path).await {
                    log::error!("Periodic leaderboard flush failed: {e:#}");
                }
            }
        }
    }

    flush_blocking(&leaderboard, &path).await?;
    log::info!("Leaderboard flusher has shut down gracefully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    use crate::leaderboard::tests::record;

    #[test]
    fn test_flush_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("board.json");

        let board = Leaderboard::new();
        board.record(record("u1", "p", 3, 1, 1));
        board.record(record("u2", "p", 4, 2, 2));
        assert!(board.flush(&path).unwrap());
        assert!(!board.is_dirty());
        assert!(!tmp_path(&path).exists());

        let loaded = Leaderboard::load(&path).unwrap();
        assert_eq!(loaded.query(None), board.query(None));
        assert_eq!(loaded.snapshot(), board.snapshot());
    }

    #[test]
    fn test_clean_board_is_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("board.json");

        let board = Leaderboard::new();
        assert!(!board.flush(&path).unwrap());
        assert!(!path.exists());

        board.record(record("u", "p", 1, 1, 1));
        assert!(board.flush(&path).unwrap());
        assert!(!board.flush(&path).unwrap());
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let board = Leaderboard::load(dir.path().join("absent.json")).unwrap();
        assert!(board.is_empty());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("board.json");
        fs::write(&path, "[{\"user_id\": ").unwrap();

        assert!(Leaderboard::load(&path).is_err());
    }

    #[test]
    fn test_failed_flush_stays_dirty() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should go makes the rename fail
        let path = dir.path().join("board.json");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("occupied"), "x").unwrap();

        let board = Leaderboard::new();
        board.record(record("u", "p", 1, 1, 1));
        assert!(board.flush(&path).is_err());
        assert!(board.is_dirty());
    }

    #[test]
    fn test_remove_leaderboard() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("board.json");
        fs::write(&path, "[]").unwrap();
        fs::write(tmp_path(&path), "[]").unwrap();

        remove_leaderboard(&path);
        assert!(!path.exists());
        assert!(!tmp_path(&path).exists());

        // Removing again only logs
        remove_leaderboard(&path);
    }

    #[tokio::test]
    async fn test_flusher_flushes_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("board.json");
        let board = Arc::new(Leaderboard::new());
        let token = CancellationToken::new();

        let flusher = tokio::spawn(run_flusher(
            board.clone(),
            path.clone(),
            Duration::from_secs(3600),
            token.clone(),
        ));
        board.record(record("u", "p", 2, 1, 1));
        token.cancel();
        flusher.await.unwrap().unwrap();

        let loaded = Leaderboard::load(&path).unwrap();
        assert_eq!(loaded.entry("p", "u").unwrap().score, 2);
    }

    #[tokio::test]
    async fn test_flusher_flushes_periodically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("board.json");
        let board = Arc::new(Leaderboard::new());
        let token = CancellationToken::new();

        let flusher = tokio::spawn(run_flusher(
            board.clone(),
            path.clone(),
            Duration::from_millis(50),
            token.clone(),
        ));
        board.record(record("u", "p", 2, 1, 1));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !path.exists() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(path.exists());

        token.cancel();
        flusher.await.unwrap().unwrap();
    }
}
