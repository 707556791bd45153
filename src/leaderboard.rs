mod persist;

pub use persist::{default_leaderboard_path, remove_leaderboard, run_flusher};

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::judge::{GradeReport, SURFACED_DIAGNOSTICS, Verdict};

/// One graded submission as the leaderboard stores it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub submission_id: Uuid,
    pub user_id: String,
    pub problem_id: String,
    pub score: usize,
    pub total: usize,
    pub verdict: Verdict,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub diagnostics: Vec<String>,
}

impl SubmissionRecord {
    pub fn from_report(report: &GradeReport) -> Self {
        Self {
            submission_id: report.submission_id,
            user_id: report.user_id.clone(),
            problem_id: report.problem_id.clone(),
            score: report.passed_count,
            total: report.total_count,
            verdict: report.verdict,
            timestamp: report.graded_at,
            diagnostics: report
                .error_details()
                .iter()
                .take(SURFACED_DIAGNOSTICS)
                .cloned()
                .collect(),
        }
    }
}

/// A ranked row of the leaderboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub submission_id: Uuid,
    pub user_id: String,
    pub problem_id: String,
    pub score: usize,
    pub total: usize,
    pub verdict: Verdict,
    pub summary: String,
    pub timestamp: DateTime<Utc>,
}

impl LeaderboardEntry {
    fn new(rank: usize, record: &SubmissionRecord) -> Self {
        Self {
            rank,
            submission_id: record.submission_id,
            user_id: record.user_id.clone(),
            problem_id: record.problem_id.clone(),
            score: record.score,
            total: record.total,
            verdict: record.verdict,
            summary: format!("{}/{} tests passed", record.score, record.total),
            timestamp: record.timestamp,
        }
    }
}

/// What `record` did with the submitted record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// First record for this user on this problem
    Inserted,
    /// Strictly better than the previous best, which it replaced
    Replaced,
    /// Not better than the previous best and discarded
    Kept,
}

/// Score descending, then earlier timestamp, then smaller submission id
fn ranking_order(a: &SubmissionRecord, b: &SubmissionRecord) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| a.timestamp.cmp(&b.timestamp))
        .then_with(|| a.submission_id.cmp(&b.submission_id))
}

type Key = (String, String);

/// Best record per (problem, user)
///
/// All reads and writes of the map go through one lock, so each `record`
/// is an atomic read-modify-write and queries never see a half-applied
/// update.
#[derive(Default)]
pub struct Leaderboard {
    records: RwLock<HashMap<Key, SubmissionRecord>>,
    dirty: AtomicBool,
}

impl Leaderboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a leaderboard from history, keeping the best record per pair
    pub fn from_records(records: impl IntoIterator<Item = SubmissionRecord>) -> Self {
        let mut map = HashMap::new();
        for record in records {
            merge(&mut map, record);
        }
        Self {
            records: RwLock::new(map),
            dirty: AtomicBool::new(false),
        }
    }

    /// Merges `record`, replacing the current best only on a strictly higher score
    pub fn record(&self, record: SubmissionRecord) -> RecordOutcome {
        let outcome = merge(&mut self.records.write(), record);
        if outcome != RecordOutcome::Kept {
            self.dirty.store(true, AtomicOrdering::Release);
        }
        outcome
    }

    /// Merges `record` and returns the retained entry for its user and problem
    ///
    /// The rank is computed under the same lock as the merge.
    pub fn record_and_rank(&self, record: SubmissionRecord) -> (RecordOutcome, LeaderboardEntry) {
        let mut records = self.records.write();
        let key = (record.problem_id.clone(), record.user_id.clone());
        let outcome = merge(&mut records, record);
        if outcome != RecordOutcome::Kept {
            self.dirty.store(true, AtomicOrdering::Release);
        }

        let retained = &records[&key];
        let rank = 1 + records
            .values()
            .filter(|other| other.problem_id == retained.problem_id)
            .filter(|other| ranking_order(other, retained) == Ordering::Less)
            .count();
        (outcome, LeaderboardEntry::new(rank, retained))
    }

    /// Ranked entries for one problem, or for all problems in one ordering
    pub fn query(&self, problem_id: Option<&str>) -> Vec<LeaderboardEntry> {
        let records = self.records.read();
        let mut selected: Vec<&SubmissionRecord> = records
            .values()
            .filter(|record| problem_id.is_none_or(|id| record.problem_id == id))
            .collect();
        selected.sort_by(|a, b| ranking_order(a, b));

        selected
            .into_iter()
            .enumerate()
            .map(|(i, record)| LeaderboardEntry::new(i + 1, record))
            .collect()
    }

    /// The retained entry of `user_id` on `problem_id`, ranked within that problem
    pub fn entry(&self, problem_id: &str, user_id: &str) -> Option<LeaderboardEntry> {
        self.query(Some(problem_id))
            .into_iter()
            .find(|entry| entry.user_id == user_id)
    }

    /// Best record of every pair, in ranking order
    pub fn snapshot(&self) -> Vec<SubmissionRecord> {
        let records = self.records.read();
        let mut snapshot: Vec<SubmissionRecord> = records.values().cloned().collect();
        snapshot.sort_by(ranking_order);
        snapshot
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Whether anything changed since the last successful flush
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(AtomicOrdering::Acquire)
    }
}

fn merge(map: &mut HashMap<Key, SubmissionRecord>, record: SubmissionRecord) -> RecordOutcome {
    let key = (record.problem_id.clone(), record.user_id.clone());
    match map.get_mut(&key) {
        None => {
            log::debug!(
                "New leaderboard entry for {} on {}: {}",
                record.user_id,
                record.problem_id,
                record.score
            );
            map.insert(key, record);
            RecordOutcome::Inserted
        }
        Some(existing) if record.score > existing.score => {
            log::debug!(
                "{} improved on {}: {} -> {}",
                record.user_id,
                record.problem_id,
                existing.score,
                record.score
            );
            *existing = record;
            RecordOutcome::Replaced
        }
        Some(_) => RecordOutcome::Kept,
    }
}
