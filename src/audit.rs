//! Append-only CSV audit log of processed-email records.
//!
//! One row per processing attempt, ten fixed columns. Every operation is a
//! whole-file read or rewrite — no index, no multi-process coordination
//! (last writer wins if two processes ever share one file). Read and append
//! failures degrade to empty/false/zero; only creation failures are fatal.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, warn};

use crate::error::AuditError;
use crate::model::{ActionType, ProcessedEmail};

/// Column order of the store; must match `ProcessedEmail` field order.
const HEADER: [&str; 10] = [
    "id",
    "original_message_id",
    "original_subject",
    "original_sender",
    "processed_at",
    "action_taken",
    "reason",
    "sent_to_team",
    "success",
    "error_message",
];

// ── Filters & stats ─────────────────────────────────────────────────

/// Optional read filters. `limit` keeps the **last** N matching rows — the
/// most recently appended ones.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub action: Option<ActionType>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// Aggregate statistics over the whole store.
#[derive(Debug, Clone, Default)]
pub struct AuditStats {
    pub total_processed: usize,
    pub successful: usize,
    pub failed: usize,
    /// Percentage, 0 when the store is empty.
    pub success_rate: f64,
    pub action_breakdown: HashMap<String, usize>,
    pub team_distribution: HashMap<String, usize>,
    pub recent_24h: usize,
}

// ── Audit log ───────────────────────────────────────────────────────

/// CSV-backed audit store.
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    /// Open the store, creating the file and its header if needed.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, AuditError> {
        let path = path.into();

        let create = |reason: String| AuditError::Create {
            path: path.display().to_string(),
            reason,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| create(e.to_string()))?;
        }

        if !path.exists() {
            let mut writer = csv::Writer::from_path(&path).map_err(|e| create(e.to_string()))?;
            writer
                .write_record(HEADER)
                .and_then(|()| writer.flush().map_err(Into::into))
                .map_err(|e| create(e.to_string()))?;
            info!(path = %path.display(), "Created audit store");
        }

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record. Returns false (and logs) on failure.
    pub fn append(&self, record: &ProcessedEmail) -> bool {
        match self.try_append(record) {
            Ok(()) => {
                debug!(record_id = %record.id, "Saved processed email record");
                true
            }
            Err(e) => {
                error!(error = %e, "Failed to append audit record");
                false
            }
        }
    }

    fn try_append(&self, record: &ProcessedEmail) -> Result<(), AuditError> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer.serialize(record)?;
        writer.flush()?;
        Ok(())
    }

    /// All rows in append order. Rows that fail to parse are skipped with a
    /// warning; an unreadable file yields an empty vec.
    fn read_all(&self) -> Vec<ProcessedEmail> {
        let mut reader = match csv::Reader::from_path(&self.path) {
            Ok(reader) => reader,
            Err(e) => {
                error!(error = %e, "Failed to read audit store");
                return Vec::new();
            }
        };

        let mut records = Vec::new();
        for row in reader.deserialize() {
            match row {
                Ok(record) => records.push(record),
                Err(e) => warn!(error = %e, "Skipping unparseable audit row"),
            }
        }
        records
    }

    /// Filtered read; see `RecordFilter` for limit semantics.
    pub fn records(&self, filter: &RecordFilter) -> Vec<ProcessedEmail> {
        let mut records: Vec<ProcessedEmail> = self
            .read_all()
            .into_iter()
            .filter(|r| filter.action.is_none_or(|a| r.action_taken == a))
            .filter(|r| filter.date_from.is_none_or(|from| r.processed_at >= from))
            .filter(|r| filter.date_to.is_none_or(|to| r.processed_at <= to))
            .collect();

        if let Some(limit) = filter.limit {
            if records.len() > limit {
                records.drain(..records.len() - limit);
            }
        }
        records
    }

    /// Aggregate statistics; zeroed when the store is empty or unreadable.
    pub fn stats(&self) -> AuditStats {
        let records = self.read_all();
        if records.is_empty() {
            return AuditStats::default();
        }

        let total_processed = records.len();
        let successful = records.iter().filter(|r| r.success).count();
        let failed = total_processed - successful;

        let mut action_breakdown: HashMap<String, usize> = HashMap::new();
        let mut team_distribution: HashMap<String, usize> = HashMap::new();
        let recent_cutoff = Utc::now() - Duration::days(1);
        let mut recent_24h = 0;

        for record in &records {
            *action_breakdown
                .entry(record.action_taken.as_str().to_string())
                .or_default() += 1;
            *team_distribution
                .entry(record.sent_to_team.clone())
                .or_default() += 1;
            if record.processed_at >= recent_cutoff {
                recent_24h += 1;
            }
        }

        AuditStats {
            total_processed,
            successful,
            failed,
            success_rate: successful as f64 / total_processed as f64 * 100.0,
            action_breakdown,
            team_distribution,
            recent_24h,
        }
    }

    /// Whether any record exists for this message id, success or not.
    pub fn check_duplicate(&self, message_id: &str) -> bool {
        self.read_all()
            .iter()
            .any(|r| r.original_message_id == message_id)
    }

    /// Drop rows older than `days` and rewrite the store. Returns the
    /// number of rows removed; 0 on any failure.
    pub fn prune_older_than(&self, days: u32) -> usize {
        let records = self.read_all();
        if records.is_empty() {
            return 0;
        }

        let cutoff = Utc::now() - Duration::days(days as i64);
        let initial = records.len();
        let retained: Vec<ProcessedEmail> = records
            .into_iter()
            .filter(|r| r.processed_at >= cutoff)
            .collect();
        let removed = initial - retained.len();

        if removed == 0 {
            return 0;
        }

        match self.rewrite(&retained) {
            Ok(()) => {
                info!(removed, days, "Cleaned up old audit records");
                removed
            }
            Err(e) => {
                error!(error = %e, "Failed to rewrite audit store during cleanup");
                0
            }
        }
    }

    fn rewrite(&self, records: &[ProcessedEmail]) -> Result<(), AuditError> {
        let mut writer = csv::Writer::from_path(&self.path)?;
        writer.write_record(HEADER)?;
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Export the whole store as pretty-printed JSON. Returns false (and
    /// logs) on failure.
    pub fn export_json(&self, output: &Path) -> bool {
        let records = self.read_all();
        let result = File::create(output)
            .map_err(AuditError::from)
            .and_then(|file| {
                serde_json::to_writer_pretty(file, &records)
                    .map_err(|e| AuditError::Io(std::io::Error::other(e)))
            });

        match result {
            Ok(()) => {
                info!(count = records.len(), output = %output.display(), "Exported audit records");
                true
            }
            Err(e) => {
                error!(error = %e, "Failed to export audit records");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn record(message_id: &str, action: ActionType, success: bool) -> ProcessedEmail {
        ProcessedEmail {
            id: Uuid::new_v4(),
            original_message_id: message_id.to_string(),
            original_subject: "Alert: something failed".into(),
            original_sender: "monitoring@company.com".into(),
            processed_at: Utc::now(),
            action_taken: action,
            reason: "because".into(),
            sent_to_team: "backend@company.com".into(),
            success,
            error_message: if success { None } else { Some("boom".into()) },
        }
    }

    fn record_aged(message_id: &str, age_days: i64) -> ProcessedEmail {
        let mut r = record(message_id, ActionType::Backend, true);
        r.processed_at = Utc::now() - Duration::days(age_days);
        r
    }

    fn open_log(dir: &tempfile::TempDir) -> AuditLog {
        AuditLog::new(dir.path().join("data").join("processed.csv")).unwrap()
    }

    #[test]
    fn creates_file_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let log = open_log(&dir);
        let content = std::fs::read_to_string(log.path()).unwrap();
        assert!(content.starts_with("id,original_message_id,original_subject"));
        // Reopening must not truncate or duplicate the header.
        log.append(&record("m1", ActionType::Code, true));
        let log = AuditLog::new(log.path()).unwrap();
        assert_eq!(log.records(&RecordFilter::default()).len(), 1);
    }

    #[test]
    fn append_then_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let log = open_log(&dir);
        assert!(log.append(&record("m1", ActionType::ReHit, true)));
        assert!(log.append(&record("m2", ActionType::Backend, false)));

        let records = log.records(&RecordFilter::default());
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].original_message_id, "m1");
        assert_eq!(records[0].action_taken, ActionType::ReHit);
        assert!(records[0].success);
        assert!(records[0].error_message.is_none());
        assert_eq!(records[1].error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn duplicate_check_ignores_success_flag() {
        let dir = tempfile::tempdir().unwrap();
        let log = open_log(&dir);
        log.append(&record("failed_one", ActionType::Backend, false));
        assert!(log.check_duplicate("failed_one"));
        assert!(!log.check_duplicate("never_seen"));
    }

    #[test]
    fn records_filter_by_action() {
        let dir = tempfile::tempdir().unwrap();
        let log = open_log(&dir);
        log.append(&record("m1", ActionType::ReHit, true));
        log.append(&record("m2", ActionType::Backend, true));
        log.append(&record("m3", ActionType::ReHit, false));

        let filter = RecordFilter {
            action: Some(ActionType::ReHit),
            ..Default::default()
        };
        let records = log.records(&filter);
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.action_taken == ActionType::ReHit));
    }

    #[test]
    fn records_filter_by_date_range() {
        let dir = tempfile::tempdir().unwrap();
        let log = open_log(&dir);
        log.append(&record_aged("old", 10));
        log.append(&record_aged("recent", 1));

        let filter = RecordFilter {
            date_from: Some(Utc::now() - Duration::days(5)),
            ..Default::default()
        };
        let records = log.records(&filter);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].original_message_id, "recent");

        let filter = RecordFilter {
            date_to: Some(Utc::now() - Duration::days(5)),
            ..Default::default()
        };
        let records = log.records(&filter);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].original_message_id, "old");
    }

    #[test]
    fn limit_keeps_most_recent_rows() {
        let dir = tempfile::tempdir().unwrap();
        let log = open_log(&dir);
        for i in 0..5 {
            log.append(&record(&format!("m{i}"), ActionType::Backend, true));
        }

        let filter = RecordFilter {
            limit: Some(2),
            ..Default::default()
        };
        let records = log.records(&filter);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].original_message_id, "m3");
        assert_eq!(records[1].original_message_id, "m4");
    }

    #[test]
    fn stats_totals_and_rate() {
        let dir = tempfile::tempdir().unwrap();
        let log = open_log(&dir);
        log.append(&record("m1", ActionType::Backend, true));
        log.append(&record("m2", ActionType::Backend, true));
        log.append(&record("m3", ActionType::Code, false));

        let stats = log.stats();
        assert_eq!(stats.total_processed, 3);
        assert_eq!(stats.successful + stats.failed, stats.total_processed);
        assert!((stats.success_rate - 200.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.action_breakdown["Backend"], 2);
        assert_eq!(stats.action_breakdown["Code"], 1);
        assert_eq!(stats.team_distribution["backend@company.com"], 3);
        assert_eq!(stats.recent_24h, 3);
    }

    #[test]
    fn stats_empty_store_is_zeroed() {
        let dir = tempfile::tempdir().unwrap();
        let log = open_log(&dir);
        let stats = log.stats();
        assert_eq!(stats.total_processed, 0);
        assert_eq!(stats.success_rate, 0.0);
    }

    #[test]
    fn prune_removes_exactly_expired_rows() {
        let dir = tempfile::tempdir().unwrap();
        let log = open_log(&dir);
        log.append(&record_aged("ancient", 100));
        log.append(&record_aged("old", 91));
        log.append(&record_aged("kept", 10));
        log.append(&record_aged("fresh", 0));

        let removed = log.prune_older_than(90);
        assert_eq!(removed, 2);

        let remaining = log.records(&RecordFilter::default());
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|r| r.original_message_id != "ancient"));
        assert!(log.check_duplicate("kept"));
    }

    #[test]
    fn prune_noop_when_nothing_expired() {
        let dir = tempfile::tempdir().unwrap();
        let log = open_log(&dir);
        log.append(&record_aged("fresh", 1));
        assert_eq!(log.prune_older_than(90), 0);
        assert_eq!(log.records(&RecordFilter::default()).len(), 1);
    }

    #[test]
    fn unparseable_rows_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let log = open_log(&dir);
        log.append(&record("good", ActionType::Backend, true));

        // Corrupt the store with a malformed row.
        use std::io::Write;
        let mut file = OpenOptions::new().append(true).open(log.path()).unwrap();
        writeln!(file, "not,a,valid,row").unwrap();

        log.append(&record("also_good", ActionType::Code, true));
        let records = log.records(&RecordFilter::default());
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn export_writes_every_row() {
        let dir = tempfile::tempdir().unwrap();
        let log = open_log(&dir);
        log.append(&record("m1", ActionType::Backend, true));
        log.append(&record("m2", ActionType::Code, false));

        let out = dir.path().join("export.json");
        assert!(log.export_json(&out));

        let exported: Vec<ProcessedEmail> =
            serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(exported.len(), 2);
        assert_eq!(exported[1].original_message_id, "m2");
    }
}
