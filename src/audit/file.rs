//! Per-tenant audit file sink: dated, rotated, lock-guarded JSON lines.
//!
//! Layout is `audit/<tenant>/<yyyy-mm-dd>.log`. Each file opens with a header
//! line recording the chain hash the file starts from (the genesis for the
//! first file of a chain, the carried-over head after a rotation), followed by
//! one canonical-JSON entry per line. Appends hold an exclusive advisory lock
//! over write + sync; readers take a shared lock. Files older than the
//! retention window are pruned.
//!
//! The sink is the collaborator-side persistence boundary: sessions hand it
//! committed entries after `end_turn`, never mid-turn.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::entity::TenantId;
use crate::error::{AuditError, CortexResult};

use super::{verify_chain, AuditEntry, IntegrityReport, GENESIS_HASH};

/// First line of every audit file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FileHeader {
    genesis: String,
}

/// Writes committed audit entries to dated per-tenant files.
#[derive(Debug, Clone)]
pub struct AuditFileSink {
    root: PathBuf,
    tenant: TenantId,
    max_file_bytes: u64,
    retention_days: u32,
}

impl AuditFileSink {
    pub fn new(
        root: impl Into<PathBuf>,
        tenant: TenantId,
        max_file_bytes: u64,
        retention_days: u32,
    ) -> Self {
        Self {
            root: root.into(),
            tenant,
            max_file_bytes,
            retention_days,
        }
    }

    /// Directory holding this tenant's audit files.
    pub fn tenant_dir(&self) -> PathBuf {
        self.root.join("audit").join(self.tenant.as_str())
    }

    /// Path of the active file for a date.
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.tenant_dir().join(format!("{date}.log"))
    }

    /// Append entries under today's date.
    pub fn append(&self, entries: &[AuditEntry]) -> CortexResult<()> {
        self.append_on(chrono::Utc::now().date_naive(), entries)
    }

    /// Append entries under an explicit date (tests, backfills).
    pub fn append_on(&self, date: NaiveDate, entries: &[AuditEntry]) -> CortexResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let dir = self.tenant_dir();
        fs::create_dir_all(&dir).map_err(|source| AuditError::Io {
            path: dir.display().to_string(),
            source,
        })?;

        let path = self.path_for(date);
        for entry in entries {
            self.append_one(&path, date, entry)?;
        }
        Ok(())
    }

    fn append_one(&self, path: &Path, date: NaiveDate, entry: &AuditEntry) -> CortexResult<()> {
        let io_err = |source| AuditError::Io {
            path: path.display().to_string(),
            source,
        };

        let exists = path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(path)
            .map_err(io_err)?;
        file.lock_exclusive().map_err(io_err)?;

        let result = (|| -> Result<(), AuditError> {
            let len = file.metadata().map_err(io_err)?.len();
            if !exists || len == 0 {
                let header = FileHeader {
                    genesis: GENESIS_HASH.to_string(),
                };
                writeln!(file, "{}", serde_json::to_string(&header).expect("header")).map_err(io_err)?;
            } else if len >= self.max_file_bytes {
                // Rotate: the current file moves aside; the fresh file's
                // header carries the chain head so per-file verification
                // still works.
                fs2::FileExt::unlock(&file).map_err(io_err)?;
                let carried = last_chain_hash(path)?.unwrap_or_else(|| GENESIS_HASH.to_string());
                let rotated = self.next_rotation_path(date);
                fs::rename(path, &rotated).map_err(io_err)?;

                file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .read(true)
                    .open(path)
                    .map_err(io_err)?;
                file.lock_exclusive().map_err(io_err)?;
                let header = FileHeader { genesis: carried };
                writeln!(file, "{}", serde_json::to_string(&header).expect("header")).map_err(io_err)?;
            }

            let line = serde_json::to_string(entry).expect("entry serialization is infallible");
            writeln!(file, "{line}").map_err(io_err)?;
            file.sync_all().map_err(io_err)?;
            Ok(())
        })();

        let _ = fs2::FileExt::unlock(&file);
        Ok(result?)
    }

    fn next_rotation_path(&self, date: NaiveDate) -> PathBuf {
        let dir = self.tenant_dir();
        for n in 1.. {
            let candidate = dir.join(format!("{date}.{n}.log"));
            if !candidate.exists() {
                return candidate;
            }
        }
        unreachable!("rotation index space exhausted")
    }

    /// Read all entries from one file under a shared lock.
    pub fn read_entries(&self, path: &Path) -> CortexResult<Vec<AuditEntry>> {
        let (_, entries) = read_file(path)?;
        Ok(entries)
    }

    /// Verify one file's chain against its header.
    pub fn verify_file(&self, path: &Path) -> CortexResult<IntegrityReport> {
        let (header, entries) = read_file(path)?;
        Ok(verify_chain(&entries, &header.genesis))
    }

    /// Remove files older than the retention window. Returns removed paths.
    pub fn prune(&self, today: NaiveDate) -> CortexResult<Vec<PathBuf>> {
        let dir = self.tenant_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let reader = fs::read_dir(&dir).map_err(|source| AuditError::Io {
            path: dir.display().to_string(),
            source,
        })?;

        let mut removed = Vec::new();
        for dent in reader.flatten() {
            let path = dent.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.len() < 10 {
                continue;
            }
            let Ok(date) = NaiveDate::parse_from_str(&name[..10], "%Y-%m-%d") else {
                continue;
            };
            if (today - date).num_days() > self.retention_days as i64 {
                fs::remove_file(&path).map_err(|source| AuditError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
                removed.push(path);
            }
        }
        Ok(removed)
    }
}

fn last_chain_hash(path: &Path) -> Result<Option<String>, AuditError> {
    let (_, entries) = read_file(path)?;
    Ok(entries.last().map(|e| e.chain_hash.clone()))
}

fn read_file(path: &Path) -> Result<(FileHeader, Vec<AuditEntry>), AuditError> {
    let io_err = |source| AuditError::Io {
        path: path.display().to_string(),
        source,
    };
    let file = File::open(path).map_err(io_err)?;
    file.lock_shared().map_err(io_err)?;

    let result = (|| {
        let reader = BufReader::new(&file);
        let mut lines = reader.lines().enumerate();

        let header = match lines.next() {
            Some((_, Ok(line))) => {
                serde_json::from_str::<FileHeader>(&line).map_err(|e| AuditError::Malformed {
                    line: 1,
                    message: e.to_string(),
                })?
            }
            Some((_, Err(source))) => return Err(io_err(source)),
            None => {
                return Ok((
                    FileHeader {
                        genesis: GENESIS_HASH.to_string(),
                    },
                    Vec::new(),
                ))
            }
        };

        let mut entries = Vec::new();
        for (index, line) in lines {
            let line = line.map_err(io_err)?;
            if line.is_empty() {
                continue;
            }
            let entry =
                serde_json::from_str::<AuditEntry>(&line).map_err(|e| AuditError::Malformed {
                    line: index + 1,
                    message: e.to_string(),
                })?;
            entries.push(entry);
        }
        Ok((header, entries))
    })();

    let _ = fs2::FileExt::unlock(&file);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditEventType, AuditLog, AuditSeverity};
    use crate::entity::{SessionId, UserId};
    use std::collections::BTreeMap;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 14).unwrap()
    }

    fn sample_log(n: usize) -> AuditLog {
        let tenant = TenantId::new("acme").unwrap();
        let session = SessionId::new("s-1").unwrap();
        let user = UserId::new("u-1").unwrap();
        let mut log = AuditLog::new(true);
        for i in 0..n {
            log.append(
                &tenant,
                &session,
                &user,
                i as f64,
                AuditEventType::WeightChange,
                AuditSeverity::Info,
                format!("update-{i}"),
                BTreeMap::new(),
                "success",
            );
        }
        log
    }

    fn sink(root: &Path) -> AuditFileSink {
        AuditFileSink::new(root, TenantId::new("acme").unwrap(), 16 * 1024 * 1024, 90)
    }

    #[test]
    fn append_read_verify_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let sink = sink(dir.path());
        let log = sample_log(5);

        sink.append_on(date(), log.entries()).unwrap();
        let path = sink.path_for(date());
        let entries = sink.read_entries(&path).unwrap();
        assert_eq!(entries.len(), 5);
        assert_eq!(entries, log.entries());

        let report = sink.verify_file(&path).unwrap();
        assert!(report.valid);
    }

    #[test]
    fn tampered_file_fails_verification_at_index() {
        let dir = tempfile::TempDir::new().unwrap();
        let sink = sink(dir.path());
        let log = sample_log(10);
        sink.append_on(date(), log.entries()).unwrap();

        // Externally edit entry 5's outcome, keeping its hash.
        let path = sink.path_for(date());
        let content = fs::read_to_string(&path).unwrap();
        let edited: Vec<String> = content
            .lines()
            .enumerate()
            .map(|(i, line)| {
                if i == 6 {
                    line.replace("\"outcome\":\"success\"", "\"outcome\":\"failure\"")
                } else {
                    line.to_string()
                }
            })
            .collect();
        fs::write(&path, edited.join("\n")).unwrap();

        let report = sink.verify_file(&path).unwrap();
        assert!(!report.valid);
        assert_eq!(report.break_index, Some(5));
    }

    #[test]
    fn rotation_carries_the_chain_head() {
        let dir = tempfile::TempDir::new().unwrap();
        // Tiny limit: every entry forces a rotation.
        let sink = AuditFileSink::new(dir.path(), TenantId::new("acme").unwrap(), 64, 90);
        let log = sample_log(3);
        sink.append_on(date(), log.entries()).unwrap();

        let rotated = sink.tenant_dir().join(format!("{}.1.log", date()));
        assert!(rotated.exists(), "first rotation file should exist");

        // Every surviving file verifies against its own header.
        for entry in fs::read_dir(sink.tenant_dir()).unwrap().flatten() {
            let report = sink.verify_file(&entry.path()).unwrap();
            assert!(report.valid, "file {:?} failed verification", entry.path());
        }
    }

    #[test]
    fn prune_removes_expired_files_only() {
        let dir = tempfile::TempDir::new().unwrap();
        let sink = AuditFileSink::new(dir.path(), TenantId::new("acme").unwrap(), 1 << 20, 30);
        let log = sample_log(2);

        let old = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let recent = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        sink.append_on(old, log.entries()).unwrap();
        sink.append_on(recent, log.entries()).unwrap();

        let removed = sink.prune(NaiveDate::from_ymd_opt(2026, 3, 14).unwrap()).unwrap();
        assert_eq!(removed.len(), 1);
        assert!(!sink.path_for(old).exists());
        assert!(sink.path_for(recent).exists());
    }
}
