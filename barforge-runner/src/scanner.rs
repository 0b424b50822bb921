//! Artifact scanner: inventory a stage directory without writing to it.
//!
//! Files are grouped by stem. A sidecar claims the sibling files listed in its
//! `file_roles`, so one `emit` scans as exactly one descriptor. Anything left
//! unclaimed is grouped by its own stem and reported invalid.

use crate::stem::parse_stem;
use barforge_core::capabilities::RuntimeOptions;
use barforge_core::codec::{Codec, FormatDescriptor};
use barforge_core::domain::Role;
use barforge_core::error::Result;
use barforge_core::sidecar::{Sidecar, SIDECAR_SUFFIX};
use barforge_core::Stage;
use chrono::{DateTime, NaiveDateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

pub const UNKNOWN_WINDOW: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactDescriptor {
    pub stem: String,
    pub asset: String,
    /// Window label, or `Unknown` when the stem does not carry a known one.
    pub window: String,
    pub timeframes: Vec<String>,
    pub roles: BTreeMap<Role, PathBuf>,
    pub created_at: NaiveDateTime,
    /// Bytes across data files and sidecar.
    pub total_size: u64,
    pub sidecar: Option<PathBuf>,
    pub valid: bool,
    pub problems: Vec<String>,
}

impl ArtifactDescriptor {
    /// Retention identity: `(asset, window, timeframes)`.
    pub fn identity(&self) -> (&str, &str, &[String]) {
        (&self.asset, &self.window, &self.timeframes)
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.roles.values().cloned().chain(self.sidecar.clone()).collect()
    }
}

/// Which descriptors per identity a scan reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetentionPolicy {
    #[default]
    KeepAll,
    /// The `n` newest per identity.
    KeepLatest(usize),
}

impl RetentionPolicy {
    /// Split sorted descriptors into `(kept, dropped)`.
    ///
    /// Only valid descriptors fill an identity's quota. Invalid ones are
    /// always reported and never dropped, so an orphan can neither displace
    /// a valid artifact nor be deleted by a prune.
    pub fn partition(
        &self,
        descriptors: Vec<ArtifactDescriptor>,
    ) -> (Vec<ArtifactDescriptor>, Vec<ArtifactDescriptor>) {
        let RetentionPolicy::KeepLatest(n) = *self else {
            return (descriptors, Vec::new());
        };
        let mut seen: HashMap<(String, String, Vec<String>), usize> = HashMap::new();
        descriptors.into_iter().partition(|d| {
            if !d.valid {
                return true;
            }
            let key = (d.asset.clone(), d.window.clone(), d.timeframes.clone());
            let count = seen.entry(key).or_default();
            *count += 1;
            *count <= n
        })
    }
}

/// Scan results for both stage directories of an output root.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OutputInventory {
    pub stage1: Vec<ArtifactDescriptor>,
    pub stage2: Vec<ArtifactDescriptor>,
}

#[derive(Debug, Clone)]
pub struct Scanner {
    codec: Codec,
    retention: RetentionPolicy,
    parallel_threshold: usize,
    workers: usize,
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new(Codec::default(), &RuntimeOptions::default())
    }
}

impl Scanner {
    pub fn new(codec: Codec, options: &RuntimeOptions) -> Self {
        Self {
            codec,
            retention: RetentionPolicy::default(),
            parallel_threshold: options.scan_parallel_threshold,
            workers: options.worker_count(),
        }
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    /// Descriptors for `dir` (non-recursive), newest first, filtered by the
    /// retention policy. A missing directory scans as empty.
    pub fn scan(&self, dir: &Path) -> Result<Vec<ArtifactDescriptor>> {
        let all = self.scan_all(dir)?;
        Ok(self.retention.partition(all).0)
    }

    /// Descriptors the retention policy would not report. Never deletes.
    pub fn prune_candidates(&self, dir: &Path) -> Result<Vec<ArtifactDescriptor>> {
        let all = self.scan_all(dir)?;
        Ok(self.retention.partition(all).1)
    }

    /// Scan `root/stage1` and `root/stage2`.
    pub fn scan_output(&self, root: &Path) -> Result<OutputInventory> {
        Ok(OutputInventory {
            stage1: self.scan(&root.join(Stage::One.dir_name()))?,
            stage2: self.scan(&root.join(Stage::Two.dir_name()))?,
        })
    }

    fn scan_all(&self, dir: &Path) -> Result<Vec<ArtifactDescriptor>> {
        if !dir.is_dir() {
            log::debug!("{} does not exist, nothing to scan", dir.display());
            return Ok(Vec::new());
        }

        let mut sidecars = Vec::new();
        let mut data_files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            if Sidecar::stem_of(&path).is_some() {
                sidecars.push(path);
            } else if recognised(&path) {
                data_files.push(path);
            }
        }
        let file_count = sidecars.len() + data_files.len();
        let groups = group(dir, sidecars, data_files);

        let mut descriptors = if file_count > self.parallel_threshold {
            match rayon::ThreadPoolBuilder::new().num_threads(self.workers).build() {
                Ok(pool) => {
                    log::debug!("validating {file_count} files on {} threads", self.workers);
                    pool.install(|| groups.into_par_iter().map(|g| self.describe(g)).collect())
                }
                Err(e) => {
                    log::warn!("scanner pool unavailable ({e}), validating serially");
                    groups.into_iter().map(|g| self.describe(g)).collect()
                }
            }
        } else {
            groups.into_iter().map(|g| self.describe(g)).collect::<Vec<_>>()
        };

        descriptors.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.stem.cmp(&b.stem)));
        log::info!("scanned {}: {} artifacts", dir.display(), descriptors.len());
        Ok(descriptors)
    }

    fn describe(&self, group: Group) -> ArtifactDescriptor {
        let parts = parse_stem(&group.stem);
        let mut problems = group.problems;
        let sidecar = match group.sidecar {
            Some((_, Ok(sidecar))) => Some(sidecar),
            Some((path, Err(e))) => {
                problems.push(format!("corrupt sidecar {}: {e}", file_name(&path)));
                None
            }
            None => {
                problems.push("no sidecar".to_string());
                None
            }
        };

        let primary = group
            .files
            .iter()
            .find(|(_, p)| p.file_stem().and_then(|s| s.to_str()) == Some(group.stem.as_str()))
            .or_else(|| group.files.first())
            .map(|(_, p)| p.clone());
        let primary_ok = match &primary {
            Some(path) => match self.codec.probe(path) {
                Ok(_) => true,
                Err(e) => {
                    problems.push(e.to_string());
                    false
                }
            },
            None => {
                problems.push("no data file".to_string());
                false
            }
        };

        let total_size = group
            .files
            .iter()
            .map(|(_, p)| p)
            .chain(group.sidecar_path.as_ref())
            .filter_map(|p| fs::metadata(p).ok())
            .map(|m| m.len())
            .sum();

        let created_at = parts
            .created_at
            .or_else(|| sidecar.as_ref().map(|s| s.created_at.naive_utc()))
            .or_else(|| primary.as_deref().and_then(modified_at))
            .unwrap_or_default();

        let asset = sidecar
            .as_ref()
            .map(|s| s.asset.clone())
            .unwrap_or(parts.asset);
        let window = parts
            .window
            .map(|w| w.label().to_string())
            .or_else(|| sidecar.as_ref().map(|s| s.window.clone()))
            .unwrap_or_else(|| UNKNOWN_WINDOW.to_string());
        let timeframes = match &sidecar {
            Some(s) if s.timeframe.is_some() => s.timeframe_labels(),
            _ => parts.timeframes.iter().map(|tf| tf.label().to_string()).collect(),
        };

        let valid = primary_ok && sidecar.is_some() && problems.is_empty();
        ArtifactDescriptor {
            stem: group.stem,
            asset,
            window,
            timeframes,
            roles: group.files.into_iter().collect(),
            created_at,
            total_size,
            sidecar: group.sidecar_path,
            valid,
            problems,
        }
    }
}

// ── Grouping ─────────────────────────────────────────────────────────

struct Group {
    stem: String,
    files: Vec<(Role, PathBuf)>,
    sidecar: Option<(PathBuf, Result<Sidecar>)>,
    sidecar_path: Option<PathBuf>,
    problems: Vec<String>,
}

impl Group {
    fn new(stem: String) -> Self {
        Self {
            stem,
            files: Vec::new(),
            sidecar: None,
            sidecar_path: None,
            problems: Vec::new(),
        }
    }
}

fn recognised(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(FormatDescriptor::from_extension)
        .is_some()
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn modified_at(path: &Path) -> Option<NaiveDateTime> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified).naive_utc())
}

fn group(dir: &Path, sidecars: Vec<PathBuf>, data_files: Vec<PathBuf>) -> Vec<Group> {
    let mut groups: BTreeMap<String, Group> = BTreeMap::new();
    // file name -> (claiming stem, role)
    let mut claimed: HashMap<String, (String, Role)> = HashMap::new();

    for path in sidecars {
        let Some(stem) = Sidecar::stem_of(&path).map(str::to_string) else {
            continue;
        };
        let parsed = Sidecar::read(&path);
        let group = groups
            .entry(stem.clone())
            .or_insert_with(|| Group::new(stem.clone()));
        if let Ok(sidecar) = &parsed {
            for (role, name) in &sidecar.file_roles {
                if dir.join(name).is_file() {
                    claimed.insert(name.clone(), (stem.clone(), *role));
                } else {
                    group.problems.push(format!("missing {role} file {name}"));
                }
            }
        }
        group.sidecar_path = Some(path.clone());
        group.sidecar = Some((path, parsed));
    }

    for path in data_files {
        let name = file_name(&path);
        let (stem, role) = match claimed.get(&name) {
            Some((stem, role)) => (stem.clone(), *role),
            None => {
                let stem = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let role = parse_stem(&stem).role.unwrap_or_else(|| {
                    // recognised() already accepted the extension
                    FormatDescriptor::from_path(&path)
                        .map(Role::from_format)
                        .unwrap_or(Role::Raw)
                });
                (stem, role)
            }
        };
        let group = groups
            .entry(stem.clone())
            .or_insert_with(|| Group::new(stem));
        if group.files.iter().any(|(r, _)| *r == role) {
            group.problems.push(format!("duplicate {role} file {name}"));
        } else {
            group.files.push((role, path));
        }
    }

    groups.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let scanned = Scanner::default().scan(&dir.path().join("stage1")).unwrap();
        assert!(scanned.is_empty());
    }

    #[test]
    fn unrelated_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();
        fs::write(dir.path().join("NQ_1Year_vbt_20240101T000000000.pickle.tmp"), "x").unwrap();
        assert!(Scanner::default().scan(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn orphan_file_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("NQ_1Year_raw_20240101T000000000.csv"),
            "timestamp,open,high,low,close\n2024-01-01 00:00:00,1,1,1,1\n",
        )
        .unwrap();
        let scanned = Scanner::default().scan(dir.path()).unwrap();
        assert_eq!(scanned.len(), 1);
        let d = &scanned[0];
        assert_eq!(d.asset, "NQ");
        assert_eq!(d.window, "1Year");
        assert!(d.roles.contains_key(&Role::Raw));
        assert!(!d.valid);
        assert!(d.problems.iter().any(|p| p == "no sidecar"));
    }

    #[test]
    fn keep_latest_partitions_per_identity() {
        let make = |stem: &str, minute: u32, window: &str| ArtifactDescriptor {
            stem: stem.into(),
            asset: "NQ".into(),
            window: window.into(),
            timeframes: Vec::new(),
            roles: BTreeMap::new(),
            created_at: chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(0, minute, 0)
                .unwrap(),
            total_size: 0,
            sidecar: None,
            valid: true,
            problems: Vec::new(),
        };
        let sorted = vec![
            make("c", 3, "1Year"),
            make("b", 2, "1Year"),
            make("x", 2, "6Months"),
            make("a", 1, "1Year"),
        ];
        let (kept, dropped) = RetentionPolicy::KeepLatest(1).partition(sorted.clone());
        let kept: Vec<_> = kept.iter().map(|d| d.stem.as_str()).collect();
        let dropped: Vec<_> = dropped.iter().map(|d| d.stem.as_str()).collect();
        assert_eq!(kept, ["c", "x"]);
        assert_eq!(dropped, ["b", "a"]);
        assert_eq!(RetentionPolicy::KeepAll.partition(sorted).0.len(), 4);
    }

    #[test]
    fn invalid_descriptors_do_not_fill_the_quota() {
        let make = |stem: &str, minute: u32, valid: bool| ArtifactDescriptor {
            stem: stem.into(),
            asset: "NQ".into(),
            window: "1Year".into(),
            timeframes: Vec::new(),
            roles: BTreeMap::new(),
            created_at: chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(0, minute, 0)
                .unwrap(),
            total_size: 0,
            sidecar: None,
            valid,
            problems: Vec::new(),
        };
        let sorted = vec![
            make("orphan", 5, false),
            make("newest", 4, true),
            make("stale_orphan", 3, false),
            make("older", 2, true),
        ];
        let (kept, dropped) = RetentionPolicy::KeepLatest(1).partition(sorted);
        let kept: Vec<_> = kept.iter().map(|d| d.stem.as_str()).collect();
        let dropped: Vec<_> = dropped.iter().map(|d| d.stem.as_str()).collect();
        assert_eq!(kept, ["orphan", "newest", "stale_orphan"]);
        assert_eq!(dropped, ["older"]);
    }
}
