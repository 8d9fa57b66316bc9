use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde_json::json;
use zstd::stream::Decoder;

use crate::config::ColdCfg;
use crate::hot::rings::HotRings;
use crate::model::{EntryKind, FeedbackTarget, LogEntry, LogFilter, ReadHandle};

/// Collects entries in `[ts0, ts1]` from the hot ring and, when enabled, the cold files.
/// Output is ordered by timestamp, then id, with duplicates removed.
///
/// With a filter, inferences must match it. Feedback is kept when it rates a kept
/// inference or that inference's episode, so a function-scoped export still carries the
/// ratings of its inferences.
pub fn collect_range(
    rings: &HotRings,
    cold_cfg: &ColdCfg,
    ts0: DateTime<Utc>,
    ts1: DateTime<Utc>,
    filter: Option<&LogFilter>,
) -> io::Result<Vec<LogEntry>> {
    let mut entries = Vec::new();
    let mut seen = HashSet::new();

    for entry in rings.snapshot() {
        if entry.ts() < ts0 || entry.ts() > ts1 {
            continue;
        }
        seen.insert(entry.id().to_string());
        entries.push(entry);
    }

    if cold_cfg.enabled {
        for entry in read_cold_entries(&cold_cfg.root, ts0, ts1)? {
            if seen.insert(entry.id().to_string()) {
                entries.push(entry);
            }
        }
    }

    if let Some(filter) = filter {
        entries = scope(entries, filter);
    }
    entries.sort_by(|a, b| a.ts().cmp(&b.ts()).then_with(|| a.id().cmp(b.id())));
    Ok(entries)
}

fn scope(entries: Vec<LogEntry>, filter: &LogFilter) -> Vec<LogEntry> {
    let wants = |kind: EntryKind| {
        filter
            .kinds
            .as_ref()
            .map_or(true, |kinds| kinds.contains(&kind))
    };
    let unscoped =
        filter.function.is_none() && filter.variant.is_none() && filter.episode.is_none();

    let scoped = LogFilter {
        kinds: None,
        ..filter.clone()
    };
    let mut inferences = HashSet::new();
    let mut episodes = HashSet::new();
    for entry in &entries {
        if let LogEntry::Inference(record) = entry {
            if scoped.matches(entry) {
                inferences.insert(record.id.clone());
                episodes.insert(record.episode.clone());
            }
        }
    }

    entries
        .into_iter()
        .filter(|entry| match entry {
            LogEntry::Inference(record) => {
                wants(EntryKind::Inference) && inferences.contains(&record.id)
            }
            LogEntry::Feedback(record) => {
                wants(EntryKind::Feedback)
                    && (unscoped
                        || match &record.target {
                            FeedbackTarget::Inference(id) => inferences.contains(id),
                            FeedbackTarget::Episode(id) => episodes.contains(id),
                        })
            }
        })
        .collect()
}

pub fn write_export_file(
    path: &Path,
    range: &ReadHandle,
    filter: Option<&LogFilter>,
) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp)?;

    let header = serde_json::to_vec(&json!({
        "from": range.from,
        "to": range.to,
        "count": range.entries.len(),
        "filter": filter,
    }))
    .map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()))?;
    file.write_all(&header)?;
    file.write_all(b"\n")?;

    for entry in &range.entries {
        let line = serde_json::to_vec(entry)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()))?;
        file.write_all(&line)?;
        file.write_all(b"\n")?;
    }

    file.sync_all()?;
    fs::rename(tmp, path)
}

fn read_cold_entries(
    root: &Path,
    ts0: DateTime<Utc>,
    ts1: DateTime<Utc>,
) -> io::Result<Vec<LogEntry>> {
    if !root.exists() {
        return Ok(Vec::new());
    }
    let mut entries = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let meta = match fs::metadata(&path) {
            Ok(meta) => meta,
            Err(_) => continue,
        };
        if meta.is_dir() {
            for entry in fs::read_dir(&path)? {
                stack.push(entry?.path());
            }
        } else {
            read_log_file(&path, ts0, ts1, &mut entries)?;
        }
    }
    Ok(entries)
}

fn read_log_file(
    path: &Path,
    ts0: DateTime<Utc>,
    ts1: DateTime<Utc>,
    out: &mut Vec<LogEntry>,
) -> io::Result<()> {
    let file = File::open(path)?;
    let mut reader: Box<dyn BufRead> =
        if path.extension().and_then(|ext| ext.to_str()) == Some("zst") {
            Box::new(BufReader::new(Decoder::new(file)?))
        } else {
            Box::new(BufReader::new(file))
        };
    let mut buffer = String::new();
    loop {
        buffer.clear();
        if reader.read_line(&mut buffer)? == 0 {
            break;
        }
        let entry: LogEntry = match serde_json::from_str(buffer.trim_end()) {
            Ok(entry) => entry,
            Err(_) => continue,
        };
        if entry.ts() < ts0 || entry.ts() > ts1 {
            continue;
        }
        out.push(entry);
    }
    Ok(())
}
