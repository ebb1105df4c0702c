//! Inspect-log command implementation.

use marksync_engine::{read_journal, JournalContents, JournalRecord};
use marksync_protocol::ClientSyncLogEntry;
use serde::Serialize;
use std::path::Path;

/// Journal record representation for output.
#[derive(Debug, Serialize, PartialEq)]
pub struct RecordInfo {
    /// Position in the journal.
    pub index: usize,
    /// Record type.
    pub record_type: &'static str,
    /// Entry key as `device@created_on` (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Collection and primary key (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    /// Operation (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    /// Shared log sequence number (if known).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    /// Number of entries covered by a batch record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    /// Account the log was attached to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
}

/// Output of the command.
#[derive(Debug, Serialize)]
pub struct LogReport {
    /// Dumped records.
    pub records: Vec<RecordInfo>,
    /// Total number of intact records.
    pub total: usize,
    /// Bytes after the last intact record.
    pub damaged_tail: usize,
}

/// Runs the inspect-log command.
pub fn run(path: &Path, limit: Option<usize>, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("journal not found: {}", path.display()).into());
    }

    let contents = read_journal(path)?;
    let report = build_report(&contents, limit);

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            print_text_output(&report);
        }
    }

    Ok(())
}

fn build_report(contents: &JournalContents, limit: Option<usize>) -> LogReport {
    let records = contents
        .records
        .iter()
        .take(limit.unwrap_or(usize::MAX))
        .enumerate()
        .map(|(index, record)| describe(index, record))
        .collect();
    LogReport {
        records,
        total: contents.records.len(),
        damaged_tail: contents.damaged_tail,
    }
}

fn describe(index: usize, record: &JournalRecord) -> RecordInfo {
    let mut info = RecordInfo {
        index,
        record_type: "",
        key: None,
        object: None,
        operation: None,
        seq: None,
        count: None,
        account: None,
    };

    let entry_fields = |info: &mut RecordInfo, entry: &ClientSyncLogEntry| {
        info.key = Some(entry.key().to_string());
        info.object = Some(format!("{}/{}", entry.collection, entry.pk));
        info.operation = Some(entry.operation.to_string());
        info.seq = entry.seq;
    };

    match record {
        JournalRecord::Appended(entry) => {
            info.record_type = "APPENDED";
            entry_fields(&mut info, entry);
        }
        JournalRecord::Received(entry) => {
            info.record_type = "RECEIVED";
            entry_fields(&mut info, entry);
        }
        JournalRecord::Shared { entries, .. } => {
            info.record_type = "SHARED";
            info.count = Some(entries.len());
            info.seq = entries.iter().map(|(_, seq)| *seq).max();
        }
        JournalRecord::Integrated(keys) => {
            info.record_type = "INTEGRATED";
            info.count = Some(keys.len());
        }
        JournalRecord::Attempted(key) => {
            info.record_type = "ATTEMPTED";
            info.key = Some(key.to_string());
        }
        JournalRecord::Attached(user_id) => {
            info.record_type = "ATTACHED";
            info.account = Some(user_id.to_string());
        }
    }
    info
}

fn print_text_output(report: &LogReport) {
    println!("Journal Records ({} total)", report.total);
    println!("================");
    println!();

    for record in &report.records {
        print!("[{:06}] {:10}", record.index, record.record_type);

        if let Some(key) = &record.key {
            print!(" key={}", key);
        }
        if let Some(operation) = &record.operation {
            print!(" op={}", operation);
        }
        if let Some(object) = &record.object {
            print!(" object={}", object);
        }
        if let Some(seq) = record.seq {
            print!(" seq={}", seq);
        }
        if let Some(count) = record.count {
            print!(" count={}", count);
        }
        if let Some(account) = &record.account {
            print!(" account={}", account);
        }
        println!();
    }

    if report.damaged_tail > 0 {
        println!();
        println!("Damaged tail: {} bytes", report.damaged_tail);
    }
}
