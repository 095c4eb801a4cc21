// tantrums-vm - Bytecode compiler and virtual machine for the Tantrums programming language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Post-mortem auto-free and leak summaries.
//!
//! Reclamations recorded by the reaper and pointers still live at teardown
//! are aggregated by (line, function, type, size). Above a threshold the
//! summary is written to a plain-text file next to the bytecode
//! (`autoFree.txt`, `memleaklog.txt`); below it, to stderr. Reports never
//! alter the exit status.

use std::fmt::Write as _;
use std::path::Path;

use tantrums_core::heap::ReapRecord;

const AUTOFREE_FILE_THRESHOLD: usize = 20;
const LEAK_FILE_THRESHOLD: usize = 5;

/// One aggregated report entry.
#[derive(Debug)]
struct Entry {
    record: ReapRecord,
    count: usize,
}

/// Aggregates auto-free and leak records across a VM run.
#[derive(Debug, Default)]
pub struct ReportLog {
    auto_frees: Vec<Entry>,
    leaks: Vec<Entry>,
    total_auto_frees: usize,
    total_leaks: usize,
}

impl ReportLog {
    pub fn record_auto_free(&mut self, record: ReapRecord) {
        self.total_auto_frees += 1;
        Self::add(&mut self.auto_frees, record);
    }

    pub fn record_leak(&mut self, record: ReapRecord) {
        self.total_leaks += 1;
        Self::add(&mut self.leaks, record);
    }

    pub fn total_auto_frees(&self) -> usize {
        self.total_auto_frees
    }

    pub fn total_leaks(&self) -> usize {
        self.total_leaks
    }

    fn add(entries: &mut Vec<Entry>, record: ReapRecord) {
        for entry in entries.iter_mut() {
            if entry.record == record {
                entry.count += 1;
                return;
            }
        }
        entries.push(Entry { record, count: 1 });
    }

    /// Emit both summaries. `bytecode_path` anchors the report files; with
    /// no path, everything goes to stderr.
    pub fn write_reports(&self, bytecode_path: Option<&Path>) {
        if self.total_auto_frees > 0 {
            let body = self.render(
                &self.auto_frees,
                self.total_auto_frees,
                "auto-freed allocation",
            );
            self.emit(
                body,
                bytecode_path,
                "autoFree.txt",
                self.total_auto_frees > AUTOFREE_FILE_THRESHOLD,
            );
        }
        if self.total_leaks > 0 {
            let body = self.render(&self.leaks, self.total_leaks, "leaked allocation");
            self.emit(
                body,
                bytecode_path,
                "memleaklog.txt",
                self.total_leaks > LEAK_FILE_THRESHOLD,
            );
        }
    }

    fn render(&self, entries: &[Entry], total: usize, label: &str) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "[Tantrums] {} {}(s):", total, label);
        for entry in entries {
            let _ = writeln!(
                out,
                "  line {} in {}: {} ({} bytes) x{}",
                entry.record.line,
                entry.record.func,
                entry.record.type_name,
                entry.record.size,
                entry.count
            );
        }
        out
    }

    fn emit(&self, body: String, bytecode_path: Option<&Path>, file_name: &str, to_file: bool) {
        if to_file {
            if let Some(dir) = bytecode_path.and_then(|p| p.parent()) {
                let path = dir.join(file_name);
                if std::fs::write(&path, &body).is_ok() {
                    eprintln!("[Tantrums] report written to {}", path.display());
                    return;
                }
            }
        }
        eprint!("{}", body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(line: u32) -> ReapRecord {
        ReapRecord {
            line,
            func: "main".to_string(),
            type_name: "int".to_string(),
            size: 16,
        }
    }

    #[test]
    fn aggregates_identical_records() {
        let mut log = ReportLog::default();
        log.record_auto_free(record(3));
        log.record_auto_free(record(3));
        log.record_auto_free(record(7));
        assert_eq!(log.total_auto_frees(), 3);
        assert_eq!(log.auto_frees.len(), 2);
        assert_eq!(log.auto_frees[0].count, 2);
    }

    #[test]
    fn renders_counts() {
        let mut log = ReportLog::default();
        log.record_leak(record(9));
        let body = log.render(&log.leaks, log.total_leaks(), "leaked allocation");
        assert!(body.contains("line 9 in main: int (16 bytes) x1"));
    }
}
