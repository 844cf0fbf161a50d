//! Speech journal and reporting.
//!
//! Every utterance the TTS worker handles is appended as one JSON line to
//! `<dir>/<YYYY-MM-DD>-speech.jsonl`.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::queues::SpeechSource;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechRecord {
    pub timestamp: String,
    pub source: SpeechSource,
    pub text: String,
    pub synth_ms: u64,
    pub playback_ms: u64,
    pub failed: bool,
}

impl SpeechRecord {
    pub fn now(source: SpeechSource, text: &str) -> Self {
        Self {
            timestamp: Local::now().to_rfc3339(),
            source,
            text: text.to_string(),
            synth_ms: 0,
            playback_ms: 0,
            failed: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Journal {
    dir: PathBuf,
}

impl Journal {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn file(&self, date: &str) -> PathBuf {
        self.dir.join(format!("{date}-speech.jsonl"))
    }

    /// Append a record to today's file. Failures are logged, never returned.
    pub fn save(&self, record: &SpeechRecord) {
        if let Err(e) = fs::create_dir_all(&self.dir) {
            warn!("Failed to create journal dir: {e}");
            return;
        }

        let date = Local::now().format("%Y-%m-%d").to_string();
        let path = self.file(&date);

        let mut file = match fs::OpenOptions::new().create(true).append(true).open(&path) {
            Ok(f) => f,
            Err(e) => {
                warn!("Failed to open journal file: {e}");
                return;
            }
        };

        match serde_json::to_string(record) {
            Ok(line) => {
                if let Err(e) = writeln!(file, "{line}") {
                    warn!("Failed to write journal record: {e}");
                }
            }
            Err(e) => warn!("Failed to serialize journal record: {e}"),
        }
    }

    pub fn load(&self, date: &str) -> Vec<SpeechRecord> {
        let contents = match fs::read_to_string(self.file(date)) {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };

        contents
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    pub fn dates(&self) -> Vec<String> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(_) => return Vec::new(),
        };

        let mut dates: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                name.strip_suffix("-speech.jsonl").map(str::to_string)
            })
            .collect();
        dates.sort();
        dates
    }

    /// Markdown summary of one day. `date` may be `today`.
    pub fn report(&self, date: &str) -> String {
        let date = if date == "today" {
            Local::now().format("%Y-%m-%d").to_string()
        } else {
            date.to_string()
        };
        let records = self.load(&date);
        if records.is_empty() {
            let known = self.dates();
            if known.is_empty() {
                return format!("No speech records for {date}.");
            }
            return format!(
                "No speech records for {date}. Recorded days: {}",
                known.join(", ")
            );
        }

        let total = records.len();
        let failed = records.iter().filter(|r| r.failed).count();
        let played: Vec<&SpeechRecord> = records.iter().filter(|r| !r.failed).collect();
        let avg = |f: fn(&SpeechRecord) -> u64| {
            if played.is_empty() {
                0.0
            } else {
                played.iter().map(|r| f(r) as f64).sum::<f64>() / played.len() as f64
            }
        };
        let avg_synth = avg(|r| r.synth_ms);
        let avg_playback = avg(|r| r.playback_ms);

        let mut per_source = BTreeMap::new();
        for r in &records {
            *per_source.entry(r.source.to_string()).or_insert(0usize) += 1;
        }

        let mut report = format!(
            "# Speech Report for {date}\n\n\
            - Total utterances: {total}\n\
            - Failed: {failed}\n\
            - Avg synthesis latency: {avg_synth:.0}ms\n\
            - Avg playback duration: {avg_playback:.0}ms\n\n\
            ## Sources\n"
        );

        for (source, count) in &per_source {
            report.push_str(&format!("- {source}: {count}\n"));
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(source: SpeechSource, failed: bool, synth_ms: u64) -> SpeechRecord {
        SpeechRecord {
            synth_ms,
            playback_ms: 1000,
            failed,
            ..SpeechRecord::now(source, "hello")
        }
    }

    #[test]
    fn records_are_appended_and_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::new(dir.path().join("nested"));
        journal.save(&record(SpeechSource::WakePrompt, false, 100));
        journal.save(&record(SpeechSource::Intervention, true, 0));

        let today = Local::now().format("%Y-%m-%d").to_string();
        let loaded = journal.load(&today);
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].source, SpeechSource::WakePrompt);
        assert!(loaded[1].failed);
        assert_eq!(journal.dates(), vec![today]);
    }

    #[test]
    fn report_counts_sources_and_skips_failures_in_averages() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::new(dir.path().to_path_buf());
        journal.save(&record(SpeechSource::Command, false, 100));
        journal.save(&record(SpeechSource::Command, false, 300));
        journal.save(&record(SpeechSource::Crash, true, 0));

        let report = journal.report("today");
        assert!(report.contains("Total utterances: 3"));
        assert!(report.contains("Failed: 1"));
        assert!(report.contains("Avg synthesis latency: 200ms"));
        assert!(report.contains("- command: 2"));
        assert!(report.contains("- crash: 1"));
    }

    #[test]
    fn corrupt_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::new(dir.path().to_path_buf());
        fs::write(
            dir.path().join("2024-01-02-speech.jsonl"),
            "not json\n{\"timestamp\":\"t\",\"source\":\"system\",\"text\":\"x\",\"synth_ms\":1,\"playback_ms\":2,\"failed\":false}\n",
        )
        .unwrap();
        assert_eq!(journal.load("2024-01-02").len(), 1);
    }

    #[test]
    fn empty_day_lists_known_dates() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::new(dir.path().to_path_buf());
        assert_eq!(journal.report("2030-01-01"), "No speech records for 2030-01-01.");
        fs::write(dir.path().join("2024-01-02-speech.jsonl"), "").unwrap();
        assert!(journal.report("2030-01-01").contains("2024-01-02"));
    }
}
