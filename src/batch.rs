//! Batch Validation
//!
//! Translates and validates a large document corpus against a shared,
//! read-only model and key mapping table. Each document is an independent
//! unit of work; a bounded worker pool with a bounded job queue provides
//! backpressure when enumerating hundreds of thousands of files.
//!
//! Completed batch identifiers are checkpointed so a restarted run skips
//! work it already finished. A failed document (malformed, unreadable, over
//! its time budget) aborts only itself and is counted, never the run.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::diagnostics::{DiagnosticCode, DiagnosticItem, Diagnostics};
use crate::error::Result;
use crate::mapping::KeyMap;
use crate::model::FeatureModel;
use crate::translate::{load_documents, Translator};
use crate::validate::{validate, ValidationReport};

/// Corpus size buckets, reported in the run summary
const BUCKETS: &[(&str, u64)] = &[
    ("tiny", 5 * 1024),
    ("small", 25 * 1024),
    ("medium", 100 * 1024),
    ("large", 512 * 1024),
    ("huge", u64::MAX),
];

/// One row of the run summary, comparable against external tools
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryRow {
    pub filename: String,
    pub source: String,
    pub result: bool,
    pub time_ms: u64,
}

/// Batch run settings
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub workers: usize,
    /// Job queue bound; backpressure against unbounded memory growth
    pub queue_bound: usize,
    /// Documents per checkpointed batch
    pub batch_size: usize,
    /// Per-document translation budget
    pub time_budget: Option<Duration>,
    /// Completed-batch record enabling restart without reprocessing
    pub checkpoint_path: Option<PathBuf>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_bound: 64,
            batch_size: 256,
            time_budget: Some(Duration::from_secs(5)),
            checkpoint_path: None,
        }
    }
}

/// Aggregated outcome of a batch run
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub reports: Vec<ValidationReport>,
    pub summary: Vec<SummaryRow>,
    /// Documents that produced a report
    pub processed: usize,
    /// Documents aborted individually (malformed, unreadable, over budget)
    pub skipped: usize,
    /// Batches skipped because a checkpoint said they were done
    pub resumed_batches: usize,
    pub size_buckets: BTreeMap<String, usize>,
    pub diagnostics: Diagnostics,
}

/// Cooperative whole-run cancellation: stops submitting new work and lets
/// in-flight units finish.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-file worker output
struct FileOutcome {
    reports: Vec<ValidationReport>,
    rows: Vec<SummaryRow>,
    diagnostics: Vec<DiagnosticItem>,
    bucket: &'static str,
    skipped: usize,
}

/// Runs document batches against one model + mapping table
pub struct BatchRunner<'a> {
    model: &'a FeatureModel,
    keymap: &'a KeyMap,
    config: BatchConfig,
    cancel: CancelFlag,
}

impl<'a> BatchRunner<'a> {
    pub fn new(model: &'a FeatureModel, keymap: &'a KeyMap, config: BatchConfig) -> Self {
        Self {
            model,
            keymap,
            config,
            cancel: CancelFlag::new(),
        }
    }

    /// Handle for cancelling the run from another thread
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Process the corpus. Files are batched in the given order; batch ids
    /// are positional, so a resumed run must be given the same ordering.
    pub fn run(&self, files: &[PathBuf]) -> Result<BatchOutcome> {
        let completed = self.load_checkpoint()?;
        let mut outcome = BatchOutcome::default();

        for (index, batch) in files.chunks(self.config.batch_size.max(1)).enumerate() {
            let batch_id = format!("batch-{:05}", index);
            if completed.contains(&batch_id) {
                outcome.resumed_batches += 1;
                debug!(batch = %batch_id, "skipping checkpointed batch");
                continue;
            }
            if self.cancel.is_cancelled() {
                info!("cancellation requested; no further batches submitted");
                break;
            }

            self.run_batch(batch, &mut outcome);
            self.record_checkpoint(&batch_id)?;
        }

        outcome.summary.sort_by(|a, b| a.filename.cmp(&b.filename));
        outcome
            .reports
            .sort_by(|a, b| a.document_id.cmp(&b.document_id));

        info!(
            processed = outcome.processed,
            skipped = outcome.skipped,
            resumed = outcome.resumed_batches,
            "batch run finished"
        );
        Ok(outcome)
    }

    fn run_batch(&self, batch: &[PathBuf], outcome: &mut BatchOutcome) {
        let workers = self.config.workers.max(1);

        thread::scope(|s| {
            let (job_tx, job_rx) = mpsc::sync_channel::<PathBuf>(self.config.queue_bound.max(1));
            let job_rx = Arc::new(Mutex::new(job_rx));
            let (result_tx, result_rx) = mpsc::channel::<FileOutcome>();

            for _ in 0..workers {
                let job_rx = Arc::clone(&job_rx);
                let result_tx = result_tx.clone();
                s.spawn(move || loop {
                    let job = job_rx.lock().expect("job queue poisoned").recv();
                    let Ok(path) = job else { break };
                    let out = self.process_file(&path);
                    if result_tx.send(out).is_err() {
                        break;
                    }
                });
            }
            drop(result_tx);

            for path in batch {
                if self.cancel.is_cancelled() {
                    break;
                }
                if job_tx.send(path.clone()).is_err() {
                    break;
                }
            }
            drop(job_tx);

            for file in result_rx {
                outcome.processed += file.reports.len();
                outcome.skipped += file.skipped;
                outcome.reports.extend(file.reports);
                outcome.summary.extend(file.rows);
                *outcome
                    .size_buckets
                    .entry(file.bucket.to_string())
                    .or_insert(0) += 1;
                for item in file.diagnostics {
                    outcome.diagnostics.push(item);
                }
            }
        });
    }

    fn process_file(&self, path: &Path) -> FileOutcome {
        let filename = path.display().to_string();
        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        let bucket = BUCKETS
            .iter()
            .find(|(_, max)| size < *max)
            .map(|(name, _)| *name)
            .unwrap_or("huge");

        let mut out = FileOutcome {
            reports: Vec::new(),
            rows: Vec::new(),
            diagnostics: Vec::new(),
            bucket,
            skipped: 0,
        };

        let docs = match load_documents(path) {
            Ok(docs) => docs,
            Err(e) => {
                warn!(file = %filename, error = %e, "document unreadable");
                out.diagnostics.push(DiagnosticItem::new(
                    filename.clone(),
                    DiagnosticCode::DocumentSkipped,
                    e.to_string(),
                ));
                out.rows.push(SummaryRow {
                    filename,
                    source: "varimodel".to_string(),
                    result: false,
                    time_ms: 0,
                });
                out.skipped += 1;
                return out;
            }
        };

        let mut translator = Translator::new(self.keymap);
        if let Some(budget) = self.config.time_budget {
            translator = translator.with_time_budget(budget);
        }

        for (i, doc) in docs.iter().enumerate() {
            let document_id = if docs.len() == 1 {
                filename.clone()
            } else {
                format!("{}#{}", filename, i)
            };
            let started = Instant::now();

            match translator.translate(&document_id, doc) {
                Ok(selection) => {
                    let mut report = validate(self.model, &selection, &document_id);
                    report.elapsed_ms = started.elapsed().as_millis() as u64;
                    for key in &selection.unmapped {
                        out.diagnostics.push(DiagnosticItem::new(
                            document_id.clone(),
                            DiagnosticCode::UnmappedKey,
                            format!("no mapping entry for '{}'", key),
                        ));
                    }
                    out.rows.push(SummaryRow {
                        filename: document_id.clone(),
                        source: "varimodel".to_string(),
                        result: report.valid,
                        time_ms: report.elapsed_ms,
                    });
                    out.reports.push(report);
                }
                Err(e) => {
                    // Timeout or malformed unit: this document only
                    warn!(document = %document_id, error = %e, "translation failed");
                    out.diagnostics.push(DiagnosticItem::new(
                        document_id.clone(),
                        DiagnosticCode::DocumentSkipped,
                        e.to_string(),
                    ));
                    out.rows.push(SummaryRow {
                        filename: document_id,
                        source: "varimodel".to_string(),
                        result: false,
                        time_ms: started.elapsed().as_millis() as u64,
                    });
                    out.skipped += 1;
                }
            }
        }
        out
    }

    fn load_checkpoint(&self) -> Result<HashSet<String>> {
        let Some(path) = &self.config.checkpoint_path else {
            return Ok(HashSet::new());
        };
        if !path.exists() {
            return Ok(HashSet::new());
        }
        let text = std::fs::read_to_string(path)?;
        Ok(text.lines().map(|l| l.trim().to_string()).collect())
    }

    fn record_checkpoint(&self, batch_id: &str) -> Result<()> {
        let Some(path) = &self.config.checkpoint_path else {
            return Ok(());
        };
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        writeln!(file, "{}", batch_id)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Diagnostics;
    use crate::graph;
    use crate::model::assemble::assemble;
    use serde_json::json;
    use std::fs;

    fn fixture_model() -> FeatureModel {
        let doc = json!({
            "definitions": {
                "Pod": {
                    "properties": {
                        "spec": { "$ref": "#/definitions/PodSpec" }
                    },
                    "required": ["spec"]
                },
                "PodSpec": {
                    "properties": {
                        "containers": {
                            "type": "array",
                            "items": { "$ref": "#/definitions/Container" }
                        }
                    },
                    "required": ["containers"]
                },
                "Container": {
                    "properties": { "image": { "type": "string" } }
                }
            }
        });
        let mut diags = Diagnostics::new();
        let g = graph::resolve(&doc, &["Pod".to_string()], &mut diags).unwrap();
        assemble("cluster", semver::Version::new(1, 0, 0), &g, &[], &mut diags).unwrap()
    }

    #[test]
    fn test_batch_run_reports_and_checkpoints() {
        let model = fixture_model();
        let keymap = KeyMap::derive(&model).unwrap();
        let dir = tempfile::tempdir().unwrap();

        let good = dir.path().join("good.yaml");
        fs::write(
            &good,
            "kind: Pod\nspec:\n  containers:\n    - image: nginx\n",
        )
        .unwrap();
        let bad = dir.path().join("bad.yaml");
        fs::write(&bad, "kind: Pod\nspec: {}\n").unwrap();
        let broken = dir.path().join("broken.yaml");
        fs::write(&broken, ": not yaml : [\n").unwrap();

        let checkpoint = dir.path().join("checkpoint.txt");
        let config = BatchConfig {
            workers: 2,
            batch_size: 2,
            checkpoint_path: Some(checkpoint.clone()),
            ..Default::default()
        };

        let files = vec![bad.clone(), broken.clone(), good.clone()];
        let runner = BatchRunner::new(&model, &keymap, config.clone());
        let outcome = runner.run(&files).unwrap();

        assert_eq!(outcome.processed, 2);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.summary.len(), 3);

        let good_row = outcome
            .summary
            .iter()
            .find(|r| r.filename.contains("good"))
            .unwrap();
        assert!(good_row.result);
        let bad_row = outcome
            .summary
            .iter()
            .find(|r| r.filename.contains("bad"))
            .unwrap();
        assert!(!bad_row.result);

        // Restart resumes past completed batches without reprocessing
        let runner = BatchRunner::new(&model, &keymap, config);
        let resumed = runner.run(&files).unwrap();
        assert_eq!(resumed.resumed_batches, 2);
        assert_eq!(resumed.processed, 0);
    }

    #[test]
    fn test_cancellation_stops_submission() {
        let model = fixture_model();
        let keymap = KeyMap::derive(&model).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("doc.yaml");
        fs::write(&doc, "kind: Pod\nspec: {}\n").unwrap();

        let runner = BatchRunner::new(&model, &keymap, BatchConfig::default());
        runner.cancel_flag().cancel();
        let outcome = runner.run(&[doc]).unwrap();
        assert_eq!(outcome.processed, 0);
    }
}
