//! Progress reporting types for the processing pipeline
//!
//! The orchestrator multiplexes worker events into a single [`ProgressState`]
//! observable; model asset downloads additionally report per-resource
//! [`DownloadEvent`]s which are aggregated by [`ModelLoadProgress`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// User-visible state of the processing pipeline
///
/// Written only by the orchestrator, observed through a watch channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressState {
    /// No job has been submitted yet
    Idle,
    /// First job is waiting on the model download/initialization
    LoadingModel {
        /// Aggregated download percentage, when any asset size is known
        percent: Option<u8>,
        /// Human-readable status line
        message: String,
    },
    /// Model is ready and inference is running
    Processing,
    /// Terminal: the last job finished successfully
    Complete,
    /// Terminal: the last job failed
    Error {
        /// Human-readable cause
        message: String,
    },
}

impl ProgressState {
    /// Whether this state ends a job (a fresh submit resets it)
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error { .. })
    }
}

/// Download lifecycle phase of one named model asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    /// Resource discovered, transfer about to start
    Initiate,
    /// Bytes received
    Progress,
    /// Resource fully downloaded
    Done,
}

/// Progress of a single named model asset (weights, config, ...)
///
/// Percentages from different resources are independent; aggregate them with
/// [`ModelLoadProgress`] rather than averaging event values directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadEvent {
    /// Lifecycle phase
    pub status: DownloadStatus,
    /// Resource name, e.g. `onnx/model.onnx`
    pub resource: String,
    /// Bytes received so far
    pub downloaded: u64,
    /// Total size when the server reported one
    pub total: Option<u64>,
}

impl DownloadEvent {
    /// Event for a resource whose transfer is about to start
    #[must_use]
    pub fn initiate(resource: impl Into<String>) -> Self {
        Self {
            status: DownloadStatus::Initiate,
            resource: resource.into(),
            downloaded: 0,
            total: None,
        }
    }

    /// Event carrying a byte-count update
    #[must_use]
    pub fn progress(resource: impl Into<String>, downloaded: u64, total: Option<u64>) -> Self {
        Self {
            status: DownloadStatus::Progress,
            resource: resource.into(),
            downloaded,
            total,
        }
    }

    /// Event for a fully transferred resource
    #[must_use]
    pub fn done(resource: impl Into<String>, downloaded: u64) -> Self {
        Self {
            status: DownloadStatus::Done,
            resource: resource.into(),
            downloaded,
            total: Some(downloaded),
        }
    }

    /// Percentage for this resource alone, when its size is known
    #[must_use]
    pub fn percent(&self) -> Option<f32> {
        match (self.status, self.total) {
            (DownloadStatus::Done, _) => Some(100.0),
            (_, Some(total)) if total > 0 => Some((self.downloaded as f32 / total as f32) * 100.0),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Clone)]
struct ResourceProgress {
    downloaded: u64,
    total: Option<u64>,
    done: bool,
}

/// Aggregates per-resource download events into one monotonic percentage
///
/// Each resource is tracked independently; the overall figure is weighted by
/// bytes across resources with known totals, so a tiny config file finishing
/// early cannot drag the percentage of a large weights file around.
#[derive(Debug, Default)]
pub struct ModelLoadProgress {
    resources: HashMap<String, ResourceProgress>,
    high_water: u8,
}

impl ModelLoadProgress {
    /// Create an empty aggregator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the per-resource table
    pub fn record(&mut self, event: &DownloadEvent) {
        let entry = self.resources.entry(event.resource.clone()).or_default();
        // Per-resource byte counts never move backwards
        entry.downloaded = entry.downloaded.max(event.downloaded);
        if event.total.is_some() {
            entry.total = event.total;
        }
        if event.status == DownloadStatus::Done {
            entry.done = true;
            if let Some(total) = entry.total {
                entry.downloaded = entry.downloaded.max(total);
            } else {
                entry.total = Some(entry.downloaded);
            }
        }
    }

    /// Bytes-weighted overall percentage, `None` until any total is known
    pub fn overall_percent(&mut self) -> Option<u8> {
        let mut downloaded: u64 = 0;
        let mut total: u64 = 0;
        for progress in self.resources.values() {
            let Some(resource_total) = progress.total else {
                continue;
            };
            total += resource_total;
            downloaded += progress.downloaded.min(resource_total);
        }
        if total == 0 {
            return None;
        }
        let percent = ((downloaded as f64 / total as f64) * 100.0).floor() as u8;
        // Keep the surfaced figure monotonic even if a late Initiate grows
        // the denominator
        self.high_water = self.high_water.max(percent.min(100));
        Some(self.high_water)
    }

    /// Whether every tracked resource has finished
    #[must_use]
    pub fn all_done(&self) -> bool {
        !self.resources.is_empty() && self.resources.values().all(|r| r.done)
    }

    /// Status line for the current download state
    pub fn message(&mut self) -> String {
        match self.overall_percent() {
            Some(percent) => format!("Downloading model... {percent}%"),
            None => "Loading model...".to_string(),
        }
    }
}
