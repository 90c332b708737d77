//! Metrics reports exported by long-running tests.
//!
//! Reports are written as pretty JSON so CI can archive them and compare
//! runs.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// Top-level metrics report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsReport {
    /// Test identifier
    pub test_name: String,

    /// Collection time (RFC 3339)
    pub timestamp: String,

    /// Overall result
    pub result: TestResult,

    /// State broadcast metrics
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replication: Option<ReplicationMetrics>,

    /// Physics step metrics
    #[serde(skip_serializing_if = "Option::is_none")]
    pub physics: Option<PhysicsMetrics>,

    /// Packet pipeline metrics
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<PipelineMetrics>,

    /// Test execution metrics
    pub test_execution: TestExecutionMetrics,
}

/// Overall test result status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestResult {
    /// Passed
    Pass,
    /// Failed
    Fail,
    /// Skipped
    Skip,
}

/// Host broadcast volume
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplicationMetrics {
    /// State broadcasts sent
    pub broadcasts: usize,

    /// Of which full-state
    pub full_broadcasts: usize,

    /// Entity snapshots sent in total
    pub entities_sent: usize,

    /// Encoded payload bytes
    pub bytes_sent: u64,
}

/// Physics cost
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhysicsMetrics {
    /// Ticks simulated
    pub ticks: u64,

    /// Bodies in the world at the end
    pub bodies: usize,

    /// Bodies still awake at the end
    pub awake_bodies: usize,

    /// Average step time (microseconds)
    pub avg_step_time_us: f64,
}

/// Inbound packet handling
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineMetrics {
    /// Payloads accepted into the queue
    pub enqueued: u64,

    /// Payloads decoded
    pub decoded: u64,

    /// Payloads dropped (oversize or backpressure)
    pub dropped: u64,

    /// Payloads that failed to decode
    pub decode_failures: u64,
}

/// Test execution metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestExecutionMetrics {
    /// Total duration (seconds)
    pub duration_seconds: f64,

    /// Assertions checked
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assertions_checked: Option<usize>,
}

/// Builder for [`MetricsReport`]
pub struct MetricsReportBuilder {
    report: MetricsReport,
}

impl MetricsReportBuilder {
    /// Start a passing report stamped with the current time
    pub fn new(test_name: impl Into<String>) -> Self {
        Self {
            report: MetricsReport {
                test_name: test_name.into(),
                timestamp: chrono::Utc::now().to_rfc3339(),
                result: TestResult::Pass,
                replication: None,
                physics: None,
                pipeline: None,
                test_execution: TestExecutionMetrics::default(),
            },
        }
    }

    /// Set result
    pub fn result(mut self, result: TestResult) -> Self {
        self.report.result = result;
        self
    }

    /// Set replication metrics
    pub fn replication(mut self, metrics: ReplicationMetrics) -> Self {
        self.report.replication = Some(metrics);
        self
    }

    /// Set physics metrics
    pub fn physics(mut self, metrics: PhysicsMetrics) -> Self {
        self.report.physics = Some(metrics);
        self
    }

    /// Set pipeline metrics
    pub fn pipeline(mut self, metrics: PipelineMetrics) -> Self {
        self.report.pipeline = Some(metrics);
        self
    }

    /// Set execution metrics
    pub fn execution(mut self, metrics: TestExecutionMetrics) -> Self {
        self.report.test_execution = metrics;
        self
    }

    /// Finish
    pub fn build(self) -> MetricsReport {
        self.report
    }
}

/// Writes metrics reports to a JSON file
pub struct MetricsSink {
    path: PathBuf,
}

impl MetricsSink {
    /// Sink writing to `path`, creating parent directories.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        Ok(Self { path })
    }

    /// Overwrite the file with `report`.
    pub fn write(&self, report: &MetricsReport) -> Result<()> {
        let json = serde_json::to_string_pretty(report)?;
        let mut file = File::create(&self.path)
            .with_context(|| format!("Failed to create {}", self.path.display()))?;
        file.write_all(json.as_bytes())?;
        info!(
            "Wrote metrics for {} ({:?}) to {}",
            report.test_name,
            report.result,
            self.path.display()
        );
        Ok(())
    }
}
