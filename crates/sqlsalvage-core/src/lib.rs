//! # sqlsalvage-core
//!
//! A library for recovering SQL object source from raw database backup files.
//!
//! This crate provides the core functionality for:
//! - Streaming a backup in bounded, overlapping chunks up to a scan ceiling
//! - Detecting stored procedures, views and object names stored as ASCII or
//!   UTF-16LE text
//! - Diagnosing compressed or encrypted backups through sampled entropy
//! - Running scans in the background with progress events and cancellation
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`scanner`]: Chunking, entropy, byte text views and detectors
//! - [`session`]: Background scans driven by a channel of events
//! - [`export`]: Rendering of recovered objects as SQL text
//! - [`finding`]: Findings and the scan report
//! - [`progress`]: Progress updates and cancellation
//! - [`error`]: Error types and handling
//!
//! ## Example
//!
//! ```no_run
//! use sqlsalvage_core::{export, scan_file};
//!
//! let report = scan_file("./backups/sales.bak")?;
//!
//! if let Some(diagnosis) = report.compression_diagnosis() {
//!     eprintln!("{}", diagnosis.full_text);
//! }
//! for finding in report.code_findings() {
//!     println!("{} {} @ {}", finding.kind, finding.display_name(), finding.byte_offset);
//! }
//! println!("{}", export::render_script(&report));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Extensibility
//!
//! - [`ReportWriter`]: Customize how a report is rendered
//! - [`ProgressReporter`]: Receive per-chunk progress from a synchronous scan
//! - [`SignatureSet`]: Replace the built-in detectors
//!

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod error;
pub mod export;
pub mod finding;
pub mod progress;
pub mod scanner;
pub mod session;

// Re-export primary types for convenience
pub use error::{Error, Result};
pub use export::{render_script, ExportConfig, NullWriter, ReportWriter, SqlScriptWriter, StatsWriter};
pub use finding::{Finding, FindingKind, ScanReport};
pub use progress::{CancelToken, Progress, ProgressReporter};
pub use scanner::{scan_file, scan_file_with_config, ScanOutcome, Scanner, ScannerConfig, SignatureSet};
pub use session::{ScanEvent, ScanHandle, ScanRequest, ScanService, ScanState};

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
