//! Rendering of recovered objects as SQL text.
//!
//! Code findings are written in report order, each as
//!
//! ```text
//! -- Object: <name> (Type: <kind label>, Offset: <byte offset>)
//! <full text>
//! GO
//!
//! ```
//!
//! The header analysis and compression diagnosis entries are never part of
//! the script. The [`ReportWriter`] trait allows other renderings.

mod writer;

use crate::finding::{Finding, FindingKind, ScanReport};
use std::fmt;

pub use writer::{NullWriter, ReportWriter, SqlScriptWriter, StatsWriter};

/// Configuration for script export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportConfig {
    /// Line written after each object (default: `GO`)
    pub batch_separator: String,
    /// Export bracketed identifier findings too
    pub include_low_confidence: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            batch_separator: "GO".to_string(),
            include_low_confidence: true,
        }
    }
}

impl ExportConfig {
    /// Creates a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the batch separator line
    pub fn batch_separator(mut self, separator: impl Into<String>) -> Self {
        self.batch_separator = separator.into();
        self
    }

    /// Sets whether low-confidence findings are exported
    pub fn include_low_confidence(mut self, include: bool) -> Self {
        self.include_low_confidence = include;
        self
    }
}

/// Feeds every entry of `report` to `writer`, in report order
pub fn write_report(report: &ScanReport, writer: &mut dyn ReportWriter) -> fmt::Result {
    writer.begin(report)?;
    for finding in &report.findings {
        match finding.kind {
            FindingKind::HeaderAnalysis => writer.write_header(finding)?,
            FindingKind::CompressionDiagnosis => writer.write_diagnosis(finding)?,
            _ => writer.write_finding(finding)?,
        }
    }
    writer.finish()
}

/// Renders the code findings of `report` with default settings
pub fn render_script(report: &ScanReport) -> String {
    render_script_with_config(report, ExportConfig::default())
}

/// Renders the code findings of `report`
pub fn render_script_with_config(report: &ScanReport, config: ExportConfig) -> String {
    let mut writer = SqlScriptWriter::new(config);
    // Writing into a String cannot fail
    let _ = write_report(report, &mut writer);
    writer.into_string()
}

/// Renders a single code finding as a one-object script
pub fn render_object(finding: &Finding, config: &ExportConfig) -> String {
    let mut writer = SqlScriptWriter::new(ExportConfig {
        include_low_confidence: true,
        ..config.clone()
    });
    let _ = writer.write_finding(finding);
    writer.into_string()
}
