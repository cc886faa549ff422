//! Extensible report writing traits.
//!
//! This module provides the [`ReportWriter`] trait for customizing
//! how report entries are written to output.

use super::ExportConfig;
use crate::finding::{Finding, FindingKind, ScanReport};
use std::collections::BTreeMap;
use std::fmt::{Result, Write};

/// Trait for writing report entries to output.
///
/// Implement this trait to customize the rendering of a [`ScanReport`].
/// [`write_report`](super::write_report) calls the methods in report order.
///
/// # Example
///
/// ```
/// use sqlsalvage_core::{Finding, ReportWriter};
///
/// struct NameList(Vec<String>);
///
/// impl ReportWriter for NameList {
///     fn write_finding(&mut self, finding: &Finding) -> std::fmt::Result {
///         self.0.push(finding.display_name().to_string());
///         Ok(())
///     }
/// }
/// ```
pub trait ReportWriter {
    /// Called once before any entry
    fn begin(&mut self, report: &ScanReport) -> Result {
        let _ = report;
        Ok(())
    }

    /// Write the header analysis entry
    fn write_header(&mut self, header: &Finding) -> Result {
        let _ = header;
        Ok(())
    }

    /// Write the compression diagnosis entry
    fn write_diagnosis(&mut self, diagnosis: &Finding) -> Result {
        let _ = diagnosis;
        Ok(())
    }

    /// Write a recovered code finding
    fn write_finding(&mut self, finding: &Finding) -> Result {
        let _ = finding;
        Ok(())
    }

    /// Called once after the last entry
    fn finish(&mut self) -> Result {
        Ok(())
    }
}

/// A no-op writer that discards all output
pub struct NullWriter;

impl ReportWriter for NullWriter {}

/// A writer that counts code findings per kind
#[derive(Debug, Default)]
pub struct StatsWriter {
    /// Code findings per kind
    pub per_kind: BTreeMap<&'static str, usize>,
    /// Code findings without a captured name
    pub unnamed_count: usize,
    /// Whether the report carried a compression diagnosis
    pub diagnosed: bool,
}

impl StatsWriter {
    /// Total number of code findings seen
    pub fn total(&self) -> usize {
        self.per_kind.values().sum()
    }
}

impl ReportWriter for StatsWriter {
    fn write_diagnosis(&mut self, _diagnosis: &Finding) -> Result {
        self.diagnosed = true;
        Ok(())
    }

    fn write_finding(&mut self, finding: &Finding) -> Result {
        *self.per_kind.entry(finding.kind.label()).or_insert(0) += 1;
        if finding.name.is_none() {
            self.unnamed_count += 1;
        }
        Ok(())
    }
}

/// Writes code findings as a SQL script, one batch per object
#[derive(Debug, Default)]
pub struct SqlScriptWriter {
    config: ExportConfig,
    output: String,
}

impl SqlScriptWriter {
    /// Creates a writer with the given export settings
    pub fn new(config: ExportConfig) -> Self {
        Self {
            config,
            output: String::new(),
        }
    }

    /// The script written so far
    pub fn as_str(&self) -> &str {
        &self.output
    }

    /// Consumes the writer and returns the script
    pub fn into_string(self) -> String {
        self.output
    }
}

impl ReportWriter for SqlScriptWriter {
    fn write_finding(&mut self, finding: &Finding) -> Result {
        if finding.kind == FindingKind::PossibleBracketedObject
            && !self.config.include_low_confidence
        {
            return Ok(());
        }

        writeln!(
            self.output,
            "-- Object: {} (Type: {}, Offset: {})",
            finding.display_name(),
            finding.kind.label(),
            finding.byte_offset
        )?;
        writeln!(self.output, "{}", finding.full_text)?;
        writeln!(self.output, "{}", self.config.batch_separator)?;
        writeln!(self.output)
    }
}
