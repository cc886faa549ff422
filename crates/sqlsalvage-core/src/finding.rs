//! Findings and the final scan report.

use serde::Serialize;
use std::fmt;

/// The kind of object a [`Finding`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    /// Hex and ASCII summary of the first bytes of the source
    HeaderAnalysis,
    /// `CREATE PROC` stored as single-byte text
    StoredProcedureAscii,
    /// `CREATE VIEW` stored as single-byte text
    ViewAscii,
    /// `CREATE PROC` stored as UTF-16LE
    StoredProcedureUtf16,
    /// Bracketed identifier seen near SQL context (low confidence)
    PossibleBracketedObject,
    /// Synthetic entry explaining an empty, high-entropy result
    CompressionDiagnosis,
}

impl FindingKind {
    /// Human readable label, as used in exported scripts
    pub fn label(&self) -> &'static str {
        match self {
            FindingKind::HeaderAnalysis => "Header Analysis",
            FindingKind::StoredProcedureAscii => "Stored Procedure (ASCII)",
            FindingKind::ViewAscii => "View (ASCII)",
            FindingKind::StoredProcedureUtf16 => "Stored Procedure (UTF-16)",
            FindingKind::PossibleBracketedObject => "Possible Object",
            FindingKind::CompressionDiagnosis => "Compression Diagnosis",
        }
    }

    /// Short identifier used to build finding ids
    pub fn slug(&self) -> &'static str {
        match self {
            FindingKind::HeaderAnalysis => "header",
            FindingKind::StoredProcedureAscii => "proc-ascii",
            FindingKind::ViewAscii => "view-ascii",
            FindingKind::StoredProcedureUtf16 => "proc-utf16",
            FindingKind::PossibleBracketedObject => "bracketed",
            FindingKind::CompressionDiagnosis => "compression-diagnosis",
        }
    }

    /// Returns true for kinds produced by a detector, i.e. recovered code
    pub fn is_code(&self) -> bool {
        !matches!(
            self,
            FindingKind::HeaderAnalysis | FindingKind::CompressionDiagnosis
        )
    }
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A single entry of a scan report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    /// Stable identifier, unique within one report
    pub id: String,
    /// What was found
    pub kind: FindingKind,
    /// Object name, when the detector captured one
    pub name: Option<String>,
    /// Absolute offset of the match in the source
    pub byte_offset: u64,
    /// Short single-line excerpt
    pub preview: String,
    /// Recovered context text, null bytes removed
    pub full_text: String,
}

impl Finding {
    /// Creates a detector finding; the id is derived from kind and offset
    pub fn detected(
        kind: FindingKind,
        name: Option<String>,
        byte_offset: u64,
        preview: String,
        full_text: String,
    ) -> Self {
        Self {
            id: format!("{}-{:x}", kind.slug(), byte_offset),
            kind,
            name,
            byte_offset,
            preview,
            full_text,
        }
    }

    /// Name to show when the detector captured none
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<unnamed>")
    }
}

/// The outcome of one scan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanReport {
    /// Header analysis first, then the optional diagnosis, then code findings
    pub findings: Vec<Finding>,
    /// Mean sampled entropy over all sampled chunks
    pub average_entropy: Option<f64>,
    /// Number of chunks that contributed an entropy sample
    pub chunks_sampled: u64,
    /// Bytes of the source that were read by the chunk loop
    pub bytes_scanned: u64,
    /// The source continues past the scan ceiling
    pub truncated: bool,
    /// More findings existed than the cap allows; the scan stopped early
    pub findings_capped: bool,
}

impl ScanReport {
    /// Iterates over recovered code findings, skipping synthetic entries
    pub fn code_findings(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.kind.is_code())
    }

    /// Number of recovered code findings
    pub fn code_count(&self) -> usize {
        self.code_findings().count()
    }

    /// The header analysis entry
    pub fn header(&self) -> Option<&Finding> {
        self.findings
            .iter()
            .find(|f| f.kind == FindingKind::HeaderAnalysis)
    }

    /// The compression diagnosis, if one was issued
    pub fn compression_diagnosis(&self) -> Option<&Finding> {
        self.findings
            .iter()
            .find(|f| f.kind == FindingKind::CompressionDiagnosis)
    }
}
