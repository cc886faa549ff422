//! Collects findings across chunks and finalizes the report.

use super::entropy::{EntropyAccumulator, MAX_ENTROPY};
use crate::finding::{Finding, FindingKind, ScanReport};
use tracing::debug;

/// Merges detector findings under a global cap
#[derive(Debug)]
pub struct ResultAccumulator {
    header: Finding,
    findings: Vec<Finding>,
    max_findings: usize,
    overflowed: bool,
}

impl ResultAccumulator {
    /// Starts a report with the header analysis entry
    pub fn new(header: Finding, max_findings: usize) -> Self {
        Self {
            header,
            findings: Vec::new(),
            max_findings,
            overflowed: false,
        }
    }

    /// Number of accepted code findings
    pub fn found_count(&self) -> usize {
        self.findings.len()
    }

    /// How many more findings may be accepted
    pub fn remaining(&self) -> usize {
        self.max_findings.saturating_sub(self.findings.len())
    }

    /// How many findings to request from the detectors: one more than fits, so
    /// that a match past the cap can be told apart from a cap that is merely met
    pub fn budget(&self) -> usize {
        self.remaining().saturating_add(1)
    }

    /// True once a match had to be dropped because the cap was exceeded
    pub fn is_capped(&self) -> bool {
        self.overflowed
    }

    /// Appends findings in order, dropping whatever exceeds the cap
    pub fn accumulate(&mut self, findings: impl IntoIterator<Item = Finding>) {
        let room = self.remaining();
        let mut findings = findings.into_iter();
        self.findings.extend(findings.by_ref().take(room));
        if findings.next().is_some() {
            self.overflowed = true;
        }
    }

    /// Produces the report.
    ///
    /// A compression diagnosis is inserted right after the header when no code
    /// was found and the average entropy exceeds `threshold`.
    pub fn finalize(
        self,
        entropy: &EntropyAccumulator,
        threshold: f64,
        bytes_scanned: u64,
        truncated: bool,
    ) -> ScanReport {
        let average_entropy = entropy.average();
        let findings_capped = self.overflowed;

        let mut findings = Vec::with_capacity(self.findings.len() + 2);
        findings.push(self.header);

        match average_entropy {
            Some(average) if self.findings.is_empty() && average > threshold => {
                debug!(
                    "No code found and average entropy {:.2} exceeds {:.2}",
                    average, threshold
                );
                findings.push(compression_diagnosis(average));
            }
            _ => {}
        }

        findings.extend(self.findings);

        ScanReport {
            findings,
            average_entropy,
            chunks_sampled: entropy.count(),
            bytes_scanned,
            truncated,
            findings_capped,
        }
    }
}

/// The synthetic finding explaining an empty, high-entropy scan
pub fn compression_diagnosis(average_entropy: f64) -> Finding {
    let kind = FindingKind::CompressionDiagnosis;
    Finding {
        id: kind.slug().to_string(),
        kind,
        name: Some("Compressed or encrypted backup".to_string()),
        byte_offset: 0,
        preview: format!(
            "No SQL objects found; average entropy {:.2} of {:.1} suggests compression or encryption",
            average_entropy, MAX_ENTROPY
        ),
        full_text: format!(
            "No stored procedures, views or object names were found, and the sampled data \
             has an average entropy of {:.2} out of a maximum of {:.1}. Data this random is \
             almost always compressed or encrypted, so object source cannot be read from \
             the raw bytes.\n\n\
             Restore the backup into a live database engine (for example with RESTORE \
             DATABASE) and script the objects from there instead of scanning further.",
            average_entropy, MAX_ENTROPY
        ),
    }
}
