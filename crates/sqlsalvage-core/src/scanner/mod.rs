//! Binary scanning module for recovering SQL object source from backups.
//!
//! ## Algorithm Overview
//!
//! 1. Read a 1 KiB prefix and summarize it as the header analysis entry
//! 2. Stream the source in bounded chunks up to the scan ceiling
//! 3. Sample each chunk's entropy
//! 4. Run the ordered detectors over the chunk's byte text view
//! 5. Keep confirmed findings until the finding cap is reached
//! 6. Finalize, adding a compression diagnosis when nothing was found in
//!    high-entropy data
//!
//! Peak memory is one chunk plus the overlap carried between chunks.

pub mod accumulator;
pub mod chunk;
pub mod entropy;
pub mod header;
pub mod signature;
pub mod text;

use crate::error::{Error, Result};
use crate::finding::ScanReport;
use crate::progress::{CancelToken, NullReporter, Progress, ProgressReporter};
use std::io::{Cursor, Read};
use std::ops::RangeInclusive;
use tracing::{debug, warn};

pub use accumulator::ResultAccumulator;
pub use chunk::{Chunk, ChunkReader};
pub use entropy::{sample_entropy, EntropyAccumulator, MAX_ENTROPY};
pub use signature::{Detector, MatchCursors, SignatureSet, TextEncoding};
pub use text::ByteText;

const MIB: usize = 1024 * 1024;

/// Configuration for the scanner
#[derive(Debug, Clone, PartialEq)]
pub struct ScannerConfig {
    /// Fresh bytes per chunk
    pub chunk_size: usize,
    /// Bytes of the source scanned at most
    pub max_scan_bytes: u64,
    /// Tail of each chunk re-presented at the head of the next (0 = no overlap).
    /// Otherwise at least `context_before + context_after`, so that a match near
    /// the end of a chunk is seen again with its whole context window.
    pub chunk_overlap: usize,
    /// Entropy is sampled from every `sample_stride`-th byte
    pub sample_stride: usize,
    /// Average entropy above which an empty result is diagnosed as compressed
    pub entropy_threshold: f64,
    /// Maximum number of code findings
    pub max_findings: usize,
    /// Context bytes kept before a match
    pub context_before: usize,
    /// Context bytes kept after the start of a match
    pub context_after: usize,
    /// Allowed length of a bracketed identifier
    pub identifier_len: RangeInclusive<usize>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 5 * MIB,
            max_scan_bytes: 100 * MIB as u64,
            chunk_overlap: 2048,
            sample_stride: 100,
            entropy_threshold: 6.0,
            max_findings: 500,
            context_before: 50,
            context_after: 1000,
            identifier_len: 5..=50,
        }
    }
}

impl ScannerConfig {
    /// Creates a new scanner config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the chunk size in bytes
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Sets the scan ceiling in bytes
    pub fn max_scan_bytes(mut self, max: u64) -> Self {
        self.max_scan_bytes = max;
        self
    }

    /// Sets the overlap carried between chunks
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.chunk_overlap = overlap;
        self
    }

    /// Sets the entropy sampling stride
    pub fn sample_stride(mut self, stride: usize) -> Self {
        self.sample_stride = stride;
        self
    }

    /// Sets the compression diagnosis threshold
    pub fn entropy_threshold(mut self, threshold: f64) -> Self {
        self.entropy_threshold = threshold;
        self
    }

    /// Sets the maximum number of code findings
    pub fn max_findings(mut self, max: usize) -> Self {
        self.max_findings = max;
        self
    }

    /// Sets the context window around matches
    pub fn context(mut self, before: usize, after: usize) -> Self {
        self.context_before = before;
        self.context_after = after;
        self
    }

    /// Sets the allowed bracketed identifier length
    pub fn identifier_len(mut self, len: RangeInclusive<usize>) -> Self {
        self.identifier_len = len;
        self
    }

    /// Checks that the parameters describe a scan that can run
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::invalid_config("chunk size must be non-zero"));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(Error::invalid_config(format!(
                "chunk overlap ({}) must be smaller than the chunk size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        let window = self.context_before.saturating_add(self.context_after);
        if self.chunk_overlap != 0 && self.chunk_overlap < window {
            return Err(Error::invalid_config(format!(
                "chunk overlap ({}) must be 0 or at least the context window ({})",
                self.chunk_overlap, window
            )));
        }
        if self.sample_stride == 0 {
            return Err(Error::invalid_config("sample stride must be non-zero"));
        }
        if !(0.0..=MAX_ENTROPY).contains(&self.entropy_threshold) {
            return Err(Error::invalid_config(format!(
                "entropy threshold {} is outside 0..={}",
                self.entropy_threshold, MAX_ENTROPY
            )));
        }
        if *self.identifier_len.start() == 0 || self.identifier_len.is_empty() {
            return Err(Error::invalid_config(format!(
                "identifier length range {:?} is empty or starts at zero",
                self.identifier_len
            )));
        }
        Ok(())
    }
}

/// How a scan ended
#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    /// The source or a bound was exhausted
    Completed(ScanReport),
    /// Cancellation was requested; the report holds what was found until then
    Cancelled(ScanReport),
}

impl ScanOutcome {
    /// The report, regardless of how the scan ended
    pub fn report(&self) -> &ScanReport {
        match self {
            ScanOutcome::Completed(report) | ScanOutcome::Cancelled(report) => report,
        }
    }

    /// Consumes the outcome and returns the report
    pub fn into_report(self) -> ScanReport {
        match self {
            ScanOutcome::Completed(report) | ScanOutcome::Cancelled(report) => report,
        }
    }

    /// Returns true if the scan was cancelled
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ScanOutcome::Cancelled(_))
    }
}

/// Primary scanner for recovering SQL objects from raw backup bytes
#[derive(Debug, Clone, Default)]
pub struct Scanner {
    config: ScannerConfig,
    signatures: Option<SignatureSet>,
}

impl Scanner {
    /// Creates a new scanner with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new scanner with custom configuration
    pub fn with_config(config: ScannerConfig) -> Self {
        Self {
            config,
            signatures: None,
        }
    }

    /// Replaces the built-in detectors with a custom set
    pub fn with_signatures(mut self, signatures: SignatureSet) -> Self {
        self.signatures = Some(signatures);
        self
    }

    /// The active configuration
    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    fn signature_set(&self) -> Result<SignatureSet> {
        match &self.signatures {
            Some(set) => Ok(set.clone()),
            None => SignatureSet::builtin(
                self.config.identifier_len.clone(),
                self.config.context_before,
                self.config.context_after,
            ),
        }
    }

    /// Scans a byte source.
    ///
    /// `reporter` is notified after every chunk; `cancel` is checked before
    /// every chunk. Only a failing source (or an invalid configuration) is an
    /// error.
    pub fn scan<R: Read>(
        &self,
        mut source: R,
        reporter: &mut dyn ProgressReporter,
        cancel: &CancelToken,
    ) -> Result<ScanOutcome> {
        let config = &self.config;
        config.validate()?;
        let signatures = self.signature_set()?;

        debug!(
            "Starting scan: chunk {} bytes, ceiling {} bytes, {} detectors",
            config.chunk_size,
            config.max_scan_bytes,
            signatures.detectors().len()
        );

        let prefix = header::read_prefix(&mut source, header::HEADER_PREFIX_LEN)?;
        let mut results = ResultAccumulator::new(header::analyze(&prefix), config.max_findings);

        let mut reader = ChunkReader::new(
            Cursor::new(prefix).chain(source),
            config.chunk_size,
            config.chunk_overlap,
            config.max_scan_bytes,
        );
        let mut entropy = EntropyAccumulator::new();
        let mut cursors = signatures.cursors();
        let mut cancelled = false;

        loop {
            if cancel.is_cancelled() {
                debug!("Scan cancelled at offset {}", reader.position());
                cancelled = true;
                break;
            }

            let Some(chunk) = reader.next_chunk()? else {
                break;
            };

            if let Some(sample) = sample_entropy(chunk.fresh(), config.sample_stride) {
                entropy.record(sample);
            }

            let found = signatures.find_all(&chunk, results.budget(), &mut cursors);
            results.accumulate(found);

            if !chunk.fresh().is_empty() {
                reporter.on_progress(Progress::new(
                    chunk.end(),
                    config.max_scan_bytes,
                    results.found_count(),
                ));
            }

            if results.is_capped() {
                warn!(
                    "More than {} findings by offset {}; stopping",
                    config.max_findings,
                    chunk.end()
                );
                break;
            }
        }

        let bytes_scanned = reader.position();
        let truncated = reader.truncated();
        if truncated {
            warn!(
                "Source is larger than the scan ceiling; only the first {} bytes were scanned",
                bytes_scanned
            );
        }

        let report = results.finalize(
            &entropy,
            config.entropy_threshold,
            bytes_scanned,
            truncated,
        );

        debug!(
            "Scan {}: {} code findings in {} bytes",
            if cancelled { "cancelled" } else { "complete" },
            report.code_count(),
            bytes_scanned
        );

        Ok(if cancelled {
            ScanOutcome::Cancelled(report)
        } else {
            ScanOutcome::Completed(report)
        })
    }

    /// Scans an in-memory buffer without progress reporting
    pub fn scan_bytes(&self, data: &[u8]) -> Result<ScanReport> {
        self.scan(data, &mut NullReporter, &CancelToken::new())
            .map(ScanOutcome::into_report)
    }
}

/// Scan a file for recoverable SQL objects
///
/// This is a convenience function that opens the file and streams it.
pub fn scan_file(path: impl AsRef<std::path::Path>) -> Result<ScanReport> {
    scan_file_with_config(path, ScannerConfig::default())
}

/// Scan a file with custom configuration
pub fn scan_file_with_config(
    path: impl AsRef<std::path::Path>,
    config: ScannerConfig,
) -> Result<ScanReport> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).map_err(|e| Error::file_read(path, e))?;
    Scanner::with_config(config)
        .scan(
            std::io::BufReader::new(file),
            &mut NullReporter,
            &CancelToken::new(),
        )
        .map(ScanOutcome::into_report)
}
