//! Named detectors for recoverable SQL objects.
//!
//! Each detector is a Unicode-disabled byte regex run over the
//! [`ByteText`](super::text::ByteText) view of a chunk. A match only becomes a
//! [`Finding`] when the context window around it, with null bytes removed,
//! contains a confirmation token.

use super::chunk::Chunk;
use super::text::{self, ByteText};
use crate::error::Result;
use crate::finding::{Finding, FindingKind};
use regex::bytes::{Captures, Regex};
use std::ops::RangeInclusive;
use tracing::trace;

/// Tokens of which at least one must appear in an accepted context window
pub const CONFIRMATION_TOKENS: [&[u8]; 2] = [b"CREATE", b"dbo"];

/// Maximum characters in a finding preview
pub const PREVIEW_CHARS: usize = 100;

/// One segment of an object name: bracketed, or a bare identifier
const NAME_SEGMENT: &str = r"(?:\[[^\]\x00\r\n]{1,128}\]|[\w#@$]{1,128})";

/// How the text of a detector's capture group is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    /// One byte per character
    Ascii,
    /// Two bytes per character, low byte first
    Utf16Le,
}

/// A named pattern that recognizes one kind of object
#[derive(Debug, Clone)]
pub struct Detector {
    kind: FindingKind,
    pattern: Regex,
    encoding: TextEncoding,
}

impl Detector {
    /// Compiles a detector. Capture group 1, if present, holds the object name.
    pub fn new(kind: FindingKind, pattern: &str, encoding: TextEncoding) -> Result<Self> {
        Ok(Self {
            kind,
            pattern: Regex::new(pattern)?,
            encoding,
        })
    }

    /// The kind of finding this detector produces
    pub fn kind(&self) -> FindingKind {
        self.kind
    }

    fn name_from(&self, caps: &Captures<'_>) -> Option<String> {
        let raw = caps.get(1)?.as_bytes();
        let raw = match self.encoding {
            TextEncoding::Ascii => raw.to_vec(),
            TextEncoding::Utf16Le => text::strip_nulls(raw),
        };
        object_name(&text::decode(&raw))
    }
}

/// Per-detector absolute offsets from which the next search resumes.
///
/// Passed explicitly into every [`SignatureSet::find_all`] call so the search
/// itself holds no state between chunks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchCursors {
    resume_at: Vec<u64>,
}

impl MatchCursors {
    /// Cursors for `detectors` detectors, all at offset 0
    pub fn new(detectors: usize) -> Self {
        Self {
            resume_at: vec![0; detectors],
        }
    }

    /// Absolute offset the given detector resumes from
    pub fn resume_at(&self, detector: usize) -> u64 {
        self.resume_at.get(detector).copied().unwrap_or(0)
    }

    fn advance(&mut self, detector: usize, offset: u64) {
        if let Some(slot) = self.resume_at.get_mut(detector) {
            *slot = (*slot).max(offset);
        }
    }
}

/// The ordered set of detectors applied to every chunk
#[derive(Debug, Clone)]
pub struct SignatureSet {
    detectors: Vec<Detector>,
    context_before: usize,
    context_after: usize,
}

impl SignatureSet {
    /// Creates a set from custom detectors
    pub fn new(detectors: Vec<Detector>, context_before: usize, context_after: usize) -> Self {
        Self {
            detectors,
            context_before,
            context_after,
        }
    }

    /// The built-in detectors, in matching order:
    /// ASCII procedures, ASCII views, UTF-16LE procedures, bracketed identifiers
    pub fn builtin(
        identifier_len: RangeInclusive<usize>,
        context_before: usize,
        context_after: usize,
    ) -> Result<Self> {
        let name = format!(r"({seg}(?:\.{seg}){{0,2}})", seg = NAME_SEGMENT);

        let proc_ascii = format!(
            r"(?i-u)CREATE\s+(?:OR\s+ALTER\s+)?PROC(?:EDURE)?\b(?:\s+{})?",
            name
        );
        let view_ascii = format!(
            r"(?i-u)CREATE\s+(?:OR\s+ALTER\s+)?VIEW\b(?:\s+{})?",
            name
        );

        let ws16 = r"(?:[\t\n\r ]\x00)+";
        let proc_utf16 = format!(
            r"(?i-u){create}{ws}{proc}(?:{edure})?(?:{ws}((?:[\w\[\]\.#@$]\x00){{1,256}}))?",
            create = utf16_literal("CREATE"),
            ws = ws16,
            proc = utf16_literal("PROC"),
            edure = utf16_literal("EDURE"),
        );

        let bracketed = format!(
            r"(?-u)(?:\[dbo\]\.)?\[(\w{{{},{}}})\]",
            identifier_len.start(),
            identifier_len.end()
        );

        let detectors = vec![
            Detector::new(FindingKind::StoredProcedureAscii, &proc_ascii, TextEncoding::Ascii)?,
            Detector::new(FindingKind::ViewAscii, &view_ascii, TextEncoding::Ascii)?,
            Detector::new(FindingKind::StoredProcedureUtf16, &proc_utf16, TextEncoding::Utf16Le)?,
            Detector::new(FindingKind::PossibleBracketedObject, &bracketed, TextEncoding::Ascii)?,
        ];

        Ok(Self::new(detectors, context_before, context_after))
    }

    /// The detectors in matching order
    pub fn detectors(&self) -> &[Detector] {
        &self.detectors
    }

    /// Fresh cursors sized for this set
    pub fn cursors(&self) -> MatchCursors {
        MatchCursors::new(self.detectors.len())
    }

    /// Runs every detector over one chunk and returns at most `budget` findings.
    ///
    /// Matches starting before a detector's cursor were already evaluated with
    /// the previous chunk and are skipped. A match whose text or context window
    /// runs into the chunk's re-presented tail is left for the next chunk, and
    /// the detector's cursor stays in front of it.
    pub fn find_all(
        &self,
        chunk: &Chunk<'_>,
        budget: usize,
        cursors: &mut MatchCursors,
    ) -> Vec<Finding> {
        let view = ByteText::new(chunk.bytes);
        let mut found = Vec::new();
        if view.is_empty() {
            return found;
        }
        let bytes = view.as_bytes();

        for (index, detector) in self.detectors.iter().enumerate() {
            let resume = cursors.resume_at(index).saturating_sub(chunk.offset);
            let mut at = usize::try_from(resume).unwrap_or(usize::MAX).min(view.len());

            while at < view.len() && found.len() < budget {
                let Some(caps) = detector.pattern.captures_at(bytes, at) else {
                    break;
                };
                let Some(whole) = caps.get(0) else {
                    break;
                };

                if self.is_incomplete(chunk, whole.start(), whole.end()) {
                    trace!(
                        "{} match at {} deferred to the next chunk",
                        detector.kind,
                        chunk.offset + whole.start() as u64
                    );
                    break;
                }

                at = whole.end().max(whole.start() + 1);
                cursors.advance(index, chunk.offset + at as u64);

                if let Some(finding) = self.extract(detector, &caps, chunk) {
                    trace!(
                        "{} match at {} ({})",
                        detector.kind,
                        finding.byte_offset,
                        finding.display_name()
                    );
                    found.push(finding);
                }
            }

            if found.len() >= budget {
                break;
            }
        }

        found
    }

    /// True when the next chunk will see this match together with more of its
    /// text: the match starts inside the re-presented tail and either reaches
    /// the end of the chunk or has its context window clamped by it.
    fn is_incomplete(&self, chunk: &Chunk<'_>, start: usize, end: usize) -> bool {
        let len = chunk.bytes.len();
        chunk.tail > 0
            && start >= len - chunk.tail.min(len)
            && (end >= len || start.saturating_add(self.context_after) > len)
    }

    /// Builds the finding for one match, or `None` if the context is unconfirmed
    fn extract(&self, detector: &Detector, caps: &Captures<'_>, chunk: &Chunk<'_>) -> Option<Finding> {
        let whole = caps.get(0)?;
        let bytes = chunk.bytes;

        let start = whole.start().saturating_sub(self.context_before);
        let end = whole
            .start()
            .saturating_add(self.context_after)
            .max(whole.end())
            .min(bytes.len());

        let window = text::strip_nulls(&bytes[start..end]);
        if !CONFIRMATION_TOKENS
            .iter()
            .any(|token| text::contains(&window, token))
        {
            return None;
        }

        let lead = bytes[start..whole.start()].iter().filter(|&&b| b != 0).count();
        let preview = text::preview(&window[lead..], PREVIEW_CHARS);

        Some(Finding::detected(
            detector.kind,
            detector.name_from(caps),
            chunk.offset + whole.start() as u64,
            preview,
            text::decode(&window),
        ))
    }
}

/// Regex source matching `literal` stored as UTF-16LE Latin text
fn utf16_literal(literal: &str) -> String {
    literal
        .chars()
        .map(|c| format!("{}\\x00", regex::escape(&c.to_string())))
        .collect()
}

/// Reduces a possibly schema-qualified, bracketed name to its last segment.
///
/// `dbo.MyProc`, `[dbo].[MyProc]` and `MyProc` all yield `MyProc`.
pub fn object_name(raw: &str) -> Option<String> {
    let mut last = None;
    let mut rest = raw.trim();

    while !rest.is_empty() {
        let (segment, tail) = match rest.strip_prefix('[') {
            Some(inner) => match inner.find(']') {
                Some(close) => (&inner[..close], &inner[close + 1..]),
                None => (inner, ""),
            },
            None => match rest.find('.') {
                Some(dot) => (&rest[..dot], &rest[dot..]),
                None => (rest, ""),
            },
        };

        let segment = segment.trim();
        if !segment.is_empty() {
            last = Some(segment);
        }

        let tail = tail.trim_start();
        rest = tail.strip_prefix('.').unwrap_or(tail).trim_start();
    }

    last.map(str::to_string)
}
