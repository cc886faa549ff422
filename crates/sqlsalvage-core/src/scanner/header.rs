//! Header analysis of the first bytes of the source.

use super::chunk::fill;
use super::text::sanitize_ascii;
use crate::error::Result;
use crate::finding::{Finding, FindingKind};
use std::io::Read;

/// Size of the prefix read before the chunk loop starts
pub const HEADER_PREFIX_LEN: usize = 1024;

/// Bytes shown in the hex dump
const HEX_BYTES: usize = 16;

/// Bytes shown in the ASCII decode
const ASCII_BYTES: usize = 50;

/// Reads up to `len` bytes from the start of the source.
///
/// Returns fewer bytes only when the source ends first; an empty source gives
/// an empty prefix.
pub fn read_prefix<R: Read>(source: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut prefix = vec![0u8; len];
    let filled = fill(source, &mut prefix, 0)?;
    prefix.truncate(filled);
    Ok(prefix)
}

/// Uppercase, space separated hex of the first 16 bytes
pub fn hex_dump(prefix: &[u8]) -> String {
    prefix
        .iter()
        .take(HEX_BYTES)
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Builds the `HeaderAnalysis` finding from the source prefix
pub fn analyze(prefix: &[u8]) -> Finding {
    let hex = hex_dump(prefix);
    let ascii = sanitize_ascii(&prefix[..prefix.len().min(ASCII_BYTES)]);

    Finding {
        id: FindingKind::HeaderAnalysis.slug().to_string(),
        kind: FindingKind::HeaderAnalysis,
        name: Some("File Header".to_string()),
        byte_offset: 0,
        preview: format!("Hex: {}", hex),
        full_text: format!("Hex: {}\nASCII: {}", hex, ascii),
    }
}
