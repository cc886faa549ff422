//! End-to-end properties of a scan over synthetic backup images.

use pretty_assertions::assert_eq;
use sqlsalvage_core::scanner::{sample_entropy, MAX_ENTROPY};
use sqlsalvage_core::{
    export, scan_file, scan_file_with_config, Error, FindingKind, ScanEvent, ScanRequest,
    ScanService, ScanState, Scanner, ScannerConfig,
};
use std::io::{self, Read, Write};

/// Deterministic xorshift64 byte stream
fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed.max(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 24) as u8
        })
        .collect()
}

fn utf16le(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
}

fn filler(len: usize) -> Vec<u8> {
    b"  ....  ".iter().copied().cycle().take(len).collect()
}

fn embed(mut base: Vec<u8>, at: usize, payload: &[u8]) -> Vec<u8> {
    base[at..at + payload.len()].copy_from_slice(payload);
    base
}

#[test]
fn test_plain_procedure_is_recovered() {
    let statement = b"CREATE PROC dbo.MyProc AS SELECT 1";
    let data = embed(filler(64 * 1024), 20_000, statement);

    let report = Scanner::new().scan_bytes(&data).unwrap();
    let code: Vec<_> = report.code_findings().collect();

    assert_eq!(code.len(), 1);
    assert_eq!(code[0].kind, FindingKind::StoredProcedureAscii);
    assert_eq!(code[0].name.as_deref(), Some("MyProc"));
    assert_eq!(code[0].byte_offset, 20_000);
    assert!(code[0].full_text.contains("CREATE PROC dbo.MyProc AS SELECT 1"));
    assert!(code[0].preview.starts_with("CREATE PROC dbo.MyProc"));
    assert!(report.compression_diagnosis().is_none());
}

#[test]
fn test_utf16_procedure_in_random_bytes() {
    let payload = utf16le("CREATE PROC dbo.Sneaky AS SELECT 42");
    let data = embed(random_bytes(256 * 1024, 7), 100_000, &payload);

    let report = Scanner::new().scan_bytes(&data).unwrap();
    let utf16: Vec<_> = report
        .code_findings()
        .filter(|f| f.kind == FindingKind::StoredProcedureUtf16)
        .collect();

    assert!(!utf16.is_empty());
    assert!(utf16[0].full_text.contains("CREATE PROC"));
    assert_eq!(utf16[0].name.as_deref(), Some("Sneaky"));
    assert_eq!(utf16[0].byte_offset, 100_000);
}

#[test]
fn test_random_bytes_are_diagnosed_as_compressed() {
    let data = random_bytes(1024 * 1024, 99);
    let report = Scanner::new().scan_bytes(&data).unwrap();

    assert_eq!(report.code_count(), 0);
    let average = report.average_entropy.unwrap();
    assert!(average > 7.5, "average entropy {}", average);

    let diagnoses = report
        .findings
        .iter()
        .filter(|f| f.kind == FindingKind::CompressionDiagnosis)
        .count();
    assert_eq!(diagnoses, 1);
    assert_eq!(report.findings[1].kind, FindingKind::CompressionDiagnosis);
}

#[test]
fn test_empty_source_yields_only_header() {
    let report = Scanner::new().scan_bytes(&[]).unwrap();
    assert_eq!(report.findings.len(), 1);
    assert_eq!(report.findings[0].kind, FindingKind::HeaderAnalysis);
    assert_eq!(report.average_entropy, None);
}

#[test]
fn test_low_entropy_without_code_has_no_diagnosis() {
    let report = Scanner::new().scan_bytes(&filler(300_000)).unwrap();
    assert_eq!(report.code_count(), 0);
    assert!(report.average_entropy.unwrap() < 6.0);
    assert!(report.compression_diagnosis().is_none());
}

#[test]
fn test_keyword_across_chunk_boundary() {
    let data = embed(filler(16 * 1024), 4090, b"CREATE PROC dbo.Straddler AS SELECT 1");
    let base = ScannerConfig::new().chunk_size(4096);

    let gap = Scanner::with_config(base.clone().chunk_overlap(0))
        .scan_bytes(&data)
        .unwrap();
    assert_eq!(gap.code_count(), 0);

    let overlapped = Scanner::with_config(base).scan_bytes(&data).unwrap();
    let code: Vec<_> = overlapped.code_findings().collect();
    assert_eq!(code.len(), 1);
    assert_eq!(code[0].byte_offset, 4090);
    assert_eq!(code[0].name.as_deref(), Some("Straddler"));
}

#[test]
fn test_statement_ending_past_chunk_is_read_whole() {
    let data = embed(filler(16 * 1024), 4076, b"CREATE PROC dbo.Straddler AS SELECT 1");
    let report = Scanner::with_config(ScannerConfig::new().chunk_size(4096))
        .scan_bytes(&data)
        .unwrap();

    let code: Vec<_> = report.code_findings().collect();
    assert_eq!(code.len(), 1);
    assert_eq!(code[0].byte_offset, 4076);
    assert_eq!(code[0].name.as_deref(), Some("Straddler"));
    assert!(code[0].full_text.contains("CREATE PROC dbo.Straddler AS SELECT 1"));
    assert_eq!(code[0].full_text.len(), 50 + 1000);
}

#[test]
fn test_statement_at_end_of_chunk_aligned_source() {
    // The source ends exactly on a chunk boundary, right after the name
    let statement = b"CREATE VIEW dbo.vLast";
    let data = embed(filler(8192), 8192 - statement.len(), statement);
    let report = Scanner::with_config(ScannerConfig::new().chunk_size(4096))
        .scan_bytes(&data)
        .unwrap();

    let code: Vec<_> = report.code_findings().collect();
    assert_eq!(code.len(), 1);
    assert_eq!(code[0].name.as_deref(), Some("vLast"));
    assert_eq!(report.bytes_scanned, 8192);
}

#[test]
fn test_match_inside_overlap_is_reported_once() {
    // Sits entirely in the tail carried into the second chunk
    let data = embed(filler(16 * 1024), 3800, b"CREATE VIEW dbo.vTail AS SELECT 1");
    let report = Scanner::with_config(ScannerConfig::new().chunk_size(4096))
        .scan_bytes(&data)
        .unwrap();

    let offsets: Vec<u64> = report.code_findings().map(|f| f.byte_offset).collect();
    assert_eq!(offsets, vec![3800]);
}

#[test]
fn test_finding_cap_is_never_exceeded() {
    let data = b"[dbo].[Table_00001] ".repeat(1000);
    let report = Scanner::with_config(ScannerConfig::new().max_findings(10).chunk_size(4096))
        .scan_bytes(&data)
        .unwrap();

    assert_eq!(report.code_count(), 10);
    assert!(report.findings_capped);
    assert!(report
        .code_findings()
        .all(|f| f.kind == FindingKind::PossibleBracketedObject
            && f.name.as_deref() == Some("Table_00001")));
}

#[test]
fn test_exactly_max_findings_is_not_capped() {
    let data = embed(filler(64 * 1024), 20_000, b"CREATE PROC dbo.Only AS SELECT 1");
    let report = Scanner::with_config(ScannerConfig::new().max_findings(1).chunk_size(4096))
        .scan_bytes(&data)
        .unwrap();

    assert_eq!(report.code_count(), 1);
    assert!(!report.findings_capped);
    assert_eq!(report.bytes_scanned, 64 * 1024);
    assert_eq!(report.chunks_sampled, 16);
}

#[test]
fn test_one_past_max_findings_is_capped() {
    let mut data = embed(filler(64 * 1024), 20_000, b"CREATE PROC dbo.First AS SELECT 1");
    data = embed(data, 40_000, b"CREATE PROC dbo.Second AS SELECT 2");
    let report = Scanner::with_config(ScannerConfig::new().max_findings(1).chunk_size(4096))
        .scan_bytes(&data)
        .unwrap();

    let names: Vec<_> = report.code_findings().map(|f| f.display_name()).collect();
    assert_eq!(names, vec!["First"]);
    assert!(report.findings_capped);
}

#[test]
fn test_offsets_stay_within_ceiling_and_source() {
    let mut data = filler(40_000);
    for at in (0..40_000 - 64).step_by(3000) {
        data[at..at + 33].copy_from_slice(b"CREATE VIEW dbo.vReport AS SELECT");
    }
    let ceiling = 20_000u64;

    let report = Scanner::with_config(
        ScannerConfig::new()
            .chunk_size(4096)
            .max_scan_bytes(ceiling),
    )
    .scan_bytes(&data)
    .unwrap();

    assert!(report.truncated);
    assert_eq!(report.bytes_scanned, ceiling);
    assert!(report.code_count() > 0);
    for finding in &report.findings {
        assert!(finding.byte_offset < ceiling);
        assert!(finding.byte_offset < data.len() as u64);
    }
}

#[test]
fn test_scan_is_deterministic() {
    let mut data = random_bytes(200_000, 3);
    data = embed(data, 5_000, b" CREATE PROCEDURE [dbo].[usp_Sync] AS SELECT 1 ");
    data = embed(data, 150_000, &utf16le("CREATE PROCEDURE dbo.usp_Wide AS"));

    let scanner = Scanner::with_config(ScannerConfig::new().chunk_size(8192));
    let first = scanner.scan_bytes(&data).unwrap();
    let second = scanner.scan_bytes(&data).unwrap();

    assert_eq!(first, second);
    assert!(first.code_count() >= 2);
}

#[test]
fn test_sampled_entropy_is_bounded() {
    for seed in 1..20 {
        let data = random_bytes(10_000, seed);
        let entropy = sample_entropy(&data, 7).unwrap();
        assert!((0.0..=MAX_ENTROPY).contains(&entropy));
    }
    assert_eq!(sample_entropy(&[0u8; 5000], 100), Some(0.0));
}

#[test]
fn test_export_script_from_scan() {
    let data = embed(filler(8192), 1000, b"CREATE VIEW [dbo].[vOrders] AS SELECT 1");
    let report = Scanner::new().scan_bytes(&data).unwrap();

    let script = export::render_script(&report);
    assert!(script.starts_with("-- Object: vOrders (Type: View (ASCII), Offset: 1000)\n"));
    assert!(script.contains("\nGO\n"));
    assert!(!script.contains("Header Analysis"));
}

#[test]
fn test_scan_file_from_disk() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&filler(2048)).unwrap();
    file.write_all(b"CREATE OR ALTER VIEW [Reporting].[vDaily] AS SELECT 1")
        .unwrap();
    file.write_all(&filler(2048)).unwrap();
    file.flush().unwrap();

    let report = scan_file(file.path()).unwrap();
    let views: Vec<_> = report
        .code_findings()
        .filter(|f| f.kind == FindingKind::ViewAscii)
        .collect();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].name.as_deref(), Some("vDaily"));
    assert_eq!(views[0].byte_offset, 2048);

    let limited =
        scan_file_with_config(file.path(), ScannerConfig::new().max_scan_bytes(1024)).unwrap();
    assert!(limited.truncated);
    assert_eq!(limited.code_count(), 0);
}

#[test]
fn test_missing_file_is_a_read_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = scan_file(dir.path().join("absent.bak")).unwrap_err();
    assert!(matches!(err, Error::FileRead { .. }));
}

struct FailAfter {
    remaining: usize,
}

impl Read for FailAfter {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "media error"));
        }
        let n = buf.len().min(self.remaining);
        buf[..n].fill(b' ');
        self.remaining -= n;
        Ok(n)
    }
}

#[test]
fn test_failing_source_ends_with_single_error() {
    let service = ScanService::new(ScannerConfig::new().chunk_size(1024).chunk_overlap(0));
    let mut handle = service.submit(FailAfter { remaining: 5000 }).unwrap();

    let mut events = Vec::new();
    while let Some(event) = handle.next_event() {
        events.push(event);
    }

    assert_eq!(handle.state(), ScanState::Failed);
    assert!(matches!(events.last(), Some(ScanEvent::Error { .. })));
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert!(!events
        .iter()
        .any(|e| matches!(e, ScanEvent::Complete { .. })));
}

#[test]
fn test_wait_maps_error_event() {
    let service = ScanService::default();
    let handle = service.submit(FailAfter { remaining: 0 }).unwrap();
    assert!(matches!(handle.wait(), Err(Error::ScanFailed(_))));
}

#[test]
fn test_cancel_before_first_chunk() {
    let service = ScanService::default();
    let request = ScanRequest::new(io::Cursor::new(filler(10_000)));
    request.cancel_token().cancel();

    let mut handle = service.submit_request(request).unwrap();
    match handle.next_event() {
        Some(ScanEvent::Cancelled { report }) => {
            assert_eq!(report.findings.len(), 1);
            assert_eq!(report.findings[0].kind, FindingKind::HeaderAnalysis);
        }
        other => panic!("expected cancellation, got {:?}", other),
    }
    assert_eq!(handle.state(), ScanState::Cancelled);
    assert!(handle.next_event().is_none());
}

#[test]
fn test_progress_events_precede_completion() {
    let service = ScanService::new(
        ScannerConfig::new()
            .chunk_size(1000)
            .chunk_overlap(0)
            .max_scan_bytes(10_000),
    );
    let mut percents = Vec::new();
    let outcome = service
        .submit(io::Cursor::new(filler(5000)))
        .unwrap()
        .wait_with(|p| percents.push(p.percent))
        .unwrap();

    assert_eq!(percents, vec![10, 20, 30, 40, 50]);
    assert_eq!(outcome.report().bytes_scanned, 5000);
    assert!(!service.is_busy());
}
