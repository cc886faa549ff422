//! sqlsalvage - Recover SQL object source from raw backup files
//!
//! This tool scans database backups byte by byte for stored procedures,
//! views and object names, and writes what it recovers as SQL scripts.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, ValueEnum};
use sqlsalvage_core::{
    export, scan_file_with_config, ExportConfig, Finding, Progress, ScanOutcome, ScanReport,
    ScanService, ScannerConfig,
};
use std::collections::HashMap;
use std::fs;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, trace, warn, Level};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

const MIB: u64 = 1024 * 1024;

/// File extensions scanned in directory mode
const BACKUP_EXTENSIONS: [&str; 4] = ["bak", "trn", "mdf", "ldf"];

/// Recover stored procedure and view source from raw SQL Server backup files
#[derive(Parser, Debug)]
#[command(name = "sqlsalvage")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    input: InputMode,

    /// Output directory for recovered .sql files
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output format
    #[arg(long, value_enum, default_value = "summary")]
    format: OutputFormat,

    /// Chunk size in MiB
    #[arg(long, env = "SQLSALVAGE_CHUNK_SIZE_MIB", default_value_t = 5)]
    chunk_size_mib: u64,

    /// Scan at most this many MiB of each file
    #[arg(long, env = "SQLSALVAGE_MAX_SCAN_MIB", default_value_t = 100)]
    max_scan_mib: u64,

    /// Maximum number of objects recovered per file
    #[arg(long, env = "SQLSALVAGE_MAX_FINDINGS", default_value_t = 500)]
    max_findings: usize,

    /// Average entropy (0-8) above which an empty scan is reported as compressed
    #[arg(long, env = "SQLSALVAGE_ENTROPY_THRESHOLD", default_value_t = 6.0)]
    entropy_threshold: f64,

    /// Do not carry bytes between chunks (objects split by a chunk boundary are missed)
    #[arg(long)]
    no_overlap: bool,

    /// Dry run - don't write files, just show what would be written
    #[arg(long)]
    dry_run: bool,

    /// Overwrite existing files
    #[arg(long)]
    force: bool,

    /// With --format sql, write one file per recovered object
    #[arg(long)]
    split: bool,

    /// Conflict resolution strategy for same-name different-content objects
    #[arg(long, value_enum, default_value = "hash-suffix")]
    conflict_strategy: ConflictStrategy,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct InputMode {
    /// Path to a single backup file to scan
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Path to a directory of backups to scan (.bak, .trn, .mdf, .ldf)
    #[arg(short, long)]
    directory: Option<PathBuf>,
}

/// Output format for scan results
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// One line per finding, plus entropy and diagnosis notes
    Summary,
    /// The full report as JSON on stdout (one line per file with --directory)
    Json,
    /// Recovered objects written as .sql scripts
    Sql,
    /// Just the object names (for scripting)
    Names,
}

/// Strategy for resolving naming conflicts
#[derive(Debug, Clone, Copy, ValueEnum)]
enum ConflictStrategy {
    /// Append a short content hash: name~a1b2c3d4.sql
    HashSuffix,
    /// Append the object's offset in the backup: name~at-1f00.sql
    OffsetSuffix,
    /// Skip conflicting objects (keep first occurrence only)
    SkipConflicts,
}

/// Tracks written scripts for deduplication
#[derive(Default)]
struct ObjectRegistry {
    /// Maps file name -> content hashes written under it
    seen: HashMap<String, Vec<String>>,
    /// Statistics
    stats: RegistryStats,
}

#[derive(Default)]
struct RegistryStats {
    total_found: usize,
    duplicates_skipped: usize,
    conflicts_renamed: usize,
    written: usize,
}

impl ObjectRegistry {
    fn new() -> Self {
        Self::default()
    }

    /// Compute a short hash of the content (first 8 chars of blake3)
    fn content_hash(content: &str) -> String {
        let hash = blake3::hash(content.as_bytes());
        hash.to_hex()[..8].to_string()
    }

    fn is_duplicate(&self, filename: &str, content_hash: &str) -> bool {
        self.seen
            .get(filename)
            .map(|hashes| hashes.iter().any(|h| h == content_hash))
            .unwrap_or(false)
    }

    fn variant_count(&self, filename: &str) -> usize {
        self.seen.get(filename).map(|e| e.len()).unwrap_or(0)
    }

    /// Register a script and return the resolved output path
    fn register(
        &mut self,
        filename: &str,
        content_hash: &str,
        output_dir: &Path,
        byte_offset: u64,
        strategy: ConflictStrategy,
    ) -> Option<PathBuf> {
        self.stats.total_found += 1;

        if self.is_duplicate(filename, content_hash) {
            debug!("Skipping duplicate: {} (hash: {})", filename, content_hash);
            self.stats.duplicates_skipped += 1;
            return None;
        }

        let output_path = if self.variant_count(filename) == 0 {
            output_dir.join(filename)
        } else {
            let suffix = match strategy {
                ConflictStrategy::SkipConflicts => {
                    debug!(
                        "Skipping conflict: {} (different content, hash: {})",
                        filename, content_hash
                    );
                    self.stats.duplicates_skipped += 1;
                    return None;
                }
                ConflictStrategy::HashSuffix => format!("~{}", content_hash),
                ConflictStrategy::OffsetSuffix => format!("~at-{:x}", byte_offset),
            };
            let new_name = Self::add_suffix(filename, &suffix);
            info!("Conflict resolved: {} -> {} (content differs)", filename, new_name);
            self.stats.conflicts_renamed += 1;
            output_dir.join(new_name)
        };

        self.seen
            .entry(filename.to_string())
            .or_default()
            .push(content_hash.to_string());

        Some(output_path)
    }

    /// Add a suffix before the .sql extension
    fn add_suffix(filename: &str, suffix: &str) -> String {
        if let Some(stem) = filename.strip_suffix(".sql") {
            format!("{}{}.sql", stem, suffix)
        } else {
            format!("{}{}", filename, suffix)
        }
    }

    fn print_summary(&self) {
        info!(
            "Summary: {} scripts, {} duplicates skipped, {} conflicts renamed, {} written",
            self.stats.total_found,
            self.stats.duplicates_skipped,
            self.stats.conflicts_renamed,
            self.stats.written
        );
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .init();

    let config = scanner_config(&cli)?;

    if let Some(ref file) = cli.input.file {
        process_single_file(&cli, &config, file)
    } else if let Some(ref directory) = cli.input.directory {
        process_directory(&cli, &config, directory)
    } else {
        bail!("Either --file or --directory must be specified")
    }
}

/// Map the command line tunables onto the scanner configuration
fn scanner_config(cli: &Cli) -> Result<ScannerConfig> {
    let chunk_size = cli
        .chunk_size_mib
        .checked_mul(MIB)
        .and_then(|bytes| usize::try_from(bytes).ok())
        .with_context(|| format!("Chunk size of {} MiB is too large", cli.chunk_size_mib))?;
    let max_scan_bytes = cli
        .max_scan_mib
        .checked_mul(MIB)
        .with_context(|| format!("Scan limit of {} MiB is too large", cli.max_scan_mib))?;

    let mut config = ScannerConfig::new()
        .chunk_size(chunk_size)
        .max_scan_bytes(max_scan_bytes)
        .max_findings(cli.max_findings)
        .entropy_threshold(cli.entropy_threshold);
    if cli.no_overlap {
        config = config.chunk_overlap(0);
    }

    config.validate().context("Invalid scan parameters")?;
    Ok(config)
}

/// Scan a single file in the background, logging progress as it arrives
fn process_single_file(cli: &Cli, config: &ScannerConfig, file: &Path) -> Result<()> {
    if !file.exists() {
        bail!("Input file does not exist: {}", file.display());
    }
    if !file.is_file() {
        bail!("Input path is not a file: {}", file.display());
    }

    let source = fs::File::open(file)
        .with_context(|| format!("Failed to open input file: {}", file.display()))?;

    let service = ScanService::new(config.clone());
    let handle = service
        .submit(BufReader::new(source))
        .with_context(|| format!("Failed to start scan of {}", file.display()))?;

    let outcome = handle
        .wait_with(log_progress)
        .with_context(|| format!("Failed to scan {}", file.display()))?;
    let report = match outcome {
        ScanOutcome::Completed(report) => report,
        ScanOutcome::Cancelled(report) => {
            warn!("Scan of {} was cancelled; results are partial", file.display());
            report
        }
    };

    let mut registry = ObjectRegistry::new();
    emit_report(cli, file, &report, &mut registry, false)?;

    if cli.format == OutputFormat::Sql && !cli.dry_run {
        registry.print_summary();
    }

    Ok(())
}

fn log_progress(progress: Progress) {
    info!(
        "{:>3}% scanned (offset {}, {} objects so far)",
        progress.percent, progress.offset, progress.found_count
    );
}

/// Scan every backup under a directory recursively
fn process_directory(cli: &Cli, config: &ScannerConfig, directory: &Path) -> Result<()> {
    if !directory.exists() {
        bail!("Directory does not exist: {}", directory.display());
    }
    if !directory.is_dir() {
        bail!("Path is not a directory: {}", directory.display());
    }

    info!("Scanning directory: {}", directory.display());

    let mut registry = ObjectRegistry::new();
    let mut backups_processed = 0;

    for entry in WalkDir::new(directory)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();

        if !path.is_file() {
            continue;
        }

        // Skip hidden files
        if path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with('.'))
            .unwrap_or(false)
        {
            continue;
        }

        if !is_backup_file(path) {
            trace!("Skipping non-backup: {}", path.display());
            continue;
        }

        debug!("Processing backup: {}", path.display());
        let result = scan_file_with_config(path, config.clone())
            .with_context(|| format!("Failed to scan {}", path.display()))
            .and_then(|report| emit_report(cli, path, &report, &mut registry, true));
        if let Err(e) = result {
            // Log error but continue with other files
            warn!("Error processing {}: {:#}", path.display(), e);
        }
        backups_processed += 1;
    }

    info!("Processed {} backups", backups_processed);

    if cli.format == OutputFormat::Sql && !cli.dry_run {
        registry.print_summary();
    }

    Ok(())
}

/// Returns true for files carrying one of the backup extensions
fn is_backup_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            BACKUP_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Present one report in the selected format.
///
/// With `batch` set, JSON is written as one compact line per report so that a
/// directory scan produces newline-delimited JSON.
fn emit_report(
    cli: &Cli,
    source: &Path,
    report: &ScanReport,
    registry: &mut ObjectRegistry,
    batch: bool,
) -> Result<()> {
    if report.truncated {
        warn!(
            "{}: only the first {} bytes were scanned (raise --max-scan-mib to scan more)",
            source.display(),
            report.bytes_scanned
        );
    }
    if report.findings_capped {
        warn!(
            "{}: stopped after {} objects (raise --max-findings to recover more)",
            source.display(),
            report.code_count()
        );
    }

    match cli.format {
        OutputFormat::Summary => print_summary(source, report),
        OutputFormat::Json if batch => println!("{}", json_line(source, report)?),
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(report)
                .context("Failed to serialize scan report")?;
            println!("{}", json);
        }
        OutputFormat::Names => {
            for finding in report.code_findings() {
                println!("{}", finding.display_name());
            }
        }
        OutputFormat::Sql => {
            if let Some(diagnosis) = report.compression_diagnosis() {
                warn!("{}: {}", source.display(), diagnosis.preview);
            }
            if report.code_count() == 0 {
                info!("Nothing recovered from {}", source.display());
                return Ok(());
            }
            if cli.split {
                let config = ExportConfig::default();
                for finding in report.code_findings() {
                    let filename = format!("{}.sql", object_file_stem(finding));
                    let content = export::render_object(finding, &config);
                    write_registered(cli, registry, &filename, &content, finding.byte_offset);
                }
            } else {
                let stem = source
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .map(safe_file_name)
                    .unwrap_or_else(|| "backup".to_string());
                let filename = format!("{}.recovered.sql", stem);
                let content = export::render_script(report);
                write_registered(cli, registry, &filename, &content, 0);
            }
        }
    }

    Ok(())
}

/// One NDJSON record: `{"source": <path>, "report": <report>}`
fn json_line(source: &Path, report: &ScanReport) -> Result<String> {
    let report = serde_json::to_value(report).context("Failed to serialize scan report")?;
    let line = serde_json::json!({
        "source": source.display().to_string(),
        "report": report,
    });
    Ok(line.to_string())
}

fn print_summary(source: &Path, report: &ScanReport) {
    println!(
        "{}: {} object(s) in {} bytes",
        source.display(),
        report.code_count(),
        report.bytes_scanned
    );
    match report.average_entropy {
        Some(entropy) => println!(
            "  average entropy {:.2} over {} chunk(s)",
            entropy, report.chunks_sampled
        ),
        None => println!("  average entropy n/a (too little data to sample)"),
    }
    if let Some(header) = report.header() {
        println!("  {}", header.preview);
    }
    if let Some(diagnosis) = report.compression_diagnosis() {
        println!("  ! {}", diagnosis.full_text.replace('\n', "\n    "));
    }
    for finding in report.code_findings() {
        println!(
            "  {:>12}  {:<26} {}",
            finding.byte_offset,
            finding.kind.label(),
            finding.display_name()
        );
    }
    if report.truncated {
        println!("  (scan stopped at the size limit)");
    }
}

/// File stem for a single recovered object
fn object_file_stem(finding: &Finding) -> String {
    match &finding.name {
        Some(name) => safe_file_name(name),
        None => format!("unnamed-{:x}", finding.byte_offset),
    }
}

/// Restrict a recovered name to characters that are safe in a file name.
///
/// Names come straight from backup bytes, so separators and leading dots
/// are replaced to keep every output inside the output directory.
fn safe_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '#' | '@' | '$') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Register a script and write it, honoring --dry-run
fn write_registered(
    cli: &Cli,
    registry: &mut ObjectRegistry,
    filename: &str,
    content: &str,
    byte_offset: u64,
) {
    let content_hash = ObjectRegistry::content_hash(content);
    let Some(output_path) = registry.register(
        filename,
        &content_hash,
        &cli.output,
        byte_offset,
        cli.conflict_strategy,
    ) else {
        return;
    };

    if cli.dry_run {
        println!("Would write: {}", output_path.display());
        if cli.verbose > 0 {
            println!("---");
            println!("{}", content);
            println!("---");
        }
        return;
    }

    match write_script(&output_path, content, cli.force) {
        Ok(()) => {
            println!("Wrote {}", output_path.display());
            registry.stats.written += 1;
        }
        Err(e) => {
            error!("Failed to write {}: {:#}", output_path.display(), e);
        }
    }
}

/// Write a script to disk, refusing to overwrite unless forced
fn write_script(output_path: &Path, content: &str, force: bool) -> Result<()> {
    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    if output_path.exists() && !force {
        bail!(
            "File already exists: {} (use --force to overwrite)",
            output_path.display()
        );
    }

    let mut file = fs::File::create(output_path)
        .with_context(|| format!("Failed to create file: {}", output_path.display()))?;

    file.write_all(content.as_bytes())
        .with_context(|| format!("Failed to write file: {}", output_path.display()))?;

    Ok(())
}
