use anyhow::{Context, Result};
use clap::Parser;
use entity_scan::archive::{ArchiveEntry, entries_for, jar_entries};
use entity_scan::categorize::Categorization;
use entity_scan::cli::{Cli, Commands, OutputFormat};
use entity_scan::collector::ScanSummary;
use entity_scan::config::{ScanConfig, load_config};
use entity_scan::decrypt::{AesCbcCipher, KeyMaterial};
use entity_scan::handler::{BatchStats, EntryFailure, ScanReport, ScanSession};
use entity_scan::logging;
use entity_scan::scan::scan_jars;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(cli.log_json);
    let config = load_config(&cli)?;

    match cli.command.clone() {
        Commands::Scan {
            archive,
            deps,
            format,
            output,
        } => {
            let result = run_scan(&config, &archive, &deps)?;
            write_scan_output(&result, format, output.as_deref())?;
        }
        Commands::Inspect { class_file, path } => {
            let output = inspect_class(&config, &class_file, path)?;
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Commands::Seal { input, output } => {
            seal_class(&config, &input, &output)?;
        }
    }

    Ok(())
}

#[derive(Debug, Serialize)]
struct PartitionOutput {
    root: Vec<String>,
    non_root: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ScanOutput {
    archive: String,
    dependency_jars: usize,
    decryption_enabled: bool,
    duration_ms: u64,
    stats: BatchStats,
    summary: ScanSummary,
    models: PartitionOutput,
    converters: PartitionOutput,
    failures: Vec<EntryFailure>,
}

#[derive(Debug, Serialize)]
struct InspectOutput {
    path: String,
    name: String,
    annotations: Vec<String>,
    categorization: Categorization,
    protected: bool,
    decrypted: bool,
}

fn run_scan(config: &ScanConfig, archive: &Path, deps: &[PathBuf]) -> Result<ScanOutput> {
    let start = Instant::now();
    let session = ScanSession::new(config.session_options()?)
        .context("Invalid scan configuration")?;

    let mut entries = entries_for(archive, true)?;
    let dependency_jars = collect_dependency_entries(deps, &mut entries)?;
    info!(
        archive = %archive.display(),
        entries = entries.len(),
        dependency_jars,
        decryption = session.gate().is_enabled(),
        "starting scan"
    );

    session.scan(&entries);
    let ScanReport {
        result,
        mut failures,
        stats,
    } = session.finish();
    failures.sort_by(|a, b| a.path.cmp(&b.path));

    let partition = |category| PartitionOutput {
        root: result.class_names(category, true),
        non_root: result.class_names(category, false),
    };

    Ok(ScanOutput {
        archive: archive.to_string_lossy().to_string(),
        dependency_jars,
        decryption_enabled: config.decryption.is_some(),
        duration_ms: start.elapsed().as_millis() as u64,
        stats,
        summary: result.summary(),
        models: partition(Categorization::Model),
        converters: partition(Categorization::Converter),
        failures,
    })
}

/// Appends non-root entries of every dependency jar; unreadable jars are skipped.
fn collect_dependency_entries(deps: &[PathBuf], entries: &mut Vec<ArchiveEntry>) -> Result<usize> {
    let mut jars = 0usize;
    for dep in deps {
        for jar in scan_jars(dep)? {
            match jar_entries(&jar, false) {
                Ok(found) => {
                    jars += 1;
                    entries.extend(found);
                }
                Err(e) => warn!(jar = %jar.display(), error = %e, "skipping dependency jar"),
            }
        }
    }
    Ok(jars)
}

fn inspect_class(
    config: &ScanConfig,
    class_file: &Path,
    path: Option<String>,
) -> Result<InspectOutput> {
    let raw = std::fs::read(class_file)
        .with_context(|| format!("Failed to read class file: {}", class_file.display()))?;
    let path = path.unwrap_or_else(|| class_file.to_string_lossy().to_string());

    let session = ScanSession::new(config.session_options()?)
        .context("Invalid scan configuration")?;
    let inspection = session.inspect(&path, raw)?;
    let protected = session.gate().is_protected(&path);

    Ok(InspectOutput {
        protected,
        path,
        name: inspection.class.name,
        annotations: inspection.class.annotations,
        categorization: inspection.categorization,
        decrypted: inspection.decrypted,
    })
}

fn seal_class(config: &ScanConfig, input: &Path, output: &Path) -> Result<()> {
    let decryption = config
        .decryption
        .as_ref()
        .context("No decryption key configured (set ENTITY_SCAN_KEY or the config file)")?;
    let key = hex::decode(decryption.decryption_key.trim())
        .context("decryption_key is not valid hex")?;
    let key = KeyMaterial::new(&key, decryption.key_derivation_seed.clone())?;

    let plaintext = std::fs::read(input)
        .with_context(|| format!("Failed to read class file: {}", input.display()))?;
    let sealed = AesCbcCipher.encrypt(&plaintext, &key);
    write_file(output, &sealed)?;

    info!(
        input = %input.display(),
        output = %output.display(),
        bytes = sealed.len(),
        "sealed class"
    );
    Ok(())
}

fn render_text(result: &ScanOutput) -> String {
    let mut out = String::new();
    out.push_str(&format!("archive: {}\n", result.archive));
    out.push_str(&format!("dependency_jars: {}\n", result.dependency_jars));
    out.push_str(&format!("duration_ms: {}\n", result.duration_ms));
    out.push_str(&format!(
        "entries: handled {}, recorded {}, discarded {}, failed {}\n",
        result.stats.handled, result.stats.recorded, result.stats.discarded, result.stats.failed
    ));

    for (label, partition) in [("models", &result.models), ("converters", &result.converters)] {
        for (scope, names) in [("root", &partition.root), ("non-root", &partition.non_root)] {
            out.push_str(&format!("{label} ({scope}): {}\n", names.len()));
            for name in names {
                out.push_str(&format!("  {name}\n"));
            }
        }
    }

    if !result.failures.is_empty() {
        out.push_str(&format!("failures: {}\n", result.failures.len()));
        for f in &result.failures {
            out.push_str(&format!("- [{}] {}: {}\n", f.error.kind(), f.path, f.error));
        }
    }
    out
}

fn write_scan_output(
    result: &ScanOutput,
    format: OutputFormat,
    output: Option<&Path>,
) -> Result<()> {
    let content = match format {
        OutputFormat::Json => serde_json::to_string_pretty(result)?,
        OutputFormat::Text => render_text(result),
    };

    match output {
        Some(path) => write_file(path, content.as_bytes()),
        None => {
            print!("{content}");
            if !content.ends_with('\n') {
                println!();
            }
            Ok(())
        }
    }
}

fn write_file(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
    }
    std::fs::write(path, content).with_context(|| format!("Failed to write: {}", path.display()))
}
