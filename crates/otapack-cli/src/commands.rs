use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use otapack_edify::{parse_script, FunctionRegistry, ParseErrors};
use otapack_install::{build_registry, NoDeviceExtensions, UpdaterConfig};
use otapack_package::{ArchiveError, ArchiveHandle, MappedPackage, PackageArchive, ZipPackage, SCRIPT_PATH};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::render::{render_section_header, render_status_line, OutputStyle};

pub(crate) type StockRegistry = FunctionRegistry<UpdaterConfig<'static>>;

pub(crate) fn stock_registry() -> StockRegistry {
    build_registry(&NoDeviceExtensions)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ScriptCheck {
    pub statements: usize,
    pub functions: Vec<String>,
}

/// Parses `source` against the stock registry.
pub(crate) fn check_script(source: &str, registry: &StockRegistry) -> Result<ScriptCheck, ParseErrors> {
    let root = parse_script(source, registry)?;
    Ok(ScriptCheck {
        statements: root.statements().len(),
        functions: root
            .called_functions()
            .into_iter()
            .map(str::to_string)
            .collect(),
    })
}

pub(crate) fn format_check_lines(
    path: &Path,
    result: &Result<ScriptCheck, ParseErrors>,
    style: OutputStyle,
) -> Vec<String> {
    match result {
        Ok(check) => {
            let mut lines = vec![render_status_line(
                style,
                "ok",
                &format!(
                    "{}: {} statements, {} distinct functions",
                    path.display(),
                    check.statements,
                    check.functions.len()
                ),
            )];
            if !check.functions.is_empty() {
                lines.push(format!("functions: {}", check.functions.join(", ")));
            }
            lines
        }
        Err(errors) => {
            let mut lines = errors
                .errors
                .iter()
                .map(|error| {
                    render_status_line(
                        style,
                        "err",
                        &format!(
                            "{}:{}:{}: {}",
                            path.display(),
                            error.line,
                            error.column,
                            error.message
                        ),
                    )
                })
                .collect::<Vec<_>>();
            lines.push(render_status_line(style, "err", &errors.to_string()));
            lines
        }
    }
}

pub(crate) fn run_check(path: &Path, style: OutputStyle) -> Result<()> {
    let source = fs::read_to_string(path)
        .with_context(|| format!("failed to read script {}", path.display()))?;
    let result = check_script(&source, &stock_registry());
    for line in format_check_lines(path, &result, style) {
        println!("{line}");
    }
    if let Err(errors) = result {
        anyhow::bail!("{}: {errors}", path.display());
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct ScriptReport {
    pub size: u64,
    pub parse_errors: Vec<String>,
    pub functions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct PackageReport {
    pub path: String,
    pub size: u64,
    pub sha256: String,
    pub entries: usize,
    pub script: Option<ScriptReport>,
}

fn inspect_script(archive: &dyn PackageArchive, registry: &StockRegistry) -> Result<Option<ScriptReport>> {
    let entry = match archive.find_entry(SCRIPT_PATH) {
        Ok(entry) => entry,
        Err(ArchiveError::EntryNotFound(_)) => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("failed to look up {SCRIPT_PATH}")),
    };
    let bytes = archive
        .extract_to_memory(SCRIPT_PATH)
        .with_context(|| format!("failed to extract {SCRIPT_PATH}"))?;
    let source = String::from_utf8(bytes).with_context(|| format!("{SCRIPT_PATH} is not UTF-8"))?;

    let (parse_errors, functions) = match check_script(&source, registry) {
        Ok(check) => (Vec::new(), check.functions),
        Err(errors) => (errors.errors.iter().map(ToString::to_string).collect(), Vec::new()),
    };
    Ok(Some(ScriptReport {
        size: entry.uncompressed_length,
        parse_errors,
        functions,
    }))
}

pub(crate) fn inspect_package(path: &Path) -> Result<PackageReport> {
    let package = MappedPackage::map(path)?;
    let archive = ZipPackage::new(package.bytes())
        .with_context(|| format!("failed to open {} as a zip archive", path.display()))?;
    let archive = ArchiveHandle::new(archive);
    let script = inspect_script(&*archive, &stock_registry())?;

    Ok(PackageReport {
        path: path.display().to_string(),
        size: package.len() as u64,
        sha256: hex::encode(Sha256::digest(package.bytes())),
        entries: archive.len(),
        script,
    })
}

pub(crate) fn format_inspect_lines(report: &PackageReport, style: OutputStyle) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(header) = render_section_header(style, &report.path) {
        lines.push(header);
    }
    lines.push(format!("size: {} bytes", report.size));
    lines.push(format!("sha256: {}", report.sha256));
    lines.push(format!("entries: {}", report.entries));

    match &report.script {
        None => lines.push(render_status_line(
            style,
            "err",
            &format!("script: missing {SCRIPT_PATH}"),
        )),
        Some(script) if script.parse_errors.is_empty() => {
            lines.push(render_status_line(
                style,
                "ok",
                &format!("script: {} bytes, parses cleanly", script.size),
            ));
            if !script.functions.is_empty() {
                lines.push(format!("functions: {}", script.functions.join(", ")));
            }
        }
        Some(script) => {
            lines.push(render_status_line(
                style,
                "warn",
                &format!(
                    "script: {} bytes, {} parse errors",
                    script.size,
                    script.parse_errors.len()
                ),
            ));
            lines.extend(script.parse_errors.iter().map(|error| format!("  {error}")));
        }
    }
    lines
}

pub(crate) fn run_inspect(path: &Path, json: bool, style: OutputStyle) -> Result<()> {
    let report = inspect_package(path)?;
    if json {
        let rendered =
            serde_json::to_string_pretty(&report).context("failed to serialize package report")?;
        println!("{rendered}");
    } else {
        for line in format_inspect_lines(&report, style) {
            println!("{line}");
        }
    }
    Ok(())
}

pub(crate) fn format_function_lines(registry: &StockRegistry) -> Vec<String> {
    let width = registry
        .entries()
        .map(|(name, _)| name.len())
        .max()
        .unwrap_or_default();
    registry
        .entries()
        .map(|(name, namespace)| format!("{name:<width$}  {namespace}"))
        .collect()
}

pub(crate) fn run_functions() {
    for line in format_function_lines(&stock_registry()) {
        println!("{line}");
    }
}
