use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Component, Path, PathBuf};
use std::process::Command;

use otapack_core::{CauseCode, ChannelCommand};
use otapack_edify::{bool_value, Aborted, EvalResult, Expr, FunctionRegistry};
use otapack_package::ArchiveError;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::config::{InstallCall, UpdaterConfig};
use crate::labels::FileKind;

pub const INSTALL_NAMESPACE: &str = "install";

const EXTRACTED_FILE_MODE: u32 = 0o755;
const MAX_PROP_FILE_SIZE: u64 = 65_536;

pub fn register_install_functions(registry: &mut FunctionRegistry<UpdaterConfig<'_>>) {
    registry.register(INSTALL_NAMESPACE, "ui_print", ui_print_fn);
    registry.register(INSTALL_NAMESPACE, "show_progress", show_progress_fn);
    registry.register(INSTALL_NAMESPACE, "set_progress", set_progress_fn);
    registry.register(INSTALL_NAMESPACE, "wipe_cache", wipe_cache_fn);
    registry.register(INSTALL_NAMESPACE, "package_extract_file", package_extract_file_fn);
    registry.register(INSTALL_NAMESPACE, "package_extract_dir", package_extract_dir_fn);
    registry.register(INSTALL_NAMESPACE, "read_file", read_file_fn);
    registry.register(INSTALL_NAMESPACE, "write_value", write_value_fn);
    registry.register(INSTALL_NAMESPACE, "file_getprop", file_getprop_fn);
    registry.register(INSTALL_NAMESPACE, "sha256_check", sha256_check_fn);
    registry.register(INSTALL_NAMESPACE, "run_program", run_program_fn);
}

fn ui_print_fn(call: &mut InstallCall<'_, '_>, args: &[Expr]) -> EvalResult {
    let message = call.evaluate_args(args)?.concat();
    call.host().channel.ui_print(&message);
    Ok(message)
}

fn parse_fraction(call: &mut InstallCall<'_, '_>, value: &str) -> Result<f64, Aborted> {
    match value.trim().parse::<f64>() {
        Ok(fraction) if fraction.is_finite() => Ok(fraction),
        _ => {
            let message = format!("{}(): failed to parse fraction \"{value}\"", call.name());
            Err(call.abort_with_cause(CauseCode::ARGS_PARSING_FAILURE, message))
        }
    }
}

fn show_progress_fn(call: &mut InstallCall<'_, '_>, args: &[Expr]) -> EvalResult {
    let values = call.expect_args(args, 2)?;
    let fraction = parse_fraction(call, &values[0])?;
    let Ok(seconds) = values[1].trim().parse::<u32>() else {
        let message = format!("{}(): failed to parse seconds \"{}\"", call.name(), values[1]);
        return Err(call.abort_with_cause(CauseCode::ARGS_PARSING_FAILURE, message));
    };
    call.host()
        .channel
        .send(ChannelCommand::Progress { fraction, seconds });
    Ok(values[0].clone())
}

fn set_progress_fn(call: &mut InstallCall<'_, '_>, args: &[Expr]) -> EvalResult {
    let values = call.expect_args(args, 1)?;
    let fraction = parse_fraction(call, &values[0])?;
    call.host().channel.send(ChannelCommand::SetProgress(fraction));
    Ok(values[0].clone())
}

fn wipe_cache_fn(call: &mut InstallCall<'_, '_>, args: &[Expr]) -> EvalResult {
    call.expect_args(args, 0)?;
    call.host().channel.send(ChannelCommand::WipeCache);
    Ok(bool_value(true))
}

fn extract_failure(call: &mut InstallCall<'_, '_>, entry: &str, dest: &Path, err: ArchiveError) -> Aborted {
    let cause = match &err {
        ArchiveError::Write(source) => {
            CauseCode::for_write_error(source, CauseCode::PACKAGE_EXTRACT_FILE_FAILURE)
        }
        _ => CauseCode::PACKAGE_EXTRACT_FILE_FAILURE,
    };
    let message = format!(
        "{}(): failed to extract {entry} to {}: {err}",
        call.name(),
        dest.display()
    );
    call.abort_with_cause(cause, message)
}

fn write_failure(call: &mut InstallCall<'_, '_>, dest: &Path, err: io::Error) -> Aborted {
    let cause = CauseCode::for_write_error(&err, CauseCode::PACKAGE_EXTRACT_FILE_FAILURE);
    let message = format!("{}(): failed to write {}: {err}", call.name(), dest.display());
    call.abort_with_cause(cause, message)
}

/// Extracts one entry to `dest`, synced to disk and labeled.
fn extract_entry(call: &mut InstallCall<'_, '_>, entry: &str, dest: &Path) -> Result<u64, Aborted> {
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(EXTRACTED_FILE_MODE)
        .open(dest);
    let file = match file {
        Ok(file) => file,
        Err(err) => {
            let message = format!("{}(): can't open {} for write: {err}", call.name(), dest.display());
            return Err(call.abort_with_cause(CauseCode::FILE_OPEN_FAILURE, message));
        }
    };

    let mut writer = BufWriter::new(file);
    let archive = call.host().archive;
    let written = match archive.extract_to_writer(entry, &mut writer) {
        Ok(written) => written,
        Err(err) => return Err(extract_failure(call, entry, dest, err)),
    };
    let file = match writer.into_inner() {
        Ok(file) => file,
        Err(err) => return Err(write_failure(call, dest, err.into_error())),
    };
    if let Err(err) = file.sync_all() {
        let message = format!("{}(): failed to fsync {}: {err}", call.name(), dest.display());
        return Err(call.abort_with_cause(CauseCode::FSYNC_FAILURE, message));
    }

    call.host().label(dest, FileKind::Regular);
    Ok(written)
}

fn package_extract_file_fn(call: &mut InstallCall<'_, '_>, args: &[Expr]) -> EvalResult {
    if args.len() == 1 {
        let values = call.evaluate_args(args)?;
        let entry = &values[0];
        let archive = call.host().archive;
        let bytes = match archive.extract_to_memory(entry) {
            Ok(bytes) => bytes,
            Err(err) => {
                let message = format!("{}(): failed to extract {entry}: {err}", call.name());
                return Err(call.abort_with_cause(CauseCode::PACKAGE_EXTRACT_FILE_FAILURE, message));
            }
        };
        return String::from_utf8(bytes).map_err(|_| {
            let message = format!("{}(): {entry} is not text", call.name());
            call.abort_with_cause(CauseCode::PACKAGE_EXTRACT_FILE_FAILURE, message)
        });
    }

    let values = call.expect_args(args, 2)?;
    let dest = PathBuf::from(&values[1]);
    let written = extract_entry(call, &values[0], &dest)?;
    info!("extracted {} ({written} bytes) to {}", values[0], dest.display());
    Ok(bool_value(true))
}

/// Joins an archive-relative path under `base`, refusing paths that would
/// escape it.
fn join_contained(base: &Path, relative: &str) -> Option<PathBuf> {
    let relative = Path::new(relative);
    let mut joined = base.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => joined.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(joined)
}

fn create_dirs_labeled(call: &mut InstallCall<'_, '_>, dir: &Path) -> Result<(), Aborted> {
    let mut missing = Vec::new();
    let mut current = Some(dir);
    while let Some(path) = current {
        if path.as_os_str().is_empty() || path.exists() {
            break;
        }
        missing.push(path.to_path_buf());
        current = path.parent();
    }
    for path in missing.iter().rev() {
        if let Err(err) = fs::create_dir(path) {
            if err.kind() != io::ErrorKind::AlreadyExists {
                let message = format!("{}(): failed to create {}: {err}", call.name(), path.display());
                return Err(call.abort_with_cause(CauseCode::PACKAGE_EXTRACT_FILE_FAILURE, message));
            }
        }
        call.host().label(path, FileKind::Directory);
    }
    Ok(())
}

fn package_extract_dir_fn(call: &mut InstallCall<'_, '_>, args: &[Expr]) -> EvalResult {
    let values = call.expect_args(args, 2)?;
    let prefix = values[0].trim_matches('/');
    let prefix = if prefix.is_empty() {
        String::new()
    } else {
        format!("{prefix}/")
    };
    let dest_root = PathBuf::from(&values[1]);

    let archive = call.host().archive;
    let entries = archive
        .entry_names()
        .into_iter()
        .filter(|name| name.starts_with(&prefix))
        .collect::<Vec<_>>();

    create_dirs_labeled(call, &dest_root)?;
    let mut extracted = 0_usize;
    for entry in &entries {
        let relative = &entry[prefix.len()..];
        let Some(dest) = join_contained(&dest_root, relative) else {
            warn!("skipping {entry}: path escapes {}", dest_root.display());
            continue;
        };
        if entry.ends_with('/') {
            create_dirs_labeled(call, &dest)?;
            continue;
        }
        if let Some(parent) = dest.parent() {
            create_dirs_labeled(call, parent)?;
        }
        extract_entry(call, entry, &dest)?;
        extracted += 1;
    }

    info!("extracted {extracted} files from {} to {}", values[0], dest_root.display());
    Ok(bool_value(true))
}

fn read_file_fn(call: &mut InstallCall<'_, '_>, args: &[Expr]) -> EvalResult {
    let values = call.expect_args(args, 1)?;
    let path = &values[0];
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            let message = format!("{}(): failed to read {path}: {err}", call.name());
            return Err(call.abort_with_cause(CauseCode::FREAD_FAILURE, message));
        }
    };
    String::from_utf8(bytes).map_err(|_| {
        let message = format!("{}(): {path} is not text", call.name());
        call.abort_with_cause(CauseCode::FREAD_FAILURE, message)
    })
}

fn write_value_fn(call: &mut InstallCall<'_, '_>, args: &[Expr]) -> EvalResult {
    let values = call.expect_args(args, 2)?;
    let (value, path) = (&values[0], &values[1]);
    match fs::write(path, value) {
        Ok(()) => Ok(bool_value(true)),
        Err(err) => {
            warn!("{}(): failed to write to {path}: {err}", call.name());
            Ok(bool_value(false))
        }
    }
}

pub(crate) fn prop_value<'t>(text: &'t str, key: &str) -> Option<&'t str> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .find(|(name, _)| name.trim() == key)
        .map(|(_, value)| value.trim())
}

fn file_getprop_fn(call: &mut InstallCall<'_, '_>, args: &[Expr]) -> EvalResult {
    let values = call.expect_args(args, 2)?;
    let (path, key) = (&values[0], &values[1]);
    let text = fs::metadata(path).and_then(|metadata| {
        if metadata.len() > MAX_PROP_FILE_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("file is larger than {MAX_PROP_FILE_SIZE} bytes"),
            ));
        }
        fs::read_to_string(path)
    });
    match text {
        Ok(text) => Ok(prop_value(&text, key).unwrap_or_default().to_string()),
        Err(err) => {
            let message = format!("{}(): failed to read {path}: {err}", call.name());
            Err(call.abort_with_cause(CauseCode::FILE_GETPROP_FAILURE, message))
        }
    }
}

fn sha256_check_fn(call: &mut InstallCall<'_, '_>, args: &[Expr]) -> EvalResult {
    let values = call.expect_min_args(args, 1)?;
    let digest = hex::encode(Sha256::digest(values[0].as_bytes()));
    if values.len() == 1 {
        return Ok(digest);
    }
    Ok(values[1..]
        .iter()
        .find(|candidate| candidate.eq_ignore_ascii_case(&digest))
        .cloned()
        .unwrap_or_default())
}

fn run_program_fn(call: &mut InstallCall<'_, '_>, args: &[Expr]) -> EvalResult {
    let values = call.expect_min_args(args, 1)?;
    let program = &values[0];
    info!("about to run program [{}]", values.join(" "));
    let status = match Command::new(program).args(&values[1..]).status() {
        Ok(status) => status,
        Err(err) => {
            let message = format!("{}(): failed to run {program}: {err}", call.name());
            return Err(call.abort(message));
        }
    };
    let code = status.code().unwrap_or(-1);
    if !status.success() {
        warn!("run_program: {program} exited with {status}");
    }
    Ok(code.to_string())
}
