use std::fs;
use std::io;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::Path;

use otapack_core::CauseCode;
use otapack_edify::{Aborted, EvalResult, Expr, FunctionRegistry};
use tracing::warn;

use crate::config::{InstallCall, UpdaterConfig};
use crate::labels::FileKind;

pub const FS_NAMESPACE: &str = "fs";

pub fn register_fs_functions(registry: &mut FunctionRegistry<UpdaterConfig<'_>>) {
    registry.register(FS_NAMESPACE, "delete", delete_fn);
    registry.register(FS_NAMESPACE, "delete_recursive", delete_recursive_fn);
    registry.register(FS_NAMESPACE, "symlink", symlink_fn);
    registry.register(FS_NAMESPACE, "rename", rename_fn);
    registry.register(FS_NAMESPACE, "set_perm", set_perm_fn);
}

/// Removes each path and returns how many were removed.
fn delete_fn(call: &mut InstallCall<'_, '_>, args: &[Expr]) -> EvalResult {
    let paths = call.evaluate_args(args)?;
    let removed = paths
        .iter()
        .filter(|path| match fs::remove_file(path) {
            Ok(()) => true,
            Err(err) => {
                warn!("delete: failed to remove {path}: {err}");
                false
            }
        })
        .count();
    Ok(removed.to_string())
}

fn remove_tree(path: &Path) -> io::Result<()> {
    if fs::symlink_metadata(path)?.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

fn delete_recursive_fn(call: &mut InstallCall<'_, '_>, args: &[Expr]) -> EvalResult {
    let paths = call.evaluate_args(args)?;
    let removed = paths
        .iter()
        .filter(|path| match remove_tree(Path::new(path)) {
            Ok(()) => true,
            Err(err) => {
                warn!("delete_recursive: failed to remove {path}: {err}");
                false
            }
        })
        .count();
    Ok(removed.to_string())
}

fn make_parents(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// `symlink(target, link...)`: replaces each link with a symlink to target.
fn symlink_fn(call: &mut InstallCall<'_, '_>, args: &[Expr]) -> EvalResult {
    let values = call.expect_min_args(args, 2)?;
    let target = &values[0];
    let mut failed = 0_usize;
    for link in &values[1..] {
        let link_path = Path::new(link);
        let result = match fs::remove_file(link_path) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
            _ => make_parents(link_path).and_then(|()| symlink(target, link_path)),
        };
        match result {
            Ok(()) => call.host().label(link_path, FileKind::Symlink),
            Err(err) => {
                warn!("symlink: failed to link {link} to {target}: {err}");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        let message = format!("{}: failed to create {failed} symlink(s)", call.name());
        return Err(call.abort_with_cause(CauseCode::SYMLINK_FAILURE, message));
    }
    Ok(String::new())
}

fn rename_fn(call: &mut InstallCall<'_, '_>, args: &[Expr]) -> EvalResult {
    let values = call.expect_args(args, 2)?;
    let (from, to) = (&values[0], &values[1]);
    if let Err(err) = make_parents(Path::new(to)).and_then(|()| fs::rename(from, to)) {
        let message = format!("{}(): failed to rename {from} to {to}: {err}", call.name());
        return Err(call.abort_with_cause(CauseCode::FILE_RENAME_FAILURE, message));
    }
    Ok(to.clone())
}

fn parse_id(call: &mut InstallCall<'_, '_>, value: &str, what: &str) -> Result<u32, Aborted> {
    value.trim().parse::<u32>().map_err(|_| {
        let message = format!("{}(): bad {what} \"{value}\"", call.name());
        call.abort_with_cause(CauseCode::ARGS_PARSING_FAILURE, message)
    })
}

fn change_owner(path: &Path, uid: u32, gid: u32) -> io::Result<()> {
    use std::os::unix::ffi::OsStrExt;

    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
    // SAFETY: c_path is a live NUL-terminated string.
    if unsafe { libc::lchown(c_path.as_ptr(), uid, gid) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// `set_perm(uid, gid, mode, path...)`.
fn set_perm_fn(call: &mut InstallCall<'_, '_>, args: &[Expr]) -> EvalResult {
    let values = call.expect_min_args(args, 4)?;
    let uid = parse_id(call, &values[0], "uid")?;
    let gid = parse_id(call, &values[1], "gid")?;
    let Ok(mode) = u32::from_str_radix(values[2].trim(), 8) else {
        let message = format!("{}(): bad mode \"{}\"", call.name(), values[2]);
        return Err(call.abort_with_cause(CauseCode::ARGS_PARSING_FAILURE, message));
    };

    let mut failed = 0_usize;
    for path in &values[3..] {
        let path = Path::new(path);
        let result = change_owner(path, uid, gid)
            .and_then(|()| fs::set_permissions(path, fs::Permissions::from_mode(mode)));
        if let Err(err) = result {
            warn!("set_perm: failed on {}: {err}", path.display());
            failed += 1;
        }
    }

    if failed > 0 {
        let message = format!("{}: some changes failed", call.name());
        return Err(call.abort_with_cause(CauseCode::SET_METADATA_FAILURE, message));
    }
    Ok(String::new())
}
