use std::fs;
use std::io::{self, Cursor, Write};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use otapack_core::{CauseCode, CommandChannel, ProtocolVersion};
use otapack_edify::{parse_script, run, ExecutionContext, FunctionRegistry, Outcome, BUILTIN_NAMESPACE};
use otapack_package::{ArchiveError, EntryInfo, PackageArchive, ZipPackage};
use sha2::{Digest, Sha256};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use super::install::prop_value;
use super::*;

static TEST_DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

fn test_dir() -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let mut path = std::env::temp_dir();
    path.push(format!(
        "otapack-install-tests-{}-{}-{}",
        std::process::id(),
        nanos,
        TEST_DIR_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    fs::create_dir_all(&path).expect("must create test dir");
    path
}

fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in entries {
        if name.ends_with('/') {
            writer
                .add_directory(*name, SimpleFileOptions::default())
                .expect("must add directory");
            continue;
        }
        writer
            .start_file(*name, SimpleFileOptions::default())
            .expect("must start entry");
        writer.write_all(content).expect("must write entry");
    }
    writer.finish().expect("must finish zip").into_inner()
}

struct ScriptRun {
    outcome: Outcome,
    cause: CauseCode,
    lines: Vec<String>,
}

fn run_with(source: &str, archive: &dyn PackageArchive, labels: Option<FileContexts>) -> ScriptRun {
    let registry = build_registry(&NoDeviceExtensions);
    let root = parse_script(source, &registry).expect("script must parse");
    let (channel, transcript) = CommandChannel::in_memory();
    let config = UpdaterConfig::new(channel, archive, ProtocolVersion::V3, &[]).with_labels(labels);
    let mut ctx = ExecutionContext::new(source, config);
    let outcome = run(&mut ctx, &registry, &root);
    ScriptRun {
        outcome,
        cause: ctx.cause_code,
        lines: transcript.lines(),
    }
}

fn run_script(source: &str) -> ScriptRun {
    let bytes = build_zip(&[("placeholder", b"")]);
    let archive = ZipPackage::new(&bytes).expect("must open zip");
    run_with(source, &archive, None)
}

fn quoted(path: &Path) -> String {
    format!("\"{}\"", path.display())
}

fn expect_success(result: &ScriptRun) -> &str {
    match &result.outcome {
        Outcome::Success(value) => value,
        Outcome::Failure(message) => panic!("script failed: {message}"),
    }
}

#[test]
fn stock_registry_covers_every_namespace() {
    let registry: FunctionRegistry<UpdaterConfig<'static>> = build_registry(&NoDeviceExtensions);
    assert_eq!(registry.len(), 26);
    assert_eq!(registry.namespace_of("concat"), Some(BUILTIN_NAMESPACE));
    assert_eq!(registry.namespace_of("delete"), Some(FS_NAMESPACE));
    assert_eq!(registry.namespace_of("ui_print"), Some(INSTALL_NAMESPACE));
    assert_eq!(registry.namespace_of("range_sha256"), Some(BLOCKIMG_NAMESPACE));
}

struct LoudExtensions;

fn loud_print(
    call: &mut otapack_edify::CallContext<'_, UpdaterConfig<'_>>,
    args: &[otapack_edify::Expr],
) -> otapack_edify::EvalResult {
    let message = call.evaluate_args(args)?.concat().to_uppercase();
    call.host().channel.ui_print(&message);
    Ok(message)
}

impl DeviceExtensions for LoudExtensions {
    fn namespace(&self) -> &str {
        "loud"
    }

    fn register<'p>(&self, registry: &mut FunctionRegistry<UpdaterConfig<'p>>) {
        registry.register(self.namespace(), "ui_print", loud_print);
    }
}

#[test]
fn device_extensions_shadow_stock_primitives() {
    let registry: FunctionRegistry<UpdaterConfig<'static>> = build_registry(&LoudExtensions);
    assert_eq!(registry.len(), 26);
    assert_eq!(registry.namespace_of("ui_print"), Some("loud"));

    let bytes = build_zip(&[("placeholder", b"")]);
    let archive = ZipPackage::new(&bytes).expect("must open zip");
    let registry = build_registry(&LoudExtensions);
    let source = "ui_print(hello)";
    let root = parse_script(source, &registry).expect("must parse");
    let (channel, transcript) = CommandChannel::in_memory();
    let config = UpdaterConfig::new(channel, &archive, ProtocolVersion::V3, &bytes);
    let mut ctx = ExecutionContext::new(source, config);
    assert_eq!(
        run(&mut ctx, &registry, &root),
        Outcome::Success("HELLO".to_string())
    );
    assert_eq!(transcript.lines(), vec!["ui_print HELLO"]);
}

#[test]
fn ui_print_concatenates_and_splits_lines() {
    let result = run_script(r#"ui_print("Installing ", "system"); ui_print("a\nb")"#);
    assert_eq!(expect_success(&result), "a\nb");
    assert_eq!(
        result.lines,
        vec!["ui_print Installing system", "ui_print a", "ui_print b"]
    );
}

#[test]
fn progress_commands_reach_the_channel() {
    let result = run_script("show_progress(0.5, 10); set_progress(0.25); wipe_cache()");
    assert_eq!(expect_success(&result), "t");
    assert_eq!(
        result.lines,
        vec!["progress 0.500000 10", "set_progress 0.250000", "wipe_cache"]
    );
}

#[test]
fn bad_progress_arguments_abort_with_args_cause() {
    let result = run_script("show_progress(half, 10)");
    assert!(matches!(result.outcome, Outcome::Failure(_)));
    assert_eq!(result.cause, CauseCode::ARGS_PARSING_FAILURE);

    let result = run_script("set_progress()");
    assert_eq!(
        result.outcome,
        Outcome::Failure("set_progress() expects 1 arguments, got 0".to_string())
    );
}

#[test]
fn package_extract_file_writes_entry_to_disk() {
    let bytes = build_zip(&[("firmware/radio.img", b"radio image contents")]);
    let archive = ZipPackage::new(&bytes).expect("must open zip");
    let dest = test_dir().join("radio.img");
    let source = format!("package_extract_file(\"firmware/radio.img\", {})", quoted(&dest));

    let result = run_with(&source, &archive, None);
    assert_eq!(expect_success(&result), "t");
    assert_eq!(
        fs::read(&dest).expect("must read extracted file"),
        b"radio image contents"
    );
}

#[test]
fn package_extract_file_with_one_argument_returns_contents() {
    let bytes = build_zip(&[("build.prop", b"ro.product.device=generic\n")]);
    let archive = ZipPackage::new(&bytes).expect("must open zip");
    let result = run_with(r#"package_extract_file("build.prop")"#, &archive, None);
    assert_eq!(expect_success(&result), "ro.product.device=generic\n");
}

#[test]
fn package_extract_file_failures_carry_causes() {
    let bytes = build_zip(&[("present", b"x")]);
    let archive = ZipPackage::new(&bytes).expect("must open zip");
    let dir = test_dir();

    let source = format!("package_extract_file(absent, {})", quoted(&dir.join("out")));
    let result = run_with(&source, &archive, None);
    assert_eq!(result.cause, CauseCode::PACKAGE_EXTRACT_FILE_FAILURE);

    let source = format!(
        "package_extract_file(present, {})",
        quoted(&dir.join("missing-dir").join("out"))
    );
    let result = run_with(&source, &archive, None);
    assert_eq!(result.cause, CauseCode::FILE_OPEN_FAILURE);
}

struct BrokenWriteArchive {
    errno: i32,
}

impl PackageArchive for BrokenWriteArchive {
    fn find_entry(&self, name: &str) -> Result<EntryInfo, ArchiveError> {
        Ok(EntryInfo {
            name: name.to_string(),
            uncompressed_length: 1,
        })
    }

    fn extract_to_memory(&self, _name: &str) -> Result<Vec<u8>, ArchiveError> {
        Ok(vec![b'x'])
    }

    fn extract_to_writer(&self, _name: &str, _writer: &mut dyn Write) -> Result<u64, ArchiveError> {
        Err(ArchiveError::Write(io::Error::from_raw_os_error(self.errno)))
    }

    fn entry_names(&self) -> Vec<String> {
        Vec::new()
    }
}

#[test]
fn write_errors_during_extraction_map_to_causes() {
    let dest = test_dir().join("system.img");
    let source = format!("package_extract_file(system.img, {})", quoted(&dest));

    let result = run_with(&source, &BrokenWriteArchive { errno: libc::EIO }, None);
    assert_eq!(result.cause, CauseCode::EIO_FAILURE);

    let result = run_with(&source, &BrokenWriteArchive { errno: libc::ENOSPC }, None);
    assert_eq!(result.cause, CauseCode::PACKAGE_EXTRACT_FILE_FAILURE);
}

#[test]
fn package_extract_dir_copies_matching_subtree() {
    let bytes = build_zip(&[
        ("system/", b""),
        ("system/bin/tool", b"#!/bin/sh\n"),
        ("system/etc/empty/", b""),
        ("system/etc/hosts", b"127.0.0.1 localhost\n"),
        ("systemic/file", b"not under system/"),
        ("vendor/lib/libx.so", b"elf"),
    ]);
    let archive = ZipPackage::new(&bytes).expect("must open zip");
    let dest = test_dir().join("mnt");
    let source = format!("package_extract_dir(system, {})", quoted(&dest));

    let result = run_with(&source, &archive, None);
    assert_eq!(expect_success(&result), "t");
    assert_eq!(
        fs::read_to_string(dest.join("bin/tool")).expect("must read tool"),
        "#!/bin/sh\n"
    );
    assert!(dest.join("etc/hosts").is_file());
    assert!(dest.join("etc/empty").is_dir());
    assert!(!dest.join("file").exists());
    assert!(!dest.join("lib").exists());
}

#[test]
fn file_helpers_read_write_and_getprop() {
    let dir = test_dir();
    let props = dir.join("build.prop");
    fs::write(
        &props,
        "# generated\nro.build.id = ABC123\nro.product.name=generic\n\nbroken line\n",
    )
    .expect("must write props");

    let source = format!(
        "file_getprop({p}, \"ro.build.id\") + \"|\" + file_getprop({p}, \"ro.missing\")",
        p = quoted(&props)
    );
    assert_eq!(expect_success(&run_script(&source)), "ABC123|");

    let value_path = dir.join("value");
    let source = format!(
        "write_value(\"1\", {v}) && read_file({v})",
        v = quoted(&value_path)
    );
    assert_eq!(expect_success(&run_script(&source)), "t");
    assert_eq!(fs::read_to_string(&value_path).expect("must read value"), "1");

    let source = format!("write_value(x, {})", quoted(&dir.join("no/such/dir")));
    assert_eq!(expect_success(&run_script(&source)), "");

    let source = format!("read_file({})", quoted(&dir.join("absent")));
    assert_eq!(run_script(&source).cause, CauseCode::FREAD_FAILURE);

    let source = format!("file_getprop({}, key)", quoted(&dir.join("absent")));
    assert_eq!(run_script(&source).cause, CauseCode::FILE_GETPROP_FAILURE);
}

#[test]
fn prop_lookup_skips_comments_and_trims() {
    let text = "#ro.a=commented\n ro.a = first \nro.a=second\n";
    assert_eq!(prop_value(text, "ro.a"), Some("first"));
    assert_eq!(prop_value(text, "ro.b"), None);
}

#[test]
fn sha256_check_matches_candidates() {
    let abc = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";
    assert_eq!(expect_success(&run_script("sha256_check(abc)")), abc);

    let source = format!("sha256_check(abc, deadbeef, \"{}\")", abc.to_uppercase());
    assert_eq!(expect_success(&run_script(&source)), abc.to_uppercase());

    assert_eq!(expect_success(&run_script("sha256_check(abc, deadbeef)")), "");
}

#[test]
fn run_program_returns_exit_status() {
    assert_eq!(
        expect_success(&run_script(r#"run_program("/bin/sh", "-c", "exit 3")"#)),
        "3"
    );
    assert_eq!(expect_success(&run_script(r#"run_program("/bin/sh", "-c", "true")"#)), "0");

    let result = run_script(r#"run_program("/nonexistent/program")"#);
    assert!(matches!(result.outcome, Outcome::Failure(_)));
}

#[test]
fn delete_functions_count_removed_paths() {
    let dir = test_dir();
    let first = dir.join("first");
    let second = dir.join("second");
    fs::write(&first, "1").expect("must write");
    fs::write(&second, "2").expect("must write");
    let tree = dir.join("tree");
    fs::create_dir_all(tree.join("nested")).expect("must create tree");
    fs::write(tree.join("nested/file"), "x").expect("must write");

    let source = format!(
        "delete({}, {}, {})",
        quoted(&first),
        quoted(&second),
        quoted(&dir.join("absent"))
    );
    assert_eq!(expect_success(&run_script(&source)), "2");
    assert!(!first.exists());

    let source = format!("delete_recursive({})", quoted(&tree));
    assert_eq!(expect_success(&run_script(&source)), "1");
    assert!(!tree.exists());
}

#[test]
fn symlink_replaces_existing_links() {
    let dir = test_dir();
    let link = dir.join("bin/sh");
    fs::create_dir_all(dir.join("bin")).expect("must create bin");
    fs::write(&link, "old").expect("must write placeholder");

    let source = format!("symlink(\"/system/bin/toybox\", {})", quoted(&link));
    assert_eq!(expect_success(&run_script(&source)), "");
    assert_eq!(
        fs::read_link(&link).expect("must be a symlink"),
        PathBuf::from("/system/bin/toybox")
    );

    let fresh = dir.join("new/dir/link");
    let source = format!("symlink(target, {})", quoted(&fresh));
    expect_success(&run_script(&source));
    assert!(fs::symlink_metadata(&fresh).expect("must exist").file_type().is_symlink());

    let source = format!("symlink(target, {})", quoted(&dir.join("bin")));
    assert_eq!(run_script(&source).cause, CauseCode::SYMLINK_FAILURE);
}

#[test]
fn rename_moves_files_and_reports_failures() {
    let dir = test_dir();
    let from = dir.join("from");
    fs::write(&from, "payload").expect("must write");
    let to = dir.join("sub/to");

    let source = format!("rename({}, {})", quoted(&from), quoted(&to));
    assert_eq!(expect_success(&run_script(&source)), to.display().to_string());
    assert_eq!(fs::read_to_string(&to).expect("must read"), "payload");

    let source = format!("rename({}, {})", quoted(&from), quoted(&to));
    assert_eq!(run_script(&source).cause, CauseCode::FILE_RENAME_FAILURE);
}

#[test]
fn set_perm_changes_mode() {
    let dir = test_dir();
    let file = dir.join("file");
    fs::write(&file, "x").expect("must write");
    let metadata = fs::metadata(&file).expect("must stat");

    let source = format!(
        "set_perm({}, {}, 0640, {})",
        metadata.uid(),
        metadata.gid(),
        quoted(&file)
    );
    expect_success(&run_script(&source));
    let mode = fs::metadata(&file).expect("must stat").permissions().mode();
    assert_eq!(mode & 0o777, 0o640);

    let source = format!("set_perm(0, 0, 0999, {})", quoted(&file));
    assert_eq!(run_script(&source).cause, CauseCode::ARGS_PARSING_FAILURE);

    let source = format!(
        "set_perm({}, {}, 0644, {})",
        metadata.uid(),
        metadata.gid(),
        quoted(&dir.join("absent"))
    );
    assert_eq!(run_script(&source).cause, CauseCode::SET_METADATA_FAILURE);
}

#[test]
fn range_sets_parse_count_prefixed_pairs() {
    let ranges = RangeSet::parse("4,0,2,10,11").expect("must parse");
    assert_eq!(ranges.ranges(), &[(0, 2), (10, 11)]);
    assert_eq!(ranges.blocks(), 3);

    for bad in ["", "2,1", "3,0,1,2", "2,5,5", "2,a,b", "0"] {
        assert!(RangeSet::parse(bad).is_err(), "{bad} must be rejected");
    }
}

#[test]
fn range_sha256_hashes_selected_blocks() {
    let dir = test_dir();
    let image = dir.join("system.img");
    let block = BLOCK_SIZE as usize;
    let mut contents = vec![0_u8; block * 4];
    for (index, chunk) in contents.chunks_mut(block).enumerate() {
        chunk.fill(index as u8 + 1);
    }
    fs::write(&image, &contents).expect("must write image");

    let expected = hex::encode(Sha256::digest(&contents[block..block * 3]));
    let source = format!("range_sha256({}, \"2,1,3\")", quoted(&image));
    assert_eq!(expect_success(&run_script(&source)), expected);

    let source = format!("range_sha256({}, \"2,3,9\")", quoted(&image));
    assert_eq!(run_script(&source).cause, CauseCode::FREAD_FAILURE);

    let source = format!("range_sha256({}, \"1,3\")", quoted(&image));
    assert_eq!(run_script(&source).cause, CauseCode::ARGS_PARSING_FAILURE);

    let source = format!("range_sha256({}, \"2,0,1\")", quoted(&dir.join("absent")));
    assert_eq!(run_script(&source).cause, CauseCode::FILE_OPEN_FAILURE);
}

const SAMPLE_CONTEXTS: &str = "\
# system partition
/system(/.*)?              u:object_r:system_file:s0
/system/bin(/.*)?     --   u:object_r:system_exec:s0
/system/bin           -d   u:object_r:system_bin_dir:s0
/data/.*                   <<none>>
";

#[test]
fn file_contexts_last_matching_rule_wins() {
    let contexts = FileContexts::parse("file_contexts", SAMPLE_CONTEXTS).expect("must parse");
    assert_eq!(contexts.len(), 4);
    assert_eq!(
        contexts.lookup("/system/bin/sh", FileKind::Regular),
        Some("u:object_r:system_exec:s0")
    );
    assert_eq!(
        contexts.lookup("/system/bin/sh", FileKind::Symlink),
        Some("u:object_r:system_file:s0")
    );
    assert_eq!(
        contexts.lookup("/system/bin", FileKind::Directory),
        Some("u:object_r:system_bin_dir:s0")
    );
    assert_eq!(contexts.lookup("/system2", FileKind::Regular), None);
    assert_eq!(contexts.lookup("/data/local", FileKind::Regular), None);
}

#[test]
fn file_contexts_reject_malformed_rules() {
    let err = FileContexts::parse("fc", "/ok u:r:x:s0\n/bad -x u:r:x:s0\n").expect_err("must fail");
    let LabelError::InvalidRule { line, message, .. } = err else {
        panic!("expected invalid rule");
    };
    assert_eq!(line, 2);
    assert!(message.contains("-x"), "{message}");

    assert!(FileContexts::parse("fc", "/(unclosed u:r:x:s0\n").is_err());
    assert!(FileContexts::parse("fc", "/lonely\n").is_err());
}

#[test]
fn file_contexts_load_skips_missing_files() {
    let dir = test_dir();
    let present = dir.join("plat_file_contexts");
    fs::write(&present, SAMPLE_CONTEXTS).expect("must write contexts");

    let contexts = FileContexts::load(&[dir.join("absent"), present.clone()]).expect("must load");
    assert_eq!(contexts.sources(), &[present]);

    let err = FileContexts::load(&[dir.join("absent")]).expect_err("must fail");
    assert!(matches!(err, LabelError::NotFound { .. }));
}

#[test]
fn labeling_failures_do_not_fail_primitives() {
    let bytes = build_zip(&[("app.apk", b"apk")]);
    let archive = ZipPackage::new(&bytes).expect("must open zip");
    let dest = test_dir().join("app.apk");
    let labels = FileContexts::parse("fc", ".* u:object_r:unlabeled_test:s0\n").expect("must parse");

    let source = format!("package_extract_file(\"app.apk\", {})", quoted(&dest));
    let result = run_with(&source, &archive, Some(labels));
    assert_eq!(expect_success(&result), "t");
    assert!(dest.is_file());
}
