use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::CommandFactory;
use clap_complete::Shell;
use otapack_package::SCRIPT_PATH;
use sha2::{Digest, Sha256};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use super::commands::*;
use super::render::*;
use super::{write_completions, Cli};

static TEST_DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

fn test_dir() -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let mut path = std::env::temp_dir();
    path.push(format!(
        "otapack-cli-tests-{}-{}-{}",
        std::process::id(),
        nanos,
        TEST_DIR_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    fs::create_dir_all(&path).expect("must create test dir");
    path
}

fn write_package(entries: &[(&str, &[u8])]) -> (PathBuf, Vec<u8>) {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .expect("must start entry");
        writer.write_all(content).expect("must write entry");
    }
    let bytes = writer.finish().expect("must finish zip").into_inner();
    let path = test_dir().join("update.zip");
    fs::write(&path, &bytes).expect("must write package");
    (path, bytes)
}

#[test]
fn cli_definition_is_consistent() {
    Cli::command().debug_assert();
}

#[test]
fn output_style_requires_terminal_and_color() {
    assert_eq!(output_style_for(true, false), OutputStyle::Rich);
    assert_eq!(output_style_for(true, true), OutputStyle::Plain);
    assert_eq!(output_style_for(false, false), OutputStyle::Plain);
}

#[test]
fn render_status_line_plain_is_unadorned() {
    assert_eq!(
        render_status_line(OutputStyle::Plain, "ok", "script parses"),
        "script parses"
    );
    assert_eq!(render_section_header(OutputStyle::Plain, "update.zip"), None);
}

#[test]
fn render_status_line_rich_includes_badges() {
    let ok = render_status_line(OutputStyle::Rich, "ok", "script parses");
    assert!(ok.contains("[OK]"), "{ok}");
    assert!(ok.contains('\u{1b}'), "{ok}");
    assert!(ok.ends_with(" script parses"), "{ok}");

    let warn = render_status_line(OutputStyle::Rich, "warn", "no labels");
    assert!(warn.contains("[WARN]"), "{warn}");
    let err = render_status_line(OutputStyle::Rich, "err", "bad script");
    assert!(err.contains("[ERR]"), "{err}");
}

#[test]
fn check_script_reports_functions() {
    let check = check_script(
        "ui_print(\"a\"); package_extract_file(x, \"/tmp/y\"); ui_print(b)",
        &stock_registry(),
    )
    .expect("must parse");
    assert_eq!(check.statements, 3);
    assert_eq!(check.functions, vec!["package_extract_file", "ui_print"]);

    let lines = format_check_lines(Path::new("s.edify"), &Ok(check), OutputStyle::Plain);
    assert_eq!(
        lines,
        vec![
            "s.edify: 3 statements, 2 distinct functions",
            "functions: package_extract_file, ui_print",
        ]
    );
}

#[test]
fn check_script_lists_parse_errors_with_positions() {
    let result = check_script("ui_print(a);\nmount(b)", &stock_registry());
    let lines = format_check_lines(Path::new("s.edify"), &result, OutputStyle::Plain);
    assert_eq!(
        lines,
        vec!["s.edify:2:1: unknown function \"mount\"", "1 parse errors"]
    );
}

#[test]
fn run_check_fails_on_bad_scripts() {
    let dir = test_dir();
    let good = dir.join("good.edify");
    fs::write(&good, "concat(a, b)").expect("must write script");
    run_check(&good, OutputStyle::Plain).expect("good script must pass");

    let bad = dir.join("bad.edify");
    fs::write(&bad, "nope()").expect("must write script");
    let err = run_check(&bad, OutputStyle::Plain).expect_err("bad script must fail");
    assert!(err.to_string().contains("1 parse errors"), "{err}");

    assert!(run_check(&dir.join("absent.edify"), OutputStyle::Plain).is_err());
}

#[test]
fn inspect_reports_package_and_script() {
    let (path, bytes) = write_package(&[
        (SCRIPT_PATH, b"ui_print(\"hi\"); set_progress(1)"),
        ("system/build.prop", b"ro.build.id=1\n"),
    ]);
    let report = inspect_package(&path).expect("must inspect");
    assert_eq!(report.size, bytes.len() as u64);
    assert_eq!(report.sha256, hex::encode(Sha256::digest(&bytes)));
    assert_eq!(report.entries, 2);
    let script = report.script.clone().expect("script must be present");
    assert!(script.parse_errors.is_empty());
    assert_eq!(script.functions, vec!["set_progress", "ui_print"]);

    let lines = format_inspect_lines(&report, OutputStyle::Plain);
    assert_eq!(lines[0], format!("size: {} bytes", bytes.len()));
    assert!(lines.iter().any(|line| line.contains("parses cleanly")));

    let json: serde_json::Value =
        serde_json::from_str(&serde_json::to_string(&report).expect("must serialize"))
            .expect("must be valid json");
    assert_eq!(json["entries"], 2);
    assert_eq!(json["script"]["functions"][1], "ui_print");
}

#[test]
fn inspect_handles_missing_and_broken_scripts() {
    let (path, _) = write_package(&[("payload.bin", b"data")]);
    let report = inspect_package(&path).expect("must inspect");
    assert_eq!(report.script, None);
    let lines = format_inspect_lines(&report, OutputStyle::Plain);
    assert!(lines.iter().any(|line| line.contains("missing")));

    let (path, _) = write_package(&[(SCRIPT_PATH, b"format(\"ext4\")")]);
    let report = inspect_package(&path).expect("must inspect");
    let script = report.script.expect("script must be present");
    assert_eq!(script.parse_errors.len(), 1);
}

#[test]
fn inspect_rejects_non_zip_files() {
    let path = test_dir().join("notes.txt");
    fs::write(&path, "plain text").expect("must write file");
    assert!(inspect_package(&path).is_err());
}

#[test]
fn function_listing_is_sorted_and_names_namespaces() {
    let lines = format_function_lines(&stock_registry());
    assert_eq!(lines.len(), 26);
    let mut sorted = lines.clone();
    sorted.sort();
    assert_eq!(lines, sorted);
    assert!(lines
        .iter()
        .any(|line| line.starts_with("ui_print ") && line.ends_with(" install")));
    assert!(lines
        .iter()
        .any(|line| line.starts_with("range_sha256 ") && line.ends_with(" blockimg")));
}

#[test]
fn completions_mention_the_binary() {
    let mut output = Vec::new();
    write_completions(Shell::Bash, &mut output).expect("must write completions");
    let script = String::from_utf8(output).expect("completions must be UTF-8");
    assert!(script.contains("otapack"));
}
