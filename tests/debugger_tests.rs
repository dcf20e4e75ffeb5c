//! VM and breakpoint tests driving the real `sophia8` binary, with programs
//! assembled by the real `s8asm`.

use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use predicates::str::{contains, diff};
use tempfile::TempDir;

fn s8asm() -> Command {
    Command::cargo_bin("s8asm").unwrap()
}

fn vm() -> Command {
    Command::cargo_bin("sophia8").unwrap()
}

fn write(dir: &TempDir, name: &str, text: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, text).unwrap();
    path
}

fn assemble(dir: &TempDir, name: &str, src: &str) {
    write(dir, name, src);
    let out = format!("{}.bin", name.trim_end_matches(".s8"));
    s8asm()
        .current_dir(dir.path())
        .args([name, "-o", &out])
        .assert()
        .success();
}

#[test]
fn runs_tty_program_from_raw_image() {
    let dir = TempDir::new().unwrap();
    assemble(
        &dir,
        "hi.s8",
        "\
.org 0x0003
SET #0x48, R0
STORE R0, 0xFF03
SET #0x69, R0
STORE R0, 0xFF03
SET #0x21, R0
STORE R0, 0xFF03
SET #0x0A, R0
STORE R0, 0xFF03
HALT
",
    );

    vm().current_dir(dir.path())
        .arg("hi.bin")
        .assert()
        .success()
        .stdout(diff("Hi!\n"));
}

#[test]
fn runs_program_via_debug_map() {
    let dir = TempDir::new().unwrap();
    assemble(
        &dir,
        "hi.s8",
        ".org 0x0003\nSET #0x58, R0\nSTORE R0, 0xFF03\nHALT\n",
    );

    vm().current_dir(dir.path())
        .arg("hi.deb")
        .assert()
        .success()
        .stdout(diff("X"));
}

#[test]
fn echoes_stdin_through_mmio() {
    let dir = TempDir::new().unwrap();
    // Echo keyboard bytes until the queue runs dry.
    assemble(
        &dir,
        "echo.s8",
        "\
.org 0x0003
loop:   LOAD 0xFF01, R0
        JZ R0, done
        STORE R0, 0xFF03
        JMP loop
done:   HALT
",
    );

    vm().current_dir(dir.path())
        .arg("echo.bin")
        .write_stdin("hi\n")
        .assert()
        .success()
        .stdout(diff("hi\n"));
}

#[test]
fn keyboard_status_reflects_availability() {
    let dir = TempDir::new().unwrap();
    // Print '1' if the status cell reports a byte waiting, else '0'.
    assemble(
        &dir,
        "status.s8",
        "\
.org 0x0003
LOAD 0xFF00, R0
ADD #0x30, R0
STORE R0, 0xFF03
HALT
",
    );

    vm().current_dir(dir.path())
        .arg("status.bin")
        .write_stdin("x")
        .assert()
        .success()
        .stdout(diff("1"));

    vm().current_dir(dir.path())
        .arg("status.bin")
        .assert()
        .success()
        .stdout(diff("0"));
}

const BREAK_SRC: &str = "\
.org 0x0800
.org
START:
    SET #0x58, R0
    STORE R0, 0xFF03
    HALT
";
// 1-based line of the STORE above.
const BREAK_LINE: &str = "5";

#[test]
fn breakpoint_stops_dumps_and_resumes() {
    let dir = TempDir::new().unwrap();
    assemble(&dir, "prog.s8", BREAK_SRC);

    // Stop on the STORE line: announcement but no program output yet.
    vm().current_dir(dir.path())
        .args(["prog.deb", "prog.s8", BREAK_LINE])
        .assert()
        .success()
        .stdout(contains("BREAK"))
        .stdout(contains("X").not());

    let snap = dir.path().join("debug.img");
    assert!(snap.exists(), "debug.img should be written on breakpoint");

    // Resuming from the snapshot executes the STORE.
    vm().current_dir(dir.path())
        .arg("debug.img")
        .assert()
        .success()
        .stdout(contains("X"));
}

#[test]
fn resume_can_arm_a_fresh_breakpoint() {
    let dir = TempDir::new().unwrap();
    assemble(&dir, "prog.s8", BREAK_SRC);

    vm().current_dir(dir.path())
        .args(["prog.deb", "prog.s8", "4"])
        .assert()
        .success()
        .stdout(contains("BREAK"));

    // Resume but break again further down, before the STORE runs.
    vm().current_dir(dir.path())
        .args(["debug.img", "prog.deb", "prog.s8", BREAK_LINE])
        .assert()
        .success()
        .stdout(contains("BREAK"))
        .stdout(contains("X").not());
}

#[test]
fn breakpoint_by_full_path_matches_records() {
    let dir = TempDir::new().unwrap();
    assemble(&dir, "prog.s8", BREAK_SRC);
    let full = dir.path().join("prog.s8").canonicalize().unwrap();

    vm().current_dir(dir.path())
        .args(["prog.deb", full.to_str().unwrap(), BREAK_LINE])
        .assert()
        .success()
        .stdout(contains("BREAK"));
}

#[test]
fn data_line_breakpoint_reports_no_code() {
    let dir = TempDir::new().unwrap();
    assemble(
        &dir,
        "prog.s8",
        ".org 0x0200\nmsg: .string \"A\"\n.org\nHALT\n",
    );

    vm().current_dir(dir.path())
        .args(["prog.deb", "prog.s8", "2"])
        .assert()
        .failure()
        .code(1)
        .stderr(contains("no executable code on this line"));
}

#[test]
fn unknown_breakpoint_reports_not_found() {
    let dir = TempDir::new().unwrap();
    assemble(&dir, "prog.s8", BREAK_SRC);

    vm().current_dir(dir.path())
        .args(["prog.deb", "prog.s8", "99"])
        .assert()
        .failure()
        .code(1)
        .stderr(contains("breakpoint not found"));
}

#[test]
fn self_test_prints_banner() {
    vm().assert()
        .success()
        .stdout(contains("Sophia8 self test OK"));
}

#[test]
fn raw_image_must_be_full_size() {
    let dir = TempDir::new().unwrap();
    write(&dir, "short.bin", "tiny");

    vm().current_dir(dir.path())
        .arg("short.bin")
        .assert()
        .failure()
        .code(1)
        .stderr(contains("0xFFFF"));
}

#[test]
fn breakpoint_args_require_a_map() {
    let dir = TempDir::new().unwrap();
    assemble(&dir, "prog.s8", BREAK_SRC);

    vm().current_dir(dir.path())
        .args(["prog.bin", "prog.s8", BREAK_LINE])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn partial_breakpoint_args_are_rejected() {
    let dir = TempDir::new().unwrap();
    assemble(&dir, "prog.s8", BREAK_SRC);

    vm().current_dir(dir.path())
        .args(["prog.deb", "prog.s8"])
        .assert()
        .failure()
        .code(2);

    vm().current_dir(dir.path())
        .args(["prog.deb", "prog.s8", "not_a_number"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn missing_program_file_fails() {
    let dir = TempDir::new().unwrap();
    vm().current_dir(dir.path())
        .arg("nope.bin")
        .assert()
        .failure()
        .code(1);
}
