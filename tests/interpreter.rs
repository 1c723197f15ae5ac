//! End-to-end tests: compile a Lox snippet to a temp file, run it through the `rlox` binary, and
//! check stdout/exit code. Complements the per-module unit tests, which exercise the scanner,
//! compiler, and VM directly.

use std::fs;
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};

static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

fn run_source(source: &str) -> (String, String, i32) {
    let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
    let path = std::env::temp_dir().join(format!("rlox_test_{id}.lox"));
    fs::write(&path, source).expect("failed to write temp source file");

    let output = Command::new(env!("CARGO_BIN_EXE_rlox"))
        .arg(&path)
        .output()
        .expect("failed to run rlox binary");

    let _ = fs::remove_file(&path);

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let code = output.status.code().expect("process was not terminated by a signal");
    (stdout, stderr, code)
}

#[test]
fn arithmetic_precedence() {
    let (stdout, _, code) = run_source("print 1 + 2 * 3;");
    assert_eq!("7\n", stdout);
    assert_eq!(0, code);
}

#[test]
fn grouping_overrides_precedence() {
    let (stdout, _, code) = run_source("print (1 + 2) * 3;");
    assert_eq!("9\n", stdout);
    assert_eq!(0, code);
}

#[test]
fn comparison_and_logical_not() {
    let (stdout, _, code) = run_source("print !(5 - 4 > 3 * 2 == !nil);");
    assert_eq!("true\n", stdout);
    assert_eq!(0, code);
}

#[test]
fn string_concatenation() {
    let (stdout, _, code) = run_source(r#"print "st" + "ri" + "ng";"#);
    assert_eq!("string\n", stdout);
    assert_eq!(0, code);
}

#[test]
fn global_variables_compose() {
    let (stdout, _, code) = run_source(
        r#"var beverage = "cafe au lait"; var breakfast = "beignets with " + beverage; print breakfast;"#,
    );
    assert_eq!("beignets with cafe au lait\n", stdout);
    assert_eq!(0, code);
}

#[test]
fn negating_a_non_number_is_a_runtime_error() {
    let (_, stderr, code) = run_source("print -true;");
    assert!(stderr.contains("Operand must be a number."));
    assert_eq!(70, code);
}

#[test]
fn undefined_variable_is_a_runtime_error() {
    let (_, stderr, code) = run_source("print unknown;");
    assert!(stderr.contains("Undefined variable 'unknown'."));
    assert_eq!(70, code);
}

#[test]
fn missing_operand_is_a_compile_error() {
    let (_, stderr, code) = run_source("print 1 +");
    assert!(stderr.contains("[line 1] Error"));
    assert!(stderr.contains("Expect expression."));
    assert_eq!(65, code);
}

#[test]
fn unreadable_file_exits_74() {
    let output = Command::new(env!("CARGO_BIN_EXE_rlox"))
        .arg("/nonexistent/path/does-not-exist.lox")
        .output()
        .expect("failed to run rlox binary");

    assert_eq!(74, output.status.code().unwrap());
}

#[test]
fn repl_sees_earlier_definitions_in_later_lines() {
    use std::io::Write;

    let mut child = Command::new(env!("CARGO_BIN_EXE_rlox"))
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .spawn()
        .expect("failed to spawn rlox REPL");

    child
        .stdin
        .as_mut()
        .unwrap()
        .write_all(b"var a = 1;\nprint a;\nexit\n")
        .expect("failed to write to REPL stdin");

    let output = child.wait_with_output().expect("REPL did not exit");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains('1'));
    assert_eq!(0, output.status.code().unwrap());
}
