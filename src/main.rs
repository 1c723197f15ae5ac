//! The `rlox` CLI: run a Lox source file, or start a REPL when given no arguments.

use std::io::{self, Write};
use std::process::ExitCode;

use rlox::error::InterpretationError;
use rlox::vm::VM;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    match args.as_slice() {
        [_] => repl(),
        [_, path] => run_file(path),
        _ => {
            eprintln!("Usage: rlox [path]");
            ExitCode::from(64)
        }
    }
}

/// Read lines from stdin, interpreting each one against a persistent [VM]. Exits when the
/// literal line `exit` is read, or at end-of-input.
fn repl() -> ExitCode {
    let mut vm = VM::default();
    let stdin = io::stdin();

    loop {
        print!("> ");
        io::stdout().flush().expect("could not flush stdout");

        let mut line = String::new();
        let bytes_read = stdin.read_line(&mut line).expect("could not read stdin");
        if bytes_read == 0 {
            // EOF (e.g. Ctrl-D).
            println!();
            break;
        }

        let line = line.trim_end_matches('\n');
        if line == "exit" {
            break;
        }

        // REPL errors are reported to stderr by the compiler/VM; the loop just keeps going.
        let _ = vm.interpret(line);
    }

    ExitCode::SUCCESS
}

/// Read `path`, interpret it once, and exit: 0 on success, 65 on a compile error, 70 on a
/// runtime error, 74 if the file can't be read.
fn run_file(path: &str) -> ExitCode {
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("Could not open file \"{path}\": {err}");
            return ExitCode::from(74);
        }
    };

    let mut vm = VM::default();
    match vm.interpret(&source) {
        Ok(()) => ExitCode::SUCCESS,
        Err(InterpretationError::CompileError) => ExitCode::from(65),
        Err(InterpretationError::RuntimeError) => ExitCode::from(70),
    }
}
