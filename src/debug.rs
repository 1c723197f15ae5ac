//! Helpers to print debug representations of a [Chunk]'s bytecode.
//!
//! Nothing in here participates in compiling or running Lox: it's purely an observability aid,
//! wired up behind the `trace_execution` (per-instruction stack trace during `vm::run`) and
//! `print_code` (dump a chunk right after it's compiled) Cargo features, both off by default.

use crate::chunk::{Chunk, OpCode};

/// Given a chunk, prints its disassembly to `stdout`.
pub fn disassemble_chunk(c: &Chunk, name: &str) {
    println!("== {name} ==");

    let mut offset = 0;
    while offset < c.len() {
        offset = disassemble_instruction(c, offset);
    }
}

/// Print one instruction from the [Chunk] to `stdout`, taking into account its operands.
pub fn disassemble_instruction(c: &Chunk, offset: usize) -> usize {
    print!("{offset:04} ");

    if offset > 0 && at_same_line_as_previous_offset(c, offset) {
        print!("   | ");
    } else {
        print!("{:4} ", c.get_line(offset));
    }

    let instruction = match c.opcode_at(offset) {
        Some(op) => op,
        None => {
            println!("Unknown opcode {:?}", c.byte_at(offset));
            return offset + 1;
        }
    };

    use OpCode::*;
    match instruction {
        ConstantLong => constant_instruction("OP_CONSTANT_LONG", c, offset),
        DefineGlobal => constant_instruction("OP_DEFINE_GLOBAL", c, offset),
        GetGlobal => constant_instruction("OP_GET_GLOBAL", c, offset),
        Nil => simple_instruction("OP_NIL", offset),
        True => simple_instruction("OP_TRUE", offset),
        False => simple_instruction("OP_FALSE", offset),
        Pop => simple_instruction("OP_POP", offset),
        Print => simple_instruction("OP_PRINT", offset),
        Equal => simple_instruction("OP_EQUAL", offset),
        Greater => simple_instruction("OP_GREATER", offset),
        Less => simple_instruction("OP_LESS", offset),
        Add => simple_instruction("OP_ADD", offset),
        Subtract => simple_instruction("OP_SUBTRACT", offset),
        Multiply => simple_instruction("OP_MULTIPLY", offset),
        Divide => simple_instruction("OP_DIVIDE", offset),
        Negate => simple_instruction("OP_NEGATE", offset),
        Not => simple_instruction("OP_NOT", offset),
        Return => simple_instruction("OP_RETURN", offset),
    }
}

/////////////////////////////////////// Instruction printers ///////////////////////////////////////

fn simple_instruction(name: &str, offset: usize) -> usize {
    println!("{name:>16}");
    offset + 1
}

/// Prints a u24-operand instruction that addresses the constant pool (`OP_CONSTANT_LONG`,
/// `OP_DEFINE_GLOBAL`, `OP_GET_GLOBAL`). Advances the offset past the opcode and its 3-byte
/// operand.
fn constant_instruction(name: &str, chunk: &Chunk, offset: usize) -> usize {
    let index = chunk.read_u24(offset + 1);
    let value = chunk.constant(index);

    match value {
        Some(value) => println!("{name:>16} {index:4} '{value:?}'"),
        None => println!("{name:>16} {index:4} <invalid constant>"),
    }

    offset + 4
}

//////////////////////////////////////////// Utilities ////////////////////////////////////////////

/// Returns true if the given offset is at the same line number as the previous byte.
fn at_same_line_as_previous_offset(chunk: &Chunk, offset: usize) -> bool {
    assert!(offset > 0);
    chunk.get_line(offset) == chunk.get_line(offset - 1)
}
