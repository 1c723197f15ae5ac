//! The bytecode virtual machine.

use crate::compiler;
use crate::gc::Gc;
use crate::prelude::*;
use crate::table::Table;

/// The fixed capacity of the operand stack. The grammar this compiler accepts has no function
/// calls or recursion, so well-formed bytecode compiled from it can never need more than this;
/// overflowing it is an internal invariant violation, not a recoverable runtime error.
const STACK_MAX: usize = 256;

/// Maintains state for the Lox virtual machine: the operand stack, the globals table, and the
/// string intern pool. Globals and the intern pool persist across calls to [VM::interpret], which
/// is what gives the REPL its "later lines see earlier definitions" behavior.
#[derive(Default)]
pub struct VM {
    stack: Vec<Value>,
    globals: Table,
    gc: Gc,
}

/// A VM with an active chunk and instruction pointer, borrowed for the duration of one run.
struct Execution<'a> {
    ip: usize,
    chunk: &'a Chunk,
    stack: &'a mut Vec<Value>,
    globals: &'a mut Table,
    gc: &'a mut Gc,
}

impl VM {
    /// Interpret some Lox source code.
    ///
    /// Compiles `source` into a fresh [Chunk] (against this VM's globals and intern pool), then
    /// runs it. The stack is reset before returning, whether or not an error occurred.
    pub fn interpret(&mut self, source: &str) -> crate::Result<()> {
        let chunk = compiler::compile(source, &mut self.gc)?;

        self.stack.clear();
        let mut execution = Execution {
            ip: 0,
            chunk: &chunk,
            stack: &mut self.stack,
            globals: &mut self.globals,
            gc: &mut self.gc,
        };
        let result = execution.run();
        self.stack.clear();
        result
    }
}

impl<'a> Execution<'a> {
    /// The main fetch-decode-execute loop.
    fn run(&mut self) -> crate::Result<()> {
        use OpCode::*;

        loop {
            if cfg!(feature = "trace_execution") {
                use crate::debug::disassemble_instruction;

                print!("        ");
                for value in self.stack.iter() {
                    print!("[ {value:?} ]");
                }
                println!();

                disassemble_instruction(self.chunk, self.ip);
            }

            let opcode = match self.read_opcode() {
                Some(opcode) => opcode,
                None => panic!("fetched invalid opcode at offset {}", self.ip - 1),
            };

            match opcode {
                ConstantLong => {
                    let index = self.read_u24();
                    let constant = self
                        .chunk
                        .constant(index)
                        .cloned()
                        .expect("constant index out of bounds");
                    self.push(constant);
                }
                Nil => self.push(Value::Nil),
                True => self.push(true.into()),
                False => self.push(false.into()),
                Pop => {
                    self.pop();
                }
                Print => {
                    let value = self.pop();
                    println!("{value}");
                }
                DefineGlobal => {
                    let index = self.read_u24();
                    let name = self.global_name(index);
                    let value = self.pop();
                    self.globals.set(name, value);
                }
                GetGlobal => {
                    let index = self.read_u24();
                    let name = self.global_name(index);
                    let (value, found) = self.globals.get(&name);
                    if !found {
                        return self.runtime_error(&format!("Undefined variable '{}'.", name.as_str()));
                    }
                    self.push(value.expect("found implies a value is present"));
                }
                Equal => {
                    let rhs = self.pop();
                    let lhs = self.pop();
                    self.push((lhs == rhs).into());
                }
                Greater => self.numeric_binary_op(|a, b| a > b)?,
                Less => self.numeric_binary_op(|a, b| a < b)?,
                Add => self.add()?,
                Subtract => self.numeric_binary_op(|a, b| a - b)?,
                Multiply => self.numeric_binary_op(|a, b| a * b)?,
                Divide => self.numeric_binary_op(|a, b| a / b)?,
                Not => {
                    let value = self.pop();
                    self.push(value.is_falsy().into());
                }
                Negate => {
                    if self.peek(0).is_number() {
                        let number = self.pop().as_number().unwrap();
                        self.push((-number).into());
                    } else {
                        return self.runtime_error("Operand must be a number.");
                    }
                }
                Return => {
                    debug_assert!(
                        self.stack.is_empty(),
                        "stack must be balanced before RETURN, found {} value(s)",
                        self.stack.len()
                    );
                    return Ok(());
                }
            }
        }
    }

    /// `ADD` overloads on its operand types: string ++ string concatenates (allocating and
    /// interning the result); otherwise both operands must be numbers.
    fn add(&mut self) -> crate::Result<()> {
        if self.peek(0).is_obj_string() && self.peek(1).is_obj_string() {
            let rhs = self.pop();
            let lhs = self.pop();
            let a = lhs.as_obj().unwrap().as_str();
            let b = rhs.as_obj().unwrap().as_str();
            let result = self.gc.concatenate(a, b);
            self.push(Value::Obj(result));
            return Ok(());
        }

        self.numeric_binary_op(|a, b| a + b)
    }

    /// Resolve a `DEFINE_GLOBAL`/`GET_GLOBAL` operand (a constant-pool index holding the
    /// variable's name) into the interned [Obj] to key the globals table with.
    fn global_name(&self, constant_index: usize) -> crate::value::Obj {
        match self.chunk.constant(constant_index) {
            Some(Value::Obj(obj)) => obj.clone(),
            _ => panic!("DEFINE_GLOBAL/GET_GLOBAL constant must be a string"),
        }
    }

    fn runtime_error<T>(&mut self, message: &str) -> crate::Result<T> {
        eprintln!("{message}");

        let line = self.chunk.get_line(self.ip - 1);
        eprintln!("[line {line}] in script");

        self.stack.clear();

        Err(InterpretationError::RuntimeError)
    }

    /// Pops two operands to perform a binary operation that requires both to be numbers.
    fn numeric_binary_op<F, T>(&mut self, op: F) -> crate::Result<()>
    where
        F: Fn(f64, f64) -> T,
        T: Into<Value>,
    {
        if !self.peek(0).is_number() || !self.peek(1).is_number() {
            return self.runtime_error("Operands must be numbers.");
        }

        let rhs = self.pop().as_number().unwrap();
        let lhs = self.pop().as_number().unwrap();
        self.push(op(lhs, rhs).into());
        Ok(())
    }

    /// Fetches the next byte in the chunk, advancing the instruction pointer.
    fn read_byte(&mut self) -> Option<u8> {
        let byte = self.chunk.byte_at(self.ip);
        self.ip += 1;
        byte
    }

    fn read_opcode(&mut self) -> Option<OpCode> {
        self.read_byte().and_then(|b| OpCode::try_from(b).ok())
    }

    /// Reads a u24 operand (3 bytes, big-endian), advancing the instruction pointer past it.
    fn read_u24(&mut self) -> usize {
        let index = self.chunk.read_u24(self.ip);
        self.ip += 3;
        index
    }

    /// Pushes a [Value] on to the value stack.
    ///
    /// # Panics
    ///
    /// Panics if the stack would exceed [STACK_MAX]. Well-formed bytecode compiled from this
    /// grammar (no function calls, no recursion) can never reach this limit; hitting it means
    /// the compiler emitted something it shouldn't have.
    fn push(&mut self, value: Value) {
        assert!(self.stack.len() < STACK_MAX, "stack overflow");
        self.stack.push(value);
    }

    /// Pops and returns the top [Value] on the value stack.
    ///
    /// # Panics
    ///
    /// Panics when the value stack is empty. Well-formed Lox bytecode never pops an empty stack.
    #[inline(always)]
    fn pop(&mut self) -> Value {
        self.stack.pop().expect("value stack is empty")
    }

    /// Peeks at the value `distance` slots from the top of the stack, without popping.
    #[inline(always)]
    fn peek(&self, distance: usize) -> &Value {
        self.stack
            .get(self.stack.len() - 1 - distance)
            .expect("peeked past the bottom of the stack")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn run(source: &str) -> crate::Result<()> {
        VM::default().interpret(source)
    }

    #[test]
    fn arithmetic_precedence() {
        assert!(run("print 1 + 2 * 3;").is_ok());
    }

    #[test]
    fn string_concatenation() {
        assert!(run("print \"st\" + \"ri\" + \"ng\";").is_ok());
    }

    #[test]
    fn negating_a_non_number_is_a_runtime_error() {
        assert!(matches!(run("print -true;"), Err(InterpretationError::RuntimeError)));
    }

    #[test]
    fn undefined_variable_is_a_runtime_error() {
        assert!(matches!(run("print unknown;"), Err(InterpretationError::RuntimeError)));
    }

    #[test]
    fn globals_persist_across_interpret_calls() {
        let mut vm = VM::default();
        assert!(vm.interpret("var a = 1;").is_ok());
        assert!(vm.interpret("print a;").is_ok());
    }

    #[test]
    fn stack_is_reset_after_a_runtime_error() {
        let mut vm = VM::default();
        assert!(vm.interpret("print 1 + true;").is_err());
        assert!(vm.stack.is_empty());
    }

    #[test]
    fn adding_non_numbers_and_non_strings_is_a_runtime_error() {
        assert!(matches!(run("print true + false;"), Err(InterpretationError::RuntimeError)));
    }
}
