//! Contains the Lox parser and single-pass bytecode compiler.
//!
//! There is no intermediate AST: every prefix/infix handler below emits bytecode directly into
//! the [Chunk] being built as it recognizes grammar productions. This is the classic Pratt
//! precedence-climbing design -- see [Compiler::parse_precedence] for the core loop.

use std::sync::OnceLock;

use enum_map::{enum_map, EnumMap};

use crate::gc::Gc;
use crate::prelude::*;
use crate::value::Obj;

/////////////////////////////////////////// Public API ////////////////////////////////////////////

/// Compiles the given Lox source code and, if successful, returns one bytecode [Chunk].
///
/// `gc` is threaded in (rather than reached for as global state) so that string literals this
/// compile produces are interned into the same pool the VM's globals table will later look
/// names up in.
pub fn compile(source: &str, gc: &mut Gc) -> crate::Result<Chunk> {
    let parser = Parser::new(source);
    let compiler = Compiler::new(parser, gc);
    compiler.compile()
}

///////////////////////////////////// Implementation details //////////////////////////////////////

/// Contains the compiler state: the [Parser] driving it, the chunk it's emitting into, and the
/// intern pool string literals get allocated from.
struct Compiler<'a> {
    parser: Parser<'a>,
    compiling_chunk: Chunk,
    gc: &'a mut Gc,
}

/// Contains the parser state. For some strange reason, this also includes error status.
#[derive(Debug)]
struct Parser<'a> {
    scanner: Scanner<'a>,
    current: Lexeme<'a>,
    previous: Lexeme<'a>,
    had_error: bool,
    panic_mode: bool,
}

/// A rule in the Pratt parser table. See [Compiler::parse_precedence] for usage.
#[derive(Copy, Clone)]
struct ParserRule {
    prefix: Option<ParserFn>,
    infix: Option<ParserFn>,
    precedence: Precedence,
}

/// Any possible action taken from the parsing table. Actions take the entire compiler state, and
/// convert it, usually by emitting bytecode.
type ParserFn = fn(&mut Compiler);

/// Precedence rules for [Token]s in Lox.
///
/// Precedence rules have a well-defined total ordering ([PartialOrd]/[Ord]), which is required
/// for use in the Pratt parsing algorithm.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Eq, Ord)]
enum Precedence {
    None,
    /// `=`
    Assignment,
    /// `or`
    Or,
    /// `and`
    And,
    /// `==` `!=`
    Equality,
    /// `<` `>` `<=` `>=`
    Comparison,
    /// `+` `-`
    Term,
    /// `*` `/`
    Factor,
    /// `!` `-`
    Unary,
    /// `.` `()`
    Call,
    /// Literals, and groupings
    Primary,
}

///////////////////////////////////////// Implementations /////////////////////////////////////////

impl Precedence {
    /// Returns the next higher level of precedence.
    ///
    /// # Panics
    ///
    /// Panics if trying to obtain a higher level of precedence than the maximum,
    /// [Precedence::Primary].
    #[inline]
    fn higher_precedence(self) -> Precedence {
        use Precedence::*;
        match self {
            None => Assignment,
            Assignment => Or,
            Or => And,
            And => Equality,
            Equality => Comparison,
            Comparison => Term,
            Term => Factor,
            Factor => Unary,
            Unary => Call,
            Call => Primary,
            Primary => panic!("Tried to get higher precedence than primary"),
        }
    }
}

impl ParserRule {
    /// One level of precedence higher than this rule's own precedence.
    /// See [Precedence::higher_precedence].
    #[inline(always)]
    fn higher_precedence(&self) -> Precedence {
        self.precedence.higher_precedence()
    }
}

impl<'a> Parser<'a> {
    /// Creates a new parser for the given source code. Neither `previous` nor `current` holds a
    /// real token yet -- [Compiler::compile]'s first [Parser::advance] call does that, mirroring
    /// how the single-pass compiler primes its two-token lookahead before parsing anything.
    fn new(source: &'a str) -> Parser<'a> {
        let scanner = Scanner::new(source);
        let sentinel = scanner.make_sentinel("<before first token>");

        Parser {
            scanner,
            previous: sentinel,
            current: sentinel,
            had_error: false,
            panic_mode: false,
        }
    }

    /// Update self.previous and self.current such that they move one token further in the token
    /// stream, reporting (and skipping) any `Error` tokens the scanner produces along the way.
    fn advance(&mut self) {
        self.previous = self.current;

        loop {
            self.current = self.scanner.scan_token();
            if self.current.token() != Token::Error {
                break;
            }

            self.error_at_current(self.current.text())
        }
    }

    /// Scan the next token. If the token is not of the desired type, an error message is printed.
    fn consume(&mut self, desired_token: Token, message: &'static str) {
        if self.current.token() == desired_token {
            return self.advance();
        }

        self.error_at_current(message);
    }

    /// Return true if the current token is equal to the given token.
    fn check(&self, token: Token) -> bool {
        self.current.token() == token
    }

    /// Scan the next token if `desired_token` matches. Returns whether it was matched.
    fn match_and_advance(&mut self, desired_token: Token) -> bool {
        if self.check(desired_token) {
            self.advance();
            return true;
        }
        false
    }

    /// Emit a compiler error located at the previous [Lexeme]. In Pratt parsing, this is the
    /// handler you usually want, because the previous lexeme decided which [ParserRule] was
    /// accepted.
    fn error(&mut self, message: &str) {
        self.error_at(self.previous, message)
    }

    /// Emit a compiler error located at the current [Lexeme].
    fn error_at_current(&mut self, message: &str) {
        self.error_at(self.current, message)
    }

    /// Emit a compiler error located at the given [Lexeme].
    ///
    /// Once in panic mode, further errors are swallowed until a synchronization point: a single
    /// malformed token shouldn't cascade into a screenful of spurious diagnostics.
    fn error_at(&mut self, lexeme: Lexeme<'a>, message: &str) {
        if self.panic_mode {
            return;
        }

        self.panic_mode = true;
        self.had_error = true;

        eprint!("[line {}] Error", lexeme.line());
        if lexeme.token() == Token::Eof {
            eprint!(" at end");
        } else if lexeme.token() == Token::Error {
            // The scanner already chose the message; nothing more to locate.
        } else {
            eprint!(" at '{}'", lexeme.text());
        }
        eprintln!(": {message}");
    }

    /// Synchronize after being in panic mode.
    ///
    /// The heuristic is that we gobble up and discard tokens until we **think** we're at a point
    /// that makes sense in the grammar: a statement boundary, or the start of a statement-leading
    /// keyword. We could be wrong, but we only get one pass over the source, so this is what's
    /// available.
    fn synchronize(&mut self) {
        self.panic_mode = false;

        while self.current.token() != Token::Eof {
            if self.previous.token() == Token::Semicolon {
                return;
            }

            match self.current.token() {
                Token::Class
                | Token::Fun
                | Token::Var
                | Token::For
                | Token::If
                | Token::While
                | Token::Print
                | Token::Return => return,
                _ => self.advance(),
            }
        }
    }
}

impl<'a> Compiler<'a> {
    /// Creates a new compiler with the given [Parser], interning string literals into `gc`.
    fn new(parser: Parser<'a>, gc: &'a mut Gc) -> Compiler<'a> {
        Compiler {
            parser,
            compiling_chunk: Chunk::default(),
            gc,
        }
    }

    /// Takes ownership of the compiler, and returns the chunk, or a [crate::error::InterpretationError::CompileError]
    /// if any parse error was reported.
    fn compile(mut self) -> crate::Result<Chunk> {
        self.advance();

        while !self.match_and_advance(Token::Eof) {
            self.declaration();
        }
        self.end_compiler();

        if self.parser.had_error {
            return Err(InterpretationError::CompileError);
        }

        Ok(self.compiling_chunk)
    }

    /// Signal the end of compilation: emit the terminating `RETURN` and, if the `print_code`
    /// feature is enabled, dump the finished chunk for inspection.
    fn end_compiler(&mut self) {
        self.emit_return();

        if cfg!(feature = "print_code") && !self.parser.had_error {
            crate::debug::disassemble_chunk(self.current_chunk(), "code");
        }
    }

    /// The core of the Pratt parsing algorithm.
    ///
    /// See: <https://en.wikipedia.org/wiki/Operator-precedence_parser#Pratt_parsing>
    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();

        if let Some(prefix_rule) = self.rule_from_previous().prefix {
            prefix_rule(self);
        } else {
            self.parser.error("Expect expression.");
            return;
        }

        while precedence <= self.rule_from_current().precedence {
            self.advance();
            let infix_rule = self
                .rule_from_previous()
                .infix
                .expect("a rule with a defined precedence must always have an infix rule");

            infix_rule(self);
        }
    }

    /// Intern `lexeme`'s text and add it to the current chunk's constant pool. Returns the
    /// constant's index.
    fn identifier_constant(&mut self, lexeme: Lexeme) -> usize {
        let obj: Obj = self.gc.intern(lexeme.text());
        self.make_constant(Value::Obj(obj))
    }

    /// Parse a global variable name. Assumes the declaring keyword (e.g. `var`) has already been
    /// consumed. Returns the constant-pool index of its name.
    fn parse_variable(&mut self, error_message: &'static str) -> usize {
        self.parser.consume(Token::Identifier, error_message);
        self.identifier_constant(self.parser.previous)
    }

    /// Emit `OP_DEFINE_GLOBAL` for the variable whose name lives at `global` in the constant
    /// pool, binding whatever's currently on top of the stack.
    fn define_variable(&mut self, global: usize) {
        self.emit_u24_instruction(OpCode::DefineGlobal, global);
    }

    /// Compile a reference to a global variable: look up its name in the constant pool and emit
    /// `OP_GET_GLOBAL`.
    fn named_variable(&mut self, name: Lexeme) {
        let arg = self.identifier_constant(name);
        self.emit_u24_instruction(OpCode::GetGlobal, arg);
    }

    /// Parse a declaration: either a `var` declaration or a statement.
    fn declaration(&mut self) {
        if self.match_and_advance(Token::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }

        if self.parser.panic_mode {
            self.parser.synchronize();
        }
    }

    /// Parse a statement: `print` or a bare expression statement.
    fn statement(&mut self) {
        if self.match_and_advance(Token::Print) {
            self.print_statement();
        } else {
            self.expression_statement();
        }
    }

    /// Parse an expression.
    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    /// Parse a variable declaration. Assumes `var` has already been consumed.
    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");

        if self.match_and_advance(Token::Equal) {
            self.expression();
        } else {
            self.emit_instruction(OpCode::Nil);
        }

        self.parser
            .consume(Token::Semicolon, "Expect ';' after variable declaration.");

        self.define_variable(global);
    }

    /// Parse an expression statement. Every expression leaves exactly one value on the stack, so
    /// this always follows up with a `POP` to keep the stack balanced across statements.
    fn expression_statement(&mut self) {
        self.expression();
        self.parser
            .consume(Token::Semicolon, "Expect ';' after expression.");
        self.emit_instruction(OpCode::Pop);
    }

    /// Parse a print statement. Assumes `print` has already been consumed.
    fn print_statement(&mut self) {
        self.expression();
        self.parser
            .consume(Token::Semicolon, "Expect ';' after value.");
        self.emit_instruction(OpCode::Print);
    }

    /// Appends [OpCode::Return] to the current [Chunk].
    fn emit_return(&mut self) {
        self.emit_instruction(OpCode::Return);
    }

    /// Appends `value` to the constant pool and emits `OP_CONSTANT_LONG` to push it.
    fn emit_constant(&mut self, value: Value) {
        let line = self.line_number_of_prefix();
        if !self.current_chunk().write_constant(value, line) {
            self.parser.error("Too many constants in one chunk.");
        }
    }

    /// Appends a constant to the current chunk's pool, without emitting any bytecode to push it.
    /// Used for values addressed by index (identifier names for globals) rather than pushed
    /// directly.
    ///
    /// # Error
    ///
    /// When the constant index would no longer fit in a u24 operand, this reports a compiler
    /// error and returns index `0`. The current [Chunk] can still be appended to, but it is no
    /// longer valid to run.
    fn make_constant(&mut self, value: Value) -> usize {
        match self.current_chunk().add_constant(value) {
            Some(index) => index,
            None => {
                self.parser.error("Too many constants in one chunk.");
                0
            }
        }
    }

    /// Writes an [OpCode] with no operand to the current [Chunk].
    fn emit_instruction(&mut self, opcode: OpCode) {
        let line = self.line_number_of_prefix();
        self.current_chunk().write_opcode(opcode, line);
    }

    /// Writes two [OpCode]s with no operands to the current [Chunk] (used for the two-opcode
    /// encodings of `!=`, `>=`, and `<=`).
    fn emit_instructions(&mut self, op1: OpCode, op2: OpCode) {
        let line = self.line_number_of_prefix();
        self.current_chunk().write_opcode(op1, line);
        self.current_chunk().write_opcode(op2, line);
    }

    /// Writes an [OpCode] followed by a u24 operand to the current [Chunk].
    fn emit_u24_instruction(&mut self, opcode: OpCode, index: usize) {
        let line = self.line_number_of_prefix();
        self.current_chunk().write_opcode(opcode, line);
        self.current_chunk().write_u24(index, line);
    }

    ///////////////////////////////////////// Aliases /////////////////////////////////////////////

    /// Returns the current [Chunk].
    #[inline(always)]
    fn current_chunk(&mut self) -> &mut Chunk {
        &mut self.compiling_chunk
    }

    /// Advance one token in the scanner, such that:
    /// ```text
    /// (previous, current) = (current, scanner.next_token())
    /// ```
    #[inline(always)]
    fn advance(&mut self) {
        self.parser.advance()
    }

    /// Returns the line number of the prefix token, a.k.a. `self.parser.previous`.
    #[inline(always)]
    fn line_number_of_prefix(&self) -> usize {
        self.parser.previous.line()
    }

    /// Delegates to [Parser::match_and_advance]. Returns true if the token was matched.
    #[inline(always)]
    fn match_and_advance(&mut self, desired_token: Token) -> bool {
        self.parser.match_and_advance(desired_token)
    }

    /// Returns the rule for the token in the process of being parsed.
    #[inline(always)]
    fn rule_from_previous(&self) -> ParserRule {
        get_rule(self.previous_token())
    }

    /// Returns the rule for the token that lookahead is currently sitting on.
    #[inline(always)]
    fn rule_from_current(&self) -> ParserRule {
        get_rule(self.parser.current.token())
    }

    /// Return the token (kind) of the previous lexeme. Useful in prefix/infix handlers.
    #[inline(always)]
    fn previous_token(&self) -> Token {
        self.parser.previous.token()
    }
}

////////////////////////////////////////// Parser rules ///////////////////////////////////////////

/// Makes defining [ParserRule]s a bit cleaner looking.
macro_rules! rule {
    ($prefix:expr, $infix:expr, $precedence:expr) => {
        ParserRule {
            prefix: $prefix,
            infix: $infix,
            precedence: $precedence,
        }
    };
}

/// The static Pratt parse-rule table, keyed by [Token]. Built once, behind a [OnceLock], the
/// first time it's needed.
fn get_rule(token: Token) -> ParserRule {
    static TABLE: OnceLock<EnumMap<Token, ParserRule>> = OnceLock::new();

    #[rustfmt::skip]
    let table = TABLE.get_or_init(|| enum_map! {
        //                      Prefix          Infix         Precedence
        Token::LeftParen    => rule!{ Some(grouping), None,         Precedence::None },
        Token::RightParen   => rule!{ None,           None,         Precedence::None },
        Token::LeftBrace    => rule!{ None,           None,         Precedence::None },
        Token::RightBrace   => rule!{ None,           None,         Precedence::None },
        Token::Comma        => rule!{ None,           None,         Precedence::None },
        Token::Dot          => rule!{ None,           None,         Precedence::None },
        Token::Minus        => rule!{ Some(unary),    Some(binary), Precedence::Term },
        Token::Plus         => rule!{ None,           Some(binary), Precedence::Term },
        Token::Semicolon    => rule!{ None,           None,         Precedence::None },
        Token::Star         => rule!{ None,           Some(binary), Precedence::Factor },
        Token::Slash        => rule!{ None,           Some(binary), Precedence::Factor },
        Token::Bang         => rule!{ Some(unary),    None,         Precedence::None },
        Token::BangEqual    => rule!{ None,           Some(binary), Precedence::Equality },
        Token::Equal        => rule!{ None,           None,         Precedence::None },
        Token::EqualEqual   => rule!{ None,           Some(binary), Precedence::Equality },
        Token::Greater      => rule!{ None,           Some(binary), Precedence::Comparison },
        Token::GreaterEqual => rule!{ None,           Some(binary), Precedence::Comparison },
        Token::Less         => rule!{ None,           Some(binary), Precedence::Comparison },
        Token::LessEqual    => rule!{ None,           Some(binary), Precedence::Comparison },
        Token::Identifier   => rule!{ Some(variable), None,         Precedence::None },
        Token::StrLiteral   => rule!{ Some(string),   None,         Precedence::None },
        Token::Number       => rule!{ Some(number),   None,         Precedence::None },
        Token::And          => rule!{ None,           None,         Precedence::None },
        Token::Class        => rule!{ None,           None,         Precedence::None },
        Token::Else         => rule!{ None,           None,         Precedence::None },
        Token::False        => rule!{ Some(literal),  None,         Precedence::None },
        Token::For          => rule!{ None,           None,         Precedence::None },
        Token::Fun          => rule!{ None,           None,         Precedence::None },
        Token::If           => rule!{ None,           None,         Precedence::None },
        Token::Nil          => rule!{ Some(literal),  None,         Precedence::None },
        Token::Or           => rule!{ None,           None,         Precedence::None },
        Token::Print        => rule!{ None,           None,         Precedence::None },
        Token::Return       => rule!{ None,           None,         Precedence::None },
        Token::Super        => rule!{ None,           None,         Precedence::None },
        Token::This         => rule!{ None,           None,         Precedence::None },
        Token::True         => rule!{ Some(literal),  None,         Precedence::None },
        Token::Var          => rule!{ None,           None,         Precedence::None },
        Token::While        => rule!{ None,           None,         Precedence::None },
        Token::Error        => rule!{ None,           None,         Precedence::None },
        Token::Eof          => rule!{ None,           None,         Precedence::None },
    });

    table[token]
}

/// Parse '(' as a prefix. Assumes '(' has been consumed.
fn grouping(compiler: &mut Compiler) {
    debug_assert_eq!(Token::LeftParen, compiler.previous_token());
    compiler.expression();
    compiler
        .parser
        .consume(Token::RightParen, "Expect ')' after expression.");
}

/// Parse a number literal as a prefix. Assumes the number has been consumed.
fn number(compiler: &mut Compiler) {
    debug_assert_eq!(Token::Number, compiler.previous_token());
    let value = compiler
        .parser
        .previous
        .text()
        .parse::<f64>()
        .expect("Token::Number must always parse as a float");
    compiler.emit_constant(value.into());
}

/// Parse a unary operator as a prefix. Assumes the operator has been consumed.
fn unary(compiler: &mut Compiler) {
    let operator = compiler.previous_token();

    // Compile the operand, so that it's placed on the stack.
    compiler.parse_precedence(Precedence::Unary);

    match operator {
        Token::Bang => compiler.emit_instruction(OpCode::Not),
        Token::Minus => compiler.emit_instruction(OpCode::Negate),
        _ => unreachable!(),
    }
}

/// Parse a binary operator as an infix. Assumes the operator has been consumed.
///
/// `!=`, `>=`, and `<=` have no dedicated opcode; they compile to two opcodes apiece
/// (`EQUAL NOT`, `LESS NOT`, `GREATER NOT` respectively).
fn binary(compiler: &mut Compiler) {
    let operator = compiler.previous_token();
    let rule = get_rule(operator);

    // Left-associative: parse the right operand at one precedence level higher than this one.
    compiler.parse_precedence(rule.higher_precedence());

    match operator {
        Token::BangEqual => compiler.emit_instructions(OpCode::Equal, OpCode::Not),
        Token::EqualEqual => compiler.emit_instruction(OpCode::Equal),
        Token::Greater => compiler.emit_instruction(OpCode::Greater),
        Token::GreaterEqual => compiler.emit_instructions(OpCode::Less, OpCode::Not),
        Token::Less => compiler.emit_instruction(OpCode::Less),
        Token::LessEqual => compiler.emit_instructions(OpCode::Greater, OpCode::Not),
        Token::Plus => compiler.emit_instruction(OpCode::Add),
        Token::Minus => compiler.emit_instruction(OpCode::Subtract),
        Token::Star => compiler.emit_instruction(OpCode::Multiply),
        Token::Slash => compiler.emit_instruction(OpCode::Divide),
        _ => unreachable!(),
    }
}

/// Parse a keyword literal as a prefix. Assumes the keyword has been consumed.
fn literal(compiler: &mut Compiler) {
    match compiler.previous_token() {
        Token::False => compiler.emit_instruction(OpCode::False),
        Token::Nil => compiler.emit_instruction(OpCode::Nil),
        Token::True => compiler.emit_instruction(OpCode::True),
        _ => unreachable!(),
    }
}

/// Parse a string literal. Strips the surrounding quotes, interns the contents, and emits it as
/// a constant.
fn string(compiler: &mut Compiler) {
    debug_assert_eq!(Token::StrLiteral, compiler.previous_token());

    let literal = compiler.parser.previous.text();
    debug_assert!(literal.len() >= 2);
    debug_assert!(literal.starts_with('"'));
    debug_assert!(literal.ends_with('"'));

    let last_index = literal.len() - 1;
    let contents = &literal[1..last_index];

    let obj = compiler.gc.intern(contents);
    compiler.emit_constant(Value::Obj(obj));
}

/// Parse a variable reference.
fn variable(compiler: &mut Compiler) {
    compiler.named_variable(compiler.parser.previous);
}

////////////////////////////////////////////// Tests //////////////////////////////////////////////

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn precedence_confidence_check() {
        assert!(Precedence::Assignment < Precedence::Or);
        assert!(Precedence::Or < Precedence::And);
        assert!(Precedence::And < Precedence::Equality);
        assert!(Precedence::Equality < Precedence::Comparison);

        assert!(Precedence::Call > Precedence::Factor);
        assert!(Precedence::Factor > Precedence::Term);

        assert_eq!(Precedence::And, Precedence::Or.higher_precedence());
        assert_eq!(Precedence::Factor, Precedence::Term.higher_precedence());
    }

    fn compiles(source: &str) -> bool {
        let mut gc = Gc::new();
        compile(source, &mut gc).is_ok()
    }

    #[test]
    fn compiles_arithmetic() {
        assert!(compiles("print 1 + 2 * 3;"));
        assert!(compiles("print (1 + 2) * 3;"));
    }

    #[test]
    fn compiles_var_declarations() {
        assert!(compiles("var a = 1; print a;"));
        assert!(compiles("var a; print a;"));
    }

    #[test]
    fn missing_expression_is_a_compile_error() {
        assert!(!compiles("print 1 +;"));
    }

    #[test]
    fn missing_semicolon_is_a_compile_error() {
        assert!(!compiles("print 1"));
    }

    #[test]
    fn unterminated_string_is_a_compile_error() {
        assert!(!compiles("print \"oops;"));
    }

    #[test]
    fn emits_stack_balanced_bytecode_for_expression_statements() {
        let mut gc = Gc::new();
        let chunk = compile("1 + 2;", &mut gc).unwrap();
        // OP_CONSTANT_LONG(1) OP_CONSTANT_LONG(2) OP_ADD OP_POP OP_RETURN
        assert_eq!(Some(OpCode::ConstantLong), chunk.opcode_at(0));
        assert_eq!(Some(OpCode::ConstantLong), chunk.opcode_at(4));
        assert_eq!(Some(OpCode::Add), chunk.opcode_at(8));
        assert_eq!(Some(OpCode::Pop), chunk.opcode_at(9));
        assert_eq!(Some(OpCode::Return), chunk.opcode_at(10));
    }
}
