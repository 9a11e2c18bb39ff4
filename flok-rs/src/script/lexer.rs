//! Flok lexer.
//!
//! Turns source text into a flat token stream.  Indentation is significant:
//! each logical line's leading whitespace (tab = 4 columns) is compared with a
//! stack of open levels, producing synthetic [`TokenKind::Indent`] and
//! [`TokenKind::Dedent`] tokens that the parser treats like braces.  Blank and
//! comment-only lines never affect indentation.

use crate::error::{ParseError, SyntaxErrorKind};

/// Columns a tab character counts for.
pub const TAB_WIDTH: usize = 4;

// ── Token ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals
    Number(f64),
    Str(String),
    Ident(String),
    /// `%name%`
    RuntimeVar(String),
    /// `__key__`
    PersistVar(String),
    Bool(bool),
    Null,

    // Keywords
    On,
    Command,
    Function,
    If,
    ElseIf,
    Else,
    While,
    For,
    In,
    Repeat,
    Times,
    Return,
    /// `break` or `stop`
    Break,
    Continue,
    Wait,
    Ticks,
    Seconds,
    And,
    Or,
    Not,
    Is,
    Isnt,
    Contains,
    Set,
    To,
    Add,
    Remove,
    From,

    // Operators
    Plus,
    PlusAssign,
    Minus,
    MinusAssign,
    Arrow,
    Star,
    StarAssign,
    Slash,
    SlashAssign,
    Percent,
    Caret,
    Assign,
    Eq,
    Bang,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Question,

    // Punctuation
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Colon,
    Comma,
    Dot,

    // Layout
    Newline,
    Indent,
    Dedent,
    Eof,
}

impl TokenKind {
    /// Whether a `-` following this token starts a negative number rather
    /// than a subtraction.
    fn starts_operand(&self) -> bool {
        use TokenKind::*;
        matches!(
            self,
            LParen
                | LBracket
                | LBrace
                | Comma
                | Colon
                | Question
                | Assign
                | PlusAssign
                | MinusAssign
                | StarAssign
                | SlashAssign
                | Plus
                | Minus
                | Star
                | Slash
                | Percent
                | Caret
                | Eq
                | Ne
                | Lt
                | Le
                | Gt
                | Ge
                | Bang
                | Arrow
                | Indent
                | Dedent
                | Newline
                | Return
                | To
                | And
                | Or
                | Not
                | Is
                | Isnt
                | Contains
                | If
                | ElseIf
                | While
                | In
                | Repeat
                | Wait
                | Set
                | Add
                | Remove
                | From
                | For
        )
    }
}

/// A lexed token.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Source text of the token (unescaped contents for strings).
    pub lexeme: String,
    pub line: usize,
    /// Whether whitespace (or a line start) preceded the token.
    pub spaced: bool,
}

fn keyword(word: &str) -> Option<TokenKind> {
    use TokenKind::*;
    let kind = match word.to_lowercase().as_str() {
        "on" => On,
        "command" => Command,
        "function" => Function,
        "if" => If,
        "elseif" | "else-if" | "elif" => ElseIf,
        "else" => Else,
        "while" => While,
        "for" => For,
        "in" => In,
        "repeat" => Repeat,
        "times" => Times,
        "return" => Return,
        "break" | "stop" => Break,
        "continue" => Continue,
        "wait" => Wait,
        "tick" | "ticks" => Ticks,
        "second" | "seconds" => Seconds,
        "and" => And,
        "or" => Or,
        "not" => Not,
        "is" => Is,
        "isnt" | "isn't" => Isnt,
        "contains" => Contains,
        "set" => Set,
        "to" => To,
        "add" => Add,
        "remove" | "subtract" => Remove,
        "from" => From,
        "true" => Bool(true),
        "false" => Bool(false),
        "null" | "none" | "nil" => Null,
        _ => return None,
    };
    Some(kind)
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

// ── Lexer ─────────────────────────────────────────────────────────────────────

struct Lexer<'a> {
    src: Vec<char>,
    pos: usize,
    line: usize,
    file: &'a str,
    tokens: Vec<Token>,
    indents: Vec<usize>,
    spaced: bool,
}

impl<'a> Lexer<'a> {
    fn new(src: &str, file: &'a str) -> Self {
        Lexer {
            src: src.chars().collect(),
            pos: 0,
            line: 1,
            file,
            tokens: Vec::new(),
            indents: vec![0],
            spaced: true,
        }
    }

    fn peek(&self) -> Option<char> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.src.get(self.pos + offset).copied()
    }

    fn eat(&mut self, ch: char) -> bool {
        if self.peek() == Some(ch) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error(&self, kind: SyntaxErrorKind) -> ParseError {
        ParseError::new(kind, self.file, self.line)
    }

    fn push(&mut self, kind: TokenKind, lexeme: impl Into<String>, line: usize) {
        self.tokens.push(Token { kind, lexeme: lexeme.into(), line, spaced: self.spaced });
        self.spaced = false;
    }

    fn in_unary_position(&self) -> bool {
        self.tokens.last().is_none_or(|t| t.kind.starts_operand())
    }

    fn skip_to_line_end(&mut self) {
        while self.peek().is_some_and(|c| c != '\n') {
            self.pos += 1;
        }
    }

    fn tokenize(mut self) -> Result<Vec<Token>, ParseError> {
        let mut at_line_start = true;
        loop {
            if at_line_start {
                let level = self.measure_indent();
                match self.peek() {
                    None => break,
                    Some('\n') => {
                        self.pos += 1;
                        self.line += 1;
                        continue;
                    }
                    Some('#') => {
                        self.skip_to_line_end();
                        continue;
                    }
                    Some(_) => {}
                }
                self.apply_indent(level)?;
                at_line_start = false;
                self.spaced = true;
            }

            let Some(c) = self.peek() else { break };
            match c {
                '\n' => {
                    let line = self.line;
                    self.push(TokenKind::Newline, "\n", line);
                    self.pos += 1;
                    self.line += 1;
                    at_line_start = true;
                }
                '#' => self.skip_to_line_end(),
                c if c.is_whitespace() => {
                    self.pos += 1;
                    self.spaced = true;
                }
                '"' | '\'' => self.read_string(c)?,
                '%' if self.runtime_var_ahead() => self.read_runtime_var()?,
                '%' if self.in_unary_position() && self.peek_at(1).is_some_and(is_word_char) => {
                    return Err(self.error(SyntaxErrorKind::UnterminatedRuntimeVar));
                }
                '_' if self.peek_at(1) == Some('_') => self.read_persist_var()?,
                c if c.is_ascii_digit() => self.read_number(),
                '-' if self.peek_at(1).is_some_and(|n| n.is_ascii_digit())
                    && self.in_unary_position() =>
                {
                    self.read_number()
                }
                c if c.is_alphabetic() || c == '_' => self.read_word(),
                _ => self.read_symbol()?,
            }
        }

        let line = self.line;
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(TokenKind::Dedent, "", line);
        }
        self.push(TokenKind::Eof, "", line);
        Ok(self.tokens)
    }

    /// Consume leading whitespace and return its column width.
    fn measure_indent(&mut self) -> usize {
        let mut level = 0;
        loop {
            match self.peek() {
                Some(' ') => level += 1,
                Some('\t') => level += TAB_WIDTH,
                Some('\r') => {}
                _ => return level,
            }
            self.pos += 1;
        }
    }

    fn apply_indent(&mut self, level: usize) -> Result<(), ParseError> {
        let top = self.indents.last().copied().unwrap_or(0);
        if level > top {
            self.indents.push(level);
            let line = self.line;
            self.push(TokenKind::Indent, "", line);
        } else if level < top {
            while self.indents.last().is_some_and(|&l| l > level) {
                self.indents.pop();
                let line = self.line;
                self.push(TokenKind::Dedent, "", line);
            }
            if self.indents.last() != Some(&level) {
                return Err(self.error(SyntaxErrorKind::Indentation));
            }
        }
        Ok(())
    }

    fn read_string(&mut self, quote: char) -> Result<(), ParseError> {
        let line = self.line;
        self.pos += 1;
        let mut s = String::new();
        loop {
            match self.peek() {
                None | Some('\n') => return Err(self.error(SyntaxErrorKind::UnterminatedString)),
                Some('\\') => {
                    self.pos += 1;
                    match self.peek() {
                        None | Some('\n') => {
                            return Err(self.error(SyntaxErrorKind::UnterminatedString))
                        }
                        Some('n') => s.push('\n'),
                        Some('t') => s.push('\t'),
                        Some(other) => s.push(other),
                    }
                    self.pos += 1;
                }
                Some(c) if c == quote => {
                    self.pos += 1;
                    break;
                }
                Some(c) => {
                    s.push(c);
                    self.pos += 1;
                }
            }
        }
        self.push(TokenKind::Str(s.clone()), s, line);
        Ok(())
    }

    /// A `%` opens a runtime variable only when a name character follows and
    /// a closing `%` exists later on the same line.  Otherwise it is modulo.
    fn runtime_var_ahead(&self) -> bool {
        match self.peek_at(1) {
            Some('_') if self.peek_at(2) == Some('_') => return false,
            Some(n) if is_word_char(n) => {}
            _ => return false,
        }
        self.src[self.pos + 1..]
            .iter()
            .take_while(|&&c| c != '\n')
            .any(|&c| c == '%')
    }

    fn read_runtime_var(&mut self) -> Result<(), ParseError> {
        let line = self.line;
        self.pos += 1;
        let start = self.pos;
        while self.peek().is_some_and(|c| c != '%' && c != '\n') {
            self.pos += 1;
        }
        if !self.eat('%') {
            return Err(self.error(SyntaxErrorKind::UnterminatedRuntimeVar));
        }
        let name: String = self.src[start..self.pos - 1].iter().collect();
        let lexeme = format!("%{name}%");
        self.push(TokenKind::RuntimeVar(name), lexeme, line);
        Ok(())
    }

    fn read_persist_var(&mut self) -> Result<(), ParseError> {
        let line = self.line;
        self.pos += 2;
        let start = self.pos;
        loop {
            match (self.peek(), self.peek_at(1)) {
                (Some('_'), Some('_')) => break,
                (None, _) | (Some('\n'), _) => {
                    return Err(self.error(SyntaxErrorKind::UnterminatedPersistVar))
                }
                _ => self.pos += 1,
            }
        }
        let key: String = self.src[start..self.pos].iter().collect();
        self.pos += 2;
        let lexeme = format!("__{key}__");
        self.push(TokenKind::PersistVar(key), lexeme, line);
        Ok(())
    }

    fn read_number(&mut self) {
        let start = self.pos;
        self.eat('-');
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        let text: String = self.src[start..self.pos].iter().collect();
        let n = text.parse().unwrap_or(0.0);
        let line = self.line;
        self.push(TokenKind::Number(n), text, line);
    }

    fn read_word(&mut self) {
        let start = self.pos;
        loop {
            match self.peek() {
                Some(c) if is_word_char(c) => self.pos += 1,
                Some('-') if self.peek_at(1).is_some_and(char::is_alphanumeric) => self.pos += 1,
                _ => break,
            }
        }
        // `isn't` is the one keyword with an apostrophe.
        let is_isn = self.src[start..self.pos].iter().collect::<String>().eq_ignore_ascii_case("isn");
        if is_isn
            && self.peek() == Some('\'')
            && self.peek_at(1).is_some_and(|c| c.eq_ignore_ascii_case(&'t'))
            && !self.peek_at(2).is_some_and(is_word_char)
        {
            self.pos += 2;
        }
        let word: String = self.src[start..self.pos].iter().collect();
        let kind = keyword(&word).unwrap_or_else(|| TokenKind::Ident(word.clone()));
        let line = self.line;
        self.push(kind, word, line);
    }

    fn read_symbol(&mut self) -> Result<(), ParseError> {
        use TokenKind::*;
        let line = self.line;
        let Some(c) = self.peek() else { return Ok(()) };
        self.pos += 1;
        let (kind, text) = match c {
            '+' if self.eat('=') => (PlusAssign, "+="),
            '+' => (Plus, "+"),
            '-' if self.eat('=') => (MinusAssign, "-="),
            '-' if self.eat('>') => (Arrow, "->"),
            '-' => (Minus, "-"),
            '*' if self.eat('=') => (StarAssign, "*="),
            '*' => (Star, "*"),
            '/' if self.eat('=') => (SlashAssign, "/="),
            '/' => (Slash, "/"),
            '%' => (Percent, "%"),
            '^' => (Caret, "^"),
            '=' if self.eat('=') => (Eq, "=="),
            '=' => (Assign, "="),
            '!' if self.eat('=') => (Ne, "!="),
            '!' => (Bang, "!"),
            '<' if self.eat('=') => (Le, "<="),
            '<' => (Lt, "<"),
            '>' if self.eat('=') => (Ge, ">="),
            '>' => (Gt, ">"),
            '?' => (Question, "?"),
            '(' => (LParen, "("),
            ')' => (RParen, ")"),
            '[' => (LBracket, "["),
            ']' => (RBracket, "]"),
            '{' => (LBrace, "{"),
            '}' => (RBrace, "}"),
            ':' => (Colon, ":"),
            ',' => (Comma, ","),
            '.' => (Dot, "."),
            other => return Err(self.error(SyntaxErrorKind::UnexpectedChar(other))),
        };
        self.push(kind, text, line);
        Ok(())
    }
}

/// Tokenize `src`.  `file` labels diagnostics.
pub fn tokenize(src: &str, file: &str) -> Result<Vec<Token>, ParseError> {
    Lexer::new(src, file).tokenize()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
