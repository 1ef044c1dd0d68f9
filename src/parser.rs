// AML source parser: lexer + recursive descent producing the AST
//
// A document is an object without braces. Fields separate on newlines,
// commas or semicolons; newlines are insignificant inside groups.

use std::sync::Arc;

use thiserror::Error;

use crate::ast::{
    AmlString, Array, BinOp, Call, Expression, Field, For, If, Key, Lookup, LookupKind, Number,
    Object, Operator, Position, Selector, SelectorBase, StringPart, Value, ValueKind,
};

/// Parser errors.
#[derive(Error, Debug)]
pub enum ParserError {
    #[error("{pos}: unexpected character '{found}'")]
    UnexpectedCharacter { pos: Position, found: char },

    #[error("{pos}: unexpected end of input")]
    UnexpectedEnd { pos: Position },

    #[error("{pos}: invalid number: {text}")]
    InvalidNumber { pos: Position, text: String },

    #[error("{pos}: unclosed string literal")]
    UnclosedString { pos: Position },

    #[error("{pos}: invalid escape sequence: \\{found}")]
    InvalidEscape { pos: Position, found: String },

    #[error("{pos}: expected {expected}, found {found}")]
    Expected {
        pos: Position,
        expected: String,
        found: String,
    },
}

/// Parse a complete AML document.
pub fn parse(source: &str, input: &str) -> Result<Value, ParserError> {
    let tokens = Lexer::new(source, input).tokens()?;
    Parser::new(tokens).parse_document()
}

// ── Lexer ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Number(String),
    Str {
        parts: Vec<StrPart>,
        multiline: bool,
    },

    True,
    False,
    Null,
    Let,
    If,
    Else,
    For,
    In,

    Colon,
    Comma,
    Semicolon,
    Newline,
    Dot,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,

    Plus,
    Minus,
    Star,
    Slash,
    EqEq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    MatchOp,
    NotMatchOp,
    AndAnd,
    OrOr,
    Amp,
    TildeEq,
    Bang,

    Eof,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Ident(s) => format!("identifier '{s}'"),
            Token::Number(s) => format!("number '{s}'"),
            Token::Str { .. } => "string".to_string(),
            Token::Newline => "newline".to_string(),
            Token::Eof => "end of input".to_string(),
            other => format!("{other:?}"),
        }
    }
}

/// A raw string piece: literal text or the tokens of a `\(expr)` hole.
#[derive(Debug, Clone, PartialEq)]
pub enum StrPart {
    Literal(String),
    Hole(Vec<SpannedToken>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub pos: Position,
}

struct Lexer {
    source: Arc<str>,
    input: Vec<char>,
    position: usize,
    line: usize,
    col: usize,
}

impl Lexer {
    fn new(source: &str, input: &str) -> Self {
        Lexer {
            source: source.into(),
            input: input.chars().collect(),
            position: 0,
            line: 1,
            col: 1,
        }
    }

    fn pos(&self) -> Position {
        Position {
            source: self.source.clone(),
            line: self.line,
            col: self.col,
            offset: self.position,
        }
    }

    fn current(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.input.get(self.position + offset).copied()
    }

    fn advance(&mut self) {
        if let Some(c) = self.current() {
            self.position += 1;
            if c == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
    }

    fn tokens(mut self) -> Result<Vec<SpannedToken>, ParserError> {
        let mut result = Vec::new();
        while let Some(tok) = self.next_token()? {
            result.push(tok);
        }
        result.push(SpannedToken {
            token: Token::Eof,
            pos: self.pos(),
        });
        Ok(result)
    }

    fn next_token(&mut self) -> Result<Option<SpannedToken>, ParserError> {
        loop {
            match self.current() {
                Some(' ') | Some('\t') | Some('\r') => self.advance(),
                Some('/') if self.peek(1) == Some('/') => {
                    while let Some(c) = self.current() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }

        let pos = self.pos();
        let Some(c) = self.current() else {
            return Ok(None);
        };

        let token = match c {
            '\n' => {
                self.advance();
                Token::Newline
            }
            ':' => self.single(Token::Colon),
            ',' => self.single(Token::Comma),
            ';' => self.single(Token::Semicolon),
            '.' => self.single(Token::Dot),
            '(' => self.single(Token::LParen),
            ')' => self.single(Token::RParen),
            '[' => self.single(Token::LBracket),
            ']' => self.single(Token::RBracket),
            '{' => self.single(Token::LBrace),
            '}' => self.single(Token::RBrace),
            '+' => self.single(Token::Plus),
            '-' => self.single(Token::Minus),
            '*' => self.single(Token::Star),
            '/' => self.single(Token::Slash),
            '=' => match self.peek(1) {
                Some('=') => self.double(Token::EqEq),
                Some('~') => self.double(Token::MatchOp),
                _ => return Err(ParserError::UnexpectedCharacter { pos, found: c }),
            },
            '!' => match self.peek(1) {
                Some('=') => self.double(Token::Ne),
                Some('~') => self.double(Token::NotMatchOp),
                _ => self.single(Token::Bang),
            },
            '<' => match self.peek(1) {
                Some('=') => self.double(Token::Le),
                _ => self.single(Token::Lt),
            },
            '>' => match self.peek(1) {
                Some('=') => self.double(Token::Ge),
                _ => self.single(Token::Gt),
            },
            '&' => match self.peek(1) {
                Some('&') => self.double(Token::AndAnd),
                _ => self.single(Token::Amp),
            },
            '|' => match self.peek(1) {
                Some('|') => self.double(Token::OrOr),
                _ => return Err(ParserError::UnexpectedCharacter { pos, found: c }),
            },
            '~' => match self.peek(1) {
                Some('=') => self.double(Token::TildeEq),
                _ => return Err(ParserError::UnexpectedCharacter { pos, found: c }),
            },
            '"' => self.read_string()?,
            c if c.is_ascii_digit() => self.read_number()?,
            c if c == '_' || c.is_alphabetic() => self.read_ident(),
            other => {
                return Err(ParserError::UnexpectedCharacter {
                    pos,
                    found: other,
                })
            }
        };

        Ok(Some(SpannedToken { token, pos }))
    }

    fn single(&mut self, token: Token) -> Token {
        self.advance();
        token
    }

    fn double(&mut self, token: Token) -> Token {
        self.advance();
        self.advance();
        token
    }

    fn read_ident(&mut self) -> Token {
        let mut name = String::new();
        while let Some(c) = self.current() {
            if c == '_' || c.is_alphanumeric() {
                name.push(c);
                self.advance();
            } else {
                break;
            }
        }
        match name.as_str() {
            "true" => Token::True,
            "false" => Token::False,
            "null" => Token::Null,
            "let" => Token::Let,
            "if" => Token::If,
            "else" => Token::Else,
            "for" => Token::For,
            "in" => Token::In,
            _ => Token::Ident(name),
        }
    }

    fn read_number(&mut self) -> Result<Token, ParserError> {
        let pos = self.pos();
        let mut text = String::new();

        while let Some(c) = self.current() {
            if c.is_ascii_digit() || c == '_' {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }
        if self.current() == Some('.') && self.peek(1).map_or(false, |c| c.is_ascii_digit()) {
            text.push('.');
            self.advance();
            while let Some(c) = self.current() {
                if c.is_ascii_digit() || c == '_' {
                    text.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
        }
        if matches!(self.current(), Some('e') | Some('E'))
            && self
                .peek(1)
                .map_or(false, |c| c.is_ascii_digit() || c == '+' || c == '-')
        {
            text.push('e');
            self.advance();
            if matches!(self.current(), Some('+') | Some('-')) {
                text.push(self.current().unwrap_or('+'));
                self.advance();
            }
            while let Some(c) = self.current() {
                if c.is_ascii_digit() {
                    text.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
        }

        // optional size suffix: k..y, optionally followed by i
        let mut suffix = String::new();
        while let Some(c) = self.current() {
            if c.is_ascii_alphabetic() {
                suffix.push(c.to_ascii_lowercase());
                self.advance();
            } else {
                break;
            }
        }
        if !suffix.is_empty() {
            let valid = matches!(
                suffix.as_str(),
                "k" | "m" | "g" | "t" | "p" | "e" | "z" | "y"
                    | "ki" | "mi" | "gi" | "ti" | "pi" | "ei" | "zi" | "yi"
            );
            if !valid {
                return Err(ParserError::InvalidNumber {
                    pos,
                    text: format!("{text}{suffix}"),
                });
            }
            text.push_str(&suffix);
        }

        Ok(Token::Number(text))
    }

    fn read_string(&mut self) -> Result<Token, ParserError> {
        let start = self.pos();
        let multiline = self.peek(1) == Some('"') && self.peek(2) == Some('"');
        self.advance();
        if multiline {
            self.advance();
            self.advance();
        }

        let mut parts: Vec<StrPart> = Vec::new();
        let mut literal = String::new();

        loop {
            let Some(c) = self.current() else {
                return Err(ParserError::UnclosedString { pos: start });
            };

            if multiline {
                if c == '"' && self.peek(1) == Some('"') && self.peek(2) == Some('"') {
                    self.advance();
                    self.advance();
                    self.advance();
                    break;
                }
            } else if c == '"' {
                self.advance();
                break;
            } else if c == '\n' {
                return Err(ParserError::UnclosedString { pos: start });
            }

            if c == '\\' {
                let esc_pos = self.pos();
                self.advance();
                let Some(esc) = self.current() else {
                    return Err(ParserError::UnclosedString { pos: start });
                };
                match esc {
                    '"' => {
                        literal.push('"');
                        self.advance();
                    }
                    '\\' => {
                        literal.push('\\');
                        self.advance();
                    }
                    '/' => {
                        literal.push('/');
                        self.advance();
                    }
                    'n' => {
                        literal.push('\n');
                        self.advance();
                    }
                    'r' => {
                        literal.push('\r');
                        self.advance();
                    }
                    't' => {
                        literal.push('\t');
                        self.advance();
                    }
                    'u' => {
                        self.advance();
                        let mut hex = String::new();
                        for _ in 0..4 {
                            match self.current() {
                                Some(h) if h.is_ascii_hexdigit() => {
                                    hex.push(h);
                                    self.advance();
                                }
                                _ => {
                                    return Err(ParserError::InvalidEscape {
                                        pos: esc_pos,
                                        found: format!("u{hex}"),
                                    })
                                }
                            }
                        }
                        let code = u32::from_str_radix(&hex, 16).unwrap_or(0);
                        match char::from_u32(code) {
                            Some(ch) => literal.push(ch),
                            None => {
                                return Err(ParserError::InvalidEscape {
                                    pos: esc_pos,
                                    found: format!("u{hex}"),
                                })
                            }
                        }
                    }
                    '(' => {
                        self.advance();
                        if !literal.is_empty() {
                            parts.push(StrPart::Literal(std::mem::take(&mut literal)));
                        }
                        parts.push(StrPart::Hole(self.lex_hole(&start)?));
                    }
                    other => {
                        return Err(ParserError::InvalidEscape {
                            pos: esc_pos,
                            found: other.to_string(),
                        })
                    }
                }
            } else {
                literal.push(c);
                self.advance();
            }
        }

        if !literal.is_empty() || parts.is_empty() {
            parts.push(StrPart::Literal(literal));
        }
        Ok(Token::Str { parts, multiline })
    }

    /// Tokenize an interpolation hole up to its matching `)`.
    fn lex_hole(&mut self, start: &Position) -> Result<Vec<SpannedToken>, ParserError> {
        let mut depth = 1usize;
        let mut tokens = Vec::new();
        loop {
            let Some(tok) = self.next_token()? else {
                return Err(ParserError::UnclosedString { pos: start.clone() });
            };
            match tok.token {
                Token::LParen => depth += 1,
                Token::RParen => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(tokens);
                    }
                }
                Token::Newline => continue,
                _ => {}
            }
            tokens.push(tok);
        }
    }
}

// ── Parser ───────────────────────────────────────────────────────────────────

struct Parser {
    tokens: Vec<SpannedToken>,
    index: usize,
}

impl Parser {
    fn new(tokens: Vec<SpannedToken>) -> Self {
        Parser { tokens, index: 0 }
    }

    fn current(&self) -> &Token {
        self.tokens
            .get(self.index)
            .map(|t| &t.token)
            .unwrap_or(&Token::Eof)
    }

    fn peek(&self) -> &Token {
        self.tokens
            .get(self.index + 1)
            .map(|t| &t.token)
            .unwrap_or(&Token::Eof)
    }

    fn pos(&self) -> Position {
        self.tokens
            .get(self.index)
            .map(|t| t.pos.clone())
            .unwrap_or_default()
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.index < self.tokens.len() {
            self.index += 1;
        }
        token
    }

    fn expect(&mut self, token: Token, what: &str) -> Result<(), ParserError> {
        if self.current() == &token {
            self.advance();
            return Ok(());
        }
        Err(self.expected(what))
    }

    fn expected(&self, what: &str) -> ParserError {
        ParserError::Expected {
            pos: self.pos(),
            expected: what.to_string(),
            found: self.current().describe(),
        }
    }

    fn skip_newlines(&mut self) {
        while self.current() == &Token::Newline {
            self.advance();
        }
    }

    fn skip_separators(&mut self) {
        while matches!(
            self.current(),
            Token::Newline | Token::Comma | Token::Semicolon
        ) {
            self.advance();
        }
    }

    fn parse_document(&mut self) -> Result<Value, ParserError> {
        let pos = self.pos();
        let fields = self.parse_fields_until(&Token::Eof)?;
        Ok(Value::new(
            pos.clone(),
            ValueKind::Object(Object { pos, fields }),
        ))
    }

    fn parse_fields_until(&mut self, end: &Token) -> Result<Vec<Arc<Field>>, ParserError> {
        let mut fields = Vec::new();
        self.skip_separators();
        while self.current() != end && self.current() != &Token::Eof {
            fields.push(Arc::new(self.parse_field()?));
            if self.current() == end {
                break;
            }
            if !matches!(
                self.current(),
                Token::Newline | Token::Comma | Token::Semicolon
            ) {
                return Err(self.expected("field separator"));
            }
            self.skip_separators();
        }
        Ok(fields)
    }

    fn parse_field(&mut self) -> Result<Field, ParserError> {
        let pos = self.pos();
        match self.current() {
            Token::Let => {
                self.advance();
                let key = self.parse_static_key()?;
                self.expect(Token::Colon, "':'")?;
                let value = self.parse_value()?;
                Ok(Field {
                    pos,
                    key,
                    value: Some(value),
                    let_: true,
                    embedded: false,
                    if_field: None,
                    for_field: None,
                })
            }
            Token::If => {
                let if_field = self.parse_if_chain()?;
                Ok(Field {
                    pos,
                    key: Key::default(),
                    value: None,
                    let_: false,
                    embedded: false,
                    if_field: Some(if_field),
                    for_field: None,
                })
            }
            Token::For => {
                let for_field = self.parse_for()?;
                Ok(Field {
                    pos,
                    key: Key::default(),
                    value: None,
                    let_: false,
                    embedded: false,
                    if_field: None,
                    for_field: Some(for_field),
                })
            }
            Token::Ident(_) if self.peek() == &Token::Colon => {
                let key = self.parse_static_key()?;
                self.expect(Token::Colon, "':'")?;
                let value = self.parse_value()?;
                Ok(Field {
                    pos,
                    key,
                    value: Some(value),
                    let_: false,
                    embedded: false,
                    if_field: None,
                    for_field: None,
                })
            }
            Token::Str { .. } if self.peek() == &Token::Colon => {
                let key_pos = self.pos();
                let name = self.parse_string_literal()?;
                self.expect(Token::Colon, "':'")?;
                let value = self.parse_value()?;
                Ok(Field {
                    pos,
                    key: Key {
                        pos: key_pos,
                        name: Some(name),
                        is_match: false,
                    },
                    value: Some(value),
                    let_: false,
                    embedded: false,
                    if_field: None,
                    for_field: None,
                })
            }
            Token::LBracket if self.peek() == &Token::TildeEq => {
                let key_pos = self.pos();
                self.advance();
                self.advance();
                let name = self.parse_string_literal()?;
                self.expect(Token::RBracket, "']'")?;
                self.expect(Token::Colon, "':'")?;
                let value = self.parse_value()?;
                Ok(Field {
                    pos,
                    key: Key {
                        pos: key_pos,
                        name: Some(name),
                        is_match: true,
                    },
                    value: Some(value),
                    let_: false,
                    embedded: false,
                    if_field: None,
                    for_field: None,
                })
            }
            Token::LParen => {
                // `(expr): value` is a computed key; anything else falls back
                // to an embedded value
                let saved = self.index;
                if let Ok(field) = self.parse_computed_key_field(pos.clone()) {
                    return Ok(field);
                }
                self.index = saved;
                self.parse_embedded_field(pos)
            }
            _ => self.parse_embedded_field(pos),
        }
    }

    fn parse_computed_key_field(&mut self, pos: Position) -> Result<Field, ParserError> {
        let key_pos = self.pos();
        self.expect(Token::LParen, "'('")?;
        self.skip_newlines();
        let expr = self.parse_expression()?;
        self.skip_newlines();
        self.expect(Token::RParen, "')'")?;
        self.expect(Token::Colon, "':'")?;
        let value = self.parse_value()?;
        Ok(Field {
            pos,
            key: Key {
                pos: key_pos.clone(),
                name: Some(AmlString {
                    pos: key_pos,
                    parts: vec![StringPart::Expression(expr)],
                    multiline: false,
                }),
                is_match: false,
            },
            value: Some(value),
            let_: false,
            embedded: false,
            if_field: None,
            for_field: None,
        })
    }

    fn parse_embedded_field(&mut self, pos: Position) -> Result<Field, ParserError> {
        let value = self.parse_value()?;
        Ok(Field {
            pos,
            key: Key::default(),
            value: Some(value),
            let_: false,
            embedded: true,
            if_field: None,
            for_field: None,
        })
    }

    fn parse_static_key(&mut self) -> Result<Key, ParserError> {
        let pos = self.pos();
        let Token::Ident(name) = self.current().clone() else {
            return Err(self.expected("identifier"));
        };
        self.advance();
        Ok(Key {
            pos: pos.clone(),
            name: Some(AmlString {
                pos,
                parts: vec![StringPart::Literal(name)],
                multiline: false,
            }),
            is_match: false,
        })
    }

    fn parse_if_chain(&mut self) -> Result<If, ParserError> {
        let pos = self.pos();
        self.expect(Token::If, "'if'")?;
        let condition = self.parse_expression()?;
        let object = self.parse_brace_object()?;
        let else_field = if self.current() == &Token::Else {
            self.advance();
            if self.current() == &Token::If {
                Some(Box::new(self.parse_if_chain()?))
            } else {
                let else_pos = self.pos();
                let object = self.parse_brace_object()?;
                Some(Box::new(If {
                    pos: else_pos,
                    condition: None,
                    object,
                    else_field: None,
                }))
            }
        } else {
            None
        };
        Ok(If {
            pos,
            condition: Some(condition),
            object,
            else_field,
        })
    }

    fn parse_for(&mut self) -> Result<For, ParserError> {
        let pos = self.pos();
        self.expect(Token::For, "'for'")?;
        let first = self.parse_ident()?;
        let (index_var, value_var) = if self.current() == &Token::Comma {
            self.advance();
            (Some(first), self.parse_ident()?)
        } else {
            (None, first)
        };
        self.expect(Token::In, "'in'")?;
        let source = self.parse_expression()?;
        let object = self.parse_brace_object()?;
        let condition = if self.current() == &Token::If {
            self.advance();
            Some(self.parse_expression()?)
        } else {
            None
        };
        Ok(For {
            pos,
            index_var,
            value_var,
            source,
            object,
            condition,
        })
    }

    fn parse_ident(&mut self) -> Result<String, ParserError> {
        let Token::Ident(name) = self.current().clone() else {
            return Err(self.expected("identifier"));
        };
        self.advance();
        Ok(name)
    }

    fn parse_brace_object(&mut self) -> Result<Object, ParserError> {
        let pos = self.pos();
        self.expect(Token::LBrace, "'{'")?;
        let fields = self.parse_fields_until(&Token::RBrace)?;
        self.expect(Token::RBrace, "'}'")?;
        Ok(Object { pos, fields })
    }

    /// A value: an expression, collapsed back to the plain literal when it is
    /// nothing more than one.
    fn parse_value(&mut self) -> Result<Value, ParserError> {
        let pos = self.pos();
        let expr = self.parse_expression()?;
        Ok(simplify(pos, expr))
    }

    fn parse_expression(&mut self) -> Result<Expression, ParserError> {
        let pos = self.pos();
        let selector = self.parse_selector()?;
        let mut operators = Vec::new();
        while let Some(op) = binop_for(self.current()) {
            let op_pos = self.pos();
            self.advance();
            self.skip_newlines();
            let selector = self.parse_selector()?;
            operators.push(Operator {
                pos: op_pos,
                op,
                selector,
            });
        }
        Ok(Expression {
            pos,
            selector,
            operators,
        })
    }

    fn parse_selector(&mut self) -> Result<Selector, ParserError> {
        let pos = self.pos();
        let not = if self.current() == &Token::Bang {
            self.advance();
            true
        } else {
            false
        };

        let base = match self.current().clone() {
            Token::Ident(name) => {
                self.advance();
                SelectorBase::Identifier(name)
            }
            Token::True => {
                let p = self.pos();
                self.advance();
                SelectorBase::Value(Box::new(Value::new(p, ValueKind::Bool(true))))
            }
            Token::False => {
                let p = self.pos();
                self.advance();
                SelectorBase::Value(Box::new(Value::new(p, ValueKind::Bool(false))))
            }
            Token::Null => {
                let p = self.pos();
                self.advance();
                SelectorBase::Value(Box::new(Value::new(p, ValueKind::Null)))
            }
            Token::Number(text) => {
                let p = self.pos();
                self.advance();
                SelectorBase::Value(Box::new(Value::new(
                    p,
                    ValueKind::Number(Number::new(text)),
                )))
            }
            Token::Minus => {
                let p = self.pos();
                if let Token::Number(text) = self.peek().clone() {
                    self.advance();
                    self.advance();
                    SelectorBase::Value(Box::new(Value::new(
                        p,
                        ValueKind::Number(Number::new(format!("-{text}"))),
                    )))
                } else {
                    return Err(self.expected("number after '-'"));
                }
            }
            Token::Str { .. } => {
                let p = self.pos();
                let s = self.parse_string_literal()?;
                SelectorBase::Value(Box::new(Value::new(p, ValueKind::String(s))))
            }
            Token::LBracket => {
                let v = self.parse_array()?;
                SelectorBase::Value(Box::new(v))
            }
            Token::LBrace => {
                let p = self.pos();
                let object = self.parse_brace_object()?;
                SelectorBase::Value(Box::new(Value::new(p, ValueKind::Object(object))))
            }
            Token::LParen => {
                let _p = self.pos();
                self.advance();
                self.skip_newlines();
                let inner_pos = self.pos();
                let expr = self.parse_expression()?;
                self.skip_newlines();
                self.expect(Token::RParen, "')'")?;
                SelectorBase::Parens(Box::new(simplify(inner_pos, expr)))
            }
            _ => return Err(self.expected("value, identifier or '('")),
        };

        let mut lookups = Vec::new();
        loop {
            let lookup_pos = self.pos();
            match self.current() {
                Token::Dot => {
                    self.advance();
                    let name = self.parse_ident()?;
                    lookups.push(Lookup {
                        pos: lookup_pos,
                        kind: LookupKind::Dot(name),
                    });
                }
                Token::LBracket => {
                    self.advance();
                    self.skip_newlines();
                    let first = self.parse_expression()?;
                    if self.current() == &Token::Colon {
                        self.advance();
                        self.skip_newlines();
                        let second = self.parse_expression()?;
                        self.skip_newlines();
                        self.expect(Token::RBracket, "']'")?;
                        lookups.push(Lookup {
                            pos: lookup_pos,
                            kind: LookupKind::Slice(Box::new(first), Box::new(second)),
                        });
                    } else {
                        self.skip_newlines();
                        self.expect(Token::RBracket, "']'")?;
                        lookups.push(Lookup {
                            pos: lookup_pos,
                            kind: LookupKind::Index(Box::new(first)),
                        });
                    }
                }
                Token::LParen => {
                    let call = self.parse_call()?;
                    lookups.push(Lookup {
                        pos: lookup_pos,
                        kind: LookupKind::Call(call),
                    });
                }
                _ => break,
            }
        }

        Ok(Selector {
            pos,
            not,
            base,
            lookups,
        })
    }

    fn parse_call(&mut self) -> Result<Call, ParserError> {
        let pos = self.pos();
        self.expect(Token::LParen, "'('")?;
        self.skip_newlines();

        let mut positional = Vec::new();
        let mut named: Vec<Arc<Field>> = Vec::new();

        while self.current() != &Token::RParen {
            if matches!(self.current(), Token::Ident(_)) && self.peek() == &Token::Colon {
                let field_pos = self.pos();
                let key = self.parse_static_key()?;
                self.expect(Token::Colon, "':'")?;
                let value = self.parse_value()?;
                named.push(Arc::new(Field {
                    pos: field_pos,
                    key,
                    value: Some(value),
                    let_: false,
                    embedded: false,
                    if_field: None,
                    for_field: None,
                }));
            } else {
                positional.push(self.parse_value()?);
            }
            self.skip_newlines();
            if self.current() == &Token::Comma {
                self.advance();
                self.skip_newlines();
            } else {
                break;
            }
        }
        self.skip_newlines();
        self.expect(Token::RParen, "')'")?;

        Ok(Call {
            pos: pos.clone(),
            positional: if positional.is_empty() {
                None
            } else {
                Some(Arc::new(Array {
                    pos: pos.clone(),
                    values: positional,
                }))
            },
            named: if named.is_empty() {
                None
            } else {
                Some(Object { pos, fields: named })
            },
        })
    }

    fn parse_array(&mut self) -> Result<Value, ParserError> {
        let pos = self.pos();
        self.expect(Token::LBracket, "'['")?;
        self.skip_newlines();

        if self.current() == &Token::For {
            let for_field = self.parse_for()?;
            self.skip_newlines();
            self.expect(Token::RBracket, "']'")?;
            return Ok(Value::new(pos, ValueKind::Comprehension(Box::new(for_field))));
        }

        let mut values = Vec::new();
        while self.current() != &Token::RBracket {
            values.push(self.parse_value()?);
            self.skip_newlines();
            if self.current() == &Token::Comma {
                self.advance();
                self.skip_newlines();
            } else {
                break;
            }
        }
        self.skip_newlines();
        self.expect(Token::RBracket, "']'")?;
        Ok(Value::new(
            pos.clone(),
            ValueKind::Array(Arc::new(Array { pos, values })),
        ))
    }

    /// Convert the current string token into an AST string, parsing each
    /// interpolation hole as an expression.
    fn parse_string_literal(&mut self) -> Result<AmlString, ParserError> {
        let pos = self.pos();
        let Token::Str { parts, multiline } = self.current().clone() else {
            return Err(self.expected("string"));
        };
        self.advance();

        let mut ast_parts = Vec::new();
        for part in parts {
            match part {
                StrPart::Literal(text) => ast_parts.push(StringPart::Literal(text)),
                StrPart::Hole(tokens) => {
                    let mut sub = Parser::new(tokens);
                    let expr = sub.parse_expression()?;
                    if sub.current() != &Token::Eof {
                        return Err(sub.expected("end of interpolation"));
                    }
                    ast_parts.push(StringPart::Expression(expr));
                }
            }
        }
        Ok(AmlString {
            pos,
            parts: ast_parts,
            multiline,
        })
    }
}

fn simplify(pos: Position, expr: Expression) -> Value {
    if expr.operators.is_empty() && !expr.selector.not && expr.selector.lookups.is_empty() {
        if let SelectorBase::Value(v) = expr.selector.base {
            return *v;
        }
    }
    Value::new(pos, ValueKind::Expression(expr))
}

fn binop_for(token: &Token) -> Option<BinOp> {
    match token {
        Token::Star => Some(BinOp::Mul),
        Token::Slash => Some(BinOp::Div),
        Token::Plus => Some(BinOp::Add),
        Token::Minus => Some(BinOp::Sub),
        Token::EqEq => Some(BinOp::Eq),
        Token::Ne => Some(BinOp::Ne),
        Token::Lt => Some(BinOp::Lt),
        Token::Le => Some(BinOp::Le),
        Token::Gt => Some(BinOp::Gt),
        Token::Ge => Some(BinOp::Ge),
        Token::MatchOp => Some(BinOp::Match),
        Token::NotMatchOp => Some(BinOp::NotMatch),
        Token::AndAnd => Some(BinOp::And),
        Token::OrOr => Some(BinOp::Or),
        Token::Amp => Some(BinOp::Merge),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(input: &str) -> Value {
        parse("test.aml", input).unwrap()
    }

    fn fields(value: &Value) -> &Vec<Arc<Field>> {
        match &value.kind {
            ValueKind::Object(o) => &o.fields,
            other => panic!("expected object, got {other:?}"),
        }
    }

    fn key_name(field: &Field) -> &str {
        field
            .key
            .name
            .as_ref()
            .and_then(|n| n.as_literal())
            .unwrap_or("")
    }

    #[test]
    fn test_scalar_fields() {
        let v = doc("int: 4\nstring: \"hi\"\nbool: true\nnothing: null\nfloat: 4.5e2");
        let fields = fields(&v);
        assert_eq!(fields.len(), 5);
        assert_eq!(key_name(&fields[0]), "int");
        assert!(matches!(
            fields[0].value.as_ref().unwrap().kind,
            ValueKind::Number(_)
        ));
        assert!(matches!(
            fields[3].value.as_ref().unwrap().kind,
            ValueKind::Null
        ));
    }

    #[test]
    fn test_separators() {
        let v = doc("a: 1, b: 2; c: 3");
        assert_eq!(fields(&v).len(), 3);
    }

    #[test]
    fn test_nested_object_and_array() {
        let v = doc("obj: { a: 1, b: [1, 2, 3] }");
        let outer = fields(&v);
        let ValueKind::Object(inner) = &outer[0].value.as_ref().unwrap().kind else {
            panic!("expected object value");
        };
        assert_eq!(inner.fields.len(), 2);
        let ValueKind::Array(arr) = &inner.fields[1].value.as_ref().unwrap().kind else {
            panic!("expected array value");
        };
        assert_eq!(arr.values.len(), 3);
    }

    #[test]
    fn test_expression_chain() {
        let v = doc("x: 1 + 2 * 3 == 7 && true");
        let ValueKind::Expression(expr) = &fields(&v)[0].value.as_ref().unwrap().kind else {
            panic!("expected expression");
        };
        let ops: Vec<BinOp> = expr.operators.iter().map(|o| o.op).collect();
        assert_eq!(
            ops,
            vec![BinOp::Add, BinOp::Mul, BinOp::Eq, BinOp::And]
        );
    }

    #[test]
    fn test_selector_lookups() {
        let v = doc("x: a.b[0][1:2](1, n: 2)");
        let ValueKind::Expression(expr) = &fields(&v)[0].value.as_ref().unwrap().kind else {
            panic!("expected expression");
        };
        let kinds: Vec<&LookupKind> = expr.selector.lookups.iter().map(|l| &l.kind).collect();
        assert!(matches!(kinds[0], LookupKind::Dot(n) if n == "b"));
        assert!(matches!(kinds[1], LookupKind::Index(_)));
        assert!(matches!(kinds[2], LookupKind::Slice(_, _)));
        assert!(matches!(kinds[3], LookupKind::Call(_)));
    }

    #[test]
    fn test_string_interpolation() {
        let v = doc(r#"greeting: "hello, \(name)!""#);
        let ValueKind::String(s) = &fields(&v)[0].value.as_ref().unwrap().kind else {
            panic!("expected string");
        };
        assert_eq!(s.parts.len(), 3);
        assert!(matches!(&s.parts[0], StringPart::Literal(t) if t == "hello, "));
        assert!(matches!(&s.parts[1], StringPart::Expression(_)));
        assert!(matches!(&s.parts[2], StringPart::Literal(t) if t == "!"));
    }

    #[test]
    fn test_multiline_string() {
        let v = doc("text: \"\"\"\n\tline\n\t\"\"\"");
        let ValueKind::String(s) = &fields(&v)[0].value.as_ref().unwrap().kind else {
            panic!("expected string");
        };
        assert!(s.multiline);
    }

    #[test]
    fn test_match_key() {
        let v = doc(r#"[~="^k[0-9]+$"]: "hit""#);
        let field = &fields(&v)[0];
        assert!(field.key.is_match);
    }

    #[test]
    fn test_computed_key() {
        let v = doc("(k): 1");
        let field = &fields(&v)[0];
        let name = field.key.name.as_ref().unwrap();
        assert!(matches!(&name.parts[0], StringPart::Expression(_)));
    }

    #[test]
    fn test_let_and_embedded() {
        let v = doc("let hidden: 1\nbase");
        let fields = fields(&v);
        assert!(fields[0].let_);
        assert!(fields[1].embedded);
    }

    #[test]
    fn test_if_else_chain() {
        let v = doc("if x > 1 { a: 1 } else if x > 0 { a: 2 } else { a: 3 }");
        let field = &fields(&v)[0];
        let if_field = field.if_field.as_ref().unwrap();
        let else_if = if_field.else_field.as_ref().unwrap();
        assert!(else_if.condition.is_some());
        let final_else = else_if.else_field.as_ref().unwrap();
        assert!(final_else.condition.is_none());
    }

    #[test]
    fn test_for_field_and_comprehension() {
        let v = doc("for k, v in m { (k): v }\nxs: [for x in list { v: x } if x > 1]");
        let fields = fields(&v);
        let for_field = fields[0].for_field.as_ref().unwrap();
        assert_eq!(for_field.index_var.as_deref(), Some("k"));
        assert_eq!(for_field.value_var, "v");
        let ValueKind::Comprehension(comp) = &fields[1].value.as_ref().unwrap().kind else {
            panic!("expected comprehension");
        };
        assert!(comp.index_var.is_none());
        assert!(comp.condition.is_some());
    }

    #[test]
    fn test_comments_are_skipped() {
        let v = doc("// leading\na: 1 // trailing\n// done");
        assert_eq!(fields(&v).len(), 1);
    }

    #[test]
    fn test_number_suffix_tokens() {
        let v = doc("size: 10mi");
        assert!(matches!(
            fields(&v)[0].value.as_ref().unwrap().kind,
            ValueKind::Number(_)
        ));
        assert!(parse("test.aml", "size: 10xx").is_err());
    }

    #[test]
    fn test_missing_separator_is_an_error() {
        assert!(parse("test.aml", "a: 1 b: 2").is_err());
    }

    #[test]
    fn test_unclosed_string() {
        let err = parse("test.aml", "a: \"oops").unwrap_err();
        assert!(err.to_string().contains("unclosed string"));
    }
}
