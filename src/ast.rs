//! A minimal, owned representation of a parsed query/fragment/mutation
//! document, plus a compact recursive-descent parser for it.
//!
//! The cache's core (the planner, normalizer and materializer) never reads
//! raw query text: per the data-plane contract, a document is always
//! already parsed before it reaches [`crate::plan::Plan::compile`]. This
//! module is the "AST builder" collaborator referenced by that contract,
//! kept in-crate so tests and the client facade have something to build
//! plans from without pulling in a full GraphQL toolchain.

use std::fmt;
use std::iter::Peekable;
use std::str::CharIndices;

use indexmap::IndexMap;

/// A GraphQL value as it appears in source text: either a literal or a
/// reference to a variable, resolved later against a variables map.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Int(i64),
    Float(f64),
    String(String),
    Enum(String),
    List(Vec<Value>),
    Object(IndexMap<String, Value>),
    Variable(String),
}

impl Value {
    /// Resolves this value against a variables map, returning `None` when
    /// the value is (transitively) an undefined variable reference. A
    /// variable bound to an explicit JSON `null` resolves to `Value::Null`.
    pub fn resolve(&self, vars: &Variables) -> Option<serde_json::Value> {
        match self {
            Value::Null => Some(serde_json::Value::Null),
            Value::Boolean(b) => Some(serde_json::Value::Bool(*b)),
            Value::Int(i) => Some(serde_json::Value::Number((*i).into())),
            Value::Float(f) => serde_json::Number::from_f64(*f).map(serde_json::Value::Number),
            Value::String(s) | Value::Enum(s) => Some(serde_json::Value::String(s.clone())),
            Value::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(item.resolve(vars)?);
                }
                Some(serde_json::Value::Array(out))
            }
            Value::Object(fields) => {
                let mut out = serde_json::Map::new();
                for (k, v) in fields {
                    if let Some(resolved) = v.resolve(vars) {
                        out.insert(k.clone(), resolved);
                    }
                }
                Some(serde_json::Value::Object(out))
            }
            Value::Variable(name) => vars.get(name).cloned(),
        }
    }

    /// Names of every variable transitively referenced by this value.
    pub fn collect_variables(&self, out: &mut Vec<String>) {
        match self {
            Value::Variable(name) => out.push(name.clone()),
            Value::List(items) => items.iter().for_each(|v| v.collect_variables(out)),
            Value::Object(fields) => fields.values().for_each(|v| v.collect_variables(out)),
            _ => {}
        }
    }
}

/// Variables supplied for one execution. A key absent from the map is
/// "undefined"; a key present with `serde_json::Value::Null` is explicit null.
pub type Variables = IndexMap<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Directive {
    pub name: String,
    pub arguments: Vec<(String, Value)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Field(Field),
    FragmentSpread(FragmentSpread),
    InlineFragment(InlineFragment),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub alias: Option<String>,
    pub name: String,
    pub arguments: Vec<(String, Value)>,
    pub directives: Vec<Directive>,
    pub selection_set: Vec<Selection>,
}

impl Field {
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FragmentSpread {
    pub name: String,
    pub directives: Vec<Directive>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InlineFragment {
    pub type_condition: Option<String>,
    pub directives: Vec<Directive>,
    pub selection_set: Vec<Selection>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationType {
    Query,
    Mutation,
    Subscription,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationType::Query => "query",
            OperationType::Mutation => "mutation",
            OperationType::Subscription => "subscription",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableDefinition {
    pub name: String,
    pub type_name: String,
    pub default_value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperationDefinition {
    pub operation_type: OperationType,
    pub name: Option<String>,
    pub variable_definitions: Vec<VariableDefinition>,
    pub directives: Vec<Directive>,
    pub selection_set: Vec<Selection>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FragmentDefinition {
    pub name: String,
    pub type_condition: String,
    pub directives: Vec<Directive>,
    pub selection_set: Vec<Selection>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    pub operations: Vec<OperationDefinition>,
    pub fragments: IndexMap<String, FragmentDefinition>,
}

impl Document {
    /// Returns the sole operation, or the one matching `name` when more than
    /// one is present. Mirrors the "optional fragment/operation name" input
    /// the planner accepts.
    pub fn get_operation(&self, name: Option<&str>) -> Result<&OperationDefinition, DocumentError> {
        match name {
            Some(n) => self
                .operations
                .iter()
                .find(|op| op.name.as_deref() == Some(n))
                .ok_or_else(|| DocumentError::UnknownOperation(n.to_owned())),
            None => match self.operations.as_slice() {
                [single] => Ok(single),
                [] => Err(DocumentError::NoOperations),
                _ => Err(DocumentError::AmbiguousOperation),
            },
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("unknown operation `{0}`")]
    UnknownOperation(String),
    #[error("document has no operations")]
    NoOperations,
    #[error("multiple operations present and none named")]
    AmbiguousOperation,
    #[error("unknown fragment `{0}`")]
    UnknownFragment(String),
    #[error("parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },
}

/// Parses a query/mutation/subscription/fragment document.
pub fn parse_document(source: &str) -> Result<Document, DocumentError> {
    Parser::new(source).parse_document()
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    Spread,
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Colon,
    Dollar,
    At,
    Bang,
    Equals,
    Eof,
}

struct Lexer<'a> {
    src: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            chars: src.char_indices().peekable(),
        }
    }

    fn skip_ignored(&mut self) {
        loop {
            match self.chars.peek() {
                Some((_, c)) if c.is_whitespace() || *c == ',' => {
                    self.chars.next();
                }
                Some((_, '#')) => {
                    while let Some((_, c)) = self.chars.peek() {
                        if *c == '\n' {
                            break;
                        }
                        self.chars.next();
                    }
                }
                _ => break,
            }
        }
    }

    fn next_token(&mut self) -> Result<(usize, Token), DocumentError> {
        self.skip_ignored();
        let Some(&(start, c)) = self.chars.peek() else {
            return Ok((self.src.len(), Token::Eof));
        };
        if c == '_' || c.is_alphabetic() {
            let mut end = start;
            while let Some(&(i, c)) = self.chars.peek() {
                if c == '_' || c.is_alphanumeric() {
                    end = i + c.len_utf8();
                    self.chars.next();
                } else {
                    break;
                }
            }
            return Ok((start, Token::Name(self.src[start..end].to_owned())));
        }
        if c == '-' || c.is_ascii_digit() {
            return self.lex_number(start);
        }
        if c == '"' {
            return self.lex_string(start);
        }
        self.chars.next();
        let tok = match c {
            '{' => Token::LBrace,
            '}' => Token::RBrace,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            ':' => Token::Colon,
            '$' => Token::Dollar,
            '@' => Token::At,
            '!' => Token::Bang,
            '=' => Token::Equals,
            '.' => {
                for _ in 0..2 {
                    match self.chars.next() {
                        Some((_, '.')) => {}
                        _ => {
                            return Err(DocumentError::Parse {
                                offset: start,
                                message: "expected `...`".to_owned(),
                            });
                        }
                    }
                }
                Token::Spread
            }
            other => {
                return Err(DocumentError::Parse {
                    offset: start,
                    message: format!("unexpected character `{other}`"),
                });
            }
        };
        Ok((start, tok))
    }

    fn lex_number(&mut self, start: usize) -> Result<(usize, Token), DocumentError> {
        let mut end = start;
        let mut is_float = false;
        if matches!(self.chars.peek(), Some((_, '-'))) {
            end += 1;
            self.chars.next();
        }
        while let Some(&(i, c)) = self.chars.peek() {
            if c.is_ascii_digit() {
                end = i + 1;
                self.chars.next();
            } else {
                break;
            }
        }
        if matches!(self.chars.peek(), Some((_, '.'))) {
            is_float = true;
            end += 1;
            self.chars.next();
            while let Some(&(i, c)) = self.chars.peek() {
                if c.is_ascii_digit() {
                    end = i + 1;
                    self.chars.next();
                } else {
                    break;
                }
            }
        }
        if matches!(self.chars.peek(), Some((_, 'e' | 'E'))) {
            is_float = true;
            end += 1;
            self.chars.next();
            if matches!(self.chars.peek(), Some((_, '+' | '-'))) {
                end += 1;
                self.chars.next();
            }
            while let Some(&(i, c)) = self.chars.peek() {
                if c.is_ascii_digit() {
                    end = i + 1;
                    self.chars.next();
                } else {
                    break;
                }
            }
        }
        let text = &self.src[start..end];
        if is_float {
            text.parse::<f64>()
                .map(|f| (start, Token::Float(f)))
                .map_err(|e| DocumentError::Parse { offset: start, message: e.to_string() })
        } else {
            text.parse::<i64>()
                .map(|i| (start, Token::Int(i)))
                .map_err(|e| DocumentError::Parse { offset: start, message: e.to_string() })
        }
    }

    fn lex_string(&mut self, start: usize) -> Result<(usize, Token), DocumentError> {
        self.chars.next(); // opening quote
        let mut out = String::new();
        loop {
            match self.chars.next() {
                Some((_, '"')) => break,
                Some((_, '\\')) => match self.chars.next() {
                    Some((_, 'n')) => out.push('\n'),
                    Some((_, 't')) => out.push('\t'),
                    Some((_, 'r')) => out.push('\r'),
                    Some((_, '"')) => out.push('"'),
                    Some((_, '\\')) => out.push('\\'),
                    Some((_, '/')) => out.push('/'),
                    Some((_, other)) => out.push(other),
                    None => {
                        return Err(DocumentError::Parse {
                            offset: start,
                            message: "unterminated string escape".to_owned(),
                        });
                    }
                },
                Some((_, c)) => out.push(c),
                None => {
                    return Err(DocumentError::Parse {
                        offset: start,
                        message: "unterminated string literal".to_owned(),
                    });
                }
            }
        }
        Ok((start, Token::Str(out)))
    }
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    lookahead: (usize, Token),
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        let mut lexer = Lexer::new(src);
        let lookahead = lexer.next_token().unwrap_or((src.len(), Token::Eof));
        Self { lexer, lookahead }
    }

    fn bump(&mut self) -> Result<Token, DocumentError> {
        let next = self.lexer.next_token()?;
        Ok(std::mem::replace(&mut self.lookahead, next).1)
    }

    fn peek(&self) -> &Token {
        &self.lookahead.1
    }

    fn offset(&self) -> usize {
        self.lookahead.0
    }

    fn error(&self, message: impl Into<String>) -> DocumentError {
        DocumentError::Parse { offset: self.offset(), message: message.into() }
    }

    fn expect_name(&mut self) -> Result<String, DocumentError> {
        match self.bump()? {
            Token::Name(n) => Ok(n),
            other => Err(self.error(format!("expected name, found {other:?}"))),
        }
    }

    fn eat(&mut self, expected: &Token) -> Result<bool, DocumentError> {
        if self.peek() == expected {
            self.bump()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), DocumentError> {
        if self.bump()? == expected {
            Ok(())
        } else {
            Err(self.error(format!("expected {expected:?}")))
        }
    }

    fn parse_document(&mut self) -> Result<Document, DocumentError> {
        let mut document = Document::default();
        while self.peek() != &Token::Eof {
            match self.peek().clone() {
                Token::Name(kw) if kw == "fragment" => {
                    self.bump()?;
                    let def = self.parse_fragment_definition()?;
                    document.fragments.insert(def.name.clone(), def);
                }
                Token::Name(kw) if ["query", "mutation", "subscription"].contains(&kw.as_str()) => {
                    self.bump()?;
                    let op_type = match kw.as_str() {
                        "query" => OperationType::Query,
                        "mutation" => OperationType::Mutation,
                        _ => OperationType::Subscription,
                    };
                    document.operations.push(self.parse_operation(op_type)?);
                }
                Token::LBrace => {
                    document.operations.push(self.parse_operation(OperationType::Query)?);
                }
                other => return Err(self.error(format!("unexpected token {other:?} at top level"))),
            }
        }
        Ok(document)
    }

    fn parse_operation(&mut self, operation_type: OperationType) -> Result<OperationDefinition, DocumentError> {
        let name = if let Token::Name(n) = self.peek().clone() {
            self.bump()?;
            Some(n)
        } else {
            None
        };
        let variable_definitions = if self.eat(&Token::LParen)? {
            self.parse_variable_definitions()?
        } else {
            Vec::new()
        };
        let directives = self.parse_directives()?;
        let selection_set = self.parse_selection_set()?;
        Ok(OperationDefinition { operation_type, name, variable_definitions, directives, selection_set })
    }

    fn parse_variable_definitions(&mut self) -> Result<Vec<VariableDefinition>, DocumentError> {
        let mut out = Vec::new();
        while !self.eat(&Token::RParen)? {
            self.expect(Token::Dollar)?;
            let name = self.expect_name()?;
            self.expect(Token::Colon)?;
            let type_name = self.parse_type_ref()?;
            let default_value = if self.eat(&Token::Equals)? {
                Some(self.parse_value()?)
            } else {
                None
            };
            out.push(VariableDefinition { name, type_name, default_value });
        }
        Ok(out)
    }

    fn parse_type_ref(&mut self) -> Result<String, DocumentError> {
        let mut rendered = if self.eat(&Token::LBracket)? {
            let inner = self.parse_type_ref()?;
            self.expect(Token::RBracket)?;
            format!("[{inner}]")
        } else {
            self.expect_name()?
        };
        if self.eat(&Token::Bang)? {
            rendered.push('!');
        }
        Ok(rendered)
    }

    fn parse_fragment_definition(&mut self) -> Result<FragmentDefinition, DocumentError> {
        let name = self.expect_name()?;
        let on = self.expect_name()?;
        if on != "on" {
            return Err(self.error("expected `on` in fragment definition"));
        }
        let type_condition = self.expect_name()?;
        let directives = self.parse_directives()?;
        let selection_set = self.parse_selection_set()?;
        Ok(FragmentDefinition { name, type_condition, directives, selection_set })
    }

    fn parse_directives(&mut self) -> Result<Vec<Directive>, DocumentError> {
        let mut out = Vec::new();
        while self.eat(&Token::At)? {
            let name = self.expect_name()?;
            let arguments = if self.eat(&Token::LParen)? {
                self.parse_arguments()?
            } else {
                Vec::new()
            };
            out.push(Directive { name, arguments });
        }
        Ok(out)
    }

    fn parse_arguments(&mut self) -> Result<Vec<(String, Value)>, DocumentError> {
        let mut out = Vec::new();
        while !self.eat(&Token::RParen)? {
            let name = self.expect_name()?;
            self.expect(Token::Colon)?;
            let value = self.parse_value()?;
            out.push((name, value));
        }
        Ok(out)
    }

    fn parse_value(&mut self) -> Result<Value, DocumentError> {
        match self.bump()? {
            Token::Dollar => Ok(Value::Variable(self.expect_name()?)),
            Token::Int(i) => Ok(Value::Int(i)),
            Token::Float(f) => Ok(Value::Float(f)),
            Token::Str(s) => Ok(Value::String(s)),
            Token::Name(n) => Ok(match n.as_str() {
                "true" => Value::Boolean(true),
                "false" => Value::Boolean(false),
                "null" => Value::Null,
                _ => Value::Enum(n),
            }),
            Token::LBracket => {
                let mut items = Vec::new();
                while self.peek() != &Token::RBracket {
                    items.push(self.parse_value()?);
                }
                self.bump()?;
                Ok(Value::List(items))
            }
            Token::LBrace => {
                let mut fields = IndexMap::new();
                while self.peek() != &Token::RBrace {
                    let name = self.expect_name()?;
                    self.expect(Token::Colon)?;
                    let value = self.parse_value()?;
                    fields.insert(name, value);
                }
                self.bump()?;
                Ok(Value::Object(fields))
            }
            other => Err(self.error(format!("expected value, found {other:?}"))),
        }
    }

    fn parse_selection_set(&mut self) -> Result<Vec<Selection>, DocumentError> {
        self.expect(Token::LBrace)?;
        let mut items = Vec::new();
        while !self.eat(&Token::RBrace)? {
            items.push(self.parse_selection()?);
        }
        Ok(items)
    }

    fn parse_selection(&mut self) -> Result<Selection, DocumentError> {
        if self.eat(&Token::Spread)? {
            if let Token::Name(n) = self.peek().clone() {
                if n == "on" {
                    self.bump()?;
                    let type_condition = Some(self.expect_name()?);
                    let directives = self.parse_directives()?;
                    let selection_set = self.parse_selection_set()?;
                    return Ok(Selection::InlineFragment(InlineFragment { type_condition, directives, selection_set }));
                }
                self.bump()?;
                let directives = self.parse_directives()?;
                return Ok(Selection::FragmentSpread(FragmentSpread { name: n, directives }));
            }
            let directives = self.parse_directives()?;
            let selection_set = self.parse_selection_set()?;
            return Ok(Selection::InlineFragment(InlineFragment { type_condition: None, directives, selection_set }));
        }

        let first = self.expect_name()?;
        let (alias, name) = if self.eat(&Token::Colon)? {
            (Some(first), self.expect_name()?)
        } else {
            (None, first)
        };
        let arguments = if self.eat(&Token::LParen)? { self.parse_arguments()? } else { Vec::new() };
        let directives = self.parse_directives()?;
        let selection_set = if self.peek() == &Token::LBrace { self.parse_selection_set()? } else { Vec::new() };
        Ok(Selection::Field(Field { alias, name, arguments, directives, selection_set }))
    }
}
