//! SPICE netlist parser.
//!
//! The tokenizer consumes raw text and produces a stream of tokens with
//! logical-line boundaries already resolved: `+` line continuations are
//! unwrapped, `*` full-line and `$` trailing comments are dropped, and
//! double-quoted parameter expressions survive as single tokens (with
//! internal whitespace removed). The parser assembles tokens into one
//! statement per logical line.

pub mod conv;

use arcstr::ArcStr;
use nom::bytes::complete::{take_till, take_while};
use thiserror::Error;

/// An error arising from reading a SPICE netlist.
#[derive(Debug, Error)]
pub enum SpiceError {
    /// The input is not well-formed SPICE text.
    #[error("syntax error at line {line}: {message}")]
    Syntax {
        /// The physical line the error was detected on.
        line: usize,
        /// What went wrong.
        message: String,
    },
    /// A statement this reader does not understand.
    #[error("unsupported statement at line {line}: `{stmt}`")]
    Unsupported {
        /// The physical line of the statement.
        line: usize,
        /// The offending statement's first token.
        stmt: String,
    },
    /// A database construction call failed.
    #[error(transparent)]
    Db(#[from] cktdb::Error),
}

/// A SPICE token.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Token {
    /// A directive starting with a leading dot, e.g. `.subckt`.
    ///
    /// Case is preserved from the input; no conversion is made.
    Directive(String),
    /// An identifier, net name, or parameter value.
    Ident(String),
    /// An equal sign (`=`).
    Equals,
    /// A logical line end.
    LineEnd,
}

#[derive(Copy, Clone, Default, Eq, PartialEq, Hash, Debug)]
enum TokState {
    /// Between logical lines.
    #[default]
    Init,
    /// Inside a logical line.
    Line,
}

#[inline]
fn is_newline(c: char) -> bool {
    c == '\n' || c == '\r'
}

#[inline]
fn is_space(c: char) -> bool {
    c == ' ' || c == '\t'
}

#[inline]
fn is_comment(c: char) -> bool {
    c == '*' || c == '$'
}

#[inline]
fn is_special(c: char) -> bool {
    c.is_whitespace() || c == '=' || c == '"' || is_comment(c)
}

pub(crate) struct Tokenizer<'a> {
    rem: &'a str,
    state: TokState,
    line: usize,
    /// Set when a trailing comment was seen on the current logical line;
    /// a continuation after a comment is invalid.
    comment_in_line: bool,
}

impl<'a> Tokenizer<'a> {
    pub(crate) fn new(data: &'a str) -> Self {
        Self {
            rem: data,
            state: TokState::Init,
            line: 1,
            comment_in_line: false,
        }
    }

    /// The current physical line, 1-based.
    pub(crate) fn line(&self) -> usize {
        self.line
    }

    pub(crate) fn get(&mut self) -> Result<Option<Token>, SpiceError> {
        loop {
            self.take_ws();
            let c = match self.peek() {
                Some(c) => c,
                None => {
                    if self.state == TokState::Line {
                        // at EOF with an unterminated logical line
                        self.state = TokState::Init;
                        self.comment_in_line = false;
                        return Ok(Some(Token::LineEnd));
                    }
                    return Ok(None);
                }
            };
            if c == '=' {
                self.take1();
                return Ok(Some(Token::Equals));
            }
            match self.state {
                TokState::Init => {
                    if is_comment(c) {
                        self.take_until_newline();
                    } else if is_newline(c) {
                        self.take1();
                    } else if c == '+' {
                        return Err(self.err("invalid line continuation"));
                    } else {
                        self.state = TokState::Line;
                    }
                }
                TokState::Line => {
                    if is_newline(c) {
                        self.take1();
                        self.take_ws();
                        if self.peek() == Some('+') {
                            if self.comment_in_line {
                                return Err(self.err("invalid line continuation"));
                            }
                            // the next physical line continues this one
                        } else {
                            self.state = TokState::Init;
                            self.comment_in_line = false;
                            return Ok(Some(Token::LineEnd));
                        }
                    } else if c == '+' {
                        self.take1();
                    } else if is_comment(c) {
                        self.comment_in_line = true;
                        self.take_until_newline();
                    } else if c == '.' {
                        let word = self.take_ident()?;
                        return Ok(Some(Token::Directive(word)));
                    } else {
                        let word = self.take_ident()?;
                        return Ok(Some(Token::Ident(word)));
                    }
                }
            }
        }
    }

    fn err(&self, message: impl Into<String>) -> SpiceError {
        SpiceError::Syntax {
            line: self.line,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.rem.chars().next()
    }

    fn take1(&mut self) -> Option<char> {
        let c = self.rem.chars().next()?;
        self.rem = &self.rem[c.len_utf8()..];
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn take_ws(&mut self) {
        let (rest, _) = take_while::<_, &str, ()>(is_space)(self.rem).unwrap();
        self.rem = rest;
    }

    fn take_until_newline(&mut self) {
        let (rest, _) = take_till::<_, &str, ()>(is_newline)(self.rem).unwrap();
        self.rem = rest;
    }

    /// Takes one token, keeping double-quoted segments intact (with
    /// internal whitespace removed, so quoted expressions stay one token).
    fn take_ident(&mut self) -> Result<String, SpiceError> {
        let mut out = String::new();
        loop {
            match self.peek() {
                Some('"') => {
                    out.push('"');
                    self.take1();
                    loop {
                        match self.take1() {
                            Some('"') => {
                                out.push('"');
                                break;
                            }
                            Some(c) if is_newline(c) => {
                                return Err(self.err("unterminated quoted expression"))
                            }
                            Some(c) if c.is_whitespace() => {}
                            Some(c) => out.push(c),
                            None => return Err(self.err("unterminated quoted expression")),
                        }
                    }
                }
                Some(c) if !is_special(c) => {
                    let (rest, tok) = take_till::<_, &str, ()>(is_special)(self.rem).unwrap();
                    self.rem = rest;
                    out.push_str(tok);
                }
                _ => break,
            }
        }
        Ok(out)
    }
}

/// One statement per logical line of a SPICE netlist.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Stmt {
    /// A `.subckt` declaration opening a cell scope.
    Subckt {
        /// The subcircuit name.
        name: ArcStr,
        /// The declared port names, in order.
        ports: Vec<ArcStr>,
        /// Default parameters declared on the `.subckt` line.
        params: Vec<(ArcStr, ArcStr)>,
    },
    /// `.ends`, closing the current cell scope.
    Ends,
    /// A `.macromodel` declaration opening a prim scope.
    Macromodel {
        /// The model name.
        name: ArcStr,
        /// The device-type tag.
        device_type: ArcStr,
        /// Declared port names; empty means the MOS default `s g d b`.
        ports: Vec<ArcStr>,
        /// Default parameters declared on the `.macromodel` line.
        params: Vec<(ArcStr, ArcStr)>,
    },
    /// `.endmacromodel`, closing the current prim scope.
    EndMacromodel,
    /// A `.param` line adding parameters to the current scope.
    Param {
        /// The declared `(name, value)` pairs, in order.
        params: Vec<(ArcStr, ArcStr)>,
    },
    /// An element card.
    Card(Card),
}

/// An element card.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Card {
    /// A MOS device card: `name s g d b model [k=v...]`.
    Mos {
        /// The instance name, including the `m` prefix.
        name: ArcStr,
        /// Source net.
        s: ArcStr,
        /// Gate net.
        g: ArcStr,
        /// Drain net.
        d: ArcStr,
        /// Bulk net.
        b: ArcStr,
        /// The referenced model name.
        model: ArcStr,
        /// Instance parameters, in order.
        params: Vec<(ArcStr, ArcStr)>,
    },
    /// A capacitor card: `name plus minus value`.
    Cap {
        /// The instance name, including the `c` prefix.
        name: ArcStr,
        /// Positive terminal net.
        pos: ArcStr,
        /// Negative terminal net.
        neg: ArcStr,
        /// The capacitance value.
        value: ArcStr,
    },
    /// A subcircuit instance card: `xname net... ref [k=v...]`.
    Subcircuit {
        /// The instance name, with the `x` prefix stripped.
        name: ArcStr,
        /// Connected nets, in positional order.
        nets: Vec<ArcStr>,
        /// The referenced subcircuit (or macromodel) name.
        refname: ArcStr,
        /// Instance parameters, in order.
        params: Vec<(ArcStr, ArcStr)>,
    },
}

pub(crate) struct Parser<'a> {
    tok: Tokenizer<'a>,
    buffer: Vec<Token>,
    stmt_line: usize,
}

impl<'a> Parser<'a> {
    pub(crate) fn new(data: &'a str) -> Self {
        Self {
            tok: Tokenizer::new(data),
            buffer: Vec::new(),
            stmt_line: 1,
        }
    }

    /// The physical line the current statement started on.
    pub(crate) fn line(&self) -> usize {
        self.stmt_line
    }

    pub(crate) fn next_stmt(&mut self) -> Result<Option<Stmt>, SpiceError> {
        loop {
            match self.tok.get()? {
                Some(Token::LineEnd) => {
                    if !self.buffer.is_empty() {
                        let stmt = self.parse_buffer();
                        self.buffer.clear();
                        match stmt? {
                            Some(stmt) => return Ok(Some(stmt)),
                            None => continue,
                        }
                    }
                }
                Some(token) => {
                    if self.buffer.is_empty() {
                        self.stmt_line = self.tok.line();
                    }
                    self.buffer.push(token);
                }
                None => return Ok(None),
            }
        }
    }

    fn syntax(&self, message: impl Into<String>) -> SpiceError {
        SpiceError::Syntax {
            line: self.stmt_line,
            message: message.into(),
        }
    }

    fn ident_at(&self, i: usize) -> Result<ArcStr, SpiceError> {
        match self.buffer.get(i) {
            Some(Token::Ident(s)) | Some(Token::Directive(s)) => Ok(ArcStr::from(s.as_str())),
            other => Err(self.syntax(format!("expected identifier, found {other:?}"))),
        }
    }

    /// Splits the buffered line into positional arguments and `k=v` pairs.
    fn split_args(&self) -> Result<(Vec<ArcStr>, Vec<(ArcStr, ArcStr)>), SpiceError> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        let mut args_done = false;
        let mut i = 0;
        while i < self.buffer.len() {
            if matches!(self.buffer.get(i + 1), Some(Token::Equals)) {
                let k = self.ident_at(i)?;
                let v = self
                    .ident_at(i + 2)
                    .map_err(|_| self.syntax(format!("missing parameter value: {k}=?")))?;
                kwargs.push((k, v));
                args_done = true;
                i += 3;
            } else if matches!(self.buffer[i], Token::Equals) {
                return Err(self.syntax("unexpected `=`"));
            } else {
                if args_done {
                    return Err(self.syntax(format!("unexpected token at position {i}")));
                }
                args.push(self.ident_at(i)?);
                i += 1;
            }
        }
        Ok((args, kwargs))
    }

    fn parse_buffer(&self) -> Result<Option<Stmt>, SpiceError> {
        let (args, params) = self.split_args()?;
        let first = match args.first() {
            Some(first) => first.clone(),
            None => return Err(self.syntax("statement with no leading identifier")),
        };

        if let Some(directive) = first.strip_prefix('.') {
            let stmt = match directive.to_ascii_lowercase().as_str() {
                "subckt" => {
                    let name = self
                        .require(args.get(1), "missing subcircuit name")?
                        .clone();
                    Stmt::Subckt {
                        name,
                        ports: args[2..].to_vec(),
                        params,
                    }
                }
                "ends" => Stmt::Ends,
                "macromodel" => {
                    let name = self.require(args.get(1), "missing macromodel name")?.clone();
                    let device_type = self
                        .require(args.get(2), "missing macromodel type")?
                        .clone();
                    Stmt::Macromodel {
                        name,
                        device_type,
                        ports: args[3..].to_vec(),
                        params,
                    }
                }
                "endmacromodel" => Stmt::EndMacromodel,
                "param" => Stmt::Param { params },
                _ => {
                    return Err(SpiceError::Unsupported {
                        line: self.stmt_line,
                        stmt: first.to_string(),
                    })
                }
            };
            return Ok(Some(stmt));
        }

        let kind = first.chars().next().unwrap().to_ascii_lowercase();
        let card = match kind {
            'm' => {
                if args.len() < 6 {
                    return Err(self.syntax("MOS card requires `name s g d b model`"));
                }
                Card::Mos {
                    name: args[0].clone(),
                    s: args[1].clone(),
                    g: args[2].clone(),
                    d: args[3].clone(),
                    b: args[4].clone(),
                    model: args[5].clone(),
                    params,
                }
            }
            'c' => {
                if args.len() != 4 {
                    return Err(self.syntax("capacitor card requires `name plus minus value`"));
                }
                Card::Cap {
                    name: args[0].clone(),
                    pos: args[1].clone(),
                    neg: args[2].clone(),
                    value: args[3].clone(),
                }
            }
            'x' => {
                if args.len() < 2 {
                    return Err(self.syntax("instance card requires `xname ref`"));
                }
                Card::Subcircuit {
                    name: ArcStr::from(&first[1..]),
                    nets: args[1..args.len() - 1].to_vec(),
                    refname: args[args.len() - 1].clone(),
                    params,
                }
            }
            'r' => {
                tracing::warn!(line = self.stmt_line, "ignoring resistor card");
                return Ok(None);
            }
            _ => {
                return Err(SpiceError::Unsupported {
                    line: self.stmt_line,
                    stmt: first.to_string(),
                })
            }
        };
        Ok(Some(Stmt::Card(card)))
    }

    fn require<'t, T>(&self, value: Option<&'t T>, message: &str) -> Result<&'t T, SpiceError> {
        value.ok_or_else(|| self.syntax(message))
    }
}
