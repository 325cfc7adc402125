//! Lexical checks on snippet source before it reaches the toolchain.
//!
//! This is not a C parser. It only guarantees that the snippet stays inside
//! the function body it is pasted into: delimiters balance, the body is never
//! closed early and no preprocessor directive sneaks in. Everything else is
//! left to the C compiler.

use std::borrow::Cow;

use crate::error::{JitError, Result};

/// How the snippet yields its value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnippetKind {
    /// Statements with explicit `return`s.
    Statements,
    /// A bare expression; its value is returned.
    Expression,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Code,
    LineComment,
    BlockComment,
    Str,
    Char,
}

struct Cursor {
    line: usize,
    col: usize,
}

impl Cursor {
    fn error(&self, message: impl AsRef<str>) -> JitError {
        JitError::compile(format!("snippet:{}:{}: {}", self.line, self.col, message.as_ref()))
    }
}

/// Punctuator spelled by the digraph `first` `second`, if any.
fn digraph(first: char, second: Option<&char>) -> Option<char> {
    match (first, second?) {
        ('<', '%') => Some('{'),
        ('%', '>') => Some('}'),
        ('<', ':') => Some('['),
        (':', '>') => Some(']'),
        ('%', ':') => Some('#'),
        _ => None,
    }
}

fn closing(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

/// Validate `source` and classify it.
pub fn check(source: &str) -> Result<SnippetKind> {
    let mut state = State::Code;
    let mut stack: Vec<(char, usize, usize)> = Vec::new();
    let mut cursor = Cursor { line: 1, col: 0 };
    let mut line_has_code = false;
    let mut has_code = false;
    let mut statement_like = false;
    let mut escaped = false;
    let mut chars = source.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\n' {
            cursor.line += 1;
            cursor.col = 0;
            line_has_code = false;
            match state {
                State::LineComment => state = State::Code,
                State::Str | State::Char => return Err(cursor.error("unterminated literal")),
                _ => {}
            }
            continue;
        }
        cursor.col += 1;

        match state {
            State::LineComment => {}
            State::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    cursor.col += 1;
                    state = State::Code;
                }
            }
            State::Str | State::Char => {
                let quote = if state == State::Str { '"' } else { '\'' };
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == quote {
                    state = State::Code;
                }
            }
            State::Code => {
                if c.is_whitespace() {
                    continue;
                }
                if c == '/' && chars.peek() == Some(&'/') {
                    chars.next();
                    state = State::LineComment;
                    continue;
                }
                if c == '/' && chars.peek() == Some(&'*') {
                    chars.next();
                    cursor.col += 1;
                    state = State::BlockComment;
                    continue;
                }
                let c = match digraph(c, chars.peek()) {
                    Some(punct) => {
                        chars.next();
                        cursor.col += 1;
                        punct
                    }
                    None => c,
                };
                if c == '#' && !line_has_code {
                    return Err(cursor.error("preprocessor directives are not allowed"));
                }
                line_has_code = true;
                has_code = true;

                match c {
                    '"' => state = State::Str,
                    '\'' => state = State::Char,
                    ';' => statement_like = true,
                    '(' | '[' | '{' => {
                        if c == '{' {
                            statement_like = true;
                        }
                        stack.push((c, cursor.line, cursor.col));
                    }
                    ')' | ']' | '}' => match stack.pop() {
                        Some((open, _, _)) if closing(open) == c => {}
                        Some((open, line, col)) => {
                            return Err(cursor.error(format!(
                                "expected '{}' to close '{}' opened at {}:{}, found '{}'",
                                closing(open),
                                open,
                                line,
                                col,
                                c
                            )));
                        }
                        None if c == '}' => {
                            return Err(cursor.error("unmatched '}' would close the function body"));
                        }
                        None => return Err(cursor.error(format!("unmatched '{c}'"))),
                    },
                    _ => {}
                }
            }
        }
    }

    match state {
        State::BlockComment => return Err(cursor.error("unterminated comment")),
        State::Str | State::Char => return Err(cursor.error("unterminated literal")),
        _ => {}
    }

    if let Some((open, line, col)) = stack.pop() {
        return Err(JitError::compile(format!(
            "snippet:{line}:{col}: '{open}' is never closed"
        )));
    }

    if !has_code {
        return Err(JitError::compile("snippet:1:1: empty snippet"));
    }

    Ok(if statement_like {
        SnippetKind::Statements
    } else {
        SnippetKind::Expression
    })
}

/// Function body for a checked snippet.
pub fn body(source: &str, kind: SnippetKind) -> Cow<'_, str> {
    match kind {
        SnippetKind::Statements => Cow::Borrowed(source),
        // the newline keeps a trailing `//` comment off the closing `);`
        SnippetKind::Expression => Cow::Owned(format!("return ({}\n);", source.trim())),
    }
}
