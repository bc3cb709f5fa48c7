// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Low-level source scanning shared by the detector and the
//! transpiler: a byte cursor plus skippers for the contexts where
//! module syntax and markup must never be recognized (strings,
//! templates, comments, regex literals).

/// A cursor over source text tracking a byte offset.
pub(crate) struct Cursor<'a> {
    source: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(source: &'a str) -> Self {
        Self { source, pos: 0 }
    }

    /// Current byte offset.
    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    pub(crate) fn rest(&self) -> &'a str {
        &self.source[self.pos..]
    }

    pub(crate) fn slice_from(&self, start: usize) -> &'a str {
        &self.source[start..self.pos]
    }

    pub(crate) fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    pub(crate) fn peek2(&self) -> Option<char> {
        let mut chars = self.rest().chars();
        chars.next();
        chars.next()
    }

    pub(crate) fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    pub(crate) fn eat(&mut self, ch: char) -> bool {
        if self.peek() == Some(ch) {
            self.bump();
            true
        } else {
            false
        }
    }

    pub(crate) fn eat_str(&mut self, s: &str) -> bool {
        if self.rest().starts_with(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    pub(crate) fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    pub(crate) fn at_end(&self) -> bool {
        self.pos >= self.source.len()
    }
}

pub(crate) fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

pub(crate) fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Keywords after which an operand is expected, so a following `/`
/// begins a regex literal and a following `<` may begin markup.
pub(crate) fn is_operand_keyword(word: &str) -> bool {
    matches!(
        word,
        "return" | "typeof" | "case" | "default" | "in" | "of" | "new" | "delete" | "void"
            | "instanceof" | "do" | "else" | "yield" | "await" | "throw"
    )
}

/// Whether `/` may begin a regex literal given the last significant
/// character ('a' stands for any identifier, '0' for any literal, 'k'
/// for an operand keyword).
pub(crate) fn regex_allowed(last: Option<char>) -> bool {
    !matches!(last, Some('a') | Some('0') | Some(')') | Some(']'))
}

/// Skip a quoted string; the opening quote is already consumed.
pub(crate) fn skip_string(cur: &mut Cursor<'_>, quote: char) {
    while let Some(ch) = cur.bump() {
        match ch {
            '\\' => {
                cur.bump();
            }
            c if c == quote => break,
            '\n' => break,
            _ => {}
        }
    }
}

/// Skip a template literal; the opening backtick is already consumed.
/// Embedded `${...}` expressions are traversed for nesting but treated
/// as opaque.
pub(crate) fn skip_template(cur: &mut Cursor<'_>) {
    while let Some(ch) = cur.bump() {
        match ch {
            '\\' => {
                cur.bump();
            }
            '`' => break,
            '$' if cur.peek() == Some('{') => {
                cur.bump();
                skip_template_expr(cur);
            }
            _ => {}
        }
    }
}

fn skip_template_expr(cur: &mut Cursor<'_>) {
    let mut braces = 1u32;
    while let Some(ch) = cur.bump() {
        match ch {
            '{' => braces += 1,
            '}' => {
                braces -= 1;
                if braces == 0 {
                    break;
                }
            }
            '"' | '\'' => skip_string(cur, ch),
            '`' => skip_template(cur),
            '/' => match cur.peek() {
                Some('/') => skip_line_comment(cur),
                Some('*') => skip_block_comment(cur),
                _ => {}
            },
            _ => {}
        }
    }
}

/// Skip to the end of a `//` comment; the leading `/` is already
/// consumed and the second is at the cursor.
pub(crate) fn skip_line_comment(cur: &mut Cursor<'_>) {
    while let Some(ch) = cur.bump() {
        if ch == '\n' {
            break;
        }
    }
}

/// Skip to the end of a `/* */` comment; the leading `/` is already
/// consumed and the `*` is at the cursor.
pub(crate) fn skip_block_comment(cur: &mut Cursor<'_>) {
    cur.bump(); // '*'
    while let Some(ch) = cur.bump() {
        if ch == '*' && cur.peek() == Some('/') {
            cur.bump();
            break;
        }
    }
}

/// Skip a regex literal; the opening `/` is already consumed.
pub(crate) fn skip_regex(cur: &mut Cursor<'_>) {
    let mut in_class = false;
    while let Some(ch) = cur.bump() {
        match ch {
            '\\' => {
                cur.bump();
            }
            '[' => in_class = true,
            ']' => in_class = false,
            '/' if !in_class => break,
            '\n' => break,
            _ => {}
        }
    }
}
