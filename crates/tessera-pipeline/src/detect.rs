// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Source dialect detection.
//!
//! Classifies a source text as a standard module (top-level
//! `import`/`export`) or a legacy bare script, by structural inspection
//! only — the text is never executed. Legacy sources are wrapped so
//! they present a synthetic default export and the rest of the
//! pipeline sees one uniform kind of unit.

use crate::error::{PipelineError, Result, SourceSpan};
use crate::scan::{
    self, Cursor, is_ident_continue, is_ident_start, is_operand_keyword, regex_allowed,
};

/// Source dialect classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Uses top-level `import`/`export` declarations
    StandardModule,
    /// Bare script with no module syntax; wrapped before further
    /// processing
    Legacy,
}

/// Classify a source text by structural inspection.
///
/// A top-level (bracket-depth-zero) `import` or `export` token outside
/// string, template, comment, and regex context classifies the text as
/// a standard module. Dynamic `import(...)` alone does not; it is valid
/// in bare scripts. Ambiguous text with no module syntax is `Legacy`.
pub fn detect(source: &str) -> Dialect {
    for word in top_level_words(source) {
        match word.text(source) {
            "export" => return Dialect::StandardModule,
            "import" => {
                // `import(` is a dynamic import expression, not a
                // module marker; `import.meta` and declarations are.
                if next_significant_char(source, word.end) != Some('(') {
                    return Dialect::StandardModule;
                }
            }
            _ => {}
        }
    }
    Dialect::Legacy
}

/// Wrap a legacy source so it presents a synthetic default export.
///
/// The wrapper anchors on the last top-level component-shaped
/// declaration: a `const`/`let`/`var`/`function`/`class` binding whose
/// name starts with an uppercase letter. Fails with
/// [`PipelineError::Format`] when no such declaration exists, naming
/// the span that could not be wrapped.
pub fn wrap_legacy(source: &str) -> Result<String> {
    let words = top_level_words(source);
    let mut component: Option<&str> = None;

    for pair in words.windows(2) {
        let (kw, name) = (&pair[0], &pair[1]);
        if !matches!(kw.text(source), "const" | "let" | "var" | "function" | "class") {
            continue;
        }
        // The binding name must directly follow the keyword ('*' allows
        // generator functions through).
        let between = &source[kw.end..name.start];
        if !between.chars().all(|c| c.is_whitespace() || c == '*') {
            continue;
        }
        let text = name.text(source);
        if text.chars().next().is_some_and(char::is_uppercase) {
            component = Some(text);
        }
    }

    match component {
        Some(name) => {
            tracing::debug!(component = name, "wrapping legacy source");
            let mut wrapped = source.to_string();
            if !wrapped.ends_with('\n') {
                wrapped.push('\n');
            }
            wrapped.push_str(&format!("\nexport default {name};\n"));
            Ok(wrapped)
        }
        None => Err(PipelineError::format(
            SourceSpan::new(0, source.len()),
            "no top-level component declaration to export",
        )),
    }
}

/// A word (identifier or keyword) found at bracket depth zero.
#[derive(Debug, Clone, Copy)]
struct Word {
    start: usize,
    end: usize,
}

impl Word {
    fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.start..self.end]
    }
}

/// Collect identifier-like words at bracket depth zero, skipping
/// strings, templates, comments, and regex literals.
fn top_level_words(source: &str) -> Vec<Word> {
    let mut words = Vec::new();
    let mut cur = Cursor::new(source);
    let mut depth: i32 = 0;
    // Last significant character, for regex-vs-division disambiguation
    // ('a' = identifier, '0' = literal, 'k' = operand keyword).
    let mut last: Option<char> = None;

    while let Some(ch) = cur.peek() {
        match ch {
            '"' | '\'' => {
                cur.bump();
                scan::skip_string(&mut cur, ch);
                last = Some('0');
            }
            '`' => {
                cur.bump();
                scan::skip_template(&mut cur);
                last = Some('0');
            }
            '/' => {
                cur.bump();
                match cur.peek() {
                    Some('/') => scan::skip_line_comment(&mut cur),
                    Some('*') => scan::skip_block_comment(&mut cur),
                    _ => {
                        if regex_allowed(last) {
                            scan::skip_regex(&mut cur);
                            last = Some('0');
                        } else {
                            last = Some('/');
                        }
                    }
                }
            }
            '(' | '[' | '{' => {
                cur.bump();
                depth += 1;
                last = Some(ch);
            }
            ')' | ']' | '}' => {
                cur.bump();
                depth -= 1;
                last = Some(ch);
            }
            c if c.is_whitespace() => {
                cur.bump();
            }
            c if is_ident_start(c) => {
                let start = cur.pos();
                cur.bump();
                while cur.peek().is_some_and(is_ident_continue) {
                    cur.bump();
                }
                let word = Word {
                    start,
                    end: cur.pos(),
                };
                // Property access (`obj.import`) is not a declaration.
                if depth == 0 && last != Some('.') {
                    words.push(word);
                }
                last = Some(if is_operand_keyword(word.text(source)) { 'k' } else { 'a' });
            }
            c if c.is_ascii_digit() => {
                cur.bump();
                while cur
                    .peek()
                    .is_some_and(|c2| c2.is_ascii_alphanumeric() || c2 == '.' || c2 == '_')
                {
                    cur.bump();
                }
                last = Some('0');
            }
            c => {
                cur.bump();
                last = Some(c);
            }
        }
    }

    words
}

/// The next non-whitespace, non-comment character at or after `from`.
fn next_significant_char(source: &str, from: usize) -> Option<char> {
    let mut cur = Cursor::new(&source[from..]);
    while let Some(ch) = cur.peek() {
        match ch {
            c if c.is_whitespace() => {
                cur.bump();
            }
            '/' => match cur.peek2() {
                Some('/') => {
                    cur.bump();
                    scan::skip_line_comment(&mut cur);
                }
                Some('*') => {
                    cur.bump();
                    scan::skip_block_comment(&mut cur);
                }
                _ => return Some('/'),
            },
            c => return Some(c),
        }
    }
    None
}
