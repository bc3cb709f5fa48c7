// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Inline markup transpilation.
//!
//! Rewrites the inline-markup syntax extension into plain nested
//! factory calls, leaving everything else byte-for-byte intact. The
//! pass is scoped strictly to expression bodies: top-level
//! import/export statements contain no markup and come through
//! untouched, so the set and order of module declarations is never
//! changed. Child arguments mirror source nesting depth-first,
//! left-to-right — the shape a rendering layer expects.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::scan::{
    self, Cursor, is_ident_continue, is_ident_start, is_operand_keyword, regex_allowed,
};

/// Source-to-source markup rewriter.
///
/// Markup is recognized only in expression position (after `(`, `,`,
/// `=`, `return`, `=>`, and friends), so comparison operators are never
/// misread as tags, and never inside strings, templates, comments, or
/// regex literals.
pub struct MarkupTranspiler {
    factory: String,
    fragment: String,
}

impl MarkupTranspiler {
    /// A transpiler emitting calls to `factory`, with fragments
    /// compiling to `fragment`.
    pub fn new(factory: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self {
            factory: factory.into(),
            fragment: fragment.into(),
        }
    }

    /// A transpiler using the session's configured factory names.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(&config.markup_factory, &config.markup_fragment)
    }

    /// Rewrite every markup expression in `source`. Source without
    /// markup comes back unchanged.
    pub fn transpile(&self, source: &str) -> Result<String> {
        let mut cur = Cursor::new(source);
        let mut out = String::with_capacity(source.len());
        // Last significant character ('a' = identifier, '0' = literal,
        // 'k' = operand keyword), shared by the regex and markup
        // position heuristics.
        let mut last: Option<char> = None;

        while let Some(ch) = cur.peek() {
            match ch {
                '"' | '\'' => {
                    let start = cur.pos();
                    cur.bump();
                    scan::skip_string(&mut cur, ch);
                    out.push_str(cur.slice_from(start));
                    last = Some('0');
                }
                '`' => {
                    let start = cur.pos();
                    cur.bump();
                    scan::skip_template(&mut cur);
                    out.push_str(cur.slice_from(start));
                    last = Some('0');
                }
                '/' => {
                    let start = cur.pos();
                    cur.bump();
                    match cur.peek() {
                        Some('/') => {
                            scan::skip_line_comment(&mut cur);
                            out.push_str(cur.slice_from(start));
                        }
                        Some('*') => {
                            scan::skip_block_comment(&mut cur);
                            out.push_str(cur.slice_from(start));
                        }
                        _ => {
                            if regex_allowed(last) {
                                scan::skip_regex(&mut cur);
                                out.push_str(cur.slice_from(start));
                                last = Some('0');
                            } else {
                                out.push('/');
                                last = Some('/');
                            }
                        }
                    }
                }
                '<' if markup_position(last) && markup_follows(&cur) => {
                    let element = parse_element(&mut cur)?;
                    out.push_str(&self.emit_element(&element)?);
                    last = Some(')');
                }
                c if is_ident_start(c) => {
                    let start = cur.pos();
                    cur.bump();
                    while cur.peek().is_some_and(is_ident_continue) {
                        cur.bump();
                    }
                    let word = cur.slice_from(start);
                    out.push_str(word);
                    last = Some(if is_operand_keyword(word) { 'k' } else { 'a' });
                }
                c if c.is_ascii_digit() => {
                    cur.bump();
                    out.push(c);
                    last = Some('0');
                }
                c if c.is_whitespace() => {
                    cur.bump();
                    out.push(c);
                }
                c => {
                    cur.bump();
                    out.push(c);
                    last = Some(c);
                }
            }
        }

        Ok(out)
    }

    fn emit_element(&self, element: &Element) -> Result<String> {
        let tag = if element.tag.is_empty() {
            self.fragment.clone()
        } else if is_intrinsic_tag(&element.tag) {
            format!("\"{}\"", element.tag)
        } else {
            element.tag.clone()
        };

        let props = if element.attrs.is_empty() {
            "null".to_string()
        } else {
            let mut parts = Vec::with_capacity(element.attrs.len());
            for attr in &element.attrs {
                match attr {
                    Attr::Spread { expr } => {
                        parts.push(format!("...{}", self.transpile(expr)?.trim()));
                    }
                    Attr::Named { name, value } => {
                        let key = if name.contains('-') || name.contains(':') {
                            format!("\"{name}\"")
                        } else {
                            name.clone()
                        };
                        let value = match value {
                            AttrValue::Literal(raw) => raw.clone(),
                            AttrValue::Expr(expr) => self.transpile(expr)?.trim().to_string(),
                            AttrValue::True => "true".to_string(),
                        };
                        parts.push(format!("{key}: {value}"));
                    }
                }
            }
            format!("{{ {} }}", parts.join(", "))
        };

        let mut call = format!("{}({}, {}", self.factory, tag, props);
        for child in &element.children {
            let arg = match child {
                Child::Element(inner) => Some(self.emit_element(inner)?),
                Child::Expr(expr) => {
                    let expr = self.transpile(expr)?.trim().to_string();
                    if expr.is_empty() || is_comment_only(&expr) {
                        None
                    } else {
                        Some(expr)
                    }
                }
                Child::Text(text) => collapse_text(text).map(|t| js_string_literal(&t)),
            };
            if let Some(arg) = arg {
                call.push_str(", ");
                call.push_str(&arg);
            }
        }
        call.push(')');
        Ok(call)
    }
}

/// A parsed markup element. An empty tag is a fragment.
#[derive(Debug, Clone)]
struct Element {
    tag: String,
    attrs: Vec<Attr>,
    children: Vec<Child>,
}

#[derive(Debug, Clone)]
enum Attr {
    Named { name: String, value: AttrValue },
    Spread { expr: String },
}

#[derive(Debug, Clone)]
enum AttrValue {
    /// Quoted literal, stored as written (quotes included)
    Literal(String),
    /// `{expr}` value, transpiled recursively on emit
    Expr(String),
    /// Bare boolean shorthand
    True,
}

#[derive(Debug, Clone)]
enum Child {
    Element(Element),
    Expr(String),
    Text(String),
}

/// Whether `<` begins markup given the last significant character.
fn markup_position(last: Option<char>) -> bool {
    matches!(
        last,
        None | Some('(' | ',' | '=' | '[' | '{' | ';' | ':' | '?' | '&' | '|' | '!' | '>' | 'k')
    )
}

/// Whether the character after `<` can open a tag or fragment.
fn markup_follows(cur: &Cursor<'_>) -> bool {
    match cur.peek2() {
        Some('>') => true,
        Some(c) => is_ident_start(c),
        None => false,
    }
}

/// Parse one element; the cursor is at `<`.
fn parse_element(cur: &mut Cursor<'_>) -> Result<Element> {
    let open_offset = cur.pos();
    cur.bump(); // '<'

    if cur.eat('>') {
        let children = parse_children(cur, "", open_offset)?;
        return Ok(Element {
            tag: String::new(),
            attrs: Vec::new(),
            children,
        });
    }

    let tag = parse_tag_name(cur);
    if tag.is_empty() {
        return Err(PipelineError::transpile(open_offset, "expected tag name after '<'"));
    }

    let mut attrs = Vec::new();
    loop {
        cur.skip_ws();
        if cur.eat_str("/>") {
            return Ok(Element {
                tag,
                attrs,
                children: Vec::new(),
            });
        }
        if cur.eat('>') {
            break;
        }
        if cur.at_end() {
            return Err(PipelineError::transpile(
                open_offset,
                format!("unterminated element <{tag}>"),
            ));
        }

        if cur.peek() == Some('{') {
            let brace_offset = cur.pos();
            cur.bump();
            cur.skip_ws();
            if !cur.eat_str("...") {
                return Err(PipelineError::transpile(
                    brace_offset,
                    "expected '...' in attribute spread",
                ));
            }
            let expr = parse_braced_expr(cur, brace_offset)?;
            attrs.push(Attr::Spread { expr });
            continue;
        }

        let name_offset = cur.pos();
        let name = parse_attr_name(cur);
        if name.is_empty() {
            return Err(PipelineError::transpile(name_offset, "expected attribute name"));
        }
        cur.skip_ws();
        let value = if cur.eat('=') {
            cur.skip_ws();
            match cur.peek() {
                Some(quote @ ('"' | '\'')) => parse_attr_string(cur, quote)?,
                Some('{') => {
                    let brace_offset = cur.pos();
                    cur.bump();
                    AttrValue::Expr(parse_braced_expr(cur, brace_offset)?)
                }
                _ => {
                    return Err(PipelineError::transpile(
                        cur.pos(),
                        format!("expected value for attribute '{name}'"),
                    ));
                }
            }
        } else {
            AttrValue::True
        };
        attrs.push(Attr::Named { name, value });
    }

    let children = parse_children(cur, &tag, open_offset)?;
    Ok(Element {
        tag,
        attrs,
        children,
    })
}

/// Parse children up to the matching closing tag.
fn parse_children(cur: &mut Cursor<'_>, tag: &str, open_offset: usize) -> Result<Vec<Child>> {
    let mut children = Vec::new();
    loop {
        if cur.at_end() {
            return Err(PipelineError::transpile(
                open_offset,
                format!("unclosed element {}", display_tag(tag)),
            ));
        }

        let close_offset = cur.pos();
        if cur.eat_str("</") {
            cur.skip_ws();
            let close = parse_tag_name(cur);
            cur.skip_ws();
            if !cur.eat('>') {
                return Err(PipelineError::transpile(close_offset, "malformed closing tag"));
            }
            if close != tag {
                return Err(PipelineError::transpile(
                    close_offset,
                    format!(
                        "mismatched closing tag: expected {}, found </{close}>",
                        display_closing(tag)
                    ),
                ));
            }
            return Ok(children);
        }

        match cur.peek() {
            Some('<') => {
                if markup_follows(cur) {
                    children.push(Child::Element(parse_element(cur)?));
                } else {
                    return Err(PipelineError::transpile(cur.pos(), "unexpected '<' in markup text"));
                }
            }
            Some('{') => {
                let brace_offset = cur.pos();
                cur.bump();
                children.push(Child::Expr(parse_braced_expr(cur, brace_offset)?));
            }
            _ => {
                let start = cur.pos();
                while cur.peek().is_some_and(|c| c != '<' && c != '{') {
                    cur.bump();
                }
                children.push(Child::Text(cur.slice_from(start).to_string()));
            }
        }
    }
}

/// Read a balanced `{...}` expression; the cursor is just past the
/// opening brace. Returns the inner text with the closing brace
/// consumed.
fn parse_braced_expr(cur: &mut Cursor<'_>, open_offset: usize) -> Result<String> {
    let start = cur.pos();
    let mut depth = 1u32;
    loop {
        let Some(ch) = cur.peek() else {
            return Err(PipelineError::transpile(open_offset, "unterminated expression"));
        };
        match ch {
            '{' => {
                depth += 1;
                cur.bump();
            }
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let expr = cur.slice_from(start).to_string();
                    cur.bump();
                    return Ok(expr);
                }
                cur.bump();
            }
            '"' | '\'' => {
                cur.bump();
                scan::skip_string(cur, ch);
            }
            '`' => {
                cur.bump();
                scan::skip_template(cur);
            }
            '/' => {
                cur.bump();
                match cur.peek() {
                    Some('/') => scan::skip_line_comment(cur),
                    Some('*') => scan::skip_block_comment(cur),
                    _ => {}
                }
            }
            _ => {
                cur.bump();
            }
        }
    }
}

fn parse_attr_string(cur: &mut Cursor<'_>, quote: char) -> Result<AttrValue> {
    let start = cur.pos();
    cur.bump(); // opening quote
    loop {
        match cur.bump() {
            Some(c) if c == quote => break,
            Some('\n') | None => {
                return Err(PipelineError::transpile(start, "unterminated attribute value"));
            }
            Some(_) => {}
        }
    }
    Ok(AttrValue::Literal(cur.slice_from(start).to_string()))
}

fn parse_tag_name(cur: &mut Cursor<'_>) -> String {
    let mut name = String::new();
    if cur.peek().is_some_and(is_ident_start) {
        while cur
            .peek()
            .is_some_and(|c| is_ident_continue(c) || c == '.' || c == '-')
        {
            name.push(cur.bump().unwrap());
        }
    }
    name
}

fn parse_attr_name(cur: &mut Cursor<'_>) -> String {
    let mut name = String::new();
    if cur.peek().is_some_and(is_ident_start) {
        while cur
            .peek()
            .is_some_and(|c| is_ident_continue(c) || c == '-' || c == ':')
        {
            name.push(cur.bump().unwrap());
        }
    }
    name
}

/// Lower-case dotless tags name intrinsic elements and compile to
/// string literals; capitalized and member-expression tags are
/// component references.
fn is_intrinsic_tag(tag: &str) -> bool {
    !tag.contains('.') && tag.chars().next().is_some_and(|c| !c.is_uppercase())
}

fn display_tag(tag: &str) -> String {
    if tag.is_empty() {
        "<>".to_string()
    } else {
        format!("<{tag}>")
    }
}

fn display_closing(tag: &str) -> String {
    if tag.is_empty() {
        "</>".to_string()
    } else {
        format!("</{tag}>")
    }
}

/// Collapse markup text the way rendering layers expect: lines are
/// trimmed and joined with single spaces; a chunk that collapses to
/// nothing produces no child. Single-line whitespace is significant
/// and kept as written.
fn collapse_text(text: &str) -> Option<String> {
    if !text.contains('\n') {
        if text.is_empty() {
            return None;
        }
        return Some(text.to_string());
    }
    let collapsed = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if collapsed.is_empty() { None } else { Some(collapsed) }
}

fn js_string_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for ch in text.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// An expression child that is only a comment produces no argument.
fn is_comment_only(expr: &str) -> bool {
    (expr.starts_with("//") && !expr.contains('\n'))
        || (expr.starts_with("/*") && expr.ends_with("*/") && expr.matches("*/").count() == 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transpiler() -> MarkupTranspiler {
        MarkupTranspiler::new("h", "Fragment")
    }

    #[test]
    fn test_simple_element_with_text() {
        let out = transpiler()
            .transpile("const Component = () => <div>Hi</div>;")
            .unwrap();
        assert_eq!(out, "const Component = () => h(\"div\", null, \"Hi\");");
    }

    #[test]
    fn test_source_without_markup_is_unchanged() {
        let source = "const x = a < b; const y = items.map(f);";
        assert_eq!(transpiler().transpile(source).unwrap(), source);
    }

    #[test]
    fn test_attributes() {
        let out = transpiler()
            .transpile(r#"const I = <img src="x.png" alt={name} hidden />;"#)
            .unwrap();
        assert_eq!(
            out,
            r#"const I = h("img", { src: "x.png", alt: name, hidden: true });"#
        );
    }

    #[test]
    fn test_spread_and_dashed_attributes() {
        let out = transpiler()
            .transpile(r#"const C = <Card {...props} data-id="7"/>;"#)
            .unwrap();
        assert_eq!(out, r#"const C = h(Card, { ...props, "data-id": "7" });"#);
    }

    #[test]
    fn test_children_mirror_nesting_depth_first() {
        let out = transpiler()
            .transpile("const L = <ul><li>a</li><li>b</li></ul>;")
            .unwrap();
        assert_eq!(
            out,
            "const L = h(\"ul\", null, h(\"li\", null, \"a\"), h(\"li\", null, \"b\"));"
        );
    }

    #[test]
    fn test_fragment() {
        let out = transpiler().transpile("const F = <><A/><B/></>;").unwrap();
        assert_eq!(out, "const F = h(Fragment, null, h(A, null), h(B, null));");
    }

    #[test]
    fn test_component_and_member_tags() {
        let out = transpiler().transpile("const B = <UI.Button size=\"sm\"/>;").unwrap();
        assert_eq!(out, "const B = h(UI.Button, { size: \"sm\" });");

        let out = transpiler().transpile("const W = <my-widget/>;").unwrap();
        assert_eq!(out, "const W = h(\"my-widget\", null);");
    }

    #[test]
    fn test_markup_inside_expression_children() {
        let out = transpiler()
            .transpile("const L = <ul>{items.map(i => <li>{i}</li>)}</ul>;")
            .unwrap();
        assert_eq!(
            out,
            "const L = h(\"ul\", null, items.map(i => h(\"li\", null, i)));"
        );
    }

    #[test]
    fn test_markup_after_logical_operator() {
        let out = transpiler()
            .transpile("const C = ok && <span>yes</span>;")
            .unwrap();
        assert_eq!(out, "const C = ok && h(\"span\", null, \"yes\");");
    }

    #[test]
    fn test_multiline_text_collapses() {
        let source = "const T = <p>\n  one\n  two\n</p>;";
        let out = transpiler().transpile(source).unwrap();
        assert_eq!(out, "const T = h(\"p\", null, \"one two\");");
    }

    #[test]
    fn test_same_line_spacing_preserved() {
        let out = transpiler().transpile("const T = <p>Hi {name}</p>;").unwrap();
        assert_eq!(out, "const T = h(\"p\", null, \"Hi \", name);");
    }

    #[test]
    fn test_import_lines_untouched() {
        let source = "import { h } from 'ui-runtime';\nexport default () => <div/>;\n";
        let out = transpiler().transpile(source).unwrap();
        assert!(out.starts_with("import { h } from 'ui-runtime';\n"));
        assert!(out.contains("export default () => h(\"div\", null);"));
    }

    #[test]
    fn test_markup_in_string_untouched() {
        let source = "const s = \"<div>not markup</div>\";";
        assert_eq!(transpiler().transpile(source).unwrap(), source);
    }

    #[test]
    fn test_comment_children_dropped() {
        let out = transpiler()
            .transpile("const C = <div>{/* note */}<b>x</b></div>;")
            .unwrap();
        assert_eq!(out, "const C = h(\"div\", null, h(\"b\", null, \"x\"));");
    }

    #[test]
    fn test_custom_factory() {
        let out = MarkupTranspiler::new("React.createElement", "React.Fragment")
            .transpile("const C = <div/>;")
            .unwrap();
        assert_eq!(out, "const C = React.createElement(\"div\", null);");
    }

    #[test]
    fn test_mismatched_closing_tag() {
        let source = "<div><span></div>";
        let err = transpiler().transpile(source).unwrap_err();
        match err {
            PipelineError::Transpile { offset, reason } => {
                assert_eq!(offset, 11);
                assert!(reason.contains("</span>"));
                assert!(reason.contains("</div>"));
            }
            other => panic!("expected transpile error, got {other:?}"),
        }
    }

    #[test]
    fn test_unclosed_element_points_at_open_tag() {
        let source = "const C = () => <div>;";
        let err = transpiler().transpile(source).unwrap_err();
        match err {
            PipelineError::Transpile { offset, reason } => {
                assert_eq!(offset, 16);
                assert!(reason.contains("<div>"));
            }
            other => panic!("expected transpile error, got {other:?}"),
        }
    }

    #[test]
    fn test_unterminated_attribute_value() {
        let err = transpiler().transpile("const C = <img src=\"x>;").unwrap_err();
        assert!(matches!(err, PipelineError::Transpile { .. }));
    }

    #[test]
    fn test_unterminated_expression() {
        let err = transpiler().transpile("const C = <div>{x</div>;").unwrap_err();
        assert!(matches!(err, PipelineError::Transpile { .. }));
    }
}
