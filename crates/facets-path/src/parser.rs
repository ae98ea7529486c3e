#![forbid(unsafe_code)]

//! Recursive-descent parser for extended attribute names.
//!
//! # Grammar
//!
//! ```text
//! pattern    := simple_pair | group
//! simple_pair:= name ('.' | ':') name
//! group      := item (',' item)*
//! item       := ('[' group ']' | name_or_wild) '?'? '*'? (('.' | ':') item)?
//! name_or_wild := name | name? ('+' | '-') name?
//! items_tag  := '[' ']'
//! ```
//!
//! `.` reports changes to the link itself, `:` only follows it. `*` repeats
//! an item zero or more times, `?` makes a name optional, `[]` asks for
//! itemized collection events and a bare `-` listens to every attribute.
//!
//! # Failure Modes
//!
//! | Input | Error |
//! |-------|-------|
//! | `a,` | `Expected a name` |
//! | `?` | `Expected non-empty name preceding '?'` |
//! | `-.a` | `Expected end of name` |
//! | `a[x]` | `Expected '[]' at the end of an item` |
//! | `a b` | `Expected ',' or end of string` |

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::syntax::{MetadataFilter, NodeId, Segment, SegmentFlags, SyntaxNode, SyntaxTree};

static SIMPLE_PAIR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-zA-Z_][a-zA-Z0-9_]*)(\.|:)([a-zA-Z_][a-zA-Z0-9_]*)$")
        .expect("simple pair pattern is a valid regex")
});

/// Malformed pattern text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    /// Characters consumed when the error was detected.
    pub column: usize,
    pub message: String,
    pub pattern: String,
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at column {} of '{}'",
            self.message, self.column, self.pattern
        )
    }
}

impl std::error::Error for SyntaxError {}

/// Compile `pattern` into a [`SyntaxTree`].
///
/// Leading and trailing whitespace is ignored.
///
/// # Errors
///
/// Returns [`SyntaxError`] describing the first offending character.
pub fn parse(pattern: &str) -> Result<SyntaxTree, SyntaxError> {
    let text = pattern.trim();

    if let Some(caps) = SIMPLE_PAIR.captures(text) {
        let mut head = Segment::named(&caps[1]);
        head.flags_mut().set(SegmentFlags::NOTIFY, &caps[2] == ".");
        head.set_next(NodeId::new(1));
        let tail = Segment::named(&caps[3]);
        let nodes = vec![SyntaxNode::Segment(head), SyntaxNode::Segment(tail)];
        return Ok(SyntaxTree::from_parts(text, nodes, NodeId::new(0)));
    }

    let mut parser = Parser::new(text);
    let root = parser.parse_group(None)?;
    tracing::trace!(pattern = text, nodes = parser.nodes.len(), "pattern parsed");
    Ok(SyntaxTree::from_parts(text, parser.nodes, root))
}

struct Parser<'a> {
    text: &'a str,
    chars: Vec<char>,
    index: usize,
    nodes: Vec<SyntaxNode>,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            chars: text.chars().collect(),
            index: 0,
            nodes: Vec::new(),
        }
    }

    fn next_char(&mut self) -> Option<char> {
        let index = self.index;
        self.index += 1;
        self.chars.get(index).copied()
    }

    fn backspace(&mut self) {
        self.index = self.index.saturating_sub(1);
    }

    fn skip_ws(&mut self) -> Option<char> {
        loop {
            match self.next_char() {
                Some(c) if c.is_whitespace() => {}
                other => return other,
            }
        }
    }

    /// Read a name starting at the character just consumed, then skip any
    /// trailing whitespace. Returns an empty string if no name starts there.
    fn name(&mut self) -> String {
        let start = self.index.saturating_sub(1);
        match self.chars.get(start) {
            Some(c) if c.is_ascii_alphabetic() || *c == '_' => {}
            _ => return String::new(),
        }
        let mut end = start + 1;
        while self
            .chars
            .get(end)
            .is_some_and(|c| c.is_ascii_alphanumeric() || *c == '_')
        {
            end += 1;
        }
        let name: String = self.chars[start..end].iter().collect();
        let mut rest = end;
        while self.chars.get(rest).is_some_and(|c| c.is_whitespace()) {
            rest += 1;
        }
        self.index = rest;
        name
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError {
            column: self.index.min(self.chars.len()),
            message: message.into(),
            pattern: self.text.to_string(),
        }
    }

    fn push(&mut self, node: SyntaxNode) -> NodeId {
        self.nodes.push(node);
        NodeId::new(self.nodes.len() - 1)
    }

    fn parse_group(&mut self, terminator: Option<char>) -> Result<NodeId, SyntaxError> {
        let mut items = Vec::new();
        loop {
            items.push(self.parse_item(terminator)?);
            let c = self.skip_ws();
            if c == terminator {
                break;
            }
            if c != Some(',') {
                return Err(match terminator {
                    None => self.error("Expected ',' or end of string"),
                    Some(t) => self.error(format!("Expected ',' or '{t}'")),
                });
            }
        }
        if items.len() == 1 {
            Ok(items[0])
        } else {
            Ok(self.push(SyntaxNode::Group(items)))
        }
    }

    fn parse_item(&mut self, terminator: Option<char>) -> Result<NodeId, SyntaxError> {
        let mut c = self.skip_ws();
        let result = if c == Some('[') {
            let group = self.parse_group(Some(']'))?;
            c = self.skip_ws();
            group
        } else {
            let name = self.name();
            if !name.is_empty() {
                c = self.next_char();
            }
            let mut segment = Segment::named(name);
            match c {
                Some(sign @ ('+' | '-')) => {
                    let mut cn = self.skip_ws();
                    let metadata = self.name();
                    if !metadata.is_empty() {
                        cn = self.skip_ws();
                    }
                    let any = sign == '-' && segment.name().is_empty() && metadata.is_empty();
                    let flags = segment.flags_mut();
                    flags.remove(SegmentFlags::SIMPLE);
                    flags.set(SegmentFlags::ANY_ATTRIBUTE, any);
                    if !metadata.is_empty() {
                        segment.set_metadata(MetadataFilter {
                            name: metadata,
                            defined: sign == '+',
                        });
                    }
                    c = cn;
                    if any && !(c == terminator || (c == Some(',') && terminator == Some(']'))) {
                        return Err(self.error("Expected end of name"));
                    }
                }
                Some('?') => {
                    if segment.name().is_empty() {
                        return Err(self.error("Expected non-empty name preceding '?'"));
                    }
                    segment.flags_mut().insert(SegmentFlags::OPTIONAL);
                    c = self.skip_ws();
                }
                _ => {
                    if segment.name().is_empty() {
                        return Err(self.error("Expected a name"));
                    }
                }
            }
            self.push(SyntaxNode::Segment(segment))
        };

        let cycle = c == Some('*');
        if cycle {
            c = self.skip_ws();
        }

        if let Some(separator @ ('.' | ':')) = c {
            self.set_flag(result, SegmentFlags::NOTIFY, separator == '.');
            let next = self.parse_item(terminator)?;
            if cycle {
                // `a*.rest`: listen for `rest` here, and for `a*.rest` on
                // whatever `a` refers to.
                let last = self.chain_end(result);
                let group = self.push(SyntaxNode::Group(vec![next, result]));
                self.set_next(last, group);
                return Ok(group);
            }
            self.set_next(result, next);
            return Ok(result);
        }

        if c == Some('[') {
            let close = self.skip_ws();
            let after = self.skip_ws();
            if close == Some(']') && (after == terminator || after == Some(',')) {
                self.backspace();
                self.set_flag(result, SegmentFlags::ITEMS, true);
            } else {
                return Err(self.error("Expected '[]' at the end of an item"));
            }
        } else {
            self.backspace();
        }

        if cycle {
            self.set_next(result, result);
        }
        Ok(result)
    }

    /// Last node reached by following successors from `id`.
    fn chain_end(&self, id: NodeId) -> NodeId {
        let mut seen = vec![id];
        let mut last = id;
        while let Some(next) = self.successor(last) {
            if seen.contains(&next) {
                break;
            }
            seen.push(next);
            last = next;
        }
        last
    }

    fn successor(&self, id: NodeId) -> Option<NodeId> {
        match &self.nodes[id.index()] {
            SyntaxNode::Segment(segment) => segment.next(),
            SyntaxNode::Group(items) => items.first().and_then(|first| self.successor(*first)),
        }
    }

    /// Set `next` on a segment, or on every member of a group.
    fn set_next(&mut self, id: NodeId, next: NodeId) {
        match &mut self.nodes[id.index()] {
            SyntaxNode::Segment(segment) => segment.set_next(next),
            SyntaxNode::Group(items) => {
                let items = items.clone();
                for item in items {
                    self.set_next(item, next);
                }
            }
        }
    }

    fn set_flag(&mut self, id: NodeId, flag: SegmentFlags, value: bool) {
        match &mut self.nodes[id.index()] {
            SyntaxNode::Segment(segment) => segment.flags_mut().set(flag, value),
            SyntaxNode::Group(items) => {
                let items = items.clone();
                for item in items {
                    self.set_flag(item, flag, value);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root_segment(tree: &SyntaxTree) -> &Segment {
        tree.segment(tree.root()).expect("root is a segment")
    }

    #[test]
    fn fast_path_pair() {
        let tree = parse("address.city").unwrap();
        let head = root_segment(&tree);
        assert_eq!(head.name(), "address");
        assert!(head.notifies());
        let tail = tree.segment(head.next().unwrap()).unwrap();
        assert_eq!(tail.name(), "city");
        assert!(tail.next().is_none());
    }

    #[test]
    fn colon_suppresses_link_notification() {
        let tree = parse("address:city").unwrap();
        assert!(!root_segment(&tree).notifies());
    }

    #[test]
    fn general_path_matches_fast_path() {
        // Whitespace forces the general parser.
        let general = parse("address . city").unwrap();
        let fast = parse("address.city").unwrap();
        let g = root_segment(&general);
        let f = root_segment(&fast);
        assert_eq!(g.name(), f.name());
        assert_eq!(g.flags(), f.flags());
        assert_eq!(
            general.segment(g.next().unwrap()).unwrap().name(),
            fast.segment(f.next().unwrap()).unwrap().name()
        );
    }

    #[test]
    fn top_level_alternation() {
        let tree = parse("foo, bar,baz").unwrap();
        let SyntaxNode::Group(items) = tree.node(tree.root()) else {
            panic!("expected group");
        };
        let names: Vec<&str> = items
            .iter()
            .map(|id| tree.segment(*id).unwrap().name())
            .collect();
        assert_eq!(names, ["foo", "bar", "baz"]);
    }

    #[test]
    fn bracket_group_shares_successor() {
        let tree = parse("[a,b].c").unwrap();
        let SyntaxNode::Group(items) = tree.node(tree.root()) else {
            panic!("expected group");
        };
        let a = tree.segment(items[0]).unwrap();
        let b = tree.segment(items[1]).unwrap();
        assert_eq!(a.next(), b.next());
        assert_eq!(tree.segment(a.next().unwrap()).unwrap().name(), "c");
    }

    #[test]
    fn group_after_link() {
        let tree = parse("foo.[bar,baz]").unwrap();
        let foo = root_segment(&tree);
        assert!(matches!(tree.node(foo.next().unwrap()), SyntaxNode::Group(items) if items.len() == 2));
    }

    #[test]
    fn optional_suffix() {
        let tree = parse("maybe?.x").unwrap();
        assert!(root_segment(&tree).is_optional());
    }

    #[test]
    fn metadata_filters() {
        let tree = parse("max_+editable").unwrap();
        let seg = root_segment(&tree);
        assert!(!seg.is_simple());
        assert_eq!(seg.name(), "max_");
        assert_eq!(
            seg.metadata(),
            Some(&MetadataFilter {
                name: "editable".into(),
                defined: true
            })
        );

        let tree = parse("-transient").unwrap();
        let seg = root_segment(&tree);
        assert!(!seg.is_any_attribute());
        assert_eq!(seg.metadata().map(|m| m.defined), Some(false));

        let tree = parse("+").unwrap();
        let seg = root_segment(&tree);
        assert!(!seg.is_simple());
        assert!(!seg.is_any_attribute());
        assert!(seg.metadata().is_none());
    }

    #[test]
    fn bare_minus_is_any_attribute() {
        let tree = parse("-").unwrap();
        assert!(root_segment(&tree).is_any_attribute());

        let tree = parse("child.-").unwrap();
        let child = root_segment(&tree);
        assert!(tree.segment(child.next().unwrap()).unwrap().is_any_attribute());
    }

    #[test]
    fn self_cycle() {
        let tree = parse("children*").unwrap();
        let seg = root_segment(&tree);
        assert_eq!(seg.next(), Some(tree.root()));
        assert!(tree.has_cycle());
    }

    #[test]
    fn cycle_with_tail_builds_group() {
        // `parent*.name`: `name` here, plus `parent*.name` on the parent.
        let tree = parse("parent*.name").unwrap();
        let SyntaxNode::Group(items) = tree.node(tree.root()) else {
            panic!("expected group");
        };
        assert_eq!(tree.segment(items[0]).unwrap().name(), "name");
        let parent = tree.segment(items[1]).unwrap();
        assert_eq!(parent.name(), "parent");
        assert_eq!(parent.next(), Some(tree.root()));
        assert!(tree.has_cycle());
    }

    #[test]
    fn items_tag() {
        let tree = parse("a.items[]").unwrap();
        let a = root_segment(&tree);
        assert!(tree.segment(a.next().unwrap()).unwrap().wants_items());

        let tree = parse("[x[],y]").unwrap();
        let SyntaxNode::Group(items) = tree.node(tree.root()) else {
            panic!("expected group");
        };
        assert!(tree.segment(items[0]).unwrap().wants_items());
        assert!(!tree.segment(items[1]).unwrap().wants_items());
    }

    #[test]
    fn errors_report_column() {
        let err = parse("a b").unwrap_err();
        assert_eq!(err.message, "Expected ',' or end of string");
        assert_eq!(err.column, 3);
        assert_eq!(err.pattern, "a b");
        assert_eq!(err.to_string(), "Expected ',' or end of string at column 3 of 'a b'");

        let err = parse("-.a").unwrap_err();
        assert_eq!(err.message, "Expected end of name");

        let err = parse("a[x]").unwrap_err();
        assert_eq!(err.message, "Expected '[]' at the end of an item");

        let err = parse("[a,b").unwrap_err();
        assert_eq!(err.message, "Expected ',' or ']'");

        let err = parse("a,").unwrap_err();
        assert_eq!(err.message, "Expected a name");

        let err = parse("").unwrap_err();
        assert_eq!(err.message, "Expected a name");
    }

    #[test]
    fn parse_is_deterministic() {
        for pattern in ["a.b", "[a,b]*.c", "x:y.z?", "prefix+meta", "a.-", "kids*"] {
            assert_eq!(parse(pattern).unwrap(), parse(pattern).unwrap(), "{pattern}");
        }
    }
}
