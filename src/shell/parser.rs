//! Bash syntax checking via tree-sitter
//!
//! Commands are parsed before anything is executed. A syntax error rejects
//! the command without touching the shell state, and the simple commands
//! found in the tree feed the block functions.

use tree_sitter::{Node, Parser};

use crate::error::{CoreError, Result};

/// A successfully parsed command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    /// Every simple command in source order, as `[name, args...]`
    pub simple_commands: Vec<Vec<String>>,
}

/// Parse `source` as bash
///
/// # Errors
/// Returns `CoreError::Parse` with the 1-based position of the first syntax
/// error.
pub fn parse(source: &str) -> Result<ParsedCommand> {
    let language: tree_sitter::Language = tree_sitter_bash::LANGUAGE.into();
    let mut parser = Parser::new();
    parser
        .set_language(&language)
        .map_err(|e| CoreError::parse(format!("bash grammar unavailable: {e}"), 0, 0))?;

    let tree = parser
        .parse(source, None)
        .ok_or_else(|| CoreError::parse("parser produced no tree", 0, 0))?;
    let root = tree.root_node();

    if root.has_error() {
        let (message, node) =
            first_error(root).unwrap_or_else(|| ("syntax error".to_string(), root));
        let pos = node.start_position();
        return Err(CoreError::parse(message, pos.row + 1, pos.column + 1));
    }

    let mut simple_commands = Vec::new();
    collect_commands(root, source.as_bytes(), &mut simple_commands);
    Ok(ParsedCommand { simple_commands })
}

fn first_error(node: Node<'_>) -> Option<(String, Node<'_>)> {
    if node.is_missing() {
        return Some((format!("missing '{}'", node.kind()), node));
    }
    if node.is_error() {
        return Some(("unexpected token".to_string(), node));
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.has_error()
            && let Some(found) = first_error(child)
        {
            return Some(found);
        }
    }
    None
}

fn collect_commands(node: Node<'_>, source: &[u8], out: &mut Vec<Vec<String>>) {
    if node.kind() == "command"
        && let Some(name) = node.child_by_field_name("name")
    {
        let mut argv = vec![node_text(name, source)];
        let mut cursor = node.walk();
        argv.extend(
            node.children_by_field_name("argument", &mut cursor)
                .map(|arg| node_text(arg, source)),
        );
        out.push(argv);
    }

    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        collect_commands(child, source, out);
    }
}

fn node_text(node: Node<'_>, source: &[u8]) -> String {
    let text = node.utf8_text(source).unwrap_or_default();
    unquote(text).to_string()
}

fn unquote(text: &str) -> &str {
    for quote in ['\'', '"'] {
        if text.len() >= 2
            && let Some(inner) = text.strip_prefix(quote).and_then(|t| t.strip_suffix(quote))
        {
            return inner;
        }
    }
    text
}
