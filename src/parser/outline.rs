// SPDX-License-Identifier: MIT OR Apache-2.0

//! Structural outline extraction from AST using tree-sitter node traversal
//!
//! Produces the declarations CodeIndex searches over: functions, classes and
//! imports, with a cyclomatic-complexity score per function/class.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tree_sitter::{Node, Parser};

use crate::parser::languages::LANGUAGES;

/// Declaration kinds in the engine's closed set. Structs, enums, traits and
/// interfaces all map to `Class`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeclKind {
    Function,
    Class,
    Import,
}

/// One extracted declaration. `line`/`column` are 1-based.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Declaration {
    pub name: String,
    pub kind: DeclKind,
    pub line: usize,
    pub column: usize,
    pub end_line: usize,
    /// Cyclomatic complexity; 0 for imports.
    pub complexity: u32,
    /// Root module name, imports only ("os" for `import os.path`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_root: Option<String>,
}

impl Declaration {
    /// Line span of the declaration.
    pub fn lines(&self) -> usize {
        self.end_line.saturating_sub(self.line) + 1
    }
}

/// Outline extractor reusing one tree-sitter parser per language.
pub struct OutlineParser {
    parsers: HashMap<String, Parser>,
}

impl Default for OutlineParser {
    fn default() -> Self {
        Self::new()
    }
}

impl OutlineParser {
    pub fn new() -> Self {
        Self {
            parsers: HashMap::new(),
        }
    }

    /// Parse source and collect declarations. Errors on unsupported
    /// languages and unparseable input; callers fall back to text search.
    pub fn outline(&mut self, source: &str, language: &str) -> Result<Vec<Declaration>> {
        let lang = LANGUAGES
            .get(language)
            .ok_or_else(|| anyhow::anyhow!("unsupported language: {}", language))?;

        use std::collections::hash_map::Entry;
        let parser = match self.parsers.entry(language.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(Parser::new()),
        };
        parser.set_language(lang)?;

        let tree = parser
            .parse(source, None)
            .ok_or_else(|| anyhow::anyhow!("failed to parse source"))?;

        let source_bytes = source.as_bytes();
        let mut declarations = Vec::new();
        let mut stack = vec![tree.root_node()];
        while let Some(node) = stack.pop() {
            collect_declaration(node, source_bytes, language, &mut declarations);
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                stack.push(child);
            }
        }

        declarations.sort_by(|a, b| (a.line, a.column).cmp(&(b.line, b.column)));
        Ok(declarations)
    }
}

fn collect_declaration(
    node: Node,
    source: &[u8],
    language: &str,
    declarations: &mut Vec<Declaration>,
) {
    let kind = node.kind();

    if is_import_node(language, kind) {
        declarations.extend(import_declarations(node, source, language));
        return;
    }

    let Some((decl_kind, name_field)) = match_declaration(language, kind) else {
        return;
    };
    let Some(name) = node
        .child_by_field_name(name_field)
        .and_then(|n| n.utf8_text(source).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
    else {
        return;
    };

    declarations.push(Declaration {
        name,
        kind: decl_kind,
        line: node.start_position().row + 1,
        column: node.start_position().column + 1,
        end_line: node.end_position().row + 1,
        complexity: complexity_of(node, source, language),
        module_root: None,
    });
}

/// Function/class node kinds per language, with the field holding the name.
fn match_declaration(language: &str, kind: &str) -> Option<(DeclKind, &'static str)> {
    match language {
        "python" => match kind {
            "function_definition" => Some((DeclKind::Function, "name")),
            "class_definition" => Some((DeclKind::Class, "name")),
            _ => None,
        },
        "rust" => match kind {
            "function_item" => Some((DeclKind::Function, "name")),
            "struct_item" | "enum_item" | "trait_item" | "union_item" => {
                Some((DeclKind::Class, "name"))
            }
            _ => None,
        },
        "javascript" | "typescript" => match kind {
            "function_declaration" | "generator_function_declaration" | "method_definition" => {
                Some((DeclKind::Function, "name"))
            }
            "class_declaration" | "interface_declaration" | "enum_declaration" => {
                Some((DeclKind::Class, "name"))
            }
            _ => None,
        },
        "go" => match kind {
            "function_declaration" | "method_declaration" => Some((DeclKind::Function, "name")),
            "type_spec" => Some((DeclKind::Class, "name")),
            _ => None,
        },
        "java" => match kind {
            "method_declaration" | "constructor_declaration" => {
                Some((DeclKind::Function, "name"))
            }
            "class_declaration" | "interface_declaration" | "enum_declaration" => {
                Some((DeclKind::Class, "name"))
            }
            _ => None,
        },
        _ => None,
    }
}

fn is_import_node(language: &str, kind: &str) -> bool {
    matches!(
        (language, kind),
        ("python", "import_statement")
            | ("python", "import_from_statement")
            | ("rust", "use_declaration")
            | ("javascript", "import_statement")
            | ("typescript", "import_statement")
            | ("go", "import_spec")
            | ("java", "import_declaration")
    )
}

/// Import nodes can declare several modules (`import os, sys`); one
/// declaration per imported module.
fn import_declarations(node: Node, source: &[u8], language: &str) -> Vec<Declaration> {
    let mut names: Vec<String> = Vec::new();

    match (language, node.kind()) {
        ("python", "import_statement") => {
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                match child.kind() {
                    "dotted_name" => {
                        if let Ok(text) = child.utf8_text(source) {
                            names.push(text.to_string());
                        }
                    }
                    "aliased_import" => {
                        if let Some(text) = child
                            .child_by_field_name("name")
                            .and_then(|n| n.utf8_text(source).ok())
                        {
                            names.push(text.to_string());
                        }
                    }
                    _ => {}
                }
            }
        }
        ("python", "import_from_statement") => {
            if let Some(text) = node
                .child_by_field_name("module_name")
                .and_then(|n| n.utf8_text(source).ok())
            {
                names.push(text.to_string());
            }
        }
        ("rust", "use_declaration") => {
            if let Some(text) = node
                .child_by_field_name("argument")
                .and_then(|n| n.utf8_text(source).ok())
            {
                names.push(text.to_string());
            }
        }
        ("javascript" | "typescript", "import_statement") => {
            if let Some(text) = node
                .child_by_field_name("source")
                .and_then(|n| n.utf8_text(source).ok())
            {
                names.push(text.trim_matches(['"', '\'', '`']).to_string());
            }
        }
        ("go", "import_spec") => {
            if let Some(text) = node
                .child_by_field_name("path")
                .and_then(|n| n.utf8_text(source).ok())
            {
                names.push(text.trim_matches('"').to_string());
            }
        }
        ("java", "import_declaration") => {
            if let Ok(text) = node.utf8_text(source) {
                let cleaned = text
                    .trim_start_matches("import")
                    .trim_start()
                    .trim_start_matches("static")
                    .trim()
                    .trim_end_matches(';')
                    .trim();
                if !cleaned.is_empty() {
                    names.push(cleaned.to_string());
                }
            }
        }
        _ => {}
    }

    names
        .into_iter()
        .filter(|name| !name.is_empty())
        .map(|name| Declaration {
            module_root: Some(root_module(&name, language)),
            name,
            kind: DeclKind::Import,
            line: node.start_position().row + 1,
            column: node.start_position().column + 1,
            end_line: node.end_position().row + 1,
            complexity: 0,
        })
        .collect()
}

/// The grouping key for dependency-usage detection: the leading package
/// segment of an import path.
pub fn root_module(module: &str, language: &str) -> String {
    match language {
        "python" => module
            .trim_start_matches('.')
            .split('.')
            .next()
            .unwrap_or(module)
            .to_string(),
        "rust" => module
            .split("::")
            .map(str::trim)
            .find(|seg| !matches!(*seg, "crate" | "self" | "super" | ""))
            .unwrap_or(module)
            .trim_end_matches(|c: char| !c.is_alphanumeric() && c != '_')
            .to_string(),
        "javascript" | "typescript" => {
            if let Some(rest) = module.strip_prefix('@') {
                let mut parts = rest.splitn(3, '/');
                match (parts.next(), parts.next()) {
                    (Some(scope), Some(name)) => format!("@{}/{}", scope, name),
                    _ => module.to_string(),
                }
            } else {
                module.split('/').next().unwrap_or(module).to_string()
            }
        }
        "java" => module.split('.').next().unwrap_or(module).to_string(),
        // go import paths are already canonical package identifiers
        _ => module.to_string(),
    }
}

/// Branching constructs counted toward cyclomatic complexity, per language.
fn is_branch_node(language: &str, node: Node, source: &[u8]) -> bool {
    let kind = node.kind();
    let by_kind = match language {
        "python" => matches!(
            kind,
            "if_statement"
                | "elif_clause"
                | "for_statement"
                | "while_statement"
                | "except_clause"
                | "case_clause"
                | "conditional_expression"
                | "boolean_operator"
                | "if_clause"
        ),
        "rust" => matches!(
            kind,
            "if_expression"
                | "while_expression"
                | "for_expression"
                | "loop_expression"
                | "match_arm"
        ),
        "javascript" | "typescript" => matches!(
            kind,
            "if_statement"
                | "for_statement"
                | "for_in_statement"
                | "while_statement"
                | "do_statement"
                | "catch_clause"
                | "switch_case"
                | "ternary_expression"
        ),
        "go" => matches!(
            kind,
            "if_statement" | "for_statement" | "expression_case" | "type_case"
                | "communication_case"
        ),
        "java" => matches!(
            kind,
            "if_statement"
                | "for_statement"
                | "enhanced_for_statement"
                | "while_statement"
                | "do_statement"
                | "catch_clause"
                | "ternary_expression"
        ),
        _ => false,
    };
    if by_kind {
        return true;
    }
    if kind == "binary_expression" {
        return node
            .child_by_field_name("operator")
            .and_then(|op| op.utf8_text(source).ok())
            .map(|op| op == "&&" || op == "||")
            .unwrap_or(false);
    }
    false
}

/// 1 + one per branching construct in the declaration subtree. Monotonic:
/// adding a branch never decreases the score.
fn complexity_of(node: Node, source: &[u8], language: &str) -> u32 {
    let mut score = 1u32;
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        if current.id() != node.id() && is_branch_node(language, current, source) {
            score += 1;
        }
        let mut cursor = current.walk();
        for child in current.children(&mut cursor) {
            stack.push(child);
        }
    }
    score
}
