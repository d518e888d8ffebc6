// SPDX-License-Identifier: MIT OR Apache-2.0

//! Supported language registry for tree-sitter grammars

use once_cell::sync::Lazy;
use std::collections::HashMap;
use tree_sitter::Language;

/// Language name → grammar. Files outside this set degrade to text search.
pub static LANGUAGES: Lazy<HashMap<&'static str, Language>> = Lazy::new(|| {
    let mut map = HashMap::new();
    map.insert("python", tree_sitter_python::LANGUAGE.into());
    map.insert("rust", tree_sitter_rust::LANGUAGE.into());
    map.insert("javascript", tree_sitter_javascript::LANGUAGE.into());
    map.insert(
        "typescript",
        tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
    );
    map.insert("go", tree_sitter_go::LANGUAGE.into());
    map.insert("java", tree_sitter_java::LANGUAGE.into());
    map
});

/// Names of all supported languages, sorted.
pub fn supported_languages() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = LANGUAGES.keys().copied().collect();
    names.sort_unstable();
    names
}
