// SPDX-License-Identifier: MIT OR Apache-2.0

//! Parser module - AST parsing using tree-sitter

pub mod languages;
pub mod outline;

pub use outline::{DeclKind, Declaration, OutlineParser};
