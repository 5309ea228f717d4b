use std::collections::HashSet;

use tree_sitter::{Language, Node, Parser};

/// A contiguous region of source code with a semantic tag. Line numbers are
/// 1-indexed and inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeChunk {
    pub text: String,
    pub start_line: u32,
    pub end_line: u32,
    pub ast_type: String,
    pub name: String,
}

fn ts_language_for(language: &str) -> Option<Language> {
    match language.to_lowercase().as_str() {
        "rust" => Some(tree_sitter_rust::language()),
        "python" => Some(tree_sitter_python::language()),
        "typescript" | "javascript" => Some(tree_sitter_typescript::language_typescript()),
        #[cfg(feature = "lang-go")]
        "go" => Some(tree_sitter_go::language()),
        #[cfg(feature = "lang-java")]
        "java" => Some(tree_sitter_java::language()),
        #[cfg(feature = "lang-csharp")]
        "c#" | "csharp" => Some(tree_sitter_c_sharp::language()),
        _ => None,
    }
}

fn chunkable_kinds_for(language: &str) -> HashSet<&'static str> {
    match language.to_lowercase().as_str() {
        "rust" => ["function_item", "struct_item", "enum_item", "trait_item", "impl_item", "mod_item", "type_item"]
            .into_iter()
            .collect(),
        "python" => ["function_definition", "class_definition"].into_iter().collect(),
        "typescript" | "javascript" => [
            "function_declaration",
            "method_definition",
            "class_declaration",
            "interface_declaration",
            "type_alias_declaration",
        ]
        .into_iter()
        .collect(),
        "go" => ["function_declaration", "method_declaration", "type_declaration"].into_iter().collect(),
        "java" => ["method_declaration", "class_declaration", "interface_declaration", "enum_declaration"]
            .into_iter()
            .collect(),
        "c#" | "csharp" => ["method_declaration", "class_declaration", "interface_declaration", "struct_declaration"]
            .into_iter()
            .collect(),
        _ => HashSet::new(),
    }
}

const NAME_KINDS: &[&str] = &["identifier", "name", "property_identifier", "type_identifier", "field_identifier"];

fn extract_name(node: Node, source: &[u8]) -> String {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if NAME_KINDS.contains(&child.kind()) {
            return child.utf8_text(source).unwrap_or("").to_string();
        }
    }
    String::new()
}

fn node_text(node: Node, source: &[u8]) -> String {
    node.utf8_text(source).unwrap_or("").to_string()
}

fn span_lines(node: Node) -> usize {
    (node.end_position().row - node.start_position().row) + 1
}

enum WorkItem<'a> {
    Enter(Node<'a>),
    CheckFallback(Node<'a>, usize),
}

fn push_children<'a>(stack: &mut Vec<WorkItem<'a>>, node: Node<'a>) {
    let mut cursor = node.walk();
    let children: Vec<Node> = node.children(&mut cursor).collect();
    for child in children.into_iter().rev() {
        stack.push(WorkItem::Enter(child));
    }
}

/// Pre-order walk over a parsed tree using an explicit worklist (rather than
/// function-call recursion) so pathologically deep trees don't exhaust the
/// stack. Chunkable nodes under `max_lines` are emitted directly; oversized
/// chunkable nodes descend into children first and are only emitted whole if
/// no descendant produced a chunk.
fn extract_ast_chunks(root: Node, source: &[u8], chunkable: &HashSet<&'static str>, min_lines: usize, max_lines: usize) -> Vec<CodeChunk> {
    let mut chunks = Vec::new();
    let mut stack = vec![WorkItem::Enter(root)];

    while let Some(item) = stack.pop() {
        match item {
            WorkItem::Enter(node) => {
                let is_root = node.id() == root.id();
                if !is_root && chunkable.contains(node.kind()) {
                    let span = span_lines(node);
                    if span < min_lines {
                        push_children(&mut stack, node);
                    } else if span <= max_lines {
                        chunks.push(CodeChunk {
                            text: node_text(node, source),
                            start_line: node.start_position().row as u32 + 1,
                            end_line: node.end_position().row as u32 + 1,
                            ast_type: node.kind().to_string(),
                            name: extract_name(node, source),
                        });
                    } else {
                        stack.push(WorkItem::CheckFallback(node, chunks.len()));
                        push_children(&mut stack, node);
                    }
                } else {
                    push_children(&mut stack, node);
                }
            }
            WorkItem::CheckFallback(node, before) => {
                if chunks.len() == before {
                    chunks.push(CodeChunk {
                        text: node_text(node, source),
                        start_line: node.start_position().row as u32 + 1,
                        end_line: node.end_position().row as u32 + 1,
                        ast_type: node.kind().to_string(),
                        name: extract_name(node, source),
                    });
                }
            }
        }
    }

    chunks.sort_by_key(|c| c.start_line);
    chunks
}

/// Blank-line-boundary fallback: splits on two consecutive blank lines (once
/// the buffer holds at least `min_lines`) or when the buffer hits `max_lines`.
pub fn line_chunk(source: &str, min_lines: usize, max_lines: usize) -> Vec<CodeChunk> {
    let lines: Vec<&str> = source.lines().collect();
    let mut chunks = Vec::new();
    let mut buf_start = 0usize;
    let mut blank_run = 0usize;
    let mut i = 0usize;

    let flush = |chunks: &mut Vec<CodeChunk>, start: usize, end_exclusive: usize| {
        if end_exclusive <= start {
            return;
        }
        let text = lines[start..end_exclusive].join("\n").trim_end().to_string();
        if text.is_empty() {
            return;
        }
        chunks.push(CodeChunk {
            text,
            start_line: start as u32 + 1,
            end_line: end_exclusive as u32,
            ast_type: "block".to_string(),
            name: String::new(),
        });
    };

    while i < lines.len() {
        let buf_len = i - buf_start + 1;
        if lines[i].trim().is_empty() {
            blank_run += 1;
        } else {
            blank_run = 0;
        }

        let hit_blank_boundary = blank_run >= 2 && buf_len >= min_lines;
        let hit_max = buf_len >= max_lines;

        if hit_blank_boundary || hit_max {
            flush(&mut chunks, buf_start, i + 1);
            buf_start = i + 1;
            blank_run = 0;
        }
        i += 1;
    }
    let had_prior_chunks = !chunks.is_empty();
    let trailing_len = lines.len().saturating_sub(buf_start);
    if !had_prior_chunks || trailing_len >= min_lines {
        flush(&mut chunks, buf_start, lines.len());
    }
    chunks
}

/// Facade over the AST and line chunking strategies. Falls back to the line
/// chunker when no tree-sitter grammar is wired for `language`, or when the
/// AST strategy yields nothing for a non-empty file.
pub fn chunk(source: &str, language: &str, min_lines: usize, max_lines: usize) -> Vec<CodeChunk> {
    if source.trim().is_empty() {
        return Vec::new();
    }

    if let Some(ts_lang) = ts_language_for(language) {
        let mut parser = Parser::new();
        if parser.set_language(&ts_lang).is_ok() {
            if let Some(tree) = parser.parse(source, None) {
                let chunkable = chunkable_kinds_for(language);
                let mut chunks = extract_ast_chunks(tree.root_node(), source.as_bytes(), &chunkable, min_lines, max_lines);
                if chunks.is_empty() {
                    chunks = line_chunk(source, min_lines, max_lines);
                }
                if chunks.is_empty() {
                    chunks.push(whole_file_chunk(source));
                }
                return chunks;
            }
        }
    }

    let mut chunks = line_chunk(source, min_lines, max_lines);
    if chunks.is_empty() {
        chunks.push(whole_file_chunk(source));
    }
    chunks
}

fn whole_file_chunk(source: &str) -> CodeChunk {
    CodeChunk {
        text: source.to_string(),
        start_line: 1,
        end_line: source.lines().count().max(1) as u32,
        ast_type: "file".to_string(),
        name: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_chunker_splits_on_blank_pair_and_covers_input() {
        let mut lines = Vec::new();
        for i in 1..=5 {
            lines.push(format!("line{i}"));
        }
        lines.push("".to_string());
        lines.push("".to_string());
        for i in 8..=12 {
            lines.push(format!("line{i}"));
        }
        let source = lines.join("\n");

        let chunks = line_chunk(&source, 5, 100);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 7);
        assert_eq!(chunks[0].ast_type, "block");
        assert_eq!(chunks[1].start_line, 8);
        assert_eq!(chunks[1].end_line, 12);
    }

    #[test]
    fn line_chunker_discards_short_trailing_leftover_when_a_chunk_already_exists() {
        let mut lines = Vec::new();
        for i in 1..=5 {
            lines.push(format!("line{i}"));
        }
        lines.push("".to_string());
        lines.push("".to_string());
        lines.push("tail1".to_string());
        lines.push("tail2".to_string());
        let source = lines.join("\n");

        let chunks = line_chunk(&source, 5, 100);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 7);
    }

    #[test]
    fn line_chunker_keeps_short_leftover_when_it_is_the_only_chunk() {
        let source = "a\nb\nc\n";
        let chunks = line_chunk(source, 5, 100);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 3);
    }

    #[test]
    fn line_chunker_max_lines_boundary() {
        let source = (1..=250).map(|i| format!("l{i}")).collect::<Vec<_>>().join("\n");
        let chunks = line_chunk(&source, 5, 100);
        assert!(chunks.iter().all(|c| (c.end_line - c.start_line + 1) <= 100));
        assert!(chunks.len() >= 2);
    }

    #[test]
    fn ast_chunker_extracts_python_function_and_class() {
        let source = "def f(x):\n    return x + 1\n\n\nclass C:\n    def g(self):\n        return 1\n";
        let chunks = chunk(source, "Python", 2, 100);
        assert!(chunks.iter().any(|c| c.ast_type == "function_definition" && c.name == "f"));
        assert!(chunks.iter().any(|c| c.ast_type == "class_definition" && c.name == "C"));
    }

    #[test]
    fn ast_chunker_extracts_rust_function() {
        let source = "fn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n";
        let chunks = chunk(source, "Rust", 1, 100);
        assert!(chunks.iter().any(|c| c.ast_type == "function_item" && c.name == "add"));
    }

    #[test]
    fn unknown_language_falls_back_to_line_chunker() {
        let source = "alpha\nbeta\ngamma\ndelta\nepsilon\nzeta\n";
        let chunks = chunk(source, "Cobol", 3, 100);
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| c.ast_type == "block" || c.ast_type == "file"));
    }

    #[test]
    fn empty_file_yields_no_chunks() {
        assert!(chunk("   \n  \n", "Rust", 5, 100).is_empty());
    }

    #[test]
    fn non_empty_file_with_no_semantic_chunks_becomes_a_file_chunk() {
        let source = "x = 1\n";
        let chunks = chunk(source, "Python", 5, 100);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].ast_type, "block");
    }
}
