use std::collections::HashSet;

use tree_sitter::{Node, Parser};

use crate::chunk::CodeChunk;

const BLOCK_KINDS: &[&str] = &["block", "compound_statement", "statement_block"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Features {
    pub line_count: usize,
    pub param_count: usize,
    pub nesting_depth: usize,
    pub cyclomatic_complexity: usize,
    pub control_flow: HashSet<String>,
    pub has_loop: bool,
    pub has_conditional: bool,
    pub has_recursion: bool,
}

fn control_flow_tag(kind: &str) -> Option<&'static str> {
    let k = kind.to_lowercase();
    if k.contains("if") {
        Some("if")
    } else if k.contains("for") {
        Some("for")
    } else if k.contains("while") || k.contains("loop") {
        Some("while")
    } else if k.contains("match") || k.contains("switch") {
        Some("match")
    } else if k.contains("try") || k.contains("catch") {
        Some("try")
    } else if k.contains("return") {
        Some("return")
    } else if k.contains("yield") {
        Some("yield")
    } else {
        None
    }
}

fn ts_language_for(language: &str) -> Option<tree_sitter::Language> {
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

/// Walks the tree with an explicit depth-tagged worklist rather than function
/// recursion, tallying control-flow tags, cyclomatic complexity, and the
/// deepest block-like nesting, plus the widest parameter list seen.
fn extract_features_ast(root: Node, source: &[u8]) -> Features {
    let mut f = Features { cyclomatic_complexity: 1, ..Default::default() };
    let mut stack = vec![(root, 0usize)];
    while let Some((node, depth)) = stack.pop() {
        let kind = node.kind();
        if BLOCK_KINDS.contains(&kind) {
            f.nesting_depth = f.nesting_depth.max(depth + 1);
        }
        if kind.contains("parameter") && !kind.contains("type") {
            let mut cursor = node.walk();
            let count = node.children(&mut cursor).filter(|c| c.is_named()).count();
            f.param_count = f.param_count.max(count);
        }
        if let Some(tag) = control_flow_tag(kind) {
            f.control_flow.insert(tag.to_string());
            if matches!(tag, "if" | "for" | "while" | "match") {
                f.cyclomatic_complexity += 1;
            }
        }
        let next_depth = if BLOCK_KINDS.contains(&kind) { depth + 1 } else { depth };
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            stack.push((child, next_depth));
        }
    }
    f.has_loop = f.control_flow.contains("for") || f.control_flow.contains("while");
    f.has_conditional = f.control_flow.contains("if") || f.control_flow.contains("match");
    let text = String::from_utf8_lossy(source);
    f.line_count = text.lines().filter(|l| !l.trim().is_empty()).count().max(1);
    f
}

const KEYWORD_TAGS: &[(&str, &str)] = &[
    ("if", "if"),
    ("for", "for"),
    ("while", "while"),
    ("match", "match"),
    ("switch", "match"),
    ("try", "try"),
    ("catch", "try"),
    ("return", "return"),
    ("yield", "yield"),
];

fn extract_features_heuristic(code: &str) -> Features {
    let mut f = Features { cyclomatic_complexity: 1, ..Default::default() };
    let mut max_depth = 0i64;
    let mut depth = 0i64;
    for line in code.lines() {
        let trimmed = line.trim();
        for c in line.chars() {
            if c == '{' {
                depth += 1;
                max_depth = max_depth.max(depth);
            } else if c == '}' {
                depth -= 1;
            }
        }
        for (kw, tag) in KEYWORD_TAGS {
            if trimmed.split(|c: char| !c.is_alphanumeric() && c != '_').any(|w| w == *kw) {
                f.control_flow.insert(tag.to_string());
                if matches!(*tag, "if" | "for" | "while" | "match") {
                    f.cyclomatic_complexity += 1;
                }
            }
        }
    }
    f.nesting_depth = max_depth.max(0) as usize;
    f.has_loop = f.control_flow.contains("for") || f.control_flow.contains("while");
    f.has_conditional = f.control_flow.contains("if") || f.control_flow.contains("match");
    f.line_count = code.lines().filter(|l| !l.trim().is_empty()).count().max(1);
    f
}

/// Best-effort: does the fragment's first declared name re-occur as a call
/// elsewhere in its own text? Not a general call-graph analysis.
fn detect_recursion(code: &str, language: &str) -> bool {
    let chunks: Vec<CodeChunk> = crate::chunk::chunk(code, language, 1, usize::MAX);
    let Some(name) = chunks.iter().map(|c| c.name.clone()).find(|n| !n.is_empty()) else {
        return false;
    };
    let occurrences = code.matches(&name).count();
    occurrences > 1
}

pub fn extract_features(code: &str, language: &str) -> Features {
    let mut f = if let Some(ts_lang) = ts_language_for(language) {
        let mut parser = Parser::new();
        if parser.set_language(&ts_lang).is_ok() {
            if let Some(tree) = parser.parse(code, None) {
                extract_features_ast(tree.root_node(), code.as_bytes())
            } else {
                extract_features_heuristic(code)
            }
        } else {
            extract_features_heuristic(code)
        }
    } else {
        extract_features_heuristic(code)
    };
    f.has_recursion = detect_recursion(code, language);
    f
}

fn ratio_score(a: usize, b: usize) -> f32 {
    if a == 0 && b == 0 {
        return 1.0;
    }
    let (lo, hi) = if a < b { (a, b) } else { (b, a) };
    if hi == 0 {
        1.0
    } else {
        lo as f32 / hi as f32
    }
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        1.0
    } else {
        intersection as f32 / union as f32
    }
}

/// Arithmetic mean of six bounded component scores: parameter-count proximity,
/// nesting-depth proximity, complexity ratio, control-flow Jaccard similarity,
/// line-count ratio, and boolean-feature agreement.
pub fn structural_similarity(a: &Features, b: &Features) -> f32 {
    let param_score = {
        let delta = (a.param_count as i64 - b.param_count as i64).unsigned_abs() as f32;
        (1.0 - 0.2 * delta).max(0.0)
    };
    let depth_score = {
        let delta = (a.nesting_depth as i64 - b.nesting_depth as i64).unsigned_abs() as f32;
        (1.0 - 0.15 * delta).max(0.0)
    };
    let complexity_score = ratio_score(a.cyclomatic_complexity, b.cyclomatic_complexity);
    let control_flow_score = jaccard(&a.control_flow, &b.control_flow);
    let line_score = ratio_score(a.line_count, b.line_count);
    let bool_agreement = {
        let checks = [a.has_loop == b.has_loop, a.has_conditional == b.has_conditional, a.has_recursion == b.has_recursion];
        checks.iter().filter(|x| **x).count() as f32 / 3.0
    };

    (param_score + depth_score + complexity_score + control_flow_score + line_score + bool_agreement) / 6.0
}

pub fn compare(code_a: &str, lang_a: &str, code_b: &str, lang_b: &str) -> f32 {
    let fa = extract_features(code_a, lang_a);
    let fb = extract_features(code_b, lang_b);
    structural_similarity(&fa, &fb)
}
