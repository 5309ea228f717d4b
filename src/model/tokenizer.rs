use std::collections::HashMap;

use unicode_normalization::UnicodeNormalization;

use crate::error::{IndexError, Result};

const UNK: &str = "[UNK]";
const CLS: &str = "[CLS]";
const SEP: &str = "[SEP]";
const PAD: &str = "[PAD]";

/// A from-scratch WordPiece tokenizer over a line-delimited vocabulary (line
/// index is the token id), matching the reference tokenizer's pre-tokenize ->
/// greedy-longest-match pipeline.
pub struct WordPieceTokenizer {
    vocab: HashMap<String, u32>,
    unk_id: u32,
    cls_id: u32,
    sep_id: u32,
    pub pad_id: u32,
}

impl WordPieceTokenizer {
    pub fn from_vocab_text(text: &str) -> Result<Self> {
        let mut vocab = HashMap::new();
        for (idx, line) in text.lines().enumerate() {
            let tok = line.trim_end_matches(['\n', '\r']);
            if !tok.is_empty() || idx == 0 {
                vocab.insert(tok.to_string(), idx as u32);
            }
        }
        let unk_id = *vocab
            .get(UNK)
            .ok_or_else(|| IndexError::resource("vocabulary is missing [UNK]"))?;
        let cls_id = *vocab.get(CLS).unwrap_or(&unk_id);
        let sep_id = *vocab.get(SEP).unwrap_or(&unk_id);
        let pad_id = *vocab.get(PAD).unwrap_or(&0);
        Ok(Self { vocab, unk_id, cls_id, sep_id, pad_id })
    }

    /// A minimal built-in vocabulary sufficient for tests and for the
    /// random-weight fallback model: ASCII lowercase words plus the four
    /// special tokens. Anything outside this set becomes `[UNK]`.
    pub fn minimal() -> Self {
        let mut vocab_lines = vec![PAD.to_string(), UNK.to_string(), CLS.to_string(), SEP.to_string()];
        for c in 'a'..='z' {
            vocab_lines.push(c.to_string());
        }
        vocab_lines.push("search".to_string());
        vocab_lines.push("query".to_string());
        vocab_lines.push("document".to_string());
        Self::from_vocab_text(&vocab_lines.join("\n")).expect("minimal vocab always has [UNK]")
    }

    fn strip_accents(s: &str) -> String {
        s.nfd().filter(|c| !is_combining_mark(*c)).collect()
    }

    fn is_cjk(c: char) -> bool {
        let cp = c as u32;
        (0x4E00..=0x9FFF).contains(&cp)
            || (0x3400..=0x4DBF).contains(&cp)
            || (0x20000..=0x2A6DF).contains(&cp)
            || (0xF900..=0xFAFF).contains(&cp)
    }

    fn basic_tokenize(text: &str) -> Vec<String> {
        let lowered = text.to_lowercase();
        let stripped = Self::strip_accents(&lowered);

        let mut spaced = String::with_capacity(stripped.len());
        for c in stripped.chars() {
            if Self::is_cjk(c) {
                spaced.push(' ');
                spaced.push(c);
                spaced.push(' ');
            } else {
                spaced.push(c);
            }
        }

        let mut tokens = Vec::new();
        for word in spaced.split_whitespace() {
            let mut current = String::new();
            for c in word.chars() {
                if c.is_ascii_punctuation() || (!c.is_alphanumeric() && !c.is_whitespace() && c as u32 > 127 && is_punct_like(c)) {
                    if !current.is_empty() {
                        tokens.push(std::mem::take(&mut current));
                    }
                    tokens.push(c.to_string());
                } else {
                    current.push(c);
                }
            }
            if !current.is_empty() {
                tokens.push(current);
            }
        }
        tokens
    }

    fn wordpiece_tokenize(&self, word: &str) -> Vec<String> {
        let chars: Vec<char> = word.chars().collect();
        if chars.is_empty() {
            return vec![];
        }
        let mut out = Vec::new();
        let mut start = 0usize;
        while start < chars.len() {
            let mut end = chars.len();
            let mut found: Option<String> = None;
            while end > start {
                let mut piece: String = chars[start..end].iter().collect();
                if start > 0 {
                    piece = format!("##{piece}");
                }
                if self.vocab.contains_key(&piece) {
                    found = Some(piece);
                    break;
                }
                end -= 1;
            }
            match found {
                Some(piece) => {
                    out.push(piece);
                    start = end;
                }
                None => return vec![UNK.to_string()],
            }
        }
        out
    }

    fn token_to_id(&self, token: &str) -> u32 {
        *self.vocab.get(token).unwrap_or(&self.unk_id)
    }

    /// Tokenizes and wraps with `[CLS] ... [SEP]`, truncating to `max_length`.
    pub fn encode(&self, text: &str, max_length: usize) -> Vec<u32> {
        let mut ids = vec![self.cls_id];
        for word in Self::basic_tokenize(text) {
            for piece in self.wordpiece_tokenize(&word) {
                ids.push(self.token_to_id(&piece));
            }
        }
        ids.push(self.sep_id);
        ids.truncate(max_length.max(2));
        if *ids.last().unwrap() != self.sep_id {
            let last = ids.len() - 1;
            ids[last] = self.sep_id;
        }
        ids
    }

    /// Encodes a batch and pads every sequence to the batch's own longest
    /// sequence (not the model's configured maximum).
    pub fn batch_encode(&self, texts: &[String], max_length: usize) -> (Vec<Vec<u32>>, Vec<Vec<bool>>) {
        let encoded: Vec<Vec<u32>> = texts.iter().map(|t| self.encode(t, max_length)).collect();
        let longest = encoded.iter().map(|e| e.len()).max().unwrap_or(0);
        let mut ids = Vec::with_capacity(encoded.len());
        let mut mask = Vec::with_capacity(encoded.len());
        for seq in encoded {
            let mut m = vec![true; seq.len()];
            let mut seq = seq;
            while seq.len() < longest {
                seq.push(self.pad_id);
                m.push(false);
            }
            ids.push(seq);
            mask.push(m);
        }
        (ids, mask)
    }
}

fn is_combining_mark(c: char) -> bool {
    matches!(c as u32, 0x0300..=0x036F | 0x1AB0..=0x1AFF | 0x1DC0..=0x1DFF | 0x20D0..=0x20FF)
}

fn is_punct_like(c: char) -> bool {
    c.is_ascii_punctuation() || unicode_general_category_is_punct(c)
}

/// Approximates Unicode general category `P*` (the original tokenizer uses
/// `unicodedata.category(char).startswith("P")`). `unicode-normalization`
/// gives us decomposition but no category table, so this enumerates the
/// common punctuation blocks (General Punctuation, CJK punctuation, the Latin-1
/// supplement punctuation, and the curly-quote/dash run) by code point range
/// rather than doing a full category lookup.
fn unicode_general_category_is_punct(c: char) -> bool {
    matches!(c as u32,
        0x00A1..=0x00BF // ¡ ¿ « » and other Latin-1 punctuation
        | 0x2010..=0x2027 // General Punctuation dashes, quotes, ellipsis
        | 0x2030..=0x205E // per-mille, guillemets, misc punctuation
        | 0x3000..=0x303F // CJK punctuation
        | 0xFF00..=0xFF0F | 0xFF1A..=0xFF20 | 0xFF3B..=0xFF40 | 0xFF5B..=0xFF65 // fullwidth ASCII punctuation
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_wraps_with_cls_and_sep() {
        let tok = WordPieceTokenizer::minimal();
        let ids = tok.encode("hello", 32);
        assert_eq!(ids[0], tok.cls_id);
        assert_eq!(*ids.last().unwrap(), tok.sep_id);
    }

    #[test]
    fn unknown_characters_become_unk() {
        let tok = WordPieceTokenizer::minimal();
        let ids = tok.encode("1234", 32);
        assert!(ids.contains(&tok.unk_id));
    }

    #[test]
    fn batch_encode_pads_to_longest_in_batch_not_max_length() {
        let tok = WordPieceTokenizer::minimal();
        let texts = vec!["a".to_string(), "a b c".to_string()];
        let (ids, mask) = tok.batch_encode(&texts, 512);
        assert_eq!(ids[0].len(), ids[1].len());
        assert!(ids[0].len() < 512);
        assert!(!mask[0].last().unwrap());
        assert!(*mask[1].last().unwrap());
    }

    #[test]
    fn truncates_to_max_length_and_keeps_trailing_sep() {
        let tok = WordPieceTokenizer::minimal();
        let long_text = "a ".repeat(100);
        let ids = tok.encode(&long_text, 8);
        assert_eq!(ids.len(), 8);
        assert_eq!(*ids.last().unwrap(), tok.sep_id);
    }

    #[test]
    fn strip_accents_removes_combining_marks() {
        assert_eq!(WordPieceTokenizer::strip_accents("café"), "cafe");
    }
}
