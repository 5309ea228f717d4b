use super::init::DeterministicRng;
use super::l2_normalize;
use super::tokenizer::WordPieceTokenizer;
use super::transformer::{precompute_rope, EncoderLayer};
use super::{EmbeddingModel, Mode};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pooling {
    Cls,
    LastToken,
    Mean,
}

pub struct TransformerEmbeddingModel {
    pub hidden: usize,
    pub max_seq_len: usize,
    pub query_prefix: String,
    pub document_prefix: String,
    pub pooling: Pooling,
    mode: Mode,
    tokenizer: WordPieceTokenizer,
    word_embeddings: Vec<Vec<f32>>,
    layers: Vec<EncoderLayer>,
    rotary_dim: usize,
}

impl TransformerEmbeddingModel {
    pub fn random(
        seed: u64,
        hidden: usize,
        num_heads: usize,
        intermediate: usize,
        num_layers: usize,
        max_seq_len: usize,
        pooling: Pooling,
        causal: bool,
        query_prefix: impl Into<String>,
        document_prefix: impl Into<String>,
    ) -> Self {
        let tokenizer = WordPieceTokenizer::minimal();
        let mut rng = DeterministicRng::new(seed);
        let vocab_size = 4096usize;
        let word_embeddings = (0..vocab_size).map(|_| rng.vec(hidden, 0.02)).collect();
        let layers = (0..num_layers).map(|_| EncoderLayer::random(&mut rng, hidden, num_heads, intermediate, causal)).collect();
        Self {
            hidden,
            max_seq_len,
            query_prefix: query_prefix.into(),
            document_prefix: document_prefix.into(),
            pooling,
            mode: Mode::Document,
            tokenizer,
            word_embeddings,
            layers,
            rotary_dim: hidden / num_heads,
        }
    }

    fn embed_one(&self, ids: &[u32], mask: &[bool]) -> Vec<f32> {
        let rope = precompute_rope(ids.len(), self.rotary_dim);
        let mut hidden: Vec<Vec<f32>> = ids
            .iter()
            .map(|&id| self.word_embeddings[id as usize % self.word_embeddings.len()].clone())
            .collect();

        for layer in &self.layers {
            hidden = layer.forward(&hidden, &rope, mask);
        }

        let pooled = match self.pooling {
            Pooling::Cls => hidden[0].clone(),
            Pooling::LastToken => {
                let last_valid = mask.iter().rposition(|&m| m).unwrap_or(0);
                hidden[last_valid].clone()
            }
            Pooling::Mean => {
                let valid: Vec<&Vec<f32>> = hidden.iter().zip(mask).filter(|(_, m)| **m).map(|(h, _)| h).collect();
                let count = valid.len().max(1) as f32;
                let mut acc = vec![0.0f32; self.hidden];
                for h in valid {
                    for (a, v) in acc.iter_mut().zip(h) {
                        *a += v;
                    }
                }
                acc.iter_mut().for_each(|a| *a /= count);
                acc
            }
        };
        pooled
    }
}

impl EmbeddingModel for TransformerEmbeddingModel {
    fn dim(&self) -> usize {
        self.hidden
    }

    fn max_seq_len(&self) -> usize {
        self.max_seq_len
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let prefix = match self.mode {
            Mode::Query => &self.query_prefix,
            Mode::Document => &self.document_prefix,
        };
        let prefixed: Vec<String> = texts.iter().map(|t| format!("{prefix}{t}")).collect();
        let (ids, masks) = self.tokenizer.batch_encode(&prefixed, self.max_seq_len.min(512));

        let mut out = Vec::with_capacity(texts.len());
        for (seq, mask) in ids.iter().zip(&masks) {
            let mut v = self.embed_one(seq, mask);
            l2_normalize(&mut v);
            out.push(v);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny(pooling: Pooling, causal: bool) -> TransformerEmbeddingModel {
        TransformerEmbeddingModel::random(1, 8, 2, 16, 1, 32, pooling, causal, "search_query: ", "search_document: ")
    }

    #[test]
    fn embed_rows_are_unit_norm_and_match_input_order() {
        let model = tiny(Pooling::Cls, false);
        let texts = vec!["a function".to_string(), "b struct".to_string()];
        let rows = model.embed(&texts).unwrap();
        assert_eq!(rows.len(), 2);
        for row in &rows {
            assert_eq!(row.len(), 8);
            let norm: f32 = row.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-3);
        }
    }

    #[test]
    fn empty_input_short_circuits() {
        let model = tiny(Pooling::Mean, true);
        assert!(model.embed(&[]).unwrap().is_empty());
    }

    #[test]
    fn query_and_document_modes_change_embedding() {
        let mut model = tiny(Pooling::LastToken, false);
        model.set_mode(Mode::Query);
        let q = model.embed(&["hello".to_string()]).unwrap();
        model.set_mode(Mode::Document);
        let d = model.embed(&["hello".to_string()]).unwrap();
        assert_ne!(q[0], d[0]);
    }
}
