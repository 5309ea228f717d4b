use std::sync::Arc;

use serde::Serialize;

use crate::config::DEFAULT_RERANK_CANDIDATES;
use crate::error::Result;
use crate::model::{Mode, ModelRegistry};
use crate::store::{SearchFilters, SearchHit, VectorStore};
use crate::structural;

#[derive(Debug, Clone, Serialize)]
pub struct EquivalenceResult {
    pub hit: SearchHit,
    pub structural_score: Option<f32>,
    pub combined_score: f32,
}

pub struct CrossLanguageFinder<'a> {
    pub store: Arc<dyn VectorStore>,
    pub models: &'a mut ModelRegistry,
}

impl<'a> CrossLanguageFinder<'a> {
    pub fn find_equivalents(
        &mut self,
        code: &str,
        source_language: &str,
        limit: usize,
        rerank: bool,
        structural_fusion: bool,
        target_languages: Option<&[String]>,
    ) -> Result<Vec<EquivalenceResult>> {
        let limit = limit.max(1);
        let rerank_model = if rerank { self.models.get_reranking_model()? } else { None };
        let candidates_limit = if rerank_model.is_some() { DEFAULT_RERANK_CANDIDATES } else { limit };

        let indexing_model = self.models.get_indexing_model()?;
        let query_vector = {
            let mut guard = indexing_model.lock().expect("model mutex poisoned");
            guard.set_mode(Mode::Document);
            guard.embed(&[code.to_string()])?.remove(0)
        };

        let mut candidates: Vec<SearchHit> = match target_languages {
            Some(targets) => {
                let targets: Vec<&String> = targets.iter().filter(|t| t.as_str() != source_language).collect();
                let per_target = (candidates_limit / targets.len().max(1)).max(1);
                let mut out = Vec::new();
                for target in targets {
                    let filters = SearchFilters { language: Some(target.clone()), ..Default::default() };
                    out.extend(self.store.search(&query_vector, per_target, &filters)?);
                }
                out
            }
            None => {
                let filters = SearchFilters { exclude_languages: vec![source_language.to_string()], ..Default::default() };
                self.store.search(&query_vector, candidates_limit, &filters)?
            }
        };

        if let Some(rerank_model) = rerank_model {
            let rerank_query = {
                let mut guard = rerank_model.lock().expect("model mutex poisoned");
                guard.set_mode(Mode::Query);
                guard.embed(&[code.to_string()])?.remove(0)
            };
            let texts: Vec<String> = candidates.iter().map(|h| h.record.text.clone()).collect();
            let doc_vectors = {
                let mut guard = rerank_model.lock().expect("model mutex poisoned");
                guard.set_mode(Mode::Document);
                guard.embed(&texts)?
            };
            for (hit, doc_vec) in candidates.iter_mut().zip(doc_vectors) {
                hit.distance = 1.0 - cosine(&rerank_query, &doc_vec);
            }
            candidates.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal));
            candidates.truncate(2 * limit);
        }

        let mut results: Vec<EquivalenceResult> = candidates
            .into_iter()
            .map(|hit| {
                let structural_score = structural_fusion.then(|| structural::compare(code, source_language, &hit.record.text, &hit.record.language));
                let combined_score = match structural_score {
                    Some(s) => 0.7 * hit.distance + 0.3 * (1.0 - s),
                    None => hit.distance,
                };
                EquivalenceResult { hit, structural_score, combined_score }
            })
            .collect();

        results.sort_by(|a, b| a.combined_score.partial_cmp(&b.combined_score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(limit);
        Ok(results)
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}
