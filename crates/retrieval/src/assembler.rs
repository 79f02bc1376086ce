//! Context assembly pipeline.
//!
//! Given a user question, produce a relevance-ranked, deduplicated,
//! token-budget-constrained block of retrieved passages ready to splice
//! into the model prompt:
//!
//! 1. Embed the question (one batched provider call)
//! 2. Query the vector index, restricted to the allowed partitions
//! 3. Interleave fresh hits with fixed quotes carried from the prior turn,
//!    dedup by quote id
//! 4. Greedily accumulate rendered lines until the remaining token budget
//!    (model context minus the reserved system/limit prompts) is exhausted
//! 5. Emit the rendered block, the prompt messages, and the cited quotes
//!
//! The cited-quote list is exactly the candidates consumed by the budget
//! loop in step 4.

use crate::token::estimate_tokens;
use promptweave_core::error::{Error, ProviderError};
use promptweave_core::index::VectorIndex;
use promptweave_core::message::PromptMessage;
use promptweave_core::provider::EmbeddingProvider;
use promptweave_core::quote::QuoteItem;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Default label prefixed to the quote block; callers localize it.
pub const DEFAULT_QUOTE_LABEL: &str = "knowledge base:";

/// How many of the best fresh hits are placed ahead of everything else.
const FRESH_HEAD: usize = 3;
/// How many carried-over quotes follow the fresh head.
const FIXED_HEAD: usize = 2;
/// Fraction of the fixed list eligible for the tail slice.
const FIXED_TAIL_RATIO: f32 = 0.4;

/// All inputs for one assembly run.
#[derive(Debug, Clone)]
pub struct AssemblyRequest<'a> {
    /// The user question to embed and search with.
    pub question: &'a str,

    /// Retrieval partitions the caller may read.
    pub partitions: &'a [String],

    /// Minimum similarity score for fresh hits.
    pub similarity: f32,

    /// Maximum number of fresh hits requested from the index.
    pub limit: usize,

    /// Quotes carried over from the previous turn.
    pub fixed_quotes: &'a [QuoteItem],

    /// The model's total context budget, in tokens.
    pub max_context_tokens: usize,

    /// Fixed system prompt surrounding the quote block ("" if none).
    pub system_prompt: &'a str,

    /// Fixed limit prompt ("" if none).
    pub limit_prompt: &'a str,

    /// Localized label prefixed to the quote block.
    pub quote_label: &'a str,
}

/// The assembled retrieval context.
#[derive(Debug, Clone)]
pub struct AssembledQuotes {
    /// The rendered quote block; empty string if no candidate survived.
    pub rendered: String,

    /// System message carrying the labeled quote block, when non-empty.
    pub quote_message: Option<PromptMessage>,

    /// The constant system prompt as a message, when non-empty.
    pub system_message: Option<PromptMessage>,

    /// The limit prompt as a message, when non-empty.
    pub limit_message: Option<PromptMessage>,

    /// The quotes actually rendered into the block, in render order.
    pub cited: Vec<QuoteItem>,

    /// Number of fresh index hits before interleaving.
    pub fresh_hits: usize,

    /// Billed embedding tokens, for the usage trace.
    pub embedding_tokens: u32,
}

/// Orchestrates embedding provider + vector index + the budget slicer.
pub struct ContextAssembler {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
}

impl ContextAssembler {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embedder, index }
    }

    /// Run the full pipeline for one question.
    pub async fn assemble(&self, req: AssemblyRequest<'_>) -> Result<AssembledQuotes, Error> {
        // 1. Embed. One batched call; a provider that reports zero usable
        // tokens fails here.
        let embedding = self.embedder.embed(&[req.question.to_string()]).await?;
        let vector = embedding
            .vectors
            .first()
            .ok_or_else(|| ProviderError::EmptyEmbedding(req.question.to_string()))?;

        // 2. Search, restricted to allowed partitions.
        let hits = self
            .index
            .search(vector, req.partitions, req.limit, req.similarity)
            .await?;
        let fresh: Vec<QuoteItem> = hits.into_iter().map(|h| h.quote).collect();
        let fresh_hits = fresh.len();

        debug!(
            question_chars = req.question.len(),
            fresh = fresh_hits,
            fixed = req.fixed_quotes.len(),
            "Retrieval search complete"
        );

        // 3. Interleave + dedup.
        let candidates = interleave(fresh, req.fixed_quotes);

        // 4. Token-budget slice.
        let reserved =
            estimate_tokens(req.system_prompt) + estimate_tokens(req.limit_prompt);
        let remaining = req.max_context_tokens.saturating_sub(reserved);
        let (rendered, cited) = render_budgeted(&candidates, remaining);

        debug!(
            candidates = candidates.len(),
            cited = cited.len(),
            reserved_tokens = reserved,
            remaining_tokens = remaining,
            "Quote block assembled"
        );

        // 5. Emit messages.
        let quote_message = (!rendered.is_empty())
            .then(|| PromptMessage::system(format!("{}\n{}", req.quote_label, rendered)));
        let system_message =
            (!req.system_prompt.is_empty()).then(|| PromptMessage::system(req.system_prompt));
        let limit_message =
            (!req.limit_prompt.is_empty()).then(|| PromptMessage::system(req.limit_prompt));

        Ok(AssembledQuotes {
            rendered,
            quote_message,
            system_message,
            limit_message,
            cited,
            fresh_hits,
            embedding_tokens: embedding.tokens,
        })
    }
}

/// Build the candidate list: the three best fresh hits, then up to two
/// carried-over quotes, then the remaining fresh hits, then a 40% tail
/// slice of the remaining fixed quotes — deduplicated by id, first
/// occurrence wins.
fn interleave(fresh: Vec<QuoteItem>, fixed: &[QuoteItem]) -> Vec<QuoteItem> {
    let tail_end = ((fixed.len() as f32) * FIXED_TAIL_RATIO).floor() as usize;

    let mut ordered: Vec<&QuoteItem> = Vec::with_capacity(fresh.len() + fixed.len());
    ordered.extend(fresh.iter().take(FRESH_HEAD));
    ordered.extend(fixed.iter().take(FIXED_HEAD));
    ordered.extend(fresh.iter().skip(FRESH_HEAD));
    if tail_end > FIXED_HEAD {
        ordered.extend(&fixed[FIXED_HEAD..tail_end]);
    }

    let mut seen = HashSet::new();
    ordered
        .into_iter()
        .filter(|q| seen.insert(q.id.clone()))
        .cloned()
        .collect()
}

/// Greedily render candidates as enumerated `"{i}: [{question}\n{answer}]"`
/// lines until the next line would exceed `budget` tokens. Returns the
/// joined block and exactly the candidates that were rendered.
fn render_budgeted(candidates: &[QuoteItem], budget: usize) -> (String, Vec<QuoteItem>) {
    let mut used = 0;
    let mut lines: Vec<String> = Vec::new();
    let mut cited: Vec<QuoteItem> = Vec::new();

    for (i, quote) in candidates.iter().enumerate() {
        let line = format!("{}: [{}\n{}]", i + 1, quote.question, quote.answer);
        let line_tokens = estimate_tokens(&line);
        if used + line_tokens > budget {
            break;
        }
        used += line_tokens;
        lines.push(line);
        cited.push(quote.clone());
    }

    (lines.join("\n"), cited)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use promptweave_core::error::{IndexError, ProviderError};
    use promptweave_core::provider::EmbeddingResponse;
    use promptweave_core::quote::QuoteHit;

    fn quote(id: &str) -> QuoteItem {
        QuoteItem::new(id, format!("Q {id}"), format!("A {id}"), "test")
    }

    /// Embedder returning a fixed unit vector.
    struct FixedEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn embed(
            &self,
            texts: &[String],
        ) -> std::result::Result<EmbeddingResponse, ProviderError> {
            Ok(EmbeddingResponse {
                vectors: texts.iter().map(|_| vec![1.0, 0.0]).collect(),
                tokens: 7,
            })
        }
    }

    /// Embedder that reports zero usable tokens.
    struct EmptyEmbedder;

    #[async_trait]
    impl EmbeddingProvider for EmptyEmbedder {
        fn name(&self) -> &str {
            "empty"
        }

        async fn embed(
            &self,
            texts: &[String],
        ) -> std::result::Result<EmbeddingResponse, ProviderError> {
            Err(ProviderError::EmptyEmbedding(texts.join(", ")))
        }
    }

    /// Index returning a scripted hit list regardless of the query.
    struct StaticIndex {
        hits: Vec<QuoteHit>,
    }

    impl StaticIndex {
        fn of(ids: &[&str]) -> Self {
            Self {
                hits: ids
                    .iter()
                    .enumerate()
                    .map(|(i, id)| QuoteHit {
                        quote: quote(id),
                        score: 1.0 - i as f32 * 0.01,
                    })
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl VectorIndex for StaticIndex {
        async fn search(
            &self,
            _vector: &[f32],
            _partitions: &[String],
            limit: usize,
            _threshold: f32,
        ) -> std::result::Result<Vec<QuoteHit>, IndexError> {
            Ok(self.hits.iter().take(limit).cloned().collect())
        }
    }

    fn assembler(index: StaticIndex) -> ContextAssembler {
        ContextAssembler::new(Arc::new(FixedEmbedder), Arc::new(index))
    }

    fn request<'a>(
        fixed: &'a [QuoteItem],
        partitions: &'a [String],
        budget: usize,
    ) -> AssemblyRequest<'a> {
        AssemblyRequest {
            question: "What is promptweave?",
            partitions,
            similarity: 0.8,
            limit: 5,
            fixed_quotes: fixed,
            max_context_tokens: budget,
            system_prompt: "",
            limit_prompt: "",
            quote_label: DEFAULT_QUOTE_LABEL,
        }
    }

    #[test]
    fn interleave_prioritizes_fresh_head_then_fixed_head() {
        let fresh = vec![quote("f1"), quote("f2"), quote("f3"), quote("f4")];
        let fixed = vec![quote("x1"), quote("x2"), quote("x3")];

        let out = interleave(fresh, &fixed);
        let ids: Vec<&str> = out.iter().map(|q| q.id.as_str()).collect();
        // fresh[0..3], fixed[0..2], fresh[3..]; tail slice empty for len 3
        assert_eq!(ids, ["f1", "f2", "f3", "x1", "x2", "f4"]);
    }

    #[test]
    fn interleave_includes_fixed_tail_slice() {
        let fresh = vec![quote("f1")];
        let fixed: Vec<QuoteItem> = (1..=10).map(|i| quote(&format!("x{i}"))).collect();

        let out = interleave(fresh, &fixed);
        let ids: Vec<&str> = out.iter().map(|q| q.id.as_str()).collect();
        // tail end = floor(10 * 0.4) = 4 → fixed[2..4]
        assert_eq!(ids, ["f1", "x1", "x2", "x3", "x4"]);
    }

    #[test]
    fn interleave_dedups_by_id_keeping_first() {
        let fresh = vec![quote("a"), quote("b")];
        let fixed = vec![quote("a"), quote("c")];

        let out = interleave(fresh, &fixed);
        let ids: Vec<&str> = out.iter().map(|q| q.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[test]
    fn render_budgeted_stops_at_budget() {
        let candidates: Vec<QuoteItem> = (1..=5).map(|i| quote(&format!("q{i}"))).collect();
        // each line ≈ "1: [Q q1\nA q1]" = 14 chars → 4 tokens
        let (block, cited) = render_budgeted(&candidates, 9);
        assert_eq!(cited.len(), 2);
        assert_eq!(block.lines().count(), 2);
        assert!(block.starts_with("1: [Q q1"));
    }

    #[test]
    fn render_budgeted_zero_budget_is_empty() {
        let candidates = vec![quote("a")];
        let (block, cited) = render_budgeted(&candidates, 0);
        assert!(block.is_empty());
        assert!(cited.is_empty());
    }

    #[test]
    fn budget_slicing_is_monotonic() {
        let candidates: Vec<QuoteItem> = (1..=8).map(|i| quote(&format!("q{i}"))).collect();
        let mut prev = 0;
        for budget in 0..60 {
            let (_, cited) = render_budgeted(&candidates, budget);
            assert!(cited.len() >= prev, "budget {budget} decreased the slice");
            prev = cited.len();
        }
    }

    #[tokio::test]
    async fn scenario_two_fresh_one_fixed_all_fit() {
        let fixed = vec![quote("x1")];
        let partitions = vec!["kb1".to_string()];
        let asm = assembler(StaticIndex::of(&["f1", "f2"]));

        let out = asm
            .assemble(request(&fixed, &partitions, 4096))
            .await
            .unwrap();

        let ids: Vec<&str> = out.cited.iter().map(|q| q.id.as_str()).collect();
        assert_eq!(ids, ["f1", "f2", "x1"]);
        assert_eq!(out.rendered.lines().count(), 3);
        assert_eq!(out.fresh_hits, 2);
        assert!(out.quote_message.is_some());
    }

    #[tokio::test]
    async fn cited_equals_rendered_when_budget_cuts() {
        let fixed: Vec<QuoteItem> = vec![];
        let partitions = vec!["kb1".to_string()];
        let asm = assembler(StaticIndex::of(&["f1", "f2", "f3", "f4", "f5"]));

        // Each line is 4 tokens; budget of 9 fits two lines.
        let out = asm.assemble(request(&fixed, &partitions, 9)).await.unwrap();

        assert_eq!(out.cited.len(), 2);
        assert_eq!(out.rendered.lines().count(), 2);
        for (i, q) in out.cited.iter().enumerate() {
            assert!(out.rendered.contains(&format!("{}: [{}", i + 1, q.question)));
        }
    }

    #[tokio::test]
    async fn no_duplicate_ids_across_fresh_and_fixed() {
        let fixed = vec![quote("f1"), quote("x1")];
        let partitions = vec!["kb1".to_string()];
        let asm = assembler(StaticIndex::of(&["f1", "f2"]));

        let out = asm
            .assemble(request(&fixed, &partitions, 4096))
            .await
            .unwrap();

        let mut seen = HashSet::new();
        for q in &out.cited {
            assert!(seen.insert(q.id.clone()), "duplicate id {}", q.id);
        }
        assert_eq!(out.cited.len(), 3);
    }

    #[tokio::test]
    async fn empty_results_render_empty_block() {
        let fixed: Vec<QuoteItem> = vec![];
        let partitions = vec!["kb1".to_string()];
        let asm = assembler(StaticIndex::of(&[]));

        let out = asm
            .assemble(request(&fixed, &partitions, 4096))
            .await
            .unwrap();

        assert!(out.rendered.is_empty());
        assert!(out.cited.is_empty());
        assert!(out.quote_message.is_none());
    }

    #[tokio::test]
    async fn system_and_limit_prompts_reserve_budget() {
        let fixed: Vec<QuoteItem> = vec![];
        let partitions = vec!["kb1".to_string()];
        let asm = assembler(StaticIndex::of(&["f1", "f2", "f3"]));

        let mut req = request(&fixed, &partitions, 12);
        // 24 chars → 6 tokens reserved, leaving 6 → one 4-token line.
        req.system_prompt = "You answer from quotes.!";
        let out = asm.assemble(req).await.unwrap();

        assert_eq!(out.cited.len(), 1);
        assert_eq!(
            out.system_message.as_ref().unwrap().content,
            "You answer from quotes.!"
        );
    }

    #[tokio::test]
    async fn embedding_failure_propagates() {
        let partitions = vec!["kb1".to_string()];
        let asm = ContextAssembler::new(
            Arc::new(EmptyEmbedder),
            Arc::new(StaticIndex::of(&["f1"])),
        );

        let fixed: Vec<QuoteItem> = vec![];
        let err = asm
            .assemble(request(&fixed, &partitions, 4096))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Provider(ProviderError::EmptyEmbedding(_))
        ));
    }

    #[tokio::test]
    async fn quote_message_carries_label() {
        let fixed: Vec<QuoteItem> = vec![];
        let partitions = vec!["kb1".to_string()];
        let asm = assembler(StaticIndex::of(&["f1"]));

        let out = asm
            .assemble(request(&fixed, &partitions, 4096))
            .await
            .unwrap();

        let msg = out.quote_message.unwrap();
        assert!(msg.content.starts_with(DEFAULT_QUOTE_LABEL));
        assert!(msg.content.contains("1: [Q f1"));
    }
}
