//! End-to-end tests for the answer pipeline.
//!
//! Drive [`RagPipeline`] with the in-memory index and deterministic fake
//! providers, covering grounding, rewriting, citation dedup, streaming,
//! and failure classification.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use essay_rag_core::embedding::EmbeddingProvider;
use essay_rag_core::generate::{AnswerGenerator, Prompt, TokenStream};
use essay_rag_core::index::memory::InMemoryIndex;
use essay_rag_core::index::{IndexEntry, VectorIndex};
use essay_rag_core::models::ScoredDocument;
use essay_rag_core::prompt::{CONTEXTUALIZE_INSTRUCTION, NO_CONTEXT_NOTICE};
use essay_rag_core::rewrite::RewritePolicy;
use essay_rag_core::{ChatMessage, Document, RagError, RagPipeline, Source};
use futures_util::stream::{self, StreamExt};

// ─── Fakes ──────────────────────────────────────────────────────────

const DIMS: usize = 64;

/// Bag-of-words embedder: each word bumps one of `DIMS` buckets.
/// Records every text it is asked to embed.
#[derive(Default)]
struct BagOfWords {
    seen: Mutex<Vec<String>>,
}

fn bag_of_words(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for word in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
    {
        let bucket = word.bytes().fold(7usize, |h, b| h.wrapping_mul(31).wrapping_add(b as usize)) % DIMS;
        v[bucket] += 1.0;
    }
    v
}

#[async_trait]
impl EmbeddingProvider for BagOfWords {
    fn model_name(&self) -> &str {
        "bag-of-words"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.seen.lock().unwrap().extend(texts.iter().cloned());
        Ok(texts.iter().map(|t| bag_of_words(t)).collect())
    }
}

/// Answers with the first context passage, or "I don't know." when the
/// prompt says no context was found. Rewrite prompts get `rewrite_reply`.
struct GroundedEcho {
    rewrite_reply: String,
    prompts: Mutex<Vec<Prompt>>,
}

impl GroundedEcho {
    fn new() -> Arc<Self> {
        Self::with_rewrite("")
    }

    fn with_rewrite(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            rewrite_reply: reply.to_string(),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl AnswerGenerator for GroundedEcho {
    fn model_name(&self) -> &str {
        "grounded-echo"
    }

    async fn generate(&self, prompt: &Prompt) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.clone());
        let system = prompt.system_text().unwrap_or_default();
        if system == CONTEXTUALIZE_INSTRUCTION {
            return Ok(self.rewrite_reply.clone());
        }
        if system.contains(NO_CONTEXT_NOTICE) {
            return Ok("I don't know.".to_string());
        }
        let first_passage = system
            .split("Context:\n")
            .nth(1)
            .and_then(|ctx| ctx.split("\n\n").next())
            .unwrap_or_default();
        Ok(format!("According to the essays: {}", first_passage))
    }

    async fn stream(&self, prompt: &Prompt) -> Result<TokenStream> {
        let full = self.generate(prompt).await?;
        let words: Vec<Result<String>> = full
            .split_inclusive(' ')
            .map(|w| Ok(w.to_string()))
            .collect();
        Ok(stream::iter(words).boxed())
    }
}

struct TimingOutGenerator;

#[async_trait]
impl AnswerGenerator for TimingOutGenerator {
    fn model_name(&self) -> &str {
        "timeout"
    }
    async fn generate(&self, _prompt: &Prompt) -> Result<String> {
        anyhow::bail!("request timed out after 60s")
    }
}

struct UnreachableIndex;

#[async_trait]
impl VectorIndex for UnreachableIndex {
    fn name(&self) -> &str {
        "unreachable"
    }
    async fn search(&self, _q: &[f32], _limit: usize) -> Result<Vec<ScoredDocument>> {
        anyhow::bail!("connection refused")
    }
    async fn add(&self, _entries: &[IndexEntry]) -> Result<usize> {
        anyhow::bail!("connection refused")
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

async fn index_with(docs: &[(&str, &str, &str)]) -> Arc<InMemoryIndex> {
    let index = Arc::new(InMemoryIndex::new());
    let entries: Vec<IndexEntry> = docs
        .iter()
        .enumerate()
        .map(|(i, (title, url, content))| IndexEntry {
            id: format!("chunk-{}", i),
            document: Document::new(*content, *title, *url),
            vector: bag_of_words(content),
        })
        .collect();
    index.add(&entries).await.unwrap();
    index
}

fn src(title: &str, url: &str) -> Source {
    Source {
        title: title.to_string(),
        url: url.to_string(),
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_empty_index_answers_without_citations() {
    let gen = GroundedEcho::new();
    let pipeline = RagPipeline::new(
        Arc::new(BagOfWords::default()),
        Arc::new(InMemoryIndex::new()),
        gen.clone(),
    );

    let answer = pipeline
        .answer(&[], "What does the essay say about startups?")
        .await
        .unwrap();

    assert!(answer.sources.is_empty());
    assert!(answer.content.contains("don't know"));
    assert_eq!(gen.calls(), 1, "fast path must skip the rewrite call");
}

#[tokio::test]
async fn test_duplicate_titles_collapse_in_sources() {
    let question = "What does the essay say about startups?";
    let q = bag_of_words(question);
    let spare = q.iter().position(|x| *x == 0.0).unwrap();
    // Rank A, B, A by pushing each vector further off the query direction.
    let off_axis = |amount: f32| {
        let mut v = q.clone();
        v[spare] += amount;
        v
    };
    let mut unrelated = vec![0.0; DIMS];
    unrelated[spare] = 1.0;

    let index = Arc::new(InMemoryIndex::new());
    let entries = vec![
        ("A", "https://essays/a", "Startups are about growth.", off_axis(0.0)),
        ("B", "https://essays/b", "A startup is a company designed to grow fast.", off_axis(1.0)),
        ("A", "https://essays/a", "Growth is what startups do.", off_axis(2.0)),
        ("Z", "https://essays/z", "Painting, museums, and hackers.", unrelated),
    ];
    let entries: Vec<IndexEntry> = entries
        .into_iter()
        .enumerate()
        .map(|(i, (title, url, content, vector))| IndexEntry {
            id: format!("chunk-{}", i),
            document: Document::new(content, title, url),
            vector,
        })
        .collect();
    index.add(&entries).await.unwrap();
    let pipeline = RagPipeline::new(Arc::new(BagOfWords::default()), index, GroundedEcho::new());

    let answer = pipeline.answer(&[], question).await.unwrap();

    assert_eq!(
        answer.sources,
        vec![src("A", "https://essays/a"), src("B", "https://essays/b")]
    );
    assert!(answer.content.starts_with("According to the essays:"));
}

#[tokio::test]
async fn test_grounding_respects_k_and_order() {
    let index = index_with(&[
        ("One", "u1", "lisp lisp lisp macros"),
        ("Two", "u2", "lisp lisp macros"),
        ("Three", "u3", "lisp macros"),
        ("Four", "u4", "lisp"),
        ("Off", "u5", "painting museums"),
    ])
    .await;
    let pipeline =
        RagPipeline::new(Arc::new(BagOfWords::default()), index, GroundedEcho::new()).with_k(3);

    let grounded = pipeline.ground(&[], "lisp macros").await.unwrap();
    assert_eq!(grounded.documents.len(), 3);
    for pair in grounded.documents.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    let system = grounded.prompt.system_text().unwrap();
    let context = system.split("Context:\n").nth(1).unwrap();
    let expected: Vec<&str> = grounded
        .documents
        .iter()
        .map(|d| d.document.content.as_str())
        .collect();
    assert_eq!(context, expected.join("\n\n"));
    assert!(!context.contains("painting"));
}

#[tokio::test]
async fn test_generation_timeout_is_generation_unavailable() {
    let index = index_with(&[("A", "u", "startups")]).await;
    let pipeline = RagPipeline::new(
        Arc::new(BagOfWords::default()),
        index,
        Arc::new(TimingOutGenerator),
    );

    let err = pipeline.answer(&[], "startups?").await.unwrap_err();
    assert!(matches!(err, RagError::GenerationUnavailable(_)));
    assert!(err.to_string().contains("timed out"));
}

#[tokio::test]
async fn test_retrieval_failure_fails_closed() {
    let gen = GroundedEcho::new();
    let pipeline = RagPipeline::new(
        Arc::new(BagOfWords::default()),
        Arc::new(UnreachableIndex),
        gen.clone(),
    );

    let err = pipeline.answer(&[], "startups?").await.unwrap_err();
    assert!(matches!(err, RagError::RetrievalUnavailable(_)));
    assert_eq!(gen.calls(), 0, "no answer may be generated without grounding");
}

#[tokio::test]
async fn test_history_rewrites_query_before_retrieval() {
    let embedder = Arc::new(BagOfWords::default());
    let gen = GroundedEcho::with_rewrite("Why did Paul Graham choose Lisp for Viaweb?");
    let index = index_with(&[("Beating the Averages", "u", "Viaweb was written in Lisp.")]).await;
    let pipeline = RagPipeline::new(embedder.clone(), index, gen.clone());

    let history = vec![
        ChatMessage::user("What language was Viaweb written in?"),
        ChatMessage::system("Lisp.", vec![src("Beating the Averages", "u")]),
    ];
    let answer = pipeline.answer(&history, "Why?").await.unwrap();

    assert_eq!(
        embedder.seen.lock().unwrap().as_slice(),
        ["Why did Paul Graham choose Lisp for Viaweb?".to_string()]
    );
    assert_eq!(answer.sources, vec![src("Beating the Averages", "u")]);

    let prompts = gen.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 2);
    // The answer prompt still ends with the user's own words.
    assert_eq!(prompts[1].last_user_text(), Some("Why?"));
    assert_eq!(prompts[1].messages.len(), history.len() + 2);
}

#[tokio::test]
async fn test_always_policy_rewrites_first_turn() {
    let embedder = Arc::new(BagOfWords::default());
    let gen = GroundedEcho::with_rewrite("What is a startup?");
    let pipeline = RagPipeline::new(embedder.clone(), Arc::new(InMemoryIndex::new()), gen.clone())
        .with_rewrite_policy(RewritePolicy::Always);

    pipeline.answer(&[], "startup??").await.unwrap();
    assert_eq!(
        embedder.seen.lock().unwrap().as_slice(),
        ["What is a startup?".to_string()]
    );
    assert_eq!(gen.calls(), 2);
}

#[tokio::test]
async fn test_invalid_requests_touch_no_provider() {
    let embedder = Arc::new(BagOfWords::default());
    let gen = GroundedEcho::new();
    let pipeline = RagPipeline::new(embedder.clone(), Arc::new(InMemoryIndex::new()), gen.clone());

    let err = pipeline.answer(&[], "   ").await.unwrap_err();
    assert!(matches!(err, RagError::InvalidRequest(_)));
    assert!(!err.is_retryable());
    assert!(embedder.seen.lock().unwrap().is_empty());
    assert_eq!(gen.calls(), 0);
}

#[tokio::test]
async fn test_stream_collects_to_same_answer() {
    let docs = [
        ("How to Start a Startup", "u1", "You need three things to create a successful startup."),
        ("Default Alive", "u2", "Is your startup default alive or default dead?"),
    ];
    let pipeline = RagPipeline::new(
        Arc::new(BagOfWords::default()),
        index_with(&docs).await,
        GroundedEcho::new(),
    );

    let buffered = pipeline.answer(&[], "startup").await.unwrap();
    let streamed = pipeline
        .answer_stream(&[], "startup")
        .await
        .unwrap()
        .collect()
        .await
        .unwrap();
    assert_eq!(streamed, buffered);
}

/// Replies with whitespace only, streamed as several chunks.
struct BlankGenerator;

#[async_trait]
impl AnswerGenerator for BlankGenerator {
    fn model_name(&self) -> &str {
        "blank"
    }
    async fn generate(&self, _prompt: &Prompt) -> Result<String> {
        Ok("  \n ".to_string())
    }
    async fn stream(&self, _prompt: &Prompt) -> Result<TokenStream> {
        Ok(stream::iter(vec![Ok("  ".to_string()), Ok("\n ".to_string())]).boxed())
    }
}

#[tokio::test]
async fn test_blank_reply_fails_buffered_and_streamed_alike() {
    let docs = [("Do Things that Don't Scale", "u1", "Recruit users manually at first.")];
    let pipeline = RagPipeline::new(
        Arc::new(BagOfWords::default()),
        index_with(&docs).await,
        Arc::new(BlankGenerator),
    );

    let buffered = pipeline.answer(&[], "recruit users").await.unwrap_err();
    assert!(matches!(buffered, RagError::GenerationUnavailable(_)));

    let streamed = pipeline
        .answer_stream(&[], "recruit users")
        .await
        .unwrap()
        .collect()
        .await
        .unwrap_err();
    assert!(matches!(streamed, RagError::GenerationUnavailable(_)));
    assert!(streamed.to_string().contains("empty answer"));
}

#[tokio::test]
async fn test_blank_stream_ends_with_error_after_chunks() {
    let pipeline = RagPipeline::new(
        Arc::new(BagOfWords::default()),
        Arc::new(InMemoryIndex::new()),
        Arc::new(BlankGenerator),
    );

    let mut tokens = pipeline.answer_stream(&[], "anything").await.unwrap().tokens;
    assert_eq!(tokens.next().await.unwrap().unwrap(), "  ");
    assert_eq!(tokens.next().await.unwrap().unwrap(), "\n ");
    assert!(tokens.next().await.unwrap().is_err());
    assert!(tokens.next().await.is_none());
}

#[tokio::test]
async fn test_leading_whitespace_chunks_are_not_blank() {
    struct LateText;

    #[async_trait]
    impl AnswerGenerator for LateText {
        fn model_name(&self) -> &str {
            "late-text"
        }
        async fn generate(&self, _prompt: &Prompt) -> Result<String> {
            Ok("\nMake something people want.".to_string())
        }
        async fn stream(&self, _prompt: &Prompt) -> Result<TokenStream> {
            Ok(stream::iter(vec![
                Ok("\n".to_string()),
                Ok("Make something people want.".to_string()),
            ])
            .boxed())
        }
    }

    let pipeline = RagPipeline::new(
        Arc::new(BagOfWords::default()),
        Arc::new(InMemoryIndex::new()),
        Arc::new(LateText),
    );
    let buffered = pipeline.answer(&[], "advice").await.unwrap();
    let streamed = pipeline
        .answer_stream(&[], "advice")
        .await
        .unwrap()
        .collect()
        .await
        .unwrap();
    assert_eq!(streamed, buffered);
}
