//! Generation orchestrator
//!
//! Turns a user message into a grounded answer: replay recent history,
//! retrieve passages, assemble a bounded prompt, call the chat model,
//! then keep only the citations the answer actually used. When nothing
//! clears the retrieval floor the configured empty-context policy
//! decides between a fixed decline and an ungrounded answer.

use std::sync::Arc;

use chrono::Utc;
use regex_lite::Regex;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use presail_common::config::{EmptyContextPolicy, GenerationConfig};
use presail_common::errors::Result;
use presail_common::llm::{ChatMessage, ChatModel};
use presail_common::metrics::{
    GENERATION_DECLINED, GENERATION_DURATION_SECONDS, GENERATION_REQUESTS,
};
use presail_common::models::{ChatTurn, Citation, TurnRole};
use presail_search::{RetrievedPassage, Retriever};

use crate::history::ConversationStore;

/// Fixed reply when the decline policy fires
const DECLINE_MESSAGE: &str =
    "I don't have enough material in the knowledge base to answer that reliably. \
     Try rephrasing the question, or upload the relevant documents first.";

const GROUNDED_SYSTEM_PROMPT: &str = "You are a presales assistant. Answer strictly from the \
     numbered context passages below. Cite every claim with its passage marker, e.g. [1]. \
     If the context does not cover the question, say so instead of guessing.";

const UNGROUNDED_SYSTEM_PROMPT: &str = "You are a presales assistant. No reference material \
     matched this question, so answer from general knowledge and start your reply by noting \
     that it is not based on the knowledge base.";

/// The orchestrator's reply: answer text plus the citations it used
#[derive(Debug, Clone)]
pub struct ChatAnswer {
    pub conversation_id: Uuid,
    pub answer: String,
    pub citations: Vec<Citation>,
    /// False when the answer was declined or produced without passages
    pub grounded: bool,
}

pub struct Orchestrator {
    retriever: Retriever,
    chat: Arc<dyn ChatModel>,
    history: ConversationStore,
    cfg: GenerationConfig,
}

impl Orchestrator {
    pub fn new(
        retriever: Retriever,
        chat: Arc<dyn ChatModel>,
        history: ConversationStore,
        cfg: GenerationConfig,
    ) -> Self {
        Self { retriever, chat, history, cfg }
    }

    /// Answer one user message within a conversation
    #[instrument(skip(self, message), fields(%conversation_id, collection))]
    pub async fn answer(
        &self,
        conversation_id: Uuid,
        message: &str,
        collection: &str,
    ) -> Result<ChatAnswer> {
        let start = std::time::Instant::now();
        metrics::counter!(GENERATION_REQUESTS).increment(1);

        // History is replayed without the turn being answered
        let history = self
            .history
            .recent(conversation_id, self.cfg.max_history_turns)
            .await?;
        self.record_turn(conversation_id, TurnRole::User, message, vec![])
            .await?;

        let passages = self.retriever.retrieve(message, collection).await?;

        let reply = if passages.is_empty() {
            match self.cfg.on_empty_context {
                EmptyContextPolicy::Decline => {
                    metrics::counter!(GENERATION_DECLINED).increment(1);
                    debug!(%conversation_id, "No passages cleared the floor, declining");
                    ChatAnswer {
                        conversation_id,
                        answer: DECLINE_MESSAGE.to_string(),
                        citations: vec![],
                        grounded: false,
                    }
                }
                EmptyContextPolicy::General => {
                    let prompt = self.assemble(UNGROUNDED_SYSTEM_PROMPT, &[], &history, message);
                    let answer = self.chat.complete(&prompt).await?;
                    ChatAnswer { conversation_id, answer, citations: vec![], grounded: false }
                }
            }
        } else {
            let prompt = self.assemble(GROUNDED_SYSTEM_PROMPT, &passages, &history, message);
            let answer = self.chat.complete(&prompt).await?;
            let citations = used_citations(&answer, &passages);
            if citations.is_empty() {
                warn!(%conversation_id, "Answer carried no citation markers");
            }
            ChatAnswer { conversation_id, answer, citations, grounded: true }
        };

        self.record_turn(
            conversation_id,
            TurnRole::Assistant,
            &reply.answer,
            reply.citations.clone(),
        )
        .await?;

        metrics::histogram!(GENERATION_DURATION_SECONDS).record(start.elapsed().as_secs_f64());
        Ok(reply)
    }

    /// Build the prompt inside the token budget. Passages take at most
    /// half of it; history fills what remains, oldest turns dropped
    /// first. The current message is always included.
    fn assemble(
        &self,
        system: &str,
        passages: &[RetrievedPassage],
        history: &[ChatTurn],
        message: &str,
    ) -> Vec<ChatMessage> {
        let budget = self.cfg.max_prompt_tokens;
        let mut used = estimate_tokens(system) + estimate_tokens(message);

        let mut context = String::new();
        if !passages.is_empty() {
            let passage_cap = used + budget / 2;
            context.push_str("Context passages:\n");
            for (i, passage) in passages.iter().enumerate() {
                let block = format!(
                    "[{}] {} ({}):\n{}\n\n",
                    i + 1,
                    passage.title,
                    passage.locator,
                    passage.content
                );
                let cost = estimate_tokens(&block);
                if i > 0 && used + cost > passage_cap {
                    break;
                }
                context.push_str(&block);
                used += cost;
            }
        }

        let mut kept = Vec::new();
        for turn in history.iter().rev() {
            let cost = estimate_tokens(&turn.content);
            if used + cost > budget {
                break;
            }
            used += cost;
            kept.push(turn);
        }
        kept.reverse();

        let mut messages = Vec::with_capacity(kept.len() + 3);
        messages.push(ChatMessage::system(system));
        if !context.is_empty() {
            messages.push(ChatMessage::system(context));
        }
        for turn in kept {
            messages.push(match turn.role {
                TurnRole::User => ChatMessage::user(turn.content.clone()),
                TurnRole::Assistant => ChatMessage::assistant(turn.content.clone()),
            });
        }
        messages.push(ChatMessage::user(message));
        messages
    }

    async fn record_turn(
        &self,
        conversation_id: Uuid,
        role: TurnRole,
        content: &str,
        citations: Vec<Citation>,
    ) -> Result<()> {
        self.history
            .append(&ChatTurn {
                id: Uuid::now_v7(),
                conversation_id,
                role,
                content: content.to_string(),
                citations,
                created_at: Utc::now(),
            })
            .await
    }
}

/// Rough token estimate, four characters per token
fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Map `[n]` markers in the answer back to the passages that were in
/// the prompt. Markers outside the passage range are ignored.
fn used_citations(answer: &str, passages: &[RetrievedPassage]) -> Vec<Citation> {
    let marker = Regex::new(r"\[(\d+)\]").expect("citation marker pattern is valid");

    let mut indexes: Vec<usize> = marker
        .captures_iter(answer)
        .filter_map(|c| c[1].parse::<usize>().ok())
        .filter(|&n| n >= 1 && n <= passages.len())
        .collect();
    indexes.sort_unstable();
    indexes.dedup();

    indexes
        .into_iter()
        .map(|n| passages[n - 1].citation(n))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use presail_common::config::{DatabaseConfig, RetrievalConfig};
    use presail_common::db;
    use presail_common::embeddings::{Embedder, MockEmbedder};
    use presail_common::llm::{ChatRole, MockChatModel};
    use presail_common::models::{ChunkRecord, DocFormat, OwnerKind};
    use presail_search::{DocumentStore, NewDocument, VectorIndex};

    const DIM: usize = 32;

    struct Harness {
        orchestrator: Orchestrator,
        chat: Arc<MockChatModel>,
        history: ConversationStore,
    }

    async fn harness(
        dir: &tempfile::TempDir,
        chunks: &[&str],
        reply: &str,
        cfg: GenerationConfig,
    ) -> Harness {
        let db_cfg = DatabaseConfig {
            path: dir.path().join("o.db").to_string_lossy().into_owned(),
            max_connections: 2,
            busy_timeout_secs: 1,
        };
        let pool = db::connect(&db_cfg).await.unwrap();
        db::run_migrations(&pool).await.unwrap();

        let embedder = Arc::new(MockEmbedder::new(DIM));
        let index = VectorIndex::new(pool.clone(), DIM);

        if !chunks.is_empty() {
            let doc = DocumentStore::new(pool.clone())
                .upsert(&NewDocument {
                    owner_kind: OwnerKind::CaseStudy,
                    owner_id: Uuid::new_v4(),
                    title: "Acme churn study".into(),
                    filename: "acme.pdf".into(),
                    format: DocFormat::Pdf,
                    size_bytes: 100,
                    content_hash: "hash".into(),
                    industry: None,
                    tags: vec![],
                })
                .await
                .unwrap();
            for (ordinal, content) in chunks.iter().enumerate() {
                let record = ChunkRecord {
                    id: ChunkRecord::deterministic_id(doc.id, ordinal as i32, content),
                    document_id: doc.id,
                    ordinal: ordinal as i32,
                    content: content.to_string(),
                    token_count: (content.len() / 4) as i32,
                    start_pos: 0,
                    end_pos: content.len() as i64,
                    page_start: Some(1),
                    page_end: Some(1),
                    content_hash: ChunkRecord::hash_content(content),
                };
                let vector = embedder.embed(content).await.unwrap();
                index.upsert(&record, &vector, "mock").await.unwrap();
            }
        }

        let retriever = Retriever::new(
            embedder,
            index,
            RetrievalConfig { top_k: 5, min_score: -1.0, per_document_cap: 5 },
        );
        let chat = Arc::new(MockChatModel::new(reply));
        let history = ConversationStore::new(pool);

        Harness {
            orchestrator: Orchestrator::new(
                retriever,
                chat.clone(),
                history.clone(),
                cfg,
            ),
            chat,
            history,
        }
    }

    fn config(policy: EmptyContextPolicy) -> GenerationConfig {
        GenerationConfig {
            provider: "mock".into(),
            on_empty_context: policy,
            ..GenerationConfig::default()
        }
    }

    #[tokio::test]
    async fn test_empty_retrieval_declines_without_model_call() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(&dir, &[], "should never be used", config(EmptyContextPolicy::Decline))
            .await;
        let conversation = Uuid::new_v4();

        let reply = h
            .orchestrator
            .answer(conversation, "what does the moon taste like?", "case_studies")
            .await
            .unwrap();

        assert_eq!(reply.answer, DECLINE_MESSAGE);
        assert!(reply.citations.is_empty());
        assert!(!reply.grounded);
        assert!(h.chat.calls().is_empty(), "decline must not reach the model");

        // Both turns still land in the conversation
        let turns = h.history.recent(conversation, 10).await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].role, TurnRole::Assistant);
        assert_eq!(turns[1].content, DECLINE_MESSAGE);
    }

    #[tokio::test]
    async fn test_general_policy_answers_ungrounded() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(&dir, &[], "speaking generally, quite dusty", config(EmptyContextPolicy::General))
            .await;

        let reply = h
            .orchestrator
            .answer(Uuid::new_v4(), "what does the moon taste like?", "case_studies")
            .await
            .unwrap();

        assert!(!reply.grounded);
        assert!(reply.citations.is_empty());
        assert_eq!(reply.answer, "speaking generally, quite dusty");

        let calls = h.chat.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0][0].content.contains("general knowledge"));
    }

    #[tokio::test]
    async fn test_grounded_answer_keeps_only_used_citations() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(
            &dir,
            &["churn dropped 32 percent", "churn dropped again later"],
            "Churn fell sharply [2], per the study.",
            config(EmptyContextPolicy::Decline),
        )
        .await;

        let reply = h
            .orchestrator
            .answer(Uuid::new_v4(), "churn dropped 32 percent", "case_studies")
            .await
            .unwrap();

        assert!(reply.grounded);
        assert_eq!(reply.citations.len(), 1);
        assert_eq!(reply.citations[0].index, 2);
        assert_eq!(reply.citations[0].title, "Acme churn study");

        // The prompt carried a numbered context block
        let calls = h.chat.calls();
        assert_eq!(calls.len(), 1);
        let context = &calls[0][1];
        assert_eq!(context.role, ChatRole::System);
        assert!(context.content.contains("[1] Acme churn study"));
    }

    #[tokio::test]
    async fn test_history_drops_oldest_turns_over_budget() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(EmptyContextPolicy::General);
        cfg.max_prompt_tokens = 120;
        let h = harness(&dir, &[], "ok", cfg).await;
        let conversation = Uuid::new_v4();

        let oldest = "x".repeat(300);
        h.orchestrator
            .answer(conversation, &oldest, "case_studies")
            .await
            .unwrap();
        h.orchestrator
            .answer(conversation, "short recent question", "case_studies")
            .await
            .unwrap();
        h.orchestrator
            .answer(conversation, "final", "case_studies")
            .await
            .unwrap();

        let calls = h.chat.calls();
        let last_prompt = calls.last().unwrap();
        let replayed: Vec<_> = last_prompt
            .iter()
            .map(|m| m.content.as_str())
            .collect();
        assert!(replayed.contains(&"short recent question"));
        assert!(!replayed.contains(&oldest.as_str()), "oldest turn must be dropped first");
    }

    #[test]
    fn test_marker_extraction_ignores_out_of_range() {
        let passages = vec![RetrievedPassage {
            chunk_id: Uuid::new_v4(),
            document_id: Uuid::new_v4(),
            title: "T".into(),
            content: "c".into(),
            locator: "p. 1".into(),
            score: 1.0,
        }];
        let citations = used_citations("see [1], [1] again, and bogus [7]", &passages);
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].index, 1);
    }

    #[test]
    fn test_token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}
