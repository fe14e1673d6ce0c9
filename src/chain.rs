//! Conversational retrieval: condense, retrieve, answer

use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::embeddings::Embedder;
use crate::index::{TextChunk, VectorIndex};
use crate::llm::{ChatMessage, ChatModel};
use crate::{Result, TravelChatError};

const CONDENSE_TEMPLATE: &str = "Given the following conversation and a follow up question, \
rephrase the follow up question to be a standalone question, in its original language.\n\n\
Chat History:\n{chat_history}\nFollow Up Input: {question}\nStandalone question:";

const ANSWER_TEMPLATE: &str = "Use the following pieces of context to answer the user's question. \n\
If you don't know the answer, just say that you don't know, don't try to make up an answer.\n\
----------------\n{context}";

/// Question/answer turns of the conversation so far
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatHistory {
    turns: Vec<(String, String)>,
}

impl ChatHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, question: impl Into<String>, answer: impl Into<String>) {
        self.turns.push((question.into(), answer.into()));
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.turns.iter().map(|(q, a)| (q.as_str(), a.as_str()))
    }

    /// Render as `Human:`/`Assistant:` lines for the condense prompt
    pub fn render(&self) -> String {
        self.iter()
            .map(|(question, answer)| format!("Human: {}\nAssistant: {}", question, answer))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChainAnswer {
    pub answer: String,
    pub standalone_question: String,
    pub sources: Vec<TextChunk>,
}

/// Answers questions grounded in the chunks of a [`VectorIndex`]
pub struct ConversationalRetrievalChain {
    llm: Arc<dyn ChatModel>,
    embedder: Arc<dyn Embedder>,
    index: VectorIndex,
    k: usize,
}

impl ConversationalRetrievalChain {
    pub fn new(llm: Arc<dyn ChatModel>, embedder: Arc<dyn Embedder>, index: VectorIndex, k: usize) -> Self {
        Self { llm, embedder, index, k }
    }

    #[instrument(level = "info", skip(self, question, history), fields(history = history.len()))]
    pub async fn ask(&self, question: &str, history: &ChatHistory) -> Result<ChainAnswer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(TravelChatError::EmptyInput("question"));
        }

        let standalone_question = if history.is_empty() {
            question.to_string()
        } else {
            self.condense(question, history).await?
        };

        let query = self.embedder.embed_query(&standalone_question).await?;
        let sources: Vec<TextChunk> = self
            .index
            .search(&query, self.k)
            .into_iter()
            .map(|scored| {
                debug!(chunk = scored.chunk.id, score = scored.score, "Retrieved chunk");
                scored.chunk
            })
            .collect();

        let context = sources
            .iter()
            .map(|chunk| chunk.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let messages = [
            ChatMessage::system(ANSWER_TEMPLATE.replace("{context}", &context)),
            ChatMessage::user(standalone_question.as_str()),
        ];
        let answer = self.llm.complete(&messages).await?;
        info!(sources = sources.len(), answer_length = answer.len(), "Question answered");

        Ok(ChainAnswer {
            answer,
            standalone_question,
            sources,
        })
    }

    async fn condense(&self, question: &str, history: &ChatHistory) -> Result<String> {
        let prompt = CONDENSE_TEMPLATE
            .replace("{chat_history}", &history.render())
            .replace("{question}", question);

        let condensed = self.llm.complete(&[ChatMessage::user(prompt)]).await?;
        let condensed = condensed.trim();
        debug!(standalone = condensed, "Condensed follow-up question");

        if condensed.is_empty() {
            Ok(question.to_string())
        } else {
            Ok(condensed.to_string())
        }
    }
}
