//! Text embedding client

use async_openai::config::OpenAIConfig;
use async_openai::types::CreateEmbeddingRequestArgs;
use async_openai::Client;
use async_trait::async_trait;
use tracing::{info, instrument};

use crate::config::OpenAiConfig;
use crate::{Result, TravelChatError};

/// Most inputs the embeddings API accepts in one request
const MAX_BATCH_SIZE: usize = 2048;

/// Turns text into embedding vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_documents(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| TravelChatError::Parse("No embeddings returned".to_string()))
    }

    /// Model identifier recorded with persisted indexes
    fn model_id(&self) -> &str;
}

/// Embedder backed by the OpenAI embeddings API
pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
    batch_size: usize,
}

impl OpenAiEmbedder {
    pub fn new(config: &OpenAiConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_deref()
            .ok_or_else(|| TravelChatError::Config("OPENAI_API_KEY is not set".to_string()))?;

        let mut openai = OpenAIConfig::new().with_api_key(api_key);
        if let Some(base_url) = &config.base_url {
            openai = openai.with_api_base(base_url);
        }

        Ok(Self {
            client: Client::with_config(openai),
            model: config.embedding_model.clone(),
            batch_size: MAX_BATCH_SIZE,
        })
    }

    /// Cap the number of inputs per request (at least 1, at most the API limit)
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.clamp(1, MAX_BATCH_SIZE);
        self
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(self.model.as_str())
            .input(texts.to_vec())
            .build()?;

        let start_time = std::time::Instant::now();
        let response = self.client.embeddings().create(request).await?;
        info!(
            duration_ms = start_time.elapsed().as_millis(),
            embeddings = response.data.len(),
            "Embeddings received"
        );

        if response.data.len() != texts.len() {
            return Err(TravelChatError::Parse(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                response.data.len()
            )));
        }

        // The API may return items out of order; `index` is authoritative
        let mut data = response.data;
        data.sort_by_key(|item| item.index);
        Ok(data.into_iter().map(|item| item.embedding).collect())
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    #[instrument(level = "debug", skip(self, texts), fields(model = %self.model, inputs = texts.len()))]
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            vectors.extend(self.embed_batch(batch).await?);
        }
        Ok(vectors)
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}
