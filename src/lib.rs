//! # Travel Chat Library
//!
//! Answers natural-language questions about a travel itinerary. A free-text
//! plan is submitted to a SOAP travel-booking service, the flight fields are
//! pulled out of the response, and the raw response is indexed so follow-up
//! questions can be answered by a retrieval-augmented chat model.

pub mod assistant;
pub mod chain;
pub mod client;
pub mod config;
pub mod embeddings;
pub mod index;
pub mod llm;
pub mod parser;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// Re-export main types for convenience
pub use assistant::{classify, format_flight_details, Assistant, QueryKind};
pub use chain::{ChainAnswer, ChatHistory, ConversationalRetrievalChain};
pub use client::TravelClient;
pub use config::{Config, IndexConfig, OpenAiConfig, SoapConfig};
pub use embeddings::{Embedder, OpenAiEmbedder};
pub use index::{KnowledgeIndexer, ScoredChunk, TextChunk, TextSplitter, VectorIndex};
pub use llm::{ChatMessage, ChatModel, ChatRole, OpenAiChatModel};
pub use parser::{FlightDetailsParser, PassengerFlights};

/// Error types for the travel chat library
#[derive(Error, Debug)]
pub enum TravelChatError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("SOAP fault: {0}")]
    SoapFault(String),

    #[error("SOAP parsing failed: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("OpenAI API error: {0}")]
    OpenAi(#[from] async_openai::error::OpenAIError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Input must not be empty: {0}")]
    EmptyInput(&'static str),

    #[error("Index was built with embedding model {found}, expected {expected}")]
    IndexMismatch { expected: String, found: String },
}

pub type Result<T, E = TravelChatError> = std::result::Result<T, E>;

/// Price information with amount and currency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightPrice {
    pub amount: f64,
    pub currency: String,
}

/// Flight fields extracted for a single passenger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightDetails {
    pub departure_city: String,
    pub arrival_city: String,
    pub departure_date: String,
    pub departure_time: String,
    pub arrival_date: String,
    pub arrival_time: String,
    /// Price text exactly as the service returned it
    pub price: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parsed_price: Option<FlightPrice>,
}

/// Submit a travel plan using settings from `config` and return the raw SOAP response.
pub async fn get_travel_plan_details(config: &Config, plan: &str) -> Result<String> {
    let client = TravelClient::new(&config.soap)?;
    client.get_travel_plan_details(plan).await
}

/// Submit a travel plan and parse the passenger flight details out of the response.
///
/// Returns both the raw response (for indexing) and the parsed details.
pub async fn fetch_flight_details(config: &Config, plan: &str) -> Result<(String, PassengerFlights)> {
    let soap = get_travel_plan_details(config, plan).await?;
    let details = FlightDetailsParser::new()?.parse(&soap)?;
    Ok((soap, details))
}

/// Parse the flight details of a session's SOAP response.
///
/// A response without passengers still carries text worth chatting about, so
/// that case yields an empty map unless `require_passengers` is set. SOAP
/// faults are always errors.
pub fn session_flight_details(soap: &str, require_passengers: bool) -> Result<PassengerFlights> {
    match FlightDetailsParser::new()?.parse(soap) {
        Ok(flights) => Ok(flights),
        Err(TravelChatError::Parse(msg)) if !require_passengers => {
            tracing::warn!(error = %msg, "No structured flight details, continuing with chat only");
            Ok(PassengerFlights::new())
        }
        Err(e) => Err(e),
    }
}
