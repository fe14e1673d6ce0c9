//! Interactive prompt loop routing queries to flight details or the chat chain

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info};

use crate::chain::{ChatHistory, ConversationalRetrievalChain};
use crate::parser::PassengerFlights;
use crate::Result;

const QUIT_WORDS: &[&str] = &["quit", "q", "exit"];
const FLIGHT_KEYWORD: &str = "flight";

/// How a line of user input is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Quit,
    Empty,
    /// Print the parsed structured details
    FlightDetails,
    /// Ask the retrieval chain
    Question,
}

pub fn classify(input: &str) -> QueryKind {
    let input = input.trim();
    if input.is_empty() {
        QueryKind::Empty
    } else if QUIT_WORDS.contains(&input) {
        QueryKind::Quit
    } else if input.to_lowercase().contains(FLIGHT_KEYWORD) {
        QueryKind::FlightDetails
    } else {
        QueryKind::Question
    }
}

pub fn format_flight_details(flights: &PassengerFlights) -> String {
    let mut out = String::from("Here are the flight details:\n");
    for (passenger, details) in flights.iter() {
        out.push_str(&format!("Passenger: {}\n", passenger));
        out.push_str(&format!("Departure City: {}\n", details.departure_city));
        out.push_str(&format!("Arrival City: {}\n", details.arrival_city));
        out.push_str(&format!("Departure Date: {}\n", details.departure_date));
        out.push_str(&format!("Departure Time: {}\n", details.departure_time));
        out.push_str(&format!("Arrival Date: {}\n", details.arrival_date));
        out.push_str(&format!("Arrival Time: {}\n", details.arrival_time));
        out.push_str(&format!("Price: {}\n", details.price));
        out.push('\n');
    }
    out
}

/// Conversation state for one itinerary
pub struct Assistant {
    flights: PassengerFlights,
    chain: ConversationalRetrievalChain,
    history: ChatHistory,
    initial_query: Option<String>,
}

impl Assistant {
    pub fn new(flights: PassengerFlights, chain: ConversationalRetrievalChain) -> Self {
        Self {
            flights,
            chain,
            history: ChatHistory::new(),
            initial_query: None,
        }
    }

    /// Answer `query` before showing the first prompt
    pub fn with_initial_query(mut self, query: Option<String>) -> Self {
        self.initial_query = query.filter(|q| !q.trim().is_empty());
        self
    }

    pub fn history(&self) -> &ChatHistory {
        &self.history
    }

    /// Run until a quit word or end of input
    pub async fn run<R, W>(&mut self, mut input: R, mut output: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        loop {
            let query = match self.initial_query.take() {
                Some(query) => query,
                None => {
                    output.write_all(b"Prompt: ").await?;
                    output.flush().await?;

                    let mut line = String::new();
                    if input.read_line(&mut line).await? == 0 {
                        debug!("End of input");
                        output.write_all(b"\n").await?;
                        output.flush().await?;
                        return Ok(());
                    }
                    line
                }
            };

            match classify(&query) {
                QueryKind::Quit => {
                    info!("Quit requested");
                    return Ok(());
                }
                QueryKind::Empty => continue,
                QueryKind::FlightDetails => {
                    output.write_all(format_flight_details(&self.flights).as_bytes()).await?;
                }
                QueryKind::Question => {
                    let query = query.trim();
                    match self.chain.ask(query, &self.history).await {
                        Ok(result) => {
                            output.write_all(format!("{}\n", result.answer).as_bytes()).await?;
                            self.history.push(query, result.answer);
                        }
                        Err(e) => {
                            error!(error = %e, "Chat request failed");
                            output.write_all(format!("Error: {}\n", e).as_bytes()).await?;
                        }
                    }
                }
            }
            output.flush().await?;
        }
    }
}
