//! CLI interface for travel-chat

use anyhow::{Context, Result};
use clap::Parser;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use travel_chat::{
    get_travel_plan_details, session_flight_details, Assistant, Config,
    ConversationalRetrievalChain, KnowledgeIndexer, OpenAiChatModel, OpenAiEmbedder,
};

#[derive(Parser, Debug)]
#[command(name = "travel-chat")]
#[command(about = "Ask questions about a travel itinerary fetched from a SOAP booking service")]
#[command(version)]
pub struct Cli {
    /// Free-text description of the travel plans (prompted for when omitted)
    #[arg(short, long)]
    pub plan: Option<String>,
    /// First query to answer before prompting
    #[arg(short, long)]
    pub query: Option<String>,
    /// SOAP endpoint URL
    #[arg(long)]
    pub endpoint: Option<String>,
    /// SOAPAction header value
    #[arg(long)]
    pub soap_action: Option<String>,
    /// Save the index to disk and reuse it on later runs
    #[arg(long)]
    pub persist: bool,
    /// Directory for the persisted index
    #[arg(long)]
    pub persist_dir: Option<PathBuf>,
    /// Chat model name
    #[arg(short, long)]
    pub model: Option<String>,
    /// Number of chunks retrieved per question
    #[arg(short)]
    pub k: Option<usize>,
    /// Print the parsed flight details as JSON and exit
    #[arg(long)]
    pub details_only: bool,
    /// Also write logs to a daily rotating file in this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
    /// Write file logs as JSON
    #[arg(long)]
    pub json_logs: bool,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(endpoint) = &self.endpoint {
            config.soap.endpoint = endpoint.clone();
        }
        if let Some(action) = &self.soap_action {
            config.soap.action = action.clone();
        }
        if self.persist {
            config.index.persist = true;
        }
        if let Some(dir) = &self.persist_dir {
            config.index.persist_dir = dir.clone();
        }
        if let Some(model) = &self.model {
            config.openai.chat_model = model.clone();
        }
        if let Some(k) = self.k {
            config.index.retrieval_k = k;
        }
    }
}

/// Initialize logging to stderr, plus an optional rolling file
fn init_logging(log_dir: Option<&PathBuf>, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("travel_chat=info"));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(false);

    let file_layer = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
            let file_appender = tracing_appender::rolling::daily(dir, "travel-chat.log");
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_file(true)
                .with_line_number(true);
            Some(if json { layer.json().boxed() } else { layer.boxed() })
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(())
}

async fn read_plan<R: AsyncBufRead + Unpin>(cli_plan: Option<String>, input: &mut R) -> Result<String> {
    if let Some(plan) = cli_plan {
        return Ok(plan);
    }

    let mut stdout = tokio::io::stdout();
    stdout.write_all(b"Please describe your travel plans: ").await?;
    stdout.flush().await?;
    let mut plan = String::new();
    input.read_line(&mut plan).await?;
    Ok(plan.trim().to_string())
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load();
    cli.apply(&mut config);
    if !cli.details_only {
        config.validate()?;
    }

    let mut stdin = BufReader::new(tokio::io::stdin());
    let plan = read_plan(cli.plan.clone(), &mut stdin).await?;
    let soap = get_travel_plan_details(&config, &plan)
        .await
        .context("submitting travel plan")?;

    let flights = session_flight_details(&soap, cli.details_only).context("parsing SOAP response")?;
    info!(passengers = flights.len(), "Flight details parsed");

    if cli.details_only {
        println!("{}", serde_json::to_string_pretty(&flights)?);
        return Ok(());
    }

    let embedder = Arc::new(OpenAiEmbedder::new(&config.openai)?);
    let llm = Arc::new(OpenAiChatModel::new(&config.openai)?);

    let indexer = KnowledgeIndexer::new(embedder.clone(), config.index.clone())?;
    let index = indexer.build(&soap).await.context("building knowledge index")?;

    let chain = ConversationalRetrievalChain::new(llm, embedder, index, config.index.retrieval_k);
    let mut assistant = Assistant::new(flights, chain).with_initial_query(cli.query.clone());

    assistant.run(stdin, tokio::io::stdout()).await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.log_dir.as_ref(), cli.json_logs) {
        eprintln!("Error initializing logging: {:#}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
