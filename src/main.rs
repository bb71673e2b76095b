use anyhow::Result;
use clap::{Parser, Subcommand};
use retail_insights::config::LlmConfig;
use retail_insights::dataset::Dataset;
use retail_insights::executor::ExecutorConfig;
use retail_insights::guardrail::Mode;
use retail_insights::llm::LlmClient;
use retail_insights::orchestrator::{Orchestrator, PipelineOutcome};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "retail-insights")]
#[command(about = "Natural-language analytics over an uploaded sales dataset")]
struct Args {
    /// Path to the dataset (CSV or JSON)
    #[arg(short, long)]
    data: PathBuf,

    /// Print the debug trace after the answer
    #[arg(long)]
    trace: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate an automated performance summary
    Summarize,
    /// Ask a free-form question about the data
    Ask {
        /// The business question in natural language
        question: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config = LlmConfig::from_env()?;
    let llm = Arc::new(LlmClient::new(config)?);
    let orchestrator = Orchestrator::new(llm, ExecutorConfig::default());

    info!("Loading dataset from {}", args.data.display());
    let dataset = Dataset::from_path(&args.data)?;
    info!(
        "Loaded {} rows x {} columns",
        dataset.row_count(),
        dataset.column_count()
    );

    let (mode, question) = match &args.command {
        Command::Summarize => (Mode::Summarization, None),
        Command::Ask { question } => (Mode::Qa, Some(question.as_str())),
    };

    let run = orchestrator.run(mode, &dataset, question).await;

    match &run.outcome {
        PipelineOutcome::Answer(answer) => println!("{}", answer),
        PipelineOutcome::Refusal(reason) => println!("{}", reason),
        PipelineOutcome::Error(message) => eprintln!("Error: {}", message),
    }

    if args.trace {
        println!("\n--- Debug trace ({}) ---", run.trace.request_id);
        println!("{}", serde_json::to_string_pretty(&run.trace.entries)?);
    }

    Ok(())
}
