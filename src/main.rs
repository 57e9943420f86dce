use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use supply_copilot::config::Config;
use supply_copilot::dataset::DatasetStore;
use supply_copilot::fetch::GatewayClient;
use supply_copilot::llm::LlmClient;
use supply_copilot::orchestrator::ChatSession;
use supply_copilot::prompts::render_system_prompt;
use supply_copilot::sandbox::SandboxExecutor;
use supply_copilot::tools::ToolRegistry;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

#[derive(Parser)]
#[command(name = "supply-copilot")]
#[command(about = "AI assistant for supply chain data analysis")]
struct Args {
    /// A single question to answer; omit for an interactive chat
    question: Option<String>,

    /// Path to the table cache directory (default: ./data)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// OpenAI API key (or set OPENAI_API_KEY env var)
    #[arg(long)]
    api_key: Option<String>,

    /// Reuse the persisted table cache instead of refreshing from upstream
    #[arg(long)]
    skip_refresh: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "supply_copilot=info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = Config::from_env();
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(api_key) = args.api_key {
        config.openai_api_key = api_key;
    }

    let mut store = DatasetStore::open(&config.data_dir)?;
    if args.skip_refresh && store.is_loaded() {
        info!("Using persisted table cache in {}", config.data_dir.display());
    } else {
        let gateway = GatewayClient::new(
            config.gateway_base_url.clone(),
            config.gateway_ai_key.clone(),
            config.gateway_user_id.clone(),
        );
        store.refresh(&gateway).await?;
    }
    let system_prompt = render_system_prompt(&store);

    let model = Arc::new(LlmClient::new(
        config.openai_api_key.clone(),
        config.openai_model.clone(),
        config.openai_base_url.clone(),
    ));
    let registry = ToolRegistry::new(SandboxExecutor::new(
        config.python_bin.clone(),
        std::time::Duration::from_secs(config.sandbox_timeout_secs),
    ));
    let mut session = ChatSession::new(model, registry, system_prompt, &config);

    if let Some(question) = args.question {
        session.push_user(question);
        let answer = session.complete_turn().await;
        println!("{}", answer);
        print_cost(&session);
        return Ok(());
    }

    println!("supply-copilot ready. Ask a question, or type 'exit' to quit.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let line = match lines.next_line().await? {
            Some(line) => line,
            None => break,
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question == "exit" || question == "quit" {
            break;
        }

        session.push_user(question);
        let answer = session.complete_turn().await;
        println!("{}", answer);
        print_cost(&session);
    }

    Ok(())
}

fn print_cost(session: &ChatSession) {
    println!(
        "[tokens: {:.0} | cost estimation: {:.5} USD]",
        session.cost().tokens(),
        session.cost().cost_usd()
    );
}
