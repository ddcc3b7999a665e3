use clap::Parser;
use palaver::api::client::AzureCompletionClient;
use palaver::app::App;
use palaver::core::config::io::{self, load_llm_config, load_server_configs};
use palaver::core::conversation::ConversationEngine;
use palaver::core::prompter::StdinPrompter;
use palaver::mcp::enablement::ServerEnablement;
use palaver::mcp::pool::SessionPool;
use palaver::transcript::Transcript;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const DEFAULT_SYSTEM_PROMPT: &str = "Based on the user's instructions, analyze the user's intent, define goals to achieve that intent, invoke and execute necessary tools until the goals are accomplished, and finally return the response to the user.";

#[derive(Parser)]
#[command(name = "palaver")]
#[command(about = "An interactive terminal chat that bridges Azure OpenAI to MCP tool servers")]
struct Args {
    /// Print tool calls and their results as they happen
    #[arg(short, long)]
    verbose: bool,

    /// Append every message to this file, one JSON object per line
    #[arg(long, value_name = "FILE")]
    chatlog: Option<String>,

    /// Run a single prompt non-interactively and print the final answer
    #[arg(short, long, value_name = "PROMPT")]
    prompt: Option<String>,

    /// Directory holding mcp.json and azure.json
    #[arg(long, value_name = "DIR")]
    config_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let config_dir = match args.config_dir {
        Some(dir) => dir,
        None => match io::default_config_dir() {
            Ok(dir) => dir,
            Err(err) => {
                eprintln!("{err}");
                return ExitCode::FAILURE;
            }
        },
    };

    let llm_config = match load_llm_config(&io::llm_path(&config_dir)) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };
    let descriptors = match load_server_configs(&io::servers_path(&config_dir)) {
        Ok(descriptors) => descriptors,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let backend = match AzureCompletionClient::new(&llm_config) {
        Ok(backend) => backend,
        Err(err) => {
            eprintln!("Could not build completion client: {err}");
            return ExitCode::FAILURE;
        }
    };

    let system_prompt = format!(
        "{}\nCurrent date: {}",
        llm_config
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT),
        chrono::Local::now().format("%Y-%m-%d")
    );

    let batch = args.prompt.is_some();
    let mut transcript = Transcript::new(args.chatlog);
    let engine = ConversationEngine::new(system_prompt, &llm_config, &mut transcript)
        .with_batch_mode(batch)
        .with_verbose(args.verbose);

    let mut pool = SessionPool::new(descriptors);
    pool.connect_all().await;

    let mut app = App {
        engine,
        pool,
        enablement: ServerEnablement::default(),
        transcript,
        config_dir,
    };
    let mut prompter = StdinPrompter;

    if let Some(prompt) = args.prompt {
        let answer = app.run_batch(&prompt, &backend, &mut prompter).await;
        println!("{answer}");
    } else {
        app.run_interactive(&backend, &mut prompter).await;
    }

    app.pool.teardown().await;
    ExitCode::SUCCESS
}
