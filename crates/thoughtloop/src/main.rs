//! A terminal front end for `thoughtloop`.

#[macro_use]
extern crate tracing;

mod cli;

use std::env;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use thoughtloop::core::memory::new_memory;
use thoughtloop::core::{
    AgentContext, Error, ModelClient, StreamItem, build_agent,
};
use thoughtloop::tools::{FetchContext, default_registry};
use thoughtloop::{Session, SessionBuilder};
use thoughtloop_openai_model::{OpenAIConfigBuilder, OpenAIProvider};
use tokio::io::{self, AsyncBufReadExt};
use tokio::select;
use tokio::time::sleep;

use crate::cli::Cli;

const BAR_CHAR: &str = "▎";
const FETCH_INTERVAL: Duration = Duration::from_secs(1);
const SYSTEM_PROMPT: &str = "あなたは親切なアシスタントです。必要に応じてツールを使い、日本語で簡潔に答えてください。";

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    if let Err(err) = init_tracing(cli.log_file.as_deref()) {
        eprintln!("failed to open log file: {err}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(Error::Config(reason)) => {
            error!("configuration error: {reason}");
            eprintln!("{reason}");
            ExitCode::FAILURE
        }
        Err(err) => {
            error!("{err}");
            eprintln!("{}", format!("エラー: {err}").red());
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(log_file: Option<&Path>) -> Result<(), std::io::Error> {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{EnvFilter, fmt};

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(fmt::layer().with_writer(Arc::new(file)).with_ansi(false))
        }
        None => None,
    };
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .with(file_layer)
        .init();
    Ok(())
}

fn model_client(cli: &Cli) -> Result<ModelClient, Error> {
    let Ok(api_key) = env::var("OPENAI_API_KEY") else {
        return Err(Error::Config(
            "OPENAI_API_KEY environment variable is not set".to_owned(),
        ));
    };

    let mut config = OpenAIConfigBuilder::with_api_key(api_key)
        .with_timeout(Duration::from_secs(cli.timeout));
    if let Ok(base_url) = env::var("OPENAI_BASE_URL") {
        config = config.with_base_url(base_url);
    }
    if let Ok(model) = env::var("OPENAI_MODEL") {
        config = config.with_model(model);
    }
    let token_price = match env::var("OPENAI_TOKEN_PRICE") {
        Ok(price) => price.parse().unwrap_or_else(|_| {
            warn!("ignoring invalid OPENAI_TOKEN_PRICE {price:?}");
            0.0
        }),
        Err(_) => 0.0,
    };

    let provider = OpenAIProvider::new(config.build());
    let mut client = ModelClient::with_token_price(provider, token_price);
    client.set_temperature(cli.temperature);
    Ok(client)
}

fn build_session(cli: &Cli) -> Result<Session, Error> {
    let client = model_client(cli)?;
    let fetch = FetchContext::new(FETCH_INTERVAL).map_err(|err| {
        Error::Config(format!("failed to create HTTP client: {err}"))
    })?;
    let tools = default_registry(fetch, &cli.db)?;

    let mut builder = SessionBuilder::with_model_client(client.clone())
        .with_tools(tools.clone())
        .with_max_tool_rounds(cli.max_tool_rounds)
        .with_conversations_dir(&cli.conversations_dir)
        .with_system_prompt(SYSTEM_PROMPT);

    if let Some(kind) = cli.agent.agent_kind() {
        let mut memory = new_memory(cli.memory.into());
        if let Some(path) = &cli.memory_file {
            if path.exists() {
                memory.load(path)?;
                info!("loaded {} messages from {}", memory.len(), path.display());
            }
        }

        let mut context = AgentContext::new(client)
            .with_tools(tools)
            .with_memory(memory);
        context.react.max_turns = cli.max_turns;
        context.cot.max_steps = cli.max_turns;
        context.tot.max_depth = cli.depth as usize;
        context.tot.breadth = cli.breadth as usize;
        builder = builder.with_agent(build_agent(kind, context));
    }

    Ok(builder.build())
}

async fn run(cli: Cli) -> Result<(), Error> {
    let mut session = build_session(&cli)?;
    let blocking = cli.agent.agent_kind().is_some() && !cli.stream;

    let progress_style = ProgressStyle::with_template("{spinner} {wide_msg}")
        .map_err(|err| Error::Config(err.to_string()))?
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
    let new_spinner = || {
        let progress_bar = ProgressBar::new_spinner();
        progress_bar.set_style(progress_style.clone());
        progress_bar.set_message("🤔 Thinking...");
        progress_bar
    };

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = read_line().await else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if line == "/new" {
            session.new_chat().await;
            println!("{}", "--- new chat ---".dimmed());
            continue;
        }
        if let Some(path) = line.strip_prefix("/load ") {
            match session.load_conversation(Path::new(path.trim())).await {
                Ok(()) => println!(
                    "{}",
                    format!("--- {} ---", session.title().unwrap_or_default()).dimmed()
                ),
                Err(err) => print_failure(&err.to_string()),
            }
            continue;
        }

        if blocking {
            let progress_bar = new_spinner();
            progress_bar.enable_steady_tick(Duration::from_millis(100));
            let result = session.ask(line).await;
            progress_bar.finish_and_clear();
            match result {
                Ok(answer) => {
                    println!("{}🤖 {}", BAR_CHAR.bright_cyan(), answer.bright_white())
                }
                Err(err) => print_failure(&err.to_string()),
            }
            save_conversation(&mut session).await;
            continue;
        }

        let mut rx = match session.send_message(line).await {
            Ok(rx) => rx,
            Err(err) => {
                print_failure(&err.to_string());
                continue;
            }
        };

        // The spinner only runs until the reply starts.
        let mut progress_bar = Some(new_spinner());
        loop {
            if let Some(progress_bar) = &progress_bar {
                progress_bar.inc(1);
            }

            let sleep = sleep(Duration::from_millis(100));
            let item = select! {
                item = rx.recv() => {
                    let Some(item) = item else {
                        break;
                    };
                    item
                },
                _ = sleep => {
                    continue;
                }
            };

            if let Some(progress_bar) = progress_bar.take() {
                progress_bar.finish_and_clear();
            }

            match item {
                StreamItem::Text(text) => {
                    print!("{text}");
                    std::io::stdout().flush()?;
                }
                StreamItem::Artifact(path) => {
                    println!("{}📎 {}", BAR_CHAR.bright_yellow(), path.display());
                }
                StreamItem::Persist => save_conversation(&mut session).await,
                StreamItem::Failed(reason) => print_failure(&reason),
            }
        }
        if let Some(progress_bar) = progress_bar.take() {
            progress_bar.finish_and_clear();
        }
    }

    session.sync().await;
    if let (Some(path), Some(memory)) = (&cli.memory_file, session.agent_memory()) {
        memory.save(path)?;
        info!("saved {} messages to {}", memory.len(), path.display());
    }
    Ok(())
}

async fn save_conversation(session: &mut Session) {
    match session.save_conversation().await {
        Ok(Some(path)) => debug!("conversation saved to {}", path.display()),
        Ok(None) => {}
        Err(err) => error!("failed to save conversation: {err}"),
    }
}

fn print_failure(reason: &str) {
    println!("{}", format!("エラー: {reason}").red());
}

async fn read_line() -> Option<String> {
    let mut stdin = io::BufReader::new(io::stdin());
    let mut line = String::new();

    match stdin.read_line(&mut line).await {
        Ok(count) => {
            if count == 0 {
                return None;
            }
            Some(line)
        }
        Err(err) => {
            error!("error reading input: {}", err);
            None
        }
    }
}
