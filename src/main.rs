use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use toolchat::agent::commands::{self, Command, HELP};
use toolchat::agent::sessions::truncate;
use toolchat::agent::{Orchestrator, Role, SessionStore, TurnOutcome};
use toolchat::classifier::IntentClassifier;
use toolchat::config::AgentConfig;
use toolchat::executor::{Profile, ToolExecutor};
use toolchat::llm::{ChatClient, CompletionBackend};
use toolchat::telemetry::{self, LogFormat};
use toolchat::tools::{builtin_registry, ToolContext, ToolInvocation};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Chat with a local model that runs tools for you
#[derive(Parser, Debug)]
#[command(name = "toolchat")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: ~/.config/toolchat/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Resource policy profile
    #[arg(long, global = true)]
    profile: Option<Profile>,

    /// Session name to load and save
    #[arg(short, long, global = true)]
    session: Option<String>,

    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Inference server URL including /v1
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Export spans to this OTLP collector
    #[arg(long, global = true)]
    otlp_endpoint: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
enum Commands {
    /// Interactive conversation (default)
    Chat,
    /// Run a single turn and print the reply
    Ask {
        /// The utterance, or a tool prefix such as "/calc 2+2"
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// List the available tools
    Tools,
    /// Manage saved sessions
    Sessions {
        #[command(subcommand)]
        action: SessionAction,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
enum SessionAction {
    /// List saved sessions, newest first
    List,
    /// Print the turns of a session
    Show { name: String },
    /// Delete a session
    Delete { name: String },
}

/// Everything the REPL needs besides the orchestrator
struct App {
    orchestrator: Orchestrator,
    client: Arc<ChatClient>,
}

enum Flow {
    Continue,
    Quit,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = telemetry::init_tracing(cli.verbose, cli.log_format, cli.otlp_endpoint.as_deref()) {
        eprintln!("failed to initialize logging: {e}");
    }

    let result = run(cli).await;
    telemetry::shutdown_tracing();

    if let Err(e) = result {
        eprintln!("error: {e}");
        let mut source = e.source();
        while let Some(cause) = source {
            eprintln!("  caused by: {cause}");
            source = cause.source();
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), BoxError> {
    let mut config = AgentConfig::load(cli.config.as_deref())?;
    if let Some(profile) = cli.profile {
        config.policy.profile = profile;
    }
    if let Some(session) = cli.session {
        config.session = session;
    }
    if let Some(model) = cli.model {
        config.model = model;
    }
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => {
            let mut app = build_app(&config)?;
            repl(&mut app).await
        }
        Commands::Ask { text } => {
            let mut app = build_app(&config)?;
            let line = text.join(" ");
            handle_line(&mut app, &line).await?;
            Ok(())
        }
        Commands::Tools => {
            let registry = builtin_registry()?;
            print_tools(&registry);
            Ok(())
        }
        Commands::Sessions { action } => {
            let store = SessionStore::new(config.session_dir())?;
            sessions_command(&store, action)
        }
    }
}

fn build_app(config: &AgentConfig) -> Result<App, BoxError> {
    let client = Arc::new(ChatClient::new(config.client_config())?);
    let backend: Arc<dyn CompletionBackend> = client.clone();

    let policy = config.resource_policy()?;
    info!(
        profile = %policy.profile,
        root = %policy.root.display(),
        network = policy.allow_network,
        "Resource policy"
    );

    let registry = Arc::new(builtin_registry()?);
    let context = ToolContext::new(policy, Some(backend.clone()))
        .with_search_endpoint(config.search_endpoint.clone());
    let classifier =
        IntentClassifier::new(registry.clone(), Some(backend.clone()), config.semantic_fallback);
    let executor = ToolExecutor::new(registry, context);

    let store = SessionStore::new(config.session_dir())?;
    let mut session = store.load_or_create(&config.session, config.token_budget)?;
    session.token_budget = config.token_budget;
    info!(session = %session.name, turns = session.turns.len(), "Session loaded");

    let orchestrator = Orchestrator::new(
        classifier,
        executor,
        backend,
        session,
        Some(store),
        config.orchestrator_config(),
    );
    Ok(App {
        orchestrator,
        client,
    })
}

async fn repl(app: &mut App) -> Result<(), BoxError> {
    let session = app.orchestrator.session();
    println!(
        "toolchat {} - model {} - session '{}' ({} turns)",
        env!("CARGO_PKG_VERSION"),
        app.orchestrator.model_name(),
        session.name,
        session.turns.len()
    );
    println!("Type 'help' for commands, 'quit' to exit.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("you> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        match handle_line(app, &line).await {
            Ok(Flow::Quit) => break,
            Ok(Flow::Continue) => {}
            // a failed turn never ends the session
            Err(e) => eprintln!("error: {e}"),
        }
    }
    Ok(())
}

async fn handle_line(app: &mut App, line: &str) -> Result<Flow, BoxError> {
    match commands::parse(line) {
        Command::Quit => return Ok(Flow::Quit),
        Command::Help => println!("{HELP}"),
        Command::Clear => {
            app.orchestrator.clear()?;
            println!("Conversation history cleared");
        }
        Command::History => print_history(&app.orchestrator),
        Command::Save => {
            app.orchestrator.save()?;
            println!("Session '{}' saved", app.orchestrator.session().name);
        }
        Command::Context => print_context(&app.orchestrator),
        Command::Model => print_models(app).await,
        Command::Status => print_status(app).await,
        Command::Tools => print_tools(app.orchestrator.registry()),
        Command::Metrics => print!("{}", toolchat::metrics::gather_text()),
        Command::Usage(usage) => println!("Usage: {usage}"),
        Command::Unknown(word) => println!("Unknown command '{word}'. Type 'help' for the list."),
        Command::Invoke(invocation) => run_tool(app, line, invocation).await?,
        Command::Chat(text) => {
            let outcome = app.orchestrator.handle_utterance(&text).await?;
            print_outcome(&outcome);
        }
    }
    Ok(Flow::Continue)
}

async fn run_tool(app: &mut App, line: &str, invocation: ToolInvocation) -> Result<(), BoxError> {
    let outcome = app.orchestrator.run_invocation(line, invocation).await?;
    print_outcome(&outcome);
    Ok(())
}

fn print_outcome(outcome: &TurnOutcome) {
    if let Some(tool) = &outcome.tool {
        let status = match tool.failure {
            None => "ok".to_string(),
            Some(kind) => kind.to_string(),
        };
        println!(
            "[{} {} in {:.0}ms{}]",
            tool.tool_id,
            status,
            tool.duration.as_secs_f64() * 1000.0,
            if tool.truncated { ", output truncated" } else { "" }
        );
    }
    println!("\n{}\n", outcome.response);
}

fn print_history(orchestrator: &Orchestrator) {
    let turns = orchestrator.history();
    if turns.is_empty() {
        println!("No conversation yet");
        return;
    }
    let start = turns.len().saturating_sub(10);
    for turn in &turns[start..] {
        let who = match (turn.role, &turn.tool) {
            (Role::Tool, Some(tool)) => format!("tool:{tool}"),
            (role, _) => role.to_string(),
        };
        println!("{:>4}. {who}: {}", turn.turn_index, truncate(&turn.content, 100));
    }
}

fn print_context(orchestrator: &Orchestrator) {
    let report = orchestrator.context_report();
    println!("Context window usage:");
    println!("  Messages:         {}", report.messages);
    println!("  Characters:       {}", report.chars);
    println!("  Estimated tokens: {}", report.estimated_tokens);
    println!("  Available:        {}", report.remaining_tokens);
    println!("  Usage:            {:.1}%", report.usage_percent);
    println!("  Budget:           {} tokens", report.token_budget);
}

async fn print_models(app: &App) {
    match app.client.list_models().await {
        Ok(models) => {
            for model in models {
                let context = model
                    .max_model_len
                    .map_or_else(|| "unknown".to_string(), |n| n.to_string());
                let marker = if model.id == app.client.model() { "*" } else { " " };
                println!("{marker} {} (context {context}, owner {})", model.id, model.owned_by);
            }
        }
        Err(e) => println!("Cannot list models: {e}"),
    }
}

async fn print_status(app: &App) {
    let server = match app.client.list_models().await {
        Ok(models) => format!("online ({} model(s))", models.len()),
        Err(e) => format!("unavailable: {e}"),
    };
    let policy = app.orchestrator.executor().policy();
    let session = app.orchestrator.session();

    println!("Server:   {} - {server}", app.client.base_url());
    println!("Model:    {}", app.client.model());
    println!(
        "Policy:   {} (root {}, network {}, default timeout {}s)",
        policy.profile,
        policy.root.display(),
        if policy.allow_network { "on" } else { "off" },
        policy.default_timeout.as_secs()
    );
    println!("Session:  {} ({} turns)", session.name, session.turns.len());
}

fn print_tools(registry: &toolchat::ToolRegistry) {
    for spec in registry.all() {
        let args: Vec<String> = spec
            .arguments
            .iter()
            .map(|a| {
                if a.required {
                    a.name.clone()
                } else {
                    format!("[{}]", a.name)
                }
            })
            .collect();
        println!("{:<16} {:<28} {}", spec.id, args.join(" "), spec.description);
    }
}

fn sessions_command(store: &SessionStore, action: SessionAction) -> Result<(), BoxError> {
    match action {
        SessionAction::List => {
            let sessions = store.list()?;
            if sessions.is_empty() {
                println!("No saved sessions in {}", store.base_dir().display());
            }
            for summary in sessions {
                println!(
                    "{:<20} {:>4} turns  {}  {}",
                    summary.name,
                    summary.turns,
                    summary.updated_at.format("%Y-%m-%d %H:%M"),
                    summary.preview
                );
            }
        }
        SessionAction::Show { name } => {
            let session = store.load(&name)?;
            for turn in &session.turns {
                println!(
                    "[{}] #{} {}:\n{}\n",
                    turn.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    turn.turn_index,
                    turn.role,
                    turn.content
                );
            }
        }
        SessionAction::Delete { name } => {
            store.delete(&name)?;
            println!("Deleted session '{name}'");
        }
    }
    Ok(())
}
