use clap::{Parser, Subcommand};
use dotenv::dotenv;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use strand_rs::agents::roles::RoleCatalog;
use strand_rs::agents::{chat, gourmet, messages, reviewed};
use strand_rs::engine::{App, Checkpointer, FileSaver, MemorySaver, RunResult, StateUpdate};
use strand_rs::llm::openai::OpenAiModel;
use strand_rs::llm::LanguageModel;
use strand_rs::tools::gourmet::HotPepperClient;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Session id grouping related invocations; a fresh one is
    /// generated when omitted
    #[arg(short, long, global = true)]
    session: Option<String>,

    /// The model to use
    #[arg(short, long, global = true, default_value = "gpt-4o")]
    model: String,

    /// Persist checkpoints under this directory instead of in memory
    #[arg(long, global = true)]
    checkpoint_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Quality-reviewed Q&A: answers are regenerated until a judge
    /// approves them (or the attempt bound is hit)
    Chat {
        /// Load a custom persona catalog from a YAML file
        #[arg(long)]
        roles: Option<PathBuf>,
    },
    /// Restaurant recommendations; asks for the area when missing
    Gourmet,
    /// Plain assistant with per-session history
    Ask,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();
    let session = args
        .session
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    log::info!("session id: {}", session);

    let checkpointer: Arc<dyn Checkpointer> = match &args.checkpoint_dir {
        Some(dir) => Arc::new(FileSaver::new(dir)?),
        None => Arc::new(MemorySaver::new()),
    };
    let model: Arc<dyn LanguageModel> = Arc::new(OpenAiModel::new(args.model.clone())?);

    match args.command {
        Commands::Chat { roles } => {
            let catalog = match roles {
                Some(path) => Arc::new(RoleCatalog::from_file(path)?),
                None => Arc::new(RoleCatalog::builtin()),
            };
            let app = App::new(reviewed::build_graph(model, catalog)?, checkpointer);
            repl(&app, &session, reviewed::user_input, print_reviewed).await?;
        }
        Commands::Gourmet => {
            let search = Arc::new(HotPepperClient::new()?);
            let app = App::new(gourmet::build_graph(model, search)?, checkpointer);
            repl(&app, &session, gourmet::user_input, print_gourmet).await?;
        }
        Commands::Ask => {
            let app = App::new(chat::build_graph(model)?, checkpointer);
            repl(&app, &session, chat::user_input, print_chat).await?;
        }
    }

    Ok(())
}

/// Read-eval loop shared by every bot; `exit` or `quit` leaves
async fn repl(
    app: &App,
    session: &str,
    to_input: fn(&str) -> StateUpdate,
    print: fn(&RunResult),
) -> anyhow::Result<()> {
    loop {
        print!("query> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if std::io::stdin().read_line(&mut line)? == 0 {
            break;
        }
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if query.eq_ignore_ascii_case("exit") || query.eq_ignore_ascii_case("quit") {
            println!("Bye.");
            break;
        }

        match app.invoke(session, to_input(query)).await {
            Ok(result) => print(&result),
            Err(e) => {
                // The checkpoint keeps the last good state; the same
                // session can pick up where it left off.
                eprintln!("run failed: {}", e);
                eprintln!("session '{}' is preserved and can be resumed", session);
            }
        }
    }
    Ok(())
}

fn print_reviewed(result: &RunResult) {
    let history = messages(&result.state, "messages");
    if let Some(answer) = strand_rs::agents::last_message_from(&history, "assistant") {
        println!("----- answer -----");
        println!("{}", answer.content);
    }
    let approved = result.state.get_bool("approved").unwrap_or(false);
    println!("\nquality ok?: {}", approved);
    if !approved {
        if let Some(reason) = result.state.get_str("judgement_reason") {
            println!("reason: {}", reason);
        }
    }
}

fn print_gourmet(result: &RunResult) {
    if let Some(text) = result.state.get_str("response_text") {
        println!("{}", text);
    }
}

fn print_chat(result: &RunResult) {
    if let Some(reply) = chat::last_reply(&result.state) {
        println!("{}", reply);
    }
}
