//! RiskSense terminal client
//!
//! Signs in, asks questions about uploaded documents and tracks their
//! processing. Answers stream to stdout one character at a time; logs and
//! progress go to stderr.

use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use risksense_client::chat::types::step_label;
use risksense_client::{AppContext, ChatMessage, ChatState, ClientConfig, DocumentStatus, StreamPhase};

/// How often the terminal picks up newly drained characters
const RENDER_INTERVAL: Duration = Duration::from_millis(15);

#[derive(Parser, Debug)]
#[command(name = "risksense", version, about = "RiskSense document-analysis chat client")]
struct Cli {
    /// API root, e.g. http://127.0.0.1:8000/api/v1
    #[arg(long, env = "RISKSENSE_API_URL", global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create an account
    Signup {
        email: String,
        #[arg(long, env = "RISKSENSE_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long)]
        full_name: Option<String>,
    },
    /// Sign in and save the session
    Login {
        email: String,
        #[arg(long, env = "RISKSENSE_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Sign out and forget the saved session
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Ask a question, streaming the answer
    Ask {
        /// Continue an existing chat instead of starting a new one
        #[arg(long)]
        chat: Option<String>,
        /// Restrict the answer to one document
        #[arg(long)]
        doc: Option<String>,
        #[arg(required = true, trailing_var_arg = true)]
        question: Vec<String>,
    },
    /// List chats
    Chats {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Print a chat transcript
    History { chat_id: String },
    /// List documents and their processing status
    Docs {
        /// Keep polling until every document is processed
        #[arg(long)]
        watch: bool,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Upload pdf, doc, docx or txt files
    Upload {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Track processing after the upload
        #[arg(long)]
        watch: bool,
    },
}

#[tokio::main]
async fn main() {
    // stdout carries the rendered answer only
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .target(env_logger::Target::Stderr)
        .init();

    if let Err(e) = run(Cli::parse()).await {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = ClientConfig::from_env();
    if let Some(url) = cli.api_url {
        config.base_url = url.trim_end_matches('/').to_string();
    }
    let ctx = AppContext::new(config).context("Failed to initialise client")?;

    match cli.command {
        Commands::Signup {
            email,
            password,
            full_name,
        } => {
            let profile = ctx.auth.sign_up(&email, &password, full_name.as_deref()).await?;
            println!("Account created for {}. Run `risksense login` to sign in.", profile.email);
        }
        Commands::Login { email, password } => {
            let session = ctx.auth.sign_in(&email, &password).await?;
            println!("Signed in as {}", session.user.email);
        }
        Commands::Logout => {
            ctx.auth.sign_out().await?;
            println!("Signed out");
        }
        Commands::Whoami => match ctx.auth.current() {
            Some(session) => println!(
                "{}{}",
                session.user.email,
                session
                    .user
                    .full_name
                    .map(|n| format!(" ({})", n))
                    .unwrap_or_default()
            ),
            None => println!("Not signed in"),
        },
        Commands::Ask { chat, doc, question } => {
            ctx.auth.require_user()?;
            ask(&ctx, &question.join(" "), chat.as_deref(), doc.as_deref()).await?;
        }
        Commands::Chats { limit } => {
            ctx.auth.require_user()?;
            for chat in ctx.chat.list_chats(limit, 0).await? {
                println!("{}  {}", chat.id, chat.title.as_deref().unwrap_or("(untitled)"));
            }
        }
        Commands::History { chat_id } => {
            ctx.auth.require_user()?;
            let record = ctx.chat.load_chat(&chat_id).await?;
            println!("# {}", record.title.as_deref().unwrap_or("(untitled)"));
            for message in ctx.chat.snapshot().await.messages {
                let who = match message {
                    ChatMessage::User { .. } => "you",
                    ChatMessage::Assistant { .. } => "risksense",
                };
                println!("\n[{}]\n{}", who, message.content());
            }
        }
        Commands::Docs { watch, json } => {
            ctx.auth.require_user()?;
            let documents = ctx.documents.refresh().await?;
            if watch {
                watch_documents(&ctx, json).await?;
            } else {
                print_documents(&documents, json)?;
            }
        }
        Commands::Upload { files, watch } => {
            ctx.auth.require_user()?;
            let mut queue = ctx.upload_queue();
            let queued = queue.add_files(files);
            if queued == 0 {
                bail!("No supported files to upload (pdf, doc, docx, txt)");
            }

            let uploaded = queue
                .upload_all(|item| log::info!("{}: {:?}", item.path.display(), item.state))
                .await;
            println!("Uploaded {} of {} files", uploaded, queued);

            if watch && uploaded > 0 {
                ctx.documents.refresh().await?;
                watch_documents(&ctx, false).await?;
            }
        }
    }

    Ok(())
}

/// Incremental terminal output of the streamed answer
#[derive(Default)]
struct Renderer {
    printed: usize,
    step: u8,
}

impl Renderer {
    fn render(&mut self, state: &ChatState) -> Result<()> {
        if state.current_step != self.step {
            self.step = state.current_step;
            if let Some(label) = step_label(self.step) {
                log::info!("{}...", label);
            }
        }

        let content = state
            .messages
            .iter()
            .rev()
            .find(|m| m.assistant_id().is_some())
            .map(ChatMessage::content)
            .unwrap_or_default();

        let fresh: String = content.chars().skip(self.printed).collect();
        if !fresh.is_empty() {
            self.printed += fresh.chars().count();
            let mut out = io::stdout().lock();
            out.write_all(fresh.as_bytes())?;
            out.flush()?;
        }
        Ok(())
    }
}

async fn ask(ctx: &AppContext, question: &str, chat_id: Option<&str>, doc_id: Option<&str>) -> Result<()> {
    let mut renderer = Renderer::default();
    let mut tick = tokio::time::interval(RENDER_INTERVAL);

    let send = ctx.chat.send_message(question, chat_id, doc_id);
    tokio::pin!(send);
    let outcome = loop {
        tokio::select! {
            result = &mut send => break result,
            _ = tokio::signal::ctrl_c() => {
                ctx.shutdown();
                bail!("Interrupted");
            }
            _ = tick.tick() => renderer.render(&*ctx.chat.state().read().await)?,
        }
    };
    let Some(outcome) = outcome? else {
        bail!("Nothing to ask");
    };

    // The network is done but the drain buffer may still hold characters
    let wait = ctx.chat.wait_for(outcome.message_id);
    tokio::pin!(wait);
    let phase = loop {
        tokio::select! {
            phase = &mut wait => break phase,
            _ = tokio::signal::ctrl_c() => {
                ctx.shutdown();
                bail!("Interrupted");
            }
            _ = tick.tick() => renderer.render(&*ctx.chat.state().read().await)?,
        }
    };
    renderer.render(&*ctx.chat.state().read().await)?;
    println!();

    if let Some(StreamPhase::Error(e)) = phase {
        bail!("Answer failed: {}", e);
    }
    match outcome.created_chat {
        Some(chat) => log::info!(
            "Started chat {} ({})",
            chat.id,
            chat.title.as_deref().unwrap_or("untitled")
        ),
        None => log::debug!("Answer added to chat {}", outcome.chat_id),
    }
    Ok(())
}

async fn watch_documents(ctx: &AppContext, json: bool) -> Result<()> {
    let mut tick = tokio::time::interval(ctx.config().poll.effective_interval());
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                ctx.documents.stop();
                return Ok(());
            }
            _ = tick.tick() => {}
        }
        print_documents(&ctx.documents.documents().await, json)?;
        if !ctx.documents.is_running() {
            log::info!("No documents left processing");
            return Ok(());
        }
    }
}

fn print_documents(documents: &[DocumentStatus], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(documents)?);
        return Ok(());
    }
    if documents.is_empty() {
        println!("No documents");
    }
    for doc in documents {
        println!(
            "{:<26} {:<11} {:>5.1}%  {}",
            doc.id,
            doc.status.to_string(),
            doc.percent_complete,
            doc.filename
        );
    }
    Ok(())
}
