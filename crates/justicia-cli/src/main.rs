//! JusticIA CLI: chat with the legal RAG backend and ingest case documents.
//!
//! Configuration comes from the environment (or `.env`): JUSTICIA_API_URL,
//! JUSTICIA_API_KEY or JUSTICIA_JWT_TOKEN, plus the chat and ingestion tuning
//! variables.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use uuid::Uuid;

use justicia_api_client::ApiClient;
use justicia_cli::{content_type_for, init_tracing, status_line, StatusTally};
use justicia_core::{normalize_case_number, CaseNumber, ChatScope, JusticiaConfig, SessionContext};
use justicia_orchestrator::chat::ERROR_MESSAGE;
use justicia_orchestrator::{
    ChatController, ChatEvent, GroupOutcome, IngestionController, IngestionEvent, StagedFile,
    TurnOutcome,
};

#[derive(Parser)]
#[command(name = "justicia", about = "JusticIA chat and ingestion client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat over stdin. Ctrl-C stops the current answer.
    Chat {
        /// Pin the conversation to an expediente (implies case-specific scope)
        #[arg(long)]
        case: Option<String>,
        /// Chat scope: general or case_specific
        #[arg(long, default_value = "general")]
        scope: String,
    },
    /// Upload documents of one expediente and follow their processing
    Ingest {
        /// Expediente number, e.g. 98-003287-0166-LA
        #[arg(long)]
        case: String,
        /// Files to upload
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Normalize and validate an expediente number
    Case {
        value: String,
    },
}

fn load_config() -> anyhow::Result<JusticiaConfig> {
    JusticiaConfig::from_env().context("Failed to load configuration")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Case { value } => check_case(&value),
        Commands::Chat { case, scope } => {
            let scope: ChatScope = scope.parse()?;
            run_chat(load_config()?, scope, case).await
        }
        Commands::Ingest { case, files } => run_ingest(load_config()?, &case, files).await,
    }
}

fn check_case(value: &str) -> anyhow::Result<()> {
    match CaseNumber::parse(value) {
        Ok(case_number) => {
            println!("{}", case_number);
            Ok(())
        }
        Err(e) => bail!("{} ({})", e, normalize_case_number(value)),
    }
}

async fn run_chat(
    config: JusticiaConfig,
    scope: ChatScope,
    case: Option<String>,
) -> anyhow::Result<()> {
    let client = ApiClient::from_config(&config).context("Failed to create API client")?;
    let scope = if case.is_some() {
        ChatScope::CaseSpecific
    } else {
        scope
    };
    let chat = ChatController::new(
        Arc::new(client),
        config.chat.clone(),
        SessionContext::new(),
        scope,
    );
    let renderer = tokio::spawn(render_chat(chat.subscribe()));

    tracing::info!(session_id = %chat.session().session_id, scope = %scope, "Chat started");
    eprintln!("Comandos: /nueva, /general, /expediente, /salir");

    if let Some(case) = case {
        run_turn(&chat, &case).await;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        match line.trim() {
            "" if chat.scope() == ChatScope::General => continue,
            "/salir" => break,
            "/nueva" => {
                let session = chat.new_session().await;
                eprintln!("Nueva sesión: {}", session.session_id);
            }
            "/general" => chat.set_scope(ChatScope::General),
            "/expediente" => chat.set_scope(ChatScope::CaseSpecific),
            _ => run_turn(&chat, &line).await,
        }
    }

    chat.stop_generation().await;
    renderer.abort();
    Ok(())
}

/// Send one message, stopping the answer on Ctrl-C.
async fn run_turn(chat: &ChatController, text: &str) {
    let turn = chat.send_message(text);
    tokio::pin!(turn);

    let outcome = tokio::select! {
        outcome = &mut turn => outcome,
        _ = tokio::signal::ctrl_c() => {
            chat.stop_generation().await;
            turn.await
        }
    };

    match outcome {
        TurnOutcome::Failed { error } => tracing::debug!(error = %error, "Turn failed"),
        TurnOutcome::Ignored => eprintln!("(mensaje vacío ignorado)"),
        other => tracing::debug!(outcome = ?other, "Turn finished"),
    }
}

async fn render_chat(mut rx: broadcast::Receiver<ChatEvent>) {
    let mut stdout = std::io::stdout();
    loop {
        match rx.recv().await {
            // Synthetic replies arrive complete
            Ok(ChatEvent::MessageAppended(message)) if !message.is_user && !message.is_open() => {
                println!("{}", message.text);
            }
            Ok(ChatEvent::ChunkApplied { chunk, .. }) => {
                print!("{}", chunk);
                let _ = stdout.flush();
            }
            Ok(ChatEvent::Retrying { .. }) => eprintln!("(respuesta vacía, reintentando...)"),
            Ok(ChatEvent::Finalized { .. }) => println!(),
            Ok(ChatEvent::Failed { .. }) => println!("{}", ERROR_MESSAGE),
            Ok(ChatEvent::Cancelled { .. }) => println!(" [detenido]"),
            Ok(ChatEvent::MessageAppended(_)) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Chat renderer fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn run_ingest(config: JusticiaConfig, case: &str, paths: Vec<PathBuf>) -> anyhow::Result<()> {
    let client = ApiClient::from_config(&config).context("Failed to create API client")?;
    let ingestion = IngestionController::new(Arc::new(client), config.ingestion.clone());
    let events = ingestion.subscribe();
    let mut tally_events = ingestion.subscribe();

    let mut names: HashMap<Uuid, String> = HashMap::new();
    for path in paths {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("Invalid file name: {}", path.display()))?
            .to_string();
        let content = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let mut staged = StagedFile::new(name.clone(), content).with_case_number(case);
        if let Some(content_type) = content_type_for(&name) {
            staged = staged.with_content_type(content_type);
        }
        match ingestion.stage_file(staged) {
            Ok(id) => {
                names.insert(id, name);
            }
            Err(e) if e.is_validation() => eprintln!("{}: {}", name, e),
            Err(e) => return Err(e.into()),
        }
    }
    if names.is_empty() {
        bail!("No files to upload");
    }

    let renderer = tokio::spawn(render_ingestion(events, names.clone()));
    let report = ingestion.upload_files().await;

    let mut failures = report.rejected.len();
    for id in &report.rejected {
        if let Some(file) = ingestion.file(*id) {
            eprintln!("{}: {}", file.name, file.message);
        }
    }
    for group in &report.failed_groups {
        failures += group.file_ids.len();
        eprintln!("{}: {}", group.case_number, group.error);
    }

    tokio::select! {
        outcomes = report.wait_all() => {
            for (case_number, outcome) in outcomes {
                match outcome {
                    GroupOutcome::Completed => tracing::info!(case_number = %case_number, "Processing finished"),
                    other => {
                        failures += 1;
                        eprintln!("{}: {:?}", case_number, other);
                    }
                }
            }
            // A completed group may still hold files the backend rejected
            failures += drain_tally(&mut tally_events).failed_count();
        }
        _ = tokio::signal::ctrl_c() => {
            ingestion.shutdown();
            eprintln!("Seguimiento interrumpido; el servidor continúa procesando.");
        }
    }

    renderer.abort();
    if failures > 0 {
        bail!("{} file(s) or group(s) did not finish successfully", failures);
    }
    Ok(())
}

fn drain_tally(rx: &mut broadcast::Receiver<IngestionEvent>) -> StatusTally {
    let mut tally = StatusTally::default();
    loop {
        match rx.try_recv() {
            Ok(IngestionEvent::FileUpdated { id, status, .. }) => tally.record(id, status),
            Ok(_) => {}
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Ingestion tally fell behind");
            }
            Err(_) => break,
        }
    }
    tally
}

async fn render_ingestion(mut rx: broadcast::Receiver<IngestionEvent>, names: HashMap<Uuid, String>) {
    loop {
        match rx.recv().await {
            Ok(IngestionEvent::FileUpdated {
                id,
                status,
                progress,
                message,
            }) => {
                let name = names.get(&id).map(String::as_str).unwrap_or("?");
                println!("{}", status_line(name, status, progress, &message));
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Ingestion renderer fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
