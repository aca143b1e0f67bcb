use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use client::{
    ConnectionConfig, ConnectionError, ConnectionManager, ConnectionStatus, MembershipError,
    SessionClient, TimerInputError,
};
use protocol::{CodeError, SessionCode};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("missing controller token; pass --token or set CLASSLINK_CONTROLLER_TOKEN")]
    MissingControllerToken,
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
    #[error("invalid session code: {0}")]
    InvalidCode(#[from] CodeError),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error(transparent)]
    Join(#[from] MembershipError),
    #[error(transparent)]
    Timer(#[from] TimerInputError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("server returned HTTP {status}: {message}")]
    ServerError { status: u16, message: String },
    #[error("timed out waiting for the connection to open")]
    ConnectTimeout,
}

#[derive(Parser, Debug)]
#[command(name = "classlink-cli", about = "Classlink session API and websocket CLI")]
struct Cli {
    #[arg(long, env = "CLASSLINK_BASE_URL", default_value = "http://127.0.0.1:3000")]
    base_url: String,

    #[arg(long, env = "CLASSLINK_CONTROLLER_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone)]
struct CliContext {
    base_url: String,
    token: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    Ping,
    Session(SessionCommand),
    /// Join a session and print everything it broadcasts.
    Watch {
        code: String,
        /// Request caption translations into this language.
        #[arg(long)]
        language: Option<String>,
        /// Stop after this many seconds instead of running until Ctrl-C.
        #[arg(long)]
        duration_secs: Option<u64>,
    },
    Timer(TimerCommand),
    Objective(ObjectiveCommand),
    Caption(CaptionCommand),
}

#[derive(Args, Debug)]
struct SessionCommand {
    #[command(subcommand)]
    command: SessionSubcommand,
}

#[derive(Subcommand, Debug)]
enum SessionSubcommand {
    /// Create a session code and controller token.
    Generate,
    /// Check whether a session code is live.
    Validate { code: String },
}

#[derive(Args, Debug)]
struct TimerCommand {
    code: String,
    #[command(subcommand)]
    command: TimerSubcommand,
}

#[derive(Subcommand, Debug)]
enum TimerSubcommand {
    Start {
        #[arg(long)]
        seconds: u64,
    },
    Stop {
        /// Locally displayed remainder; the server substitutes its own.
        #[arg(long, default_value_t = 0)]
        remaining: u64,
    },
    Reset,
}

#[derive(Args, Debug)]
struct ObjectiveCommand {
    code: String,
    #[command(subcommand)]
    command: ObjectiveSubcommand,
}

#[derive(Subcommand, Debug)]
enum ObjectiveSubcommand {
    Set { text: String },
}

#[derive(Args, Debug)]
struct CaptionCommand {
    code: String,
    #[command(subcommand)]
    command: CaptionSubcommand,
}

#[derive(Subcommand, Debug)]
enum CaptionSubcommand {
    Send {
        text: String,
        #[arg(long, default_value = "en")]
        lang: String,
        /// Mark the fragment as the settled form of the utterance.
        #[arg(long, default_value_t = false)]
        r#final: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    let ctx = CliContext { base_url: cli.base_url, token: cli.token };

    match cli.command {
        Command::Ping => run_ping(&ctx).await,
        Command::Session(session) => run_session(&ctx, session).await,
        Command::Watch { code, language, duration_secs } => {
            run_watch(&ctx, &code, language, duration_secs).await
        }
        Command::Timer(timer) => run_timer(&ctx, timer).await,
        Command::Objective(objective) => run_objective(&ctx, objective).await,
        Command::Caption(caption) => run_caption(&ctx, caption).await,
    }
}

async fn run_ping(cli: &CliContext) -> Result<(), CliError> {
    let client = reqwest::Client::new();
    let url = format!("{}/healthz", cli.base_url.trim_end_matches('/'));
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CliError::ServerError {
            status: status.as_u16(),
            message: "health check failed".to_owned(),
        });
    }
    println!("ok");
    Ok(())
}

async fn run_session(cli: &CliContext, session: SessionCommand) -> Result<(), CliError> {
    match session.command {
        SessionSubcommand::Generate => {
            let json = api_post(cli, "/session/generate", Value::Null).await?;
            print_json(&json)
        }
        SessionSubcommand::Validate { code } => {
            let code: SessionCode = code.parse()?;
            let body = serde_json::json!({ "sessionCode": code });
            let json = api_post(cli, "/session/validate", body).await?;
            print_json(&json)
        }
    }
}

async fn run_watch(
    cli: &CliContext,
    code: &str,
    language: Option<String>,
    duration_secs: Option<u64>,
) -> Result<(), CliError> {
    let code: SessionCode = code.parse()?;
    let session = join(cli, code.clone()).await?;
    if let Some(language) = language {
        session.captions().set_language(Some(language)).await;
    }

    println!("joined {code}");

    let mut countdown = session.countdown().watch();
    let mut objective = session.objective();
    let mut captions = session.captions().watch();

    let deadline = duration_secs.map(Duration::from_secs);
    let watch_loop = async {
        loop {
            tokio::select! {
                changed = countdown.changed() => {
                    if changed.is_err() { return; }
                    let reading = *countdown.borrow_and_update();
                    let state = if reading.running { "running" } else { "stopped" };
                    println!("timer     {} ({state})", reading.mmss());
                }
                changed = objective.changed() => {
                    if changed.is_err() { return; }
                    println!("objective {}", *objective.borrow_and_update());
                }
                changed = captions.changed() => {
                    if changed.is_err() { return; }
                    let caption = captions.borrow_and_update().clone();
                    let marker = if caption.is_final { " " } else { "~" };
                    println!("caption  {marker}{}", caption.original);
                    if let Some(translated) = caption.translated {
                        println!("          -> {translated}");
                    }
                    if let Some(error) = caption.error {
                        println!("          translation error: {error}");
                    }
                }
            }
        }
    };

    match deadline {
        Some(duration) => {
            let _ = tokio::time::timeout(duration, watch_loop).await;
        }
        None => {
            tokio::select! {
                () = watch_loop => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
    }

    session.leave().await;
    Ok(())
}

async fn run_timer(cli: &CliContext, timer: TimerCommand) -> Result<(), CliError> {
    let code: SessionCode = timer.code.parse()?;
    let token = require_token(cli)?;
    let session = join_with_token(cli, code, token).await?;

    match timer.command {
        TimerSubcommand::Start { seconds } => session.timer().start(seconds).await?,
        TimerSubcommand::Stop { remaining } => session.timer().stop(remaining).await?,
        TimerSubcommand::Reset => session.timer().reset().await?,
    }

    // Give the echoed snapshot a moment so the command is visibly applied.
    let mut countdown = session.countdown().watch();
    if tokio::time::timeout(Duration::from_secs(3), countdown.changed())
        .await
        .is_ok()
    {
        let reading = *countdown.borrow_and_update();
        let state = if reading.running { "running" } else { "stopped" };
        println!("timer {} ({state})", reading.mmss());
    }

    session.leave().await;
    Ok(())
}

async fn run_objective(cli: &CliContext, objective: ObjectiveCommand) -> Result<(), CliError> {
    let code: SessionCode = objective.code.parse()?;
    let token = require_token(cli)?;
    let session = join_with_token(cli, code, token).await?;

    match objective.command {
        ObjectiveSubcommand::Set { text } => {
            session.objective_editor().edit(text).await;
            session.objective_editor().flush().await?;
            println!("objective set");
        }
    }

    session.leave().await;
    Ok(())
}

async fn run_caption(cli: &CliContext, caption: CaptionCommand) -> Result<(), CliError> {
    let code: SessionCode = caption.code.parse()?;
    let token = require_token(cli)?;
    let session = join_with_token(cli, code, token).await?;

    match caption.command {
        CaptionSubcommand::Send { text, lang, r#final } => {
            let producer = session.caption_producer(lang);
            if r#final {
                producer.finalize(text).await?;
            } else {
                producer.interim(text).await?;
            }
            println!("caption sent");
        }
    }

    session.leave().await;
    Ok(())
}

async fn join(cli: &CliContext, code: SessionCode) -> Result<SessionClient, CliError> {
    join_inner(cli, code, None).await
}

async fn join_with_token(
    cli: &CliContext,
    code: SessionCode,
    token: String,
) -> Result<SessionClient, CliError> {
    join_inner(cli, code, Some(token)).await
}

async fn join_inner(
    cli: &CliContext,
    code: SessionCode,
    credentials: Option<String>,
) -> Result<SessionClient, CliError> {
    let url = ws_url(&cli.base_url)?;
    let connection = ConnectionManager::connect(ConnectionConfig::new(url));
    wait_until_open(&connection).await?;
    Ok(SessionClient::join(connection, code, credentials).await?)
}

async fn wait_until_open(connection: &ConnectionManager) -> Result<(), CliError> {
    let mut status = connection.watch_status();
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match *status.borrow_and_update() {
                ConnectionStatus::Open => return Ok(()),
                ConnectionStatus::Failed => return Err(CliError::ConnectTimeout),
                ConnectionStatus::Connecting | ConnectionStatus::Closed => {}
            }
            if status.changed().await.is_err() {
                return Err(CliError::ConnectTimeout);
            }
        }
    })
    .await
    .map_err(|_| CliError::ConnectTimeout)?
}

fn require_token(cli: &CliContext) -> Result<String, CliError> {
    cli.token.clone().ok_or(CliError::MissingControllerToken)
}

async fn api_post(cli: &CliContext, path: &str, body: Value) -> Result<Value, CliError> {
    let client = reqwest::Client::new();
    let url = format!("{}{}", cli.base_url.trim_end_matches('/'), path);

    let request = client.post(&url);
    let request = if body.is_null() { request } else { request.json(&body) };

    let response = request.send().await?;
    let status = response.status();
    let value = response.json::<Value>().await.unwrap_or_else(|_| Value::Null);

    if !status.is_success() {
        return Err(CliError::ServerError {
            status: status.as_u16(),
            message: value.to_string(),
        });
    }

    Ok(value)
}

fn ws_url(base_url: &str) -> Result<String, CliError> {
    if let Some(rest) = base_url.strip_prefix("http://") {
        return Ok(format!("ws://{rest}/ws"));
    }
    if let Some(rest) = base_url.strip_prefix("https://") {
        return Ok(format!("wss://{rest}/ws"));
    }

    Err(CliError::InvalidBaseUrl(base_url.to_owned()))
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
