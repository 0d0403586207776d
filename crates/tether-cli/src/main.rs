//! Operator command-line interface for Tether.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use tether_approvals::{ApprovalConsensus, ApprovalRequest, StoreAuthorityDirectory, Vote};
use tether_commands::{Command, CommandChannel, CommandDispatcher, CommandStatus};
use tether_core::config::{log_json, StoreConfig};
use tether_core::TetherConfig;
use tether_messages::{mask_token, sender_from_config, FanoutSender, NotificationTasks, Recipient};
use tether_storage::{create_store, DocumentStore};

const POLL_INITIAL: Duration = Duration::from_millis(100);
const POLL_MAX: Duration = Duration::from_secs(2);

/// Tether - remote commands and approvals between authorities and devices.
#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Cmd,

    /// Config file (defaults to $TETHER_CONFIG, then ./tether.toml).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the store file.
    #[arg(long, global = true)]
    store: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Issue a command to a device.
    Issue {
        /// Subject device id.
        subject: String,
        /// Command type, e.g. LOCATE.
        command_type: String,
        /// Issuing authority id.
        #[arg(short, long)]
        authority: String,
        /// JSON parameters.
        #[arg(short, long)]
        params: Option<String>,
        /// Wait for a terminal status, up to this many seconds.
        #[arg(short, long)]
        wait: Option<u64>,
    },
    /// Show one command, or all commands of a device.
    Status {
        subject: String,
        correlation_id: Option<String>,
    },
    /// List PENDING commands of a device.
    Pending { subject: String },
    /// Mark a command COMPLETED, standing in for the device executor.
    Complete {
        subject: String,
        correlation_id: String,
        /// JSON result payload.
        #[arg(short, long)]
        result: Option<String>,
    },
    /// Mark a command FAILED, standing in for the device executor.
    Fail {
        subject: String,
        correlation_id: String,
        /// Error message.
        message: String,
    },
    /// Approval request management.
    Approval {
        #[command(subcommand)]
        cmd: ApprovalCmd,
    },
    /// Push token management.
    Token {
        #[command(subcommand)]
        cmd: TokenCmd,
    },
    /// Authority link management.
    Link {
        #[command(subcommand)]
        cmd: LinkCmd,
    },
}

#[derive(Subcommand, Debug)]
enum ApprovalCmd {
    /// Open a request for every authority linked to the device.
    Create {
        subject: String,
        /// What is being approved.
        #[arg(short, long)]
        action: Option<String>,
    },
    /// Cast a vote (approve or reject).
    Vote {
        subject: String,
        request_id: String,
        authority: String,
        vote: Vote,
    },
    Show {
        subject: String,
        request_id: String,
    },
    List { subject: String },
}

#[derive(Subcommand, Debug)]
enum TokenCmd {
    /// Register a push token.
    Add {
        #[command(flatten)]
        recipient: RecipientArgs,
        token: String,
        /// Human-readable device label.
        #[arg(short, long)]
        label: Option<String>,
    },
    Remove {
        #[command(flatten)]
        recipient: RecipientArgs,
        token: String,
    },
    List {
        #[command(flatten)]
        recipient: RecipientArgs,
    },
}

#[derive(clap::Args, Debug)]
#[group(required = true, multiple = false)]
struct RecipientArgs {
    /// Authority recipient id.
    #[arg(long)]
    authority: Option<String>,
    /// Device recipient id.
    #[arg(long)]
    device: Option<String>,
}

impl RecipientArgs {
    fn recipient(&self) -> Result<Recipient> {
        match (&self.authority, &self.device) {
            (Some(id), None) => Ok(Recipient::authority(id.clone())),
            (None, Some(id)) => Ok(Recipient::device(id.clone())),
            _ => anyhow::bail!("exactly one of --authority or --device is required"),
        }
    }
}

#[derive(Subcommand, Debug)]
enum LinkCmd {
    /// Link an authority to a device.
    Add { subject: String, authority: String },
    Remove { subject: String, authority: String },
}

/// Everything a subcommand may need, built from configuration.
struct App {
    config: TetherConfig,
    store: Arc<dyn DocumentStore>,
    sender: Arc<FanoutSender>,
    tasks: Arc<NotificationTasks>,
}

impl App {
    fn build(args: &Args) -> Result<Self> {
        let mut config =
            TetherConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
        if let Some(path) = &args.store {
            config.store.path = path.clone();
        }

        if let Some(parent) = std::path::Path::new(&config.store.path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create store directory {}", parent.display())
                })?;
            }
        }
        let store = create_store("redb", &config.store)
            .with_context(|| format!("Failed to open store {}", config.store.path))?;
        let sender = Arc::new(
            sender_from_config(&config, store.clone()).context("Failed to set up push delivery")?,
        );

        Ok(Self {
            config,
            store,
            sender,
            tasks: Arc::new(NotificationTasks::new()),
        })
    }

    fn channel(&self) -> CommandChannel {
        CommandChannel::new(self.store.clone())
    }

    fn directory(&self) -> StoreAuthorityDirectory {
        StoreAuthorityDirectory::new(self.store.clone())
    }

    fn consensus(&self) -> ApprovalConsensus {
        ApprovalConsensus::new(self.store.clone(), Arc::new(self.directory()))
            .with_sender(self.sender.clone())
            .with_tasks(self.tasks.clone())
            .with_config(self.config.approvals.clone())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    let ctx = App::build(&args)?;
    let outcome = run(&ctx, args.command).await;

    // Let queued pushes finish before the process exits.
    ctx.tasks.wait_idle().await;
    let Some(wait) = outcome? else {
        return Ok(());
    };

    // The executor may be another process that needs the store file.
    let config = ctx.config.clone();
    drop(ctx);
    let (command, result) = poll_terminal(
        &config.store,
        &wait.subject,
        &wait.correlation_id,
        wait.timeout,
        config.commands.result_grace(),
    )
    .await?;

    println!("{}", command.status);
    if let Some(result) = result {
        print_json(&result)?;
    }
    if let Some(message) = command.error_message {
        println!("error: {}", message);
    }
    Ok(())
}

/// Poll a command until it is terminal, opening the store only for each read.
///
/// A COMPLETED command is reported once its result document shows up, or
/// after `result_grace` without it.
async fn poll_terminal(
    store: &StoreConfig,
    subject: &str,
    correlation_id: &str,
    timeout: Duration,
    result_grace: Duration,
) -> Result<(Command, Option<Value>)> {
    let deadline = Instant::now() + timeout;
    let mut delay = POLL_INITIAL;
    let mut terminal_since: Option<Instant> = None;
    let mut last_terminal = None;
    let mut last_error = None;

    loop {
        match read_command(store, subject, correlation_id).await {
            Ok((command, result)) if command.is_terminal() => {
                let since = *terminal_since.get_or_insert_with(Instant::now);
                if result.is_some()
                    || command.status != CommandStatus::Completed
                    || since.elapsed() >= result_grace
                {
                    return Ok((command, result));
                }
                last_terminal = Some((command, result));
            }
            Ok(_) => {}
            Err(e) => {
                debug!(correlation_id, error = %format!("{:#}", e), "Command read failed, retrying");
                last_error = Some(e);
            }
        }

        let now = Instant::now();
        if now >= deadline {
            if let Some(terminal) = last_terminal {
                return Ok(terminal);
            }
            let reason = last_error
                .map(|e| format!(" (last error: {:#})", e))
                .unwrap_or_default();
            anyhow::bail!(
                "No terminal status for {} after {:?}{}",
                correlation_id,
                timeout,
                reason
            );
        }
        tokio::time::sleep(delay.min(deadline - now)).await;
        delay = (delay * 2).min(POLL_MAX);
    }
}

/// One read of a command and its result; the store is closed again on return.
async fn read_command(
    store: &StoreConfig,
    subject: &str,
    correlation_id: &str,
) -> Result<(Command, Option<Value>)> {
    let store = create_store("redb", store)
        .with_context(|| format!("Failed to open store {}", store.path))?;
    let channel = CommandChannel::new(store);
    let command = channel
        .get(subject, correlation_id)
        .await?
        .with_context(|| format!("No command {} for {}", correlation_id, subject))?;
    let result = channel.result(subject, correlation_id).await?;
    Ok((command, result))
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tether=info"));

    if log_json() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}

/// A command to watch once the store has been released.
struct PendingWait {
    subject: String,
    correlation_id: String,
    timeout: Duration,
}

async fn run(ctx: &App, command: Cmd) -> Result<Option<PendingWait>> {
    match command {
        Cmd::Issue {
            subject,
            command_type,
            authority,
            params,
            wait,
        } => {
            let params = parse_json(params.as_deref(), "params")?;
            let dispatcher = CommandDispatcher::new(authority, ctx.channel())
                .with_sender(ctx.sender.clone())
                .with_tasks(ctx.tasks.clone());
            let correlation_id = dispatcher
                .issue(&subject, &command_type, params)
                .await
                .context("Command was not recorded")?;
            println!("{}", correlation_id);

            if let Some(secs) = wait {
                return Ok(Some(PendingWait {
                    subject,
                    correlation_id,
                    timeout: Duration::from_secs(secs),
                }));
            }
        }
        Cmd::Status {
            subject,
            correlation_id: Some(correlation_id),
        } => {
            let channel = ctx.channel();
            let command = channel
                .get(&subject, &correlation_id)
                .await?
                .with_context(|| format!("No command {} for {}", correlation_id, subject))?;
            print_command(&command);
            if let Some(result) = channel.result(&subject, &correlation_id).await? {
                print_json(&result)?;
            }
        }
        Cmd::Status {
            subject,
            correlation_id: None,
        } => {
            for command in ctx.channel().list(&subject).await? {
                print_command(&command);
            }
        }
        Cmd::Pending { subject } => {
            for command in ctx.channel().pending(&subject).await? {
                print_command(&command);
            }
        }
        Cmd::Complete {
            subject,
            correlation_id,
            result,
        } => {
            let result = parse_json(result.as_deref(), "result")?;
            let command = ctx
                .channel()
                .complete(&subject, &correlation_id, result)
                .await
                .context("Could not complete command")?;
            print_command(&command);
        }
        Cmd::Fail {
            subject,
            correlation_id,
            message,
        } => {
            let command = ctx
                .channel()
                .fail(&subject, &correlation_id, &message)
                .await
                .context("Could not fail command")?;
            print_command(&command);
        }
        Cmd::Approval { cmd } => run_approval(ctx, cmd).await?,
        Cmd::Token { cmd } => run_token(ctx, cmd).await?,
        Cmd::Link { cmd } => run_link(ctx, cmd).await?,
    }
    Ok(None)
}

async fn run_approval(ctx: &App, cmd: ApprovalCmd) -> Result<()> {
    let consensus = ctx.consensus();
    match cmd {
        ApprovalCmd::Create { subject, action } => {
            let request = consensus
                .create_request(&subject, action.as_deref())
                .await
                .context("Approval request was not recorded")?;
            println!("{}", request.request_id);
        }
        ApprovalCmd::Vote {
            subject,
            request_id,
            authority,
            vote,
        } => {
            let receipt = consensus
                .cast_vote(&subject, &request_id, &authority, vote)
                .await
                .context("Vote was not recorded")?;
            println!("{}", receipt.status);
        }
        ApprovalCmd::Show {
            subject,
            request_id,
        } => {
            let request = consensus
                .get_request(&subject, &request_id)
                .await?
                .with_context(|| format!("No approval request {} for {}", request_id, subject))?;
            print_request(&request);
            for (authority, vote) in &request.approvals {
                println!("  {:<24} {}", authority, vote);
            }
        }
        ApprovalCmd::List { subject } => {
            for request in consensus.list_requests(&subject).await? {
                print_request(&request);
            }
        }
    }
    Ok(())
}

async fn run_token(ctx: &App, cmd: TokenCmd) -> Result<()> {
    let tokens = ctx.sender.tokens();
    match cmd {
        TokenCmd::Add {
            recipient,
            token,
            label,
        } => {
            let recipient = recipient.recipient()?;
            tokens
                .register(&recipient, &token, label.as_deref())
                .await
                .with_context(|| format!("Failed to register token for {}", recipient))?;
            println!("registered {} for {}", mask_token(&token), recipient);
        }
        TokenCmd::Remove { recipient, token } => {
            let recipient = recipient.recipient()?;
            if tokens.unregister(&recipient, &token).await? {
                println!("removed {} from {}", mask_token(&token), recipient);
            } else {
                anyhow::bail!("{} has no token {}", recipient, mask_token(&token));
            }
        }
        TokenCmd::List { recipient } => {
            let recipient = recipient.recipient()?;
            for record in tokens.records(&recipient).await? {
                println!(
                    "{}  {}  {}",
                    mask_token(&record.token),
                    record.updated_at.to_rfc3339(),
                    record.device_label.as_deref().unwrap_or("-")
                );
            }
        }
    }
    Ok(())
}

async fn run_link(ctx: &App, cmd: LinkCmd) -> Result<()> {
    let directory = ctx.directory();
    match cmd {
        LinkCmd::Add { subject, authority } => {
            directory
                .link(&subject, &authority)
                .await
                .context("Failed to link authority")?;
            println!("linked {} to {}", authority, subject);
        }
        LinkCmd::Remove { subject, authority } => {
            if !directory.unlink(&subject, &authority).await? {
                anyhow::bail!("{} is not linked to {}", authority, subject);
            }
            println!("unlinked {} from {}", authority, subject);
        }
    }
    Ok(())
}

fn parse_json(raw: Option<&str>, what: &str) -> Result<Value> {
    match raw {
        Some(raw) => {
            serde_json::from_str(raw).with_context(|| format!("Invalid JSON in {}", what))
        }
        None => Ok(Value::Null),
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_command(command: &Command) {
    println!(
        "{}  {:<9}  {:<16}  by {}  at {}{}",
        command.correlation_id,
        command.status,
        command.command_type,
        command.requested_by,
        command.requested_at.to_rfc3339(),
        command
            .error_message
            .as_deref()
            .map(|m| format!("  ({})", m))
            .unwrap_or_default()
    );
}

fn print_request(request: &ApprovalRequest) {
    println!(
        "{}  {:<8}  {}  {}",
        request.request_id,
        request.status,
        request.created_at.to_rfc3339(),
        request.action.as_deref().unwrap_or("-")
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store_config(dir: &tempfile::TempDir) -> StoreConfig {
        StoreConfig {
            path: dir.path().join("cli.redb").display().to_string(),
            ..StoreConfig::default()
        }
    }

    async fn create_command(config: &StoreConfig) -> Command {
        let command = Command::new("kid-1", "parent-1", "LOCATE");
        let channel = CommandChannel::new(create_store("redb", config).unwrap());
        channel.create(&command).await.unwrap();
        command
    }

    /// Open the store, waiting out a concurrent reader.
    async fn open_when_free(config: &StoreConfig) -> Arc<dyn DocumentStore> {
        for _ in 0..500 {
            if let Ok(store) = create_store("redb", config) {
                return store;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("store stayed locked");
    }

    #[tokio::test]
    async fn test_wait_sees_completion_from_separate_opener() {
        let dir = tempfile::tempdir().unwrap();
        let config = store_config(&dir);
        let command = create_command(&config).await;
        let cid = command.correlation_id.clone();

        let watcher = {
            let config = config.clone();
            let cid = cid.clone();
            tokio::spawn(async move {
                poll_terminal(&config, "kid-1", &cid, Duration::from_secs(10), Duration::from_secs(1))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(250)).await;

        // Stand-in for `tether complete` run from another shell.
        let channel = CommandChannel::new(open_when_free(&config).await);
        channel.complete("kid-1", &cid, json!("X")).await.unwrap();
        drop(channel);

        let (done, result) = watcher.await.unwrap().unwrap();
        assert_eq!(done.status, CommandStatus::Completed);
        assert_eq!(result, Some(json!("X")));
    }

    #[tokio::test]
    async fn test_wait_reports_failure_message() {
        let dir = tempfile::tempdir().unwrap();
        let config = store_config(&dir);
        let command = create_command(&config).await;
        {
            let channel = CommandChannel::new(create_store("redb", &config).unwrap());
            channel
                .fail("kid-1", &command.correlation_id, "no gps fix")
                .await
                .unwrap();
        }

        let (done, result) = poll_terminal(
            &config,
            "kid-1",
            &command.correlation_id,
            Duration::from_secs(2),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert_eq!(done.status, CommandStatus::Failed);
        assert_eq!(done.error_message.as_deref(), Some("no gps fix"));
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_wait_times_out_and_leaves_command_pending() {
        let dir = tempfile::tempdir().unwrap();
        let config = store_config(&dir);
        let command = create_command(&config).await;

        let outcome = poll_terminal(
            &config,
            "kid-1",
            &command.correlation_id,
            Duration::from_millis(300),
            Duration::from_secs(1),
        )
        .await;
        assert!(outcome.is_err());

        let channel = CommandChannel::new(create_store("redb", &config).unwrap());
        let stored = channel.get("kid-1", &command.correlation_id).await.unwrap().unwrap();
        assert_eq!(stored.status, CommandStatus::Pending);
    }
}
