//! # wampsync-cli
//!
//! `wsync` is a small WAMP client for the terminal: join a realm, call a
//! procedure, watch a topic, or follow the merged sports feed.
//!
//! ## Commands
//!
//! - `wsync test` - Join the realm and leave again
//! - `wsync rpc <procedure>` - Call a procedure and print the result
//! - `wsync subscribe <topic>` - Print events as they arrive
//! - `wsync sports` - Follow the merged all-sports / live-sports view
//!
//! Connection settings come from flags, then `WAMP_*` environment
//! variables, then `wsync.toml`.

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use colored::Colorize;
use std::io;
use std::process;

mod commands;
mod config;
mod telemetry;
mod ui;

use config::{ConnectionOverrides, ConnectionSettings, WsyncConfig};

#[derive(Parser)]
#[command(name = "wsync")]
#[command(about = "wsync - a command-line WAMP client", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    connection: ConnectionArgs,

    /// Path to wsync.toml configuration file
    #[arg(short, long, global = true, default_value = "wsync.toml")]
    config: String,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    json_logs: bool,

    /// Generate shell completions
    #[arg(long, value_name = "SHELL")]
    completions: Option<Shell>,
}

#[derive(Args, Debug, Default)]
struct ConnectionArgs {
    /// Router WebSocket URL
    #[arg(long, global = true, env = "WAMP_URL")]
    url: Option<String>,

    /// Realm to join
    #[arg(long, global = true, env = "WAMP_REALM")]
    realm: Option<String>,

    /// Client id, sent as the `cid` query parameter
    #[arg(long, global = true, env = "WAMP_CID")]
    cid: Option<String>,

    /// Origin header for the WebSocket handshake
    #[arg(long, global = true, env = "WAMP_ORIGIN")]
    origin: Option<String>,

    /// User-Agent header for the WebSocket handshake
    #[arg(long, global = true)]
    user_agent: Option<String>,

    /// Ticket for ticket authentication
    #[arg(long, global = true, env = "WAMP_TICKET", hide_env_values = true)]
    ticket: Option<String>,

    /// Seconds to wait for WELCOME and for each request
    #[arg(long, global = true)]
    timeout: Option<u64>,
}

impl From<ConnectionArgs> for ConnectionOverrides {
    fn from(args: ConnectionArgs) -> Self {
        Self {
            url: args.url,
            realm: args.realm,
            cid: args.cid,
            ticket: args.ticket,
            origin: args.origin,
            user_agent: args.user_agent,
            timeout_secs: args.timeout,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Join the realm, print the session id and leave
    Test,

    /// Call a procedure and print its result as JSON
    Rpc {
        /// Procedure URI
        procedure: String,

        /// Positional arguments as a JSON array (a single value is wrapped)
        #[arg(long)]
        args: Option<String>,

        /// Keyword arguments as a JSON object
        #[arg(long)]
        kwargs: Option<String>,
    },

    /// Subscribe to a topic and print events until interrupted
    Subscribe {
        /// Topic URI
        topic: String,

        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,

        /// Procedure to call with {topic} once subscribed
        #[arg(long)]
        initial_dump: Option<String>,
    },

    /// Follow the merged sports view
    Sports {
        /// Operator id used in the sports topics
        #[arg(long)]
        operator: Option<String>,

        /// Language code used in the sports topics
        #[arg(long)]
        lang: Option<String>,

        /// Only follow the all-sports baseline
        #[arg(long)]
        no_live: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Some(shell) = cli.completions {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "wsync", &mut io::stdout());
        return;
    }

    if let Err(e) = telemetry::init(cli.json_logs) {
        eprintln!("{} {}", "Warning:".yellow().bold(), e);
    }

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    let file = WsyncConfig::load_or_default(&cli.config)?;
    let settings = ConnectionSettings::resolve(&cli.connection.into(), &file.connection)?;

    match command {
        Commands::Test => commands::test::test(&settings).await,
        Commands::Rpc {
            procedure,
            args,
            kwargs,
        } => commands::rpc::rpc(&settings, &procedure, args.as_deref(), kwargs.as_deref()).await,
        Commands::Subscribe {
            topic,
            duration,
            initial_dump,
        } => commands::subscribe::subscribe(&settings, &topic, duration, initial_dump).await,
        Commands::Sports {
            operator,
            lang,
            no_live,
        } => {
            let operator = operator.or(file.sports.operator).ok_or_else(|| {
                anyhow::anyhow!("No operator given. Pass --operator or add [sports] operator")
            })?;
            let lang = lang
                .or(file.sports.lang)
                .unwrap_or_else(|| "en".to_string());
            commands::sports::sports(&settings, &operator, &lang, !no_live).await
        }
    }
}
