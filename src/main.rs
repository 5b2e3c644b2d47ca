//! fishlink - Drive a FISH scripting engine over TCP
//!
//! Launches or attaches to the engine, sends commands and expressions, reads
//! FISH binary files and runs the peer-to-peer value link.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fishlink::config::{self, Config};
use fishlink::engine::{Engine, Launcher, RequestKind};
use fishlink::fish::{FileLayout, FishReader};
use fishlink::network::{PeerClient, PeerLink, PeerServer};
use fishlink::protocol::{NumericArray, Value};

/// fishlink - FISH engine bridge
#[derive(Parser)]
#[command(name = "fishlink")]
#[command(version)]
#[command(about = "Drive a FISH scripting engine over TCP", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the values stored in a FISH binary file
    Dump {
        /// File to read
        file: PathBuf,

        /// The file was written with padded integers
        #[arg(long)]
        padded_ints: bool,

        /// Print as a JSON array
        #[arg(long)]
        json: bool,
    },

    /// Evaluate expressions in the engine
    Eval {
        /// Expressions; any containing '=' are sent as assignments
        #[arg(required = true)]
        expressions: Vec<String>,

        /// Scenario file to launch the engine with
        #[arg(short, long)]
        scenario: Option<PathBuf>,

        /// Wait for an engine started by hand instead of launching one
        #[arg(short, long)]
        attach: bool,

        /// Engine channel index (0-5)
        #[arg(long)]
        channel: Option<u8>,
    },

    /// Wait for a peer and print what it sends
    PeerListen {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Connect to a peer and send values
    PeerSend {
        /// Peer host name or address
        host: String,

        /// Values to send (integers, floats or text)
        values: Vec<String>,

        /// Peer port
        #[arg(short, long)]
        port: Option<u16>,

        /// Comma separated numbers sent as one array
        #[arg(long, value_delimiter = ',')]
        array: Vec<f64>,
    },

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    // Load configuration
    let config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_default()
    };

    match cli.command {
        Commands::Dump {
            file,
            padded_ints,
            json,
        } => {
            let layout = if padded_ints {
                FileLayout::PaddedInts
            } else {
                config.fish.layout
            };
            dump_file(&file, layout, json)?;
        }
        Commands::Eval {
            expressions,
            scenario,
            attach,
            channel,
        } => {
            run_eval(config, expressions, scenario, attach, channel).await?;
        }
        Commands::PeerListen { port } => {
            run_peer_listen(config, port).await?;
        }
        Commands::PeerSend {
            host,
            values,
            port,
            array,
        } => {
            run_peer_send(config, host, values, port, array).await?;
        }
        Commands::Config { generate, output } => {
            if generate {
                let sample = config::generate_sample_config()?;
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }

    Ok(())
}

/// Print every value of a FISH file
fn dump_file(path: &Path, layout: FileLayout, json: bool) -> anyhow::Result<()> {
    let mut reader = FishReader::open_with_layout(path, layout)
        .with_context(|| format!("Cannot open {}", path.display()))?;
    let values = reader.read_all()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&values)?);
    } else {
        for value in &values {
            println!("{}", value);
        }
    }
    Ok(())
}

/// Launch or attach to the engine and evaluate expressions in order
async fn run_eval(
    mut config: Config,
    expressions: Vec<String>,
    scenario: Option<PathBuf>,
    attach: bool,
    channel: Option<u8>,
) -> anyhow::Result<()> {
    if let Some(channel) = channel {
        config.network.channel = channel;
    }
    let listen = SocketAddr::new(config.network.bind_address, config.network.port()?);
    let options = config.network.options();
    let attach = attach || config.engine.attach;

    let mut engine = if attach {
        println!("Waiting for the engine on {}...", listen);
        Engine::attach(listen, options).await?
    } else {
        let executable = config
            .engine
            .executable
            .clone()
            .context("No engine executable configured; set [engine] executable or use --attach")?;
        let scenario = scenario
            .or_else(|| config.engine.scenario.clone())
            .context("No scenario file given")?;
        Engine::launch(&Launcher::new(executable), &scenario, listen, options).await?
    };

    if let Err(e) = eval_all(&mut engine, &expressions).await {
        if let Err(abort_err) = engine.abort().await {
            tracing::warn!("Failed to stop engine: {}", abort_err);
        }
        return Err(e.into());
    }

    if attach {
        engine.release().await?;
    } else {
        engine.terminate().await?;
    }
    Ok(())
}

async fn eval_all(engine: &mut Engine, expressions: &[String]) -> fishlink::EngineResult<()> {
    for expression in expressions {
        match RequestKind::classify(expression) {
            RequestKind::Assign => {
                engine.assign(expression).await?;
                println!("{}", expression);
            }
            RequestKind::Eval => match engine.eval_decoded(expression).await {
                Ok(result) => println!("{} => {}", expression, result),
                Err(e) if !e.is_fatal() => eprintln!("{} failed: {}", expression, e),
                Err(e) => return Err(e),
            },
        }
    }
    Ok(())
}

/// Accept one peer and print its values until it disconnects
async fn run_peer_listen(config: Config, port: Option<u16>) -> anyhow::Result<()> {
    let port = port.unwrap_or(config.peer.port);
    let server = PeerServer::bind(config.network.bind_address, port, config.peer.options()).await?;
    println!("Waiting for a peer on {}...", server.local_addr());

    let mut link = server.accept().await?;
    loop {
        let value = match link.recv().await {
            Ok(value) => value,
            Err(e) if e.is_closed() => break,
            Err(e) => return Err(e.into()),
        };
        match PeerLink::decode_array(&value) {
            Some(Ok(array)) => println!("array {:?}: {:?}", array.shape(), array.data()),
            Some(Err(e)) => tracing::warn!("Unreadable array payload: {}", e),
            None => println!("{}", value),
        }
    }

    println!("Peer disconnected");
    Ok(())
}

/// Connect to a peer and send the given values
async fn run_peer_send(
    config: Config,
    host: String,
    values: Vec<String>,
    port: Option<u16>,
    array: Vec<f64>,
) -> anyhow::Result<()> {
    let port = port.unwrap_or(config.peer.port);
    let mut link = PeerClient::connect(
        &host,
        port,
        config.peer.connect_timeout(),
        config.peer.options(),
    )
    .await?;

    for text in &values {
        link.send(&parse_value(text)).await?;
    }
    if !array.is_empty() {
        link.send_array(&NumericArray::from_vec(array)).await?;
    }

    link.close().await?;
    Ok(())
}

/// Integers, then floats, otherwise text
fn parse_value(text: &str) -> Value {
    if let Ok(v) = text.parse::<i32>() {
        Value::Int(v)
    } else if let Ok(v) = text.parse::<f64>() {
        Value::Float(v)
    } else {
        Value::from(text)
    }
}
