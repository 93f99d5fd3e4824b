use anyhow::Context;
use clap::Parser;
use dbgp_client::config::DbgpConfig;
use dbgp_client::ui::console::AppBuilder;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen for engines on, overrides the config file.
    #[clap(short, long, env = "DBGPC_PORT")]
    port: Option<u16>,

    /// Hand every new connection to the user right after the handshake.
    #[clap(long)]
    break_at_entry: bool,

    /// Stop listening after the first session is caught.
    #[clap(long)]
    once: bool,

    /// Config file (default: ~/.config/dbgpc/config.toml).
    #[clap(short, long, env = "DBGPC_CONFIG")]
    config: Option<PathBuf>,

    /// Write logs into this file instead of stderr.
    #[clap(long)]
    log_file: Option<PathBuf>,

    /// Log raw protocol traffic, requires `RUST_LOG=dbgp::wire=trace`.
    #[clap(long)]
    trace_wire: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    dbgp_client::log::init(args.log_file.as_deref())?;
    if args.trace_wire {
        dbgp_client::log::enable_wire_trace();
    }

    let mut config = DbgpConfig::load(args.config.as_deref());
    if let Some(port) = args.port {
        config.port = port;
    }
    config.break_at_entry |= args.break_at_entry;
    config.once |= args.once;

    let app = AppBuilder::new(config)
        .build()
        .context("build console application")?;
    app.run()
}
