//! Daemon entry point: parses the CLI, loads config, wires the transport to
//! an output device and an (optional) command source, then pumps commands
//! until told to stop.
//!
//! Grounded on the teacher's `main.rs` bootstrap shape: tracing setup, a
//! sequence of fallible init steps, and a long-lived context object handed
//! to whatever runs the daemon loop.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use spindled::bus::{Command, CommandSource, NullCommandSource};
use spindled::config::Config;
use spindled::sink::pcm_sink::PcmSink;
use spindled::source::disc::DiscSource;
use spindled::transport::{LocalStateBroadcaster, Transport};
use spindled::{AudioFormat, PacketiserConfig};

#[derive(Parser, Debug)]
#[command(name = "spindled", about = "Networked CD player transport daemon")]
struct Cli {
    /// Path to the YAML config file.
    #[arg(long, default_value = "/etc/spindled/config.yaml")]
    config: PathBuf,

    /// Enable verbose (debug-level) logging.
    #[arg(long)]
    debug: bool,
}

fn init_tracing(debug: bool) {
    let default_filter = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();
}

struct AppContext {
    transport: Arc<Transport>,
    library: Arc<dyn spindled::library::Library>,
    config: Config,
}

type BoxError = Box<dyn std::error::Error>;

fn bootstrap(cli: &Cli) -> Result<AppContext, BoxError> {
    let config = Config::load(&cli.config)?;
    tracing::info!(library_root = %config.library_root.display(), "loaded configuration");

    let library: Arc<dyn spindled::library::Library> =
        Arc::new(spindled::library::DiscDirLibrary::new(config.library_root.clone()));

    let sink = Box::new(PcmSink::new(config.device_name.clone()));
    let state_bus = Arc::new(LocalStateBroadcaster::new());
    let transport = Transport::new(sink, state_bus, config.queue_capacity);

    Ok(AppContext {
        transport,
        library,
        config,
    })
}

fn run_command_loop(ctx: &AppContext, mut commands: Box<dyn CommandSource>) {
    let packetiser_config = PacketiserConfig {
        packets_per_second: ctx.config.packets_per_second,
    };
    while let Some(command) = commands.recv() {
        match command {
            Command::NewDisc(disc_id) => match ctx.library.lookup(&disc_id) {
                Ok(disc) => {
                    let source = DiscSource::new(
                        Arc::new(disc),
                        ctx.library.clone(),
                        AudioFormat::CDDA,
                        packetiser_config,
                        None,
                    );
                    ctx.transport.new_source(Box::new(source), 0);
                }
                Err(err) => tracing::error!(%err, %disc_id, "failed to look up disc"),
            },
            Command::Eject => ctx.transport.eject(),
            Command::Stop => ctx.transport.stop(),
            Command::Play => ctx.transport.play(),
            Command::Pause => ctx.transport.pause(),
            Command::PlayPause => ctx.transport.play_pause(),
            Command::Next => ctx.transport.next(),
            Command::Prev => ctx.transport.prev(),
            Command::SetRippingProgress { disc_id, progress } => {
                ctx.transport.set_ripping_progress(disc_id, progress)
            }
        }
    }
}

fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let ctx = bootstrap(&cli)?;
    tracing::info!("spindled ready");

    // No command transport (message bus, REST, LIRC...) is wired up by
    // default; a real deployment replaces this with one that feeds the
    // transport from outside the process.
    run_command_loop(&ctx, Box::new(NullCommandSource));

    Ok(())
}
