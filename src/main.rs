use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use sst_rig::alert::ProcessCuePlayer;
use sst_rig::config::SessionSpec;
use sst_rig::device::codec::ControlCommand;
use sst_rig::device::DeviceLink;
use sst_rig::report::TempSnapshot;
use sst_rig::session::{ControllerSettings, SessionController, SessionHandle, TrialAggregator};
use sst_rig::streaming::{CaptureConfig, StreamSettings, StreamingServer};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "sst-rig", version, about = "Stop-signal task apparatus controller")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a training session and stream live telemetry to viewers
    Run(RunArgs),
    /// Send a single manual test command to the apparatus
    Test(TestArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Session parameter file (JSON)
    #[arg(long, env = "SST_SESSION")]
    session: PathBuf,

    /// Serial port the apparatus is attached to
    #[arg(long, env = "SST_PORT", default_value = "/dev/ttyACM0")]
    port: String,

    /// Serial baud rate
    #[arg(long, env = "SST_BAUD", default_value_t = 115_200)]
    baud: u32,

    /// Address the streaming server binds
    #[arg(long, env = "SST_BIND", default_value = "0.0.0.0:9999")]
    bind: SocketAddr,

    /// Directory of frames replayed as the capture feed
    #[arg(long, env = "SST_CAPTURE_DIR", conflicts_with = "capture_tcp")]
    capture_dir: Option<PathBuf>,

    /// host:port of a networked camera bridge
    #[arg(long, env = "SST_CAPTURE_TCP")]
    capture_tcp: Option<String>,

    /// Where reports and the safety snapshot are written
    #[arg(long, env = "SST_REPORT_DIR", default_value = ".")]
    report_dir: PathBuf,

    /// External audio player for the end-of-session cue
    #[arg(long, env = "SST_CUE_PLAYER", default_value = "aplay")]
    cue_player: String,

    /// Cue sound file
    #[arg(long, env = "SST_CUE_ASSET", default_value = "assets/bell.wav")]
    cue_asset: PathBuf,

    /// Deadline in seconds for a single apparatus write
    #[arg(long, default_value_t = 5)]
    write_deadline_secs: u64,

    /// Deadline in seconds for a single viewer socket write
    #[arg(long, default_value_t = 30)]
    send_deadline_secs: u64,
}

#[derive(Args)]
struct TestArgs {
    /// Serial port the apparatus is attached to
    #[arg(long, env = "SST_PORT", default_value = "/dev/ttyACM0")]
    port: String,

    /// Serial baud rate
    #[arg(long, env = "SST_BAUD", default_value_t = 115_200)]
    baud: u32,

    /// Command to send
    #[arg(value_enum)]
    command: TestCommand,
}

#[derive(Clone, Copy, ValueEnum)]
enum TestCommand {
    /// Open the reward valve
    RewardOn,
    /// Close the reward valve
    RewardOff,
    /// Fire the stop-signal cue once
    StopSignal,
    /// Switch the laser on
    LaserOn,
    /// Switch the laser off
    LaserOff,
    /// Restart the control board
    Reset,
}

impl From<TestCommand> for ControlCommand {
    fn from(cmd: TestCommand) -> Self {
        match cmd {
            TestCommand::RewardOn => ControlCommand::RewardOn,
            TestCommand::RewardOff => ControlCommand::RewardOff,
            TestCommand::StopSignal => ControlCommand::StopSignal,
            TestCommand::LaserOn => ControlCommand::LaserOn,
            TestCommand::LaserOff => ControlCommand::LaserOff,
            TestCommand::Reset => ControlCommand::Reset,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sst_rig=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Test(args) => test(args).await,
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let spec: SessionSpec = serde_json::from_slice(
        &std::fs::read(&args.session)
            .with_context(|| format!("cannot read session file {}", args.session.display()))?,
    )
    .context("session file is not a valid session spec")?;

    // no board, no session: refuse to start rather than run blind
    let link = DeviceLink::open(
        &args.port,
        args.baud,
        Duration::from_secs(args.write_deadline_secs),
    )
    .context("apparatus connection failed; power the board and restart the program")?;

    let snapshot = TempSnapshot::new(&args.report_dir);
    if let Ok(Some(leftover)) = snapshot.recover() {
        warn!(
            trials = leftover.trials_recorded(),
            path = %snapshot.path().display(),
            "found trial data from an interrupted session; it will be replaced"
        );
    }

    let session = SessionHandle::new();

    let capture = match (&args.capture_dir, &args.capture_tcp) {
        (_, Some(addr)) => {
            let (host, port) = addr
                .rsplit_once(':')
                .context("--capture-tcp expects host:port")?;
            CaptureConfig::Tcp {
                host: host.to_string(),
                port: port.parse().context("--capture-tcp port is not a number")?,
            }
        }
        (Some(dir), None) => CaptureConfig::Directory {
            path: dir.display().to_string(),
            rate_limit_ms: Some(100),
            loop_playback: true,
        },
        (None, None) => CaptureConfig::Directory {
            path: "frames".to_string(),
            rate_limit_ms: Some(100),
            loop_playback: true,
        },
    };

    let stream_settings = StreamSettings {
        bind: args.bind,
        send_deadline: Duration::from_secs(args.send_deadline_secs),
        ..StreamSettings::default()
    };
    let server = StreamingServer::new(stream_settings, capture, session.clone());
    tokio::spawn(async move {
        if let Err(e) = server.serve().await {
            error!("streaming server failed: {e}");
        }
    });

    let cue = ProcessCuePlayer::new(args.cue_player, args.cue_asset);
    let mut controller = SessionController::new(
        link.writer(),
        link.reader_slot(),
        session,
        TrialAggregator::new(Box::new(cue)),
        ControllerSettings {
            report_dir: args.report_dir.clone(),
            ..ControllerSettings::default()
        },
    );

    controller.commit(&spec)?;
    let mut events = controller.start().await?;
    info!("session running; press Ctrl-C to end it");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("session end requested");
                break;
            }
            event = events.recv() => match event {
                Some(event) => {
                    if let Err(e) = controller.on_trial(event).await {
                        error!("session aborted: {e}");
                        break;
                    }
                }
                None => {
                    warn!("telemetry stream ended");
                    break;
                }
            }
        }
    }

    let report = controller.end().await?;
    println!("report written to {}", report.display());
    Ok(())
}

async fn test(args: TestArgs) -> anyhow::Result<()> {
    let link = DeviceLink::open(&args.port, args.baud, Duration::from_secs(5))
        .context("apparatus connection failed; power the board and restart the program")?;

    let command: ControlCommand = args.command.into();
    link.writer().send(command.as_bytes()).await?;
    info!(?command, "test command sent");
    Ok(())
}
