//! `rollcall`: run the attendance kiosk against simulated devices.

mod backend;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use rollcall_core::{ControlAction, KioskConfig, control_topic};
use rollcall_hardware::mock::{MockCamera, MockCardReader, MockClassifier};
use rollcall_hardware::{Classification, MAX_UID_LENGTH};
use rollcall_session::{AttendanceOrchestrator, KioskEvent, KioskEvents};
use rollcall_transport::{LocalBroker, PubSubChannel};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Distance reported by the simulated classifier for every face.
const SIMULATED_CONFIDENCE: f32 = 40.0;

#[derive(Parser, Debug)]
#[command(name = "rollcall", version, about = "Attendance kiosk")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a scripted check-in and check-out session on the local broker.
    Simulate {
        /// TOML configuration file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Card presented during check-in, as dash-separated bytes (`12-34-56`).
        #[arg(long = "card", value_name = "UID", value_parser = parse_uid)]
        cards: Vec<CardUid>,

        /// Identity recognized during check-out.
        #[arg(long = "face", value_name = "LABEL")]
        faces: Vec<String>,
    },

    /// Print the effective configuration as TOML.
    Config {
        /// TOML configuration file.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

/// Card UID bytes given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CardUid(Vec<u8>);

fn parse_uid(raw: &str) -> std::result::Result<CardUid, String> {
    let uid = raw
        .split('-')
        .map(|part| {
            part.trim()
                .parse::<u8>()
                .map_err(|e| format!("invalid UID byte {part:?}: {e}"))
        })
        .collect::<std::result::Result<Vec<u8>, String>>()?;
    if uid.len() > MAX_UID_LENGTH {
        return Err(format!("UID has {} bytes, at most {MAX_UID_LENGTH} allowed", uid.len()));
    }
    Ok(CardUid(uid))
}

fn load_config(path: Option<&PathBuf>) -> Result<KioskConfig> {
    KioskConfig::load(path.map(PathBuf::as_path)).with_context(|| match path {
        Some(path) => format!("loading configuration from {}", path.display()),
        None => "loading default configuration".to_string(),
    })
}

fn describe(event: &KioskEvent) -> String {
    match event {
        KioskEvent::SessionChanged { from, to, action } => match action {
            Some(action) => format!("session {from} -> {to} ({action})"),
            None => format!("session {from} -> {to}"),
        },
        KioskEvent::Submission {
            method,
            subject,
            result,
        } => match (&result.raw_response, &result.failure) {
            (Some(reply), _) => format!("{method} {subject}: {reply}"),
            (None, Some(failure)) => format!("{method} {subject}: failed ({failure})"),
            (None, None) => format!("{method} {subject}: no response"),
        },
        KioskEvent::CaptureReady => "camera ready".to_string(),
        KioskEvent::Fault { subsystem, reason } => format!("{subsystem} fault: {reason}"),
    }
}

/// Print events until `count` submissions were seen or `deadline` passes.
async fn await_submissions(events: &mut KioskEvents, count: usize, deadline: Duration) -> usize {
    let mut seen = 0;
    let wait = async {
        while seen < count {
            let Some(event) = events.recv().await else {
                break;
            };
            println!("{}", describe(&event));
            if matches!(event, KioskEvent::Submission { .. }) {
                seen += 1;
            }
        }
    };
    let _ = tokio::time::timeout(deadline, wait).await;
    seen
}

async fn control(broker: &LocalBroker, topic: &str, action: ControlAction) -> Result<()> {
    let payload = serde_json::json!({ "action": action.as_str() }).to_string();
    broker
        .publish(topic, Bytes::from(payload))
        .await
        .with_context(|| format!("publishing {action} on {topic}"))
}

async fn simulate(config: KioskConfig, cards: Vec<CardUid>, faces: Vec<String>) -> Result<()> {
    let broker = LocalBroker::new();
    let _backend = backend::spawn(broker.clone())
        .await
        .context("starting simulated backend")?;

    let (reader, reader_handle) = MockCardReader::new();
    let (camera, _camera_handle) = MockCamera::new();
    let (classifier, classifier_handle) = MockClassifier::new();

    let topic = control_topic(config.device.device_id.as_str());
    let deadline = config.gateway.response_timeout()
        + config.capture.settle_delay()
        + config.capture.classify_interval()
        + Duration::from_secs(1);

    let mut kiosk =
        AttendanceOrchestrator::new(config, Arc::new(broker.clone()), reader, camera, classifier);
    let mut events = kiosk.events();
    kiosk.start().await.context("starting kiosk")?;
    info!(cards = cards.len(), faces = faces.len(), "simulation started");

    control(&broker, &topic, ControlAction::StartCheckIn).await?;
    for CardUid(uid) in &cards {
        reader_handle
            .present_card(uid)
            .await
            .context("presenting card")?;
        await_submissions(&mut events, 1, deadline).await;
    }
    control(&broker, &topic, ControlAction::EndCheckIn).await?;

    if !faces.is_empty() {
        classifier_handle.set_faces_visible(true);
        control(&broker, &topic, ControlAction::StartCheckOut).await?;
        for face in &faces {
            classifier_handle.push_result(Classification::recognized(face, SIMULATED_CONFIDENCE));
            if await_submissions(&mut events, 1, deadline).await == 0 {
                println!("check-out {face}: not submitted");
            }
        }
        control(&broker, &topic, ControlAction::EndCheckOut).await?;
    }

    kiosk.stop().await.context("stopping kiosk")?;
    while let Some(event) = events.try_recv() {
        println!("{}", describe(&event));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Simulate {
            config,
            cards,
            faces,
        } => {
            if cards.is_empty() && faces.is_empty() {
                bail!("nothing to simulate: pass at least one --card or --face");
            }
            let config = load_config(config.as_ref())?;
            simulate(config, cards, faces).await?;
        }
        Command::Config { config } => {
            let config = load_config(config.as_ref())?;
            print!("{}", config.to_toml_string()?);
        }
    }
    Ok(())
}
