//! Replay a recorded WAV file through the turn pipeline with stub services
//! and report the speech events and the committed conversation.
//!
//! ```text
//! cargo run -p attend-core --bin replay -- --input session.wav \
//!     [--config turn.json] [--reply "Sure. Let's start."] [--threshold 0.02] [--output report.json]
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast::error::TryRecvError;
use tracing::info;

use attend::audio::wav::WavFileSource;
use attend::services::stub::{MemorySink, ScriptedLanguageModel, SilentSynthesizer, StubTranscriber};
use attend::vad::energy::EnergyVad;
use attend::{
    AudioSink, Collaborators, ConversationMessage, EventEnvelope, SinkError, TurnConfig,
    TurnEngine,
};

const DEFAULT_REPLY: &str = "Got it. Tell me more when you're ready.";

#[derive(Debug)]
struct Args {
    input: PathBuf,
    config: Option<PathBuf>,
    reply: String,
    threshold: Option<f32>,
    output: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Report {
    input: String,
    sample_rate: u32,
    channels: u16,
    frames: usize,
    turns_confirmed: usize,
    false_starts: usize,
    false_ends: usize,
    audio_bytes_played: usize,
    events: Vec<EventEnvelope>,
    conversation: Vec<ConversationMessage>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("attend=info")),
        )
        .init();

    if let Err(e) = run() {
        eprintln!("replay failed: {e:#}");
        std::process::exit(1);
    }
}

fn parse_args() -> anyhow::Result<Args> {
    let mut input: Option<PathBuf> = None;
    let mut config: Option<PathBuf> = None;
    let mut reply = DEFAULT_REPLY.to_owned();
    let mut threshold: Option<f32> = None;
    let mut output: Option<PathBuf> = None;

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        let mut value = |name: &str| {
            it.next()
                .ok_or_else(|| anyhow::anyhow!("missing value for {name}"))
        };
        match arg.as_str() {
            "--input" => input = Some(PathBuf::from(value("--input")?)),
            "--config" => config = Some(PathBuf::from(value("--config")?)),
            "--reply" => reply = value("--reply")?,
            "--threshold" => {
                let v = value("--threshold")?;
                threshold = Some(
                    v.parse::<f32>()
                        .map_err(|_| anyhow::anyhow!("invalid value for --threshold: {v}"))?,
                );
            }
            "--output" => output = Some(PathBuf::from(value("--output")?)),
            "--help" | "-h" => {
                println!(
                    "Usage: replay --input <file.wav> [--config <turn.json>] [--reply <text>] \\
  [--threshold <rms>] [--output <report.json>]"
                );
                std::process::exit(0);
            }
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }

    let input = input.ok_or_else(|| anyhow::anyhow!("--input is required"))?;
    Ok(Args {
        input,
        config,
        reply,
        threshold,
        output,
    })
}

fn run() -> anyhow::Result<()> {
    let args = parse_args()?;

    let mut config = match &args.config {
        Some(path) => TurnConfig::from_json_str(&std::fs::read_to_string(path)?)?,
        None => TurnConfig::default(),
    };
    let source = WavFileSource::open(&args.input, config.frame_samples)?;
    config.sample_rate = source.sample_rate();
    config.channels = source.channels();

    let vad = match args.threshold {
        Some(threshold) => EnergyVad::new(threshold, 8),
        None => EnergyVad::default(),
    };

    let sink = MemorySink::new();
    let played = sink.written();
    let services = Collaborators {
        transcriber: Arc::new(StubTranscriber),
        model: Arc::new(ScriptedLanguageModel::speaking(&args.reply)),
        synthesizer: Arc::new(SilentSynthesizer),
    };
    let engine = TurnEngine::new(
        config.clone(),
        services,
        move || -> Result<Box<dyn AudioSink>, SinkError> { Ok(Box::new(sink.clone())) },
    )?;

    let mut events_rx = engine.subscribe_events();
    info!(input = %args.input.display(), "replaying");
    engine.start(Box::new(source.paced()), Box::new(vad))?;
    engine.join()?;

    let mut events = Vec::new();
    loop {
        match events_rx.try_recv() {
            Ok(envelope) => events.push(envelope),
            Err(TryRecvError::Lagged(n)) => tracing::warn!(skipped = n, "event report truncated"),
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }

    let diagnostics = engine.diagnostics_snapshot();
    let audio_bytes_played = played.lock().len();
    let report = Report {
        input: args.input.display().to_string(),
        sample_rate: config.sample_rate,
        channels: config.channels,
        frames: diagnostics.frames_in,
        turns_confirmed: diagnostics.turns_confirmed,
        false_starts: diagnostics.false_starts,
        false_ends: diagnostics.false_ends,
        audio_bytes_played,
        events,
        conversation: engine.conversation(),
    };

    println!(
        "{} frames, {} turns confirmed, {} false starts, {} false ends, {} bytes played",
        report.frames,
        report.turns_confirmed,
        report.false_starts,
        report.false_ends,
        report.audio_bytes_played
    );

    let json = serde_json::to_string_pretty(&report)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, json)?;
            println!("report written to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}
