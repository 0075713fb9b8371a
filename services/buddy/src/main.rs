//! Terminal voice client.
//!
//! Runs one conversation end to end: microphone in over the socket
//! transport, tutor audio out through the speaker, pose frames at trace
//! level standing in for a renderer, stdin for topic steering, and the
//! star total on the way out.

mod audio_io;

use crate::audio_io::CpalCapture;
use anyhow::{Context, Result};
use clap::Parser;
use prattle_engine::{
    Animator, AvatarRig, EngineSettings, PersonaMode, SessionEngine, SessionState, TOPICS, topic,
};
use prattle_realtime::events::SessionConfig;
use prattle_realtime::socket::SocketConnector;
use prattle_realtime::token::TokenBroker;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{info, trace, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::ChronoLocal;

/// Voice-chat with the tutor from the terminal.
#[derive(Parser)]
#[command(name = "buddy", version, about)]
struct Args {
    /// Broker endpoint that mints session credentials.
    #[arg(
        long,
        env = "PRATTLE_BROKER_URL",
        default_value = "http://127.0.0.1:3000/token"
    )]
    broker_url: String,

    /// Realtime WebSocket endpoint, without the model query.
    #[arg(
        long,
        env = "PRATTLE_REALTIME_URL",
        default_value = "wss://api.openai.com/v1/realtime"
    )]
    realtime_url: String,

    /// Model negotiated for the session.
    #[arg(long, env = "PRATTLE_MODEL", default_value = "gpt-realtime")]
    model: String,

    /// Output voice.
    #[arg(long, env = "PRATTLE_VOICE", default_value = "alloy")]
    voice: String,

    /// Persona mode: upbeat, narrative or inquisitive.
    #[arg(long, default_value = "upbeat")]
    mode: PersonaMode,

    /// Print the topic catalog and exit.
    #[arg(long)]
    list_topics: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    if args.list_topics {
        print_topics();
        return Ok(());
    }

    let capture = Arc::new(CpalCapture);
    let connector = Arc::new(SocketConnector::new(args.realtime_url.clone(), capture));
    let broker = TokenBroker::new(args.broker_url.clone());
    let settings = EngineSettings::new(SessionConfig::new(args.model.clone(), args.voice.clone()));
    let engine = SessionEngine::new(broker, connector, settings);

    info!(mode = %args.mode, model = %args.model, "starting a conversation");
    engine
        .start(args.mode)
        .await
        .context("could not start the session")?;

    let sink = engine
        .audio_sink()
        .await
        .context("the session has no audio sink")?;
    let (playback_tx, playback_rx) = mpsc::channel(256);
    sink.attach_playback(playback_tx);
    let playback = match audio_io::start_playback(playback_rx) {
        Ok(worker) => worker,
        Err(err) => {
            engine.stop().await;
            return Err(err.context("could not open the speaker"));
        }
    };

    let mut animator = engine.animator();
    animator.set_rig(AvatarRig::standard());
    animator.attach_audio(sink);
    let ticker = tokio::spawn(animate(animator));

    info!("say hello to begin; type `topic <id>` to steer, `stop` to finish");
    run_commands(&engine).await;

    ticker.abort();
    engine.stop().await;
    if playback.join().is_err() {
        warn!("the playback thread panicked");
    }
    println!("stars earned: {}", engine.stars());
    Ok(())
}

/// Drives the avatar at roughly sixty frames per second, logging each pose
/// at trace level in place of a renderer.
async fn animate(mut animator: Animator) {
    let mut ticker = tokio::time::interval(Duration::from_millis(16));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last = tokio::time::Instant::now();
    loop {
        ticker.tick().await;
        let now = tokio::time::Instant::now();
        let dt = now.duration_since(last).as_secs_f32();
        last = now;
        if let Some(frame) = animator.tick(dt) {
            trace!(
                yaw = f64::from(frame.head_yaw),
                bob = f64::from(frame.head_bob),
                jaw = f64::from(frame.weights.get("jawOpen").copied().unwrap_or(0.0)),
                smile = f64::from(frame.weights.get("mouthSmile").copied().unwrap_or(0.0)),
                "pose"
            );
        }
    }
}

/// Reads stdin commands until the child is done or the session ends on
/// its own.
async fn run_commands(engine: &SessionEngine) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut state_rx = engine.shared().session_state_watch();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, wrapping up");
                break;
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                match *state_rx.borrow_and_update() {
                    SessionState::Failed => {
                        warn!("the session ended on its own");
                        break;
                    }
                    SessionState::Closed => break,
                    _ => {}
                }
            }
            line = lines.next_line() => {
                let Ok(Some(line)) = line else { break };
                if !handle_command(engine, &line).await {
                    break;
                }
            }
        }
    }
}

/// Applies one stdin line. Returns `false` when the loop should end.
async fn handle_command(engine: &SessionEngine, line: &str) -> bool {
    match parse_command(line) {
        Command::Nothing => {}
        Command::Stop => return false,
        Command::Topics => print_topics(),
        Command::Help => {
            println!("commands: topic <id> | topics | stop");
            print_topics();
        }
        Command::Unknown(word) => {
            println!("unknown command `{word}`; try `topic <id>`, `topics` or `stop`");
        }
        Command::Topic(id) => match topic(&id) {
            None => {
                println!("no topic called `{id}`");
                print_topics();
            }
            Some(card) => match engine.request_topic(card.prompt).await {
                Ok(true) => info!(topic = card.id, "topic sent"),
                Ok(false) => info!("the tutor is still talking, try again in a moment"),
                Err(err) => {
                    warn!(%err, "could not send the topic");
                    return false;
                }
            },
        },
    }
    true
}

enum Command {
    Topic(String),
    Topics,
    Stop,
    Help,
    Nothing,
    Unknown(String),
}

fn parse_command(line: &str) -> Command {
    let mut words = line.split_whitespace();
    match words.next() {
        None => Command::Nothing,
        Some("topic") => match words.next() {
            Some(id) => Command::Topic(id.to_string()),
            None => Command::Topics,
        },
        Some("topics") => Command::Topics,
        Some("stop" | "quit" | "exit") => Command::Stop,
        Some("help") => Command::Help,
        Some(other) => Command::Unknown(other.to_string()),
    }
}

fn print_topics() {
    println!("topics:");
    for card in TOPICS {
        println!("  {:<12} {}", card.id, card.label);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stdin_lines_parse_into_commands() {
        assert!(matches!(parse_command("topic books"), Command::Topic(id) if id == "books"));
        assert!(matches!(parse_command("topic"), Command::Topics));
        assert!(matches!(parse_command("  topics  "), Command::Topics));
        assert!(matches!(parse_command("stop"), Command::Stop));
        assert!(matches!(parse_command("quit"), Command::Stop));
        assert!(matches!(parse_command(""), Command::Nothing));
        assert!(matches!(parse_command("dance"), Command::Unknown(word) if word == "dance"));
    }

    #[test]
    fn cli_defaults_parse() {
        let args = Args::parse_from(["buddy"]);
        assert_eq!(args.mode, PersonaMode::Upbeat);
        assert!(!args.list_topics);
    }

    #[test]
    fn cli_accepts_a_persona_mode() {
        let args = Args::parse_from(["buddy", "--mode", "narrative"]);
        assert_eq!(args.mode, PersonaMode::Narrative);
        assert!(Args::try_parse_from(["buddy", "--mode", "grumpy"]).is_err());
    }
}
