use chrono::Local;
use color_eyre::{eyre::eyre, Result};
use padloop::bus::{BusMessage, EventBus};
use padloop::capture::{CaptureHandle, GilrsDevice};
use padloop::config;
use padloop::counter::CounterHandle;
use padloop::event::{Channel, SessionClock};
use padloop::macros::file as macro_file;
use padloop::macros::player;
use padloop::macros::recorder::{RecorderError, RecorderHandle};
use padloop::macros::Macro;
use padloop::sink::LogSink;
use std::sync::Arc;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    info!("Loading configuration");
    let config_file = config::ensure_default_config()?;
    debug!("Config file: {}", config_file.display());
    let config = config::load_or_default().validated();
    let macro_dir = config.macro_dir();

    let clock = SessionClock::new();
    let bus = EventBus::new();

    // Console + control surface subscriber, registered before capture
    // starts so nothing is missed.
    let mut live = bus.subscribe("console", config.bus.backlog);
    let counter_sub = bus.subscribe("counter", config.bus.backlog);
    let recorder_sub = bus.subscribe("recorder", config.bus.backlog);

    info!("Initializing controller");
    let device = GilrsDevice::new().map_err(|e| eyre!("Failed to open controller: {}", e))?;
    let capture = CaptureHandle::spawn(
        Box::new(device),
        Some(config.capture_settings()),
        bus.clone(),
        clock.clone(),
    )
    .map_err(|e| eyre!("Failed to spawn capture: {}", e))?;

    let (counter, mut snapshots) = CounterHandle::spawn(counter_sub, config.counter_settings());
    let _latest_bucket = counter.subscribe();
    let (recorder, mut truncated_rx) = RecorderHandle::spawn(recorder_sub);

    info!(
        "padloop running; Start arms recording, Select stops and saves, Guide replays the last take"
    );
    let mut last_take: Option<Arc<Macro>> = None;

    loop {
        tokio::select! {
            message = live.recv() => {
                match message {
                    Some(BusMessage::Input(event)) => {
                        info!(
                            "Input {:?} = {:.3} at {:?}",
                            event.channel, event.value, event.timestamp
                        );
                        if event.value == 1.0 {
                            handle_control_button(
                                event.channel,
                                &recorder,
                                &macro_dir,
                                &mut last_take,
                            )
                            .await;
                        }
                    }
                    Some(BusMessage::Disconnected) => {
                        warn!("Controller disconnected, shutting down");
                        break;
                    }
                    None => break,
                }
            }
            snapshot = snapshots.recv() => {
                match snapshot {
                    Some(snapshot) => info!(
                        "Bucket {} [{:?}]: {} inputs across {} channels",
                        snapshot.index,
                        snapshot.window_start,
                        snapshot.total,
                        snapshot.counts.len()
                    ),
                    None => {
                        debug!("Counter stream closed");
                        break;
                    }
                }
            }
            truncated = truncated_rx.recv() => {
                match truncated {
                    Some(take) => {
                        warn!(
                            "Recording was truncated by the disconnect ({} events kept)",
                            take.len()
                        );
                        stash_take(take, &macro_dir, &mut last_take);
                    }
                    None => {
                        debug!("Recorder finished");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C, shutting down");
                break;
            }
        }
    }

    capture.shutdown();
    for (name, dropped) in bus.overflow_report() {
        if dropped > 0 {
            warn!("Subscriber '{}' dropped {} events this session", name, dropped);
        }
    }
    Ok(())
}

async fn handle_control_button(
    channel: Channel,
    recorder: &RecorderHandle,
    macro_dir: &std::path::Path,
    last_take: &mut Option<Arc<Macro>>,
) {
    match channel {
        Channel::Start => match recorder.start_recording().await {
            Ok(()) => info!("Recording armed"),
            Err(RecorderError::AlreadyRecording) => warn!("Already recording"),
            Err(err) => error!("Could not arm recording: {}", err),
        },
        Channel::Select => match recorder.stop_recording().await {
            Ok(take) => {
                info!(
                    "Recorded {} events over {:?}",
                    take.len(),
                    take.total_duration()
                );
                stash_take(take, macro_dir, last_take);
            }
            Err(RecorderError::EmptyRecording) => warn!("Recording was empty, discarded"),
            Err(RecorderError::NotRecording) => warn!("Not recording"),
            Err(err) => error!("Could not stop recording: {}", err),
        },
        Channel::Guide => {
            if let Some(take) = last_take.clone() {
                match player::play(take, Box::new(LogSink::default()), 1.0) {
                    Ok(_session) => info!("Replaying last take"),
                    Err(err) => error!("Replay failed to start: {}", err),
                }
            } else {
                warn!("No take recorded yet");
            }
        }
        _ => {}
    }
}

fn stash_take(take: Macro, macro_dir: &std::path::Path, last_take: &mut Option<Arc<Macro>>) {
    let name = Local::now().format("take_%Y%m%d_%H%M%S").to_string();
    match macro_file::save_named(macro_dir, &name, &take) {
        Ok(path) => info!("Saved take to {}", path.display()),
        Err(err) => error!("Could not save take: {}", err),
    }
    *last_take = Some(Arc::new(take));
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
