//! Live microphone demo: spoken "start" / "stop" drives a countdown printed
//! to the terminal.
//!
//! Usage: live_timer [model-dir] [initial-secs]
//!        live_timer --devices
//!
//! The model directory holds model.json and metadata.json; the MODEL_DIR
//! environment variable is honored when no argument is given.

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use voxtimer::{
    load_classifier, open_frame_stream, CaptureConfig, ListenConfig, Listener, MicSource,
    ModelSource, PolicyConfig, SessionHandle, TimerConfig, TimerEvent, TimerHandle,
};

#[tokio::main]
async fn main() -> voxtimer::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|arg| arg == "--devices") {
        for device in MicSource::list_devices()? {
            let marker = if device.is_default { " (default)" } else { "" };
            println!("{}{}", device.name, marker);
        }
        return Ok(());
    }

    let model_dir = args
        .first()
        .cloned()
        .or_else(|| std::env::var("MODEL_DIR").ok())
        .unwrap_or_else(|| "model".to_string());
    let mut timer_config = TimerConfig::default();
    if let Some(secs) = args.get(1).and_then(|s| s.parse().ok()) {
        timer_config = timer_config.with_initial_secs(secs);
    }

    let classifier = load_classifier(&ModelSource::from_dir(&model_dir))?;
    let timer = TimerHandle::new(timer_config.initial_secs);
    let listener = Listener::new(classifier.clone(), &PolicyConfig::default(), timer.clone())?;

    let (mut mic, frames, _pump) = open_frame_stream(
        &CaptureConfig::default(),
        &ListenConfig::default(),
        classifier.sample_rate(),
        classifier.expected_samples(),
    )?;

    let (ticker_stop, ticker_stop_rx) = watch::channel(false);
    let ticker = tokio::spawn(
        timer
            .clone()
            .run_ticker(timer_config.tick_period(), ticker_stop_rx),
    );

    let session = listener.listen(frames);
    println!(
        "{:>6}  listening on {:?}; say \"start\" or \"stop\" (ctrl-c quits)",
        timer.snapshot().display,
        mic.device_name()
    );

    let mut events = timer.subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => render(&timer, &session, &event),
                Err(RecvError::Lagged(skipped)) => info!("display lagged {} events", skipped),
                Err(RecvError::Closed) => break,
            },
        }
    }

    let stats = session.stop().await;
    let _ = ticker_stop.send(true);
    let _ = ticker.await;
    mic.close();
    info!(
        frames = stats.frames,
        classified = stats.classified,
        skipped = stats.skipped,
        commands = stats.commands,
        "session closed"
    );
    Ok(())
}

fn render(timer: &TimerHandle, session: &SessionHandle, event: &TimerEvent) {
    let transition = match event {
        TimerEvent::Started { .. } => "started",
        TimerEvent::Paused { .. } => "paused",
        TimerEvent::Tick { .. } => "",
        TimerEvent::Expired => "expired",
        TimerEvent::Reset { .. } => "reset",
    };
    let scores = session
        .labelled_predictions()
        .map(|pairs| {
            pairs
                .iter()
                .map(|(label, score)| format!("{} {:.2}", label, score))
                .collect::<Vec<_>>()
                .join("  ")
        })
        .unwrap_or_default();
    println!("{:>6}  {:<8} {}", timer.snapshot().display, transition, scores);
}
