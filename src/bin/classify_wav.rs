//! Replay a WAV recording through the classifier and print the decision each
//! policy would take on every frame. Handy when calibrating the threshold
//! for a freshly trained model.
//!
//! Usage: classify_wav <model-dir> <recording.wav>

use std::path::Path;

use tracing_subscriber::EnvFilter;

use voxtimer::audio::wav_frames;
use voxtimer::{load_classifier, Command, CommandPolicy, ListenConfig, ModelSource, PolicyConfig};

fn main() -> voxtimer::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let (model_dir, wav_path) = match (args.next(), args.next()) {
        (Some(model_dir), Some(wav_path)) => (model_dir, wav_path),
        _ => {
            eprintln!("usage: classify_wav <model-dir> <recording.wav>");
            std::process::exit(2);
        }
    };

    let classifier = load_classifier(&ModelSource::from_dir(&model_dir))?;
    let frames = wav_frames(
        Path::new(&wav_path),
        classifier.sample_rate(),
        classifier.expected_samples(),
        ListenConfig::default().overlap,
    )?;
    let argmax = CommandPolicy::resolve(&PolicyConfig::argmax(), classifier.labels())?;
    let threshold = CommandPolicy::resolve(&PolicyConfig::default(), classifier.labels())?;

    println!(
        "{} frames of {} samples at {}Hz",
        frames.len(),
        classifier.expected_samples(),
        classifier.sample_rate()
    );
    println!("frame  argmax  thresh  scores");
    for (idx, frame) in frames.iter().enumerate() {
        match classifier.classify(frame) {
            Ok(scores) => {
                let row = classifier
                    .labels()
                    .iter()
                    .zip(&scores)
                    .map(|(label, score)| format!("{} {:.3}", label, score))
                    .collect::<Vec<_>>()
                    .join("  ");
                println!(
                    "{:>5}  {:<6}  {:<6}  {}",
                    idx,
                    command_name(argmax.decide(&scores)),
                    command_name(threshold.decide(&scores)),
                    row
                );
            }
            Err(e) => println!("{:>5}  cycle skipped: {}", idx, e),
        }
    }
    Ok(())
}

fn command_name(command: Option<Command>) -> &'static str {
    match command {
        Some(Command::Start) => "start",
        Some(Command::Stop) => "stop",
        None => "-",
    }
}
