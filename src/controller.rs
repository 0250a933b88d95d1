//! Listening sessions: audio frames in, timer transitions out.
//!
//! [`Listener`] wires a classifier, a decision policy, and a timer together.
//! Each [`SessionHandle`] owns one continuous loop that pulls a frame,
//! scores it, applies at most one command, and only then pulls the next
//! frame. Classification runs on the blocking pool so the loop (and the
//! ticker sharing the runtime) never stalls behind the model.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::audio::AudioFrame;
use crate::classifier::Classifier;
use crate::error::Result;
use crate::policy::{Command, CommandPolicy, PolicyConfig};
use crate::timer::TimerHandle;

/// Counters for one listening session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Frames pulled from the capture side.
    pub frames: u64,
    /// Frames scored successfully.
    pub classified: u64,
    /// Cycles skipped on a recoverable error.
    pub skipped: u64,
    /// Commands applied to the timer.
    pub commands: u64,
}

struct SessionShared {
    active: AtomicBool,
    last_predictions: Mutex<Option<Vec<f32>>>,
    stats: Mutex<SessionStats>,
}

/// Wires classifier, decision policy, and timer into listening sessions.
///
/// Construction resolves the policy against the model's labels, so a model
/// that cannot express start and stop is rejected before any session exists.
pub struct Listener {
    classifier: Arc<dyn Classifier>,
    policy: CommandPolicy,
    timer: TimerHandle,
}

impl Listener {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        policy: &PolicyConfig,
        timer: TimerHandle,
    ) -> Result<Self> {
        let policy = CommandPolicy::resolve(policy, classifier.labels())?;
        info!(
            backend = classifier.name(),
            labels = ?classifier.labels(),
            "listener ready"
        );
        Ok(Self {
            classifier,
            policy,
            timer,
        })
    }

    pub fn classifier(&self) -> &Arc<dyn Classifier> {
        &self.classifier
    }

    pub fn timer(&self) -> &TimerHandle {
        &self.timer
    }

    /// Start a listening session over a frame stream.
    ///
    /// The session pulls one frame at a time and never reads the next while
    /// a classification is in flight, so the command from frame N reaches
    /// the timer before frame N+1 is looked at.
    pub fn listen(&self, frames: mpsc::Receiver<AudioFrame>) -> SessionHandle {
        let shared = Arc::new(SessionShared {
            active: AtomicBool::new(true),
            last_predictions: Mutex::new(None),
            stats: Mutex::new(SessionStats::default()),
        });
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run_session(
            Arc::clone(&self.classifier),
            self.policy.clone(),
            self.timer.clone(),
            frames,
            stop_rx,
            Arc::clone(&shared),
        ));
        SessionHandle {
            shared,
            labels: self.classifier.labels().to_vec(),
            stop_tx,
            task,
        }
    }
}

/// Handle to a running listening session.
pub struct SessionHandle {
    shared: Arc<SessionShared>,
    labels: Vec<String>,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<SessionStats>,
}

impl SessionHandle {
    /// False once the loop has exited for any reason.
    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Most recent score vector, if any cycle has completed.
    pub fn last_predictions(&self) -> Option<Vec<f32>> {
        self.shared.last_predictions.lock().clone()
    }

    /// Most recent scores paired with their labels, for rendering.
    pub fn labelled_predictions(&self) -> Option<Vec<(String, f32)>> {
        let scores = self.shared.last_predictions.lock().clone()?;
        Some(self.labels.iter().cloned().zip(scores).collect())
    }

    /// Counters so far.
    pub fn stats(&self) -> SessionStats {
        *self.shared.stats.lock()
    }

    /// Signal stop without waiting, e.g. from a UI callback.
    pub fn request_stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Signal stop and wait for the loop to exit. Any in-flight
    /// classification finishes on the blocking pool and is discarded.
    pub async fn stop(self) -> SessionStats {
        let SessionHandle {
            shared,
            stop_tx,
            task,
            ..
        } = self;
        let _ = stop_tx.send(true);
        match task.await {
            Ok(stats) => stats,
            Err(e) => {
                warn!("session task failed: {}", e);
                let stats = *shared.stats.lock();
                stats
            }
        }
    }

    /// Wait for the session to end on its own (frame source closed).
    pub async fn join(self) -> SessionStats {
        match self.task.await {
            Ok(stats) => stats,
            Err(e) => {
                warn!("session task failed: {}", e);
                *self.shared.stats.lock()
            }
        }
    }
}

async fn run_session(
    classifier: Arc<dyn Classifier>,
    policy: CommandPolicy,
    timer: TimerHandle,
    mut frames: mpsc::Receiver<AudioFrame>,
    mut stop_rx: watch::Receiver<bool>,
    shared: Arc<SessionShared>,
) -> SessionStats {
    info!("listening session started");
    loop {
        // Stop wins over queued frames.
        let frame = tokio::select! {
            biased;
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    debug!("stop signal received");
                    break;
                }
                continue;
            }
            frame = frames.recv() => match frame {
                Some(frame) => frame,
                None => {
                    debug!("frame source closed");
                    break;
                }
            },
        };

        shared.stats.lock().frames += 1;

        // At most one classification in flight: await this one before the
        // channel is touched again.
        let worker = {
            let classifier = Arc::clone(&classifier);
            tokio::task::spawn_blocking(move || classifier.classify(&frame))
        };
        let scores = tokio::select! {
            biased;
            _ = wait_for_stop(&mut stop_rx) => {
                debug!("stop during classification, result discarded");
                break;
            }
            outcome = worker => match outcome {
                Ok(Ok(scores)) => scores,
                Ok(Err(e)) => {
                    // Recoverable: skip this cycle, keep the session.
                    warn!("classification cycle skipped: {}", e);
                    shared.stats.lock().skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!("classification task failed, cycle skipped: {}", e);
                    shared.stats.lock().skipped += 1;
                    continue;
                }
            },
        };

        *shared.last_predictions.lock() = Some(scores.clone());
        shared.stats.lock().classified += 1;

        match policy.decide(&scores) {
            Some(Command::Start) => {
                debug!("command: start");
                timer.start();
                shared.stats.lock().commands += 1;
            }
            Some(Command::Stop) => {
                debug!("command: stop");
                timer.stop();
                shared.stats.lock().commands += 1;
            }
            None => {}
        }
    }

    shared.active.store(false, Ordering::SeqCst);
    let stats = *shared.stats.lock();
    info!(
        frames = stats.frames,
        classified = stats.classified,
        skipped = stats.skipped,
        commands = stats.commands,
        "listening session ended"
    );
    stats
}

async fn wait_for_stop(stop_rx: &mut watch::Receiver<bool>) {
    loop {
        if *stop_rx.borrow() {
            return;
        }
        if stop_rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::timer::TimerPhase;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Backend that replays a fixed list of outcomes, then background noise.
    struct ScriptedClassifier {
        labels: Vec<String>,
        script: Mutex<VecDeque<Result<Vec<f32>>>>,
    }

    impl ScriptedClassifier {
        fn new(script: Vec<Result<Vec<f32>>>) -> Arc<Self> {
            Arc::new(Self {
                labels: vec!["start".into(), "stop".into(), "background".into()],
                script: Mutex::new(script.into()),
            })
        }
    }

    impl Classifier for ScriptedClassifier {
        fn name(&self) -> &str {
            "scripted"
        }
        fn labels(&self) -> &[String] {
            &self.labels
        }
        fn sample_rate(&self) -> u32 {
            16_000
        }
        fn expected_samples(&self) -> usize {
            4
        }
        fn classify(&self, _frame: &[f32]) -> Result<Vec<f32>> {
            self.script
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(noise()))
        }
    }

    fn start_scores() -> Vec<f32> {
        vec![0.9, 0.05, 0.05]
    }
    fn stop_scores() -> Vec<f32> {
        vec![0.05, 0.9, 0.05]
    }
    fn noise() -> Vec<f32> {
        vec![0.1, 0.1, 0.8]
    }
    fn frame() -> AudioFrame {
        vec![0.0; 4]
    }

    #[tokio::test]
    async fn commands_drive_the_timer() {
        let classifier =
            ScriptedClassifier::new(vec![Ok(start_scores()), Ok(noise()), Ok(stop_scores())]);
        let timer = TimerHandle::new(90);
        let listener = Listener::new(classifier, &PolicyConfig::default(), timer.clone()).unwrap();

        let (tx, rx) = mpsc::channel(8);
        let session = listener.listen(rx);
        for _ in 0..3 {
            tx.send(frame()).await.unwrap();
        }
        drop(tx);
        let stats = session.join().await;

        assert_eq!(stats.frames, 3);
        assert_eq!(stats.classified, 3);
        assert_eq!(stats.skipped, 0);
        assert_eq!(stats.commands, 2);
        // Started then stopped with no ticker running: idle at full duration.
        let snapshot = timer.snapshot();
        assert_eq!(snapshot.phase, TimerPhase::Idle);
        assert_eq!(snapshot.remaining_secs, 90);
    }

    #[tokio::test]
    async fn command_applies_before_next_frame_is_read() {
        /// Records the timer phase seen at the start of every classify call.
        struct PhaseRecorder {
            labels: Vec<String>,
            script: Mutex<VecDeque<Vec<f32>>>,
            timer: TimerHandle,
            seen: Mutex<Vec<TimerPhase>>,
        }

        impl Classifier for PhaseRecorder {
            fn name(&self) -> &str {
                "recorder"
            }
            fn labels(&self) -> &[String] {
                &self.labels
            }
            fn sample_rate(&self) -> u32 {
                16_000
            }
            fn expected_samples(&self) -> usize {
                4
            }
            fn classify(&self, _frame: &[f32]) -> Result<Vec<f32>> {
                self.seen.lock().push(self.timer.snapshot().phase);
                Ok(self.script.lock().pop_front().unwrap_or_else(noise))
            }
        }

        let timer = TimerHandle::new(30);
        let recorder = Arc::new(PhaseRecorder {
            labels: vec!["start".into(), "stop".into(), "background".into()],
            script: Mutex::new(
                vec![start_scores(), stop_scores(), noise()]
                    .into_iter()
                    .collect(),
            ),
            timer: timer.clone(),
            seen: Mutex::new(Vec::new()),
        });
        let listener =
            Listener::new(recorder.clone(), &PolicyConfig::default(), timer.clone()).unwrap();

        let (tx, rx) = mpsc::channel(8);
        let session = listener.listen(rx);
        for _ in 0..3 {
            tx.send(frame()).await.unwrap();
        }
        drop(tx);
        session.join().await;

        // Frame 2 must observe the start from frame 1 already applied, and
        // frame 3 the stop from frame 2.
        assert_eq!(
            *recorder.seen.lock(),
            vec![TimerPhase::Idle, TimerPhase::Running, TimerPhase::Idle]
        );
    }

    #[tokio::test]
    async fn classification_error_midway_skips_one_cycle() {
        // Five frames, backend fails on the third.
        let classifier = ScriptedClassifier::new(vec![
            Ok(start_scores()),
            Ok(stop_scores()),
            Err(AppError::Classification("backend hiccup".into())),
            Ok(start_scores()),
            Ok(stop_scores()),
        ]);
        let timer = TimerHandle::new(45);
        let listener = Listener::new(classifier, &PolicyConfig::default(), timer.clone()).unwrap();

        let (tx, rx) = mpsc::channel(8);
        let session = listener.listen(rx);

        for _ in 0..3 {
            tx.send(frame()).await.unwrap();
        }
        // The failed cycle is logged and skipped; the session keeps going.
        while session.stats().skipped < 1 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert!(session.is_active());

        for _ in 0..2 {
            tx.send(frame()).await.unwrap();
        }
        drop(tx);
        let stats = session.join().await;

        assert_eq!(stats.frames, 5);
        assert_eq!(stats.classified, 4);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.commands, 4);
        assert_eq!(timer.snapshot().phase, TimerPhase::Idle);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn classifications_never_overlap() {
        /// Counts classify calls running at once and remembers the peak.
        struct ConcurrencyGauge {
            labels: Vec<String>,
            script: Mutex<VecDeque<Result<Vec<f32>>>>,
            in_flight: AtomicUsize,
            peak: AtomicUsize,
        }

        impl Classifier for ConcurrencyGauge {
            fn name(&self) -> &str {
                "gauge"
            }
            fn labels(&self) -> &[String] {
                &self.labels
            }
            fn sample_rate(&self) -> u32 {
                16_000
            }
            fn expected_samples(&self) -> usize {
                4
            }
            fn classify(&self, _frame: &[f32]) -> Result<Vec<f32>> {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                // Long enough for queued frames to pile up behind this call.
                std::thread::sleep(Duration::from_millis(2));
                let outcome = self
                    .script
                    .lock()
                    .pop_front()
                    .unwrap_or_else(|| Ok(noise()));
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                outcome
            }
        }

        let gauge = Arc::new(ConcurrencyGauge {
            labels: vec!["start".into(), "stop".into(), "background".into()],
            script: Mutex::new(
                vec![
                    Ok(start_scores()),
                    Ok(stop_scores()),
                    Err(AppError::Classification("backend hiccup".into())),
                    Ok(start_scores()),
                    Ok(stop_scores()),
                ]
                .into(),
            ),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let timer = TimerHandle::new(60);
        let listener =
            Listener::new(gauge.clone(), &PolicyConfig::default(), timer.clone()).unwrap();

        let (tx, rx) = mpsc::channel(8);
        let session = listener.listen(rx);
        for _ in 0..5 {
            tx.send(frame()).await.unwrap();
        }
        drop(tx);
        let stats = session.join().await;

        // Even with idle workers and a backlog, scoring stays serial.
        assert_eq!(gauge.peak.load(Ordering::SeqCst), 1);
        assert_eq!(stats.frames, 5);
        assert_eq!(stats.classified, 4);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.commands, 4);
        assert_eq!(timer.snapshot().phase, TimerPhase::Idle);
    }

    #[tokio::test]
    async fn short_frame_skips_without_ending_the_session() {
        let classifier = ScriptedClassifier::new(vec![
            Err(AppError::InputShape {
                expected: 4,
                got: 2,
            }),
            Ok(start_scores()),
        ]);
        let timer = TimerHandle::new(30);
        let listener = Listener::new(classifier, &PolicyConfig::default(), timer.clone()).unwrap();

        let (tx, rx) = mpsc::channel(4);
        let session = listener.listen(rx);
        tx.send(frame()).await.unwrap();
        tx.send(frame()).await.unwrap();
        drop(tx);
        let stats = session.join().await;

        assert_eq!(stats.frames, 2);
        assert_eq!(stats.classified, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.commands, 1);
        assert_eq!(timer.snapshot().phase, TimerPhase::Running);
    }

    #[tokio::test]
    async fn unusable_label_set_is_rejected_up_front() {
        let classifier = Arc::new(ScriptedClassifier {
            labels: vec!["start".into(), "go".into()],
            script: Mutex::new(VecDeque::new()),
        });
        let err = Listener::new(classifier, &PolicyConfig::default(), TimerHandle::new(60))
            .err()
            .unwrap();
        assert!(matches!(err, AppError::Configuration(_)));
        assert!(err.is_session_fatal());
    }

    #[tokio::test]
    async fn stop_ends_the_session_before_queued_frames() {
        let classifier = ScriptedClassifier::new(vec![]);
        let listener =
            Listener::new(classifier, &PolicyConfig::default(), TimerHandle::new(60)).unwrap();

        let (tx, rx) = mpsc::channel(8);
        let session = listener.listen(rx);
        session.request_stop();
        let stats = session.stop().await;

        assert_eq!(stats.frames, 0);
        // Sender outlives the session; frames now go nowhere.
        drop(tx);
    }

    #[tokio::test]
    async fn predictions_are_published_even_for_noise() {
        let classifier = ScriptedClassifier::new(vec![Ok(noise())]);
        let listener =
            Listener::new(classifier, &PolicyConfig::default(), TimerHandle::new(60)).unwrap();

        let (tx, rx) = mpsc::channel(8);
        let session = listener.listen(rx);
        assert_eq!(session.last_predictions(), None);

        tx.send(frame()).await.unwrap();
        while session.stats().classified < 1 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        assert_eq!(session.last_predictions(), Some(noise()));
        let labelled = session.labelled_predictions().unwrap();
        assert_eq!(labelled[0], ("start".to_string(), 0.1));
        assert_eq!(labelled[2], ("background".to_string(), 0.8));

        drop(tx);
        let stats = session.join().await;
        assert_eq!(stats.commands, 0);
    }

    #[tokio::test]
    async fn argmax_policy_fires_on_low_confidence() {
        let classifier = ScriptedClassifier::new(vec![Ok(vec![0.4, 0.3, 0.3])]);
        let timer = TimerHandle::new(60);
        let listener =
            Listener::new(classifier, &PolicyConfig::argmax(), timer.clone()).unwrap();

        let (tx, rx) = mpsc::channel(8);
        let session = listener.listen(rx);
        tx.send(frame()).await.unwrap();
        drop(tx);
        let stats = session.join().await;

        assert_eq!(stats.commands, 1);
        assert_eq!(timer.snapshot().phase, TimerPhase::Running);
    }
}
