/// Slice-windowed audio classification.
///
/// The consumer half of the capture pipeline. Each filled slice from
/// [`CaptureBuffers`] is run through an opaque [`Classifier`]; per-label
/// scores are kept for the last `W` slices and every `W` slices one
/// boolean "acoustic event" decision is published to an [`AcousticSignal`].
/// Between decisions the previous value stays visible to the report
/// assembler.
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use heapless::Deque;

use crate::capture::{CaptureBuffers, CaptureError};
use crate::config::PipelineConfig;

/// Maximum number of labels a model may report.
pub const MAX_LABELS: usize = 4;

/// Maximum slices per model window.
pub const MAX_WINDOW_SLICES: usize = 8;

/// Per-label confidence for one slice, indexed like [`Classifier::labels`].
pub type Scores = heapless::Vec<f32, MAX_LABELS>;

/// Failure of a single classifier invocation. Never fatal: the slice is
/// dropped and the previous decision stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ClassifyError {
    #[error("classifier failed with code {0}")]
    Invoke(i32),
    #[error("classifier returned {got} scores for {expected} labels")]
    LabelCount { got: usize, expected: usize },
}

/// The trained model, treated as a black box: one slice of samples in,
/// one confidence per label out.
pub trait Classifier {
    /// Label names. Length must not exceed [`MAX_LABELS`].
    fn labels(&self) -> &[&'static str];

    /// Classify one slice. `scores` arrives empty.
    fn classify(&mut self, slice: &[f32], scores: &mut Scores) -> Result<(), ClassifyError>;
}

/// Shared "acoustic event detected" flag, written by the pipeline and read
/// by the report assembler.
#[derive(Debug, Default)]
pub struct AcousticSignal(AtomicBool);

impl AcousticSignal {
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, detected: bool) {
        self.0.store(detected, Ordering::Release);
    }
}

/// Rolling scores of the last `W` slices with an emit every `W` slices.
pub struct SliceWindow {
    slices: Deque<Scores, MAX_WINDOW_SLICES>,
    window: usize,
    since_emit: usize,
    event_label: usize,
    threshold: f32,
}

impl SliceWindow {
    /// `window` is clamped to `1..=MAX_WINDOW_SLICES`.
    pub fn new(window: usize, event_label: usize, threshold: f32) -> Self {
        Self {
            slices: Deque::new(),
            window: window.clamp(1, MAX_WINDOW_SLICES),
            since_emit: 0,
            event_label,
            threshold,
        }
    }

    /// Add one slice. Returns a decision on every `W`-th slice.
    pub fn push(&mut self, scores: Scores) -> Option<bool> {
        if self.slices.len() >= self.window {
            self.slices.pop_front();
        }
        let _ = self.slices.push_back(scores);

        self.since_emit += 1;
        if self.since_emit < self.window {
            return None;
        }
        self.since_emit = 0;
        Some(self.decide())
    }

    /// Mean score per label over the retained slices.
    pub fn averages(&self) -> Scores {
        let mut avg = Scores::new();
        let n = self.slices.len();
        if n == 0 {
            return avg;
        }
        for scores in self.slices.iter() {
            for (i, &s) in scores.iter().enumerate() {
                if i >= avg.len() {
                    let _ = avg.push(0.0);
                }
                avg[i] += s;
            }
        }
        for v in avg.iter_mut() {
            *v /= n as f32;
        }
        avg
    }

    /// Dominant label must be the event label and its mean confidence
    /// must exceed the threshold.
    fn decide(&self) -> bool {
        let avg = self.averages();
        let dominant = avg
            .iter()
            .enumerate()
            .fold(None::<(usize, f32)>, |best, (i, &v)| match best {
                Some((_, b)) if b >= v => best,
                _ => Some((i, v)),
            });
        match dominant {
            Some((label, confidence)) => label == self.event_label && confidence > self.threshold,
            None => false,
        }
    }
}

/// Outcome of one consumer step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    /// No slice was ready
    Idle,
    /// Slice classified, window not complete yet
    Accumulated,
    /// Window complete; the new decision was published
    Emitted(bool),
    /// Classifier failed; previous decision kept
    Skipped(ClassifyError),
}

/// Consumer loop state: classifier, rolling window and conversion scratch.
pub struct ClassifierPipeline<C> {
    classifier: C,
    window: SliceWindow,
    scratch: Vec<f32>,
    seen_overruns: u32,
    slices: u32,
}

impl<C: Classifier> ClassifierPipeline<C> {
    /// Allocation failure here is fatal: the caller must not start capture.
    pub fn new(config: &PipelineConfig, classifier: C) -> Result<Self, CaptureError> {
        if config.slice_len == 0 {
            return Err(CaptureError::EmptySlice);
        }
        let mut scratch = Vec::new();
        scratch
            .try_reserve_exact(config.slice_len)
            .map_err(|_| CaptureError::Allocation {
                samples: config.slice_len,
            })?;
        scratch.resize(config.slice_len, 0.0);

        log::info!(
            "Classifier pipeline: {} samples/slice, {} slices/window, event label '{}'",
            config.slice_len,
            config.window_slices,
            classifier
                .labels()
                .get(config.event_label)
                .copied()
                .unwrap_or("?"),
        );

        Ok(Self {
            classifier,
            window: SliceWindow::new(config.window_slices, config.event_label, config.threshold),
            scratch,
            seen_overruns: 0,
            slices: 0,
        })
    }

    /// Slices classified since start.
    pub fn slices_classified(&self) -> u32 {
        self.slices
    }

    /// Non-blocking step: consume one ready slice if there is one.
    pub fn poll(&mut self, capture: &CaptureBuffers, signal: &AcousticSignal) -> Step {
        self.report_overruns(capture);

        if !capture.take_slice(&mut self.scratch) {
            return Step::Idle;
        }

        let mut scores = Scores::new();
        if let Err(e) = self.classify(&mut scores) {
            log::warn!("Classification failed: {}", e);
            return Step::Skipped(e);
        }
        self.slices = self.slices.wrapping_add(1);

        match self.window.push(scores) {
            Some(detected) => {
                if detected != signal.get() {
                    log::info!("Acoustic event {}", if detected { "detected" } else { "cleared" });
                }
                signal.set(detected);
                Step::Emitted(detected)
            }
            None => Step::Accumulated,
        }
    }

    /// Busy-wait for the next slice, calling `idle` between polls, then
    /// process it. Capture keeps delivering samples meanwhile.
    pub fn wait_step(
        &mut self,
        capture: &CaptureBuffers,
        signal: &AcousticSignal,
        mut idle: impl FnMut(),
    ) -> Step {
        while !capture.is_ready() {
            idle();
        }
        self.poll(capture, signal)
    }

    fn classify(&mut self, scores: &mut Scores) -> Result<(), ClassifyError> {
        self.classifier.classify(&self.scratch, scores)?;
        let expected = self.classifier.labels().len();
        if scores.len() != expected {
            return Err(ClassifyError::LabelCount {
                got: scores.len(),
                expected,
            });
        }
        Ok(())
    }

    /// Log overruns since the last call. Returns how many were new.
    fn report_overruns(&mut self, capture: &CaptureBuffers) -> u32 {
        let total = capture.overrun_count();
        let new = total.wrapping_sub(self.seen_overruns);
        if new != 0 {
            log::warn!(
                "Audio buffer overrun ({} new, {} total): slices per window too high for this consumer",
                new,
                total
            );
            self.seen_overruns = total;
        }
        new
    }
}

/// Loudness-based stand-in model: scores a slice as `peak` in proportion
/// to its RMS level relative to `reference_rms`.
pub struct PeakClassifier {
    reference_rms: f32,
}

impl PeakClassifier {
    pub const LABELS: [&'static str; 2] = ["background", "peak"];

    pub const fn new(reference_rms: f32) -> Self {
        Self { reference_rms }
    }
}

impl Classifier for PeakClassifier {
    fn labels(&self) -> &[&'static str] {
        &Self::LABELS
    }

    fn classify(&mut self, slice: &[f32], scores: &mut Scores) -> Result<(), ClassifyError> {
        if slice.is_empty() || self.reference_rms <= 0.0 {
            return Err(ClassifyError::Invoke(-1));
        }
        let mean_sq = slice.iter().map(|s| s * s).sum::<f32>() / slice.len() as f32;
        let peak = (libm::sqrtf(mean_sq) / self.reference_rms).clamp(0.0, 1.0);
        let _ = scores.push(1.0 - peak);
        let _ = scores.push(peak);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(event: f32) -> Scores {
        let mut s = Scores::new();
        s.push(1.0 - event).unwrap();
        s.push(event).unwrap();
        s
    }

    /// Replays a fixed script of per-slice results.
    struct Scripted {
        script: std::vec::Vec<Result<f32, ClassifyError>>,
        at: usize,
    }

    impl Scripted {
        fn new(script: std::vec::Vec<Result<f32, ClassifyError>>) -> Self {
            Self { script, at: 0 }
        }
    }

    impl Classifier for Scripted {
        fn labels(&self) -> &[&'static str] {
            &["noise", "break_in"]
        }

        fn classify(&mut self, _slice: &[f32], out: &mut Scores) -> Result<(), ClassifyError> {
            let next = self.script[self.at % self.script.len()];
            self.at += 1;
            let event = next?;
            *out = scores(event);
            Ok(())
        }
    }

    fn config(slice_len: usize) -> PipelineConfig {
        PipelineConfig {
            slice_len,
            window_slices: 4,
            event_label: 1,
            threshold: 0.6,
        }
    }

    // ── SliceWindow ────────────────────────────────────────────────

    #[test]
    fn window_emits_only_every_w_slices() {
        let mut w = SliceWindow::new(4, 1, 0.6);
        assert_eq!(w.push(scores(0.9)), None);
        assert_eq!(w.push(scores(0.9)), None);
        assert_eq!(w.push(scores(0.9)), None);
        assert_eq!(w.push(scores(0.9)), Some(true));
        assert_eq!(w.push(scores(0.1)), None);
    }

    #[test]
    fn window_averages_last_w_slices() {
        let mut w = SliceWindow::new(2, 1, 0.6);
        w.push(scores(0.0));
        w.push(scores(0.0));
        w.push(scores(1.0));
        let avg = w.averages();
        assert!((avg[1] - 0.5).abs() < 1e-6);
        // (1.0 + 0.8) / 2 = 0.9 → true
        assert_eq!(w.push(scores(0.8)), Some(true));
    }

    #[test]
    fn dominant_non_event_label_is_false() {
        let mut w = SliceWindow::new(1, 1, 0.3);
        assert_eq!(w.push(scores(0.4)), Some(false));
    }

    #[test]
    fn dominant_event_below_threshold_is_false() {
        let mut w = SliceWindow::new(1, 1, 0.8);
        assert_eq!(w.push(scores(0.7)), Some(false));
    }

    #[test]
    fn window_size_is_clamped() {
        let mut w = SliceWindow::new(0, 1, 0.5);
        assert_eq!(w.push(scores(0.9)), Some(true));
        let w = SliceWindow::new(100, 1, 0.5);
        assert_eq!(w.window, MAX_WINDOW_SLICES);
    }

    // ── Pipeline ───────────────────────────────────────────────────

    #[test]
    fn decision_published_after_fourth_slice() {
        let capture = CaptureBuffers::new(4).unwrap();
        let signal = AcousticSignal::new();
        let mut pipeline =
            ClassifierPipeline::new(&config(4), Scripted::new(vec![Ok(0.95)])).unwrap();

        for slice in 1..=3 {
            capture.push_samples(&[1, 2, 3, 4]);
            assert_eq!(pipeline.poll(&capture, &signal), Step::Accumulated, "slice {slice}");
            assert!(!signal.get());
        }
        capture.push_samples(&[1, 2, 3, 4]);
        assert_eq!(pipeline.poll(&capture, &signal), Step::Emitted(true));
        assert!(signal.get());

        // fifth slice starts a new window; value persists
        capture.push_samples(&[1, 2, 3, 4]);
        assert_eq!(pipeline.poll(&capture, &signal), Step::Accumulated);
        assert!(signal.get());
    }

    #[test]
    fn idle_when_nothing_ready() {
        let capture = CaptureBuffers::new(4).unwrap();
        let signal = AcousticSignal::new();
        let mut pipeline =
            ClassifierPipeline::new(&config(4), Scripted::new(vec![Ok(0.0)])).unwrap();
        capture.push_samples(&[1, 2]);
        assert_eq!(pipeline.poll(&capture, &signal), Step::Idle);
        assert_eq!(pipeline.slices_classified(), 0);
    }

    #[test]
    fn classifier_failure_keeps_previous_value() {
        let capture = CaptureBuffers::new(2).unwrap();
        let signal = AcousticSignal::new();
        signal.set(true);
        let mut pipeline = ClassifierPipeline::new(
            &config(2),
            Scripted::new(vec![Err(ClassifyError::Invoke(3))]),
        )
        .unwrap();

        capture.push_samples(&[0, 0]);
        assert_eq!(
            pipeline.poll(&capture, &signal),
            Step::Skipped(ClassifyError::Invoke(3))
        );
        assert!(signal.get());
    }

    #[test]
    fn wrong_label_count_is_skipped() {
        struct OneScore;
        impl Classifier for OneScore {
            fn labels(&self) -> &[&'static str] {
                &["a", "b"]
            }
            fn classify(&mut self, _: &[f32], out: &mut Scores) -> Result<(), ClassifyError> {
                out.push(1.0).unwrap();
                Ok(())
            }
        }

        let capture = CaptureBuffers::new(2).unwrap();
        let signal = AcousticSignal::new();
        let mut pipeline = ClassifierPipeline::new(&config(2), OneScore).unwrap();
        capture.push_samples(&[0, 0]);
        assert_eq!(
            pipeline.poll(&capture, &signal),
            Step::Skipped(ClassifyError::LabelCount { got: 1, expected: 2 })
        );
    }

    #[test]
    fn overruns_reported_once_by_consumer() {
        let capture = CaptureBuffers::new(2).unwrap();
        let signal = AcousticSignal::new();
        let mut pipeline =
            ClassifierPipeline::new(&config(2), Scripted::new(vec![Ok(0.1)])).unwrap();

        // three fills with no reader in between: two overruns
        capture.push_samples(&[1, 2, 3, 4, 5, 6]);
        assert_eq!(capture.overrun_count(), 2);

        assert_eq!(pipeline.poll(&capture, &signal), Step::Accumulated);
        assert_eq!(pipeline.seen_overruns, 2);

        // nothing new: next poll is idle and stays quiet
        assert_eq!(pipeline.poll(&capture, &signal), Step::Idle);
        assert_eq!(pipeline.seen_overruns, 2);
        assert_eq!(pipeline.report_overruns(&capture), 0);

        // a later overrun is reported as one new
        capture.push_samples(&[7, 8, 9, 10]);
        assert_eq!(pipeline.report_overruns(&capture), 1);
        assert_eq!(pipeline.seen_overruns, 3);
    }

    #[test]
    fn zero_slice_pipeline_refuses_to_start() {
        let result = ClassifierPipeline::new(&config(0), PeakClassifier::new(1000.0));
        assert!(matches!(result, Err(CaptureError::EmptySlice)));
    }

    #[test]
    fn wait_step_polls_until_ready() {
        let capture = CaptureBuffers::new(2).unwrap();
        let signal = AcousticSignal::new();
        let mut pipeline =
            ClassifierPipeline::new(&config(2), Scripted::new(vec![Ok(0.9)])).unwrap();

        let mut spins = 0;
        let step = pipeline.wait_step(&capture, &signal, || {
            spins += 1;
            capture.push_samples(&[5]);
        });
        assert_eq!(step, Step::Accumulated);
        assert_eq!(spins, 2);
    }

    // ── PeakClassifier ─────────────────────────────────────────────

    #[test]
    fn peak_classifier_scores_loudness() {
        let mut model = PeakClassifier::new(1000.0);
        let mut out = Scores::new();
        model.classify(&[1000.0, -1000.0, 1000.0, -1000.0], &mut out).unwrap();
        assert!((out[1] - 1.0).abs() < 1e-3);

        let mut out = Scores::new();
        model.classify(&[250.0, -250.0], &mut out).unwrap();
        assert!((out[1] - 0.25).abs() < 1e-3);
        assert!((out[0] - 0.75).abs() < 1e-3);
    }

    #[test]
    fn peak_classifier_rejects_empty_slice() {
        let mut model = PeakClassifier::new(1000.0);
        let mut out = Scores::new();
        assert_eq!(model.classify(&[], &mut out), Err(ClassifyError::Invoke(-1)));
    }
}
