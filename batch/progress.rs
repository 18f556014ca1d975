use crate::batch::run::{SubjectOutcome, SubjectStatus};
use indicatif::{ProgressBar, ProgressStyle};

/// Observer for reporting progress while a batch of subjects is processed.
///
/// Subjects finish concurrently on worker threads, so callbacks take `&self`.
pub trait BatchProgressObserver: Sync {
    fn on_batch_start(&self, total_subjects: usize) {
        let _ = total_subjects;
    }
    fn on_subject_finished(&self, outcome: &SubjectOutcome) {
        let _ = outcome;
    }
    fn on_batch_finish(&self) {}
}

#[derive(Default)]
pub struct NoopBatchProgress;

impl BatchProgressObserver for NoopBatchProgress {}

/// Terminal progress bar over subjects.
pub struct ConsoleBatchProgress {
    bar: ProgressBar,
}

const PROGRESS_TEMPLATE: &str = "> Subjects [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}";

impl ConsoleBatchProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::hidden();
        if let Ok(style) = ProgressStyle::with_template(PROGRESS_TEMPLATE) {
            bar.set_style(style.progress_chars("█▉▊▋▌▍▎▏ "));
        }
        Self { bar }
    }
}

impl Default for ConsoleBatchProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchProgressObserver for ConsoleBatchProgress {
    fn on_batch_start(&self, total_subjects: usize) {
        self.bar.set_length(total_subjects as u64);
        self.bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    }

    fn on_subject_finished(&self, outcome: &SubjectOutcome) {
        if outcome.status == SubjectStatus::Failed {
            self.bar.println(format!(
                "> {} failed: {}",
                outcome.subject,
                outcome.detail.as_deref().unwrap_or("unknown error")
            ));
        }
        self.bar.set_message(outcome.subject.clone());
        self.bar.inc(1);
    }

    fn on_batch_finish(&self) {
        self.bar.finish_with_message("done");
    }
}
