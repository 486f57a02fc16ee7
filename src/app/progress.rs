//! Progress bar fed by the coordinator's progress observer.

use harvester_core::Progress;
use harvester_core::coordinator::ProgressObserver;
use indicatif::{ProgressBar, ProgressStyle};

const TEMPLATE: &str = "{spinner} [{elapsed_precise}] {bar:30} {pos}/{len} {msg}";

/// Builds the bar, or a hidden one when output is not interactive.
pub(crate) fn create_progress_bar(enabled: bool) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template(TEMPLATE).unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar
}

/// Observer that mirrors store progress onto `bar`.
pub(crate) fn observer(bar: ProgressBar) -> ProgressObserver {
    Box::new(move |progress: &Progress| render(&bar, progress))
}

fn render(bar: &ProgressBar, progress: &Progress) {
    bar.set_length(progress.total);
    bar.set_position(progress.finished());
    bar.set_message(progress_message(progress));
    bar.tick();
}

pub(crate) fn progress_message(progress: &Progress) -> String {
    if progress.failed == 0 {
        format!("{} downloading", progress.in_progress)
    } else {
        format!(
            "{} downloading, {} failed",
            progress.in_progress, progress.failed
        )
    }
}
