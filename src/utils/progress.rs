use indicatif::{ProgressBar, ProgressStyle};

/// Progress bar for long event-writing loops.
pub fn event_progress_bar(total: u64, message: &'static str) -> ProgressBar {
    ProgressBar::new(total).with_message(message).with_style(
        ProgressStyle::with_template(
            "[{elapsed_precise}] {msg} {percent}%|{wide_bar}| {pos}/{len} ({eta})",
        )
        .unwrap(),
    )
}
