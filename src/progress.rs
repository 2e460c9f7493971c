use indicatif::{ProgressBar, ProgressStyle};

/// Create a progress bar for batch classification
pub fn create_batch_progress_bar(total: u64, message: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-");
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb
}

/// Create a spinner for parse and export
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb
}

/// Move the bar to `processed` of `total`; the total can be known only once a run starts
pub fn update(pb: &ProgressBar, processed: usize, total: usize) {
    pb.set_length(total as u64);
    pb.set_position(processed as u64);
}

/// Finish progress bar with success message
pub fn finish_with_success(pb: &ProgressBar, message: &str) {
    pb.finish_with_message(format!("✅ {}", message));
}

/// Finish progress bar with a warning, e.g. after an interruption
pub fn finish_with_warning(pb: &ProgressBar, message: &str) {
    pb.abandon_with_message(format!("⚠️  {}", message));
}
