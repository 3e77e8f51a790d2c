use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

const DOWNLOAD_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}";

/// Builds the progress bar shown while a download pool is running.
///
/// Falls back to the default bar style if the template fails to parse.
pub(crate) fn download_bar(len: u64) -> ProgressBar {
    let style = ProgressStyle::default_bar()
        .template(DOWNLOAD_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-");

    let bar = ProgressBar::new(len);
    bar.set_style(style);
    bar.set_draw_target(ProgressDrawTarget::stderr_with_hz(5));
    bar.enable_steady_tick(Duration::from_millis(200));
    bar
}
