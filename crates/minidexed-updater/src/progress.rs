// SPDX-License-Identifier: GPL-3.0-or-later

//! Terminal progress bars for downloads and uploads

use indicatif::{ProgressBar, ProgressStyle};

/// Whole percent of `done` out of `total`; an empty file is complete
pub fn percent_complete(done: u64, total: u64) -> u8 {
    done.min(total)
        .saturating_mul(100)
        .checked_div(total)
        .map_or(100, |percent| u8::try_from(percent).unwrap_or(100))
}

pub fn download_bar(name: &str, total: Option<u64>) -> ProgressBar {
    let bar = match total {
        Some(total) => {
            let bar = ProgressBar::new(total);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                    .expect("Invalid progress template")
                    .progress_chars("#>-"),
            );
            bar
        }
        None => {
            let bar = ProgressBar::new_spinner();
            bar.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} {msg} {bytes}")
                    .expect("Invalid spinner template"),
            );
            bar
        }
    };
    bar.set_message(format!("Downloading {name}"));
    bar
}

pub fn upload_bar(name: &str, total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("Uploading {msg}: {percent}% [{bar:40.green/white}] {bytes}/{total_bytes}")
            .expect("Invalid progress template")
            .progress_chars("#>-"),
    );
    bar.set_message(name.to_string());
    bar
}
