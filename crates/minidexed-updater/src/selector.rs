// SPDX-License-Identifier: GPL-3.0-or-later

//! Interactive selection of channel, device and performance update

use crate::channel::{ChannelMenu, ReleaseChannel, parse_pr_id};
use crate::discovery::DiscoveredDevice;
use crate::error::{Result, UpdaterError};
use std::io::{BufRead, Write};

/// Line-oriented operator interaction
pub trait Prompter {
    fn show(&mut self, line: &str);

    /// Returns `None` when input is closed
    fn ask(&mut self, prompt: &str) -> std::io::Result<Option<String>>;
}

/// Prompts on stdout, reads answers from stdin
#[derive(Debug, Default)]
pub struct StdioPrompter;

impl Prompter for StdioPrompter {
    fn show(&mut self, line: &str) {
        println!("{line}");
    }

    fn ask(&mut self, prompt: &str) -> std::io::Result<Option<String>> {
        let mut stdout = std::io::stdout();
        write!(stdout, "{prompt}")?;
        stdout.flush()?;

        let mut line = String::new();
        if std::io::stdin().lock().read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }
}

fn ask_required(prompter: &mut dyn Prompter, prompt: &str) -> Result<String> {
    prompter
        .ask(prompt)?
        .ok_or_else(|| UpdaterError::Usage("input closed before a selection was made".to_string()))
}

/// Ask for a channel until a valid number or pull request is entered
pub fn select_channel(menu: &ChannelMenu, prompter: &mut dyn Prompter) -> Result<ReleaseChannel> {
    prompter.show("Which release do you want to update?");
    for (idx, channel) in menu.options().iter().enumerate() {
        let label = match channel {
            ReleaseChannel::LocalBuild => "Local build (from src/)".to_string(),
            ReleaseChannel::LatestOfficial
            | ReleaseChannel::Continuous
            | ReleaseChannel::PullRequest(_) => channel.to_string(),
        };
        prompter.show(&format!("  [{}] {label}", idx + 1));
    }
    prompter.show("  [PR] Pull request build (enter PR number or URL)");

    let prompt = format!(
        "Enter the number of your choice (1-{}) or PR number: ",
        menu.options().len()
    );
    loop {
        let choice = ask_required(prompter, &prompt)?;
        if let Ok(number) = choice.parse::<usize>()
            && let Some(channel) = menu.by_number(number)
        {
            return Ok(channel);
        }
        // A bare number outside the menu is a pull request id
        if let Some(id) = parse_pr_id(&choice) {
            return Ok(ReleaseChannel::PullRequest(id));
        }
        prompter.show("Invalid selection. Please enter a valid number or PR number/URL.");
    }
}

/// Ask which of the discovered devices to deploy to
pub fn select_device(
    devices: &[DiscoveredDevice],
    prompter: &mut dyn Prompter,
) -> Result<DiscoveredDevice> {
    if devices.is_empty() {
        return Err(UpdaterError::NoDevices);
    }

    prompter.show("Devices found:");
    for (idx, device) in devices.iter().enumerate() {
        prompter.show(&format!("  [{}] {} ({})", idx + 1, device.name, device.address));
    }

    let prompt = format!(
        "Enter the number of the device to upload to (1-{}): ",
        devices.len()
    );
    loop {
        let choice = ask_required(prompter, &prompt)?;
        if let Ok(number) = choice.parse::<usize>()
            && (1..=devices.len()).contains(&number)
        {
            return Ok(devices[number - 1].clone());
        }
        prompter.show("Invalid selection. Please enter a valid number.");
    }
}

/// Performance replacement overwrites everything on the device, so it defaults to no
pub fn confirm_performance_update(prompter: &mut dyn Prompter) -> Result<bool> {
    let answer = prompter.ask(
        "Do you want to update the Performances? This will OVERWRITE all existing performances. [y/N]: ",
    )?;
    Ok(answer.is_some_and(|a| a.eq_ignore_ascii_case("y")))
}
