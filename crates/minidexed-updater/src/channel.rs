// SPDX-License-Identifier: GPL-3.0-or-later

//! Release channels and how they are chosen from flags

use crate::error::{Result, UpdaterError};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

static PR_INPUT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:#?(\d+)|https?://github\.com/[^/\s]+/[^/\s]+/pull/(\d+)/?)$")
        .expect("static regex")
});

/// Where the firmware to deploy comes from. Exactly one is active per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseChannel {
    LatestOfficial,
    Continuous,
    PullRequest(u64),
    LocalBuild,
}

impl fmt::Display for ReleaseChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LatestOfficial => write!(f, "Latest official release"),
            Self::Continuous => write!(f, "Continuous (experimental) build"),
            Self::PullRequest(id) => write!(f, "Pull request #{id} build"),
            Self::LocalBuild => write!(f, "Local build"),
        }
    }
}

/// Parse a pull request given as `1234`, `#1234` or a full pull request URL
pub fn parse_pr_id(input: &str) -> Option<u64> {
    let caps = PR_INPUT.captures(input.trim())?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .and_then(|m| m.as_str().parse().ok())
}

/// The numbered channel options offered to the operator
#[derive(Debug, Clone)]
pub struct ChannelMenu {
    options: Vec<ReleaseChannel>,
}

impl ChannelMenu {
    pub fn new(has_local_build: bool) -> Self {
        let mut options = vec![ReleaseChannel::LatestOfficial, ReleaseChannel::Continuous];
        if has_local_build {
            options.push(ReleaseChannel::LocalBuild);
        }
        Self { options }
    }

    pub fn options(&self) -> &[ReleaseChannel] {
        &self.options
    }

    /// 1-based lookup
    pub fn by_number(&self, number: usize) -> Option<ReleaseChannel> {
        number
            .checked_sub(1)
            .and_then(|idx| self.options.get(idx))
            .copied()
    }
}

/// Resolve the channel from command-line flags. `Ok(None)` means no flag was
/// given and the operator has to be asked.
pub fn channel_from_flags(
    menu: &ChannelMenu,
    version: Option<u8>,
    pr: Option<&str>,
) -> Result<Option<ReleaseChannel>> {
    match (version, pr) {
        (Some(_), Some(_)) => Err(UpdaterError::Usage(
            "--version and --pr cannot be combined".to_string(),
        )),
        (Some(version), None) => menu
            .by_number(usize::from(version))
            .map(Some)
            .ok_or_else(|| UpdaterError::Usage(format!("Invalid version selection: {version}"))),
        (None, Some(pr)) => parse_pr_id(pr)
            .map(|id| Some(ReleaseChannel::PullRequest(id)))
            .ok_or_else(|| UpdaterError::Usage(format!("Could not parse PR number from: {pr}"))),
        (None, None) => Ok(None),
    }
}
