//! Version and build information.
//!
//! The version numbers come from Cargo. Build metadata is baked in from
//! `SIGTIMER_GIT_HASH`, `SIGTIMER_GIT_BRANCH`, `SIGTIMER_BUILD_NUMBER` and
//! `SIGTIMER_BUILD_DATE` when those are set at compile time.

use std::fmt;

use log::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub git_hash: &'static str,
    pub git_branch: &'static str,
    pub build_number: u32,
    pub build_date: &'static str,
}

impl VersionInfo {
    /// Version of this build.
    pub fn current() -> Self {
        VersionInfo {
            major: env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(0),
            minor: env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or(0),
            patch: env!("CARGO_PKG_VERSION_PATCH").parse().unwrap_or(0),
            git_hash: option_env!("SIGTIMER_GIT_HASH").unwrap_or("unknown"),
            git_branch: option_env!("SIGTIMER_GIT_BRANCH").unwrap_or("unknown"),
            build_number: option_env!("SIGTIMER_BUILD_NUMBER")
                .and_then(|n| n.parse().ok())
                .unwrap_or(0),
            build_date: option_env!("SIGTIMER_BUILD_DATE").unwrap_or("unknown"),
        }
    }

    /// Multi-line report including the build metadata.
    pub fn long(&self) -> String {
        format!(
            "{self}\ngit: {} ({})\nbuild: #{} on {}",
            self.git_hash, self.git_branch, self.build_number, self.build_date
        )
    }
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "software version {:02}.{:02} ({:02})",
            self.major, self.minor, self.patch
        )
    }
}

/// Logs the version of this build at info level.
pub fn log_version() {
    info!("APP {}", VersionInfo::current());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_matches_cargo_version() {
        let version = VersionInfo::current();
        assert_eq!(
            format!("{}.{}.{}", version.major, version.minor, version.patch),
            env!("CARGO_PKG_VERSION")
        );
    }

    #[test]
    fn test_display_pads_numbers() {
        let version = VersionInfo {
            major: 1,
            minor: 4,
            patch: 0,
            git_hash: "abc123",
            git_branch: "main",
            build_number: 17,
            build_date: "2024-05-01",
        };
        assert_eq!(version.to_string(), "software version 01.04 (00)");
        assert_eq!(
            version.long(),
            "software version 01.04 (00)\ngit: abc123 (main)\nbuild: #17 on 2024-05-01"
        );
    }
}
