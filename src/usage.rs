//! Process resource usage snapshots.

use std::fmt;
use std::time::Duration;

use nix::sys::resource::{UsageWho, getrusage};
use nix::sys::time::TimeVal;

use crate::error::Result;

/// CPU time and peak memory of a process (or of its reaped children).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceUsage {
    pub user: Duration,
    pub system: Duration,
    /// Peak resident set size in KiB.
    pub max_rss_kib: u64,
}

impl ResourceUsage {
    /// Usage of the calling process, all threads included.
    pub fn current() -> Result<Self> {
        Self::of(UsageWho::RUSAGE_SELF)
    }

    /// Usage of reaped child processes.
    pub fn children() -> Result<Self> {
        Self::of(UsageWho::RUSAGE_CHILDREN)
    }

    fn of(who: UsageWho) -> Result<Self> {
        let usage = getrusage(who)?;
        Ok(Self {
            user: to_duration(usage.user_time()),
            system: to_duration(usage.system_time()),
            max_rss_kib: u64::try_from(usage.max_rss()).unwrap_or(0),
        })
    }

    /// User plus system CPU time.
    pub fn cpu_time(&self) -> Duration {
        self.user + self.system
    }
}

impl fmt::Display for ResourceUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CPU {:.3}s (user {:.3}s, system {:.3}s), max RSS {} KiB",
            self.cpu_time().as_secs_f64(),
            self.user.as_secs_f64(),
            self.system.as_secs_f64(),
            self.max_rss_kib
        )
    }
}

fn to_duration(tv: TimeVal) -> Duration {
    let secs = u64::try_from(tv.tv_sec()).unwrap_or(0);
    let micros = u32::try_from(tv.tv_usec()).unwrap_or(0);
    Duration::from_secs(secs) + Duration::from_micros(u64::from(micros))
}
