//! Process resource usage.

use std::fmt;

use anyhow::{Context, Result};

use crate::media::FileSize;

/// Memory page size assumed when converting the resident set size.
const PAGE_SIZE: u64 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryUsage {
    pub rss: FileSize,
    pub vsize: FileSize,
}

impl fmt::Display for MemoryUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RSS: {}, VSize: {}", self.rss, self.vsize)
    }
}

/// Memory of the current process, from `/proc/self/stat`.
#[cfg(target_os = "linux")]
pub fn process_memory() -> Result<MemoryUsage> {
    let stat = std::fs::read_to_string("/proc/self/stat").context("Failed to read /proc/self/stat")?;
    parse_stat(&stat)
}

#[cfg(not(target_os = "linux"))]
pub fn process_memory() -> Result<MemoryUsage> {
    anyhow::bail!("Memory usage is only available on Linux")
}

/// Fields 23 (vsize, bytes) and 24 (rss, pages) of a stat line.
fn parse_stat(stat: &str) -> Result<MemoryUsage> {
    // The command name may contain spaces, fields restart after its ')'
    let rest = stat
        .rsplit_once(')')
        .map(|(_, rest)| rest)
        .context("Malformed stat line")?;
    let fields: Vec<&str> = rest.split_whitespace().collect();

    let field = |number: usize| -> Result<u64> {
        fields
            .get(number - 3)
            .with_context(|| format!("Missing stat field {}", number))?
            .parse()
            .with_context(|| format!("Invalid stat field {}", number))
    };

    Ok(MemoryUsage {
        vsize: FileSize(field(23)?),
        rss: FileSize(field(24)? * PAGE_SIZE),
    })
}
