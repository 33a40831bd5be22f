use std::path::PathBuf;

use domain::common::error::DomainError;
use ports::secondary::memory_info::MemoryInfoPort;

use crate::constants::PROC_MEMINFO;

const DEFAULT_PAGE_SIZE: u64 = 4096;

/// Reads free plus buffered memory from `/proc/meminfo`.
pub struct ProcMemInfo {
    path: PathBuf,
    page_size: u64,
}

impl ProcMemInfo {
    pub fn new() -> Self {
        Self {
            path: PathBuf::from(PROC_MEMINFO),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Read from an alternate file, e.g. a fixture.
    pub fn with_path(path: impl Into<PathBuf>, page_size: u64) -> Self {
        Self {
            path: path.into(),
            page_size: page_size.max(1024),
        }
    }
}

impl Default for ProcMemInfo {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryInfoPort for ProcMemInfo {
    fn available_pages(&self) -> Result<u64, DomainError> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            DomainError::EngineError(format!("read {}: {e}", self.path.display()))
        })?;
        let kb = parse_available_kb(&content).ok_or_else(|| {
            DomainError::EngineError(format!("no MemFree in {}", self.path.display()))
        })?;
        Ok(kb / (self.page_size / 1024))
    }
}

/// `MemFree + Buffers` in kB. `Buffers` is optional.
fn parse_available_kb(content: &str) -> Option<u64> {
    let mut free = None;
    let mut buffers = 0;
    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("MemFree:") {
            free = Some(parse_kb(rest)?);
        } else if let Some(rest) = line.strip_prefix("Buffers:") {
            buffers = parse_kb(rest)?;
        }
    }
    free.map(|f: u64| f.saturating_add(buffers))
}

fn parse_kb(rest: &str) -> Option<u64> {
    let trimmed = rest.trim();
    // Format: "12345 kB"
    trimmed.strip_suffix("kB").unwrap_or(trimmed).trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = "\
MemTotal:       16303428 kB
MemFree:          812344 kB
MemAvailable:    9912324 kB
Buffers:          204800 kB
Cached:          8401232 kB
";

    #[test]
    fn parse_free_plus_buffers() {
        assert_eq!(parse_available_kb(SAMPLE), Some(812_344 + 204_800));
    }

    #[test]
    fn parse_without_buffers() {
        assert_eq!(parse_available_kb("MemFree: 4096 kB\n"), Some(4096));
    }

    #[test]
    fn parse_missing_free() {
        assert_eq!(parse_available_kb("MemTotal: 1 kB\n"), None);
        assert_eq!(parse_available_kb("MemFree: lots\n"), None);
    }

    #[test]
    fn available_pages_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let info = ProcMemInfo::with_path(file.path(), 4096);
        assert_eq!(info.available_pages().unwrap(), (812_344 + 204_800) / 4);
    }

    #[test]
    fn missing_file_is_engine_error() {
        let info = ProcMemInfo::with_path("/nonexistent/meminfo", 4096);
        assert!(matches!(
            info.available_pages(),
            Err(DomainError::EngineError(_))
        ));
    }
}
