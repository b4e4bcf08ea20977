use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use tracing_subscriber::fmt::MakeWriter;

/// Sends log lines to stderr so command output on stdout stays parseable,
/// optionally mirroring them into a log file.
#[derive(Clone)]
pub(crate) struct StderrMakeWriter {
    pub file: Option<Arc<Mutex<File>>>,
}

impl<'a> MakeWriter<'a> for StderrMakeWriter {
    type Writer = StderrWriter;

    fn make_writer(&'a self) -> Self::Writer {
        StderrWriter {
            file: self.file.clone(),
        }
    }
}

pub(crate) struct StderrWriter {
    file: Option<Arc<Mutex<File>>>,
}

impl Write for StderrWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Some(file) = &self.file {
            let mut file = file.lock().unwrap_or_else(|e| e.into_inner());
            let _ = file.write_all(buf);
        }
        std::io::stderr().write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if let Some(file) = &self.file {
            let _ = file.lock().unwrap_or_else(|e| e.into_inner()).flush();
        }
        std::io::stderr().flush()
    }
}

/// `--verbose` forces debug; otherwise the configured level, falling back to warn.
pub(crate) fn resolve_level(configured: &str, verbose: bool) -> Level {
    if verbose {
        return Level::DEBUG;
    }
    Level::from_str(configured.trim()).unwrap_or(Level::WARN)
}

pub(crate) fn init(level: Level, log_file: Option<&Path>) -> Result<()> {
    let file = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            Some(Arc::new(Mutex::new(file)))
        }
        None => None,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(StderrMakeWriter { file })
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::resolve_level;
    use tracing::Level;

    #[test]
    fn verbose_overrides_configured_level() {
        assert_eq!(resolve_level("error", true), Level::DEBUG);
        assert_eq!(resolve_level("info", false), Level::INFO);
        assert_eq!(resolve_level("chatty", false), Level::WARN);
    }
}
