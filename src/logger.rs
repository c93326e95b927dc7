//! Per-project logging.
//!
//! Every project owns a [`Logger`] that forwards to `tracing` with the
//! project name attached. During a parallel run the scheduler switches the
//! logger into buffered mode so that a job's output is flushed as one unit
//! and interleaved logs stay readable.

use std::{
    fmt,
    str::FromStr,
    sync::{
        atomic::{AtomicU8, Ordering},
        Mutex,
    },
};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
}

impl LogLevel {
    pub const fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => LogLevel::Trace,
            1 => LogLevel::Debug,
            2 => LogLevel::Info,
            3 => LogLevel::Warn,
            _ => LogLevel::Error,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level `{other}`")),
        }
    }
}

#[derive(Debug)]
pub struct Logger {
    name: String,
    level: AtomicU8,
    buffer: Mutex<Option<Vec<(LogLevel, String)>>>,
}

impl Logger {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            level: AtomicU8::new(LogLevel::Info as u8),
            buffer: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn level(&self) -> LogLevel {
        LogLevel::from_u8(self.level.load(Ordering::Relaxed))
    }

    pub fn set_level(&self, level: LogLevel) {
        self.level.store(level as u8, Ordering::Relaxed);
    }

    /// Switches to buffered mode. Messages accumulate until
    /// [`Self::flush`].
    pub fn start_buffering(&self) {
        let mut buffer = self.buffer.lock().unwrap();
        if buffer.is_none() {
            *buffer = Some(Vec::new());
        }
    }

    /// Emits everything buffered so far as one unit and returns to
    /// passthrough mode.
    pub fn flush(&self) {
        let drained = self.buffer.lock().unwrap().take();
        for (level, message) in drained.into_iter().flatten() {
            self.emit(level, &message);
        }
    }

    pub fn log(&self, level: LogLevel, message: impl fmt::Display) {
        if level < self.level() {
            return;
        }
        let message = message.to_string();
        let mut buffer = self.buffer.lock().unwrap();
        match buffer.as_mut() {
            Some(buffered) => buffered.push((level, message)),
            None => self.emit(level, &message),
        }
    }

    fn emit(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Trace => trace!(project = %self.name, "{message}"),
            LogLevel::Debug => debug!(project = %self.name, "{message}"),
            LogLevel::Info => info!(project = %self.name, "{message}"),
            LogLevel::Warn => warn!(project = %self.name, "{message}"),
            LogLevel::Error => error!(project = %self.name, "{message}"),
        }
    }

    pub fn trace(&self, message: impl fmt::Display) {
        self.log(LogLevel::Trace, message);
    }

    pub fn debug(&self, message: impl fmt::Display) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: impl fmt::Display) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl fmt::Display) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl fmt::Display) {
        self.log(LogLevel::Error, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_gates_messages() {
        let logger = Logger::new("p");
        logger.set_level(LogLevel::Warn);
        logger.start_buffering();
        logger.info("dropped");
        logger.error("kept");
        let buffered = logger.buffer.lock().unwrap().clone().unwrap();
        assert_eq!(buffered, vec![(LogLevel::Error, "kept".to_string())]);
    }

    #[test]
    fn flush_empties_the_buffer_and_restores_passthrough() {
        let logger = Logger::new("p");
        logger.start_buffering();
        logger.warn("queued");
        logger.flush();
        assert!(logger.buffer.lock().unwrap().is_none());
    }

    #[test]
    fn levels_parse_and_order() {
        assert!(LogLevel::Trace < LogLevel::Error);
        assert_eq!("debug".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert!("verbose".parse::<LogLevel>().is_err());
    }
}
