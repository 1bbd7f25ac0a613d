//! Logging backend plugged into the `log` crate's facade.
//!
//! Grounded in the original's `log/log.cpp` + `log/blockqueue.h`: a level filter, a
//! single log file, and an optional asynchronous mode where the calling thread only
//! pushes a formatted line onto a bounded queue and a dedicated writer thread drains it
//! to disk. Unlike the original's hand-rolled `fprintf` formatting, record formatting
//! goes through `log::Record`'s own `Display`-style assembly, and the queue is
//! `crossbeam_channel::bounded` rather than a condvar-guarded deque — the same crate
//! already used for the worker pool's task queue.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

use crossbeam_channel::{Sender, TrySendError};
use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::config::ServerConfig;

struct Line {
    level: Level,
    target: String,
    message: String,
}

enum Sink {
    /// `queue_size == 0`: format and write on the logging thread itself.
    Sync(std::sync::Mutex<File>),
    /// `queue_size > 0`: push onto a bounded channel, drained by a dedicated writer
    /// thread for the lifetime of the process.
    Async { sender: Sender<Line> },
}

struct EngineLogger {
    filter: LevelFilter,
    sink: Sink,
}

impl Log for EngineLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.filter
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = Line {
            level: record.level(),
            target: record.target().to_string(),
            message: format!("{}", record.args()),
        };
        match &self.sink {
            Sink::Sync(file) => {
                write_line(&mut file.lock().unwrap(), &line);
            }
            Sink::Async { sender } => {
                // Mirrors the original's behavior when `BlockDeque` is full: a log line
                // is allowed to drop rather than stall the request-handling thread that
                // produced it.
                if let Err(TrySendError::Disconnected(_)) = sender.try_send(line) {
                    // Writer thread is gone (shutdown in progress); nothing to do.
                }
            }
        }
    }

    fn flush(&self) {
        if let Sink::Sync(file) = &self.sink {
            let _ = file.lock().unwrap().flush();
        }
    }
}

fn write_line(file: &mut File, line: &Line) {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let _ = writeln!(
        file,
        "[{}.{:03}] {:<5} {} - {}",
        now.as_secs(),
        now.subsec_millis(),
        line.level,
        line.target,
        line.message
    );
}

fn open_log_file(dir: &Path) -> std::io::Result<File> {
    fs::create_dir_all(dir)?;
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("evented-httpd.log"))
}

/// Installs the global logger per `config`. Call once, before spawning the reactor.
pub fn init(config: &ServerConfig) -> std::io::Result<()> {
    let filter: LevelFilter = config.log_level.into();
    let file = open_log_file(&config.log_dir)?;

    let sink = if config.log_queue_size == 0 {
        Sink::Sync(std::sync::Mutex::new(file))
    } else {
        let (sender, receiver) = crossbeam_channel::bounded::<Line>(config.log_queue_size);
        std::thread::Builder::new()
            .name("log-writer".into())
            .spawn(move || {
                let mut file = file;
                while let Ok(line) = receiver.recv() {
                    write_line(&mut file, &line);
                }
                let _ = file.flush();
            })
            .expect("failed to spawn log writer thread");
        Sink::Async { sender }
    };

    let logger = Box::new(EngineLogger { filter, sink });
    log::set_boxed_logger(logger)
        .map(|()| log::set_max_level(filter))
        .expect("logger already initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_sink_writes_a_line_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let logger = EngineLogger {
            filter: LevelFilter::Info,
            sink: Sink::Sync(std::sync::Mutex::new(open_log_file(dir.path()).unwrap())),
        };
        logger.log(
            &Record::builder()
                .level(Level::Info)
                .target("test")
                .args(format_args!("hello"))
                .build(),
        );
        logger.flush();
        let contents = fs::read_to_string(dir.path().join("evented-httpd.log")).unwrap();
        assert!(contents.contains("hello"));
    }

    #[test]
    fn below_filter_level_is_not_enabled() {
        let logger = EngineLogger {
            filter: LevelFilter::Warn,
            sink: Sink::Sync(std::sync::Mutex::new(
                open_log_file(&tempfile::tempdir().unwrap().into_path()).unwrap(),
            )),
        };
        assert!(!logger.enabled(&Metadata::builder().level(Level::Debug).build()));
        assert!(logger.enabled(&Metadata::builder().level(Level::Error).build()));
    }
}
