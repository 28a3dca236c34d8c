/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;

use flume::{Sender, TrySendError};
use slog::{Drain, OwnedKVList, Record};

use super::LogStats;

#[derive(Clone, Debug)]
pub struct AsyncLogConfig {
    pub channel_capacity: usize,
    pub thread_name: String,
}

impl AsyncLogConfig {
    pub fn with_name(thread_name: &str) -> Self {
        AsyncLogConfig {
            channel_capacity: 1024,
            thread_name: thread_name.to_string(),
        }
    }
}

impl Default for AsyncLogConfig {
    fn default() -> Self {
        AsyncLogConfig::with_name("log-async")
    }
}

pub trait AsyncLogFormatter<T> {
    fn format_slog(&self, record: &Record, logger_values: &OwnedKVList) -> Result<T, slog::Error>;
}

/// A slog drain handing formatted records to a writer thread.
///
/// Records are dropped, never blocked on, when the channel is full.
pub struct AsyncLogger<T, F>
where
    F: AsyncLogFormatter<T>,
{
    sender: Sender<T>,
    formatter: F,
    stats: Arc<LogStats>,
}

impl<T, F> AsyncLogger<T, F>
where
    F: AsyncLogFormatter<T>,
{
    pub fn new(sender: Sender<T>, formatter: F, stats: Arc<LogStats>) -> Self {
        AsyncLogger {
            sender,
            formatter,
            stats,
        }
    }

    pub fn stats(&self) -> Arc<LogStats> {
        Arc::clone(&self.stats)
    }
}

impl<T, F> Drain for AsyncLogger<T, F>
where
    F: AsyncLogFormatter<T>,
{
    type Ok = ();
    type Err = slog::Error;

    fn log(&self, record: &Record, logger_values: &OwnedKVList) -> Result<(), slog::Error> {
        self.stats.add_total();

        let v = match self.formatter.format_slog(record, logger_values) {
            Ok(v) => v,
            Err(e) => {
                self.stats.add_format_failed();
                return Err(e);
            }
        };
        match self.sender.try_send(v) {
            Ok(_) => {}
            Err(TrySendError::Full(_)) => self.stats.add_channel_overflow(),
            Err(TrySendError::Disconnected(_)) => self.stats.add_channel_closed(),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slog::{Logger, o};

    struct MsgOnly;

    impl AsyncLogFormatter<String> for MsgOnly {
        fn format_slog(&self, record: &Record, _: &OwnedKVList) -> Result<String, slog::Error> {
            Ok(record.msg().to_string())
        }
    }

    #[test]
    fn overflow_is_counted() {
        let (sender, receiver) = flume::bounded(1);
        let stats = Arc::new(LogStats::default());
        let drain = AsyncLogger::new(sender, MsgOnly, Arc::clone(&stats));
        let logger = Logger::root(drain.fuse(), o!());

        slog::info!(logger, "first");
        slog::info!(logger, "second");
        assert_eq!(receiver.try_recv().unwrap(), "first");

        let snap = stats.snapshot();
        assert_eq!(snap.total, 2);
        assert_eq!(snap.channel_overflow, 1);

        drop(receiver);
        slog::info!(logger, "third");
        assert_eq!(stats.snapshot().channel_closed, 1);
    }
}
