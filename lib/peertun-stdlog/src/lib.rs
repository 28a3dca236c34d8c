/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io::{self, IsTerminal, Write};
use std::sync::Arc;

use chrono::Local;
use flume::Receiver;
use slog::Level;

use peertun_types::log::{AsyncLogConfig, AsyncLogger, LogStats};

mod format;
use format::StdLogFormatter;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

pub struct StdLogValue {
    level: Level,
    message: String,
    kv_pairs: Vec<(String, String)>,
    location: Option<String>,
}

impl StdLogValue {
    fn message_str(&self) -> &str {
        if self.message.is_empty() {
            "()"
        } else {
            &self.message
        }
    }
}

/// Create a drain whose records are written to stderr by a dedicated thread.
pub fn new_async_logger(
    async_conf: &AsyncLogConfig,
    append_code_position: bool,
) -> AsyncLogger<StdLogValue, StdLogFormatter> {
    let (sender, receiver) = flume::bounded::<StdLogValue>(async_conf.channel_capacity);

    let stats = Arc::new(LogStats::default());

    let io_thread = AsyncIoThread {
        receiver,
        stats: Arc::clone(&stats),
    };

    let _detached_thread = std::thread::Builder::new()
        .name(async_conf.thread_name.clone())
        .spawn(move || io_thread.run());

    AsyncLogger::new(sender, StdLogFormatter::new(append_code_position), stats)
}

struct AsyncIoThread {
    receiver: Receiver<StdLogValue>,
    stats: Arc<LogStats>,
}

impl AsyncIoThread {
    fn run(self) {
        let stderr = io::stderr();
        let console = stderr.is_terminal();
        let mut io = stderr.lock();
        let mut buf: Vec<u8> = Vec::with_capacity(1024);
        while let Ok(v) = self.receiver.recv() {
            self.write_one(&mut io, &mut buf, v, console);
            while let Ok(v) = self.receiver.try_recv() {
                self.write_one(&mut io, &mut buf, v, console);
            }
            let _ = io.flush();
        }
    }

    fn write_one<IO: Write>(&self, io: &mut IO, buf: &mut Vec<u8>, v: StdLogValue, console: bool) {
        buf.clear();
        let r = if console {
            write_console(buf, v)
        } else {
            write_plain(buf, v)
        };
        if r.is_err() {
            return;
        }
        match io.write_all(buf) {
            Ok(_) => self.stats.add_passed(buf.len()),
            Err(_) => self.stats.add_write_failed(),
        }
    }
}

fn write_plain<IO: Write>(io: &mut IO, v: StdLogValue) -> io::Result<()> {
    write!(io, "{}", Local::now().format(TIME_FORMAT))?;
    write!(io, " {}", v.level)?;
    for (k, v) in &v.kv_pairs {
        write!(io, " {k}: {v},")?;
    }
    write!(io, " {}", v.message_str())?;
    if let Some(location) = &v.location {
        write!(io, " <{location}>")?;
    }
    writeln!(io)
}

fn write_console<IO: Write>(io: &mut IO, v: StdLogValue) -> io::Result<()> {
    use anstyle::{AnsiColor, Color, Style};

    const COLOR_MAGENTA: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Magenta)));
    const COLOR_RED: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Red)));
    const COLOR_YELLOW: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Yellow)));
    const COLOR_GREEN: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Green)));
    const COLOR_CYAN: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Cyan)));
    const COLOR_BLUE: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Blue)));
    const STYLE_BOLD: Style = Style::new().bold();
    const STYLE_ITALIC: Style = Style::new().italic();

    let level_color = match v.level {
        Level::Critical => COLOR_MAGENTA,
        Level::Error => COLOR_RED,
        Level::Warning => COLOR_YELLOW,
        Level::Info => COLOR_GREEN,
        Level::Debug => COLOR_CYAN,
        Level::Trace => COLOR_BLUE,
    };

    write!(io, "{}", Local::now().format(TIME_FORMAT))?;
    write!(
        io,
        " {}{}{}",
        level_color.render(),
        v.level,
        level_color.render_reset()
    )?;
    for (k, v) in &v.kv_pairs {
        write!(
            io,
            " {}{k}{}={v},",
            STYLE_BOLD.render(),
            STYLE_BOLD.render_reset()
        )?;
    }
    write!(
        io,
        " {}{}{}",
        STYLE_BOLD.render(),
        v.message_str(),
        STYLE_BOLD.render_reset()
    )?;
    if let Some(location) = &v.location {
        write!(
            io,
            " <{}{location}{}>",
            STYLE_ITALIC.render(),
            STYLE_ITALIC.render_reset()
        )?;
    }
    writeln!(io)
}
