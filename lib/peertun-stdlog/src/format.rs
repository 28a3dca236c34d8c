/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fmt::{Arguments, Write};

use slog::{KV, Key, OwnedKVList, Record, Serializer};

use peertun_types::log::AsyncLogFormatter;

use super::StdLogValue;

pub struct StdLogFormatter {
    append_code_position: bool,
}

impl StdLogFormatter {
    pub(super) fn new(append_code_position: bool) -> Self {
        StdLogFormatter {
            append_code_position,
        }
    }
}

impl AsyncLogFormatter<StdLogValue> for StdLogFormatter {
    fn format_slog(
        &self,
        record: &Record,
        logger_values: &OwnedKVList,
    ) -> Result<StdLogValue, slog::Error> {
        let mut kv_pairs = Vec::new();
        let mut serializer = KvCollector(&mut kv_pairs);
        logger_values.serialize(record, &mut serializer)?;
        record.kv().serialize(record, &mut serializer)?;

        let location = if self.append_code_position {
            let file = record
                .file()
                .rsplit_once('/')
                .map(|x| x.1)
                .unwrap_or(record.file());
            Some(format!("{}({file}:{})", record.module(), record.line()))
        } else {
            None
        };

        Ok(StdLogValue {
            level: record.level(),
            message: record.msg().to_string(),
            kv_pairs,
            location,
        })
    }
}

struct KvCollector<'a>(&'a mut Vec<(String, String)>);

impl KvCollector<'_> {
    fn push(&mut self, key: Key, value: String) -> slog::Result {
        self.0.push((key.to_string(), value));
        Ok(())
    }
}

impl Serializer for KvCollector<'_> {
    fn emit_usize(&mut self, key: Key, value: usize) -> slog::Result {
        self.push(key, itoa::Buffer::new().format(value).to_string())
    }

    fn emit_u64(&mut self, key: Key, value: u64) -> slog::Result {
        self.push(key, itoa::Buffer::new().format(value).to_string())
    }

    fn emit_i64(&mut self, key: Key, value: i64) -> slog::Result {
        self.push(key, itoa::Buffer::new().format(value).to_string())
    }

    fn emit_u32(&mut self, key: Key, value: u32) -> slog::Result {
        self.push(key, itoa::Buffer::new().format(value).to_string())
    }

    fn emit_f64(&mut self, key: Key, value: f64) -> slog::Result {
        self.push(key, ryu::Buffer::new().format(value).to_string())
    }

    fn emit_bool(&mut self, key: Key, value: bool) -> slog::Result {
        self.push(key, value.to_string())
    }

    fn emit_none(&mut self, _key: Key) -> slog::Result {
        Ok(())
    }

    fn emit_str(&mut self, key: Key, value: &str) -> slog::Result {
        self.push(key, value.to_string())
    }

    fn emit_arguments(&mut self, key: Key, value: &Arguments) -> slog::Result {
        let mut s = String::new();
        s.write_fmt(*value).map_err(|_| slog::Error::Other)?;
        self.push(key, s)
    }
}
