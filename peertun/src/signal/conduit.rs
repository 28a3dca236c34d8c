/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use anyhow::{Context, anyhow};
use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

use super::{PeerSignal, SignalHandler, SignalsForPeer};

const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Connect two local ends directly, for running both roles in one process.
pub fn cross_wire(a: (SignalsForPeer, SignalHandler), b: (SignalsForPeer, SignalHandler)) {
    let (mut a_signals, a_handler) = a;
    let (mut b_signals, b_handler) = b;
    tokio::spawn(async move {
        while let Some(signal) = a_signals.recv().await {
            if !b_handler.handle(signal) {
                break;
            }
        }
    });
    tokio::spawn(async move {
        while let Some(signal) = b_signals.recv().await {
            if !a_handler.handle(signal) {
                break;
            }
        }
    });
}

/// Carry signals over a tcp stream, one json message per line.
///
/// Returns when either the peer or the local side is gone.
pub async fn run_tcp_conduit(
    stream: TcpStream,
    mut signals: SignalsForPeer,
    handler: SignalHandler,
) -> anyhow::Result<()> {
    let (reader, writer) = stream.into_split();
    let mut lines_in = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
    let mut lines_out = FramedWrite::new(writer, LinesCodec::new());

    loop {
        tokio::select! {
            r = lines_in.next() => {
                let Some(r) = r else {
                    debug!("signaling peer closed the conduit");
                    return Ok(());
                };
                let line = r.map_err(|e| anyhow!("signaling read failed: {e}"))?;
                match PeerSignal::from_json(&line) {
                    Ok(signal) => {
                        if !handler.handle(signal) {
                            return Ok(());
                        }
                    }
                    Err(e) => warn!("dropped malformed signal: {e}"),
                }
            }
            signal = signals.recv() => {
                let Some(signal) = signal else {
                    return Ok(());
                };
                let line = signal.to_json().context("failed to encode signal")?;
                lines_out
                    .send(line)
                    .await
                    .map_err(|e| anyhow!("signaling write failed: {e}"))?;
            }
        }
    }
}
