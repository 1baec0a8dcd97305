//! Relay worker: one thread owns the transport and performs every write.
//!
//! Callers hold a cloneable [`RelayHandle`]. A write is queued on a bounded
//! channel and the caller waits for the reply up to a timeout, so a stalled
//! bus never blocks a caller for longer than that.

use super::{ChannelOutcome, RelayTransport, TransportError, check_channel, switch_all_off};
use log::{debug, info};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::thread;
use std::time::Duration;

const QUEUE_DEPTH: usize = 32;

struct SetRelay {
    channel: u8,
    on: bool,
    reply: mpsc::Sender<Result<(), TransportError>>,
}

#[derive(Clone)]
pub struct RelayHandle {
    tx: SyncSender<SetRelay>,
    reply_timeout: Duration,
}

/// Start the worker thread. It exits once every handle has been dropped.
pub fn spawn(
    transport: Box<dyn RelayTransport + Send>,
    reply_timeout: Duration,
) -> Result<RelayHandle, TransportError> {
    let (tx, rx) = mpsc::sync_channel(QUEUE_DEPTH);
    thread::Builder::new()
        .name("relay-worker".into())
        .spawn(move || run(transport, rx))?;
    info!("Relay worker started (reply timeout {}ms)", reply_timeout.as_millis());
    Ok(RelayHandle { tx, reply_timeout })
}

fn run(mut transport: Box<dyn RelayTransport + Send>, rx: Receiver<SetRelay>) {
    for cmd in rx {
        let result = transport.set(cmd.channel, cmd.on);
        // The caller may have given up waiting; nothing to do then.
        let _ = cmd.reply.send(result);
    }
    debug!("Relay worker stopped");
}

impl RelayHandle {
    pub fn set(&self, channel: u8, on: bool) -> Result<(), TransportError> {
        check_channel(channel)?;
        let (reply, response) = mpsc::channel();
        self.tx
            .try_send(SetRelay { channel, on, reply })
            .map_err(|e| match e {
                TrySendError::Full(_) => TransportError::Busy,
                TrySendError::Disconnected(_) => TransportError::Disconnected,
            })?;
        match response.recv_timeout(self.reply_timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(TransportError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Disconnected),
        }
    }

    pub fn all_off(&self) -> Vec<ChannelOutcome> {
        switch_all_off(|channel| self.set(channel, false))
    }
}
