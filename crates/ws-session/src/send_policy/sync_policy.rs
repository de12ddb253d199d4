//! Sync-blocking send policy: the caller's thread blocks until its own
//! submitted message completes.

use std::sync::mpsc as std_mpsc;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::callbacks::Message;
use crate::client::WriteStatus;

use super::{PolicyContext, SendPolicy};

struct Slot {
    active_send: bool,
    completion: Option<std_mpsc::SyncSender<bool>>,
    pending_bytes: usize,
}

/// Serializes callers through a single in-flight write: the next caller's
/// `send` blocks on the condition variable until the previous completion
/// clears `active_send`.
pub(crate) struct SyncSendPolicy {
    ctx: Arc<dyn PolicyContext>,
    slot: Arc<Mutex<Slot>>,
    not_busy: Arc<Condvar>,
}

impl SyncSendPolicy {
    pub(crate) fn new(ctx: Arc<dyn PolicyContext>) -> Self {
        Self {
            ctx,
            slot: Arc::new(Mutex::new(Slot {
                active_send: false,
                completion: None,
                pending_bytes: 0,
            })),
            not_busy: Arc::new(Condvar::new()),
        }
    }
}

impl SendPolicy for SyncSendPolicy {
    fn send(&self, message: Message) -> bool {
        if !self.ctx.is_ready_for_synchronous_send() {
            return false;
        }
        // Calling from the I/O thread would block the very thread that
        // must run client_send's completion; reject rather than deadlock.
        if self.ctx.is_in_io_thread() {
            return false;
        }

        let (tx, rx) = std_mpsc::sync_channel::<bool>(1);

        {
            let mut guard = self.slot.lock();
            while guard.active_send {
                self.not_busy.wait(&mut guard);
            }
            guard.active_send = true;
            guard.completion = Some(tx);
            guard.pending_bytes = message.byte_len();
        }
        self.ctx.queue_incremented();

        let ctx = self.ctx.clone();
        let slot = self.slot.clone();
        let not_busy = self.not_busy.clone();

        self.ctx.post_to_io(Box::new(move || {
            let accepted = ctx.has_client() && ctx.is_client_connected() && ctx.client_send(message);
            if !accepted {
                complete(&ctx, &slot, &not_busy, false);
            }
        }));

        rx.recv().unwrap_or(false)
    }

    fn on_message_write_completed(&self, status: WriteStatus) {
        let success = status == WriteStatus::Success;
        complete(&self.ctx, &self.slot, &self.not_busy, success);
    }

    fn on_connected(&self) {}
}

fn complete(ctx: &Arc<dyn PolicyContext>, slot: &Arc<Mutex<Slot>>, not_busy: &Arc<Condvar>, success: bool) {
    let (completion, bytes) = {
        let mut guard = slot.lock();
        guard.active_send = false;
        (guard.completion.take(), guard.pending_bytes)
    };
    if success {
        ctx.record_message_sent(bytes);
    }
    ctx.queue_decremented();
    if let Some(tx) = completion {
        let _ = tx.send(success);
    }
    not_busy.notify_one();
}
