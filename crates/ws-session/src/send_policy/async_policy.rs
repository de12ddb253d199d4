//! Async-queued send policy: bounded FIFO queue, one write in flight.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::callbacks::Message;
use crate::client::WriteStatus;

use super::{PolicyContext, SendPolicy};

struct Inner {
    queue: VecDeque<Message>,
    write_in_progress: bool,
}

/// Queues messages and drains them one at a time onto the Client, dropping
/// new messages silently once `max_send_queue_size` is reached.
///
/// The queue is only ever touched from closures posted to the I/O thread;
/// the mutex exists to satisfy `Send`/`Sync`, not for real contention.
pub(crate) struct AsyncSendPolicy {
    ctx: Arc<dyn PolicyContext>,
    inner: Arc<Mutex<Inner>>,
}

impl AsyncSendPolicy {
    pub(crate) fn new(ctx: Arc<dyn PolicyContext>) -> Self {
        Self {
            ctx,
            inner: Arc::new(Mutex::new(Inner {
                queue: VecDeque::new(),
                write_in_progress: false,
            })),
        }
    }
}

impl SendPolicy for AsyncSendPolicy {
    fn send(&self, message: Message) -> bool {
        let ctx = self.ctx.clone();
        let inner = self.inner.clone();

        ctx.clone().post_to_io(Box::new(move || {
            {
                let mut guard = inner.lock();
                let max = ctx.max_send_queue_size();
                if max > 0 && guard.queue.len() >= max {
                    tracing::warn!(target: "ws_session::send_policy", max, "send queue full, dropping message");
                    return;
                }
                guard.queue.push_back(message);
                ctx.queue_incremented();
            }
            try_write_next(&ctx, &inner);
        }));

        true
    }

    fn on_message_write_completed(&self, status: WriteStatus) {
        let mut guard = self.inner.lock();
        match status {
            WriteStatus::Failure => {
                guard.write_in_progress = false;
            }
            WriteStatus::Success => {
                if let Some(sent) = guard.queue.pop_front() {
                    self.ctx.record_message_sent(sent.byte_len());
                    self.ctx.queue_decremented();
                }
                guard.write_in_progress = false;
                drop(guard);
                try_write_next(&self.ctx, &self.inner);
                return;
            }
        }
    }

    fn on_connected(&self) {
        try_write_next(&self.ctx, &self.inner);
    }
}

fn try_write_next(ctx: &Arc<dyn PolicyContext>, inner: &Arc<Mutex<Inner>>) {
    let mut guard = inner.lock();
    if guard.write_in_progress || guard.queue.is_empty() {
        return;
    }
    if !ctx.has_client() || !ctx.is_client_connected() {
        return;
    }
    let message = guard.queue.front().cloned().expect("checked non-empty above");
    guard.write_in_progress = true;
    drop(guard);
    ctx.client_send(message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::send_policy::tests::FakeContext;

    #[test]
    fn queued_sends_are_silently_dropped_once_the_queue_is_full() {
        let ctx = FakeContext::new(2);
        ctx.set_connected(false);
        let policy = AsyncSendPolicy::new(ctx.clone());

        for i in 0..5 {
            assert!(policy.send(Message::Text(i.to_string())));
        }

        assert_eq!(ctx.queue_size(), 2);
        assert_eq!(ctx.sent_messages(), Vec::<Message>::new());
    }

    #[test]
    fn connected_sends_drain_in_fifo_order_one_at_a_time() {
        let ctx = FakeContext::new(0);
        ctx.set_connected(true);
        let policy = AsyncSendPolicy::new(ctx.clone());

        policy.send(Message::Text("a".to_string()));
        policy.send(Message::Text("b".to_string()));

        // Only the head of the queue is handed to the client until its
        // write completes.
        assert_eq!(ctx.client_send_calls(), vec![Message::Text("a".to_string())]);

        policy.on_message_write_completed(WriteStatus::Success);
        assert_eq!(
            ctx.client_send_calls(),
            vec![
                Message::Text("a".to_string()),
                Message::Text("b".to_string())
            ]
        );

        policy.on_message_write_completed(WriteStatus::Success);
        assert_eq!(ctx.queue_size(), 0);
        assert_eq!(
            ctx.sent_messages(),
            vec![
                Message::Text("a".to_string()),
                Message::Text("b".to_string())
            ]
        );
    }

    #[test]
    fn a_failed_write_leaves_the_head_of_the_queue_intact_for_retry() {
        let ctx = FakeContext::new(0);
        ctx.set_connected(true);
        let policy = AsyncSendPolicy::new(ctx.clone());

        policy.send(Message::Text("a".to_string()));
        assert_eq!(ctx.client_send_calls().len(), 1);

        policy.on_message_write_completed(WriteStatus::Failure);
        // Failure clears write_in_progress but does not pop the message;
        // on_connected (a fresh connect attempt) is what retries it.
        assert_eq!(ctx.queue_size(), 1);

        policy.on_connected();
        assert_eq!(ctx.client_send_calls().len(), 2);
    }

    #[test]
    fn on_connected_kicks_off_delivery_of_messages_queued_before_connect() {
        let ctx = FakeContext::new(0);
        ctx.set_connected(false);
        let policy = AsyncSendPolicy::new(ctx.clone());

        policy.send(Message::Text("a".to_string()));
        assert!(ctx.client_send_calls().is_empty());

        ctx.set_connected(true);
        policy.on_connected();
        assert_eq!(ctx.client_send_calls(), vec![Message::Text("a".to_string())]);
    }
}
