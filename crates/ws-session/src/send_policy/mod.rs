//! Accepts caller messages and schedules them onto the Client's single
//! writer slot. Two built-in policies plus a pluggable custom factory.

mod async_policy;
mod sync_policy;

use std::sync::Arc;

use crate::callbacks::Message;
use crate::client::WriteStatus;

pub(crate) use async_policy::AsyncSendPolicy;
pub(crate) use sync_policy::SyncSendPolicy;

/// The narrow interface a Send Policy uses to reach the engine and the
/// current Client, without holding either by strong reference.
pub(crate) trait PolicyContext: Send + Sync + 'static {
    fn is_client_connected(&self) -> bool;
    fn has_client(&self) -> bool;
    fn is_ready_for_synchronous_send(&self) -> bool;
    fn is_in_io_thread(&self) -> bool;
    fn max_send_queue_size(&self) -> usize;
    /// Run `task` on the engine's I/O thread; safe to call from any thread.
    fn post_to_io(&self, task: Box<dyn FnOnce() + Send>);
    /// Submit one write to the current Client, if any.
    fn client_send(&self, message: Message) -> bool;
    fn queue_incremented(&self);
    fn queue_decremented(&self);
    fn record_message_sent(&self, bytes: usize);
}

/// Implemented by `AsyncSendPolicy`, `SyncSendPolicy`, and any custom
/// policy supplied through `SendBehavior::Custom`.
pub(crate) trait SendPolicy: Send + Sync + 'static {
    /// Accept (or reject) a caller message. Returns immediately; acceptance
    /// does not guarantee delivery (the async policy may drop on overflow).
    fn send(&self, message: Message) -> bool;
    /// The Client reported the outcome of the single outstanding write.
    fn on_message_write_completed(&self, status: WriteStatus);
    /// The Client just transitioned into `Connected`.
    fn on_connected(&self);
}

/// A factory that builds a fresh policy instance bound to one engine.
pub(crate) trait SendPolicyFactory: Send + Sync + 'static {
    fn build(&self, ctx: Arc<dyn PolicyContext>) -> Box<dyn SendPolicy>;
}

impl<F> SendPolicyFactory for F
where
    F: Fn(Arc<dyn PolicyContext>) -> Box<dyn SendPolicy> + Send + Sync + 'static,
{
    fn build(&self, ctx: Arc<dyn PolicyContext>) -> Box<dyn SendPolicy> {
        (self)(ctx)
    }
}

/// A minimal `PolicyContext` double shared by the async/sync policy unit
/// tests, standing in for the engine and its current Client.
#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

    pub(crate) struct FakeContext {
        connected: AtomicBool,
        in_io_thread: AtomicBool,
        ready_for_sync: AtomicBool,
        max_queue: usize,
        queue_size: AtomicI64,
        client_send_calls: parking_lot::Mutex<Vec<Message>>,
        pending: parking_lot::Mutex<VecDeque<Message>>,
        sent_messages: parking_lot::Mutex<Vec<Message>>,
    }

    impl FakeContext {
        pub(crate) fn new(max_queue: usize) -> Arc<Self> {
            Arc::new(Self {
                connected: AtomicBool::new(false),
                in_io_thread: AtomicBool::new(false),
                ready_for_sync: AtomicBool::new(true),
                max_queue,
                queue_size: AtomicI64::new(0),
                client_send_calls: parking_lot::Mutex::new(Vec::new()),
                pending: parking_lot::Mutex::new(VecDeque::new()),
                sent_messages: parking_lot::Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn set_connected(&self, connected: bool) {
            self.connected.store(connected, Ordering::Release);
        }

        pub(crate) fn set_in_io_thread(&self, value: bool) {
            self.in_io_thread.store(value, Ordering::Release);
        }

        pub(crate) fn set_ready_for_sync(&self, value: bool) {
            self.ready_for_sync.store(value, Ordering::Release);
        }

        pub(crate) fn queue_size(&self) -> i64 {
            self.queue_size.load(Ordering::Acquire)
        }

        pub(crate) fn client_send_calls(&self) -> Vec<Message> {
            self.client_send_calls.lock().clone()
        }

        pub(crate) fn sent_messages(&self) -> Vec<Message> {
            self.sent_messages.lock().clone()
        }
    }

    impl PolicyContext for FakeContext {
        fn is_client_connected(&self) -> bool {
            self.connected.load(Ordering::Acquire)
        }

        fn has_client(&self) -> bool {
            true
        }

        fn is_ready_for_synchronous_send(&self) -> bool {
            self.ready_for_sync.load(Ordering::Acquire)
        }

        fn is_in_io_thread(&self) -> bool {
            self.in_io_thread.load(Ordering::Acquire)
        }

        fn max_send_queue_size(&self) -> usize {
            self.max_queue
        }

        fn post_to_io(&self, task: Box<dyn FnOnce() + Send>) {
            // No real I/O thread in these tests: run inline, matching the
            // single-threaded-executor semantics the real context provides.
            task();
        }

        fn client_send(&self, message: Message) -> bool {
            self.client_send_calls.lock().push(message.clone());
            self.pending.lock().push_back(message);
            true
        }

        fn queue_incremented(&self) {
            self.queue_size.fetch_add(1, Ordering::AcqRel);
        }

        fn queue_decremented(&self) {
            self.queue_size.fetch_sub(1, Ordering::AcqRel);
        }

        fn record_message_sent(&self, _bytes: usize) {
            if let Some(message) = self.pending.lock().pop_front() {
                self.sent_messages.lock().push(message);
            }
        }
    }
}
