//! The command-ordering gate (spec §4.1 "Pipelining ordering rule"): a
//! command may begin its async work (database lookups, sieve evaluation) as
//! soon as it is parsed, but must not finalize — write its response, mutate
//! shared envelope state — until every earlier command in the session's
//! FIFO has finalized.
//!
//! This session processes one command fully before reading the next, so the
//! gate below is always satisfied immediately; it exists as the integration
//! point spec §4.1 describes, ready for a future overlapped-execution mode
//! (e.g. resolving several pipelined RCPT TOs concurrently) without
//! changing any finalize-order guarantee callers already depend on.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Notify;

/// One slot in the pipeline's FIFO. `Parsing` and `Executing` are collapsed
/// into "not yet finished" here — only the Finished transition is gated,
/// matching spec §4.1's rule precisely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    Executing,
    Finished,
}

pub struct Pipeline {
    next_ticket: AtomicU64,
    completed_through: AtomicU64,
    notify: Notify,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Pipeline {
            next_ticket: AtomicU64::new(0),
            completed_through: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    /// Reserves the next FIFO slot for a freshly parsed command.
    pub fn ticket(&self) -> u64 {
        self.next_ticket.fetch_add(1, Ordering::SeqCst)
    }

    /// Suspends until every earlier ticket has called [`Pipeline::finish`].
    pub async fn wait_turn(&self, ticket: u64) {
        loop {
            if self.completed_through.load(Ordering::SeqCst) == ticket {
                return;
            }
            self.notify.notified().await;
        }
    }

    /// Marks `ticket` finished, unblocking `ticket + 1`'s `wait_turn`.
    pub fn finish(&self, ticket: u64) {
        self.completed_through.store(ticket + 1, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn later_ticket_waits_for_earlier_to_finish() {
        let pipeline = Arc::new(Pipeline::new());
        let first = pipeline.ticket();
        let second = pipeline.ticket();

        let pipeline2 = pipeline.clone();
        let waiter = tokio::spawn(async move {
            pipeline2.wait_turn(second).await;
            "second ran"
        });

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        pipeline.finish(first);
        let result = waiter.await.unwrap();
        assert_eq!(result, "second ran");
    }
}
