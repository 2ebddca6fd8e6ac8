//! Drivers that call [`CommandListener::poll`] on a fixed cadence.
//!
//! The listener itself never schedules anything; whatever event loop the
//! device runs is expected to poll it. These cover the common cases of a
//! dedicated thread and a tokio task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::debug;

use crate::handler::CommandHandler;
use crate::listener::CommandListener;

/// Default interval between poll ticks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Polls a listener from a background thread until stopped or dropped.
#[derive(Debug)]
pub struct PollDriver {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl PollDriver {
    /// Start polling `listener` every `interval`.
    pub fn spawn<H>(listener: Arc<CommandListener<H>>, interval: Duration) -> std::io::Result<Self>
    where
        H: CommandHandler + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let device_id = listener.device().device_id;
        let thread = std::thread::Builder::new()
            .name(format!("buscmd-poll-{device_id}"))
            .spawn(move || {
                debug!(device_id, ?interval, "poll driver started");
                while flag.load(Ordering::Acquire) {
                    listener.poll();
                    std::thread::sleep(interval);
                }
                debug!(device_id, "poll driver stopped");
            })?;
        Ok(Self {
            running,
            thread: Some(thread),
        })
    }

    /// True until [`stop`](Self::stop) is called.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop polling and wait for the thread to exit.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for PollDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Poll `listener` from a tokio task until `cancel` fires.
#[cfg(feature = "async")]
pub fn spawn_poll_task<H>(
    listener: Arc<CommandListener<H>>,
    interval: Duration,
    cancel: tokio_util::sync::CancellationToken,
) -> tokio::task::JoinHandle<()>
where
    H: CommandHandler + Send + 'static,
{
    tokio::spawn(async move {
        let device_id = listener.device().device_id;
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        debug!(device_id, ?interval, "poll task started");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(device_id, "poll task cancelled");
                    break;
                }
                _ = ticker.tick() => listener.poll(),
            }
        }
    })
}
