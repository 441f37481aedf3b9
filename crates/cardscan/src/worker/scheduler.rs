//! Background loops driving the processor.
//!
//! The poll loop runs [`JobProcessor::process_pending`] and the cleanup
//! loop runs [`JobProcessor::cleanup_expired`], each on its own interval.
//! Both observe the processor's cancellation token; [`WorkerService::shutdown`]
//! cancels it and waits for both loops to finish.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::processor::JobProcessor;
use crate::config::WorkerConfig;
use crate::error::WorkerError;

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
    pub cleanup_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            cleanup_interval: Duration::from_secs(3600),
        }
    }
}

impl From<&WorkerConfig> for SchedulerConfig {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            cleanup_interval: config.cleanup_interval(),
        }
    }
}

pub struct WorkerService {
    cancel: CancellationToken,
    poll: JoinHandle<()>,
    cleanup: JoinHandle<()>,
}

impl WorkerService {
    /// Spawns both loops on the current tokio runtime.
    pub fn start(processor: Arc<JobProcessor>, config: SchedulerConfig) -> Self {
        let cancel = processor.cancellation_token();

        let poll = {
            let processor = Arc::clone(&processor);
            tokio::spawn(run_every(
                "poll",
                config.poll_interval,
                cancel.clone(),
                move || {
                    let processor = Arc::clone(&processor);
                    async move {
                        match processor.process_pending().await {
                            Ok(summary) if summary.identified + summary.failed > 0 => {
                                log::debug!("Poll pass: {:?}", summary);
                            }
                            Ok(_) => {}
                            Err(e) => log::error!("Processing pass failed: {}", e),
                        }
                    }
                },
            ))
        };

        let cleanup = tokio::spawn(run_every(
            "cleanup",
            config.cleanup_interval,
            cancel.clone(),
            move || {
                let processor = Arc::clone(&processor);
                async move {
                    if let Err(e) = processor.cleanup_expired().await {
                        log::error!("Cleanup pass failed: {}", e);
                    }
                }
            },
        ));

        log::info!(
            "Worker started (poll every {:?}, cleanup every {:?})",
            config.poll_interval,
            config.cleanup_interval
        );
        Self {
            cancel,
            poll,
            cleanup,
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stops both loops and waits for them. An in-flight processing pass
    /// fails its unfinished items before returning.
    pub async fn shutdown(self) -> Result<(), WorkerError> {
        self.cancel.cancel();
        let (poll, cleanup) = tokio::join!(self.poll, self.cleanup);
        poll.map_err(|e| WorkerError::Join(e.to_string()))?;
        cleanup.map_err(|e| WorkerError::Join(e.to_string()))?;
        log::info!("Worker stopped");
        Ok(())
    }
}

/// Runs `pass` immediately and then on every tick until `cancel` fires.
/// A pass that is running when cancellation arrives finishes first.
async fn run_every<F, Fut>(name: &'static str, every: Duration, cancel: CancellationToken, mut pass: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut timer = tokio::time::interval(every);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = timer.tick() => {}
        }
        pass().await;
    }
    log::debug!("{} loop stopped", name);
}
