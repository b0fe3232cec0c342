mod motivation;
mod performance;

pub use motivation::Motivation;
pub use performance::PerformanceMaximization;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::proxy::ProxyManager;

/// One control algorithm: observe, compute, enforce.
///
/// A tick is a best-effort epoch; implementations log and carry on rather
/// than propagate failures out of the loop.
#[async_trait]
pub trait Controller: Send + 'static {
    async fn tick(&mut self, proxies: &dyn ProxyManager);
}

/// Handle to a running controller loop.
pub struct ControllerHandle {
    stop: Arc<Notify>,
    task: JoinHandle<()>,
}

impl ControllerHandle {
    /// Stops the loop. An in-flight tick completes; only the sleep between
    /// ticks is interrupted.
    pub async fn shutdown(self) {
        self.stop.notify_one();
        let _ = self.task.await;
    }
}

/// Runs `controller.tick` every `periodicity` until shut down.
pub fn spawn_controller(
    mut controller: impl Controller,
    proxies: Arc<dyn ProxyManager>,
    periodicity: Duration,
) -> ControllerHandle {
    let stop = Arc::new(Notify::new());
    let stopped = stop.clone();
    let task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(periodicity);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => controller.tick(proxies.as_ref()).await,
                _ = stopped.notified() => break,
            }
        }
    });
    ControllerHandle { stop, task }
}


#[cfg(test)]
mod tests {
    use super::testutil::FakeProxies;
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(Arc<AtomicUsize>);

    #[async_trait]
    impl Controller for Counting {
        async fn tick(&mut self, _proxies: &dyn ProxyManager) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn loop_ticks_and_shuts_down() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let proxies: Arc<dyn ProxyManager> = Arc::new(FakeProxies::default());
        let handle = spawn_controller(
            Counting(ticks.clone()),
            proxies,
            Duration::from_millis(10),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.shutdown().await;
        let seen = ticks.load(Ordering::SeqCst);
        assert!(seen >= 1, "controller never ticked");
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), seen, "ticks continued after shutdown");
    }
}
