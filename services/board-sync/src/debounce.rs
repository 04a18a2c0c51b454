//! Per-key debounced commits.
//!
//! Each [`Debouncer`] owns one background task and one timer, so separate
//! keys never suppress each other. Repeated triggers inside the delay window
//! collapse into a single `commit(get_payload())`, with the timer reset on
//! every trigger.

use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::debug;

enum Signal {
    Trigger(Instant),
    Flush(oneshot::Sender<()>),
    Cancel(oneshot::Sender<()>),
}

/// Handle to a debounce worker.
///
/// Dropping the handle commits a pending payload before the worker exits.
#[derive(Debug)]
pub struct Debouncer {
    tx: mpsc::UnboundedSender<Signal>,
    delay: Duration,
}

impl Debouncer {
    /// Spawn a debouncer on the current runtime.
    ///
    /// `get_payload` is read when the timer fires, not when it is triggered.
    pub fn new<T, G, C>(get_payload: G, commit: C, delay: Duration) -> Self
    where
        T: Send + 'static,
        G: Fn() -> T + Send + 'static,
        C: Fn(T) -> BoxFuture<'static, ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let fire = move || commit(get_payload());
        tokio::spawn(run(rx, delay, fire));
        Self { tx, delay }
    }

    /// Schedule a commit `delay` from now, replacing any earlier schedule.
    pub fn trigger(&self) {
        let _ = self.tx.send(Signal::Trigger(Instant::now()));
    }

    /// Commit a pending payload now and wait for the commit to finish.
    /// Does nothing when no commit is pending.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Signal::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Discard a pending commit. Resolves once a commit already in
    /// flight has finished, so nothing from before the cancel lands later.
    pub async fn cancel(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Signal::Cancel(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

async fn run<F>(mut rx: mpsc::UnboundedReceiver<Signal>, delay: Duration, fire: F)
where
    F: Fn() -> BoxFuture<'static, ()> + Send,
{
    let mut deadline: Option<Instant> = None;

    loop {
        let armed = deadline;
        let timer = async move {
            match armed {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            signal = rx.recv() => match signal {
                Some(Signal::Trigger(at)) => deadline = Some(at + delay),
                Some(Signal::Flush(done)) => {
                    if deadline.take().is_some() {
                        fire().await;
                    }
                    let _ = done.send(());
                }
                Some(Signal::Cancel(done)) => {
                    if deadline.take().is_some() {
                        debug!("pending commit cancelled");
                    }
                    let _ = done.send(());
                }
                None => {
                    if deadline.take().is_some() {
                        fire().await;
                    }
                    break;
                }
            },
            _ = timer => {
                deadline = None;
                fire().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<(String, Duration)>>>;

    fn recorder(name: &'static str, log: Log, start: Instant, delay: Duration) -> Debouncer {
        Debouncer::new(
            move || name.to_string(),
            move |payload: String| {
                let log = log.clone();
                Box::pin(async move {
                    log.lock().unwrap().push((payload, start.elapsed()));
                })
            },
            delay,
        )
    }

    fn names(log: &Log) -> Vec<String> {
        log.lock().unwrap().iter().map(|(n, _)| n.clone()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_independent_timers() {
        let log: Log = Arc::default();
        let start = Instant::now();
        let delay = Duration::from_millis(100);
        let a = recorder("a", log.clone(), start, delay);
        let b = recorder("b", log.clone(), start, delay);

        a.trigger();
        tokio::time::sleep(Duration::from_millis(50)).await;
        b.trigger();

        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(names(&log).is_empty());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(names(&log), vec!["a"]);

        tokio::time::sleep(Duration::from_millis(75)).await;
        let fired = log.lock().unwrap().clone();
        assert_eq!(fired.len(), 2);
        assert_eq!(fired[0].1, Duration::from_millis(100));
        assert_eq!(fired[1].0, "b");
        assert_eq!(fired[1].1, Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn test_triggers_collapse_and_reset_timer() {
        let log: Log = Arc::default();
        let start = Instant::now();
        let d = recorder("x", log.clone(), start, Duration::from_millis(100));

        for _ in 0..4 {
            d.trigger();
            tokio::time::sleep(Duration::from_millis(60)).await;
        }
        assert!(names(&log).is_empty());

        tokio::time::sleep(Duration::from_millis(100)).await;
        let fired = log.lock().unwrap().clone();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].1, Duration::from_millis(280));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_and_cancel() {
        let log: Log = Arc::default();
        let d = recorder("x", log.clone(), Instant::now(), Duration::from_secs(10));

        d.flush().await;
        assert!(names(&log).is_empty());

        d.trigger();
        d.flush().await;
        assert_eq!(names(&log), vec!["x"]);

        d.trigger();
        d.cancel().await;
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(names(&log).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_waits_for_commit_in_flight() {
        let log: Log = Arc::default();
        let start = Instant::now();
        let commit_log = log.clone();
        let d = Debouncer::new(
            || "slow".to_string(),
            move |payload: String| {
                let log = commit_log.clone();
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    log.lock().unwrap().push((payload, start.elapsed()));
                })
            },
            Duration::from_millis(100),
        );

        d.trigger();
        tokio::time::sleep(Duration::from_millis(110)).await;
        assert!(names(&log).is_empty());

        d.cancel().await;
        let fired = log.lock().unwrap().clone();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].1, Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_commits_pending() {
        let log: Log = Arc::default();
        let d = recorder("x", log.clone(), Instant::now(), Duration::from_secs(10));

        d.trigger();
        drop(d);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(names(&log), vec!["x"]);
    }
}
