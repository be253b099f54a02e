//! Pieces shared by scan and discovery sessions: the caller-facing handle,
//! the observable lifecycle state and the bounded worker pool.
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use ::time::{format_description::well_known, OffsetDateTime};
use futures::Stream;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::ScanError;
use crate::types::SessionState;

/// Caller side of a running session.
///
/// Results arrive in completion order through [`SessionHandle::next`] (or the
/// `Stream` impl). The stream ends once every dispatched unit of work has
/// reported; [`SessionHandle::finish`] then yields the summary. A handle cannot
/// be restarted. Dropping it before `finish` cancels the session.
pub struct SessionHandle<R, S> {
    results: mpsc::UnboundedReceiver<R>,
    driver: Option<JoinHandle<S>>,
    cancel: CancellationToken,
    state: watch::Receiver<SessionState>,
}

impl<R, S> SessionHandle<R, S> {
    pub(crate) fn new(
        results: mpsc::UnboundedReceiver<R>,
        driver: JoinHandle<S>,
        cancel: CancellationToken,
        state: watch::Receiver<SessionState>,
    ) -> Self {
        Self {
            results,
            driver: Some(driver),
            cancel,
            state,
        }
    }

    /// Next result, or `None` once the session has nothing more to report.
    pub async fn next(&mut self) -> Option<R> {
        self.results.recv().await
    }

    /// Stop dispatching new work. In-flight probes run to their own timeout.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this session; handy for Ctrl-C handlers and servers.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Wait for all in-flight work and return the session summary.
    ///
    /// Results not yet taken with `next` are discarded; they are still
    /// reflected in the summary.
    pub async fn finish(mut self) -> Result<S, ScanError> {
        match self.driver.take() {
            Some(driver) => Ok(driver.await?),
            None => Err(ScanError::Task("session already finished".into())),
        }
    }
}

impl<R, S> Drop for SessionHandle<R, S> {
    fn drop(&mut self) {
        if self.driver.is_some() {
            self.cancel.cancel();
        }
    }
}

// Never pin-projected.
impl<R, S> Unpin for SessionHandle<R, S> {}

impl<R, S> Stream for SessionHandle<R, S> {
    type Item = R;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<R>> {
        self.get_mut().results.poll_recv(cx)
    }
}

/// Lifecycle cell owned by a session object and observed through its handle.
#[derive(Debug, Clone)]
pub(crate) struct StateCell(Arc<watch::Sender<SessionState>>);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(Arc::new(watch::Sender::new(SessionState::Idle)))
    }

    pub(crate) fn get(&self) -> SessionState {
        *self.0.borrow()
    }

    pub(crate) fn set(&self, state: SessionState) {
        self.0.send_replace(state);
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.0.subscribe()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PoolReport {
    pub dispatched: usize,
    pub cancelled: bool,
}

/// Run `work` over `items` with at most `limit` tasks in flight.
///
/// Items are pulled lazily, so huge inputs never materialize. `on_result` runs
/// on the calling task only, in completion order, which makes it the single
/// writer for whatever the caller accumulates. Cancellation is checked before
/// each dispatch and while waiting for completions; once observed nothing new
/// is dispatched, but everything already running is awaited.
pub(crate) async fn run_pool<I, T, F, Fut>(
    items: impl IntoIterator<Item = I>,
    limit: usize,
    cancel: &CancellationToken,
    work: F,
    mut on_result: impl FnMut(T),
) -> PoolReport
where
    T: Send + 'static,
    F: Fn(I) -> Fut,
    Fut: Future<Output = T> + Send + 'static,
{
    let sem = Arc::new(Semaphore::new(limit.max(1)));
    let mut set = JoinSet::new();
    let mut pending = items.into_iter();
    let mut exhausted = false;
    let mut cancelled = false;
    let mut dispatched = 0usize;

    loop {
        while !exhausted && !cancelled {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let Ok(permit) = sem.clone().try_acquire_owned() else {
                break;
            };
            match pending.next() {
                Some(item) => {
                    let fut = work(item);
                    set.spawn(async move {
                        let _permit = permit; // keep permit until task completes
                        fut.await
                    });
                    dispatched += 1;
                }
                None => exhausted = true,
            }
        }

        if set.is_empty() {
            break;
        }

        tokio::select! {
            _ = cancel.cancelled(), if !cancelled => {
                cancelled = true;
            }
            joined = set.join_next() => match joined {
                Some(Ok(res)) => on_result(res),
                Some(Err(e)) => warn!(error = %e, "worker task failed"),
                None => {}
            },
        }
    }

    PoolReport {
        dispatched,
        cancelled,
    }
}

pub(crate) fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn pool_reports_every_item_once() {
        let cancel = CancellationToken::new();
        let mut seen = Vec::new();
        let report = run_pool(
            0..100u32,
            7,
            &cancel,
            |n| async move { n * 2 },
            |r| seen.push(r),
        )
        .await;
        seen.sort_unstable();
        assert_eq!(seen, (0..100u32).map(|n| n * 2).collect::<Vec<_>>());
        assert_eq!(report, PoolReport { dispatched: 100, cancelled: false });
    }

    #[tokio::test]
    async fn pool_never_exceeds_limit() {
        let cancel = CancellationToken::new();
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut count = 0;
        run_pool(
            0..40,
            5,
            &cancel,
            |_| {
                let current = current.clone();
                let peak = peak.clone();
                async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                }
            },
            |_| count += 1,
        )
        .await;
        assert_eq!(count, 40);
        assert!(peak.load(Ordering::SeqCst) <= 5);
    }

    #[tokio::test]
    async fn pool_stops_dispatching_after_cancel() {
        let cancel = CancellationToken::new();
        let mut results = 0;
        let report = run_pool(
            0..1_000,
            4,
            &cancel,
            |_| async {
                tokio::time::sleep(Duration::from_millis(10)).await;
            },
            |_| {
                results += 1;
                if results == 8 {
                    cancel.cancel();
                }
            },
        )
        .await;
        assert!(report.cancelled);
        // Whatever was in flight at cancel time still reports.
        assert_eq!(results, report.dispatched);
        assert!(report.dispatched < 1_000);
        assert!(report.dispatched <= 8 + 4);
    }

    #[test]
    fn timestamps_are_rfc3339() {
        let ts = now_rfc3339();
        assert!(ts.contains('T'));
        assert!(ts.ends_with('Z'));
    }
}
