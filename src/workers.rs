#![forbid(unsafe_code)]

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Runs `task` over every item with at most `limit` futures in flight and
/// returns the results in input order. All tasks are joined before returning;
/// a panicking task is re-raised here.
pub async fn run_bounded<T, R, F, Fut>(limit: usize, items: Vec<T>, task: F) -> Vec<R>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut,
    Fut: Future<Output = R> + Send + 'static,
{
    let pool = Arc::new(Semaphore::new(limit.max(1)));
    let total = items.len();
    let mut set = JoinSet::new();
    for (index, item) in items.into_iter().enumerate() {
        let pool = pool.clone();
        let work = task(item);
        set.spawn(async move {
            let _permit = pool.acquire_owned().await;
            (index, work.await)
        });
    }

    let mut results: Vec<Option<R>> = (0..total).map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, result)) => results[index] = Some(result),
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(err) => tracing::error!("worker task cancelled: {err}"),
        }
    }
    results.into_iter().flatten().collect()
}
