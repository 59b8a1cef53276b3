//! Staggered work scheduler.
//!
//! Launches one unit per item with a fixed delay between starts, then awaits
//! the whole batch. Only the start rate is throttled: units keep running
//! while later ones start, so steady-state concurrency is unbounded. A
//! panicking unit is logged and never takes its siblings down.

use std::future::Future;
use std::time::Duration;

use futures::future::join_all;
use futures::FutureExt;
use tracing::{error, info};

/// Default delay between unit starts in seconds.
pub const DEFAULT_STAGGER_SECS: u64 = 45;

/// Run `unit` for every item, staggering starts by `stagger` and awaiting
/// all units jointly at the end.
pub async fn run_staggered<T, F, Fut>(items: Vec<T>, stagger: Duration, unit: F)
where
    T: Send + 'static,
    F: Fn(T) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let total = items.len();
    if total == 0 {
        return;
    }

    info!(
        "Launching {} units with {}s stagger between starts",
        total,
        stagger.as_secs()
    );

    let mut handles = Vec::with_capacity(total);
    for (idx, item) in items.into_iter().enumerate() {
        let fut = unit(item);
        handles.push(tokio::spawn(async move {
            if let Err(panic) = std::panic::AssertUnwindSafe(fut).catch_unwind().await {
                error!("Unit {} panicked: {}", idx, describe_panic(panic));
            }
        }));

        if idx + 1 < total {
            tokio::time::sleep(stagger).await;
        }
    }

    for joined in join_all(handles).await {
        if let Err(e) = joined {
            error!("Unit join failed: {}", e);
        }
    }

    info!("All {} units finished", total);
}

fn describe_panic(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test(start_paused = true)]
    async fn starts_are_staggered_by_the_configured_delay() {
        let starts: Arc<Mutex<Vec<(usize, Duration)>>> = Arc::new(Mutex::new(Vec::new()));
        let t0 = tokio::time::Instant::now();

        let recorder = starts.clone();
        run_staggered(vec![0usize, 1, 2], Duration::from_secs(45), move |i| {
            let starts = recorder.clone();
            async move {
                starts.lock().unwrap().push((i, t0.elapsed()));
            }
        })
        .await;

        let mut recorded = starts.lock().unwrap().clone();
        recorded.sort_by_key(|(i, _)| *i);
        assert_eq!(recorded.len(), 3);
        assert!(recorded[0].1 < Duration::from_secs(45));
        assert!(recorded[1].1 >= Duration::from_secs(45));
        assert!(recorded[2].1 >= Duration::from_secs(90));
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_unit_does_not_abort_siblings() {
        let finished: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));

        let recorder = finished.clone();
        run_staggered(vec![0usize, 1, 2], Duration::from_secs(1), move |i| {
            let finished = recorder.clone();
            async move {
                if i == 1 {
                    panic!("unit blew up");
                }
                finished.lock().unwrap().push(i);
            }
        })
        .await;

        let mut done = finished.lock().unwrap().clone();
        done.sort();
        assert_eq!(done, vec![0, 2]);
    }

    #[tokio::test]
    async fn empty_batch_returns_immediately() {
        run_staggered(Vec::<usize>::new(), Duration::from_secs(45), |_| async {}).await;
    }
}
