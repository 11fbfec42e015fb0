/*!
Units of work spawned by the orchestrator.

Each task owns what it needs (an `Arc` of the run context plus its table or
backup), makes its store calls through the context and hands exactly one
result to the channel it was spawned with.
*/

pub mod create;
pub mod delete;
pub mod expire;

pub use create::{backup_name, CreateTask};
pub use delete::DeleteTask;
pub use expire::ExpireTask;

use std::future::Future;
use tokio::sync::mpsc;
use tracing::{warn, Instrument, Span};

/// Spawn `work` on the runtime and send its output to `tx`
///
/// If the task panics, `tx` is dropped without a send; receivers detect the
/// shortfall when the channel closes early.
pub(crate) fn spawn_reporting<T, F>(work: F, tx: mpsc::Sender<T>, span: Span)
where
    T: Send + 'static,
    F: Future<Output = T> + Send + 'static,
{
    tokio::spawn(
        async move {
            let output = work.await;
            if tx.send(output).await.is_err() {
                warn!("Result receiver went away before the task reported");
            }
        }
        .instrument(span),
    );
}

/// Wait until `expected` messages have arrived or every sender is gone
pub(crate) async fn barrier<T>(rx: &mut mpsc::Receiver<T>, expected: usize) -> Vec<T> {
    let mut received = Vec::with_capacity(expected);
    while received.len() < expected {
        match rx.recv().await {
            Some(message) => received.push(message),
            None => break,
        }
    }
    received
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_barrier_collects_all_reports() {
        let (tx, mut rx) = mpsc::channel(4);
        for i in 0..4 {
            spawn_reporting(async move { i * 10 }, tx.clone(), Span::none());
        }
        drop(tx);

        let mut values = barrier(&mut rx, 4).await;
        values.sort();
        assert_eq!(values, vec![0, 10, 20, 30]);
    }

    #[tokio::test]
    async fn test_barrier_stops_when_a_task_dies() {
        let (tx, mut rx) = mpsc::channel::<u32>(2);
        spawn_reporting(async { 1 }, tx.clone(), Span::none());
        spawn_reporting(
            async {
                panic!("task died");
            },
            tx.clone(),
            Span::none(),
        );
        drop(tx);

        let values = barrier(&mut rx, 2).await;
        assert_eq!(values, vec![1]);
    }
}
