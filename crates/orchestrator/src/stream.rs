//! Result streams for the probe services
//!
//! A producer task feeds a bounded channel; the consumer side stops
//! yielding the moment the service's stop token fires, even if results are
//! still buffered.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct ResultStream<T> {
    rx: mpsc::Receiver<T>,
    stop: CancellationToken,
}

impl<T> ResultStream<T> {
    pub fn new(rx: mpsc::Receiver<T>, stop: CancellationToken) -> Self {
        Self { rx, stop }
    }

    /// Next result in completion order; `None` once the producer is done
    /// or the run was stopped.
    pub async fn next(&mut self) -> Option<T> {
        if self.stop.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.stop.cancelled() => None,
            item = self.rx.recv() => item,
        }
    }

    /// Drain the stream.
    pub async fn collect(mut self) -> Vec<T> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await {
            items.push(item);
        }
        items
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_yields_until_producer_finishes() {
        let (tx, rx) = mpsc::channel(4);
        let stream = ResultStream::new(rx, CancellationToken::new());
        tokio::spawn(async move {
            for i in 0..3 {
                tx.send(i).await.unwrap();
            }
        });
        assert_eq!(stream.collect().await, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_stop_hides_buffered_items() {
        let (tx, rx) = mpsc::channel(4);
        let stop = CancellationToken::new();
        let mut stream = ResultStream::new(rx, stop.clone());
        tx.send(1).await.unwrap();
        tx.send(2).await.unwrap();

        assert_eq!(stream.next().await, Some(1));
        stop.cancel();
        assert!(stream.is_stopped());
        assert_eq!(stream.next().await, None);
    }
}
