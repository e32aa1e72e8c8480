// State fan-out
// Feeds every player state change to a consumer, one task per change

use crate::player::{PlayerState, Subscription};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::watch;
use tokio::task::JoinSet;

fn reap(tasks: &mut JoinSet<()>) {
    while let Some(result) = tasks.try_join_next() {
        if let Err(e) = result {
            log::error!("State handler failed: {}", e);
        }
    }
}

/// Deliver player states to `handler` until the player goes away or
/// `shutdown` flips to true.
///
/// The state current at subscription is delivered first, then every
/// transition in order. Handlers for successive changes run concurrently
/// and are awaited before returning.
pub async fn drive<T, F, Fut>(
    subscription: Subscription,
    mut shutdown: watch::Receiver<bool>,
    target: Arc<T>,
    handler: F,
) where
    T: Send + Sync + 'static,
    F: Fn(Arc<T>, PlayerState) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let Subscription {
        current,
        mut changes,
    } = subscription;
    let mut tasks = JoinSet::new();

    tasks.spawn(handler(Arc::clone(&target), current));

    loop {
        tokio::select! {
            received = changes.recv() => match received {
                Ok(state) => {
                    tasks.spawn(handler(Arc::clone(&target), state));
                }
                Err(RecvError::Lagged(missed)) => {
                    log::warn!("State consumer fell behind, {} player states skipped", missed);
                }
                Err(RecvError::Closed) => {
                    log::debug!("Player closed its state channel");
                    break;
                }
            },
            signal = shutdown.changed() => {
                if signal.is_err() || *shutdown.borrow() {
                    // Changes already published still get handled
                    loop {
                        match changes.try_recv() {
                            Ok(state) => {
                                tasks.spawn(handler(Arc::clone(&target), state));
                            }
                            Err(TryRecvError::Lagged(_)) => continue,
                            Err(_) => break,
                        }
                    }
                    break;
                }
            }
        }

        reap(&mut tasks);
    }

    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            log::error!("State handler failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artwork::tests::FakeCatalog;
    use crate::artwork::ArtworkResolver;
    use crate::player::{Active, FeedPlayer, Player, Track};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::broadcast;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<PlayerState>>,
    }

    impl Recorder {
        fn titles(&self) -> Vec<String> {
            self.seen
                .lock()
                .unwrap()
                .iter()
                .map(|state| match state {
                    PlayerState::Stopped => "Stopped".to_string(),
                    PlayerState::Playing(active) | PlayerState::Paused(active) => {
                        active.track.title.clone()
                    }
                })
                .collect()
        }
    }

    async fn record(recorder: Arc<Recorder>, state: PlayerState) {
        recorder.seen.lock().unwrap().push(state);
    }

    fn playing(title: &str, position: f64) -> PlayerState {
        PlayerState::Playing(Active::new(Track::new(title, None, None, 200.0), position))
    }

    #[tokio::test]
    async fn delivers_initial_state_and_changes() {
        let (tx, changes) = broadcast::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let recorder = Arc::new(Recorder::default());
        let subscription = Subscription {
            current: PlayerState::Stopped,
            changes,
        };

        let driver = tokio::spawn(drive(subscription, shutdown_rx, Arc::clone(&recorder), record));

        tx.send(playing("A", 10.0)).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(tx);
        driver.await.unwrap();

        let mut titles = recorder.titles();
        titles.sort();
        assert_eq!(titles, ["A", "Stopped"]);
    }

    #[tokio::test]
    async fn back_to_back_feed_lines_are_each_handled() {
        let player = FeedPlayer::new(ArtworkResolver::new(FakeCatalog::default(), 512));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let recorder = Arc::new(Recorder::default());

        // Subscribe before the feed runs, start consuming only afterwards
        let subscription = player.subscribe();
        let feed = concat!(
            r#"{"state":"playing","title":"A","duration":200.0,"position":150.0}"#,
            "\n",
            r#"{"state":"playing","title":"B","duration":200.0,"position":1.0}"#,
            "\n",
        );
        player.run_feed(feed.as_bytes()).await.unwrap();

        let driver = tokio::spawn(drive(subscription, shutdown_rx, Arc::clone(&recorder), record));
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown_tx.send(true).unwrap();
        driver.await.unwrap();

        let mut titles = recorder.titles();
        titles.sort();
        assert_eq!(titles, ["A", "B", "Stopped"]);
    }

    #[tokio::test]
    async fn shutdown_handles_pending_changes_and_waits_for_handlers() {
        let (tx, changes) = broadcast::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let recorder = Arc::new(Recorder::default());
        let subscription = Subscription {
            current: playing("A", 1.0),
            changes,
        };

        tx.send(playing("B", 2.0)).unwrap();
        shutdown_tx.send(true).unwrap();

        drive(
            subscription,
            shutdown_rx,
            Arc::clone(&recorder),
            |recorder: Arc<Recorder>, state| async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                record(recorder, state).await;
            },
        )
        .await;

        let mut titles = recorder.titles();
        titles.sort();
        assert_eq!(titles, ["A", "B"]);
    }
}
