//! End-to-end viewing flow: visible, fetch, bind, scroll, suspend, terminate.

use clipfeed_core::feed::ItemLoadState;
use clipfeed_core::player::{BindingState, PlaybackEvent};
use clipfeed_core::session::SessionEvent;

use crate::support::{
    Harness, content, feed, item_id, started, wait_for_event, wait_until_loaded,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_full_viewing_flow_releases_everything() {
        let harness = Harness::new().await;
        let (session, backend) = harness.spawn_session();
        let mut events = session.subscribe();
        session.replace_feed(feed(4)).await.unwrap();

        session.set_visible(0).await.unwrap();
        wait_for_event(&mut events, started(0)).await;
        wait_until_loaded(&session, 1).await;

        session.set_visible(1).await.unwrap();
        wait_for_event(&mut events, started(1)).await;
        let first = session.item_state(&item_id(0)).await.unwrap().unwrap();
        assert_eq!(first.binding, BindingState::Inactive);

        // Scrolling back resumes the paused player in place.
        session.set_visible(0).await.unwrap();
        wait_for_event(&mut events, started(0)).await;
        assert_eq!(backend.open_count(), 2);
        assert_eq!(harness.resolver.call_count(&content(0)), 1);
        assert_eq!(harness.transport.download_count(&content(0)), 1);

        let snapshot = session.snapshot().await.unwrap();
        assert_eq!(snapshot.playing, 1);
        assert_eq!(snapshot.active_index, Some(0));

        session.suspend().await.unwrap();
        let snapshot = session.snapshot().await.unwrap();
        assert!(snapshot.suspended);
        assert_eq!(snapshot.playing, 0);
        assert_eq!(snapshot.items[0].binding, BindingState::Inactive);
        assert_eq!(snapshot.items[1].binding, BindingState::Released);

        session.resume().await.unwrap();
        wait_for_event(&mut events, started(0)).await;

        session.shutdown().await.unwrap();

        assert_eq!(backend.live_count(), 0);
        for probe in backend.probes() {
            assert!(probe.is_released());
            assert_eq!(probe.observer_count(), 0);
            assert_eq!(probe.emit(PlaybackEvent::Finished), 0);
        }
    }

    #[tokio::test]
    async fn test_only_one_item_plays_while_scrolling() {
        let harness = Harness::new().await;
        let (session, backend) = harness.spawn_session();
        let mut events = session.subscribe();
        session.replace_feed(feed(5)).await.unwrap();

        for index in 0..5 {
            session.set_visible(index).await.unwrap();
            wait_for_event(&mut events, started(index)).await;

            let snapshot = session.snapshot().await.unwrap();
            assert_eq!(snapshot.playing, 1);
            let playing = backend
                .probes()
                .iter()
                .filter(|probe| probe.is_playing())
                .count();
            assert_eq!(playing, 1);
        }

        // Default config keeps two paused players around.
        let snapshot = session.snapshot().await.unwrap();
        assert_eq!(snapshot.bound, 3);
        assert_eq!(snapshot.items[0].binding, BindingState::Released);
        assert_eq!(snapshot.items[1].binding, BindingState::Released);
    }

    #[tokio::test]
    async fn test_reload_preserves_surviving_paths() {
        let harness = Harness::new().await;
        let (session, _backend) = harness.spawn_session();
        let mut events = session.subscribe();
        session.replace_feed(feed(4)).await.unwrap();

        session.set_visible(0).await.unwrap();
        wait_for_event(&mut events, started(0)).await;
        let kept = wait_until_loaded(&session, 1).await;

        let refreshed: Vec<_> = feed(4).into_iter().skip(1).collect();
        session.replace_feed(refreshed).await.unwrap();

        let released = wait_for_event(&mut events, |event| {
            matches!(event, SessionEvent::BindingReleased { .. })
        })
        .await;
        assert_eq!(
            released,
            SessionEvent::BindingReleased {
                item_id: item_id(0)
            }
        );
        let status = session.item_state(&item_id(1)).await.unwrap().unwrap();
        assert_eq!(status.load, ItemLoadState::Ready(kept));
        assert_eq!(session.item_state(&item_id(0)).await.unwrap(), None);

        session.set_visible(0).await.unwrap();
        wait_for_event(&mut events, started(1)).await;
        assert_eq!(harness.resolver.call_count(&content(1)), 1);
    }

    #[tokio::test]
    async fn test_finished_video_loops_without_refetch() {
        let harness = Harness::new().await;
        let (session, backend) = harness.spawn_session();
        let mut events = session.subscribe();
        session.replace_feed(feed(1)).await.unwrap();

        session.set_visible(0).await.unwrap();
        wait_for_event(&mut events, started(0)).await;
        let probe = backend.probes()[0].clone();

        assert_eq!(probe.emit(PlaybackEvent::Finished), 1);
        clipfeed_core::test_mocks::wait_until(|| {
            probe
                .restart_calls
                .load(std::sync::atomic::Ordering::SeqCst)
                == 1
        })
        .await;

        assert_eq!(backend.open_count(), 1);
        assert_eq!(harness.transport.download_count(&content(0)), 1);
    }
}
