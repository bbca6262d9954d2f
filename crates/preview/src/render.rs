use crate::frame::PreviewFrame;
use crate::slot::FrameSlot;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Receives the frame to draw on every display tick
pub trait FrameSink: Send + 'static {
    /// `frame` is the newest published frame, which may be the one already
    /// drawn on the previous tick, or `None` before the first publish.
    fn render(&mut self, frame: Option<&Arc<PreviewFrame>>);
}

impl<F> FrameSink for F
where
    F: FnMut(Option<&Arc<PreviewFrame>>) + Send + 'static,
{
    fn render(&mut self, frame: Option<&Arc<PreviewFrame>>) {
        self(frame)
    }
}

/// Drive `sink` at `fps` from `slot` until `cancel` fires, then return it.
///
/// Never waits for a new frame: each tick reads whatever the slot holds.
pub fn spawn_render<S: FrameSink>(
    slot: FrameSlot,
    fps: u32,
    mut sink: S,
    cancel: CancellationToken,
) -> JoinHandle<S> {
    let period = Duration::from_secs(1) / fps.max(1);
    tokio::spawn(async move {
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut ticks = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    ticks += 1;
                    let frame = slot.latest();
                    sink.render(frame.as_ref());
                }
            }
        }

        debug!(ticks, "render loop stopped");
        sink
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_closure_sink() {
        let slot = FrameSlot::new();
        let cancel = CancellationToken::new();
        let drawn = Arc::new(AtomicUsize::new(0));
        let counter = drawn.clone();

        let handle = spawn_render(
            slot,
            10,
            move |_frame: Option<&Arc<PreviewFrame>>| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            cancel.clone(),
        );

        // Ticks at 0, 100, 200 ms
        tokio::time::sleep(Duration::from_millis(250)).await;
        cancel.cancel();
        handle.await.unwrap();
        assert!((2..=3).contains(&drawn.load(Ordering::SeqCst)));
    }

    struct Recorder(Vec<Option<u64>>);

    impl FrameSink for Recorder {
        fn render(&mut self, frame: Option<&Arc<PreviewFrame>>) {
            self.0.push(frame.map(|f| f.sequence));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_render_runs_at_display_rate() {
        let slot = FrameSlot::new();
        let cancel = CancellationToken::new();
        let handle = spawn_render(slot.clone(), 20, Recorder(Vec::new()), cancel.clone());

        tokio::time::sleep(Duration::from_millis(10)).await;
        slot.publish(PreviewFrame::new(RgbImage::new(2, 2), 1));
        // Ticks at 50, 100, 150, 200 ms
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();

        let Recorder(seen) = handle.await.unwrap();
        assert_eq!(seen.first(), Some(&None));
        assert!(seen.len() >= 4);
        assert!(seen[1..].iter().all(|s| *s == Some(1)));
    }
}
