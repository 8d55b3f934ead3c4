//! The host speech queue: one ring buffer drained by one `cpal` output stream.
//!
//! `cpal::Stream` cannot leave the thread that built it, so the stream lives
//! on its own thread for as long as the [`OutputQueue`] exists. Everything
//! else talks to it through the ring buffer and [`PlaybackControl`].

use crate::{audio, device};
use anyhow::Context;
use cpal::traits::{DeviceTrait, StreamTrait};
use ringbuf::HeapProd;
use ringbuf::traits::{Consumer, Producer, Split};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Seconds of audio the queue can hold at once.
pub const QUEUE_SECONDS: usize = 30;

const FEED_INTERVAL: Duration = Duration::from_millis(20);
const FLUSH_WAIT_LIMIT: Duration = Duration::from_millis(500);

/// Flags shared between the engine and the output callback.
#[derive(Debug, Default)]
pub struct PlaybackControl {
    paused: AtomicBool,
    flush: AtomicBool,
    epoch: AtomicU64,
}

impl PlaybackControl {
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    /// Asks the callback to drop everything queued and invalidates feeders
    /// started before this call.
    pub fn request_flush(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        self.flush.store(true, Ordering::SeqCst);
    }

    pub fn flush_pending(&self) -> bool {
        self.flush.load(Ordering::SeqCst)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }
}

/// Fills one output buffer. A paused queue outputs silence without consuming
/// samples; each mono sample is copied to every channel of its frame.
pub fn fill_output<C: Consumer<Item = f32>>(
    data: &mut [f32],
    channels: usize,
    consumer: &mut C,
    control: &PlaybackControl,
) {
    if control.flush.swap(false, Ordering::SeqCst) {
        while consumer.try_pop().is_some() {}
    }
    if control.is_paused() {
        data.fill(0.0);
        return;
    }
    for frame in data.chunks_mut(channels.max(1)) {
        let sample = consumer.try_pop().unwrap_or(0.0);
        frame.fill(sample);
    }
}

pub struct OutputQueue {
    producer: Arc<Mutex<HeapProd<f32>>>,
    control: Arc<PlaybackControl>,
    sample_rate: u32,
    // Dropping this sender ends the stream thread.
    _shutdown: std::sync::mpsc::Sender<()>,
}

impl OutputQueue {
    /// Opens the named (or default) output device and starts streaming silence.
    pub fn open(device_name: Option<String>) -> anyhow::Result<Self> {
        let control = Arc::new(PlaybackControl::default());
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<anyhow::Result<(HeapProd<f32>, u32)>>();
        let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel::<()>();

        let thread_control = control.clone();
        std::thread::Builder::new()
            .name("speech-output".to_string())
            .spawn(move || {
                let stream = match build_stream(device_name, thread_control) {
                    Ok((stream, producer, sample_rate)) => {
                        let _ = ready_tx.send(Ok((producer, sample_rate)));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Returns once the queue is dropped.
                let _ = shutdown_rx.recv();
                drop(stream);
                tracing::debug!("Speech output stream closed");
            })
            .context("Failed to spawn speech output thread")?;

        let (producer, sample_rate) = ready_rx
            .recv()
            .context("Speech output thread exited before the stream was ready")??;

        Ok(Self {
            producer: Arc::new(Mutex::new(producer)),
            control,
            sample_rate,
            _shutdown: shutdown_tx,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn control(&self) -> &Arc<PlaybackControl> {
        &self.control
    }

    /// Hands samples to a background feeder and returns immediately. The
    /// feeder gives up if the queue is flushed before it is done.
    pub fn enqueue(&self, samples: Vec<f32>) {
        let epoch = self.control.epoch();
        tokio::spawn(feed(
            self.producer.clone(),
            self.control.clone(),
            epoch,
            samples,
        ));
    }
}

/// Pushes `samples` into the queue as space frees up. Stops early once the
/// control's epoch moves past `epoch`. Returns how many samples were pushed.
pub async fn feed<P: Producer<Item = f32>>(
    producer: Arc<Mutex<P>>,
    control: Arc<PlaybackControl>,
    epoch: u64,
    samples: Vec<f32>,
) -> usize {
    // Let the callback finish a pending flush first, or it would
    // swallow the new samples.
    let mut waited = Duration::ZERO;
    while control.flush_pending() && waited < FLUSH_WAIT_LIMIT {
        tokio::time::sleep(FEED_INTERVAL).await;
        waited += FEED_INTERVAL;
    }
    if control.flush_pending() {
        tracing::warn!("Output stream did not flush in time; speech may overlap");
    }

    let mut offset = 0;
    while offset < samples.len() {
        if control.epoch() != epoch {
            tracing::debug!("Feeder cancelled with {} samples left", samples.len() - offset);
            return offset;
        }
        let pushed = match producer.lock() {
            Ok(mut producer) => producer.push_slice(&samples[offset..]),
            Err(_) => {
                tracing::error!("Speech output queue lock poisoned");
                return offset;
            }
        };
        offset += pushed;
        if offset < samples.len() {
            tokio::time::sleep(FEED_INTERVAL).await;
        }
    }
    tracing::trace!("Queued {} samples", samples.len());
    offset
}

fn build_stream(
    device_name: Option<String>,
    control: Arc<PlaybackControl>,
) -> anyhow::Result<(cpal::Stream, HeapProd<f32>, u32)> {
    let output = device::get_or_default_output(device_name)?;
    tracing::info!("Using output device: {:?}", output.name()?);

    let output_config = output
        .default_output_config()
        .context("Failed to get default output config")?;
    let output_config: cpal::StreamConfig = output_config.config();
    let channels = output_config.channels as usize;
    let sample_rate = output_config.sample_rate.0;
    tracing::debug!("Output stream config: {:?}", &output_config);

    let (producer, mut consumer) =
        audio::shared_buffer(sample_rate as usize * QUEUE_SECONDS).split();

    let output_data_fn = move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
        fill_output(data, channels, &mut consumer, &control);
    };

    let stream = output.build_output_stream(
        &output_config,
        output_data_fn,
        move |err| tracing::error!("An error occurred on output stream: {}", err),
        None,
    )?;
    stream.play()?;

    Ok((stream, producer, sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringbuf::HeapRb;
    use ringbuf::traits::Observer;

    fn small_queue(
        capacity: usize,
    ) -> (Arc<Mutex<HeapProd<f32>>>, ringbuf::HeapCons<f32>, Arc<PlaybackControl>) {
        let (producer, consumer) = HeapRb::<f32>::new(capacity).split();
        (
            Arc::new(Mutex::new(producer)),
            consumer,
            Arc::new(PlaybackControl::default()),
        )
    }

    #[tokio::test]
    async fn feeder_refills_a_full_queue_as_it_drains() {
        let (producer, mut consumer, control) = small_queue(4);
        let samples: Vec<f32> = (0..10).map(|i| i as f32 / 10.0).collect();
        let feeder = tokio::spawn(feed(producer, control.clone(), control.epoch(), samples.clone()));

        let mut heard = Vec::new();
        let drained = tokio::time::timeout(Duration::from_secs(2), async {
            while heard.len() < samples.len() {
                tokio::time::sleep(Duration::from_millis(5)).await;
                while let Some(sample) = consumer.try_pop() {
                    heard.push(sample);
                }
            }
        })
        .await;

        assert!(drained.is_ok(), "queue was not refilled");
        assert_eq!(heard, samples);
        assert_eq!(feeder.await.unwrap(), samples.len());
    }

    #[tokio::test]
    async fn flush_during_feed_stops_further_pushes() {
        let (producer, mut consumer, control) = small_queue(4);
        let feeder = tokio::spawn(feed(producer, control.clone(), control.epoch(), vec![0.5; 10]));

        // Let the feeder fill the queue, then cancel as the engine does.
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(consumer.occupied_len(), 4);
        control.request_flush();

        // The output callback handles the flush.
        let mut data = [1.0; 4];
        fill_output(&mut data, 1, &mut consumer, &control);
        assert_eq!(data, [0.0; 4]);

        let pushed = tokio::time::timeout(Duration::from_secs(1), feeder)
            .await
            .expect("feeder did not stop")
            .unwrap();
        assert_eq!(pushed, 4);

        tokio::time::sleep(FEED_INTERVAL * 2).await;
        assert!(consumer.is_empty());
    }

    #[tokio::test]
    async fn feeder_started_before_a_flush_pushes_nothing() {
        let (producer, consumer, control) = small_queue(4);
        let stale_epoch = control.epoch();
        control.request_flush();
        // The callback drains before the feeder runs.
        control.flush.store(false, Ordering::SeqCst);

        let pushed = feed(producer, control.clone(), stale_epoch, vec![0.5; 3]).await;

        assert_eq!(pushed, 0);
        assert!(consumer.is_empty());
    }

    #[test]
    fn copies_each_sample_to_every_channel() {
        let (mut producer, mut consumer) = HeapRb::<f32>::new(8).split();
        producer.push_slice(&[0.1, 0.2]);
        let control = PlaybackControl::default();
        let mut data = [1.0; 6];

        fill_output(&mut data, 2, &mut consumer, &control);

        assert_eq!(data, [0.1, 0.1, 0.2, 0.2, 0.0, 0.0]);
    }

    #[test]
    fn paused_output_is_silent_and_keeps_samples() {
        let (mut producer, mut consumer) = HeapRb::<f32>::new(8).split();
        producer.push_slice(&[0.5, 0.5, 0.5]);
        let control = PlaybackControl::default();
        control.set_paused(true);
        let mut data = [1.0; 4];

        fill_output(&mut data, 1, &mut consumer, &control);

        assert_eq!(data, [0.0; 4]);
        assert_eq!(consumer.occupied_len(), 3);
    }

    #[test]
    fn flush_drops_queue_and_unpauses() {
        let (mut producer, mut consumer) = HeapRb::<f32>::new(8).split();
        producer.push_slice(&[0.5, 0.5, 0.5]);
        let control = PlaybackControl::default();
        control.set_paused(true);
        let epoch = control.epoch();

        control.request_flush();
        assert!(control.flush_pending());
        assert_ne!(control.epoch(), epoch);

        let mut data = [1.0; 2];
        fill_output(&mut data, 1, &mut consumer, &control);

        assert_eq!(data, [0.0; 2]);
        assert!(consumer.is_empty());
        assert!(!control.flush_pending());
        assert!(!control.is_paused());
    }
}
