//! Audio playback using cpal.
//!
//! Sink for the demo binary: real-time output of mixed frames through the
//! system's default audio device using callback-based streaming.

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use rtp_mix_common::SampleSpec;
use std::sync::mpsc::{self, Receiver, Sender};
use tracing::{debug, info, warn};

/// Audio player for real-time PCM playback.
///
/// Uses cpal for cross-platform audio output. Operates in callback mode
/// where the audio device pulls samples from an internal queue; the pull
/// thread pushes each mixed frame as it is produced.
pub struct AudioPlayer {
    // ---
    _stream: Stream,
    sample_tx: Sender<f32>,
}

impl AudioPlayer {
    // ---
    /// Creates a player on the default output device matching `spec`.
    ///
    /// # Errors
    ///
    /// Returns error if no output device is available or the stream cannot
    /// be configured for the requested rate and channel count.
    pub fn new(spec: SampleSpec) -> Result<Self> {
        // ---
        info!("initializing audio playback");

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .context("no output device available")?;

        info!("using audio device: {}", device.name()?);

        let (sample_tx, sample_rx) = mpsc::channel();
        let stream = Self::build_stream(&device, spec, sample_rx)?;

        Ok(Self {
            _stream: stream,
            sample_tx,
        })
    }

    /// Queues a frame of interleaved samples for playback.
    pub fn play(&mut self, samples: &[f32]) {
        // ---
        for &sample in samples {
            if let Err(e) = self.sample_tx.send(sample) {
                warn!("failed to send sample to audio thread: {}", e);
                break;
            }
        }
    }

    fn build_stream(device: &Device, spec: SampleSpec, sample_rx: Receiver<f32>) -> Result<Stream> {
        // ---
        let config = StreamConfig {
            channels: spec.num_channels(),
            sample_rate: cpal::SampleRate(spec.sample_rate()),
            buffer_size: cpal::BufferSize::Default,
        };

        debug!("stream config: {:?}", config);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    // Underrun reads as silence.
                    for sample in data.iter_mut() {
                        *sample = sample_rx.try_recv().unwrap_or(0.0);
                    }
                },
                |err| {
                    warn!("audio stream error: {}", err);
                },
                None,
            )
            .context("failed to build output stream")?;

        stream.play().context("failed to start audio stream")?;
        info!("audio stream started");

        Ok(stream)
    }
}
