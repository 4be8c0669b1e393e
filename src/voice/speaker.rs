//! Local audio output as a voice destination
//!
//! Destinations are output device names; `"default"` selects the host's
//! default output. Opening checks the device off the async runtime, and every
//! playback reopens the stream, so a device that disappears surfaces as a
//! `Disconnected` transition the manager can rejoin from.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, StreamConfig};
use tokio::sync::watch;

use super::{DisconnectReason, VoiceConnection, VoiceGateway, VoiceState};
use crate::playback::{AudioResource, OUTPUT_SAMPLE_RATE};
use crate::{Error, Result};

/// Destination name that selects the default output device
pub const DEFAULT_DESTINATION: &str = "default";

/// Names of the host's output devices
///
/// # Errors
///
/// Returns error if the host cannot enumerate devices
pub fn output_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| Error::Audio(e.to_string()))?;

    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

/// Opens [`SpeakerConnection`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct SpeakerGateway;

impl SpeakerGateway {
    /// Create a gateway over the default audio host
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl VoiceGateway for SpeakerGateway {
    async fn connect(&self, destination: &str) -> Result<Arc<dyn VoiceConnection>> {
        let connection = SpeakerConnection::new(destination);
        connection.open();
        Ok(connection as Arc<dyn VoiceConnection>)
    }
}

/// Output device and stream configuration found while opening
#[derive(Debug, Clone)]
struct OutputTarget {
    device_name: String,
    config: StreamConfig,
}

/// A connection to a local output device
pub struct SpeakerConnection {
    destination: String,
    state: watch::Sender<VoiceState>,
    target: Mutex<Option<OutputTarget>>,
    me: Weak<Self>,
}

impl SpeakerConnection {
    /// Create a connection in `Signalling`; call [`Self::open`] to proceed
    #[must_use]
    pub fn new(destination: &str) -> Arc<Self> {
        let (state, _rx) = watch::channel(VoiceState::Signalling);
        Arc::new_cyclic(|me| Self {
            destination: destination.to_string(),
            state,
            target: Mutex::new(None),
            me: me.clone(),
        })
    }

    /// Open the device in the background, moving to `Ready` or `Disconnected`
    pub fn open(&self) {
        let Some(this) = self.me.upgrade() else {
            return;
        };

        if !this.transition(VoiceState::Connecting) {
            return;
        }

        tokio::spawn(async move {
            let destination = this.destination.clone();
            let opened = tokio::task::spawn_blocking(move || open_output_target(&destination))
                .await
                .map_err(|e| Error::Audio(format!("device check failed: {e}")))
                .and_then(|r| r);

            match opened {
                Ok(target) => {
                    tracing::debug!(
                        destination = %this.destination,
                        device = %target.device_name,
                        channels = target.config.channels,
                        "output device opened"
                    );
                    *this.lock_target() = Some(target);
                    this.transition(VoiceState::Ready);
                }
                Err(e) => {
                    tracing::warn!(
                        destination = %this.destination,
                        error = %e,
                        "output device unavailable"
                    );
                    this.transition(VoiceState::Disconnected(DisconnectReason::Other {
                        close_code: None,
                    }));
                }
            }
        });
    }

    /// Move to `state` unless destroyed; returns whether anything changed
    fn transition(&self, state: VoiceState) -> bool {
        self.state.send_if_modified(|current| {
            if *current == VoiceState::Destroyed || *current == state {
                return false;
            }
            *current = state;
            true
        })
    }

    fn lock_target(&self) -> std::sync::MutexGuard<'_, Option<OutputTarget>> {
        self.target.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl VoiceConnection for SpeakerConnection {
    fn destination(&self) -> &str {
        &self.destination
    }

    fn subscribe(&self) -> watch::Receiver<VoiceState> {
        self.state.subscribe()
    }

    fn rejoin(&self) -> bool {
        if *self.state.borrow() == VoiceState::Destroyed {
            return false;
        }
        self.open();
        true
    }

    fn destroy(&self) {
        self.state.send_replace(VoiceState::Destroyed);
        self.lock_target().take();
    }

    async fn play(&self, resource: AudioResource) -> Result<()> {
        if *self.state.borrow() != VoiceState::Ready {
            return Err(Error::Voice(format!("{} is not ready", self.destination)));
        }

        let target = self
            .lock_target()
            .clone()
            .ok_or_else(|| Error::Voice(format!("{} has no output", self.destination)))?;

        let result = tokio::task::spawn_blocking(move || play_blocking(&target, &resource))
            .await
            .map_err(|e| Error::Audio(format!("playback task failed: {e}")))
            .and_then(|r| r);

        if let Err(e) = &result {
            tracing::warn!(destination = %self.destination, error = %e, "output failed");
            self.transition(VoiceState::Disconnected(DisconnectReason::Other {
                close_code: None,
            }));
        }

        result
    }
}

fn find_device(name: &str) -> Result<Device> {
    let host = cpal::default_host();

    if name == DEFAULT_DESTINATION {
        return host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()));
    }

    host.output_devices()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|d| d.name().is_ok_and(|n| n == name))
        .ok_or_else(|| Error::Audio(format!("output device not found: {name}")))
}

/// Locate the device and a stream config at the output rate, mono preferred
fn open_output_target(destination: &str) -> Result<OutputTarget> {
    let device = find_device(destination)?;

    let supports = |channels: u16| {
        device.supported_output_configs().ok()?.find(|c| {
            c.channels() == channels
                && c.min_sample_rate() <= SampleRate(OUTPUT_SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(OUTPUT_SAMPLE_RATE)
        })
    };

    let supported = supports(1)
        .or_else(|| supports(2))
        .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

    let config = supported
        .with_sample_rate(SampleRate(OUTPUT_SAMPLE_RATE))
        .config();

    Ok(OutputTarget {
        device_name: if destination == DEFAULT_DESTINATION {
            DEFAULT_DESTINATION.to_string()
        } else {
            device.name().unwrap_or_else(|_| destination.to_string())
        },
        config,
    })
}

/// Play mono samples on the target, blocking until done
fn play_blocking(target: &OutputTarget, resource: &AudioResource) -> Result<()> {
    if resource.samples.is_empty() {
        return Ok(());
    }

    let device = find_device(&target.device_name)?;
    let channels = usize::from(target.config.channels.max(1));

    let samples: Arc<[f32]> = Arc::from(resource.samples.as_slice());
    let position = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicBool::new(false));
    let failed = Arc::new(AtomicBool::new(false));

    let stream = {
        let samples = Arc::clone(&samples);
        let position = Arc::clone(&position);
        let finished = Arc::clone(&finished);
        let failed = Arc::clone(&failed);

        device
            .build_output_stream(
                &target.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for frame in data.chunks_mut(channels) {
                        let pos = position.load(Ordering::Relaxed);
                        let sample = samples.get(pos).copied().unwrap_or_else(|| {
                            finished.store(true, Ordering::Relaxed);
                            0.0
                        });
                        frame.fill(sample);
                        if pos < samples.len() {
                            position.store(pos + 1, Ordering::Relaxed);
                        }
                    }
                },
                move |err| {
                    tracing::error!(error = %err, "audio output stream error");
                    failed.store(true, Ordering::Relaxed);
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?
    };

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    // Poll for completion, bounded by the resource length plus slack
    let timeout = resource.duration() + Duration::from_millis(500);
    let start = Instant::now();
    while !finished.load(Ordering::Relaxed) && !failed.load(Ordering::Relaxed) {
        if start.elapsed() > timeout {
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    // Let the device drain its buffer
    std::thread::sleep(Duration::from_millis(100));
    drop(stream);

    if failed.load(Ordering::Relaxed) {
        return Err(Error::Audio("output stream failed during playback".to_string()));
    }

    tracing::debug!(samples = samples.len(), "playback complete");
    Ok(())
}
