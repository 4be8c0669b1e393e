//! Shared test utilities

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chime_relay::Result;
use chime_relay::config::SoundMapping;
use chime_relay::playback::{AudioResource, AudioSink};
use chime_relay::voice::{DisconnectReason, VoiceConnection, VoiceGateway, VoiceState};
use tokio::sync::watch;
use tokio::time::Instant;

/// One rendered resource
#[derive(Debug, Clone)]
pub struct PlayRecord {
    pub source: PathBuf,
    pub volume: f64,
    pub started: Instant,
    pub finished: Instant,
}

/// Shared log of rendered resources
#[derive(Debug, Clone, Default)]
pub struct PlayLog(Arc<Mutex<Vec<PlayRecord>>>);

impl PlayLog {
    pub fn records(&self) -> Vec<PlayRecord> {
        self.0.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    async fn render(&self, resource: &AudioResource, play_time: Duration) {
        let started = Instant::now();
        tokio::time::sleep(play_time).await;
        self.0.lock().unwrap().push(PlayRecord {
            source: resource.source.clone(),
            volume: resource.volume,
            started,
            finished: Instant::now(),
        });
    }
}

/// Sink that records what it plays, taking `play_time` per item
pub struct RecordingSink {
    pub log: PlayLog,
    pub play_time: Duration,
    pub fail_sources: Vec<PathBuf>,
    pub panic_sources: Vec<PathBuf>,
}

impl RecordingSink {
    pub fn new(play_time: Duration) -> Self {
        Self {
            log: PlayLog::default(),
            play_time,
            fail_sources: Vec::new(),
            panic_sources: Vec::new(),
        }
    }
}

#[async_trait]
impl AudioSink for RecordingSink {
    async fn play(&self, resource: AudioResource) -> Result<()> {
        assert!(
            !self.panic_sources.contains(&resource.source),
            "output device crashed"
        );
        if self.fail_sources.contains(&resource.source) {
            return Err(chime_relay::Error::Audio("output failed".to_string()));
        }
        self.log.render(&resource, self.play_time).await;
        Ok(())
    }
}

/// Scriptable voice connection
pub struct FakeConnection {
    destination: String,
    state: watch::Sender<VoiceState>,
    pub rejoins: AtomicU32,
    rejoin_recovers: AtomicBool,
    log: PlayLog,
    play_time: Duration,
}

impl FakeConnection {
    pub fn set(&self, state: VoiceState) {
        self.state.send_replace(state);
    }

    pub fn current(&self) -> VoiceState {
        *self.state.borrow()
    }

    /// Whether `rejoin` brings the connection back to `Ready`
    pub fn rejoin_recovers(&self, recovers: bool) {
        self.rejoin_recovers.store(recovers, Ordering::SeqCst);
    }

    pub fn drop_link(&self) {
        self.set(VoiceState::Disconnected(DisconnectReason::Other { close_code: None }));
    }
}

#[async_trait]
impl VoiceConnection for FakeConnection {
    fn destination(&self) -> &str {
        &self.destination
    }

    fn subscribe(&self) -> watch::Receiver<VoiceState> {
        self.state.subscribe()
    }

    fn rejoin(&self) -> bool {
        if self.current() == VoiceState::Destroyed {
            return false;
        }
        self.rejoins.fetch_add(1, Ordering::SeqCst);
        self.set(VoiceState::Connecting);
        if self.rejoin_recovers.load(Ordering::SeqCst) {
            self.set(VoiceState::Ready);
        } else {
            self.drop_link();
        }
        true
    }

    fn destroy(&self) {
        self.set(VoiceState::Destroyed);
    }

    async fn play(&self, resource: AudioResource) -> Result<()> {
        self.log.render(&resource, self.play_time).await;
        Ok(())
    }
}

/// Gateway handing out [`FakeConnection`]s
pub struct FakeGateway {
    ready_on_connect: bool,
    play_time: Duration,
    pub log: PlayLog,
    connections: Mutex<Vec<Arc<FakeConnection>>>,
}

impl FakeGateway {
    /// Connections become ready as soon as they are opened
    pub fn ready() -> Arc<Self> {
        Arc::new(Self::new(true))
    }

    /// Connections stay in `Signalling` until told otherwise
    pub fn stalled() -> Arc<Self> {
        Arc::new(Self::new(false))
    }

    fn new(ready_on_connect: bool) -> Self {
        Self {
            ready_on_connect,
            play_time: Duration::from_millis(50),
            log: PlayLog::default(),
            connections: Mutex::new(Vec::new()),
        }
    }

    pub fn connections(&self) -> Vec<Arc<FakeConnection>> {
        self.connections.lock().unwrap().clone()
    }

    pub fn last(&self) -> Arc<FakeConnection> {
        self.connections().last().cloned().expect("no connection opened")
    }
}

#[async_trait]
impl VoiceGateway for FakeGateway {
    async fn connect(&self, destination: &str) -> Result<Arc<dyn VoiceConnection>> {
        let (state, _) = watch::channel(VoiceState::Signalling);
        let connection = Arc::new(FakeConnection {
            destination: destination.to_string(),
            state,
            rejoins: AtomicU32::new(0),
            rejoin_recovers: AtomicBool::new(true),
            log: self.log.clone(),
            play_time: self.play_time,
        });

        if self.ready_on_connect {
            connection.set(VoiceState::Connecting);
            connection.set(VoiceState::Ready);
        }

        self.connections.lock().unwrap().push(Arc::clone(&connection));
        Ok(connection as Arc<dyn VoiceConnection>)
    }
}

/// Write a short mono WAV at 48kHz
pub fn write_wav(path: &Path, millis: u32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 48_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).expect("failed to create wav");
    for _ in 0..48 * millis {
        writer.write_sample(8000_i16).expect("failed to write sample");
    }
    writer.finalize().expect("failed to finalize wav");
}

/// A sound mapping whose file exists
pub fn sound(dir: &Path, name: &str, keywords: &[&str], volume: f64) -> SoundMapping {
    let file = dir.join(name);
    write_wav(&file, 20);
    SoundMapping {
        keywords: keywords.iter().map(ToString::to_string).collect(),
        file,
        volume,
    }
}

/// Let spawned tasks run without moving a paused clock meaningfully
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
