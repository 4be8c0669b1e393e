//! TOML configuration file schema
//!
//! Mirrors `chime.toml` one to one. Validation happens when the file is
//! converted into a [`super::Config`].

use std::path::PathBuf;

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ChimeConfigFile {
    /// Minimum time between two accepted hits, in milliseconds
    #[serde(default)]
    pub cooldown_ms: Option<u64>,

    /// Relay server configuration
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Voice destination configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Keyword to sound mapping table, in priority order
    #[serde(default)]
    pub sounds: Vec<SoundFileEntry>,
}

/// Relay server configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// Port for the HTTP and WebSocket endpoint
    pub port: Option<u16>,

    /// Directory of static files served at `/`
    pub static_dir: Option<PathBuf>,
}

/// Voice destination configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Destination joined at startup (output device name, or "default")
    pub destination: Option<String>,
}

/// One entry of the mapping table
#[derive(Debug, Deserialize)]
pub struct SoundFileEntry {
    /// Keywords that select this sound
    pub keywords: Vec<String>,

    /// Sound file, relative to the config file's directory
    pub file: PathBuf,

    /// Playback volume in `[0, 2]`
    pub volume: Option<f64>,
}
