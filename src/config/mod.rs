//! Configuration management for chime relay
//!
//! A single TOML file describes the keyword to sound mapping table, the hit
//! cooldown and the relay endpoint. Loading is all-or-nothing: any missing or
//! malformed entry is a startup error.

pub mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use crate::matcher::Trigger;
use crate::playback::MAX_VOLUME;
use crate::{Error, Result};

use file::ChimeConfigFile;

/// Default relay port
pub const DEFAULT_PORT: u16 = 3000;

/// Default cooldown between accepted hits
pub const DEFAULT_COOLDOWN_MS: u64 = 1000;

/// Upper bound for the configured cooldown (one hour)
const MAX_COOLDOWN_MS: u64 = 60 * 60 * 1000;

/// Chime relay configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Minimum time between two accepted hits
    pub cooldown: Duration,

    /// Relay server configuration
    pub server: ServerConfig,

    /// Voice destination configuration
    pub voice: VoiceConfig,

    /// Keyword to sound mapping table; the first entry is the fallback
    pub sounds: Vec<SoundMapping>,
}

/// Relay server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,

    /// Path to static files directory (listening UI)
    pub static_dir: Option<PathBuf>,
}

/// Voice destination configuration
#[derive(Debug, Clone, Default)]
pub struct VoiceConfig {
    /// Destination joined at startup
    pub destination: Option<String>,
}

/// A configured sound and the keywords that select it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SoundMapping {
    /// Keywords, as written in the configuration
    pub keywords: Vec<String>,

    /// Resolved path of the sound file
    pub file: PathBuf,

    /// Default playback volume in `[0, 2]`
    pub volume: f64,
}

impl SoundMapping {
    /// Case-insensitive exact keyword match
    #[must_use]
    pub fn has_keyword(&self, keyword: &str) -> bool {
        let keyword = keyword.trim().to_lowercase();
        self.keywords.iter().any(|k| k.to_lowercase() == keyword)
    }
}

/// Default location of the configuration file
///
/// Uses `~/.config/chime/chime.toml` on Linux
#[must_use]
pub fn default_config_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "chime").map_or_else(
        || PathBuf::from("chime.toml"),
        |d| d.config_dir().join("chime.toml"),
    )
}

impl Config {
    /// Load configuration from `path`, or the default location
    ///
    /// Environment overrides (`CHIME_PORT`, `CHIME_VOICE_DESTINATION`) are
    /// applied after the file is parsed.
    ///
    /// # Errors
    ///
    /// Returns error if the file is missing, unparsable or invalid
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map_or_else(default_config_path, Path::to_path_buf);

        let contents = std::fs::read_to_string(&path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut config = Self::from_toml(&contents, base_dir)?;
        config.apply_env_overrides()?;

        tracing::debug!(
            path = %path.display(),
            sounds = config.sounds.len(),
            cooldown_ms = config.cooldown.as_millis(),
            "configuration loaded"
        );

        Ok(config)
    }

    /// Parse and validate configuration text
    ///
    /// Relative sound paths are resolved against `base_dir`.
    ///
    /// # Errors
    ///
    /// Returns error if the text is not valid TOML or fails validation
    pub fn from_toml(contents: &str, base_dir: &Path) -> Result<Self> {
        let file: ChimeConfigFile = toml::from_str(contents)?;
        Self::from_file(file, base_dir)
    }

    fn from_file(file: ChimeConfigFile, base_dir: &Path) -> Result<Self> {
        let cooldown_ms = file.cooldown_ms.unwrap_or(DEFAULT_COOLDOWN_MS);
        if cooldown_ms > MAX_COOLDOWN_MS {
            return Err(Error::Config(format!(
                "cooldown_ms must be at most {MAX_COOLDOWN_MS}, got {cooldown_ms}"
            )));
        }

        if file.sounds.is_empty() {
            return Err(Error::Config(
                "at least one [[sounds]] entry is required".to_string(),
            ));
        }

        let sounds = file
            .sounds
            .into_iter()
            .enumerate()
            .map(|(index, entry)| validate_sound(index, entry, base_dir))
            .collect::<Result<Vec<_>>>()?;

        let static_dir = file.server.static_dir.map(|dir| {
            if dir.is_absolute() {
                dir
            } else {
                base_dir.join(dir)
            }
        });

        Ok(Self {
            cooldown: Duration::from_millis(cooldown_ms),
            server: ServerConfig {
                port: file.server.port.unwrap_or(DEFAULT_PORT),
                static_dir,
            },
            voice: VoiceConfig {
                destination: file
                    .voice
                    .destination
                    .filter(|d| !d.trim().is_empty()),
            },
            sounds,
        })
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(port) = std::env::var("CHIME_PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| Error::Config(format!("CHIME_PORT is not a port: {port}")))?;
        }

        if let Ok(destination) = std::env::var("CHIME_VOICE_DESTINATION") {
            if !destination.trim().is_empty() {
                self.voice.destination = Some(destination);
            }
        }

        Ok(())
    }

    /// Build the trigger table, one trigger per configured keyword
    #[must_use]
    pub fn triggers(&self) -> Vec<Trigger> {
        self.sounds
            .iter()
            .flat_map(|sound| {
                sound
                    .keywords
                    .iter()
                    .map(|keyword| Trigger::new(keyword, sound.volume))
            })
            .collect()
    }

    /// Cooldown in whole milliseconds
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn cooldown_ms(&self) -> u64 {
        self.cooldown.as_millis() as u64
    }
}

fn validate_sound(
    index: usize,
    entry: file::SoundFileEntry,
    base_dir: &Path,
) -> Result<SoundMapping> {
    let keywords: Vec<String> = entry
        .keywords
        .into_iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect();

    if keywords.is_empty() {
        return Err(Error::Config(format!(
            "sounds[{index}] needs at least one non-blank keyword"
        )));
    }

    if entry.file.as_os_str().is_empty() {
        return Err(Error::Config(format!("sounds[{index}] has an empty file")));
    }

    let volume = entry.volume.unwrap_or(1.0);
    if !volume.is_finite() || !(0.0..=MAX_VOLUME).contains(&volume) {
        return Err(Error::Config(format!(
            "sounds[{index}] volume must be within [0, {MAX_VOLUME}], got {volume}"
        )));
    }

    let file = if entry.file.is_absolute() {
        entry.file
    } else {
        base_dir.join(entry.file)
    };

    Ok(SoundMapping {
        keywords,
        file,
        volume,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
cooldown_ms = 1500

[server]
port = 4000

[voice]
destination = "default"

[[sounds]]
keywords = ["bell", "Ring"]
file = "sounds/bell.mp3"

[[sounds]]
keywords = ["horn"]
file = "/abs/horn.wav"
volume = 0.5
"#;

    #[test]
    fn parses_full_file() {
        let config = Config::from_toml(SAMPLE, Path::new("/etc/chime")).unwrap();

        assert_eq!(config.cooldown, Duration::from_millis(1500));
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.voice.destination.as_deref(), Some("default"));
        assert_eq!(config.sounds.len(), 2);
        assert_eq!(config.sounds[0].file, PathBuf::from("/etc/chime/sounds/bell.mp3"));
        assert!((config.sounds[0].volume - 1.0).abs() < f64::EPSILON);
        assert_eq!(config.sounds[1].file, PathBuf::from("/abs/horn.wav"));
    }

    #[test]
    fn defaults_apply() {
        let config = Config::from_toml(
            "[[sounds]]\nkeywords = [\"a\"]\nfile = \"a.wav\"\n",
            Path::new("."),
        )
        .unwrap();

        assert_eq!(config.cooldown_ms(), DEFAULT_COOLDOWN_MS);
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert!(config.voice.destination.is_none());
    }

    #[test]
    fn rejects_empty_table() {
        let err = Config::from_toml("cooldown_ms = 10", Path::new(".")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn rejects_blank_keywords() {
        let toml = "[[sounds]]\nkeywords = [\"  \"]\nfile = \"a.wav\"\n";
        assert!(Config::from_toml(toml, Path::new(".")).is_err());
    }

    #[test]
    fn rejects_out_of_range_volume() {
        let toml = "[[sounds]]\nkeywords = [\"a\"]\nfile = \"a.wav\"\nvolume = 2.5\n";
        assert!(Config::from_toml(toml, Path::new(".")).is_err());
    }

    #[test]
    fn rejects_wrong_types() {
        let toml = "[[sounds]]\nkeywords = \"a\"\nfile = \"a.wav\"\n";
        assert!(matches!(
            Config::from_toml(toml, Path::new(".")),
            Err(Error::Toml(_))
        ));
    }

    #[test]
    fn triggers_follow_configuration_order() {
        let config = Config::from_toml(SAMPLE, Path::new(".")).unwrap();
        let keywords: Vec<_> = config.triggers().into_iter().map(|t| t.keyword).collect();
        assert_eq!(keywords, ["bell", "Ring", "horn"]);
    }

    #[test]
    fn keyword_match_ignores_case() {
        let config = Config::from_toml(SAMPLE, Path::new(".")).unwrap();
        assert!(config.sounds[0].has_keyword("RING"));
        assert!(config.sounds[0].has_keyword(" bell "));
        assert!(!config.sounds[0].has_keyword("bel"));
    }
}
