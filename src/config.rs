use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::str::FromStr;

use crate::{HlsError, Result};

/// Files probed by [`HlsConfig::load`], in order.
const CONFIG_PATHS: [&str; 2] = ["./hlsio.toml", "./config.toml"];

/// Top level configuration shared by the transmuxer, ABR and buffer controllers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HlsConfig {
    /// Run the transmuxer on its own task instead of inline.
    pub enable_worker: bool,
    /// Largest gap (seconds) treated as contiguous buffer.
    pub max_buffer_hole: f64,
    pub abr: AbrConfig,
    pub remux: RemuxConfig,
    pub buffer: BufferConfig,
}

/// Bandwidth estimation and level selection tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AbrConfig {
    pub ewma_fast_live: f64,
    pub ewma_slow_live: f64,
    pub ewma_fast_vod: f64,
    pub ewma_slow_vod: f64,
    /// Estimate (bits/s) used until enough samples were collected.
    pub ewma_default_estimate: f64,
    /// Share of the estimate usable when staying on or going below the current level.
    pub bandwidth_factor: f64,
    /// Share of the estimate usable when switching up.
    pub bandwidth_up_factor: f64,
    pub max_with_real_bitrate: bool,
    pub max_starvation_delay: f64,
    pub max_loading_delay: f64,
    pub min_auto_bitrate: u64,
    pub abandon_check_interval_ms: u64,
    /// Share of the measured load rate trusted when projecting a lower level fetch.
    pub abandon_conservative_factor: f64,
    /// Buffer health, in fragment durations, above which no abort is considered.
    pub abandon_buffer_fragments: f64,
    /// Share of the fragment duration that must elapse before the abort check runs.
    pub abandon_min_progress: f64,
}

/// Timestamp and gap handling applied while remuxing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemuxConfig {
    pub max_audio_frames_drift: f64,
    pub stretch_short_video_track: bool,
    pub force_key_frame_on_discontinuity: bool,
}

/// Sink append policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub append_error_max_retry: u32,
    /// Seconds of back buffer kept on live streams, unbounded when `None`.
    pub live_back_buffer_length: Option<f64>,
    pub live_duration_infinity: bool,
}

impl Default for HlsConfig {
    fn default() -> Self {
        Self {
            enable_worker: true,
            max_buffer_hole: 0.5,
            abr: AbrConfig::default(),
            remux: RemuxConfig::default(),
            buffer: BufferConfig::default(),
        }
    }
}

impl Default for AbrConfig {
    fn default() -> Self {
        Self {
            ewma_fast_live: 3.0,
            ewma_slow_live: 9.0,
            ewma_fast_vod: 3.0,
            ewma_slow_vod: 9.0,
            ewma_default_estimate: 5e5,
            bandwidth_factor: 0.95,
            bandwidth_up_factor: 0.7,
            max_with_real_bitrate: false,
            max_starvation_delay: 4.0,
            max_loading_delay: 4.0,
            min_auto_bitrate: 0,
            abandon_check_interval_ms: 100,
            abandon_conservative_factor: 0.8,
            abandon_buffer_fragments: 2.0,
            abandon_min_progress: 0.5,
        }
    }
}

impl Default for RemuxConfig {
    fn default() -> Self {
        Self {
            max_audio_frames_drift: 1.0,
            stretch_short_video_track: false,
            force_key_frame_on_discontinuity: true,
        }
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            append_error_max_retry: 3,
            live_back_buffer_length: None,
            live_duration_infinity: false,
        }
    }
}

impl HlsConfig {
    /// Builds the configuration from defaults, then the first config file
    /// found, then `HLSIO_*` environment variables.
    pub fn load() -> Result<Self> {
        let mut config = CONFIG_PATHS
            .iter()
            .map(Path::new)
            .find(|path| path.exists())
            .map(Self::from_file)
            .transpose()?
            .unwrap_or_default();

        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        log::debug!("loading config from {}", path.as_ref().display());
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| HlsError::Config(e.to_string()))
    }

    /// Applies the supported `HLSIO_*` overrides.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(v) = env_value("HLSIO_ENABLE_WORKER")? {
            self.enable_worker = v;
        }
        if let Some(v) = env_value("HLSIO_MAX_BUFFER_HOLE")? {
            self.max_buffer_hole = v;
        }
        if let Some(v) = env_value("HLSIO_ABR_EWMA_DEFAULT_ESTIMATE")? {
            self.abr.ewma_default_estimate = v;
        }
        if let Some(v) = env_value("HLSIO_ABR_BANDWIDTH_FACTOR")? {
            self.abr.bandwidth_factor = v;
        }
        if let Some(v) = env_value("HLSIO_ABR_BANDWIDTH_UP_FACTOR")? {
            self.abr.bandwidth_up_factor = v;
        }
        if let Some(v) = env_value("HLSIO_APPEND_ERROR_MAX_RETRY")? {
            self.buffer.append_error_max_retry = v;
        }
        if let Some(v) = env_value::<f64>("HLSIO_LIVE_BACK_BUFFER_LENGTH")? {
            self.buffer.live_back_buffer_length = Some(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let abr = &self.abr;
        for (name, half_life) in [
            ("ewma_fast_live", abr.ewma_fast_live),
            ("ewma_slow_live", abr.ewma_slow_live),
            ("ewma_fast_vod", abr.ewma_fast_vod),
            ("ewma_slow_vod", abr.ewma_slow_vod),
        ] {
            if half_life <= 0.0 {
                return Err(HlsError::Config(format!("{} must be positive", name)));
            }
        }
        for (name, factor) in [
            ("bandwidth_factor", abr.bandwidth_factor),
            ("bandwidth_up_factor", abr.bandwidth_up_factor),
            ("abandon_conservative_factor", abr.abandon_conservative_factor),
        ] {
            if !(factor > 0.0 && factor <= 1.0) {
                return Err(HlsError::Config(format!("{} must be in (0, 1]", name)));
            }
        }
        if self.max_buffer_hole < 0.0 {
            return Err(HlsError::Config("max_buffer_hole must not be negative".into()));
        }
        Ok(())
    }
}

fn env_value<T: FromStr>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| HlsError::Config(format!("invalid value for {}: {}", key, raw))),
        Err(_) => Ok(None),
    }
}

/// Creates a default config template file if it doesn't exist
pub fn create_default_config_template<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    if !path.as_ref().exists() {
        let template = r#"# hlsio configuration
# Every key is optional; missing keys keep their defaults.

enable_worker = true
max_buffer_hole = 0.5

[abr]
ewma_fast_live = 3.0
ewma_slow_live = 9.0
ewma_fast_vod = 3.0
ewma_slow_vod = 9.0
ewma_default_estimate = 500000.0
bandwidth_factor = 0.95
bandwidth_up_factor = 0.7

[remux]
max_audio_frames_drift = 1.0
force_key_frame_on_discontinuity = true

[buffer]
append_error_max_retry = 3
# live_back_buffer_length = 30.0
"#;
        std::fs::write(path, template)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = HlsConfig::from_toml_str(
            r#"
            enable_worker = false

            [abr]
            bandwidth_up_factor = 0.5
            "#,
        )
        .unwrap();

        assert!(!config.enable_worker);
        assert_eq!(config.abr.bandwidth_up_factor, 0.5);
        assert_eq!(config.abr.bandwidth_factor, 0.95);
        assert_eq!(config.buffer, BufferConfig::default());
    }

    #[test]
    fn test_template_parses() {
        let dir = std::env::temp_dir().join(format!("hlsio-template-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("hlsio.toml");
        let _ = std::fs::remove_file(&path);

        create_default_config_template(&path).unwrap();
        let config = HlsConfig::from_file(&path).unwrap();
        assert_eq!(config, HlsConfig::default());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_env_override() {
        env::set_var("HLSIO_APPEND_ERROR_MAX_RETRY", "7");
        let mut config = HlsConfig::default();
        config.apply_env().unwrap();
        env::remove_var("HLSIO_APPEND_ERROR_MAX_RETRY");
        assert_eq!(config.buffer.append_error_max_retry, 7);
    }

    #[test]
    fn test_validate_rejects_bad_factor() {
        let mut config = HlsConfig::default();
        config.abr.bandwidth_up_factor = 1.5;
        assert!(config.validate().is_err());

        config.abr.bandwidth_up_factor = 0.7;
        config.abr.ewma_slow_vod = 0.0;
        assert!(config.validate().is_err());
    }
}
