//! Operator settings, stored as YAML next to the binary by default.

use anyhow::{bail, Context, Result};
use device_control::CameraEndpoint;
use preview::PreviewConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub const DEFAULT_SETTINGS_PATH: &str = "./settings.yaml";

/// Host value that selects the in-memory camera instead of a network one
pub const MOCK_HOST: &str = "mock";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraSettings {
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Empty when the camera has no preview stream
    #[serde(default)]
    pub preview_url: String,
    /// Names of presets the panel should not show
    #[serde(default)]
    pub hidden_presets: Vec<String>,
}

fn default_port() -> u16 {
    80
}

impl CameraSettings {
    pub fn endpoint(&self) -> CameraEndpoint {
        let endpoint = CameraEndpoint::new(&self.host, self.port, &self.username, &self.password);
        if self.preview_url.trim().is_empty() {
            endpoint
        } else {
            endpoint.with_preview_url(self.preview_url.trim())
        }
    }

    pub fn is_mock(&self) -> bool {
        self.host.eq_ignore_ascii_case(MOCK_HOST)
    }
}

/// Speed tiers, in percent of full scale
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedSettings {
    pub move_slow: u8,
    pub move_fast: u8,
    pub zoom_slow: u8,
    pub zoom_fast: u8,
}

impl Default for SpeedSettings {
    fn default() -> Self {
        Self {
            move_slow: 30,
            move_fast: 90,
            zoom_slow: 30,
            zoom_fast: 90,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewSettings {
    pub display_height: u32,
    pub display_fps: u32,
    pub min_pull_interval_ms: u64,
    pub read_retry_delay_ms: u64,
    /// Longest wait for the preview stream to open or answer
    pub open_timeout_ms: u64,
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            display_height: 200,
            display_fps: 20,
            min_pull_interval_ms: 40,
            read_retry_delay_ms: 500,
            open_timeout_ms: 5000,
        }
    }
}

impl PreviewSettings {
    pub fn pipeline_config(&self) -> PreviewConfig {
        PreviewConfig {
            display_height: self.display_height,
            min_pull_interval: Duration::from_millis(self.min_pull_interval_ms),
            read_retry_delay: Duration::from_millis(self.read_retry_delay_ms),
            open_timeout: self.open_timeout(),
        }
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    pub timeout_secs: u64,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self { timeout_secs: 5 }
    }
}

impl DeviceSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub cameras: Vec<CameraSettings>,
    #[serde(default)]
    pub speeds: SpeedSettings,
    #[serde(default)]
    pub preview: PreviewSettings,
    #[serde(default)]
    pub device: DeviceSettings,
    #[serde(skip)]
    path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cameras: vec![CameraSettings {
                name: "Camera 1".to_string(),
                host: "192.168.1.64".to_string(),
                port: default_port(),
                username: "admin".to_string(),
                password: String::new(),
                preview_url: String::new(),
                hidden_presets: Vec::new(),
            }],
            speeds: SpeedSettings::default(),
            preview: PreviewSettings::default(),
            device: DeviceSettings::default(),
            path: None,
        }
    }
}

impl Settings {
    /// Load from `CONTROL_PANEL_SETTINGS`, or `./settings.yaml`
    pub fn from_env() -> Result<Self> {
        let path = env::var("CONTROL_PANEL_SETTINGS")
            .unwrap_or_else(|_| DEFAULT_SETTINGS_PATH.to_string());
        Self::load_or_create(path)
    }

    /// Load `path`, writing a default file there first if it does not exist.
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            let mut settings = Self::default();
            settings.path = Some(path.to_path_buf());
            settings
                .save()
                .with_context(|| format!("failed to write default settings to {}", path.display()))?;
            info!(path = %path.display(), "wrote default settings file");
            return Ok(settings);
        }
        Self::load(path)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings from {}", path.display()))?;
        let mut settings = Self::parse(&text)
            .with_context(|| format!("invalid settings in {}", path.display()))?;
        settings.path = Some(path.to_path_buf());
        Ok(settings)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let settings: Self = serde_yaml::from_str(text).context("failed to parse settings")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for camera in &self.cameras {
            if camera.name.trim().is_empty() {
                bail!("camera name must not be empty");
            }
            if !names.insert(camera.name.as_str()) {
                bail!("duplicate camera name '{}'", camera.name);
            }
            if camera.host.trim().is_empty() {
                bail!("camera '{}' has no host", camera.name);
            }
            if camera.port == 0 {
                bail!("camera '{}' has port 0", camera.name);
            }
        }

        let tiers = [
            ("move_slow", self.speeds.move_slow),
            ("move_fast", self.speeds.move_fast),
            ("zoom_slow", self.speeds.zoom_slow),
            ("zoom_fast", self.speeds.zoom_fast),
        ];
        for (name, value) in tiers {
            if value > 100 {
                bail!("speed {name} must be between 0 and 100, got {value}");
            }
        }

        if self.preview.display_fps == 0 {
            bail!("preview display_fps must be greater than 0");
        }
        if self.preview.open_timeout_ms == 0 {
            bail!("preview open_timeout_ms must be greater than 0");
        }
        Ok(())
    }

    /// Where this value was loaded from, if anywhere
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn camera(&self, name: &str) -> Option<&CameraSettings> {
        self.cameras.iter().find(|c| c.name == name)
    }

    /// Replace the hidden preset names of camera `name`. Returns false if
    /// there is no such camera.
    pub fn set_hidden_presets(&mut self, name: &str, hidden: Vec<String>) -> bool {
        match self.cameras.iter_mut().find(|c| c.name == name) {
            Some(camera) => {
                camera.hidden_presets = hidden;
                true
            }
            None => false,
        }
    }

    /// Write back to the file this was loaded from.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            bail!("settings were not loaded from a file");
        };
        let yaml = serde_yaml::to_string(self).context("failed to serialize settings")?;
        let contents = format!("# Restart the control panel after editing this file\n{yaml}");
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
cameras:
  - name: Stage
    host: 10.0.0.21
    username: admin
    password: secret
    preview_url: rtsp://10.0.0.21:554/stream2
    hidden_presets: [Spare]
  - name: Pulpit
    host: mock
    port: 8080
speeds:
  move_fast: 75
"#;

    #[test]
    fn test_parse_with_defaults() {
        let settings = Settings::parse(SAMPLE).unwrap();
        assert_eq!(settings.cameras.len(), 2);

        let stage = &settings.cameras[0];
        assert_eq!(stage.port, 80);
        assert_eq!(stage.hidden_presets, vec!["Spare".to_string()]);
        assert_eq!(
            stage.endpoint().preview_url.as_deref(),
            Some("rtsp://10.0.0.21:554/stream2")
        );

        let pulpit = settings.camera("Pulpit").unwrap();
        assert!(pulpit.is_mock());
        assert_eq!(pulpit.endpoint().preview_url, None);

        assert_eq!(settings.speeds.move_fast, 75);
        assert_eq!(settings.speeds.move_slow, 30);
        assert_eq!(settings.preview, PreviewSettings::default());
        assert_eq!(settings.device.timeout(), Duration::from_secs(5));
        assert_eq!(
            settings.preview.pipeline_config().open_timeout,
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_rejects_duplicate_camera_names() {
        let yaml = "cameras:\n  - {name: A, host: h1}\n  - {name: A, host: h2}\n";
        let err = Settings::parse(yaml).unwrap_err();
        assert!(format!("{err:#}").contains("duplicate camera name"));
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        assert!(Settings::parse("speeds: {zoom_fast: 150}\n").is_err());
        assert!(Settings::parse("preview: {display_fps: 0}\n").is_err());
        assert!(Settings::parse("preview: {open_timeout_ms: 0}\n").is_err());
        assert!(Settings::parse("cameras:\n  - {name: A, host: h, port: 0}\n").is_err());
    }

    #[test]
    fn test_missing_file_gets_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.yaml");

        let settings = Settings::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(settings.cameras[0].name, "Camera 1");

        let reloaded = Settings::load(&path).unwrap();
        assert_eq!(reloaded, settings);
    }

    #[test]
    fn test_save_persists_hidden_presets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        fs::write(&path, SAMPLE).unwrap();

        let mut settings = Settings::load(&path).unwrap();
        assert!(settings.set_hidden_presets("Pulpit", vec!["Wide".to_string()]));
        assert!(!settings.set_hidden_presets("Nobody", vec![]));
        settings.save().unwrap();

        let reloaded = Settings::load(&path).unwrap();
        assert_eq!(
            reloaded.camera("Pulpit").unwrap().hidden_presets,
            vec!["Wide".to_string()]
        );
        assert_eq!(reloaded.camera("Stage").unwrap().password, "secret");
    }

    #[test]
    fn test_unsaved_settings_have_no_path() {
        assert!(Settings::default().save().is_err());
    }
}
