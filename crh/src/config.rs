//! Harness configuration.
//!
//! Values come from built-in defaults, then an optional TOML file, then
//! `CRH_*` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crh_common::config::{EnvError, EnvParser};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{HarnessError, HarnessResult};
use crate::mock::{MOCK_CODEC_NAME, MOCK_MIME};
use crate::platform::MediaFormat;
use crate::session::StreamSettings;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Directory receiving one `.es` file per scenario.
    pub results_dir: PathBuf,
    pub file_prefix: String,
    /// Mime type used to create the encoder for each case.
    pub mime: String,
    /// Encoder name used by the loop cases.
    pub codec_name: String,
    pub width: u32,
    pub height: u32,
    pub pixel_format: u32,
    pub frame_rate: u32,
    /// Frames pushed by START_STREAM unless the scenario overrides it.
    pub frame_total: u32,
    /// Length of a HOLD step.
    pub hold_ms: u64,
    /// Pause before each case.
    pub settle_ms: u64,
    /// Upper bound on one case, setup and teardown excluded.
    pub case_timeout_ms: u64,
    pub loop_iterations: u32,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("target/crh-results"),
            file_prefix: "video_reliability_promise_".to_string(),
            mime: MOCK_MIME.to_string(),
            codec_name: MOCK_CODEC_NAME.to_string(),
            width: 320,
            height: 240,
            pixel_format: 3,
            frame_rate: 30,
            frame_total: 100,
            hold_ms: 3000,
            settle_ms: 1000,
            case_timeout_ms: 30_000,
            loop_iterations: 50,
        }
    }
}

impl HarnessConfig {
    /// Parse a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn load(path: &Path) -> HarnessResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| HarnessError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content).map_err(|source| HarnessError::Toml {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "loaded harness config");
        Ok(config)
    }

    /// Apply `CRH_*` overrides. Invalid values leave the field untouched and
    /// are returned for reporting.
    pub fn apply_env(&mut self, parser: &mut EnvParser) -> Vec<EnvError> {
        let results_dir = self.results_dir.to_string_lossy().into_owned();
        parser
            .get_path("RESULTS_DIR", &results_dir)
            .apply_to(&mut self.results_dir);
        parser.get_string("MIME", &self.mime).apply_to(&mut self.mime);
        parser
            .get_string("CODEC_NAME", &self.codec_name)
            .apply_to(&mut self.codec_name);
        parser
            .get_in_range("WIDTH", self.width, 16, 7680)
            .apply_to(&mut self.width);
        parser
            .get_in_range("HEIGHT", self.height, 16, 4320)
            .apply_to(&mut self.height);
        parser
            .get_in_range("FRAME_RATE", self.frame_rate, 1, 240)
            .apply_to(&mut self.frame_rate);
        parser
            .get_in_range("FRAME_TOTAL", self.frame_total, 0, 100_000)
            .apply_to(&mut self.frame_total);
        parser
            .get_in_range("HOLD_MS", self.hold_ms, 0, 600_000)
            .apply_to(&mut self.hold_ms);
        parser
            .get_in_range("SETTLE_MS", self.settle_ms, 0, 60_000)
            .apply_to(&mut self.settle_ms);
        parser
            .get_in_range("CASE_TIMEOUT_MS", self.case_timeout_ms, 1, 3_600_000)
            .apply_to(&mut self.case_timeout_ms);
        parser
            .get_in_range("LOOP_ITERATIONS", self.loop_iterations, 1, 100_000)
            .apply_to(&mut self.loop_iterations);
        parser.take_errors()
    }

    /// Defaults, then `path` if given, then the environment.
    pub fn resolve(path: Option<&Path>) -> HarnessResult<(Self, Vec<EnvError>)> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        let errors = config.apply_env(&mut EnvParser::new());
        Ok((config, errors))
    }

    pub fn media_format(&self) -> MediaFormat {
        MediaFormat {
            width: self.width,
            height: self.height,
            pixel_format: self.pixel_format,
            frame_rate: self.frame_rate,
        }
    }

    /// Stream parameters for a case; `frame_total` overrides the configured
    /// frame count.
    pub fn stream_settings(&self, frame_total: Option<u32>) -> StreamSettings {
        StreamSettings {
            width: self.width,
            height: self.height,
            frame_rate: self.frame_rate,
            frame_count: frame_total.unwrap_or(self.frame_total),
        }
    }

    pub fn hold(&self) -> Duration {
        Duration::from_millis(self.hold_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn case_timeout(&self) -> Duration {
        Duration::from_millis(self.case_timeout_ms)
    }

    #[must_use]
    pub fn with_results_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.results_dir = dir.into();
        self
    }

    /// No settle pause between cases.
    #[must_use]
    pub fn without_settle(mut self) -> Self {
        self.settle_ms = 0;
        self
    }
}
