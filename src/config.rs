//! Top-level configuration, loadable from YAML.
//!
//! Every section is optional; missing keys keep their defaults.
//!
//! ```yaml
//! imu:
//!   gyro_noise_density: 1.6968e-4
//! buffer:
//!   max_duration_s: 10.0
//! alignment:
//!   estimate_scale: true
//! window:
//!   min_keyframes: 6
//! ```

use std::fs::File;
use std::path::Path;

use anyhow::{ensure, Context, Result};
use serde::Deserialize;

use crate::alignment::AlignmentConfig;
use crate::imu::{BufferConfig, ImuParams};
use crate::system::WindowConfig;

/// Configuration for the whole bootstrap pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    pub imu: ImuParams,
    pub buffer: BufferConfig,
    pub alignment: AlignmentConfig,
    pub window: WindowConfig,
}

impl BootstrapConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml).context("Failed to parse bootstrap config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config: Self = serde_yaml::from_reader(
            File::open(path).with_context(|| format!("Failed to open {:?}", path))?,
        )
        .with_context(|| format!("Failed to parse {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.imu.validate().context("imu")?;
        self.buffer.validate().context("buffer")?;
        self.alignment.validate().context("alignment")?;
        self.window.validate().context("window")?;
        ensure!(
            self.window.min_keyframes > self.alignment.min_intervals,
            "window.min_keyframes {} must exceed alignment.min_intervals {}",
            self.window.min_keyframes,
            self.alignment.min_intervals
        );
        Ok(())
    }
}
