use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fs;
use std::path::PathBuf;

use crate::filter::DEFAULT_SKIP_EXTENSIONS;
use crate::scheduler::DEFAULT_QUEUE_MULTIPLIER;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub compression: CompressionConfig,
    pub cache: CacheConfig,
    pub formatting: FormattingConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Ceiling = multiplier x available parallelism
    pub queue_multiplier: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CompressionConfig {
    pub program: String,
    pub algorithm: String,
    pub skip_extensions: Vec<String>,
    pub low_priority: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct CacheConfig {
    /// Empty means the default location under the home directory
    pub path: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct FormattingConfig {
    pub number_comma: bool,
    pub locale: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue_multiplier: DEFAULT_QUEUE_MULTIPLIER,
        }
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            program: "compact".to_string(),
            algorithm: "LZX".to_string(),
            skip_extensions: DEFAULT_SKIP_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            low_priority: true,
        }
    }
}

impl Default for FormattingConfig {
    fn default() -> Self {
        Self {
            number_comma: true,
            locale: "en".to_string(),
        }
    }
}

thread_local! {
    static TEST_CONFIG_PATH: RefCell<Option<PathBuf>> = const { RefCell::new(None) };
}

#[cfg(test)]
pub fn set_test_config_path(path: PathBuf) {
    TEST_CONFIG_PATH.with(|p| *p.borrow_mut() = Some(path));
}

impl Config {
    pub fn config_path() -> Result<PathBuf> {
        #[cfg(test)]
        {
            if let Some(path) = TEST_CONFIG_PATH.with(|p| p.borrow().clone()) {
                return Ok(path);
            }
        }

        Ok(dirs::home_dir()
            .context("Could not find home directory")?
            .join(".lzx-sweep.toml"))
    }

    pub fn load() -> Result<Option<Config>> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&config_path).context("Failed to read config file")?;

        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;

        Ok(Some(config))
    }

    pub fn save(&self, silent: bool) -> Result<()> {
        let config_path = Self::config_path()?;
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&config_path, content).context("Failed to write config file")?;

        if !silent {
            println!("Configuration saved to: {}", config_path.display());
        }

        Ok(())
    }

    /// Resolved snapshot location.
    pub fn cache_path(&self) -> Result<PathBuf> {
        if self.cache.path.trim().is_empty() {
            crate::cache::cache_db_path()
        } else {
            Ok(PathBuf::from(self.cache.path.trim()))
        }
    }

    pub fn set_skip_extensions(&mut self, list: &str) {
        self.compression.skip_extensions = list
            .split(',')
            .map(|ext| ext.trim().trim_start_matches('.').to_string())
            .filter(|ext| !ext.is_empty())
            .collect();
    }
}

// CLI helper functions
pub fn create_default_config(overwrite: bool) -> Result<()> {
    let config = Config::default();
    if !std::fs::exists(Config::config_path()?)? || overwrite {
        config.save(true)?;

        println!("Created default configuration file.");
        println!("Edit it directly or use:");
        println!("   lzx-sweep config set <key> <value>");
        println!("   {}", Config::config_path()?.display());
    } else {
        println!("Configuration already exists.  Pass `--overwrite` to overwrite.");
    }

    Ok(())
}

pub fn show_config() -> Result<()> {
    match Config::load()? {
        Some(config) => {
            println!("Current configuration:");
            println!(
                "   Queue Multiplier: {}",
                config.scheduler.queue_multiplier
            );
            println!("   Program: {}", config.compression.program);
            println!("   Algorithm: {}", config.compression.algorithm);
            println!(
                "   Skip Extensions: {}",
                config.compression.skip_extensions.join(", ")
            );
            println!("   Low Priority: {}", config.compression.low_priority);
            println!(
                "   Cache Path: {}",
                if config.cache.path.is_empty() {
                    "(default)"
                } else {
                    config.cache.path.as_str()
                }
            );
            println!("   Number Comma: {}", config.formatting.number_comma);
            println!("   Locale: {}", config.formatting.locale);
        }
        None => {
            println!("No configuration file found.");
            println!("   Run 'lzx-sweep config init' to create one.");
        }
    }
    Ok(())
}

fn parse_bool(value: &str) -> Result<bool> {
    value
        .parse::<bool>()
        .context("Invalid boolean value. Use 'true' or 'false'")
}

pub fn set_config_value(key: &str, value: &str) -> Result<()> {
    let mut config = Config::load()?.unwrap_or_default();

    match key {
        "queue-multiplier" => {
            let multiplier = value.parse::<usize>().context("Invalid number value")?;
            if multiplier == 0 {
                anyhow::bail!("queue-multiplier must be at least 1");
            }
            config.scheduler.queue_multiplier = multiplier;
        }
        "program" => config.compression.program = value.to_string(),
        "algorithm" => config.compression.algorithm = value.to_string(),
        "skip-extensions" => config.set_skip_extensions(value),
        "low-priority" => config.compression.low_priority = parse_bool(value)?,
        "cache-path" => config.cache.path = value.to_string(),
        "number-comma" => config.formatting.number_comma = parse_bool(value)?,
        "locale" => config.formatting.locale = value.to_string(),
        _ => anyhow::bail!("Unknown config key: {}", key),
    }

    config.save(false)?;
    Ok(())
}
