//! INI configuration adapter for the `[data]`, `[backtest]`, `[frequency]`
//! and `[indicators]` sections.
//!
//! Section and key lookups are case-insensitive. Load failures surface as
//! [`RuletraderError::ConfigParse`] naming the file, so the CLI can map them
//! straight to the configuration exit code.

use crate::domain::error::RuletraderError;
use crate::ports::config_port::ConfigPort;
use configparser::ini::Ini;
use std::path::Path;

/// Source label used when the configuration did not come from a file.
const INLINE_SOURCE: &str = "<inline>";

pub struct FileConfigAdapter {
    ini: Ini,
}

impl FileConfigAdapter {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, RuletraderError> {
        let path = path.as_ref();
        let mut ini = Ini::new();
        ini.load(path).map_err(|reason| RuletraderError::ConfigParse {
            file: path.display().to_string(),
            reason,
        })?;
        tracing::debug!(file = %path.display(), "loaded backtest config");
        Ok(Self { ini })
    }

    pub fn from_string(content: &str) -> Result<Self, RuletraderError> {
        let mut ini = Ini::new();
        ini.read(content.to_string())
            .map_err(|reason| RuletraderError::ConfigParse {
                file: INLINE_SOURCE.to_string(),
                reason,
            })?;
        Ok(Self { ini })
    }
}

/// Flag values accepted for boolean keys such as `run_on_last_date`.
fn flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

impl ConfigPort for FileConfigAdapter {
    fn get_string(&self, section: &str, key: &str) -> Option<String> {
        self.ini.get(section, key)
    }

    fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
        match self.ini.getint(section, key) {
            Ok(Some(v)) => v,
            _ => default,
        }
    }

    fn get_double(&self, section: &str, key: &str, default: f64) -> f64 {
        match self.ini.getfloat(section, key) {
            Ok(Some(v)) => v,
            _ => default,
        }
    }

    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        self.get_string(section, key)
            .as_deref()
            .and_then(flag)
            .unwrap_or(default)
    }

    fn section_keys(&self, section: &str) -> Vec<String> {
        let map = self.ini.get_map_ref();
        let mut keys: Vec<String> = match map.get(&section.to_lowercase()) {
            Some(entries) => entries.keys().cloned().collect(),
            None => Vec::new(),
        };
        keys.sort();
        keys
    }
}
