//! Flat `key=value` configuration files.
//!
//! Values are made of alphanumerics and `: \ / . _ - ,`. A value starts at
//! the first such character after `=` and runs until the first character
//! outside that set. Anything after that is ignored, so trailing comments and
//! quotes need no special handling. Lines starting with `#` are skipped.
//!
//! List values are read with [`Config::get_list`], which applies the same
//! rule to every comma separated item, so `a, b` and `a,b` read alike.

use std::fmt::Display;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use log::debug;

use crate::errors::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    entries: Vec<Entry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    key: String,
    value: String,
    // everything after `=`, for list values
    raw: String,
}

impl Config {
    /// Parses configuration text, one `key=value` per line.
    pub fn parse(text: &str) -> Self {
        Config {
            entries: text.lines().filter_map(parse_line).collect(),
        }
    }

    /// Reads and parses the file at `path`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        debug!("{} configuration file successfully opened", path.display());
        Ok(Self::parse(&text))
    }

    /// Value of the first line defining `key`.
    pub fn get(&self, key: &str) -> Result<&str, ConfigError> {
        let value = self.entry(key)?.value.as_str();
        debug!("{} is {}", key, value);
        Ok(value)
    }

    /// Comma separated items of `key`, each cut like a single value.
    /// Empty items are dropped.
    pub fn get_list(&self, key: &str) -> Result<Vec<String>, ConfigError> {
        let raw = self.entry(key)?.raw.as_str();
        let raw = raw.split_once('#').map_or(raw, |(items, _)| items);
        let items: Vec<String> = raw
            .split(',')
            .map(extract_value)
            .filter(|item| !item.is_empty())
            .map(String::from)
            .collect();
        debug!("{} is {:?}", key, items);
        Ok(items)
    }

    /// Value of `key` parsed as `T`.
    pub fn get_parsed<T>(&self, key: &str) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        let value = self.get(key)?;
        value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key: key.to_owned(),
            value: value.to_owned(),
            reason: e.to_string(),
        })
    }

    /// Like [`Config::get_parsed`], but a missing key yields `default`.
    pub fn get_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get_parsed(key) {
            Err(ConfigError::MissingKey(_)) => Ok(default),
            other => other,
        }
    }

    /// Whether any line defines `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|entry| entry.key == key)
    }

    fn entry(&self, key: &str) -> Result<&Entry, ConfigError> {
        self.entries
            .iter()
            .find(|entry| entry.key == key)
            .ok_or_else(|| ConfigError::MissingKey(key.to_owned()))
    }
}

fn parse_line(line: &str) -> Option<Entry> {
    let line = line.trim_start();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (key, raw) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some(Entry {
        key: key.to_owned(),
        value: extract_value(raw).to_owned(),
        raw: raw.trim().to_owned(),
    })
}

fn extract_value(raw: &str) -> &str {
    let Some(start) = raw.find(is_value_char) else {
        return "";
    };
    let value = &raw[start..];
    let end = value.find(|c: char| !is_value_char(c)).unwrap_or(value.len());
    &value[..end]
}

fn is_value_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, ':' | '\\' | '/' | '.' | '_' | '-' | ',')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_is_trimmed_to_allowed_characters() {
        let config = Config::parse("log_level = \"debug\"   # verbose\npath=/var/log/app.log;\n");
        assert_eq!(config.get("log_level").unwrap(), "debug");
        assert_eq!(config.get("path").unwrap(), "/var/log/app.log");
    }

    #[test]
    fn test_value_without_value_characters_is_empty() {
        let config = Config::parse("empty=   \r\nquoted=\"\"\n");
        assert_eq!(config.get("empty").unwrap(), "");
        assert_eq!(config.get("quoted").unwrap(), "");
    }

    #[test]
    fn test_first_definition_wins() {
        let config = Config::parse("port=10\nport=20\n");
        assert_eq!(config.get_parsed::<u16>("port").unwrap(), 10);
    }

    #[test]
    fn test_keys_match_exactly() {
        let config = Config::parse("heartbeat_seconds=9\n# seconds=1\n");
        assert!(matches!(
            config.get("seconds"),
            Err(ConfigError::MissingKey(key)) if key == "seconds"
        ));
        assert!(config.contains("heartbeat_seconds"));
    }

    #[test]
    fn test_parse_errors_name_the_key() {
        let config = Config::parse("heartbeat_seconds=soon\n");
        let err = config.get_parsed::<u32>("heartbeat_seconds").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, ref value, .. }
            if key == "heartbeat_seconds" && value == "soon"));
    }

    #[test]
    fn test_get_or_defaults_only_when_missing() {
        let config = Config::parse("a=1\nb=x\n");
        assert_eq!(config.get_or("a", 5u32).unwrap(), 1);
        assert_eq!(config.get_or("c", 5u32).unwrap(), 5);
        assert!(config.get_or("b", 5u32).is_err());
    }

    #[test]
    fn test_list_items_may_be_spaced() {
        let config = Config::parse(
            "spaced=a::b, c::d ,e # f, g\npacked=a::b,c::d\nsingle=x\nblank=\n",
        );
        assert_eq!(config.get_list("spaced").unwrap(), vec!["a::b", "c::d", "e"]);
        assert_eq!(config.get_list("packed").unwrap(), vec!["a::b", "c::d"]);
        assert_eq!(config.get_list("single").unwrap(), vec!["x"]);
        assert!(config.get_list("blank").unwrap().is_empty());
        // the single-value reading still stops at the first space
        assert_eq!(config.get("spaced").unwrap(), "a::b,");
        assert!(matches!(config.get_list("none"), Err(ConfigError::MissingKey(_))));
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = Config::from_file("/nonexistent/sigtimer.conf").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/sigtimer.conf"));
    }
}
