use std::ops::RangeInclusive;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("OPENAI_API_KEY environment variable required")]
    MissingApiKey,
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("MIN_PANELS ({min}) must not exceed MAX_PANELS ({max})")]
    PanelBounds { min: usize, max: usize },
}

/// Runtime settings, read from the process environment (and `.env` when `main` loads it).
#[derive(Debug, Clone)]
pub struct Settings {
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub text_model: String,
    pub image_model: String,
    pub image_width: u32,
    pub image_height: u32,
    pub image_quality: String,
    pub min_panels: usize,
    pub max_panels: usize,
    pub host: String,
    pub port: u16,
    pub max_concurrent_jobs: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_base_url: "https://api.openai.com/v1".to_string(),
            text_model: "gpt-4o".to_string(),
            image_model: "dall-e-3".to_string(),
            image_width: 1024,
            image_height: 1024,
            image_quality: "standard".to_string(),
            min_panels: 2,
            max_panels: 6,
            host: "0.0.0.0".to_string(),
            port: 8001,
            max_concurrent_jobs: 4,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from an arbitrary key lookup; `from_env` passes `std::env::var`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let text = |key: &str, default: String| lookup(key).filter(|v| !v.trim().is_empty()).unwrap_or(default);

        let settings = Self {
            openai_api_key: lookup("OPENAI_API_KEY").filter(|v| !v.trim().is_empty()),
            openai_base_url: text("OPENAI_API_BASE", defaults.openai_base_url),
            text_model: text("TEXT_MODEL", defaults.text_model),
            image_model: text("IMAGE_MODEL", defaults.image_model),
            image_width: parse_or(&lookup, "IMAGE_WIDTH", defaults.image_width)?,
            image_height: parse_or(&lookup, "IMAGE_HEIGHT", defaults.image_height)?,
            image_quality: text("IMAGE_QUALITY", defaults.image_quality),
            min_panels: parse_or(&lookup, "MIN_PANELS", defaults.min_panels)?,
            max_panels: parse_or(&lookup, "MAX_PANELS", defaults.max_panels)?,
            host: text("HOST", defaults.host),
            port: parse_or(&lookup, "PORT", defaults.port)?,
            max_concurrent_jobs: parse_or(&lookup, "MAX_CONCURRENT_JOBS", defaults.max_concurrent_jobs)?,
        };

        if settings.min_panels > settings.max_panels {
            return Err(ConfigError::PanelBounds { min: settings.min_panels, max: settings.max_panels });
        }
        if settings.max_concurrent_jobs == 0 {
            return Err(ConfigError::Invalid { key: "MAX_CONCURRENT_JOBS", value: "0".into() });
        }
        Ok(settings)
    }

    pub fn panel_range(&self) -> RangeInclusive<usize> {
        self.min_panels..=self.max_panels
    }

    /// Size string in the `WIDTHxHEIGHT` form the image API expects.
    pub fn image_size(&self) -> String {
        format!("{}x{}", self.image_width, self.image_height)
    }

    /// Returns the credential or the configuration failure that blocks any pipeline run.
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.openai_api_key.as_deref().ok_or(ConfigError::MissingApiKey)
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_environment_is_empty() {
        let settings = Settings::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(settings.panel_range(), 2..=6);
        assert_eq!(settings.image_size(), "1024x1024");
        assert_eq!(settings.port, 8001);
        assert_eq!(settings.require_api_key(), Err(ConfigError::MissingApiKey));
    }

    #[test]
    fn blank_api_key_counts_as_missing() {
        let settings = Settings::from_lookup(lookup_from(&[("OPENAI_API_KEY", "   ")])).unwrap();
        assert!(settings.openai_api_key.is_none());
    }

    #[test]
    fn overrides_are_parsed() {
        let settings = Settings::from_lookup(lookup_from(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("MAX_PANELS", "8"),
            ("IMAGE_WIDTH", "512"),
            ("IMAGE_HEIGHT", "768"),
            ("PORT", "9000"),
        ]))
        .unwrap();
        assert_eq!(settings.require_api_key(), Ok("sk-test"));
        assert_eq!(settings.max_panels, 8);
        assert_eq!(settings.image_size(), "512x768");
        assert_eq!(settings.port, 9000);
    }

    #[test]
    fn rejects_bad_numbers_and_inverted_bounds() {
        let err = Settings::from_lookup(lookup_from(&[("PORT", "eighty")])).unwrap_err();
        assert_eq!(err, ConfigError::Invalid { key: "PORT", value: "eighty".into() });

        let err = Settings::from_lookup(lookup_from(&[("MIN_PANELS", "5"), ("MAX_PANELS", "3")])).unwrap_err();
        assert_eq!(err, ConfigError::PanelBounds { min: 5, max: 3 });
    }
}
