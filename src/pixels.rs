//! Ad-pixel tracking settings.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PixelSettings {
    pub facebook_pixel_id: Option<String>,
    /// Conversions API token. Write-only: reads return a masked value.
    pub facebook_access_token: Option<String>,
    pub google_measurement_id: Option<String>,
    pub google_ads_conversion_id: Option<String>,
    pub tiktok_pixel_id: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

struct Patterns {
    facebook: Regex,
    ga4: Regex,
    google_ads: Regex,
    tiktok: Regex,
}

fn patterns() -> &'static Patterns {
    static P: OnceLock<Patterns> = OnceLock::new();
    P.get_or_init(|| Patterns {
        facebook: Regex::new(r"^\d{15,16}$").expect("facebook regex is valid"),
        ga4: Regex::new(r"^G-[A-Z0-9]{4,}$").expect("ga4 regex is valid"),
        google_ads: Regex::new(r"^AW-\d+$").expect("google ads regex is valid"),
        tiktok: Regex::new(r"^[A-Z0-9]{20}$").expect("tiktok regex is valid"),
    })
}

fn clean(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl PixelSettings {
    /// Trims every field, uppercases ids whose format is uppercase, and
    /// validates formats. Returns every problem found.
    pub fn normalized(self) -> Result<Self, Vec<String>> {
        let p = patterns();
        let mut settings = Self {
            facebook_pixel_id: clean(self.facebook_pixel_id),
            facebook_access_token: clean(self.facebook_access_token),
            google_measurement_id: clean(self.google_measurement_id).map(|v| v.to_uppercase()),
            google_ads_conversion_id: clean(self.google_ads_conversion_id)
                .map(|v| v.to_uppercase()),
            tiktok_pixel_id: clean(self.tiktok_pixel_id).map(|v| v.to_uppercase()),
            enabled: self.enabled,
        };

        let checks = [
            (&settings.facebook_pixel_id, &p.facebook, "Facebook pixel ID must be 15-16 digits"),
            (&settings.google_measurement_id, &p.ga4, "Google measurement ID must look like G-XXXXXXX"),
            (&settings.google_ads_conversion_id, &p.google_ads, "Google Ads ID must look like AW-123456789"),
            (&settings.tiktok_pixel_id, &p.tiktok, "TikTok pixel ID must be 20 characters"),
        ];
        let errors: Vec<String> = checks
            .iter()
            .filter_map(|(value, re, msg)| match value {
                Some(v) if !re.is_match(v) => Some(msg.to_string()),
                _ => None,
            })
            .collect();

        // Tracking cannot be on without something to fire.
        settings.enabled &= settings.has_any_pixel();

        if settings.facebook_access_token.is_some() && settings.facebook_pixel_id.is_none() {
            return Err(vec![
                "Facebook access token requires a Facebook pixel ID".to_string()
            ]);
        }

        if errors.is_empty() {
            Ok(settings)
        } else {
            Err(errors)
        }
    }

    /// Copy safe to return to the browser.
    pub fn masked(mut self) -> Self {
        self.facebook_access_token = self.facebook_access_token.map(|t| mask_secret(&t));
        self
    }

    pub fn has_any_pixel(&self) -> bool {
        self.facebook_pixel_id.is_some()
            || self.google_measurement_id.is_some()
            || self.google_ads_conversion_id.is_some()
            || self.tiktok_pixel_id.is_some()
    }
}

/// Keeps the last four characters of a secret.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 4 {
        return "••••".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("••••{}", tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> PixelSettings {
        PixelSettings {
            facebook_pixel_id: Some(" 123456789012345 ".to_string()),
            facebook_access_token: Some("EAAGsecrettoken1234".to_string()),
            google_measurement_id: Some("g-abc123xyz".to_string()),
            google_ads_conversion_id: Some("aw-987654321".to_string()),
            tiktok_pixel_id: Some("c4abcdefghij12345678".to_string()),
            enabled: true,
        }
    }

    #[test]
    fn test_normalizes_valid_settings() {
        let s = valid().normalized().unwrap();
        assert_eq!(s.facebook_pixel_id.as_deref(), Some("123456789012345"));
        assert_eq!(s.google_measurement_id.as_deref(), Some("G-ABC123XYZ"));
        assert_eq!(s.google_ads_conversion_id.as_deref(), Some("AW-987654321"));
        assert_eq!(s.tiktok_pixel_id.as_deref(), Some("C4ABCDEFGHIJ12345678"));
        assert!(s.has_any_pixel());
    }

    #[test]
    fn test_collects_all_format_errors() {
        let s = PixelSettings {
            facebook_pixel_id: Some("12ab".to_string()),
            google_measurement_id: Some("UA-1234".to_string()),
            ..Default::default()
        };
        let errors = s.normalized().unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_token_requires_pixel() {
        let s = PixelSettings {
            facebook_access_token: Some("token".to_string()),
            ..Default::default()
        };
        assert!(s.normalized().is_err());
    }

    #[test]
    fn test_blank_fields_become_none() {
        let s = PixelSettings {
            tiktok_pixel_id: Some("   ".to_string()),
            ..Default::default()
        }
        .normalized()
        .unwrap();
        assert_eq!(s.tiktok_pixel_id, None);
        assert!(!s.has_any_pixel());
    }

    #[test]
    fn test_enabled_without_pixels_is_turned_off() {
        let s = PixelSettings {
            google_measurement_id: Some("  ".to_string()),
            enabled: true,
            ..Default::default()
        }
        .normalized()
        .unwrap();
        assert!(!s.enabled);

        assert!(valid().normalized().unwrap().enabled);
    }

    #[test]
    fn test_mask_keeps_tail() {
        let s = valid().masked();
        assert_eq!(s.facebook_access_token.as_deref(), Some("••••1234"));
        assert_eq!(mask_secret("abc"), "••••");
    }
}
