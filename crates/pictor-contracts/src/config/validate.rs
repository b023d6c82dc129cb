use std::sync::OnceLock;

use regex::Regex;
use tracing::warn;

use super::settings::{Configuration, Style};

pub const MIN_IMAGES: u32 = 1;
pub const MAX_IMAGES: u32 = 10;

const ENDPOINT_PATTERN: &str =
    r"^https://[a-zA-Z0-9-]+\.(openai\.azure\.com|cognitiveservices\.azure\.com)/?$";

/// First unmet invariant of a [`Configuration`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Azure OpenAI Endpoint is required")]
    MissingEndpoint,
    #[error(
        "Invalid Azure OpenAI Endpoint format. Expected: https://your-resource.openai.azure.com or https://your-resource.cognitiveservices.azure.com"
    )]
    MalformedEndpoint,
    #[error("API Key is required")]
    MissingCredential,
    #[error("Deployment Name is required")]
    MissingDeployment,
    #[error("API Version is required")]
    MissingApiVersion,
    #[error("Prompt is required")]
    MissingPrompt,
    #[error("Custom style description is required when using custom style")]
    MissingCustomStyle,
    #[error("Number of images must be between 1 and 10")]
    CountOutOfRange(u32),
}

/// A pattern that fails to compile matches nothing, so validation reports
/// the endpoint as malformed instead of panicking.
pub fn endpoint_matches(endpoint: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| match Regex::new(ENDPOINT_PATTERN) {
        Ok(pattern) => Some(pattern),
        Err(err) => {
            warn!(error = %err, "endpoint pattern failed to compile");
            None
        }
    });
    pattern
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(endpoint))
}

/// Checks fields in a fixed order and reports the first failure.
///
/// Free-text fields are judged after trimming, so `"   "` counts as missing.
pub fn validate(config: &Configuration) -> Result<(), ValidationError> {
    let endpoint = config.endpoint.trim();
    if endpoint.is_empty() {
        return Err(ValidationError::MissingEndpoint);
    }
    if !endpoint_matches(endpoint) {
        return Err(ValidationError::MalformedEndpoint);
    }
    if config.credential.trim().is_empty() {
        return Err(ValidationError::MissingCredential);
    }
    if config.deployment.trim().is_empty() {
        return Err(ValidationError::MissingDeployment);
    }
    if config.api_version.trim().is_empty() {
        return Err(ValidationError::MissingApiVersion);
    }
    if config.prompt.trim().is_empty() {
        return Err(ValidationError::MissingPrompt);
    }
    if config.style == Style::Custom && config.custom_style.trim().is_empty() {
        return Err(ValidationError::MissingCustomStyle);
    }
    if !(MIN_IMAGES..=MAX_IMAGES).contains(&config.n) {
        return Err(ValidationError::CountOutOfRange(config.n));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::{GenerationMode, ImageSize, Quality};

    fn valid() -> Configuration {
        Configuration {
            endpoint: "https://foo.openai.azure.com".to_string(),
            credential: "k".to_string(),
            deployment: "gpt-image-1.5".to_string(),
            api_version: "2024-01-01".to_string(),
            prompt: "a cat".to_string(),
            size: ImageSize::Square,
            quality: Quality::Standard,
            style: Style::Vivid,
            custom_style: String::new(),
            n: 2,
            mode: GenerationMode::TextToImage,
        }
    }

    #[test]
    fn reference_configuration_passes() {
        assert_eq!(validate(&valid()), Ok(()));
    }

    #[test]
    fn count_range_is_inclusive() {
        for n in MIN_IMAGES..=MAX_IMAGES {
            assert_eq!(validate(&Configuration { n, ..valid() }), Ok(()), "n={n}");
        }
        for n in [0, 11, 12, 100, u32::MAX] {
            assert_eq!(
                validate(&Configuration { n, ..valid() }),
                Err(ValidationError::CountOutOfRange(n))
            );
        }
    }

    #[test]
    fn endpoint_pattern_is_reused_across_calls() {
        assert!(Regex::new(ENDPOINT_PATTERN).is_ok());
        assert!(endpoint_matches("https://foo.openai.azure.com"));
        assert!(endpoint_matches("https://foo.openai.azure.com/"));
        assert!(!endpoint_matches("https://foo.openai.azure.com.evil.net"));
    }

    #[test]
    fn endpoint_rules() {
        let missing = Configuration {
            endpoint: "  ".to_string(),
            ..valid()
        };
        assert_eq!(validate(&missing), Err(ValidationError::MissingEndpoint));

        for bad in [
            "http://foo.openai.azure.com",
            "https://foo.example.com",
            "https://foo.openai.azure.com/openai",
            "https://foo_bar.openai.azure.com",
        ] {
            let config = Configuration {
                endpoint: bad.to_string(),
                ..valid()
            };
            assert_eq!(
                validate(&config),
                Err(ValidationError::MalformedEndpoint),
                "{bad}"
            );
        }

        for good in [
            "https://foo.openai.azure.com/",
            "https://my-res-1.cognitiveservices.azure.com",
        ] {
            let config = Configuration {
                endpoint: good.to_string(),
                ..valid()
            };
            assert_eq!(validate(&config), Ok(()), "{good}");
        }
    }

    #[test]
    fn first_unmet_invariant_wins() {
        let config = Configuration {
            credential: String::new(),
            prompt: String::new(),
            n: 0,
            ..valid()
        };
        assert_eq!(validate(&config), Err(ValidationError::MissingCredential));

        let config = Configuration {
            api_version: String::new(),
            prompt: String::new(),
            ..valid()
        };
        assert_eq!(validate(&config), Err(ValidationError::MissingApiVersion));
    }

    #[test]
    fn missing_fields_are_reported() {
        let cases = [
            (
                Configuration {
                    deployment: " ".to_string(),
                    ..valid()
                },
                ValidationError::MissingDeployment,
            ),
            (
                Configuration {
                    prompt: "   ".to_string(),
                    ..valid()
                },
                ValidationError::MissingPrompt,
            ),
        ];
        for (config, expected) in cases {
            assert_eq!(validate(&config), Err(expected));
        }
    }

    #[test]
    fn custom_style_needs_description() {
        let config = Configuration {
            style: Style::Custom,
            custom_style: "  ".to_string(),
            ..valid()
        };
        assert_eq!(validate(&config), Err(ValidationError::MissingCustomStyle));

        let config = Configuration {
            style: Style::Custom,
            custom_style: "neon noir".to_string(),
            ..valid()
        };
        assert_eq!(validate(&config), Ok(()));
    }

    #[test]
    fn count_message_names_bounds() {
        assert_eq!(
            ValidationError::CountOutOfRange(0).to_string(),
            "Number of images must be between 1 and 10"
        );
    }
}
