use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};

pub const DEFAULT_DEPLOYMENT: &str = "gpt-image-1.5";
pub const DEFAULT_API_VERSION: &str = "2025-04-01-preview";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ImageSize {
    #[default]
    #[serde(rename = "1024x1024")]
    Square,
    #[serde(rename = "1024x1536")]
    Portrait,
    #[serde(rename = "1536x1024")]
    Landscape,
    #[serde(rename = "1024x1792")]
    TallPortrait,
    #[serde(rename = "1792x1024")]
    WideLandscape,
}

impl ImageSize {
    pub const ALL: [ImageSize; 5] = [
        ImageSize::Square,
        ImageSize::Portrait,
        ImageSize::Landscape,
        ImageSize::TallPortrait,
        ImageSize::WideLandscape,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ImageSize::Square => "1024x1024",
            ImageSize::Portrait => "1024x1536",
            ImageSize::Landscape => "1536x1024",
            ImageSize::TallPortrait => "1024x1792",
            ImageSize::WideLandscape => "1792x1024",
        }
    }

    pub fn dimensions(self) -> (u32, u32) {
        match self {
            ImageSize::Square => (1024, 1024),
            ImageSize::Portrait => (1024, 1536),
            ImageSize::Landscape => (1536, 1024),
            ImageSize::TallPortrait => (1024, 1792),
            ImageSize::WideLandscape => (1792, 1024),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    #[default]
    Standard,
    Hd,
    Low,
    Medium,
    High,
}

impl Quality {
    pub const ALL: [Quality; 5] = [
        Quality::Standard,
        Quality::Hd,
        Quality::Low,
        Quality::Medium,
        Quality::High,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Quality::Standard => "standard",
            Quality::Hd => "hd",
            Quality::Low => "low",
            Quality::Medium => "medium",
            Quality::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Style {
    #[default]
    Vivid,
    Natural,
    Artistic,
    Photorealistic,
    Cinematic,
    Anime,
    Watercolor,
    OilPainting,
    Sketch,
    #[serde(rename = "3d-render")]
    Render3d,
    Custom,
}

impl Style {
    pub const ALL: [Style; 11] = [
        Style::Vivid,
        Style::Natural,
        Style::Artistic,
        Style::Photorealistic,
        Style::Cinematic,
        Style::Anime,
        Style::Watercolor,
        Style::OilPainting,
        Style::Sketch,
        Style::Render3d,
        Style::Custom,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Style::Vivid => "vivid",
            Style::Natural => "natural",
            Style::Artistic => "artistic",
            Style::Photorealistic => "photorealistic",
            Style::Cinematic => "cinematic",
            Style::Anime => "anime",
            Style::Watercolor => "watercolor",
            Style::OilPainting => "oil-painting",
            Style::Sketch => "sketch",
            Style::Render3d => "3d-render",
            Style::Custom => "custom",
        }
    }

    /// Styles the images API accepts as a `style` value.
    pub fn is_native(self) -> bool {
        matches!(self, Style::Vivid | Style::Natural)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GenerationMode {
    #[default]
    TextToImage,
    #[serde(alias = "image-with-text")]
    ImageWithReference,
    ImageEdit,
}

impl GenerationMode {
    pub const ALL: [GenerationMode; 3] = [
        GenerationMode::TextToImage,
        GenerationMode::ImageWithReference,
        GenerationMode::ImageEdit,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            GenerationMode::TextToImage => "text-to-image",
            GenerationMode::ImageWithReference => "image-with-reference",
            GenerationMode::ImageEdit => "image-edit",
        }
    }
}

fn parse_choice<T: Copy>(
    raw: &str,
    all: &[T],
    label: &str,
    name: impl Fn(T) -> &'static str,
) -> Result<T, String> {
    let wanted = raw.trim().to_ascii_lowercase();
    all.iter()
        .copied()
        .find(|choice| name(*choice) == wanted)
        .ok_or_else(|| {
            let known = all.iter().map(|choice| name(*choice)).collect::<Vec<_>>();
            format!("unsupported {label} '{raw}' (expected one of: {})", known.join(", "))
        })
}

impl FromStr for ImageSize {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        parse_choice(raw, &Self::ALL, "size", Self::as_str)
    }
}

impl FromStr for Quality {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        parse_choice(raw, &Self::ALL, "quality", Self::as_str)
    }
}

impl FromStr for Style {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        parse_choice(raw, &Self::ALL, "style", Self::as_str)
    }
}

impl FromStr for GenerationMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw.trim().eq_ignore_ascii_case("image-with-text") {
            return Ok(GenerationMode::ImageWithReference);
        }
        parse_choice(raw, &Self::ALL, "generation mode", Self::as_str)
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Style {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything one generation request needs, as entered by the user.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(rename = "apiEndpoint")]
    pub endpoint: String,
    #[serde(rename = "apiKey")]
    pub credential: String,
    #[serde(rename = "deploymentName")]
    pub deployment: String,
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub prompt: String,
    pub size: ImageSize,
    pub quality: Quality,
    pub style: Style,
    #[serde(rename = "customStyle")]
    pub custom_style: String,
    #[serde(rename = "numImages", deserialize_with = "deserialize_count")]
    pub n: u32,
    #[serde(rename = "generationMode")]
    pub mode: GenerationMode,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            credential: String::new(),
            deployment: DEFAULT_DEPLOYMENT.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            prompt: String::new(),
            size: ImageSize::default(),
            quality: Quality::default(),
            style: Style::default(),
            custom_style: String::new(),
            n: 1,
            mode: GenerationMode::default(),
        }
    }
}

impl Configuration {
    /// Copy with surrounding whitespace removed from every free-text field.
    pub fn normalized(&self) -> Self {
        Self {
            endpoint: self.endpoint.trim().to_string(),
            credential: self.credential.trim().to_string(),
            deployment: self.deployment.trim().to_string(),
            api_version: self.api_version.trim().to_string(),
            prompt: self.prompt.trim().to_string(),
            custom_style: self.custom_style.trim().to_string(),
            ..self.clone()
        }
    }

    pub fn with_prompt(&self, prompt: &str) -> Self {
        Self {
            prompt: prompt.to_string(),
            ..self.clone()
        }
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("endpoint", &self.endpoint)
            .field("credential", &redact_credential(&self.credential))
            .field("deployment", &self.deployment)
            .field("api_version", &self.api_version)
            .field("prompt", &self.prompt)
            .field("size", &self.size)
            .field("quality", &self.quality)
            .field("style", &self.style)
            .field("custom_style", &self.custom_style)
            .field("n", &self.n)
            .field("mode", &self.mode)
            .finish()
    }
}

/// Short stable fingerprint of a credential, safe to print or log.
pub fn redact_credential(credential: &str) -> String {
    let trimmed = credential.trim();
    if trimmed.is_empty() {
        return "[EMPTY]".to_string();
    }
    let digest = Sha256::digest(trimmed.as_bytes());
    format!("[REDACTED:{}]", hex::encode(&digest[..4]))
}

/// Older snapshots stored the image count as form text ("2").
pub(crate) fn deserialize_count<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawCount {
        Number(u32),
        Text(String),
    }

    match RawCount::deserialize(deserializer)? {
        RawCount::Number(value) => Ok(value),
        RawCount::Text(text) => text.trim().parse::<u32>().map_err(serde::de::Error::custom),
    }
}
