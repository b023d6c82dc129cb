use std::fmt;

use pictor_contracts::config::{redact_credential, Configuration, GenerationMode, Style};
use serde_json::{json, Map, Value};

use crate::error::GenerationError;

pub const API_KEY_HEADER: &str = "api-key";
/// Appended to the prompt when a reference image accompanies the request.
pub const REFERENCE_IMAGE_SUFFIX: &str = " (Style reference: uploaded image)";
pub(crate) const EDIT_PRECONDITION: &str =
    "Please upload an image and create a mask before editing";
pub(crate) const EXTRACT_FAILED: &str = "Failed to extract image or mask data";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Generations,
    Edits,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Generations => "generations",
            Operation::Edits => "edits",
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub enum FormField {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        file_name: String,
        mime: String,
        bytes: Vec<u8>,
    },
}

impl FormField {
    pub fn name(&self) -> &str {
        match self {
            FormField::Text { name, .. } | FormField::File { name, .. } => name,
        }
    }

    fn text(name: &str, value: impl Into<String>) -> Self {
        FormField::Text {
            name: name.to_string(),
            value: value.into(),
        }
    }

    fn png(name: &str, file_name: &str, bytes: Vec<u8>) -> Self {
        FormField::File {
            name: name.to_string(),
            file_name: file_name.to_string(),
            mime: "image/png".to_string(),
            bytes,
        }
    }
}

impl fmt::Debug for FormField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormField::Text { name, value } => f
                .debug_struct("Text")
                .field("name", name)
                .field("value", value)
                .finish(),
            FormField::File {
                name,
                file_name,
                mime,
                bytes,
            } => f
                .debug_struct("File")
                .field("name", name)
                .field("file_name", file_name)
                .field("mime", mime)
                .field("bytes", &bytes.len())
                .finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(Value),
    Multipart(Vec<FormField>),
}

/// A fully described HTTP call, ready for a [`crate::transport::Transport`].
#[derive(Clone, PartialEq)]
pub struct ImageRequest {
    pub method: &'static str,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
    pub operation: Operation,
}

impl ImageRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

impl fmt::Debug for ImageRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers: Vec<(&str, String)> = self
            .headers
            .iter()
            .map(|(key, value)| {
                let shown = if key.eq_ignore_ascii_case(API_KEY_HEADER) {
                    redact_credential(value)
                } else {
                    value.clone()
                };
                (key.as_str(), shown)
            })
            .collect();
        f.debug_struct("ImageRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &headers)
            .field("body", &self.body)
            .field("operation", &self.operation)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditAssets {
    pub image_png: Vec<u8>,
    pub mask_png: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestAssets {
    pub reference_image: Option<Vec<u8>>,
    pub edit: Option<EditAssets>,
}

/// Deployments whose images API still accepts a `style` field.
pub fn is_legacy_family(deployment: &str) -> bool {
    let lowered = deployment.to_ascii_lowercase();
    lowered.contains("dall-e") || lowered.contains("dalle")
}

fn style_clause(style: Style, custom: &str) -> &str {
    match style {
        Style::Vivid | Style::Natural => "",
        Style::Artistic => "in an artistic and painterly style",
        Style::Photorealistic => "in a photorealistic style, like a high-quality photograph",
        Style::Cinematic => "in a cinematic style with dramatic lighting and composition",
        Style::Anime => "in anime style, Japanese animation art",
        Style::Watercolor => "in a soft watercolor painting style",
        Style::OilPainting => "in a classic oil painting style",
        Style::Sketch => "as a hand-drawn sketch or pencil drawing",
        Style::Render3d => "as a 3D computer graphics render",
        Style::Custom => custom.trim(),
    }
}

/// Prompt text and API style value for a configuration. Non-native styles are
/// folded into the prompt and the API style falls back to `vivid`.
pub fn enhance_prompt(config: &Configuration) -> (String, Style) {
    let prompt = config.prompt.trim();
    if config.style.is_native() {
        return (prompt.to_string(), config.style);
    }
    let clause = style_clause(config.style, &config.custom_style);
    let enhanced = if clause.is_empty() {
        prompt.to_string()
    } else {
        format!("{prompt} {clause}")
    };
    (enhanced, Style::Vivid)
}

pub fn endpoint_url(config: &Configuration, operation: Operation) -> String {
    let endpoint = config.endpoint.trim();
    let endpoint = endpoint.strip_suffix('/').unwrap_or(endpoint);
    format!(
        "{endpoint}/openai/deployments/{}/images/{}?api-version={}",
        config.deployment.trim(),
        operation.as_str(),
        config.api_version.trim()
    )
}

/// Turns a validated configuration into a request. Performs no I/O.
pub fn build(
    config: &Configuration,
    assets: &RequestAssets,
) -> Result<ImageRequest, GenerationError> {
    match config.mode {
        GenerationMode::ImageEdit => build_edit(config, assets),
        GenerationMode::TextToImage | GenerationMode::ImageWithReference => {
            Ok(build_generation(config, assets))
        }
    }
}

fn build_generation(config: &Configuration, assets: &RequestAssets) -> ImageRequest {
    let (mut prompt, api_style) = enhance_prompt(config);
    // The generations endpoint has no image input. A reference image only
    // annotates the prompt; its bytes are never transmitted.
    if config.mode == GenerationMode::ImageWithReference && assets.reference_image.is_some() {
        prompt.push_str(REFERENCE_IMAGE_SUFFIX);
    }

    let mut body = Map::new();
    body.insert("prompt".to_string(), Value::String(prompt));
    body.insert("size".to_string(), json!(config.size.as_str()));
    body.insert("n".to_string(), json!(config.n));
    body.insert("quality".to_string(), json!(config.quality.as_str()));
    if is_legacy_family(&config.deployment) {
        body.insert("style".to_string(), json!(api_style.as_str()));
    }

    ImageRequest {
        method: "POST",
        url: endpoint_url(config, Operation::Generations),
        headers: vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            (API_KEY_HEADER.to_string(), config.credential.trim().to_string()),
        ],
        body: RequestBody::Json(Value::Object(body)),
        operation: Operation::Generations,
    }
}

fn build_edit(
    config: &Configuration,
    assets: &RequestAssets,
) -> Result<ImageRequest, GenerationError> {
    let Some(edit) = assets.edit.as_ref() else {
        return Err(GenerationError::Precondition(EDIT_PRECONDITION.to_string()));
    };
    if edit.image_png.is_empty() || edit.mask_png.is_empty() {
        return Err(GenerationError::Precondition(EXTRACT_FAILED.to_string()));
    }

    let fields = vec![
        FormField::png("image", "image.png", edit.image_png.clone()),
        FormField::png("mask", "mask.png", edit.mask_png.clone()),
        FormField::text("prompt", config.prompt.trim()),
        FormField::text("n", config.n.to_string()),
        FormField::text("size", config.size.as_str()),
    ];

    Ok(ImageRequest {
        method: "POST",
        url: endpoint_url(config, Operation::Edits),
        headers: vec![(API_KEY_HEADER.to_string(), config.credential.trim().to_string())],
        body: RequestBody::Multipart(fields),
        operation: Operation::Edits,
    })
}
