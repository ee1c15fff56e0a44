use serde::Deserialize;
use serde_json::Value;
use shared::transformation::TransformationConfig;
use thiserror::Error;
use url::Url;

/// Response header carrying the provider's explanation of a failed render.
pub const PROVIDER_ERROR_HEADER: &str = "x-cld-error";

#[derive(Debug, Clone, Deserialize)]
pub struct MediaConfig {
    pub cloud_name: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

fn default_base_url() -> String {
    "https://res.cloudinary.com".into()
}

impl MediaConfig {
    pub fn new(cloud_name: impl Into<String>) -> Self {
        Self {
            cloud_name: cloud_name.into(),
            base_url: default_base_url(),
        }
    }
}

/// Everything the provider needs to render one variant of a stored asset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderRequest {
    pub public_id: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub config: Option<TransformationConfig>,
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("public id must not be empty")]
    MissingPublicId,
    #[error("invalid media base url '{url}': {source}")]
    InvalidBaseUrl {
        url: String,
        source: url::ParseError,
    },
    #[error("media base url '{0}' cannot carry a path")]
    OpaqueBaseUrl(String),
    #[error("{param} must not contain any of {RESERVED_CHARS:?}")]
    ReservedCharacter { param: &'static str },
}

/// Builds the delivery URL `{base}/{cloud}/image/upload/{steps...}/{public_id}`.
pub fn transformation_url(cfg: &MediaConfig, request: &RenderRequest) -> Result<Url, MediaError> {
    let public_id = request.public_id.trim();
    if public_id.is_empty() {
        return Err(MediaError::MissingPublicId);
    }

    let mut url = Url::parse(&cfg.base_url).map_err(|source| MediaError::InvalidBaseUrl {
        url: cfg.base_url.clone(),
        source,
    })?;

    let steps = transformation_steps(request)?;
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| MediaError::OpaqueBaseUrl(cfg.base_url.clone()))?;
        segments.pop_if_empty();
        segments.push(&cfg.cloud_name).push("image").push("upload");
        for step in &steps {
            segments.push(step);
        }
        for part in public_id.split('/').filter(|part| !part.is_empty()) {
            segments.push(part);
        }
    }
    Ok(url)
}

/// Same URL with a download flag, used when the user saves the rendered file.
pub fn download_url(cfg: &MediaConfig, request: &RenderRequest) -> Result<Url, MediaError> {
    let mut url = transformation_url(cfg, request)?;
    url.query_pairs_mut().append_pair("download", "1");
    Ok(url)
}

/// Delimiters of the provider's transformation syntax.
const RESERVED_CHARS: [char; 4] = [',', ';', ':', '/'];

fn transformation_steps(request: &RenderRequest) -> Result<Vec<String>, MediaError> {
    let config = request.config.as_ref();
    let mut steps = Vec::new();

    if flag(config, "restore") {
        steps.push("e_gen_restore".to_string());
    }
    if flag(config, "removeBackground") {
        steps.push("e_background_removal".to_string());
    }
    if let Some(Value::Object(remove)) = config.and_then(|c| c.get("remove")) {
        let mut params = Vec::new();
        push_text_param(&mut params, "prompt", remove.get("prompt").and_then(Value::as_str))?;
        push_bool_param(&mut params, "multiple", remove.get("multiple"));
        push_bool_param(&mut params, "remove-shadow", remove.get("removeShadow"));
        steps.push(effect("e_gen_remove", &params));
    }
    if let Some(Value::Object(recolor)) = config.and_then(|c| c.get("recolor")) {
        let mut params = Vec::new();
        push_text_param(&mut params, "prompt", recolor.get("prompt").and_then(Value::as_str))?;
        let to = recolor
            .get("to")
            .and_then(Value::as_str)
            .map(|to| to.trim().trim_start_matches('#'));
        push_text_param(&mut params, "to-color", to)?;
        push_bool_param(&mut params, "multiple", recolor.get("multiple"));
        steps.push(effect("e_gen_recolor", &params));
    }

    let mut size = Vec::new();
    if flag(config, "fillBackground") {
        size.push("b_gen_fill".to_string());
        size.push("c_pad".to_string());
    } else if request.width.is_some() || request.height.is_some() {
        size.push("c_limit".to_string());
    }
    if let Some(width) = request.width {
        size.push(format!("w_{width}"));
    }
    if let Some(height) = request.height {
        size.push(format!("h_{height}"));
    }
    if !size.is_empty() {
        steps.push(size.join(","));
    }

    Ok(steps)
}

fn flag(config: Option<&TransformationConfig>, key: &str) -> bool {
    matches!(config.and_then(|c| c.get(key)), Some(Value::Bool(true)))
}

fn effect(name: &str, params: &[String]) -> String {
    if params.is_empty() {
        name.to_string()
    } else {
        format!("{name}:{}", params.join(";"))
    }
}

fn push_text_param(
    params: &mut Vec<String>,
    name: &'static str,
    value: Option<&str>,
) -> Result<(), MediaError> {
    if let Some(text) = value {
        let text = text.trim();
        if text.contains(RESERVED_CHARS) {
            return Err(MediaError::ReservedCharacter { param: name });
        }
        if !text.is_empty() {
            params.push(format!("{name}_{text}"));
        }
    }
    Ok(())
}

fn push_bool_param(params: &mut Vec<String>, name: &str, value: Option<&Value>) {
    if let Some(Value::Bool(true)) = value {
        params.push(format!("{name}_true"));
    }
}

#[cfg(test)]
#[path = "tests/url_tests.rs"]
mod tests;
