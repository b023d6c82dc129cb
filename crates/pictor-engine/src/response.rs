use pictor_contracts::history::ImageSource;
use serde_json::Value;

use crate::error::GenerationError;
use crate::transport::HttpReply;

const MAX_ERROR_CHARS: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationResponse {
    pub created: Option<i64>,
    pub images: Vec<ImageSource>,
}

/// Maps a raw reply onto images or a typed failure. Pure.
pub fn interpret(reply: &HttpReply) -> Result<GenerationResponse, GenerationError> {
    if !reply.is_success() {
        return Err(GenerationError::Api {
            status: reply.status,
            message: api_error_message(reply),
        });
    }

    let payload: Value = serde_json::from_str(&reply.body)
        .map_err(|err| GenerationError::InvalidResponse(err.to_string()))?;
    let images: Vec<ImageSource> = payload
        .get("data")
        .and_then(Value::as_array)
        .map(|rows| rows.iter().filter_map(image_source).collect())
        .unwrap_or_default();
    if images.is_empty() {
        return Err(GenerationError::EmptyResult);
    }

    Ok(GenerationResponse {
        created: payload.get("created").and_then(Value::as_i64),
        images,
    })
}

fn image_source(row: &Value) -> Option<ImageSource> {
    let obj = row.as_object()?;
    if let Some(url) = obj.get("url").and_then(Value::as_str).filter(|url| !url.is_empty()) {
        return Some(ImageSource::Url {
            url: url.to_string(),
        });
    }
    obj.get("b64_json")
        .and_then(Value::as_str)
        .filter(|b64| !b64.is_empty())
        .map(|b64| ImageSource::Inline {
            b64_json: b64.to_string(),
        })
}

fn api_error_message(reply: &HttpReply) -> String {
    serde_json::from_str::<Value>(&reply.body)
        .ok()
        .and_then(|payload| {
            payload
                .pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|message| !message.is_empty())
                .map(|message| truncate_text(message, MAX_ERROR_CHARS))
        })
        .unwrap_or_else(|| {
            format!("API Error: {} {}", reply.status, reply.status_text)
                .trim_end()
                .to_string()
        })
}

/// Shortens `value` to `max_chars` characters, marking the cut with `…`.
pub fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn reply(status: u16, status_text: &str, body: Value) -> HttpReply {
        HttpReply {
            status,
            status_text: status_text.to_string(),
            body: body.to_string(),
        }
    }

    #[test]
    fn success_collects_url_and_inline_images() -> anyhow::Result<()> {
        let parsed = interpret(&reply(
            200,
            "OK",
            json!({
                "created": 1700000000,
                "data": [
                    {"url": "https://img.example/1.png"},
                    {"b64_json": "AAAA"},
                    {"revised_prompt": "nothing usable"}
                ]
            }),
        ))?;
        assert_eq!(parsed.created, Some(1_700_000_000));
        assert_eq!(
            parsed.images,
            vec![
                ImageSource::Url {
                    url: "https://img.example/1.png".to_string()
                },
                ImageSource::Inline {
                    b64_json: "AAAA".to_string()
                },
            ]
        );
        Ok(())
    }

    #[test]
    fn empty_data_is_empty_result() {
        let err = interpret(&reply(200, "OK", json!({"created": 1, "data": []}))).unwrap_err();
        assert_eq!(err, GenerationError::EmptyResult);
        assert_eq!(err.to_string(), "No images returned from API");

        let err = interpret(&reply(200, "OK", json!({"created": 1}))).unwrap_err();
        assert_eq!(err, GenerationError::EmptyResult);
    }

    #[test]
    fn api_error_uses_server_message() {
        let err = interpret(&reply(
            400,
            "Bad Request",
            json!({"error": {"code": "content_filter", "message": "Prompt was rejected"}}),
        ))
        .unwrap_err();
        assert_eq!(
            err,
            GenerationError::Api {
                status: 400,
                message: "Prompt was rejected".to_string()
            }
        );
    }

    #[test]
    fn api_error_falls_back_to_status_text() {
        let err = interpret(&HttpReply {
            status: 503,
            status_text: "Service Unavailable".to_string(),
            body: "<html>down</html>".to_string(),
        })
        .unwrap_err();
        assert_eq!(err.to_string(), "API Error: 503 Service Unavailable");
    }

    #[test]
    fn garbage_success_body_is_invalid_response() {
        let err = interpret(&HttpReply {
            status: 200,
            status_text: "OK".to_string(),
            body: "not json".to_string(),
        })
        .unwrap_err();
        assert_eq!(err.kind(), "invalid_response");
    }

    #[test]
    fn truncate_counts_characters() {
        assert_eq!(truncate_text("short", 10), "short");
        assert_eq!(truncate_text("abcdef", 3), "abc…");
        assert_eq!(truncate_text("ééééé", 4), "éééé…");
    }
}
