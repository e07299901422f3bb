use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use log::{debug, error, warn};
use reqwest::{Client as HttpClient, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::{BillDetails, BillItem, ImageCategory};

use super::{ClassificationError, Classifier, RawCategorization};
use crate::config::Settings;

const DEFAULT_CURRENCY: &str = "INR";

pub const CATEGORIZATION_PROMPT: &str = r#"Analyze this image and categorize it. Provide your response as a JSON object with the following structure:

{
    "categories": [
        {
            "name": "category_name",
            "confidence": 0.95,
            "description": "Brief description of why this category applies"
        }
    ],
    "bill_recognised": true,
    "bill_details": {
        "total_amount": 1234.56,
        "currency": "INR",
        "tax": 50.00,
        "vendor_name": "Store Name",
        "date": "2024-12-25",
        "items": [
            {
                "name": "Item description",
                "quantity": 2,
                "price": 100.00,
                "currency": "INR"
            }
        ]
    },
    "summary": "Brief summary of what the image contains"
}

Rules:
1. bill_recognised is true if the image is a bill, receipt, invoice, or any document showing prices or transactions.
2. When bill_recognised is true, include bill_details with at least total_amount; otherwise set bill_details to null.
3. Extract every visible line item with its price. Use quantity 1 when none is shown.
4. Detect the currency from the bill (INR, USD, EUR, ...).
5. Prefer the categories food, fuel and medical when they apply.

Provide at least 1 and up to 5 categories, ordered by confidence (highest first).
Only respond with the JSON object, no additional text."#;

#[derive(Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text { text: &'a str },
    InlineData { inline_data: InlineData<'a> },
}

#[derive(Serialize)]
struct InlineData<'a> {
    mime_type: &'a str,
    data: String,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

/// Google Gemini `generateContent` client.
#[derive(Clone)]
pub struct GeminiClient {
    http_client: HttpClient,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: String, model: String, base_url: String) -> Self {
        Self {
            http_client: HttpClient::new(),
            api_key,
            model,
            base_url,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.gemini_api_key.clone(),
            settings.gemini_model.clone(),
            settings.gemini_base_url.clone(),
        )
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }

    async fn generate(&self, parts: Vec<Part<'_>>) -> Result<String, ClassificationError> {
        let body = GenerateContentRequest {
            contents: vec![Content { parts }],
        };

        let response = self
            .http_client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!("Gemini API returned {}: {}", status, truncate(&text, 500));
            return Err(status_error(status, &text));
        }

        let parsed: GenerateContentResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                transport_error(e)
            } else {
                ClassificationError::malformed(format!("Unreadable Gemini response: {}", e))
            }
        })?;

        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(ClassificationError::malformed("Gemini returned no content"));
        }
        Ok(text)
    }
}

#[async_trait]
impl Classifier for GeminiClient {
    async fn classify(
        &self,
        image: &[u8],
        mime_type: &str,
    ) -> Result<RawCategorization, ClassificationError> {
        if !self.is_configured() {
            return Err(ClassificationError::unavailable(
                "Gemini API is not configured. Please set GEMINI_API_KEY.",
            ));
        }

        debug!(
            "Sending {} bytes ({}) to Gemini model {}",
            image.len(),
            mime_type,
            self.model
        );
        let parts = vec![
            Part::Text {
                text: CATEGORIZATION_PROMPT,
            },
            Part::InlineData {
                inline_data: InlineData {
                    mime_type,
                    data: STANDARD.encode(image),
                },
            },
        ];
        let text = self.generate(parts).await?;
        parse_categorization(&text)
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn check_health(&self) -> bool {
        if !self.is_configured() {
            return false;
        }
        match self.generate(vec![Part::Text { text: "Reply with 'ok'" }]).await {
            Ok(text) => text.to_lowercase().contains("ok"),
            Err(e) => {
                warn!("Gemini health check failed: {}", e);
                false
            }
        }
    }
}

fn transport_error(err: reqwest::Error) -> ClassificationError {
    if err.is_timeout() {
        ClassificationError::timeout(format!("Gemini API request timed out: {}", err))
    } else {
        ClassificationError::unavailable(format!("Gemini API request failed: {}", err))
    }
}

fn status_error(status: StatusCode, body: &str) -> ClassificationError {
    let message = format!("Gemini API returned {}: {}", status, truncate(body, 200));
    match status {
        StatusCode::TOO_MANY_REQUESTS => ClassificationError::rate_limited(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            ClassificationError::timeout(message)
        }
        _ => ClassificationError::unavailable(message),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Removes a surrounding markdown code fence, if the model added one.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    let body = trimmed.split_once('\n').map(|(_, rest)| rest).unwrap_or("");
    body.rsplit_once("```")
        .map(|(inner, _)| inner)
        .unwrap_or(body)
        .trim()
}

pub fn parse_categorization(raw_text: &str) -> Result<RawCategorization, ClassificationError> {
    let cleaned = strip_code_fence(raw_text);
    let data: Value = serde_json::from_str(cleaned).map_err(|e| {
        error!(
            "Failed to parse Gemini response: {} (raw: {})",
            e,
            truncate(cleaned, 500)
        );
        ClassificationError::malformed(format!("Failed to parse Gemini response: {}", e))
    })?;

    let object = data
        .as_object()
        .ok_or_else(|| ClassificationError::malformed("Gemini response is not a JSON object"))?;

    let categories = object
        .get("categories")
        .and_then(Value::as_array)
        .map(|entries| entries.iter().filter_map(parse_category).collect())
        .unwrap_or_default();

    let bill_details = object
        .get("bill_details")
        .filter(|v| v.is_object())
        .map(parse_bill_details);

    Ok(RawCategorization {
        categories,
        summary: string_field(&data, "summary").unwrap_or_default(),
        bill_recognised: object.get("bill_recognised").map(lenient_bool).unwrap_or(false),
        bill_details,
    })
}

fn parse_category(entry: &Value) -> Option<ImageCategory> {
    entry.as_object()?;
    Some(ImageCategory {
        name: string_field(entry, "name").unwrap_or_else(|| "unknown".to_string()),
        confidence: entry.get("confidence").and_then(lenient_f64).unwrap_or(0.5) as f32,
        description: string_field(entry, "description").unwrap_or_default(),
    })
}

fn parse_bill_details(raw: &Value) -> BillDetails {
    let items = raw
        .get("items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter(|item| item.get("price").is_some())
                .map(|item| BillItem {
                    name: string_field(item, "name").unwrap_or_else(|| "Unknown item".to_string()),
                    quantity: item
                        .get("quantity")
                        .and_then(lenient_f64)
                        .map(|q| q as u32)
                        .filter(|q| *q > 0)
                        .unwrap_or(1),
                    price: item.get("price").and_then(lenient_f64).unwrap_or(0.0),
                    currency: string_field(item, "currency")
                        .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
                })
                .collect()
        })
        .unwrap_or_default();

    BillDetails {
        total_amount: raw.get("total_amount").and_then(lenient_f64).unwrap_or(0.0),
        currency: string_field(raw, "currency").unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
        items,
        tax: raw.get("tax").and_then(lenient_f64).unwrap_or(0.0),
        vendor_name: string_field(raw, "vendor_name").unwrap_or_default(),
        date: string_field(raw, "date").unwrap_or_default(),
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn lenient_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn lenient_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::ErrorKind;

    #[test]
    fn parses_fenced_bill_response() {
        let text = r#"```json
{
  "categories": [{"name": "food", "confidence": 0.92, "description": "restaurant bill"}],
  "bill_recognised": "true",
  "bill_details": {
    "total_amount": "450.50",
    "vendor_name": "Dosa Corner",
    "items": [
      {"name": "Masala dosa", "quantity": 2.0, "price": 120},
      {"name": "Napkin"}
    ]
  },
  "summary": "A restaurant receipt"
}
```"#;

        let parsed = parse_categorization(text).unwrap();

        assert_eq!(parsed.categories.len(), 1);
        assert_eq!(parsed.categories[0].name, "food");
        assert!(parsed.bill_recognised);
        assert_eq!(parsed.summary, "A restaurant receipt");
        let bill = parsed.bill_details.unwrap();
        assert_eq!(bill.total_amount, 450.50);
        assert_eq!(bill.currency, "INR");
        assert_eq!(bill.items.len(), 1);
        assert_eq!(bill.items[0].quantity, 2);
        assert_eq!(bill.items[0].price, 120.0);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let parsed = parse_categorization(r#"{"categories": [{}], "bill_details": null}"#).unwrap();
        assert_eq!(parsed.categories[0].name, "unknown");
        assert_eq!(parsed.categories[0].confidence, 0.5);
        assert!(!parsed.bill_recognised);
        assert!(parsed.bill_details.is_none());
    }

    #[test]
    fn invalid_json_is_malformed() {
        let err = parse_categorization("I think this is a cat").unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedResponse);

        let err = parse_categorization("[1, 2, 3]").unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedResponse);
    }

    #[test]
    fn status_codes_map_to_error_kinds() {
        assert_eq!(
            status_error(StatusCode::TOO_MANY_REQUESTS, "quota").kind,
            ErrorKind::RemoteRateLimited
        );
        assert_eq!(
            status_error(StatusCode::GATEWAY_TIMEOUT, "").kind,
            ErrorKind::RemoteTimeout
        );
        assert_eq!(
            status_error(StatusCode::SERVICE_UNAVAILABLE, "").kind,
            ErrorKind::RemoteUnavailable
        );
    }

    #[test]
    fn unfenced_text_is_only_trimmed() {
        assert_eq!(strip_code_fence("  {\"a\": 1}\n"), "{\"a\": 1}");
        assert_eq!(strip_code_fence("```\n{}\n```"), "{}");
    }

    #[tokio::test]
    async fn unconfigured_client_fails_without_calling_out() {
        let client = GeminiClient::new(
            String::new(),
            "model".into(),
            "http://127.0.0.1:9".into(),
        );
        assert!(!client.is_configured());
        let err = client.classify(b"img", "image/png").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::RemoteUnavailable);
        assert!(!client.check_health().await);
    }
}
