//! Client for the external generative model.
//!
//! Speaks the `generateContent` JSON protocol: a list of parts (text and
//! base64 inline images) in, candidate text out. Replies that are meant to be
//! data may arrive wrapped in markdown code fences; those are stripped before
//! parsing, and anything that still fails to parse is an error rather than
//! text passed through to the caller.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use std::time::Duration;

use crate::config::AiConfig;
use crate::errors::{AppError, Result};
use crate::models::Car;

const API_KEY_HEADER: &str = "x-goog-api-key";

const ANALYZE_PROMPT: &str = "Identify the vehicle in this photo. Reply with JSON only: \
{\"make\": string, \"model\": string, \"year\": number, \"label\": string} where label is \
a short human-readable name such as \"2015 Toyota Corolla\".";

/// Best guess about the vehicle in a photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleGuess {
    pub make: String,
    pub model: String,
    #[serde(default, deserialize_with = "lenient_year")]
    pub year: Option<i32>,
    #[serde(default)]
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Valuation {
    pub min_price: i64,
    pub max_price: i64,
    pub currency: String,
    #[serde(default)]
    pub summary: String,
}

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part {
    Text { text: String },
    Image { inline_data: InlineData },
}

#[derive(Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
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
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

pub struct AiGateway {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl AiGateway {
    pub fn new(config: &AiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to build AI client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.trim().to_string(),
            model: config.model.clone(),
        })
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    #[tracing::instrument(skip(self, image), fields(bytes = image.len()))]
    pub async fn analyze_image(&self, image: &[u8], mime_type: &str) -> Result<VehicleGuess> {
        let parts = vec![
            Part::Text {
                text: ANALYZE_PROMPT.to_string(),
            },
            Part::Image {
                inline_data: InlineData {
                    mime_type: mime_type.to_string(),
                    data: STANDARD.encode(image),
                },
            },
        ];

        let reply = self.generate(parts).await?;
        parse_vehicle_guess(&reply)
    }

    #[tracing::instrument(skip(self))]
    pub async fn generate_description(&self, make: &str, model: &str, year: i32) -> Result<String> {
        let prompt = format!(
            "Write a short, friendly classified-ad description (3 to 5 sentences) for a used \
             {} {} {}. Plain text only, no headings or lists.",
            year, make, model
        );

        let reply = self.generate(vec![Part::Text { text: prompt }]).await?;
        Ok(strip_code_fences(&reply).to_string())
    }

    #[tracing::instrument(skip(self, car), fields(car_id = car.id))]
    pub async fn estimate_value(&self, car: &Car) -> Result<Valuation> {
        let prompt = format!(
            "Estimate the current market price range of this used car. Make: {}. Model: {}. \
             Year: {}. Mileage: {} km. Fuel: {}. Transmission: {}. Body: {}. Engine: {} l. \
             Asking price: {}. Reply with JSON only: {{\"min_price\": number, \
             \"max_price\": number, \"currency\": string, \"summary\": string}}.",
            car.make,
            car.model,
            car.year,
            car.mileage,
            car.fuel_type,
            car.transmission,
            car.body_type,
            car.engine_size,
            car.price
        );

        let reply = self.generate(vec![Part::Text { text: prompt }]).await?;
        let valuation: Valuation = parse_json_reply(&reply)?;
        if valuation.min_price < 0 || valuation.max_price < valuation.min_price {
            return Err(AppError::ExternalService(format!(
                "AI service returned an invalid price range {}..{}",
                valuation.min_price, valuation.max_price
            )));
        }
        Ok(valuation)
    }

    async fn generate(&self, parts: Vec<Part>) -> Result<String> {
        if !self.is_configured() {
            return Err(AppError::ExternalService(
                "AI service is not configured".to_string(),
            ));
        }

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        let request = GenerateRequest {
            contents: vec![Content { parts }],
        };

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::ExternalService("AI service timed out".to_string())
                } else {
                    AppError::ExternalService(format!("AI service request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            tracing::error!("AI service returned error: {}", status);
            return Err(AppError::ExternalService(format!(
                "AI service returned {}",
                status
            )));
        }

        let body: GenerateResponse = response.json().await.map_err(|e| {
            AppError::ExternalService(format!("Failed to parse AI service response: {}", e))
        })?;

        let text = body
            .candidates
            .into_iter()
            .filter_map(|candidate| candidate.content)
            .flat_map(|content| content.parts)
            .filter_map(|part| part.text)
            .collect::<Vec<_>>()
            .join("");

        if text.trim().is_empty() {
            return Err(AppError::ExternalService(
                "AI service returned an empty reply".to_string(),
            ));
        }
        Ok(text)
    }
}

/// The body of the first fenced code block in `reply`, or the whole reply
/// trimmed when it carries no fence.
pub fn strip_code_fences(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed;
    };

    let after_fence = &trimmed[start + 3..];
    let body = match after_fence.find('\n') {
        Some(newline) => &after_fence[newline + 1..],
        None => after_fence.trim_start_matches(|c: char| c.is_ascii_alphanumeric()),
    };
    let body = match body.find("```") {
        Some(end) => &body[..end],
        None => body,
    };
    body.trim()
}

pub fn parse_json_reply<T: DeserializeOwned>(reply: &str) -> Result<T> {
    serde_json::from_str(strip_code_fences(reply)).map_err(|e| {
        tracing::warn!("AI reply was not valid JSON: {}", e);
        AppError::ExternalService(format!("AI service returned malformed data: {}", e))
    })
}

/// Parses an image-analysis reply. A reply naming neither make nor model is
/// treated as malformed.
pub fn parse_vehicle_guess(reply: &str) -> Result<VehicleGuess> {
    let mut guess: VehicleGuess = parse_json_reply(reply)?;
    guess.make = guess.make.trim().to_string();
    guess.model = guess.model.trim().to_string();
    if guess.make.is_empty() && guess.model.is_empty() {
        tracing::warn!("AI reply did not identify a vehicle");
        return Err(AppError::ExternalService(
            "AI service did not identify a vehicle".to_string(),
        ));
    }

    if guess.label.trim().is_empty() {
        guess.label = [
            guess.year.map(|y| y.to_string()).unwrap_or_default(),
            guess.make.clone(),
            guess.model.clone(),
        ]
        .iter()
        .filter(|s| !s.is_empty())
        .cloned()
        .collect::<Vec<_>>()
        .join(" ");
    }
    Ok(guess)
}

fn lenient_year<'de, D>(deserializer: D) -> std::result::Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Year {
        Number(i64),
        Float(f64),
        Text(String),
    }

    Ok(match Option::<Year>::deserialize(deserializer)? {
        Some(Year::Number(n)) => i32::try_from(n).ok(),
        Some(Year::Float(f)) if f.is_finite() => Some(f.trunc() as i32),
        Some(Year::Text(s)) => s.trim().parse::<i32>().ok(),
        _ => None,
    })
}
