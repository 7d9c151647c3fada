use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use nanobanana_contracts::options::{AspectRatio, GenerationOptions};
use nanobanana_contracts::prompt::{build_prompt, subject_text};
use reqwest::blocking::Client as HttpClient;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cancel::CancelToken;
use crate::codec;
use crate::config::{Credentials, EngineConfig};
use crate::error::{error_chain_text, truncate_text, ErrorKind, Failure, Result};
use crate::raster::{ImageOrigin, RasterImage};

const BODY_EXCERPT_CHARS: usize = 500;
const CANCEL_POLL: Duration = Duration::from_millis(25);

const GENERATION_SYSTEM_INSTRUCTION: &str = "You are an expert image generation AI. When given a 3D viewport reference image and a text prompt, generate a new enhanced image that transforms the scene according to the prompt. Always return actual image data, not just descriptions.";
const ANALYSIS_SYSTEM_INSTRUCTION: &str = "You are an experienced 3D lighting and rendering supervisor. Review viewport captures and give concrete, actionable advice.";
const ANALYSIS_INSTRUCTION: &str = "Analyze this 3D viewport render. Assess composition, lighting, materials and render settings, then list specific improvements the artist should make, most impactful first.";

/// One image-to-image request, derived per call and never mutated.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub encoded_image: String,
    pub mime_type: &'static str,
    pub prompt: String,
    pub subject: String,
    pub style: String,
    pub aspect_ratio: Option<AspectRatio>,
    pub seed: Option<i64>,
}

impl GenerationRequest {
    pub fn new(
        image: &RasterImage,
        options: &GenerationOptions,
        scene_context: Option<&str>,
    ) -> Result<Self> {
        Ok(Self {
            encoded_image: codec::encode_png_base64(image)?,
            mime_type: codec::PNG_MIME,
            prompt: build_prompt(options, scene_context),
            subject: subject_text(options),
            style: options.style.trim().to_string(),
            aspect_ratio: options.aspect_ratio(),
            seed: options.explicit_seed(),
        })
    }

    pub fn instruction_text(&self) -> String {
        format!(
            "Based on this 3D viewport image, generate a new enhanced image.\n\nUser prompt: {}\n\nPlease transform this 3D scene into: {}\n\nStyle: {}\n\nGenerate a photorealistic image that transforms the reference viewport into the requested style while maintaining the basic composition and camera angle.",
            self.prompt, self.subject, self.style
        )
    }
}

#[derive(Debug, Serialize)]
struct RequestBody {
    contents: Vec<RequestContent>,
    #[serde(rename = "generationConfig")]
    generation_config: RequestGenerationConfig,
    #[serde(rename = "systemInstruction")]
    system_instruction: RequestContent,
}

#[derive(Debug, Serialize)]
struct RequestContent {
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RequestPart {
    Text { text: String },
    InlineData { inline_data: RequestInlineData },
}

#[derive(Debug, Serialize)]
struct RequestInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct RequestGenerationConfig {
    response_modalities: Vec<&'static str>,
    temperature: f64,
    #[serde(rename = "candidateCount")]
    candidate_count: u32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_config: Option<RequestImageConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<i64>,
}

#[derive(Debug, Serialize)]
struct RequestImageConfig {
    aspect_ratio: String,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseEnvelope {
    #[serde(default)]
    candidates: Vec<ResponseCandidate>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseCandidate {
    #[serde(default)]
    content: Option<ResponseContent>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default, rename = "inlineData", alias = "inline_data")]
    inline_data: Option<ResponseInlineData>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseInlineData {
    #[serde(default, rename = "mimeType", alias = "mime_type")]
    mime_type: Option<String>,
    #[serde(default)]
    data: String,
}

/// Decoded image plus the exact bytes the API sent.
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub image: RasterImage,
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

#[derive(Debug, Clone)]
pub enum GenerationResult {
    Image(GeneratedImage),
    /// The backend described the result instead of returning pixels.
    Text(String),
    Failure(Failure),
}

impl GenerationResult {
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationResult::Image(_) => "image",
            GenerationResult::Text(_) => "text",
            GenerationResult::Failure(_) => "failure",
        }
    }
}

/// Result of one round trip, with the parsed response body when there was one.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub result: GenerationResult,
    pub status: Option<u16>,
    pub raw_response: Option<Value>,
}

impl Exchange {
    fn failed(failure: Failure) -> Self {
        Self {
            result: GenerationResult::Failure(failure),
            status: None,
            raw_response: None,
        }
    }
}

/// Blocking client for the `generateContent` endpoint.
///
/// Each call makes exactly one HTTP attempt bounded by the configured timeout.
#[derive(Debug, Clone)]
pub struct GenerationClient {
    api_base: String,
    model: String,
    timeout: Duration,
    temperature: f64,
    max_output_tokens: u32,
    http: HttpClient,
}

impl GenerationClient {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .build()
            .map_err(|err| Failure::new(ErrorKind::Config, format!("HTTP client setup failed: {err}")))?;
        Ok(Self {
            api_base: config.api_base.trim().trim_end_matches('/').to_string(),
            model: config.model.clone(),
            timeout: config.request_timeout,
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            http,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn endpoint(&self) -> String {
        let trimmed = self.model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    pub fn build_payload(&self, request: &GenerationRequest) -> Value {
        let body = RequestBody {
            contents: vec![RequestContent {
                parts: vec![
                    RequestPart::Text {
                        text: request.instruction_text(),
                    },
                    RequestPart::InlineData {
                        inline_data: RequestInlineData {
                            mime_type: request.mime_type.to_string(),
                            data: request.encoded_image.clone(),
                        },
                    },
                ],
            }],
            generation_config: RequestGenerationConfig {
                response_modalities: vec!["Image"],
                temperature: self.temperature,
                candidate_count: 1,
                max_output_tokens: self.max_output_tokens,
                image_config: request
                    .aspect_ratio
                    .filter(|ratio| *ratio != AspectRatio::DEFAULT)
                    .map(|ratio| RequestImageConfig {
                        aspect_ratio: ratio.tag().to_string(),
                    }),
                seed: request.seed,
            },
            system_instruction: RequestContent {
                parts: vec![RequestPart::Text {
                    text: GENERATION_SYSTEM_INSTRUCTION.to_string(),
                }],
            },
        };
        serde_json::to_value(body).unwrap_or(Value::Null)
    }

    pub fn build_analysis_payload(&self, encoded_image: &str, scene_context: Option<&str>) -> Value {
        let mut instruction = ANALYSIS_INSTRUCTION.to_string();
        if let Some(context) = scene_context.map(str::trim).filter(|text| !text.is_empty()) {
            instruction.push_str(&format!("\n\nScene context: {context}"));
        }
        let body = RequestBody {
            contents: vec![RequestContent {
                parts: vec![
                    RequestPart::Text { text: instruction },
                    RequestPart::InlineData {
                        inline_data: RequestInlineData {
                            mime_type: codec::PNG_MIME.to_string(),
                            data: encoded_image.to_string(),
                        },
                    },
                ],
            }],
            generation_config: RequestGenerationConfig {
                response_modalities: vec!["Text"],
                temperature: self.temperature,
                candidate_count: 1,
                max_output_tokens: self.max_output_tokens,
                image_config: None,
                seed: None,
            },
            system_instruction: RequestContent {
                parts: vec![RequestPart::Text {
                    text: ANALYSIS_SYSTEM_INSTRUCTION.to_string(),
                }],
            },
        };
        serde_json::to_value(body).unwrap_or(Value::Null)
    }

    /// Image-to-image generation, one attempt.
    pub fn generate(
        &self,
        image: &RasterImage,
        options: &GenerationOptions,
        scene_context: Option<&str>,
        credentials: &Credentials,
    ) -> GenerationResult {
        self.generate_exchange(image, options, scene_context, credentials, &CancelToken::new())
            .result
    }

    pub fn generate_exchange(
        &self,
        image: &RasterImage,
        options: &GenerationOptions,
        scene_context: Option<&str>,
        credentials: &Credentials,
        cancel: &CancelToken,
    ) -> Exchange {
        let request = match GenerationRequest::new(image, options, scene_context) {
            Ok(request) => request,
            Err(failure) => return Exchange::failed(failure),
        };
        self.send(&self.build_payload(&request), credentials, cancel)
    }

    /// Asks for a written critique of the image instead of a new image.
    pub fn analyze_exchange(
        &self,
        image: &RasterImage,
        scene_context: Option<&str>,
        credentials: &Credentials,
        cancel: &CancelToken,
    ) -> Exchange {
        let encoded = match codec::encode_png_base64(image) {
            Ok(encoded) => encoded,
            Err(failure) => return Exchange::failed(failure),
        };
        self.send(
            &self.build_analysis_payload(&encoded, scene_context),
            credentials,
            cancel,
        )
    }

    /// Posts `payload` on a worker thread so the caller can abandon the wait
    /// when `cancel` fires. The request itself stays bounded by the timeout.
    pub fn send(&self, payload: &Value, credentials: &Credentials, cancel: &CancelToken) -> Exchange {
        if let Err(failure) = cancel.check() {
            return Exchange::failed(failure);
        }
        let endpoint = self.endpoint();
        tracing::info!(endpoint = %endpoint, timeout_s = self.timeout.as_secs_f64(), "sending generation request");

        let (tx, rx) = mpsc::channel();
        let http = self.http.clone();
        let api_key = credentials.api_key().clone();
        let timeout = self.timeout;
        let body = payload.clone();
        let worker_endpoint = endpoint.clone();
        thread::spawn(move || {
            let outcome = http
                .post(&worker_endpoint)
                .query(&[("key", api_key.expose_secret())])
                .timeout(timeout)
                .json(&body)
                .send()
                .and_then(|response| {
                    let status = response.status().as_u16();
                    response.text().map(|text| (status, text))
                });
            let _ = tx.send(outcome);
        });

        let outcome = loop {
            match rx.recv_timeout(CANCEL_POLL) {
                Ok(outcome) => break outcome,
                Err(RecvTimeoutError::Timeout) => {
                    if cancel.is_cancelled() {
                        tracing::warn!("generation request abandoned after cancellation");
                        return Exchange::failed(Failure::cancelled());
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Exchange::failed(Failure::new(
                        ErrorKind::Connection,
                        "request worker exited without a response",
                    ));
                }
            }
        };

        let (status, text) = match outcome {
            Ok(pair) => pair,
            Err(err) => return Exchange::failed(transport_failure(&endpoint, err)),
        };
        tracing::info!(status, bytes = text.len(), "generation response received");

        if status != 200 {
            return Exchange {
                result: GenerationResult::Failure(Failure::new(
                    ErrorKind::Http(status),
                    truncate_text(text.trim(), BODY_EXCERPT_CHARS),
                )),
                status: Some(status),
                raw_response: serde_json::from_str(&text).ok(),
            };
        }

        let raw: Value = match serde_json::from_str(&text) {
            Ok(raw) => raw,
            Err(err) => {
                return Exchange {
                    result: GenerationResult::Failure(Failure::decode(format!(
                        "response is not JSON ({err}): {}",
                        truncate_text(text.trim(), BODY_EXCERPT_CHARS)
                    ))),
                    status: Some(status),
                    raw_response: None,
                }
            }
        };
        Exchange {
            result: parse_response(&raw),
            status: Some(status),
            raw_response: Some(raw),
        }
    }
}

fn transport_failure(endpoint: &str, err: reqwest::Error) -> Failure {
    let timed_out = err.is_timeout();
    // reqwest errors carry the URL, whose query holds the key.
    let detail = error_chain_text(&anyhow::Error::new(err.without_url()), 400);
    if timed_out {
        return Failure::new(ErrorKind::Timeout, format!("request to {endpoint} timed out: {detail}"));
    }
    Failure::new(ErrorKind::Connection, format!("request to {endpoint} failed: {detail}"))
}

/// Reads the first candidate's parts in order. The first inline image wins;
/// otherwise the first non-empty text part; otherwise `NoContent`.
pub fn parse_response(raw: &Value) -> GenerationResult {
    let envelope: ResponseEnvelope = match serde_json::from_value(raw.clone()) {
        Ok(envelope) => envelope,
        Err(err) => {
            return GenerationResult::Failure(Failure::decode(format!(
                "unexpected response shape: {err}"
            )))
        }
    };
    let parts = envelope
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| content.parts)
        .unwrap_or_default();

    let mut first_text: Option<String> = None;
    for part in parts {
        if let Some(inline) = part.inline_data.filter(|inline| !inline.data.trim().is_empty()) {
            return match decode_inline_image(inline) {
                Ok(generated) => GenerationResult::Image(generated),
                Err(failure) => GenerationResult::Failure(failure),
            };
        }
        if first_text.is_none() {
            first_text = part.text.filter(|text| !text.trim().is_empty());
        }
    }
    match first_text {
        Some(text) => GenerationResult::Text(text),
        None => GenerationResult::Failure(Failure::new(
            ErrorKind::NoContent,
            "response carried neither image data nor text",
        )),
    }
}

fn decode_inline_image(inline: ResponseInlineData) -> Result<GeneratedImage> {
    let bytes = codec::decode_base64(&inline.data)?;
    let image = codec::decode(&bytes, ImageOrigin::Generated)?;
    let mime_type = inline
        .mime_type
        .filter(|mime| !mime.trim().is_empty())
        .unwrap_or_else(|| codec::mime_for_bytes(&bytes).to_string());
    Ok(GeneratedImage {
        image,
        bytes,
        mime_type,
    })
}
