use std::collections::BTreeMap;
use std::io::Cursor;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use colorbook_contracts::book::PageImage;
use colorbook_contracts::models::{ModelSelector, ModelSpec, IMAGE_CAPABILITY};
use colorbook_contracts::prompts::styled_prompt;
use image::{DynamicImage, GrayImage, ImageFormat, ImageReader, Luma};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::config::EngineConfig;
use crate::transport::JsonTransport;

#[derive(Debug, Clone, PartialEq)]
pub struct ImageRequest {
    pub prompt: String,
    pub model: String,
    pub aspect_ratio: String,
    pub mime_type: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl GeneratedImage {
    /// Reads the native size from the image header; an unreadable header
    /// leaves the size at zero and is reported when the book is exported.
    pub fn into_page_image(self) -> PageImage {
        let (width, height) = ImageReader::new(Cursor::new(&self.bytes))
            .with_guessed_format()
            .ok()
            .and_then(|reader| reader.into_dimensions().ok())
            .unwrap_or((0, 0));
        PageImage {
            bytes: self.bytes,
            mime_type: self.mime_type,
            width,
            height,
        }
    }
}

pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, request: &ImageRequest) -> Result<GeneratedImage>;
}

#[derive(Default)]
pub struct ImageProviderRegistry {
    providers: BTreeMap<String, Box<dyn ImageProvider>>,
}

impl ImageProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: ImageProvider + 'static>(&mut self, provider: P) {
        self.providers
            .insert(provider.name().to_string(), Box::new(provider));
    }

    pub fn get(&self, name: &str) -> Option<&dyn ImageProvider> {
        self.providers.get(name).map(|provider| provider.as_ref())
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

pub fn default_image_registry(config: &EngineConfig) -> ImageProviderRegistry {
    let mut providers = ImageProviderRegistry::new();
    providers.register(DryrunImageProvider);
    providers.register(ImagenProvider::new(config));
    providers.register(GeminiImageProvider::new(config));
    providers
}

/// The image generation collaborator as the controller sees it: one prompt
/// in, one encoded image out.
pub struct ImageClient {
    providers: ImageProviderRegistry,
    model: ModelSpec,
    fallback_reason: Option<String>,
    timeout: Duration,
}

impl ImageClient {
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let selection = ModelSelector::new(None)
            .select(config.image_model.as_deref(), IMAGE_CAPABILITY)
            .map_err(anyhow::Error::msg)?;
        Ok(Self {
            providers: default_image_registry(config),
            model: selection.model,
            fallback_reason: selection.fallback_reason,
            timeout: config.request_timeout,
        })
    }

    pub fn with_provider<P: ImageProvider + 'static>(provider: P, timeout: Duration) -> Self {
        let model = ModelSpec::new(
            &format!("{}-image", provider.name()),
            provider.name(),
            &[IMAGE_CAPABILITY],
        );
        let mut providers = ImageProviderRegistry::new();
        providers.register(provider);
        Self {
            providers,
            model,
            fallback_reason: None,
            timeout,
        }
    }

    pub fn model(&self) -> &ModelSpec {
        &self.model
    }

    pub fn fallback_reason(&self) -> Option<&str> {
        self.fallback_reason.as_deref()
    }

    pub fn generate(&self, prompt: &str) -> Result<GeneratedImage> {
        let Some(provider) = self.providers.get(&self.model.provider) else {
            bail!(
                "image provider '{}' not registered (available: [{}])",
                self.model.provider,
                self.providers.names().join(", ")
            );
        };
        let request = ImageRequest {
            prompt: styled_prompt(prompt),
            model: self.model.name.clone(),
            aspect_ratio: "1:1".to_string(),
            mime_type: "image/png".to_string(),
            timeout: self.timeout,
        };
        let image = provider
            .generate(&request)
            .context("Failed to generate image")?;
        if image.bytes.is_empty() {
            bail!("Failed to generate image: No image data received from the model.");
        }
        Ok(image)
    }
}

/// Offline provider that draws a deterministic line-art placeholder.
pub struct DryrunImageProvider;

impl ImageProvider for DryrunImageProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(&self, request: &ImageRequest) -> Result<GeneratedImage> {
        let canvas = draw_dryrun_page(&request.prompt, 512);
        let mut bytes = Vec::new();
        DynamicImage::ImageLuma8(canvas)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .context("dryrun image encode failed")?;
        Ok(GeneratedImage {
            bytes,
            mime_type: "image/png".to_string(),
        })
    }
}

fn draw_dryrun_page(prompt: &str, size: u32) -> GrayImage {
    let digest = Sha256::digest(prompt.as_bytes());
    let mut canvas = GrayImage::from_pixel(size, size, Luma([255]));
    let stroke = (size / 64).max(2);
    let ink = Luma([0]);

    for y in 0..size {
        for x in 0..size {
            let on_frame = x < stroke || y < stroke || x >= size - stroke || y >= size - stroke;
            if on_frame {
                canvas.put_pixel(x, y, ink);
            }
        }
    }

    // Three outlined circles whose placement is derived from the prompt.
    for idx in 0..3 {
        let cx = (digest[idx * 3] as u32 * (size / 2)) / 255 + size / 4;
        let cy = (digest[idx * 3 + 1] as u32 * (size / 2)) / 255 + size / 4;
        let radius = (digest[idx * 3 + 2] as u32 % (size / 6)) + size / 12;
        draw_ring(&mut canvas, cx as f64, cy as f64, radius as f64, stroke as f64);
    }
    canvas
}

fn draw_ring(canvas: &mut GrayImage, cx: f64, cy: f64, radius: f64, stroke: f64) {
    let (width, height) = canvas.dimensions();
    for y in 0..height {
        for x in 0..width {
            let distance = ((x as f64 - cx).powi(2) + (y as f64 - cy).powi(2)).sqrt();
            if (distance - radius).abs() <= stroke / 2.0 {
                canvas.put_pixel(x, y, Luma([0]));
            }
        }
    }
}

pub struct ImagenProvider {
    api_base: String,
    api_key: Option<String>,
    transport: JsonTransport,
}

impl ImagenProvider {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            api_base: config.api_base.clone(),
            api_key: config.api_key.clone(),
            transport: JsonTransport::new(config),
        }
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim().trim_start_matches("models/");
        format!("{}/models/{}:predict", self.api_base, trimmed)
    }

    fn extract_predictions(response_payload: &Value) -> Result<Vec<GeneratedImage>> {
        let mut out = Vec::new();
        let predictions = response_payload
            .get("predictions")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for row in predictions {
            let Some(obj) = row.as_object() else {
                continue;
            };
            let encoded = obj
                .get("bytesBase64Encoded")
                .or_else(|| obj.get("bytes_base64_encoded"))
                .or_else(|| {
                    obj.get("image")
                        .and_then(|image| image.get("imageBytes"))
                })
                .and_then(Value::as_str)
                .unwrap_or_default();
            if encoded.is_empty() {
                continue;
            }
            let bytes = BASE64
                .decode(encoded.as_bytes())
                .context("Imagen image base64 decode failed")?;
            let mime_type = obj
                .get("mimeType")
                .or_else(|| obj.get("mime_type"))
                .and_then(Value::as_str)
                .unwrap_or("image/png")
                .to_string();
            out.push(GeneratedImage { bytes, mime_type });
        }
        Ok(out)
    }
}

impl ImageProvider for ImagenProvider {
    fn name(&self) -> &str {
        "imagen"
    }

    fn generate(&self, request: &ImageRequest) -> Result<GeneratedImage> {
        let Some(api_key) = self.api_key.as_deref() else {
            bail!("GEMINI_API_KEY or GOOGLE_API_KEY not set");
        };
        let endpoint = self.endpoint_for_model(&request.model);
        let payload = json!({
            "instances": [{ "prompt": request.prompt }],
            "parameters": {
                "sampleCount": 1,
                "aspectRatio": request.aspect_ratio,
                "outputOptions": { "mimeType": request.mime_type },
            },
        });
        let response = self.transport.post_json(
            "Imagen",
            &endpoint,
            api_key,
            &payload,
            Some(request.timeout),
        )?;
        Self::extract_predictions(&response)?
            .into_iter()
            .next()
            .context("No image data received from the model.")
    }
}

pub struct GeminiImageProvider {
    api_base: String,
    api_key: Option<String>,
    transport: JsonTransport,
}

impl GeminiImageProvider {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            api_base: config.api_base.clone(),
            api_key: config.api_key.clone(),
            transport: JsonTransport::new(config),
        }
    }

    fn extract_inline_images(response_payload: &Value) -> Result<Vec<GeneratedImage>> {
        let candidates = response_payload
            .get("candidates")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut out = Vec::new();

        for candidate in candidates {
            let parts = candidate
                .pointer("/content/parts")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for part in parts {
                let Some(inline) = part
                    .get("inlineData")
                    .or_else(|| part.get("inline_data"))
                    .and_then(Value::as_object)
                else {
                    continue;
                };
                let data = inline
                    .get("data")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if data.is_empty() {
                    continue;
                }
                let bytes = BASE64
                    .decode(data.as_bytes())
                    .context("Gemini image base64 decode failed")?;
                let mime_type = inline
                    .get("mimeType")
                    .or_else(|| inline.get("mime_type"))
                    .and_then(Value::as_str)
                    .unwrap_or("image/png")
                    .to_string();
                out.push(GeneratedImage { bytes, mime_type });
            }
        }

        Ok(out)
    }
}

impl ImageProvider for GeminiImageProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate(&self, request: &ImageRequest) -> Result<GeneratedImage> {
        let Some(api_key) = self.api_key.as_deref() else {
            bail!("GEMINI_API_KEY or GOOGLE_API_KEY not set");
        };
        let endpoint = format!(
            "{}/models/{}:generateContent",
            self.api_base,
            request.model.trim().trim_start_matches("models/")
        );
        let payload = json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": request.prompt }],
            }],
            "generationConfig": {
                "candidateCount": 1,
                "responseModalities": ["IMAGE"],
                "imageConfig": { "aspectRatio": request.aspect_ratio },
            },
        });
        let response = self.transport.post_json(
            "Gemini",
            &endpoint,
            api_key,
            &payload,
            Some(request.timeout),
        )?;
        Self::extract_inline_images(&response)?
            .into_iter()
            .next()
            .context("No image data received from the model.")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use anyhow::bail;
    use base64::Engine as _;
    use serde_json::json;

    use super::*;

    struct RecordingProvider {
        prompts: Arc<Mutex<Vec<String>>>,
    }

    impl ImageProvider for RecordingProvider {
        fn name(&self) -> &str {
            "recording"
        }

        fn generate(&self, request: &ImageRequest) -> Result<GeneratedImage> {
            if let Ok(mut prompts) = self.prompts.lock() {
                prompts.push(request.prompt.clone());
            }
            if request.prompt.starts_with("empty") {
                return Ok(GeneratedImage {
                    bytes: Vec::new(),
                    mime_type: "image/png".to_string(),
                });
            }
            bail!("quota exceeded")
        }
    }

    #[test]
    fn client_appends_style_suffix_and_wraps_failures() {
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let client = ImageClient::with_provider(
            RecordingProvider {
                prompts: Arc::clone(&prompts),
            },
            Duration::from_secs(5),
        );
        let err = client
            .generate("A cat waving")
            .err()
            .map(|err| format!("{err:#}"));
        assert_eq!(
            err.as_deref(),
            Some("Failed to generate image: quota exceeded")
        );
        let sent = prompts
            .lock()
            .map(|prompts| prompts.clone())
            .unwrap_or_default();
        assert_eq!(
            sent,
            vec![
                "A cat waving, black and white, thick lines, coloring book style, simple, clear, \
                 no shading"
                    .to_string()
            ]
        );

        let empty = client.generate("empty page").err().map(|err| err.to_string());
        assert_eq!(
            empty.as_deref(),
            Some("Failed to generate image: No image data received from the model.")
        );
    }

    #[test]
    fn dryrun_is_deterministic_png() -> anyhow::Result<()> {
        let client = ImageClient::with_provider(DryrunImageProvider, Duration::from_secs(5));
        let first = client.generate("A robot waving")?;
        let second = client.generate("A robot waving")?;
        assert_eq!(first, second);
        let page = first.into_page_image();
        assert_eq!((page.width, page.height), (512, 512));
        assert_eq!(page.mime_type, "image/png");
        Ok(())
    }

    #[test]
    fn unreadable_payload_keeps_zero_size() {
        let page = GeneratedImage {
            bytes: b"definitely not an image".to_vec(),
            mime_type: "image/png".to_string(),
        }
        .into_page_image();
        assert_eq!((page.width, page.height), (0, 0));
    }

    #[test]
    fn imagen_extracts_base64_predictions() -> anyhow::Result<()> {
        let encoded = BASE64.encode(b"png-bytes");
        let payload = json!({
            "predictions": [
                { "bytesBase64Encoded": encoded, "mimeType": "image/png" },
                { "raiFilteredReason": "blocked" }
            ]
        });
        let images = ImagenProvider::extract_predictions(&payload)?;
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].bytes, b"png-bytes".to_vec());
        Ok(())
    }

    #[test]
    fn gemini_extracts_inline_data_parts() -> anyhow::Result<()> {
        let encoded = BASE64.encode(b"gemini-bytes");
        let payload = json!({
            "candidates": [{
                "content": { "parts": [
                    { "text": "here you go" },
                    { "inlineData": { "mimeType": "image/png", "data": encoded } }
                ]}
            }]
        });
        let images = GeminiImageProvider::extract_inline_images(&payload)?;
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].bytes, b"gemini-bytes".to_vec());
        Ok(())
    }

    #[test]
    fn missing_api_key_is_reported() {
        let provider = ImagenProvider::new(&EngineConfig::default());
        let request = ImageRequest {
            prompt: "x".to_string(),
            model: "imagen-4.0-generate-001".to_string(),
            aspect_ratio: "1:1".to_string(),
            mime_type: "image/png".to_string(),
            timeout: Duration::from_secs(5),
        };
        let err = provider.generate(&request).err().map(|err| err.to_string());
        assert_eq!(
            err.as_deref(),
            Some("GEMINI_API_KEY or GOOGLE_API_KEY not set")
        );
    }

    #[test]
    fn from_config_selects_requested_model() -> anyhow::Result<()> {
        let config = EngineConfig {
            image_model: Some("dryrun-image-1".to_string()),
            ..EngineConfig::default()
        };
        let client = ImageClient::from_config(&config)?;
        assert_eq!(client.model().provider, "dryrun");
        assert!(client.generate("A boat")?.bytes.starts_with(b"\x89PNG"));
        Ok(())
    }
}
