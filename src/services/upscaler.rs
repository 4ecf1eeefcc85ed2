use base64::Engine;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::time::Duration;

/// Super-resolution model.
///
/// `enhance` is synchronous and CPU/GPU bound; callers run it on the
/// blocking pool, never on the async runtime.
pub trait Upscaler: Send + Sync {
    fn name(&self) -> &str;

    fn scale(&self) -> u32;

    fn enhance(&self, image: &DynamicImage) -> Result<DynamicImage, UpscaleError>;
}

/// Local Lanczos3 resampling, used when no inference endpoint is configured.
pub struct LanczosUpscaler {
    scale: u32,
}

impl LanczosUpscaler {
    pub fn new(scale: u32) -> Self {
        Self {
            scale: scale.max(1),
        }
    }
}

impl Upscaler for LanczosUpscaler {
    fn name(&self) -> &str {
        "lanczos3"
    }

    fn scale(&self) -> u32 {
        self.scale
    }

    fn enhance(&self, image: &DynamicImage) -> Result<DynamicImage, UpscaleError> {
        let (width, height) = target_size(image, self.scale)?;
        Ok(image.resize_exact(width, height, FilterType::Lanczos3))
    }
}

/// Client for a hosted super-resolution model (e.g. Real-ESRGAN behind HTTP).
///
/// The request carries the image as base64 PNG; the response returns the
/// upscaled image the same way.
pub struct RemoteUpscaler {
    http: reqwest::blocking::Client,
    endpoint: String,
    api_token: Option<String>,
    scale: u32,
}

#[derive(Serialize)]
struct EnhanceRequest<'a> {
    image: &'a str,
    scale: u32,
}

#[derive(Deserialize)]
struct EnhanceResponse {
    image: String,
}

impl RemoteUpscaler {
    pub fn new(
        endpoint: String,
        api_token: Option<String>,
        scale: u32,
        timeout: Duration,
    ) -> Result<Self, UpscaleError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(UpscaleError::Http)?;

        Ok(Self {
            http,
            endpoint,
            api_token,
            scale: scale.max(1),
        })
    }
}

impl Upscaler for RemoteUpscaler {
    fn name(&self) -> &str {
        "remote"
    }

    fn scale(&self) -> u32 {
        self.scale
    }

    fn enhance(&self, image: &DynamicImage) -> Result<DynamicImage, UpscaleError> {
        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(UpscaleError::Image)?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&png);

        let mut request = self.http.post(&self.endpoint).json(&EnhanceRequest {
            image: &encoded,
            scale: self.scale,
        });
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(UpscaleError::Http)?;
        let body: EnhanceResponse = response.json().map_err(UpscaleError::Http)?;

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(body.image.as_bytes())
            .map_err(|e| UpscaleError::Model(format!("invalid base64 image in response: {e}")))?;

        image::load_from_memory(&bytes).map_err(UpscaleError::Image)
    }
}

fn target_size(image: &DynamicImage, scale: u32) -> Result<(u32, u32), UpscaleError> {
    let width = image.width().checked_mul(scale);
    let height = image.height().checked_mul(scale);
    match (width, height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => Ok((w, h)),
        _ => Err(UpscaleError::Model(format!(
            "cannot scale {}x{} image by {}",
            image.width(),
            image.height(),
            scale
        ))),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UpscaleError {
    #[error("Model request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Model error: {0}")]
    Model(String),
}
