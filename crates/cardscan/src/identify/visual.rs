use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use image::{DynamicImage, ImageFormat};
use reqwest::Client;

use super::{ComparisonImage, VisualComparator, VisualMatch};
use crate::error::IdentifyError;
use crate::types::CardRecord;

const SERVICE: &str = "card image download";

#[derive(Debug, Clone)]
pub struct VisualMatcherConfig {
    pub max_candidates: usize,
    pub max_image_bytes: usize,
    pub download_timeout: Duration,
    pub max_dimension: u32,
}

impl Default for VisualMatcherConfig {
    fn default() -> Self {
        Self {
            max_candidates: 4,
            max_image_bytes: 5 * 1024 * 1024,
            download_timeout: Duration::from_secs(10),
            max_dimension: 512,
        }
    }
}

/// Picks the catalog card whose artwork matches a scanned image.
pub struct VisualMatcher {
    client: Client,
    comparator: Arc<dyn VisualComparator>,
    config: VisualMatcherConfig,
}

impl VisualMatcher {
    pub fn new(
        comparator: Arc<dyn VisualComparator>,
        config: VisualMatcherConfig,
    ) -> Result<Self, IdentifyError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(config.download_timeout)
            .build()
            .map_err(|e| IdentifyError::from_reqwest(SERVICE, e))?;
        Ok(Self {
            client,
            comparator,
            config,
        })
    }

    /// Compares `scanned_image` against at most `max_candidates` cards
    /// that have an image URL. Candidates whose image cannot be fetched or
    /// decoded are left out; with none left there is no match.
    pub async fn select_best_match(
        &self,
        scanned_image: &[u8],
        candidates: &[CardRecord],
    ) -> Result<Option<VisualMatch>, IdentifyError> {
        let scanned = downscale_jpeg(scanned_image, self.config.max_dimension)?;

        let mut prepared = Vec::new();
        for card in candidates
            .iter()
            .filter(|c| c.image_url.is_some())
            .take(self.config.max_candidates)
        {
            let Some(url) = card.image_url.as_deref() else {
                continue;
            };
            let bytes = match self.download(url).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    log::warn!("Skipping image for card {}: {}", card.id, e);
                    continue;
                }
            };
            match downscale_jpeg(&bytes, self.config.max_dimension) {
                Ok(jpeg) => prepared.push(ComparisonImage {
                    card_id: card.id.clone(),
                    jpeg,
                }),
                Err(e) => log::warn!("Skipping undecodable image for card {}: {}", card.id, e),
            }
        }

        if prepared.is_empty() {
            return Ok(None);
        }

        log::debug!("Comparing scan against {} candidate images", prepared.len());
        self.comparator.compare(&scanned, &prepared).await
    }

    /// Downloads an image chunk by chunk, giving up once it exceeds the cap.
    async fn download(&self, url: &str) -> Result<Vec<u8>, IdentifyError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| IdentifyError::from_reqwest(SERVICE, e))?;

        if !response.status().is_success() {
            return Err(super::http_error(SERVICE, response).await);
        }

        let cap = self.config.max_image_bytes;
        if response.content_length().is_some_and(|len| len as usize > cap) {
            return Err(too_large(cap));
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| IdentifyError::from_reqwest(SERVICE, e))?
        {
            if bytes.len() + chunk.len() > cap {
                return Err(too_large(cap));
            }
            bytes.extend_from_slice(&chunk);
        }
        Ok(bytes)
    }
}

fn too_large(cap: usize) -> IdentifyError {
    IdentifyError::Image(format!("image exceeds {} bytes", cap))
}

/// Decodes an image and re-encodes it as JPEG no larger than
/// `max_dimension` on its longest edge.
pub fn downscale_jpeg(bytes: &[u8], max_dimension: u32) -> Result<Vec<u8>, IdentifyError> {
    let decoded =
        image::load_from_memory(bytes).map_err(|e| IdentifyError::Image(e.to_string()))?;
    let resized = if decoded.width() > max_dimension || decoded.height() > max_dimension {
        decoded.thumbnail(max_dimension, max_dimension)
    } else {
        decoded
    };
    let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());

    let mut out = Cursor::new(Vec::new());
    rgb.write_to(&mut out, ImageFormat::Jpeg)
        .map_err(|e| IdentifyError::Image(e.to_string()))?;
    Ok(out.into_inner())
}
