//! Image description, persistence, and pacing.
//!
//! Every image is handled in extraction order: described by the vision service, decoded,
//! and written to the document's byte-store directory under a collision-free generated
//! name. A failure on any single image (description, decode, or write) degrades that
//! image and never aborts the document. The vision service is rate limited upstream, so
//! pacing between calls is an explicit policy rather than best effort.

use crate::content::ImageRecord;
use crate::document::DocumentId;
use crate::extraction::RawImage;
use crate::vision::VisionClient;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Pacing policy applied between vision-service calls.
#[derive(Debug, Clone, Copy)]
pub struct RatePolicy {
    /// Number of images after which the long cooldown applies.
    pub batch_size: usize,
    /// Pause taken after each full batch.
    pub cooldown: Duration,
    /// Pause taken after every other image.
    pub delay: Duration,
}

impl RatePolicy {
    /// Build the policy from the process configuration.
    pub fn from_config() -> Self {
        let config = crate::config::get_config();
        Self {
            batch_size: config.image_batch_size,
            cooldown: Duration::from_secs(config.image_batch_cooldown_secs),
            delay: Duration::from_secs(config.image_delay_secs),
        }
    }

    /// Pause owed after finishing the image at `position` (zero-based).
    pub fn pause_after(&self, position: usize) -> Duration {
        if self.batch_size > 0 && (position + 1) % self.batch_size == 0 {
            self.cooldown
        } else {
            self.delay
        }
    }
}

/// Describes, persists, and records metadata for extracted images.
pub struct ImagePipeline {
    vision: Arc<dyn VisionClient>,
    images_dir: PathBuf,
    policy: RatePolicy,
}

impl ImagePipeline {
    /// Construct a pipeline writing below `images_dir` and pacing with `policy`.
    pub fn new(vision: Arc<dyn VisionClient>, images_dir: PathBuf, policy: RatePolicy) -> Self {
        Self {
            vision,
            images_dir,
            policy,
        }
    }

    /// Construct a pipeline from the process configuration.
    pub fn from_config(vision: Arc<dyn VisionClient>) -> Self {
        let config = crate::config::get_config();
        Self::new(vision, config.images_dir.clone(), RatePolicy::from_config())
    }

    /// Process extracted images in order, returning one record per input image.
    pub async fn process(&self, document_id: DocumentId, images: Vec<RawImage>) -> Vec<ImageRecord> {
        if images.is_empty() {
            return Vec::new();
        }

        let doc_dir = self.images_dir.join(document_id.to_string());
        if let Err(error) = tokio::fs::create_dir_all(&doc_dir).await {
            tracing::warn!(document_id = %document_id, error = %error, "Failed to create image directory");
        }

        tracing::info!(document_id = %document_id, images = images.len(), "Processing images");

        let total = images.len();
        let mut records = Vec::with_capacity(total);
        for (position, image) in images.into_iter().enumerate() {
            let description = match describe_one(self.vision.as_ref(), &image.base64).await {
                Ok(description) => description,
                Err(error) => {
                    tracing::warn!(
                        document_id = %document_id,
                        image = position + 1,
                        error = %error,
                        "Image description failed; recording placeholder"
                    );
                    format!("Error processing image: {error}")
                }
            };

            let suffix = short_suffix();
            let filename = format!("image_{}_{suffix}.png", position + 1);
            let path = doc_dir.join(&filename);

            match BASE64.decode(image.base64.as_bytes()) {
                Ok(bytes) => {
                    if let Err(error) = tokio::fs::write(&path, &bytes).await {
                        tracing::warn!(
                            document_id = %document_id,
                            path = %path.display(),
                            error = %error,
                            "Failed to persist image bytes"
                        );
                    } else {
                        tracing::debug!(document_id = %document_id, path = %path.display(), "Saved image");
                    }
                }
                Err(error) => {
                    tracing::warn!(
                        document_id = %document_id,
                        image = position + 1,
                        error = %error,
                        "Image payload is not valid base64; skipping persistence"
                    );
                }
            }

            records.push(ImageRecord {
                image_id: suffix,
                filename,
                path,
                description,
                original_index: position,
            });

            tokio::time::sleep(self.policy.pause_after(position)).await;
        }

        records
    }
}

/// Short unique suffix keeping generated filenames collision-free per document.
fn short_suffix() -> String {
    let full = Uuid::new_v4().simple().to_string();
    full[..8].to_string()
}
