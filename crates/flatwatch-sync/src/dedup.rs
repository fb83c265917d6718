//! Near-duplicate clustering by perceptual image fingerprint.
//!
//! The same flat is often listed by several agencies with a re-cropped or watermarked
//! copy of one photo. Listings whose primary images hash close together are folded
//! into the first such listing's `duplicates`.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use flatwatch_core::Listing;
use flatwatch_storage::{FetchError, HttpFetcher};
use futures::future::join_all;
use image::imageops::{self, FilterType};
use image::DynamicImage;
use thiserror::Error;
use tracing::{debug, info};

const HASH_SIDE: u32 = 8;

/// 64-bit average hash of an image.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(u64);

impl Fingerprint {
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Hamming distance between the two hashes.
    pub fn distance(self, other: Self) -> u32 {
        (self.0 ^ other.0).count_ones()
    }

    /// Shrink to an 8x8 grayscale thumbnail and set one bit per pixel brighter than
    /// the thumbnail mean.
    pub fn from_image(image: &DynamicImage) -> Self {
        let thumb = imageops::resize(&image.to_luma8(), HASH_SIDE, HASH_SIDE, FilterType::Lanczos3);
        let pixels: Vec<u64> = thumb.pixels().map(|p| u64::from(p.0[0])).collect();
        let total: u64 = pixels.iter().sum();

        // compare scaled values so the mean stays integral
        let count = pixels.len() as u64;
        let bits = pixels
            .iter()
            .fold(0u64, |acc, &value| (acc << 1) | u64::from(value * count > total));
        Self(bits)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, image::ImageError> {
        let image = image::load_from_memory(bytes)?;
        Ok(Self::from_image(&image))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({:016x})", self.0)
    }
}

#[derive(Debug, Error)]
pub enum ImageFetchError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("could not decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("fingerprint task failed: {0}")]
    Task(String),
}

#[async_trait]
pub trait Fingerprinter: Send + Sync {
    async fn fingerprint(&self, image_url: &str) -> Result<Fingerprint, ImageFetchError>;
}

/// Downloads through the shared [`HttpFetcher`] and hashes on the blocking pool.
pub struct ImageFingerprinter {
    http: Arc<HttpFetcher>,
}

impl ImageFingerprinter {
    pub fn new(http: Arc<HttpFetcher>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Fingerprinter for ImageFingerprinter {
    async fn fingerprint(&self, image_url: &str) -> Result<Fingerprint, ImageFetchError> {
        let response = self.http.fetch_bytes("image", image_url).await?;
        let decoded = tokio::task::spawn_blocking(move || Fingerprint::from_bytes(&response.body))
            .await
            .map_err(|e| ImageFetchError::Task(e.to_string()))?;
        Ok(decoded?)
    }
}

/// Greedy single pass over `pairs` in input order.
///
/// Each listing joins the first representative whose fingerprint is within
/// `threshold` (strictly less). A listing without a fingerprint always stays on its own.
pub fn cluster(pairs: Vec<(Listing, Option<Fingerprint>)>, threshold: u32) -> Vec<Listing> {
    let mut representatives: Vec<(Listing, Option<Fingerprint>)> = Vec::with_capacity(pairs.len());

    for (listing, fingerprint) in pairs {
        let matched = fingerprint.and_then(|fp| {
            representatives.iter().position(|(_, existing)| {
                existing.is_some_and(|existing| existing.distance(fp) < threshold)
            })
        });
        match matched {
            Some(index) => representatives[index].0.duplicates.push(listing),
            None => representatives.push((listing, fingerprint)),
        }
    }

    representatives.into_iter().map(|(listing, _)| listing).collect()
}

pub struct Deduplicator {
    fingerprinter: Arc<dyn Fingerprinter>,
}

impl Deduplicator {
    pub fn new(fingerprinter: Arc<dyn Fingerprinter>) -> Self {
        Self { fingerprinter }
    }

    /// Fingerprint every listing image concurrently, then [`cluster`].
    pub async fn deduplicate(&self, listings: Vec<Listing>, threshold: u32) -> Vec<Listing> {
        let fingerprints = join_all(listings.iter().map(|listing| self.fingerprint_of(listing))).await;
        let hashed = fingerprints.iter().filter(|fp| fp.is_some()).count();

        let before = listings.len();
        let clustered = cluster(listings.into_iter().zip(fingerprints).collect(), threshold);
        info!(
            listings = before,
            fingerprinted = hashed,
            representatives = clustered.len(),
            "deduplicated listings"
        );
        clustered
    }

    async fn fingerprint_of(&self, listing: &Listing) -> Option<Fingerprint> {
        let url = listing.image_url.as_deref()?;
        match self.fingerprinter.fingerprint(url).await {
            Ok(fingerprint) => Some(fingerprint),
            Err(err) => {
                debug!(link = %listing.link, image_url = url, error = %err, "image fingerprint unavailable");
                None
            }
        }
    }
}
