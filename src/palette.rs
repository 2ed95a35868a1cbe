//! Dominant-color extraction from album art.
//!
//! Pixels are sampled on a fixed stride, clustered with k-means seeded from
//! evenly spaced samples, and ranked by coverage scaled by saturation. No
//! randomness is involved, so the same image always yields the same palette.

use crate::types::{Palette, Rgb, Swatch};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

const MIN_ALPHA: u8 = 16;
const DISTINCT_THRESHOLD: f32 = 400.0;
const CONVERGENCE: f32 = 1e-2;

/// Tuning for [`PaletteExtractor`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaletteConfig {
    /// Upper bound on palette size
    pub max_colors: usize,
    /// Pixels sampled per image
    pub max_samples: usize,
    /// k-means iterations
    pub iterations: usize,
}

impl Default for PaletteConfig {
    fn default() -> Self {
        Self {
            max_colors: 5,
            max_samples: 6_000,
            iterations: 10,
        }
    }
}

#[derive(Clone, Copy)]
struct Cluster {
    centroid: [f32; 3],
    count: usize,
}

/// Derives a [`Palette`] from encoded or decoded images
#[derive(Debug, Clone, Default)]
pub struct PaletteExtractor {
    config: PaletteConfig,
}

impl PaletteExtractor {
    /// Extractor with the given limits
    pub fn new(config: PaletteConfig) -> Self {
        Self { config }
    }

    /// Limits in use
    pub fn config(&self) -> &PaletteConfig {
        &self.config
    }

    /// Decode `bytes` (PNG or JPEG) and extract its palette
    ///
    /// Undecodable input yields an empty palette.
    pub fn extract(&self, bytes: &[u8]) -> Palette {
        match image::load_from_memory(bytes) {
            Ok(image) => self.extract_image(&image),
            Err(e) => {
                tracing::warn!("Failed to decode album art ({} bytes): {}", bytes.len(), e);
                Palette::empty()
            }
        }
    }

    /// Extract the palette of a decoded image
    pub fn extract_image(&self, image: &DynamicImage) -> Palette {
        let samples = sample_pixels(image, self.config.max_samples);
        let k = self.config.max_colors.min(samples.len());
        if k == 0 {
            return Palette::empty();
        }

        let clusters = kmeans_clusters(&samples, k, self.config.iterations.max(1));
        let total = samples.len() as f32;

        let mut ranked: Vec<(Rgb, f32, usize)> = clusters
            .into_iter()
            .filter(|c| c.count > 0)
            .map(|c| {
                let color = color_from_centroid(c.centroid);
                let coverage = c.count as f32 / total;
                (color, prominence(color, coverage), c.count)
            })
            .collect();
        sort_by_prominence(&mut ranked);

        // fold near-identical colors into the more prominent one
        let mut distinct: Vec<(Rgb, f32, usize)> = Vec::with_capacity(ranked.len());
        for (color, weight, count) in ranked {
            match distinct
                .iter_mut()
                .find(|(kept, _, _)| color_distance_sq(*kept, color) <= DISTINCT_THRESHOLD)
            {
                Some(kept) => {
                    kept.1 += weight;
                    kept.2 += count;
                }
                None => distinct.push((color, weight, count)),
            }
        }
        sort_by_prominence(&mut distinct);
        distinct.truncate(self.config.max_colors);

        let swatches: Vec<Swatch> = distinct
            .into_iter()
            .map(|(color, weight, _)| Swatch { color, weight })
            .collect();
        tracing::debug!("Extracted {} color(s) from {} samples", swatches.len(), samples.len());
        Palette::from_swatches(swatches)
    }
}

/// Coverage weighted towards saturated colors
fn prominence(color: Rgb, coverage: f32) -> f32 {
    coverage * (0.5 + 0.5 * color.saturation())
}

fn sort_by_prominence(entries: &mut [(Rgb, f32, usize)]) {
    entries.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.2.cmp(&a.2))
            .then_with(|| (a.0.r, a.0.g, a.0.b).cmp(&(b.0.r, b.0.g, b.0.b)))
    });
}

fn sample_pixels(image: &DynamicImage, max_samples: usize) -> Vec<[f32; 3]> {
    if max_samples == 0 {
        return Vec::new();
    }

    let rgba = image.to_rgba8();
    let total = (rgba.width() as usize) * (rgba.height() as usize);
    if total == 0 {
        return Vec::new();
    }

    let step = (total / max_samples).max(1);
    let mut samples = Vec::with_capacity(max_samples.min(total));

    for pixel in rgba.pixels().step_by(step) {
        let [r, g, b, a] = pixel.0;
        if a < MIN_ALPHA {
            continue;
        }
        samples.push([r as f32, g as f32, b as f32]);
        if samples.len() >= max_samples {
            break;
        }
    }

    samples
}

fn squared_distance(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    let dr = a[0] - b[0];
    let dg = a[1] - b[1];
    let db = a[2] - b[2];
    dr * dr + dg * dg + db * db
}

fn kmeans_clusters(samples: &[[f32; 3]], k: usize, max_iter: usize) -> Vec<Cluster> {
    if samples.is_empty() || k == 0 {
        return Vec::new();
    }

    let mut centroids: Vec<[f32; 3]> = (0..k)
        .map(|i| samples[((i * samples.len()) / k).min(samples.len() - 1)])
        .collect();
    let mut assignments = vec![0usize; samples.len()];

    for iter in 0..max_iter {
        let mut sums = vec![[0f32; 3]; k];
        let mut counts = vec![0usize; k];

        for (sample_idx, sample) in samples.iter().enumerate() {
            let mut best = 0usize;
            let mut best_dist = f32::MAX;
            for (centroid_idx, centroid) in centroids.iter().enumerate() {
                let dist = squared_distance(sample, centroid);
                if dist < best_dist {
                    best_dist = dist;
                    best = centroid_idx;
                }
            }

            assignments[sample_idx] = best;
            for channel in 0..3 {
                sums[best][channel] += sample[channel];
            }
            counts[best] += 1;
        }

        let mut changed = false;
        for i in 0..k {
            if counts[i] == 0 {
                let reseed = samples[(i + iter) % samples.len()];
                if squared_distance(&centroids[i], &reseed) > CONVERGENCE {
                    changed = true;
                }
                centroids[i] = reseed;
                continue;
            }
            let n = counts[i] as f32;
            let new_centroid = [sums[i][0] / n, sums[i][1] / n, sums[i][2] / n];
            if squared_distance(&centroids[i], &new_centroid) > CONVERGENCE {
                changed = true;
            }
            centroids[i] = new_centroid;
        }

        if !changed {
            break;
        }
    }

    let mut counts = vec![0usize; k];
    for &assignment in &assignments {
        counts[assignment] += 1;
    }

    // centroids of empty clusters may have been reseeded after the last
    // assignment; their count is zero and callers drop them
    centroids
        .into_iter()
        .zip(counts)
        .map(|(centroid, count)| Cluster { centroid, count })
        .collect()
}

fn color_from_centroid(centroid: [f32; 3]) -> Rgb {
    Rgb::new(
        centroid[0].clamp(0.0, 255.0).round() as u8,
        centroid[1].clamp(0.0, 255.0).round() as u8,
        centroid[2].clamp(0.0, 255.0).round() as u8,
    )
}

fn color_distance_sq(a: Rgb, b: Rgb) -> f32 {
    let dr = a.r as f32 - b.r as f32;
    let dg = a.g as f32 - b.g as f32;
    let db = a.b as f32 - b.b as f32;
    dr * dr + dg * dg + db * db
}
