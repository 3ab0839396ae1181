//! Dominant-colour extraction and colour-pane rendering for shared pictures.

use std::collections::HashMap;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, Rgb, RgbImage};

use crate::config::PaletteConfig;
use crate::error::AppResult;

/// Images are downsampled to fit this box before counting colours.
const SAMPLE_SIZE: u32 = 128;
/// Channel bits dropped when bucketing pixels (16 levels per channel).
const BUCKET_SHIFT: u8 = 4;
/// Squared RGB distance below which two dominant colours count as the same.
const MIN_DISTANCE_SQ: u32 = 48 * 48;
const GREY_SATURATION: f32 = 0.08;
const SATURATION_BOOST: f32 = 1.3;
const MIN_VALUE: f32 = 0.35;
const FALLBACK_COLOR: Rgb<u8> = Rgb([128, 128, 128]);

#[derive(Debug, Default)]
struct ColorBucket {
    key: (u8, u8, u8),
    count: u32,
    sum: [u64; 3],
}

impl ColorBucket {
    fn mean(&self) -> Rgb<u8> {
        let n = self.count.max(1) as u64;
        Rgb([
            (self.sum[0] / n) as u8,
            (self.sum[1] / n) as u8,
            (self.sum[2] / n) as u8,
        ])
    }
}

/// Histogram of an image's colours, most frequent first.
pub struct ColorFinder {
    buckets: Vec<ColorBucket>,
}

impl ColorFinder {
    pub fn new(image: &DynamicImage) -> Self {
        let sample = if image.width() > SAMPLE_SIZE || image.height() > SAMPLE_SIZE {
            image.thumbnail(SAMPLE_SIZE, SAMPLE_SIZE).to_rgb8()
        } else {
            image.to_rgb8()
        };

        let mut by_key: HashMap<(u8, u8, u8), ColorBucket> = HashMap::new();
        for pixel in sample.pixels() {
            let key = (
                pixel[0] >> BUCKET_SHIFT,
                pixel[1] >> BUCKET_SHIFT,
                pixel[2] >> BUCKET_SHIFT,
            );
            let bucket = by_key.entry(key).or_insert_with(|| ColorBucket {
                key,
                ..Default::default()
            });
            bucket.count += 1;
            for (sum, channel) in bucket.sum.iter_mut().zip(pixel.0) {
                *sum += channel as u64;
            }
        }

        let mut buckets: Vec<ColorBucket> = by_key.into_values().collect();
        buckets.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));

        Self { buckets }
    }

    /// Up to `n` frequent colours, skipping ones too close to a colour already picked.
    pub fn dominant_colors(&self, n: usize) -> Vec<Rgb<u8>> {
        let mut picked: Vec<Rgb<u8>> = Vec::with_capacity(n);
        for bucket in &self.buckets {
            if picked.len() >= n {
                break;
            }
            let color = bucket.mean();
            if picked
                .iter()
                .all(|p| distance_sq(*p, color) >= MIN_DISTANCE_SQ)
            {
                picked.push(color);
            }
        }
        picked
    }

    /// The most dominant colour followed by the complements of the dominant
    /// colours, all with boosted saturation and a floor on brightness.
    pub fn strategy_enhanced_complements(&self, n: usize) -> Vec<Rgb<u8>> {
        if n == 0 {
            return Vec::new();
        }
        let dominant = self.dominant_colors(n);
        let mut colors = Vec::with_capacity(n);
        if let Some(first) = dominant.first() {
            colors.push(enhance(*first));
        }
        colors.extend(dominant.iter().map(|c| enhance(complement(*c))));
        colors.truncate(n);
        colors
    }
}

fn distance_sq(a: Rgb<u8>, b: Rgb<u8>) -> u32 {
    a.0.iter()
        .zip(b.0.iter())
        .map(|(x, y)| {
            let d = *x as i32 - *y as i32;
            (d * d) as u32
        })
        .sum()
}

fn rgb_to_hsv(c: Rgb<u8>) -> (f32, f32, f32) {
    let [r, g, b] = c.0.map(|v| v as f32 / 255.0);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let hue = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (((g - b) / delta).rem_euclid(6.0))
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let saturation = if max == 0.0 { 0.0 } else { delta / max };

    (hue, saturation, max)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
    let c = v * s;
    let hp = h.rem_euclid(360.0) / 60.0;
    let x = c * (1.0 - ((hp % 2.0) - 1.0).abs());
    let (r, g, b) = match hp as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = v - c;
    let to_u8 = |f: f32| ((f + m) * 255.0).round().clamp(0.0, 255.0) as u8;
    Rgb([to_u8(r), to_u8(g), to_u8(b)])
}

/// Opposite hue; greys have no hue, so their brightness is inverted instead.
pub fn complement(c: Rgb<u8>) -> Rgb<u8> {
    let (h, s, v) = rgb_to_hsv(c);
    if s <= GREY_SATURATION {
        hsv_to_rgb(h, s, 1.0 - v)
    } else {
        hsv_to_rgb(h + 180.0, s, v)
    }
}

fn enhance(c: Rgb<u8>) -> Rgb<u8> {
    let (h, mut s, v) = rgb_to_hsv(c);
    if s > GREY_SATURATION {
        s = (s * SATURATION_BOOST).min(1.0);
    }
    hsv_to_rgb(h, s, v.clamp(MIN_VALUE, 1.0))
}

/// Render `colors` as equal-width vertical panes.
pub fn generate_color_panes(colors: &[Rgb<u8>], width: u32, height: u32) -> RgbImage {
    let width = width.max(1);
    let height = height.max(1);
    let panes = colors.len().max(1) as u64;

    RgbImage::from_fn(width, height, |x, _| {
        let idx = (x as u64 * panes / width as u64) as usize;
        colors.get(idx).copied().unwrap_or(FALLBACK_COLOR)
    })
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> AppResult<Vec<u8>> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100)).encode_image(image)?;
    Ok(out)
}

/// Decode `picture`, pick its enhanced-complement colours and return the
/// rendered colour panes as JPEG bytes.
pub fn render_palette(picture: &[u8], config: &PaletteConfig) -> AppResult<Vec<u8>> {
    let image = image::load_from_memory(picture)?;
    let finder = ColorFinder::new(&image);
    let colors = finder.strategy_enhanced_complements(config.colors);
    tracing::debug!(
        "Palette for {}x{} picture: {:?}",
        image.width(),
        image.height(),
        colors
    );
    let panes = generate_color_panes(&colors, config.width, config.height);
    encode_jpeg(&panes, config.jpeg_quality)
}
