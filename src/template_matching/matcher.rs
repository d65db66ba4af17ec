/// Region-bounded template matching
///
/// Correlates a cached template against a capture (optionally cropped to a
/// search region) and reports the best location in full-capture coordinates.
use super::store::TemplateStore;
use super::types::{MatchRequest, MatchResult, Template};
use image::{GrayImage, ImageBuffer, Luma, RgbImage};
use imageproc::template_matching::find_extremes;
use std::sync::Arc;

/// Per-position score surface.
pub type ScoreSurface = ImageBuffer<Luma<f32>, Vec<f32>>;

pub const DEFAULT_THRESHOLD: f32 = 0.9;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CorrelationMethod {
    /// Zero-mean normalized cross-correlation (correlation coefficient),
    /// in [-1, 1]. Insensitive to uniform brightness shifts. All sums are
    /// exact integers, so the surface is bit-for-bit reproducible.
    #[default]
    CoefficientNormalized,
    /// Plain normalized cross-correlation, in [0, 1] for 8-bit images.
    CrossCorrelationNormalized,
}

/// Anything that can answer a match request against a capture.
pub trait Matcher: Send + Sync {
    fn find(&self, capture: &RgbImage, request: &MatchRequest<'_>) -> MatchResult;
}

/// Matcher backed by the shared template store.
pub struct RegionMatcher {
    store: Arc<TemplateStore>,
    method: CorrelationMethod,
}

impl RegionMatcher {
    pub fn new(store: Arc<TemplateStore>) -> Self {
        Self {
            store,
            method: CorrelationMethod::default(),
        }
    }

    pub fn with_method(mut self, method: CorrelationMethod) -> Self {
        self.method = method;
        self
    }

    pub fn store(&self) -> &Arc<TemplateStore> {
        &self.store
    }

    /// Match a specific template. A region that does not fit in the capture
    /// is ignored and the whole frame is searched instead.
    pub fn match_template(
        capture: &RgbImage,
        template: &Template,
        request: &MatchRequest<'_>,
        method: CorrelationMethod,
    ) -> MatchResult {
        let (offset_x, offset_y, cropped) = match request.region {
            Some(region) if region.fits_within(capture.width(), capture.height()) => {
                let view = image::imageops::crop_imm(
                    capture,
                    region.x,
                    region.y,
                    region.width,
                    region.height,
                );
                (region.x, region.y, Some(view.to_image()))
            }
            Some(region) => {
                log::debug!(
                    "Search region ({}) exceeds capture {}x{}, using full frame - {}",
                    region,
                    capture.width(),
                    capture.height(),
                    template.name
                );
                (0, 0, None)
            }
            None => (0, 0, None),
        };
        let search = cropped.as_ref().unwrap_or(capture);

        if template.width() == 0
            || template.height() == 0
            || template.width() > search.width()
            || template.height() > search.height()
        {
            log::debug!(
                "Template {} ({}x{}) does not fit search area {}x{}",
                template.name,
                template.width(),
                template.height(),
                search.width(),
                search.height()
            );
            return MatchResult::miss();
        }

        let surface = correlation_surface(search, &template.image, method);
        let extremes = find_extremes(&surface);
        let (local_x, local_y) = extremes.max_value_location;
        let score = extremes.max_value;
        let success = score >= request.threshold;

        let result = MatchResult {
            success,
            x: local_x + offset_x,
            y: local_y + offset_y,
            score,
        };
        log::debug!(
            "{} - score {:.6}, threshold {:.2}, at ({}, {}){} {}",
            template.name,
            score,
            request.threshold,
            result.x,
            result.y,
            if cropped.is_some() {
                format!(" [in region ({local_x},{local_y})]")
            } else {
                String::new()
            },
            if success { "✓" } else { "✗" }
        );
        result
    }
}

impl Matcher for RegionMatcher {
    fn find(&self, capture: &RgbImage, request: &MatchRequest<'_>) -> MatchResult {
        // Lock is held only for the lookup; the Arc keeps the template alive
        // across a concurrent reload.
        match self.store.get(request.template) {
            Some(template) => Self::match_template(capture, &template, request, self.method),
            None => {
                log::debug!("Template {} not loaded", request.template);
                MatchResult::miss()
            }
        }
    }
}

/// Score every placement of `template` inside `image`. The surface is
/// `(W - w + 1) x (H - h + 1)`; the caller guarantees the template fits.
///
/// Colour channels are pooled: sums, energies and variances are added over
/// R, G and B before normalising, so a grey copy of a coloured template does
/// not correlate fully.
pub fn correlation_surface(
    image: &RgbImage,
    template: &RgbImage,
    method: CorrelationMethod,
) -> ScoreSurface {
    let (iw, ih) = (image.width() as usize, image.height() as usize);
    let (tw, th) = (template.width() as usize, template.height() as usize);
    let n = (tw * th) as i128;

    let image_planes = channels(image);
    let tpl_planes = channels(template);
    let areas: Vec<SummedArea> = image_planes.iter().map(SummedArea::new).collect();
    let tpl_sums: Vec<(i128, i128)> = tpl_planes
        .iter()
        .map(|plane| {
            let raw = plane.as_raw();
            let sum: i128 = raw.iter().map(|&v| v as i128).sum();
            let sq: i128 = raw.iter().map(|&v| (v as i128) * (v as i128)).sum();
            (sum, sq)
        })
        .collect();

    let spread = |sum: i128, sq: i128| match method {
        CorrelationMethod::CoefficientNormalized => n * sq - sum * sum,
        CorrelationMethod::CrossCorrelationNormalized => sq,
    };
    let t_spread: i128 = tpl_sums.iter().map(|&(sum, sq)| spread(sum, sq)).sum();

    let out_w = (iw - tw + 1) as u32;
    let out_h = (ih - th + 1) as u32;
    ImageBuffer::from_fn(out_w, out_h, |x, y| {
        let (x, y) = (x as usize, y as usize);
        let windows: Vec<(i128, i128)> = areas
            .iter()
            .map(|area| {
                let (sum, sq) = area.window(x, y, tw, th);
                (sum as i128, sq as i128)
            })
            .collect();
        let w_spread: i128 = windows.iter().map(|&(sum, sq)| spread(sum, sq)).sum();
        if w_spread <= 0 || t_spread <= 0 {
            return Luma([0.0]);
        }

        let numerator: i128 = (0..CHANNELS)
            .map(|c| {
                let dot = window_dot(&image_planes[c], &tpl_planes[c], x, y) as i128;
                match method {
                    CorrelationMethod::CoefficientNormalized => {
                        n * dot - tpl_sums[c].0 * windows[c].0
                    }
                    CorrelationMethod::CrossCorrelationNormalized => dot,
                }
            })
            .sum();
        let denominator = (w_spread as f64).sqrt() * (t_spread as f64).sqrt();
        let score = (numerator as f64 / denominator).clamp(-1.0, 1.0);
        Luma([score as f32])
    })
}

const CHANNELS: usize = 3;

fn channels(image: &RgbImage) -> [GrayImage; CHANNELS] {
    std::array::from_fn(|c| {
        GrayImage::from_fn(image.width(), image.height(), |x, y| {
            Luma([image.get_pixel(x, y)[c]])
        })
    })
}

/// Sum of products between `template` and the window of `image` at (x, y).
fn window_dot(image: &GrayImage, template: &GrayImage, x: usize, y: usize) -> u64 {
    let iw = image.width() as usize;
    let (tw, th) = (template.width() as usize, template.height() as usize);
    let (img, tpl) = (image.as_raw(), template.as_raw());
    (0..th)
        .map(|ty| {
            let start = (y + ty) * iw + x;
            img[start..start + tw]
                .iter()
                .zip(&tpl[ty * tw..(ty + 1) * tw])
                .map(|(&a, &b)| a as u64 * b as u64)
                .sum::<u64>()
        })
        .sum()
}

/// Window sums of pixel values and squared values.
struct SummedArea {
    stride: usize,
    sum: Vec<u64>,
    sum_sq: Vec<u64>,
}

impl SummedArea {
    fn new(image: &GrayImage) -> Self {
        let width = image.width() as usize;
        let height = image.height() as usize;
        let stride = width + 1;
        let mut sum = vec![0u64; stride * (height + 1)];
        let mut sum_sq = vec![0u64; stride * (height + 1)];
        let raw = image.as_raw();

        for y in 0..height {
            let mut row = 0u64;
            let mut row_sq = 0u64;
            for x in 0..width {
                let v = raw[y * width + x] as u64;
                row += v;
                row_sq += v * v;
                let at = (y + 1) * stride + x + 1;
                sum[at] = sum[at - stride] + row;
                sum_sq[at] = sum_sq[at - stride] + row_sq;
            }
        }
        Self {
            stride,
            sum,
            sum_sq,
        }
    }

    fn window(&self, x: usize, y: usize, w: usize, h: usize) -> (u64, u64) {
        let s = self.stride;
        let (tl, tr, bl, br) = (y * s + x, y * s + x + w, (y + h) * s + x, (y + h) * s + x + w);
        (
            self.sum[br] + self.sum[tl] - self.sum[tr] - self.sum[bl],
            self.sum_sq[br] + self.sum_sq[tl] - self.sum_sq[tr] - self.sum_sq[bl],
        )
    }
}
