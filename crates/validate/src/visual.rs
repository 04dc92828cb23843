//! Visual equivalence with screenshot comparison
//!
//! Pixels are compared with a perceptual YIQ color distance. Images of
//! different sizes are both placed at the origin of a canvas sized to the
//! larger width and height; uncovered canvas area is transparent.

use std::path::{Path, PathBuf};

use image::{Rgba, RgbaImage};
use sha2::{Digest, Sha256};
use sitemirror_common::{CheckKind, Route, SiteMirrorConfig, ValidationResult};
use tracing::{debug, info, warn};

use crate::browser::PageDriver;
use crate::error::ValidateResult;

/// Highest possible YIQ delta between two pixels
const MAX_YIQ_DELTA: f64 = 35215.0;

/// Outcome of comparing two screenshots
#[derive(Debug, Clone)]
pub struct VisualDiff {
    /// Whether the images match within the threshold
    pub matches: bool,

    /// Percentage of canvas pixels that differ
    pub diff_percent: f64,

    pub diff_pixels: u64,

    /// Pixels on the padded canvas
    pub total_pixels: u64,

    /// Where the diff visualization was written
    pub diff_image_path: PathBuf,

    /// Both files hashed equal, so no pixel scan ran
    pub identical: bool,
}

/// Full-page screenshot comparison between local and live renderings
pub struct VisualDiffEngine {
    screenshot_dir: PathBuf,
    diff_dir: PathBuf,
    /// Maximum differing pixels, in percent of the canvas
    threshold_percent: f64,
    /// Per-pixel perceptual threshold (0.0 - 1.0)
    color_threshold: f64,
}

impl VisualDiffEngine {
    pub fn new(
        screenshot_dir: impl Into<PathBuf>,
        diff_dir: impl Into<PathBuf>,
        threshold_percent: f64,
        color_threshold: f64,
    ) -> Self {
        Self {
            screenshot_dir: screenshot_dir.into(),
            diff_dir: diff_dir.into(),
            threshold_percent,
            color_threshold,
        }
    }

    pub fn from_config(config: &SiteMirrorConfig) -> Self {
        Self::new(
            config.paths.screenshot_dir.clone(),
            config.paths.diff_dir.clone(),
            config.validation.visual_threshold_percent,
            config.validation.pixel_color_threshold,
        )
    }

    /// Diff image location for a route
    pub fn diff_path(&self, route: &Route) -> PathBuf {
        self.diff_dir.join(format!("{}.png", route.flat_name()))
    }

    /// Screenshot both renderings of `route` and compare them
    pub async fn check(
        &self,
        driver: &dyn PageDriver,
        route: &Route,
        local_base: &str,
        live_base: &str,
    ) -> ValidationResult {
        let flat = route.flat_name();
        let local_shot = self.screenshot_dir.join(format!("{}-local.png", flat));
        let live_shot = self.screenshot_dir.join(format!("{}-live.png", flat));

        if let Err(e) = driver.screenshot(&route.url_on(local_base), &local_shot).await {
            return ValidationResult::fail(
                route.clone(),
                CheckKind::Visual,
                format!("local screenshot failed: {}", e),
            );
        }
        if let Err(e) = driver.screenshot(&route.url_on(live_base), &live_shot).await {
            return ValidationResult::fail(
                route.clone(),
                CheckKind::Visual,
                format!("live screenshot failed: {}", e),
            );
        }

        match self.compare_files(route, &local_shot, &live_shot) {
            Ok(diff) => self.to_result(route, &diff),
            Err(e) => ValidationResult::fail(
                route.clone(),
                CheckKind::Visual,
                format!("screenshot comparison failed: {}", e),
            ),
        }
    }

    fn to_result(&self, route: &Route, diff: &VisualDiff) -> ValidationResult {
        let result = if diff.matches {
            ValidationResult::pass(route.clone(), CheckKind::Visual)
        } else {
            ValidationResult::fail(
                route.clone(),
                CheckKind::Visual,
                format!(
                    "{:.3}% of pixels differ (threshold {}%), see {}",
                    diff.diff_percent,
                    self.threshold_percent,
                    diff.diff_image_path.display()
                ),
            )
        };
        result.with_metric(diff.diff_percent)
    }

    /// Compare two PNG files and write the diff image for `route`
    pub fn compare_files(&self, route: &Route, local: &Path, live: &Path) -> ValidateResult<VisualDiff> {
        let local_hash = hash_file(local)?;
        let live_hash = hash_file(live)?;
        let local_img = image::open(local)?.to_rgba8();

        if local_hash == live_hash {
            debug!("Screenshots for {} match exactly (same hash)", route);
            let diff_image = faded_copy(&local_img);
            let diff_image_path = self.write_diff(route, &diff_image)?;
            return Ok(VisualDiff {
                matches: true,
                diff_percent: 0.0,
                diff_pixels: 0,
                total_pixels: u64::from(local_img.width()) * u64::from(local_img.height()),
                diff_image_path,
                identical: true,
            });
        }

        let live_img = image::open(live)?.to_rgba8();
        self.compare_images(route, &local_img, &live_img)
    }

    /// Compare two decoded images and write the diff image for `route`
    pub fn compare_images(
        &self,
        route: &Route,
        local: &RgbaImage,
        live: &RgbaImage,
    ) -> ValidateResult<VisualDiff> {
        if local.dimensions() != live.dimensions() {
            warn!(
                "Screenshot sizes differ for {}: local {:?} vs live {:?}, padding",
                route,
                local.dimensions(),
                live.dimensions()
            );
        }

        let (diff_pixels, diff_image) = pixel_diff(local, live, self.color_threshold);
        let total_pixels = u64::from(diff_image.width()) * u64::from(diff_image.height());
        let diff_percent = diff_percent(diff_pixels, total_pixels);
        let matches = diff_percent <= self.threshold_percent;

        let diff_image_path = self.write_diff(route, &diff_image)?;

        if matches {
            debug!("Visual check passed for {}: {:.3}%", route, diff_percent);
        } else {
            warn!(
                "Visual mismatch for {}: {:.3}% pixels differ (threshold: {}%)",
                route, diff_percent, self.threshold_percent
            );
        }

        Ok(VisualDiff {
            matches,
            diff_percent,
            diff_pixels,
            total_pixels,
            diff_image_path,
            identical: false,
        })
    }

    fn write_diff(&self, route: &Route, diff_image: &RgbaImage) -> ValidateResult<PathBuf> {
        std::fs::create_dir_all(&self.diff_dir)?;
        let path = self.diff_path(route);
        diff_image.save(&path)?;
        info!("Wrote diff image {}", path.display());
        Ok(path)
    }
}

/// Percentage of differing pixels; an empty canvas differs by nothing
pub fn diff_percent(diff_pixels: u64, total_pixels: u64) -> f64 {
    if total_pixels == 0 {
        return 0.0;
    }
    diff_pixels as f64 / total_pixels as f64 * 100.0
}

/// Count differing pixels over the padded canvas and render the diff
/// visualization: differing pixels in red, the rest as a faded grayscale
/// of the first image.
pub fn pixel_diff(a: &RgbaImage, b: &RgbaImage, color_threshold: f64) -> (u64, RgbaImage) {
    let width = a.width().max(b.width());
    let height = a.height().max(b.height());
    let max_delta = MAX_YIQ_DELTA * color_threshold * color_threshold;

    let mut out = RgbaImage::new(width, height);
    let mut diff = 0u64;

    for y in 0..height {
        for x in 0..width {
            let pa = padded_pixel(a, x, y);
            let pb = padded_pixel(b, x, y);

            if color_delta(pa, pb) > max_delta {
                diff += 1;
                out.put_pixel(x, y, Rgba([255, 0, 0, 255]));
            } else {
                out.put_pixel(x, y, faded(pa));
            }
        }
    }

    (diff, out)
}

fn padded_pixel(img: &RgbaImage, x: u32, y: u32) -> Rgba<u8> {
    if x < img.width() && y < img.height() {
        *img.get_pixel(x, y)
    } else {
        Rgba([0, 0, 0, 0])
    }
}

/// Squared YIQ distance between two pixels after blending onto white
fn color_delta(a: Rgba<u8>, b: Rgba<u8>) -> f64 {
    if a == b {
        return 0.0;
    }

    let (r1, g1, b1) = blend_white(a);
    let (r2, g2, b2) = blend_white(b);

    let y = rgb2y(r1, g1, b1) - rgb2y(r2, g2, b2);
    let i = rgb2i(r1, g1, b1) - rgb2i(r2, g2, b2);
    let q = rgb2q(r1, g1, b1) - rgb2q(r2, g2, b2);

    0.5053 * y * y + 0.299 * i * i + 0.1957 * q * q
}

fn blend_white(p: Rgba<u8>) -> (f64, f64, f64) {
    let alpha = f64::from(p[3]) / 255.0;
    let blend = |c: u8| 255.0 + (f64::from(c) - 255.0) * alpha;
    (blend(p[0]), blend(p[1]), blend(p[2]))
}

fn rgb2y(r: f64, g: f64, b: f64) -> f64 {
    r * 0.29889531 + g * 0.58662247 + b * 0.11448223
}

fn rgb2i(r: f64, g: f64, b: f64) -> f64 {
    r * 0.59597799 - g * 0.27417610 - b * 0.32180189
}

fn rgb2q(r: f64, g: f64, b: f64) -> f64 {
    r * 0.21147017 - g * 0.52261711 + b * 0.31114694
}

fn faded(p: Rgba<u8>) -> Rgba<u8> {
    let (r, g, b) = blend_white(p);
    let gray = 255.0 + (rgb2y(r, g, b) - 255.0) * 0.1;
    let v = gray.round().clamp(0.0, 255.0) as u8;
    Rgba([v, v, v, 255])
}

fn faded_copy(img: &RgbaImage) -> RgbaImage {
    let mut out = RgbaImage::new(img.width(), img.height());
    for (x, y, p) in img.enumerate_pixels() {
        out.put_pixel(x, y, faded(*p));
    }
    out
}

/// Hash a file using SHA256
fn hash_file(path: &Path) -> ValidateResult<String> {
    let data = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
    const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

    fn solid(width: u32, height: u32, color: Rgba<u8>) -> RgbaImage {
        RgbaImage::from_pixel(width, height, color)
    }

    /// A 1000x100 white image with the first `n` pixels painted black
    fn with_black_pixels(n: u32) -> RgbaImage {
        let mut img = solid(1000, 100, WHITE);
        for i in 0..n {
            img.put_pixel(i % 1000, i / 1000, BLACK);
        }
        img
    }

    fn engine(dir: &Path) -> VisualDiffEngine {
        VisualDiffEngine::new(dir.join("screens"), dir.join("diffs"), 0.1, 0.1)
    }

    #[test]
    fn test_self_comparison_is_zero() {
        let img = with_black_pixels(300);
        let (diff, out) = pixel_diff(&img, &img, 0.1);
        assert_eq!(diff, 0);
        assert_eq!(out.dimensions(), (1000, 100));
        assert_eq!(diff_percent(diff, 100_000), 0.0);
    }

    #[test]
    fn test_padding_in_both_dimensions() {
        let wide = solid(40, 10, BLACK);
        let tall = solid(10, 40, BLACK);

        let (diff, out) = pixel_diff(&wide, &tall, 0.1);
        assert_eq!(out.dimensions(), (40, 40));
        // Overlap is 10x10; each image alone covers 300 more pixels
        assert_eq!(diff, 600);
        assert_eq!(diff_percent(diff, 1600), 37.5);
    }

    #[test]
    fn test_padding_against_white_is_invisible() {
        // Transparent padding blends to white
        let small = solid(5, 5, WHITE);
        let large = solid(8, 6, WHITE);
        let (diff, _) = pixel_diff(&small, &large, 0.1);
        assert_eq!(diff, 0);
    }

    #[test]
    fn test_small_color_shift_within_threshold() {
        let a = solid(4, 4, Rgba([200, 200, 200, 255]));
        let b = solid(4, 4, Rgba([203, 201, 199, 255]));
        assert_eq!(pixel_diff(&a, &b, 0.1).0, 0);
        assert_eq!(pixel_diff(&a, &b, 0.0).0, 16);
    }

    #[test]
    fn test_empty_canvas() {
        let empty = RgbaImage::new(0, 0);
        let (diff, out) = pixel_diff(&empty, &empty, 0.1);
        assert_eq!(diff, 0);
        assert_eq!(diff_percent(diff, u64::from(out.width() * out.height())), 0.0);
    }

    #[test]
    fn test_threshold_pass_writes_diff_image() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let route = Route::new("about-us").unwrap();

        // 50 of 100000 pixels = 0.05%
        let diff = engine
            .compare_images(&route, &with_black_pixels(0), &with_black_pixels(50))
            .unwrap();

        assert!(diff.matches);
        assert_eq!(diff.diff_pixels, 50);
        assert!((diff.diff_percent - 0.05).abs() < 1e-9);
        assert_eq!(diff.diff_image_path, dir.path().join("diffs/about-us.png"));
        assert!(diff.diff_image_path.is_file());
    }

    #[test]
    fn test_threshold_fail_still_writes_diff_image() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let route = Route::new("events/2025/spring").unwrap();

        // 200 of 100000 pixels = 0.2%
        let diff = engine
            .compare_images(&route, &with_black_pixels(0), &with_black_pixels(200))
            .unwrap();

        assert!(!diff.matches);
        assert!((diff.diff_percent - 0.2).abs() < 1e-9);
        assert!(dir.path().join("diffs/events%2F2025%2Fspring.png").is_file());

        let result = engine.to_result(&route, &diff);
        assert!(!result.passed);
        assert_eq!(result.metric, Some(diff.diff_percent));
    }

    #[test]
    fn test_identical_files_skip_scan() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let route = Route::root();

        let a = dir.path().join("a.png");
        let b = dir.path().join("b.png");
        with_black_pixels(10).save(&a).unwrap();
        std::fs::copy(&a, &b).unwrap();

        let diff = engine.compare_files(&route, &a, &b).unwrap();
        assert!(diff.identical);
        assert!(diff.matches);
        assert_eq!(diff.diff_pixels, 0);
        assert_eq!(diff.total_pixels, 100_000);
        assert!(dir.path().join("diffs/%2F.png").is_file());
    }
}
