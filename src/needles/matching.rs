//! 模板匹配：在截图（haystack）中寻找模板（needle）。
//!
//! 匹配在灰度图上进行。两边都小于 10 像素的模板用归一化平方差，
//! 其余用归一化互相关；结果统一换算成 0..=1 的置信度，越大越像。

use image::imageops::{crop_imm, grayscale};
use image::{GrayImage, Luma, Rgb, RgbaImage};
use imageproc::definitions::Image;
use imageproc::template_matching::{find_extremes, match_template, MatchTemplateMethod};
use serde::Serialize;

const SMALL_TEMPLATE: u32 = 10;

/// 搜索区域，坐标为截图中的像素
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// 一次命中。`x`, `y` 是模板左上角在整张截图中的位置
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NeedleMatch {
    pub x: u32,
    pub y: u32,
    pub confidence: f32,
}

/// 整个搜索区域里置信度最高的位置。模板比搜索区域大时返回 `None`
pub fn best_match(
    haystack: &RgbaImage,
    needle: &RgbaImage,
    region: Option<Region>,
) -> Option<NeedleMatch> {
    let (scores, origin) = confidence_map(haystack, needle, region)?;
    let extremes = find_extremes(&scores);
    let (x, y) = extremes.max_value_location;
    Some(NeedleMatch {
        x: x + origin.0,
        y: y + origin.1,
        confidence: extremes.max_value,
    })
}

/// 所有置信度不低于 `accuracy` 的位置，按置信度从高到低排列。
///
/// 与已接受的结果距离小于模板对角线一半的位置视为同一个目标，被丢弃。
pub fn find_matches(
    haystack: &RgbaImage,
    needle: &RgbaImage,
    accuracy: f32,
    region: Option<Region>,
) -> Vec<NeedleMatch> {
    let Some((scores, origin)) = confidence_map(haystack, needle, region) else {
        return Vec::new();
    };

    let mut candidates: Vec<NeedleMatch> = scores
        .enumerate_pixels()
        .filter(|(_, _, score)| score[0] >= accuracy)
        .map(|(x, y, score)| NeedleMatch {
            x: x + origin.0,
            y: y + origin.1,
            confidence: score[0],
        })
        .collect();
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let (width, height) = needle.dimensions();
    let min_distance = f64::from(width * width + height * height).sqrt() / 2.0;
    let mut accepted: Vec<NeedleMatch> = Vec::new();
    for candidate in candidates {
        let duplicate = accepted.iter().any(|kept| {
            let dx = f64::from(candidate.x) - f64::from(kept.x);
            let dy = f64::from(candidate.y) - f64::from(kept.y);
            (dx * dx + dy * dy).sqrt() < min_distance
        });
        if !duplicate {
            accepted.push(candidate);
        }
    }
    accepted
}

/// 读取一个像素的 RGB 值，越界返回 `None`
pub fn pixel_color(image: &RgbaImage, x: u32, y: u32) -> Option<Rgb<u8>> {
    let (width, height) = image.dimensions();
    if x >= width || y >= height {
        return None;
    }
    let [r, g, b, _] = image.get_pixel(x, y).0;
    Some(Rgb([r, g, b]))
}

/// 计算置信度图，同时返回搜索区域左上角
fn confidence_map(
    haystack: &RgbaImage,
    needle: &RgbaImage,
    region: Option<Region>,
) -> Option<(Image<Luma<f32>>, (u32, u32))> {
    let (area, origin) = match region {
        Some(r) => (
            grayscale(&crop_imm(haystack, r.x, r.y, r.width, r.height).to_image()),
            (r.x, r.y),
        ),
        None => (grayscale(haystack), (0, 0)),
    };
    let template: GrayImage = grayscale(needle);
    let (needle_w, needle_h) = template.dimensions();
    let (area_w, area_h) = area.dimensions();
    if needle_w == 0 || needle_h == 0 || needle_w > area_w || needle_h > area_h {
        return None;
    }

    let small = needle_w < SMALL_TEMPLATE && needle_h < SMALL_TEMPLATE;
    let method = if small {
        MatchTemplateMethod::SumOfSquaredErrorsNormalized
    } else {
        MatchTemplateMethod::CrossCorrelationNormalized
    };
    let mut scores = match_template(&area, &template, method);
    for score in scores.pixels_mut() {
        let value = if small { 1.0 - score[0] } else { score[0] };
        // 全黑区域会得到 NaN
        score[0] = if value.is_finite() {
            value.clamp(0.0, 1.0)
        } else {
            0.0
        };
    }
    Some((scores, origin))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn checker(size: u32) -> RgbaImage {
        RgbaImage::from_fn(size, size, |x, y| {
            if (x / 2 + y / 2) % 2 == 0 {
                Rgba([250, 250, 250, 255])
            } else {
                Rgba([20, 20, 20, 255])
            }
        })
    }

    fn screen_with(needle: &RgbaImage, at: &[(u32, u32)]) -> RgbaImage {
        let mut screen = RgbaImage::from_pixel(64, 48, Rgba([120, 120, 120, 255]));
        for &(x, y) in at {
            image::imageops::replace(&mut screen, needle, i64::from(x), i64::from(y));
        }
        screen
    }

    #[test]
    fn test_best_match_finds_needle() {
        let needle = checker(12);
        let screen = screen_with(&needle, &[(30, 20)]);
        let hit = best_match(&screen, &needle, None).unwrap();
        assert_eq!((hit.x, hit.y), (30, 20));
        assert!(hit.confidence > 0.99);
    }

    #[test]
    fn test_region_offsets_result() {
        let needle = checker(12);
        let screen = screen_with(&needle, &[(30, 20)]);
        let hit = best_match(&screen, &needle, Some(Region::new(24, 16, 30, 24))).unwrap();
        assert_eq!((hit.x, hit.y), (30, 20));
    }

    #[test]
    fn test_needle_larger_than_region() {
        let needle = checker(12);
        let screen = screen_with(&needle, &[]);
        assert!(best_match(&screen, &needle, Some(Region::new(0, 0, 8, 8))).is_none());
    }

    #[test]
    fn test_small_needle_uses_squared_error() {
        let needle = checker(6);
        let screen = screen_with(&needle, &[(5, 7)]);
        let hit = best_match(&screen, &needle, None).unwrap();
        assert_eq!((hit.x, hit.y), (5, 7));
        assert!(hit.confidence > 0.99);
    }

    #[test]
    fn test_find_matches_suppresses_neighbours() {
        let needle = checker(12);
        let screen = screen_with(&needle, &[(2, 2), (40, 30)]);
        let hits = find_matches(&screen, &needle, 0.95, None);
        let mut points: Vec<_> = hits.iter().map(|m| (m.x, m.y)).collect();
        points.sort();
        assert_eq!(points, vec![(2, 2), (40, 30)]);
    }

    #[test]
    fn test_pixel_color() {
        let mut screen = RgbaImage::new(4, 4);
        screen.put_pixel(1, 2, Rgba([10, 20, 30, 255]));
        assert_eq!(pixel_color(&screen, 1, 2), Some(Rgb([10, 20, 30])));
        assert_eq!(pixel_color(&screen, 4, 0), None);
    }
}
