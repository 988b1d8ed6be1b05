// ============================================================================
// BUILT-IN EFFECTS: tile-aware transforms driven through live preview
// ============================================================================
//
// Per-pixel adjustments share `apply_pixel_transform`, which maps each
// destination pixel from the source pixel at the same coordinates.
// Spatial effects read neighbours straight from the source image, so tiles
// never depend on each other's output.
// ============================================================================

use std::sync::Arc;

use image::{Rgba, RgbaImage};

use crate::effect::{Effect, EffectError, LiveEffect, SnapshotSource, TileTarget};

// ============================================================================
// HELPERS
// ============================================================================

/// Per-pixel transform over one tile.
/// `transform` receives (r, g, b, a) as f32 and returns (r, g, b, a) as f32.
fn apply_pixel_transform<F>(src: &RgbaImage, dst: &mut TileTarget, transform: F)
where
    F: Fn(f32, f32, f32, f32) -> (f32, f32, f32, f32),
{
    dst.for_each_mut(|x, y, out| {
        let px = src.get_pixel(x as u32, y as u32);
        let (nr, ng, nb, na) = transform(px[0] as f32, px[1] as f32, px[2] as f32, px[3] as f32);
        *out = Rgba([
            nr.round().clamp(0.0, 255.0) as u8,
            ng.round().clamp(0.0, 255.0) as u8,
            nb.round().clamp(0.0, 255.0) as u8,
            na.round().clamp(0.0, 255.0) as u8,
        ]);
    });
}

fn check_bounds(src: &RgbaImage, dst: &TileTarget) -> Result<(), EffectError> {
    let b = dst.bounds();
    if b.x < 0 || b.y < 0 || b.right() as u32 > src.width() || b.bottom() as u32 > src.height() {
        return Err(EffectError::failed(format!(
            "tile {:?} outside {}x{} source",
            b,
            src.width(),
            src.height()
        )));
    }
    Ok(())
}

// ============================================================================
// INSTANT ADJUSTMENTS (no parameters)
// ============================================================================

/// Invert R, G and B. Alpha is preserved.
#[derive(Clone, Debug, Default)]
pub struct InvertColors;

impl Effect for InvertColors {
    fn name(&self) -> &str {
        "Invert Colors"
    }

    fn is_configurable(&self) -> bool {
        false
    }

    fn render(&self, src: &RgbaImage, dst: &mut TileTarget) -> Result<(), EffectError> {
        check_bounds(src, dst)?;
        apply_pixel_transform(src, dst, |r, g, b, a| (255.0 - r, 255.0 - g, 255.0 - b, a));
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct Sepia;

impl Effect for Sepia {
    fn name(&self) -> &str {
        "Sepia"
    }

    fn is_configurable(&self) -> bool {
        false
    }

    fn render(&self, src: &RgbaImage, dst: &mut TileTarget) -> Result<(), EffectError> {
        check_bounds(src, dst)?;
        apply_pixel_transform(src, dst, |r, g, b, a| {
            let sr = 0.393 * r + 0.769 * g + 0.189 * b;
            let sg = 0.349 * r + 0.686 * g + 0.168 * b;
            let sb = 0.272 * r + 0.534 * g + 0.131 * b;
            (sr.min(255.0), sg.min(255.0), sb.min(255.0), a)
        });
        Ok(())
    }
}

/// Stretches each channel so its min → 0 and max → 255.
///
/// The channel ranges come from the whole image, so the effect renders as a
/// single tile.
#[derive(Clone, Debug, Default)]
pub struct AutoLevels;

impl Effect for AutoLevels {
    fn name(&self) -> &str {
        "Auto Levels"
    }

    fn is_tileable(&self) -> bool {
        false
    }

    fn is_configurable(&self) -> bool {
        false
    }

    fn render(&self, src: &RgbaImage, dst: &mut TileTarget) -> Result<(), EffectError> {
        check_bounds(src, dst)?;
        let b = dst.bounds();
        let mut min = [255u8; 3];
        let mut max = [0u8; 3];
        for y in b.y..b.bottom() {
            for x in b.x..b.right() {
                let px = src.get_pixel(x as u32, y as u32);
                if px[3] == 0 {
                    continue;
                }
                for c in 0..3 {
                    min[c] = min[c].min(px[c]);
                    max[c] = max[c].max(px[c]);
                }
            }
        }
        let luts = [
            build_stretch_lut(min[0], max[0]),
            build_stretch_lut(min[1], max[1]),
            build_stretch_lut(min[2], max[2]),
        ];
        dst.for_each_mut(|x, y, out| {
            let px = src.get_pixel(x as u32, y as u32);
            *out = Rgba([
                luts[0][px[0] as usize],
                luts[1][px[1] as usize],
                luts[2][px[2] as usize],
                px[3],
            ]);
        });
        Ok(())
    }
}

fn build_stretch_lut(min: u8, max: u8) -> [u8; 256] {
    let mut lut = [0u8; 256];
    if max <= min {
        for (i, v) in lut.iter_mut().enumerate() {
            *v = i as u8;
        }
        return lut;
    }
    let range = (max - min) as f32;
    for (i, v) in lut.iter_mut().enumerate() {
        let t = (i as f32 - min as f32) / range;
        *v = (t * 255.0).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

// ============================================================================
// CONFIGURABLE ADJUSTMENTS
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct BrightnessContrast {
    /// -255..255
    pub brightness: f32,
    /// -255..255
    pub contrast: f32,
}

impl Default for BrightnessContrast {
    fn default() -> Self {
        Self {
            brightness: 0.0,
            contrast: 0.0,
        }
    }
}

impl Effect for BrightnessContrast {
    fn name(&self) -> &str {
        "Brightness/Contrast"
    }

    fn render(&self, src: &RgbaImage, dst: &mut TileTarget) -> Result<(), EffectError> {
        check_bounds(src, dst)?;
        let contrast = self.contrast.clamp(-255.0, 255.0);
        let brightness = self.brightness;
        let factor = (259.0 * (contrast + 255.0)) / (255.0 * (259.0 - contrast));
        apply_pixel_transform(src, dst, move |r, g, b, a| {
            let nr = factor * (r + brightness - 128.0) + 128.0;
            let ng = factor * (g + brightness - 128.0) + 128.0;
            let nb = factor * (b + brightness - 128.0) + 128.0;
            (nr, ng, nb, a)
        });
        Ok(())
    }
}

/// Reduces the number of tonal levels per channel.
#[derive(Clone, Debug, PartialEq)]
pub struct Posterize {
    /// 2..=64
    pub levels: u32,
}

impl Default for Posterize {
    fn default() -> Self {
        Self { levels: 4 }
    }
}

impl Effect for Posterize {
    fn name(&self) -> &str {
        "Posterize"
    }

    fn render(&self, src: &RgbaImage, dst: &mut TileTarget) -> Result<(), EffectError> {
        check_bounds(src, dst)?;
        let factor = self.levels.clamp(2, 64) as f32;
        apply_pixel_transform(src, dst, move |r, g, b, a| {
            let p = |v: f32| (v / 255.0 * (factor - 1.0)).round() / (factor - 1.0) * 255.0;
            (p(r), p(g), p(b), a)
        });
        Ok(())
    }
}

// ============================================================================
// SPATIAL
// ============================================================================

/// Square box blur. Neighbours are sampled from the source with edge clamping.
#[derive(Clone, Debug, PartialEq)]
pub struct BoxBlur {
    pub radius: u32,
}

impl Default for BoxBlur {
    fn default() -> Self {
        Self { radius: 2 }
    }
}

impl Effect for BoxBlur {
    fn name(&self) -> &str {
        "Box Blur"
    }

    fn render(&self, src: &RgbaImage, dst: &mut TileTarget) -> Result<(), EffectError> {
        check_bounds(src, dst)?;
        let r = self.radius.min(64) as i32;
        if r == 0 {
            dst.for_each_mut(|x, y, out| *out = *src.get_pixel(x as u32, y as u32));
            return Ok(());
        }
        let max_x = src.width() as i32 - 1;
        let max_y = src.height() as i32 - 1;
        let count = ((2 * r + 1) * (2 * r + 1)) as u32;
        dst.for_each_mut(|x, y, out| {
            let mut sum = [0u32; 4];
            for dy in -r..=r {
                let sy = (y + dy).clamp(0, max_y) as u32;
                for dx in -r..=r {
                    let sx = (x + dx).clamp(0, max_x) as u32;
                    let px = src.get_pixel(sx, sy);
                    for c in 0..4 {
                        sum[c] += px[c] as u32;
                    }
                }
            }
            *out = Rgba([
                ((sum[0] + count / 2) / count) as u8,
                ((sum[1] + count / 2) / count) as u8,
                ((sum[2] + count / 2) / count) as u8,
                ((sum[3] + count / 2) / count) as u8,
            ]);
        });
        Ok(())
    }
}

// ============================================================================
// LOOKUP BY NAME (CLI)
// ============================================================================

/// Names accepted by [`build_effect`].
pub const EFFECT_NAMES: &[&str] = &[
    "invert",
    "sepia",
    "auto-levels",
    "brightness-contrast",
    "posterize",
    "box-blur",
];

/// Build a live effect from a CLI name and `key=value` parameters.
pub fn build_effect(
    name: &str,
    params: &[(String, String)],
) -> Result<Arc<dyn SnapshotSource>, String> {
    let num = |key: &str| -> Result<Option<f32>, String> {
        match params.iter().find(|(k, _)| k == key) {
            Some((_, v)) => v
                .parse::<f32>()
                .map(Some)
                .map_err(|_| format!("parameter '{}' expects a number, got '{}'", key, v)),
            None => Ok(None),
        }
    };
    let known = |keys: &[&str]| -> Result<(), String> {
        for (k, _) in params {
            if !keys.contains(&k.as_str()) {
                return Err(format!("effect '{}' has no parameter '{}'", name, k));
            }
        }
        Ok(())
    };

    match name.to_lowercase().as_str() {
        "invert" => {
            known(&[])?;
            Ok(Arc::new(LiveEffect::new(InvertColors)))
        }
        "sepia" => {
            known(&[])?;
            Ok(Arc::new(LiveEffect::new(Sepia)))
        }
        "auto-levels" => {
            known(&[])?;
            Ok(Arc::new(LiveEffect::new(AutoLevels)))
        }
        "brightness-contrast" => {
            known(&["brightness", "contrast"])?;
            let mut e = BrightnessContrast::default();
            if let Some(v) = num("brightness")? {
                e.brightness = v;
            }
            if let Some(v) = num("contrast")? {
                e.contrast = v;
            }
            Ok(Arc::new(LiveEffect::new(e)))
        }
        "posterize" => {
            known(&["levels"])?;
            let mut e = Posterize::default();
            if let Some(v) = num("levels")? {
                e.levels = v.max(0.0) as u32;
            }
            Ok(Arc::new(LiveEffect::new(e)))
        }
        "box-blur" => {
            known(&["radius"])?;
            let mut e = BoxBlur::default();
            if let Some(v) = num("radius")? {
                e.radius = v.max(0.0) as u32;
            }
            Ok(Arc::new(LiveEffect::new(e)))
        }
        other => Err(format!(
            "unknown effect '{}' (expected one of: {})",
            other,
            EFFECT_NAMES.join(", ")
        )),
    }
}
