// ============================================================================
// DOCUMENT: layers, selection and undo history seen by a live preview
// ============================================================================

use image::{GrayImage, Luma, Rgba, RgbaImage};

use crate::error::PreviewError;
use crate::geometry::RectI;
use crate::history::{Command, HistoryManager};

pub struct Layer {
    pub name: String,
    pub pixels: RgbaImage,
}

impl Layer {
    pub fn new(name: String, width: u32, height: u32, fill_color: Rgba<u8>) -> Self {
        Self {
            name,
            pixels: RgbaImage::from_pixel(width, height, fill_color),
        }
    }
}

/// Per-pixel selection coverage, 0 (unselected) to 255 (fully selected).
#[derive(Clone, Debug, PartialEq)]
pub struct SelectionMask {
    mask: GrayImage,
}

impl SelectionMask {
    /// An empty selection the size of the canvas.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            mask: GrayImage::new(width, height),
        }
    }

    /// A fully selected rectangle, clipped to the canvas.
    pub fn from_rect(width: u32, height: u32, rect: RectI) -> Self {
        let mut sel = Self::new(width, height);
        sel.add_rect(rect, 255);
        sel
    }

    pub fn add_rect(&mut self, rect: RectI, coverage: u8) {
        let r = rect.clamp_to_size(self.mask.width(), self.mask.height());
        for y in r.y..r.bottom() {
            for x in r.x..r.right() {
                let old = self.mask.get_pixel(x as u32, y as u32).0[0];
                self.mask.put_pixel(x as u32, y as u32, Luma([old.max(coverage)]));
            }
        }
    }

    pub fn coverage(&self, x: i32, y: i32) -> u8 {
        if x < 0 || y < 0 || x as u32 >= self.mask.width() || y as u32 >= self.mask.height() {
            return 0;
        }
        self.mask.get_pixel(x as u32, y as u32).0[0]
    }

    /// Bounding box of every pixel with non-zero coverage.
    pub fn bounds(&self) -> Option<RectI> {
        let (w, h) = self.mask.dimensions();
        let mut min_x = w;
        let mut min_y = h;
        let mut max_x = 0u32;
        let mut max_y = 0u32;
        let mut found = false;

        for (x, y, px) in self.mask.enumerate_pixels() {
            if px.0[0] > 0 {
                found = true;
                min_x = min_x.min(x);
                max_x = max_x.max(x);
                min_y = min_y.min(y);
                max_y = max_y.max(y);
            }
        }

        found.then(|| {
            RectI::new(
                min_x as i32,
                min_y as i32,
                (max_x - min_x + 1) as i32,
                (max_y - min_y + 1) as i32,
            )
        })
    }
}

/// Pixel state of an open image: size, layers and the active selection.
pub struct Canvas {
    pub width: u32,
    pub height: u32,
    pub layers: Vec<Layer>,
    pub active_layer_index: usize,
    pub selection: Option<SelectionMask>,
}

impl Canvas {
    pub fn new(width: u32, height: u32, fill_color: Rgba<u8>) -> Self {
        Self {
            width,
            height,
            layers: vec![Layer::new("Background".to_string(), width, height, fill_color)],
            active_layer_index: 0,
            selection: None,
        }
    }

    pub fn from_image(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            layers: vec![Layer {
                name: "Background".to_string(),
                    pixels: image,
            }],
            active_layer_index: 0,
            selection: None,
        }
    }

    /// Copy `pixels` (sized to `region`) onto `layer`, weighted by the
    /// selection coverage when a selection exists.
    pub fn merge_region(
        &mut self,
        layer: usize,
        region: RectI,
        pixels: &RgbaImage,
    ) -> Result<(), PreviewError> {
        let (w, h) = (self.width, self.height);
        let selection = self.selection.as_ref();
        let target = self
            .layers
            .get_mut(layer)
            .ok_or(PreviewError::InvalidLayer(layer))?;
        let clipped = region.clamp_to_size(w, h);

        for y in clipped.y..clipped.bottom() {
            for x in clipped.x..clipped.right() {
                let (lx, ly) = ((x - region.x) as u32, (y - region.y) as u32);
                if lx >= pixels.width() || ly >= pixels.height() {
                    continue;
                }
                let sel = selection.map_or(255, |s| s.coverage(x, y));
                if sel == 0 {
                    continue;
                }
                let src = *pixels.get_pixel(lx, ly);
                let dst = target.pixels.get_pixel_mut(x as u32, y as u32);
                if sel == 255 {
                    *dst = src;
                } else {
                    let t = sel as f32 / 255.0;
                    for c in 0..4 {
                        dst[c] = (dst[c] as f32 + (src[c] as f32 - dst[c] as f32) * t).round() as u8;
                    }
                }
            }
        }
        Ok(())
    }
}

/// What a live preview needs from the editor it runs inside.
pub trait PreviewHost {
    fn canvas_size(&self) -> (u32, u32);
    fn active_layer(&self) -> usize;
    fn layer_pixels(&self, layer: usize) -> Option<&RgbaImage>;
    fn selection(&self) -> Option<&SelectionMask>;

    /// Merge the rendered region into `layer`, clipped by the current selection.
    fn merge_preview(
        &mut self,
        layer: usize,
        region: RectI,
        pixels: &RgbaImage,
    ) -> Result<(), PreviewError>;

    fn push_history(&mut self, command: Box<dyn Command>);

    /// Render region for a new preview: the selection's bounds clamped to
    /// the canvas, or the whole canvas.
    fn render_bounds(&self) -> RectI {
        let (w, h) = self.canvas_size();
        let full = RectI::from_size(w, h);
        match self.selection().and_then(SelectionMask::bounds) {
            Some(b) => b.intersect(&full),
            None => full,
        }
    }
}

/// A canvas together with its undo history.
pub struct Document {
    pub canvas: Canvas,
    pub history: HistoryManager,
}

impl Document {
    pub fn new(canvas: Canvas) -> Self {
        Self {
            canvas,
            history: HistoryManager::default(),
        }
    }

    pub fn from_image(image: RgbaImage) -> Self {
        Self::new(Canvas::from_image(image))
    }

    pub fn set_selection(&mut self, selection: Option<SelectionMask>) {
        self.canvas.selection = selection;
    }

    pub fn undo(&mut self) -> Option<String> {
        self.history.undo(&mut self.canvas)
    }

    pub fn redo(&mut self) -> Option<String> {
        self.history.redo(&mut self.canvas)
    }
}

impl PreviewHost for Document {
    fn canvas_size(&self) -> (u32, u32) {
        (self.canvas.width, self.canvas.height)
    }

    fn active_layer(&self) -> usize {
        self.canvas.active_layer_index
    }

    fn layer_pixels(&self, layer: usize) -> Option<&RgbaImage> {
        self.canvas.layers.get(layer).map(|l| &l.pixels)
    }

    fn selection(&self) -> Option<&SelectionMask> {
        self.canvas.selection.as_ref()
    }

    fn merge_preview(
        &mut self,
        layer: usize,
        region: RectI,
        pixels: &RgbaImage,
    ) -> Result<(), PreviewError> {
        self.canvas.merge_region(layer, region, pixels)
    }

    fn push_history(&mut self, command: Box<dyn Command>) {
        self.history.push(command);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_bounds_follow_selection() {
        let mut doc = Document::new(Canvas::new(100, 80, Rgba([0, 0, 0, 255])));
        assert_eq!(doc.render_bounds(), RectI::new(0, 0, 100, 80));

        doc.set_selection(Some(SelectionMask::from_rect(100, 80, RectI::new(90, 70, 50, 50))));
        assert_eq!(doc.render_bounds(), RectI::new(90, 70, 10, 10));

        // empty mask behaves like no selection
        doc.set_selection(Some(SelectionMask::new(100, 80)));
        assert_eq!(doc.render_bounds(), RectI::new(0, 0, 100, 80));
    }

    #[test]
    fn merge_respects_selection_coverage() {
        let mut canvas = Canvas::new(4, 1, Rgba([0, 0, 0, 255]));
        let mut sel = SelectionMask::new(4, 1);
        sel.add_rect(RectI::new(1, 0, 1, 1), 255);
        sel.add_rect(RectI::new(2, 0, 1, 1), 128);
        canvas.selection = Some(sel);

        let white = RgbaImage::from_pixel(4, 1, Rgba([255, 255, 255, 255]));
        canvas.merge_region(0, RectI::new(0, 0, 4, 1), &white).unwrap();

        let row: Vec<u8> = (0..4).map(|x| canvas.layers[0].pixels.get_pixel(x, 0)[0]).collect();
        assert_eq!(row, vec![0, 255, 128, 0]);
    }

    #[test]
    fn merge_offsets_region_into_layer() {
        let mut canvas = Canvas::new(6, 6, Rgba([0, 0, 0, 255]));
        let patch = RgbaImage::from_pixel(2, 2, Rgba([9, 9, 9, 255]));
        canvas.merge_region(0, RectI::new(4, 4, 2, 2), &patch).unwrap();
        assert_eq!(canvas.layers[0].pixels.get_pixel(5, 5)[0], 9);
        assert_eq!(canvas.layers[0].pixels.get_pixel(3, 3)[0], 0);

        let err = canvas.merge_region(3, RectI::new(0, 0, 1, 1), &patch);
        assert!(matches!(err, Err(PreviewError::InvalidLayer(3))));
    }
}
