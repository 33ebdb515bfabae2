//! Multi-frame GIF compositing onto a persistent RGBA canvas.

use alloc::vec::Vec;

use enough::Stop;

use crate::error::ImageError;
use crate::pixel::Size;

/// What happens to a frame's area before the next frame is drawn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Disposal {
    Unspecified,
    Keep,
    Background,
    Previous,
}

/// One parsed frame: palette indices for its rectangle.
#[derive(Clone, Debug)]
pub(crate) struct GifFrame {
    pub(crate) left: u32,
    pub(crate) top: u32,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) disposal: Disposal,
    pub(crate) transparent: Option<u8>,
    /// RGB triples; `None` uses the global palette.
    pub(crate) palette: Option<Vec<u8>>,
    pub(crate) indices: Vec<u8>,
    /// Display time in hundredths of a second.
    pub(crate) delay: u16,
}

impl GifFrame {
    fn covers(&self, other: &GifFrame) -> bool {
        self.left <= other.left
            && self.top <= other.top
            && self.left + self.width >= other.left + other.width
            && self.top + self.height >= other.top + other.height
    }
}

/// The persistent canvas and how far it has been composited.
pub(crate) struct Compositor {
    screen: Size,
    background: [u8; 4],
    canvas: Vec<u8>,
    /// Index of the last frame composited into `canvas`.
    last: Option<usize>,
}

impl Compositor {
    /// `background` is the background color when the screen's background
    /// index is valid for the global palette; `None` means transparent black.
    pub(crate) fn new(screen: Size, background: Option<[u8; 3]>) -> Self {
        let background = match background {
            Some([r, g, b]) => [r, g, b, 255],
            None => [0; 4],
        };
        Self {
            screen,
            background,
            canvas: Vec::new(),
            last: None,
        }
    }

    pub(crate) fn last_composited(&self) -> Option<usize> {
        self.last
    }

    fn clear_canvas(&mut self) -> Result<(), ImageError> {
        let len = self.screen.width as usize * self.screen.height as usize * 4;
        if self.canvas.len() != len {
            self.canvas = Vec::new();
            self.canvas
                .try_reserve_exact(len)
                .map_err(|_| ImageError::MallocAbnormal(len))?;
            self.canvas.resize(len, 0);
        }
        for px in self.canvas.chunks_exact_mut(4) {
            px.copy_from_slice(&self.background);
        }
        self.last = None;
        Ok(())
    }

    /// Composite up to `index` and return the canvas as that frame shows it.
    ///
    /// Continues from the last composited frame when moving forward; an
    /// earlier index rebuilds from frame 0, the same index re-renders.
    /// A "restore to previous" frame paints nothing.
    pub(crate) fn render(
        &mut self,
        frames: &[GifFrame],
        global: Option<&[u8]>,
        index: usize,
        stop: &dyn Stop,
    ) -> Result<&[u8], ImageError> {
        if index >= frames.len() {
            return Err(ImageError::FrameOutOfRange {
                index: index as u32,
                count: frames.len() as u32,
            });
        }
        let start = match self.last {
            Some(last) if last < index && !self.canvas.is_empty() => last + 1,
            Some(last) if last == index && !self.canvas.is_empty() => index + 1,
            _ => {
                self.clear_canvas()?;
                0
            }
        };
        for i in start..=index {
            stop.check()?;
            let frame = &frames[i];
            if i > 0 {
                let prev = &frames[i - 1];
                if prev.disposal == Disposal::Background && !frame.covers(prev) {
                    fill_rect(&mut self.canvas, self.screen, prev, self.background);
                }
            }
            if frame.disposal != Disposal::Previous {
                paint(&mut self.canvas, self.screen, frame, global);
            }
            self.last = Some(i);
        }

        Ok(&self.canvas)
    }
}

fn fill_rect(canvas: &mut [u8], screen: Size, f: &GifFrame, color: [u8; 4]) {
    let right = (f.left + f.width).min(screen.width);
    let bottom = (f.top + f.height).min(screen.height);
    for y in f.top..bottom {
        let row = y as usize * screen.width as usize;
        for x in f.left..right {
            let at = (row + x as usize) * 4;
            canvas[at..at + 4].copy_from_slice(&color);
        }
    }
}

/// Draw a frame's opaque pixels. Transparent and off-screen pixels are
/// skipped, as are indices past the end of the palette.
fn paint(canvas: &mut [u8], screen: Size, f: &GifFrame, global: Option<&[u8]>) {
    let Some(palette) = f.palette.as_deref().or(global) else {
        return;
    };
    for (dy, line) in f.indices.chunks(f.width.max(1) as usize).enumerate() {
        let y = f.top + dy as u32;
        if y >= screen.height || dy as u32 >= f.height {
            break;
        }
        let row = y as usize * screen.width as usize;
        for (dx, &idx) in line.iter().enumerate() {
            let x = f.left + dx as u32;
            if x >= screen.width {
                break;
            }
            if f.transparent == Some(idx) {
                continue;
            }
            let p = usize::from(idx) * 3;
            let Some(rgb) = palette.get(p..p + 3) else {
                continue;
            };
            let at = (row + x as usize) * 4;
            canvas[at..at + 4].copy_from_slice(&[rgb[0], rgb[1], rgb[2], 255]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enough::Unstoppable;

    const PAL: [u8; 9] = [255, 0, 0, 0, 255, 0, 0, 0, 255];

    fn frame(left: u32, top: u32, w: u32, h: u32, idx: u8, disposal: Disposal) -> GifFrame {
        GifFrame {
            left,
            top,
            width: w,
            height: h,
            disposal,
            transparent: None,
            palette: None,
            indices: vec![idx; (w * h) as usize],
            delay: 10,
        }
    }

    fn px(img: &[u8], screen_w: u32, x: u32, y: u32) -> [u8; 4] {
        let at = ((y * screen_w + x) * 4) as usize;
        [img[at], img[at + 1], img[at + 2], img[at + 3]]
    }

    #[test]
    fn no_background_leaves_canvas_zeroed() {
        let mut c = Compositor::new(Size::new(2, 2), None);
        let frames = [frame(0, 0, 1, 1, 0, Disposal::Keep)];
        let out = c.render(&frames, Some(&PAL), 0, &Unstoppable).unwrap();
        assert_eq!(px(out, 2, 0, 0), [255, 0, 0, 255]);
        assert_eq!(px(out, 2, 1, 1), [0, 0, 0, 0]);
    }

    #[test]
    fn background_color_initializes_canvas() {
        let mut c = Compositor::new(Size::new(2, 1), Some([0, 0, 255]));
        let frames = [frame(0, 0, 1, 1, 1, Disposal::Keep)];
        let out = c.render(&frames, Some(&PAL), 0, &Unstoppable).unwrap();
        assert_eq!(px(out, 2, 0, 0), [0, 255, 0, 255]);
        assert_eq!(px(out, 2, 1, 0), [0, 0, 255, 255]);
    }

    #[test]
    fn direct_request_matches_sequential() {
        let frames = [
            frame(0, 0, 3, 3, 0, Disposal::Keep),
            frame(1, 1, 1, 1, 1, Disposal::Background),
            frame(0, 0, 1, 1, 2, Disposal::Keep),
        ];
        let mut seq = Compositor::new(Size::new(3, 3), None);
        seq.render(&frames, Some(&PAL), 0, &Unstoppable).unwrap();
        seq.render(&frames, Some(&PAL), 1, &Unstoppable).unwrap();
        let sequential = seq.render(&frames, Some(&PAL), 2, &Unstoppable).unwrap().to_vec();

        let mut direct = Compositor::new(Size::new(3, 3), None);
        let jumped = direct.render(&frames, Some(&PAL), 2, &Unstoppable).unwrap();
        assert_eq!(jumped, &sequential[..]);
        // Frame 1 was disposed to background before frame 2.
        assert_eq!(px(jumped, 3, 1, 1), [0, 0, 0, 0]);
        assert_eq!(px(jumped, 3, 0, 0), [0, 0, 255, 255]);
    }

    #[test]
    fn covering_frame_skips_background_disposal() {
        let frames = [
            frame(0, 0, 2, 1, 0, Disposal::Background),
            GifFrame {
                transparent: Some(1),
                ..frame(0, 0, 2, 1, 1, Disposal::Keep)
            },
        ];
        let mut c = Compositor::new(Size::new(2, 1), None);
        let out = c.render(&frames, Some(&PAL), 1, &Unstoppable).unwrap();
        // Fully transparent frame 1 covers frame 0, so frame 0 stays visible.
        assert_eq!(px(out, 2, 0, 0), [255, 0, 0, 255]);
    }

    #[test]
    fn restore_previous_frame_preserves_the_canvas() {
        let frames = [
            frame(0, 0, 2, 1, 0, Disposal::Keep),
            frame(0, 0, 1, 1, 1, Disposal::Previous),
            frame(1, 0, 1, 1, 2, Disposal::Keep),
        ];
        let mut c = Compositor::new(Size::new(2, 1), None);
        let one = c.render(&frames, Some(&PAL), 1, &Unstoppable).unwrap();
        assert_eq!(px(one, 2, 0, 0), [255, 0, 0, 255]);
        assert_eq!(px(one, 2, 1, 0), [255, 0, 0, 255]);
        let two = c.render(&frames, Some(&PAL), 2, &Unstoppable).unwrap();
        assert_eq!(px(two, 2, 0, 0), [255, 0, 0, 255]);
        assert_eq!(px(two, 2, 1, 0), [0, 0, 255, 255]);
    }

    #[test]
    fn rewinding_rebuilds_and_same_index_rerenders() {
        let frames = [
            frame(0, 0, 1, 1, 0, Disposal::Keep),
            frame(0, 0, 1, 1, 1, Disposal::Keep),
        ];
        let mut c = Compositor::new(Size::new(1, 1), None);
        c.render(&frames, Some(&PAL), 1, &Unstoppable).unwrap();
        let again = c.render(&frames, Some(&PAL), 1, &Unstoppable).unwrap().to_vec();
        assert_eq!(px(&again, 1, 0, 0), [0, 255, 0, 255]);
        let back = c.render(&frames, Some(&PAL), 0, &Unstoppable).unwrap();
        assert_eq!(px(back, 1, 0, 0), [255, 0, 0, 255]);
        assert_eq!(c.last_composited(), Some(0));
    }

    #[test]
    fn out_of_screen_and_out_of_palette_pixels_are_skipped() {
        let frames = [
            frame(1, 0, 3, 1, 0, Disposal::Keep),
            frame(0, 0, 1, 1, 200, Disposal::Keep),
        ];
        let mut c = Compositor::new(Size::new(2, 1), None);
        let out = c.render(&frames, Some(&PAL), 1, &Unstoppable).unwrap();
        assert_eq!(px(out, 2, 0, 0), [0, 0, 0, 0]);
        assert_eq!(px(out, 2, 1, 0), [255, 0, 0, 255]);
    }
}
