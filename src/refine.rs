use image::GrayImage;
use imageproc::distance_transform::Norm;
use imageproc::morphology;

/// Number of times each 3x3 kernel is applied.
pub const ITERATIONS: u8 = 2;

/// Fixed close -> open -> dilate denoising of a foreground mask.
///
/// Closing and opening use the 3x3 square kernel, the final dilation the
/// 3x3 ellipse, which at this size is a cross. Repeating a 3x3 square `n`
/// times reaches Chebyshev distance `n`, repeating the cross reaches
/// Manhattan distance `n`, so each stage runs as a single pass with
/// `k = ITERATIONS` under the matching norm.
///
/// Any non-zero input pixel is foreground; the output only holds 0 and 255.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaskRefiner;

impl MaskRefiner {
    #[inline]
    pub fn new() -> Self {
        Self
    }

    pub fn refine(&self, mask: &GrayImage) -> GrayImage {
        let closed = self.close(mask);
        let opened = self.open(&closed);

        self.dilate(&opened)
    }

    /// Fills holes and gaps narrower than the kernel.
    #[inline]
    pub fn close(&self, mask: &GrayImage) -> GrayImage {
        morphology::close(mask, Norm::LInf, ITERATIONS)
    }

    /// Removes specks the kernel cannot fit in.
    #[inline]
    pub fn open(&self, mask: &GrayImage) -> GrayImage {
        morphology::open(mask, Norm::LInf, ITERATIONS)
    }

    /// Grows surviving regions so fragments of one object merge.
    #[inline]
    pub fn dilate(&self, mask: &GrayImage) -> GrayImage {
        morphology::dilate(mask, Norm::L1, ITERATIONS)
    }
}

#[inline]
pub fn foreground_pixels(mask: &GrayImage) -> usize {
    mask.pixels().filter(|p| p[0] != 0).count()
}
