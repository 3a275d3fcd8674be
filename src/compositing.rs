//! Background compositing for processed frames and images

use crate::config::{BackgroundSpec, FailurePolicy};
use image::{Rgba, RgbaImage};

/// Composite `image` over a solid `background` in place (Porter-Duff "over")
///
/// Fully transparent pixels become exactly `background`, fully opaque pixels
/// are left untouched. With an opaque background the result is opaque, so a
/// second pass changes nothing.
pub fn composite_over(image: &mut RgbaImage, background: Rgba<u8>) {
    for pixel in image.pixels_mut() {
        *pixel = over(*pixel, background);
    }
}

/// Apply a job's background to a processed image
pub fn apply_background(image: &mut RgbaImage, background: &BackgroundSpec) {
    if let Some(color) = background.color() {
        composite_over(image, color);
    }
}

/// Placeholder for a frame the engine failed on
#[must_use]
pub fn placeholder(original: &RgbaImage, policy: FailurePolicy) -> RgbaImage {
    match policy {
        FailurePolicy::SubstituteOriginal => original.clone(),
        FailurePolicy::SubstituteBlank => RgbaImage::new(original.width(), original.height()),
    }
}

fn over(fg: Rgba<u8>, bg: Rgba<u8>) -> Rgba<u8> {
    let fa = u32::from(fg[3]);
    if fa == 255 {
        return fg;
    }
    if fa == 0 {
        return bg;
    }

    let ba = u32::from(bg[3]);
    // Alpha scaled by 255: out_a = fa + ba * (1 - fa)
    let out_a = fa * 255 + ba * (255 - fa);
    if out_a == 0 {
        return Rgba([0, 0, 0, 0]);
    }

    let mut out = [0u8; 4];
    for (channel, slot) in out.iter_mut().take(3).enumerate() {
        let f = u32::from(fg[channel]);
        let b = u32::from(bg[channel]);
        let numerator = f * fa * 255 + b * ba * (255 - fa);
        *slot = ((numerator + out_a / 2) / out_a).min(255) as u8;
    }
    out[3] = ((out_a + 127) / 255).min(255) as u8;
    Rgba(out)
}
