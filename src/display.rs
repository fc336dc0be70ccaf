//! Display enumeration and full-screen capture.
//!
//! Enumerates all active displays and captures one image per display. Only
//! macOS has a real backend; other platforms report no capturable displays
//! so the scheduler ticks stay harmless no-ops there.

use crate::types::DisplayId;
use image::{DynamicImage, RgbaImage};
use std::time::Instant;
use tracing::{debug, warn};

/// One capturable screen source, in stable platform enumeration order.
#[derive(Debug, Clone)]
pub struct DisplaySource {
    /// Platform display identifier
    pub id: DisplayId,
    /// 1-based ordinal among the displays present right now
    pub index: u32,
    /// Human-readable name
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub is_main: bool,
}

#[cfg(target_os = "macos")]
mod macos {
    use super::*;
    use core_graphics::display::{CGDisplayBounds, CGGetActiveDisplayList, CGMainDisplayID};
    use core_graphics::image::CGImage;
    use core_graphics::window::{kCGWindowImageBestResolution, CGWindowListCreateImage};
    use core_graphics::geometry::{CGPoint, CGRect, CGSize};
    use foreign_types_shared::ForeignType;

    /// Get all active displays
    pub fn get_displays() -> Vec<DisplaySource> {
        let mut display_count: u32 = 0;

        // Get count first
        unsafe {
            CGGetActiveDisplayList(0, std::ptr::null_mut(), &mut display_count);
        }

        if display_count == 0 {
            return vec![];
        }

        let mut displays = vec![0u32; display_count as usize];

        unsafe {
            CGGetActiveDisplayList(display_count, displays.as_mut_ptr(), &mut display_count);
        }

        let main_display = unsafe { CGMainDisplayID() };

        displays
            .into_iter()
            .enumerate()
            .map(|(i, id)| {
                let bounds = unsafe { CGDisplayBounds(id) };
                let index = i as u32 + 1;
                DisplaySource {
                    id,
                    index,
                    name: format!("Display {}", index),
                    width: bounds.size.width as u32,
                    height: bounds.size.height as u32,
                    is_main: id == main_display,
                }
            })
            .collect()
    }

    /// Capture an entire display
    pub fn capture_display(source: &DisplaySource) -> Option<RgbaImage> {
        let bounds = unsafe { CGDisplayBounds(source.id) };

        let rect = CGRect::new(
            &CGPoint::new(bounds.origin.x, bounds.origin.y),
            &CGSize::new(bounds.size.width, bounds.size.height),
        );

        // Use 0 for window list option and null window ID to capture the
        // whole display
        let cg_image: CGImage = unsafe {
            let image_ref = CGWindowListCreateImage(
                rect,
                0, // kCGWindowListOptionAll
                0, // kCGNullWindowID
                kCGWindowImageBestResolution,
            );
            if image_ref.is_null() {
                return None;
            }
            CGImage::from_ptr(image_ref)
        };

        convert_cgimage_to_rgba(&cg_image)
    }

    /// Convert CGImage to image crate's RgbaImage
    fn convert_cgimage_to_rgba(cg_image: &CGImage) -> Option<RgbaImage> {
        let width = cg_image.width();
        let height = cg_image.height();
        let bytes_per_row = cg_image.bytes_per_row();
        let bits_per_pixel = cg_image.bits_per_pixel();

        let data = cg_image.data();
        let bytes = data.bytes();

        if bytes.is_empty() {
            return None;
        }

        // CGImage is typically BGRA on macOS
        let mut rgba_data = Vec::with_capacity((width * height * 4) as usize);

        for y in 0..height {
            let row_start = y * bytes_per_row;
            for x in 0..width {
                let pixel_start = row_start + x * (bits_per_pixel / 8);
                if pixel_start + 3 < bytes.len() {
                    let b = bytes[pixel_start];
                    let g = bytes[pixel_start + 1];
                    let r = bytes[pixel_start + 2];
                    let a = bytes[pixel_start + 3];
                    rgba_data.extend_from_slice(&[r, g, b, a]);
                }
            }
        }

        RgbaImage::from_raw(width as u32, height as u32, rgba_data)
    }
}

#[cfg(not(target_os = "macos"))]
mod macos {
    use super::*;

    pub fn get_displays() -> Vec<DisplaySource> {
        vec![]
    }

    pub fn capture_display(_source: &DisplaySource) -> Option<RgbaImage> {
        None
    }
}

/// Enumerate all capturable displays in platform order.
pub fn enumerate() -> Vec<DisplaySource> {
    let displays = macos::get_displays();
    debug!("Found {} displays", displays.len());
    displays
}

/// Capture one display as an RGBA image.
pub fn capture(source: &DisplaySource) -> Option<DynamicImage> {
    let start = Instant::now();
    let result = macos::capture_display(source);
    let elapsed = start.elapsed();

    if result.is_some() {
        debug!("Display {} captured in {:?}", source.id, elapsed);
    } else {
        warn!("Failed to capture display {}", source.id);
    }

    result.map(DynamicImage::ImageRgba8)
}
