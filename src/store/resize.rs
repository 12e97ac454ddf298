use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageBuffer, Luma, Pixel, Rgb, Rgba};

use crate::capture::{Frame, FrameShape};
use crate::error::StoreError;

/// The one resize filter used whenever a frame has to fit a fixed shape
pub const RESIZE_FILTER: FilterType = FilterType::Triangle;

/// Bilinear resize of `frame` to `target`'s shape.
///
/// A differing channel count is converted first (gray, RGB or RGBA, alpha
/// opaque); capture metadata is carried over.
pub fn resize_frame(frame: &Frame, target: FrameShape) -> Result<Frame, StoreError> {
    if frame.shape == target {
        return Ok(frame.clone());
    }
    let converted;
    let source = if frame.shape.channels == target.channels {
        frame
    } else {
        converted = convert_channels(frame, target.channels)?;
        &converted
    };
    if source.shape == target {
        return Ok(source.clone());
    }
    let data = match target.channels {
        1 => resize_as::<Luma<u8>>(source, target),
        3 => resize_as::<Rgb<u8>>(source, target),
        4 => resize_as::<Rgba<u8>>(source, target),
        _ => None,
    }
    .ok_or(StoreError::UnsupportedShape(frame.shape))?;

    Ok(Frame {
        data,
        shape: target,
        sequence: frame.sequence,
        captured_at: frame.captured_at,
    })
}

/// Re-pack `frame` with `channels` samples per pixel, keeping its size
pub fn convert_channels(frame: &Frame, channels: u32) -> Result<Frame, StoreError> {
    let unsupported = || StoreError::UnsupportedShape(frame.shape);
    let (w, h) = (frame.shape.width, frame.shape.height);
    let data = frame.data.clone();
    let image = match frame.shape.channels {
        1 => ImageBuffer::from_raw(w, h, data).map(DynamicImage::ImageLuma8),
        3 => ImageBuffer::from_raw(w, h, data).map(DynamicImage::ImageRgb8),
        4 => ImageBuffer::from_raw(w, h, data).map(DynamicImage::ImageRgba8),
        _ => None,
    }
    .ok_or_else(unsupported)?;
    let data = match channels {
        1 => image.to_luma8().into_raw(),
        3 => image.to_rgb8().into_raw(),
        4 => image.to_rgba8().into_raw(),
        _ => return Err(unsupported()),
    };
    Ok(Frame {
        data,
        shape: FrameShape::new(h, w, channels),
        sequence: frame.sequence,
        captured_at: frame.captured_at,
    })
}

fn resize_as<P>(frame: &Frame, target: FrameShape) -> Option<Vec<u8>>
where
    P: Pixel<Subpixel = u8> + 'static,
{
    let source: ImageBuffer<P, &[u8]> =
        ImageBuffer::from_raw(frame.shape.width, frame.shape.height, frame.data.as_slice())?;
    let resized = imageops::resize(&source, target.width, target.height, RESIZE_FILTER);
    Some(resized.into_raw())
}
