use jpeg_decoder::{Decoder, PixelFormat as JpegPixelFormat};

use super::frame::PixelFormat;
use crate::error::CaptureError;

/// Decode a raw device buffer into packed RGB24
pub fn decode_frame(
    data: &[u8],
    format: PixelFormat,
    width: u32,
    height: u32,
) -> Result<Vec<u8>, CaptureError> {
    let expected = width as usize * height as usize * 3;
    let rgb = match format {
        PixelFormat::Mjpeg => decode_mjpeg(data)?,
        PixelFormat::Rgb24 => data.to_vec(),
        PixelFormat::Yuyv4 => yuyv_to_rgb(data),
    };
    if rgb.len() != expected {
        return Err(CaptureError::Decode(format!(
            "decoded {} bytes, expected {} for {}x{}",
            rgb.len(),
            expected,
            width,
            height
        )));
    }
    Ok(rgb)
}

fn decode_mjpeg(data: &[u8]) -> Result<Vec<u8>, CaptureError> {
    let mut decoder = Decoder::new(data);
    let pixels = decoder
        .decode()
        .map_err(|e| CaptureError::Decode(e.to_string()))?;
    let info = decoder
        .info()
        .ok_or_else(|| CaptureError::Decode("missing jpeg header".into()))?;
    match info.pixel_format {
        JpegPixelFormat::RGB24 => Ok(pixels),
        JpegPixelFormat::L8 => Ok(pixels.iter().flat_map(|&l| [l, l, l]).collect()),
        other => Err(CaptureError::Decode(format!(
            "unsupported jpeg pixel format {other:?}"
        ))),
    }
}

/// Convert packed YUYV 4:2:2 to RGB24 (BT.601, limited range)
pub fn yuyv_to_rgb(data: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(data.len() / 2 * 3);
    for chunk in data.chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&yuv_to_rgb(y0, u, v));
        rgb.extend_from_slice(&yuv_to_rgb(y1, u, v));
    }
    rgb
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = i32::from(y) - 16;
    let d = i32::from(u) - 128;
    let e = i32::from(v) - 128;
    let clamp = |x: i32| ((x + 128) >> 8).clamp(0, 255) as u8;
    [
        clamp(298 * c + 409 * e),
        clamp(298 * c - 100 * d - 208 * e),
        clamp(298 * c + 516 * d),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yuyv_gray_maps_to_gray() {
        // Y=126 with neutral chroma is mid gray in limited range
        let rgb = yuyv_to_rgb(&[126, 128, 126, 128]);
        assert_eq!(rgb.len(), 6);
        assert!(rgb.windows(2).all(|w| w[0] == w[1]));
        assert!((126..=130).contains(&rgb[0]));
    }

    #[test]
    fn yuyv_black_and_white_saturate() {
        assert_eq!(yuyv_to_rgb(&[16, 128, 235, 128]), vec![0, 0, 0, 255, 255, 255]);
    }

    #[test]
    fn rgb_passthrough_checks_size() {
        assert!(decode_frame(&[0; 12], PixelFormat::Rgb24, 2, 2).is_ok());
        assert!(matches!(
            decode_frame(&[0; 11], PixelFormat::Rgb24, 2, 2),
            Err(CaptureError::Decode(_))
        ));
    }

    #[test]
    fn mjpeg_roundtrips_through_image_encoder() {
        let pixels = vec![200u8; 8 * 8 * 3];
        let mut jpeg = Vec::new();
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 95)
            .encode(&pixels, 8, 8, image::ExtendedColorType::Rgb8)
            .unwrap();
        let rgb = decode_frame(&jpeg, PixelFormat::Mjpeg, 8, 8).unwrap();
        assert!(rgb.iter().all(|&v| v.abs_diff(200) <= 3));
    }
}
