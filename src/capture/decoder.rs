use color_eyre::{eyre::eyre, Result};
use image::RgbaImage;
use jpeg_decoder::Decoder;

use super::frame::PixelFormat;

/// Convert a raw capture buffer into an RGBA image that overlays can be drawn on.
pub fn decode_frame(data: &[u8], format: PixelFormat, width: u32, height: u32) -> Result<RgbaImage> {
    let rgba = match format {
        PixelFormat::Mjpeg => {
            let mut decoder = Decoder::new(data);
            let pixels = decoder.decode()?;
            let info = decoder
                .info()
                .ok_or_else(|| eyre!("JPEG header missing after decode"))?;
            match info.pixel_format {
                jpeg_decoder::PixelFormat::RGB24 => rgb_to_rgba(&pixels),
                jpeg_decoder::PixelFormat::L8 => gray_to_rgba(&pixels),
                other => return Err(eyre!("Unsupported JPEG pixel format: {:?}", other)),
            }
        }
        PixelFormat::Rgb24 => rgb_to_rgba(data),
        PixelFormat::Rgba32 => data.to_vec(),
        PixelFormat::Yuyv4 => yuyv_to_rgba(data),
    };

    RgbaImage::from_raw(width, height, rgba)
        .ok_or_else(|| eyre!("{:?} buffer does not match {}x{}", format, width, height))
}

fn rgb_to_rgba(input: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(input.len() / 3 * 4);
    for chunk in input.chunks_exact(3) {
        output.extend_from_slice(&[chunk[0], chunk[1], chunk[2], 255]);
    }
    output
}

fn gray_to_rgba(input: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(input.len() * 4);
    for &luma in input {
        output.extend_from_slice(&[luma, luma, luma, 255]);
    }
    output
}

/// BT.601 YUYV (4:2:2) to RGBA, two pixels per macropixel.
fn yuyv_to_rgba(input: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(input.len() * 2);
    for chunk in input.chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        for y in [y0, y1] {
            let [r, g, b] = yuv_to_rgb(y, u, v);
            output.extend_from_slice(&[r, g, b, 255]);
        }
    }
    output
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let r = (298 * c + 409 * e + 128) >> 8;
    let g = (298 * c - 100 * d - 208 * e + 128) >> 8;
    let b = (298 * c + 516 * d + 128) >> 8;
    [clamp(r), clamp(g), clamp(b)]
}

fn clamp(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgb24_gains_opaque_alpha() {
        let data = [10, 20, 30, 40, 50, 60];
        let image = decode_frame(&data, PixelFormat::Rgb24, 2, 1).unwrap();
        assert_eq!(image.as_raw(), &vec![10, 20, 30, 255, 40, 50, 60, 255]);
    }

    #[test]
    fn yuyv_black_and_white() {
        // Y=16 is black, Y=235 is white with neutral chroma
        let data = [16, 128, 235, 128];
        let image = decode_frame(&data, PixelFormat::Yuyv4, 2, 1).unwrap();
        assert_eq!(image.get_pixel(0, 0).0, [0, 0, 0, 255]);
        assert_eq!(image.get_pixel(1, 0).0, [255, 255, 255, 255]);
    }

    #[test]
    fn size_mismatch_is_an_error() {
        let data = [0u8; 9];
        assert!(decode_frame(&data, PixelFormat::Rgb24, 2, 2).is_err());
    }
}
