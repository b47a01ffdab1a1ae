use crate::error::RequestError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use image::{
    imageops::{self, FilterType},
    RgbImage,
};
use ndarray::Array4;

pub const TARGET_SIZE: u32 = 64;

/// Camera channel: a data URI whose payload follows the first comma.
pub fn decode_base64_payload(payload: &str) -> Result<RgbImage, RequestError> {
    let (_, encoded) = payload
        .split_once(',')
        .ok_or(RequestError::MalformedPayload)?;
    let bytes = BASE64
        .decode(encoded)
        .map_err(|_| RequestError::MalformedPayload)?;
    decode_image_bytes(&bytes)
}

/// Upload channel: raw file bytes plus the submitted filename.
pub fn decode_upload(filename: &str, bytes: &[u8]) -> Result<RgbImage, RequestError> {
    if filename.is_empty() {
        return Err(RequestError::NoFileProvided);
    }
    decode_image_bytes(bytes)
}

fn decode_image_bytes(bytes: &[u8]) -> Result<RgbImage, RequestError> {
    let image = image::load_from_memory(bytes)?;
    Ok(image.to_rgb8())
}

/// Resize to 64x64 (aspect ratio not preserved), keep RGB channel order,
/// prepend the batch dimension, scale into [0, 1].
pub fn normalize(image: &RgbImage) -> Array4<f32> {
    let resized = imageops::resize(image, TARGET_SIZE, TARGET_SIZE, FilterType::CatmullRom);
    let size = TARGET_SIZE as usize;

    let mut tensor = Array4::<f32>::zeros((1, size, size, 3));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for (c, &value) in pixel.0.iter().enumerate() {
            tensor[[0, y as usize, x as usize, c]] = f32::from(value) / 255.0;
        }
    }
    tensor
}

#[cfg(test)]
pub(crate) mod test_support {
    use image::{Rgb, RgbImage};
    use std::io::Cursor;

    pub fn png_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb(color));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }
}
