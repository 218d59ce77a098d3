use crate::config::MAX_INPUT_SIZE;
use crate::error::PipelineError;
use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use image::imageops::FilterType;
use ndarray::Array4;

const CHANNELS: usize = 3;

/// Browsers always pad data URLs, hand-built payloads often don't.
const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Turns a data URL into the `[1, size, size, 3]` tensor the classifier expects.
#[derive(Debug, Clone, Copy)]
pub struct ImageDecoder {
    size: u32,
    filter: FilterType,
}

impl ImageDecoder {
    /// `size` comes from a validated config and never exceeds `MAX_INPUT_SIZE`.
    pub fn new(size: usize, filter: FilterType) -> Self {
        debug_assert!(size <= MAX_INPUT_SIZE);
        Self {
            size: size as u32,
            filter,
        }
    }

    pub fn output_shape(&self) -> [usize; 4] {
        let size = self.size as usize;
        [1, size, size, CHANNELS]
    }

    pub fn decode(&self, data_url: &str) -> Result<Array4<f32>, PipelineError> {
        let bytes = decode_data_url(data_url)?;
        self.tensor_from_bytes(&bytes)
    }

    pub fn tensor_from_bytes(&self, bytes: &[u8]) -> Result<Array4<f32>, PipelineError> {
        let image = image::load_from_memory(bytes)?;
        // Stretch to the square input; aspect ratio is not preserved.
        let rgb = image.resize_exact(self.size, self.size, self.filter).to_rgb8();

        let [_, height, width, channels] = self.output_shape();
        let pixels: Vec<f32> = rgb
            .into_raw()
            .into_iter()
            .map(|value| value as f32 / 255.0)
            .collect();

        Array4::from_shape_vec((1, height, width, channels), pixels)
            .map_err(|e| PipelineError::Inference(format!("Failed to shape image tensor: {}", e)))
    }
}

/// Strips the `data:<mime>;base64` prefix and decodes the payload.
pub fn decode_data_url(data_url: &str) -> Result<Vec<u8>, PipelineError> {
    let (_, payload) = data_url.split_once(',').ok_or_else(|| {
        PipelineError::MalformedInput("Image data must be a data URL of the form '<prefix>,<base64>'".into())
    })?;
    Ok(PAYLOAD_ENGINE.decode(payload.trim())?)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use image::{DynamicImage, ImageFormat};
    use std::io::Cursor;

    pub fn png_bytes(image: &DynamicImage) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, ImageFormat::Png).unwrap();
        buffer.into_inner()
    }

    pub fn png_data_url(image: &DynamicImage) -> String {
        format!("data:image/png;base64,{}", STANDARD.encode(png_bytes(image)))
    }
}
