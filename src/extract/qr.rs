//! QR code decoding for captured images

use thiserror::Error;

/// Why an image produced no payload
///
/// Never a task failure: the record is kept without a payload.
#[derive(Debug, Error)]
pub enum DecodeSkip {
    #[error("not a decodable image: {0}")]
    NotAnImage(String),

    #[error("no code found in image")]
    NoCode,
}

/// Pulls machine-readable payloads out of image bytes
pub trait CodeDecoder: Send + Sync {
    /// Returns every payload found, or why there is none
    fn decode(&self, bytes: &[u8]) -> Result<Vec<String>, DecodeSkip>;
}

/// Decodes QR codes with `rqrr`
#[derive(Debug, Default, Clone, Copy)]
pub struct QrDecoder;

impl CodeDecoder for QrDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<Vec<String>, DecodeSkip> {
        let luma = image::load_from_memory(bytes)
            .map_err(|e| DecodeSkip::NotAnImage(e.to_string()))?
            .to_luma8();

        let (width, height) = luma.dimensions();
        let mut prepared =
            rqrr::PreparedImage::prepare_from_greyscale(width as usize, height as usize, |x, y| {
                luma.get_pixel(x as u32, y as u32).0[0]
            });

        let payloads: Vec<String> = prepared
            .detect_grids()
            .into_iter()
            .filter_map(|grid| match grid.decode() {
                Ok((_, content)) => Some(content),
                Err(e) => {
                    tracing::trace!("QR grid found but not decodable: {}", e);
                    None
                }
            })
            .filter(|content| !content.is_empty())
            .collect();

        if payloads.is_empty() {
            Err(DecodeSkip::NoCode)
        } else {
            Ok(payloads)
        }
    }
}
