//! Indexed PNG encoding for threshold-classified rasters.
//!
//! Every rendered grid has at most one colour per ladder band plus a
//! transparent background, so images are always written as palette PNGs
//! (color type 3). Metadata such as the title travels in `tEXt` chunks.

use std::io::Write;

use crate::RenderError;

/// PNG file signature.
pub const PNG_SIGNATURE: [u8; 8] = [137, 80, 78, 71, 13, 10, 26, 10];

/// Maximum colors for indexed PNG (PNG8)
pub const MAX_PALETTE_SIZE: usize = 256;

/// Create an indexed PNG (color type 3) from palette and indices.
///
/// `text` entries are written as `tEXt` chunks in the order given. Keywords
/// must be 1-79 Latin-1 characters; values are written as-is.
pub fn create_png_indexed(
    width: usize,
    height: usize,
    palette: &[(u8, u8, u8, u8)],
    indices: &[u8],
    text: &[(&str, &str)],
) -> Result<Vec<u8>, RenderError> {
    if width == 0 || height == 0 {
        return Err(RenderError::EmptyGrid);
    }
    if palette.is_empty() || palette.len() > MAX_PALETTE_SIZE {
        return Err(RenderError::Encode(format!(
            "palette must have 1..={} entries, got {}",
            MAX_PALETTE_SIZE,
            palette.len()
        )));
    }
    if indices.len() != width * height {
        return Err(RenderError::Encode(format!(
            "expected {} palette indices for {}x{}, got {}",
            width * height,
            width,
            height,
            indices.len()
        )));
    }

    let mut png = Vec::new();
    png.extend_from_slice(&PNG_SIGNATURE);

    // IHDR chunk
    let mut ihdr_data = Vec::with_capacity(13);
    ihdr_data.extend_from_slice(&(width as u32).to_be_bytes());
    ihdr_data.extend_from_slice(&(height as u32).to_be_bytes());
    ihdr_data.push(8); // bit depth (8 bits per palette index)
    ihdr_data.push(3); // color type 3 = indexed
    ihdr_data.push(0); // compression method
    ihdr_data.push(0); // filter method
    ihdr_data.push(0); // interlace method
    write_chunk(&mut png, b"IHDR", &ihdr_data);

    // PLTE chunk (palette)
    let mut plte_data = Vec::with_capacity(palette.len() * 3);
    for (r, g, b, _) in palette {
        plte_data.extend_from_slice(&[*r, *g, *b]);
    }
    write_chunk(&mut png, b"PLTE", &plte_data);

    // tRNS only if any palette entry is not fully opaque
    if palette.iter().any(|(_, _, _, a)| *a < 255) {
        let trns_data: Vec<u8> = palette.iter().map(|(_, _, _, a)| *a).collect();
        write_chunk(&mut png, b"tRNS", &trns_data);
    }

    for (keyword, value) in text {
        write_chunk(&mut png, b"tEXt", &text_chunk_data(keyword, value)?);
    }

    let idat_data = deflate_idat_indexed(indices, width, height)
        .map_err(|e| RenderError::Encode(format!("IDAT compression failed: {}", e)))?;
    write_chunk(&mut png, b"IDAT", &idat_data);

    write_chunk(&mut png, b"IEND", &[]);

    Ok(png)
}

fn text_chunk_data(keyword: &str, value: &str) -> Result<Vec<u8>, RenderError> {
    if keyword.is_empty() || keyword.len() > 79 || !keyword.is_ascii() {
        return Err(RenderError::Encode(format!("invalid tEXt keyword '{}'", keyword)));
    }
    let mut data = Vec::with_capacity(keyword.len() + 1 + value.len());
    data.extend_from_slice(keyword.as_bytes());
    data.push(0);
    // tEXt is Latin-1; anything else is replaced rather than mis-encoded
    data.extend(value.chars().map(|c| if (c as u32) < 256 { c as u8 } else { b'?' }));
    Ok(data)
}

/// Deflate indexed image data for IDAT chunk.
fn deflate_idat_indexed(indices: &[u8], width: usize, height: usize) -> std::io::Result<Vec<u8>> {
    // each row is: filter_byte + width index bytes
    let mut uncompressed = Vec::with_capacity(height * (1 + width));

    for row in indices.chunks_exact(width) {
        uncompressed.push(0); // filter type: none
        uncompressed.extend_from_slice(row);
    }

    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(&uncompressed)?;
    encoder.finish()
}

/// Write a PNG chunk
fn write_chunk(png: &mut Vec<u8>, chunk_type: &[u8; 4], data: &[u8]) {
    png.extend_from_slice(&(data.len() as u32).to_be_bytes());
    png.extend_from_slice(chunk_type);
    png.extend_from_slice(data);

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(chunk_type);
    hasher.update(data);
    png.extend_from_slice(&hasher.finalize().to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_color_palette() -> Vec<(u8, u8, u8, u8)> {
        vec![(0, 0, 0, 0), (255, 0, 0, 255)]
    }

    #[test]
    fn test_signature_and_ihdr() {
        let png = create_png_indexed(2, 2, &two_color_palette(), &[0, 1, 1, 0], &[]).unwrap();
        assert_eq!(&png[0..8], &PNG_SIGNATURE);
        assert_eq!(&png[12..16], b"IHDR");
        assert_eq!(u32::from_be_bytes([png[16], png[17], png[18], png[19]]), 2);
        assert_eq!(png[25], 3); // color type
    }

    #[test]
    fn test_text_chunk_present() {
        let png = create_png_indexed(1, 1, &two_color_palette(), &[1], &[("Title", "Sat rf 2023-01-01_00:00 UTC")])
            .unwrap();
        let needle = b"tEXtTitle\0Sat rf 2023-01-01_00:00 UTC";
        assert!(png.windows(needle.len()).any(|w| w == needle));
    }

    #[test]
    fn test_transparency_chunk_only_when_needed() {
        let opaque = create_png_indexed(1, 1, &[(1, 2, 3, 255)], &[0], &[]).unwrap();
        assert!(!opaque.windows(4).any(|w| w == b"tRNS"));

        let translucent = create_png_indexed(1, 1, &two_color_palette(), &[0], &[]).unwrap();
        assert!(translucent.windows(4).any(|w| w == b"tRNS"));
    }

    #[test]
    fn test_rejects_mismatched_indices() {
        let result = create_png_indexed(2, 2, &two_color_palette(), &[0, 1, 1], &[]);
        assert!(matches!(result, Err(RenderError::Encode(_))));
    }

    #[test]
    fn test_rejects_empty_image() {
        let result = create_png_indexed(0, 3, &two_color_palette(), &[], &[]);
        assert!(matches!(result, Err(RenderError::EmptyGrid)));
    }

    #[test]
    fn test_decodes_with_image_crate() {
        let png = create_png_indexed(3, 1, &two_color_palette(), &[0, 1, 0], &[]).unwrap();
        let img = image::load_from_memory(&png).unwrap().to_rgba8();
        assert_eq!(img.dimensions(), (3, 1));
        assert_eq!(img.get_pixel(1, 0).0, [255, 0, 0, 255]);
        assert_eq!(img.get_pixel(0, 0).0[3], 0);
    }
}
