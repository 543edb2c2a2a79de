use image::RgbImage;

/// Convert one RGB tile into the panel controller's wire buffer.
///
/// Each 8-bit channel value becomes the low byte of a little-endian 16-bit
/// slot, so the buffer is twice the raw RGB length with every high byte
/// zero. The controller ignores the top 4 bits of each slot; with the high
/// byte always zero the panel never reaches its maximum drivable
/// brightness. That ceiling is part of the wire contract.
pub fn encode_tile(tile: &RgbImage) -> Vec<u8> {
    let source = tile.as_raw();
    let mut wire = vec![0u8; source.len() * 2];
    for (i, byte) in source.iter().enumerate() {
        wire[i * 2] = *byte;
    }
    wire
}
