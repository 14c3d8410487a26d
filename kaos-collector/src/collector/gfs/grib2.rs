//! GRIB2 decoder (§4.5 step 3): pure `bytes -> Vec<DecodedMessage>`.
//!
//! Supports the subset NOMADS actually emits for the variables this
//! collector needs: grid definition template 3.0 (regular lat/lon),
//! product definition template 4.0 (point-in-time analysis/forecast),
//! and data representation template 5.0 (simple packing). Other
//! templates are rejected with `DecodeError` rather than silently
//! misread.

use crate::error::CollectorError;
use crate::grid::GridHeader;

const SECTION0_LEN: usize = 16;
const END_MARKER: &[u8; 4] = b"7777";

#[derive(Debug, Clone)]
pub struct DecodedMessage {
    pub category: u8,
    pub parameter: u8,
    pub grid: GridHeader,
    pub values: Vec<f64>,
}

struct SectionCursor<'a> {
    bytes: &'a [u8],
}

impl<'a> SectionCursor<'a> {
    fn u32_at(&self, offset: usize) -> Result<u32, CollectorError> {
        let b = self.bytes.get(offset..offset + 4).ok_or_else(too_short)?;
        Ok(u32::from_be_bytes(b.try_into().unwrap()))
    }

    fn u16_at(&self, offset: usize) -> Result<u16, CollectorError> {
        let b = self.bytes.get(offset..offset + 2).ok_or_else(too_short)?;
        Ok(u16::from_be_bytes(b.try_into().unwrap()))
    }

    fn u8_at(&self, offset: usize) -> Result<u8, CollectorError> {
        self.bytes.get(offset).copied().ok_or_else(too_short)
    }

    fn i32_at(&self, offset: usize) -> Result<i32, CollectorError> {
        Ok(self.u32_at(offset)? as i32)
    }

    /// GRIB2 scaled integers use a sign bit in the top bit rather than two's
    /// complement.
    fn signed_grib_i32_at(&self, offset: usize) -> Result<i64, CollectorError> {
        let raw = self.u32_at(offset)?;
        let magnitude = (raw & 0x7FFF_FFFF) as i64;
        if raw & 0x8000_0000 != 0 {
            Ok(-magnitude)
        } else {
            Ok(magnitude)
        }
    }

    fn signed_grib_i16_at(&self, offset: usize) -> Result<i32, CollectorError> {
        let raw = self.u16_at(offset)?;
        let magnitude = (raw & 0x7FFF) as i32;
        if raw & 0x8000 != 0 {
            Ok(-magnitude)
        } else {
            Ok(magnitude)
        }
    }

    fn f32_at(&self, offset: usize) -> Result<f32, CollectorError> {
        Ok(f32::from_bits(self.u32_at(offset)?))
    }
}

fn too_short() -> CollectorError {
    CollectorError::DecodeError("grib2: truncated section".to_string())
}

struct BitReader<'a> {
    bytes: &'a [u8],
    bit_pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, bit_pos: 0 }
    }

    fn read(&mut self, nbits: u32) -> Option<u32> {
        if nbits == 0 {
            return Some(0);
        }
        let mut value: u32 = 0;
        for _ in 0..nbits {
            let byte = *self.bytes.get(self.bit_pos / 8)?;
            let bit = (byte >> (7 - (self.bit_pos % 8))) & 1;
            value = (value << 1) | bit as u32;
            self.bit_pos += 1;
        }
        Some(value)
    }
}

/// Decode every GRIB2 message found in `bytes`, concatenated back-to-back
/// as NOMADS returns them for a multi-variable filter request.
pub fn decode_messages(bytes: &[u8]) -> Result<Vec<DecodedMessage>, CollectorError> {
    let mut messages = Vec::new();
    let mut offset = 0;

    while offset + SECTION0_LEN <= bytes.len() {
        if &bytes[offset..offset + 4] != b"GRIB" {
            break;
        }
        let header = SectionCursor { bytes: &bytes[offset..] };

        // Octets 9-16 (0-indexed 8..16) hold the 8-byte total message length.
        let len_hi = header.u32_at(8)? as u64;
        let len_lo = header.u32_at(12)? as u64;
        let total_length = ((len_hi << 32) | len_lo) as usize;
        if total_length == 0 || offset + total_length > bytes.len() {
            return Err(CollectorError::DecodeError("grib2: bad message length".to_string()));
        }

        let message = &bytes[offset..offset + total_length];
        messages.push(decode_one_message(message)?);
        offset += total_length;
    }

    Ok(messages)
}

fn decode_one_message(message: &[u8]) -> Result<DecodedMessage, CollectorError> {
    if &message[message.len() - 4..] != END_MARKER {
        return Err(CollectorError::DecodeError("grib2: missing 7777 marker".to_string()));
    }

    let mut pos = SECTION0_LEN;
    let mut grid: Option<GridHeader> = None;
    let mut category = None;
    let mut parameter = None;
    let mut reference = 0f32;
    let mut bin_scale = 0i32;
    let mut dec_scale = 0i32;
    let mut nbits = 0u8;

    while pos + 5 <= message.len() {
        if &message[pos..pos + 4] == END_MARKER {
            break;
        }
        let cursor = SectionCursor { bytes: &message[pos..] };
        let section_len = cursor.u32_at(0)? as usize;
        let section_number = cursor.u8_at(4)?;

        match section_number {
            3 => grid = Some(parse_grid_definition(&cursor)?),
            4 => {
                category = Some(cursor.u8_at(9)?);
                parameter = Some(cursor.u8_at(10)?);
            }
            5 => {
                reference = cursor.f32_at(11)?;
                bin_scale = cursor.signed_grib_i16_at(15)?;
                dec_scale = cursor.signed_grib_i16_at(17)?;
                nbits = cursor.u8_at(19)?;
            }
            7 => {
                let grid = grid
                    .ok_or_else(|| CollectorError::DecodeError("grib2: data before grid".to_string()))?;
                let npoints = grid.nx * grid.ny;
                let packed = &message[pos + 5..pos + section_len];
                let values = unpack_simple(packed, nbits, reference, bin_scale, dec_scale, npoints)?;
                return Ok(DecodedMessage {
                    category: category
                        .ok_or_else(|| CollectorError::DecodeError("grib2: missing category".to_string()))?,
                    parameter: parameter
                        .ok_or_else(|| CollectorError::DecodeError("grib2: missing parameter".to_string()))?,
                    grid,
                    values,
                });
            }
            _ => {}
        }

        pos += section_len;
    }

    Err(CollectorError::DecodeError("grib2: message had no data section".to_string()))
}

fn parse_grid_definition(cursor: &SectionCursor) -> Result<GridHeader, CollectorError> {
    let template = cursor.u16_at(12)?;
    if template != 0 {
        return Err(CollectorError::DecodeError(format!(
            "grib2: unsupported grid definition template {template}"
        )));
    }
    let nx = cursor.u32_at(36)? as usize;
    let ny = cursor.u32_at(40)? as usize;
    let la1 = cursor.signed_grib_i32_at(52)? as f64 / 1_000_000.0;
    let lo1 = cursor.signed_grib_i32_at(56)? as f64 / 1_000_000.0;
    let di = cursor.i32_at(69)? as f64 / 1_000_000.0;
    let dj = cursor.i32_at(73)? as f64 / 1_000_000.0;

    Ok(GridHeader { nx, ny, lo1, la1, dx: di, dy: dj })
}

#[allow(clippy::too_many_arguments)]
fn unpack_simple(
    packed: &[u8],
    nbits: u8,
    reference: f32,
    bin_scale: i32,
    dec_scale: i32,
    npoints: usize,
) -> Result<Vec<f64>, CollectorError> {
    if nbits == 0 {
        return Ok(vec![reference as f64; npoints]);
    }
    let mut reader = BitReader::new(packed);
    let mut values = Vec::with_capacity(npoints);
    let bin_factor = 2f64.powi(bin_scale);
    let dec_factor = 10f64.powi(dec_scale);

    for _ in 0..npoints {
        let raw = reader
            .read(nbits as u32)
            .ok_or_else(|| CollectorError::DecodeError("grib2: data section shorter than grid".to_string()))?;
        let value = (reference as f64 + raw as f64 * bin_factor) / dec_factor;
        values.push(value);
    }
    Ok(values)
}

/// Find the message whose (category, parameter) pair matches the target.
/// Precipitation is special-cased upstream by requesting only the f001
/// file so the first matching message is always the live one.
pub fn find_field(messages: &[DecodedMessage], category: u8, parameter: u8) -> Option<&DecodedMessage> {
    messages.iter().find(|m| m.category == category && m.parameter == parameter)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a minimal single-message GRIB2 fixture carrying `values` over
    /// an `nx`×`ny` lat/lon grid, simple-packed with the given reference
    /// value, bit width, and scale factors.
    fn build_fixture(
        category: u8,
        parameter: u8,
        nx: u32,
        ny: u32,
        la1_e6: i32,
        lo1_e6: i32,
        di_e6: i32,
        dj_e6: i32,
        reference: f32,
        bin_scale: i16,
        dec_scale: i16,
        nbits: u8,
        raw_values: &[u32],
    ) -> Vec<u8> {
        // Built directly at the fixed offsets `parse_grid_definition` reads.
        let mut section3 = vec![0u8; 78];
        section3[12..14].copy_from_slice(&0u16.to_be_bytes()); // template 0
        section3[36..40].copy_from_slice(&nx.to_be_bytes());
        section3[40..44].copy_from_slice(&ny.to_be_bytes());
        section3[52..56].copy_from_slice(&la1_e6.to_be_bytes());
        section3[56..60].copy_from_slice(&lo1_e6.to_be_bytes());
        section3[69..73].copy_from_slice(&di_e6.to_be_bytes());
        section3[73..77].copy_from_slice(&dj_e6.to_be_bytes());
        let section3_full = wrap_section(3, &section3);

        let mut section4 = vec![0u8; 11];
        section4[9] = category;
        section4[10] = parameter;
        let section4_full = wrap_section(4, &section4);

        let mut section5 = vec![0u8; 20];
        section5[11..15].copy_from_slice(&reference.to_bits().to_be_bytes());
        section5[15..17].copy_from_slice(&bin_scale.to_be_bytes());
        section5[17..19].copy_from_slice(&dec_scale.to_be_bytes());
        section5[19] = nbits;
        let section5_full = wrap_section(5, &section5);

        let mut bits = Vec::new();
        let mut bit_buf: u64 = 0;
        let mut bit_count = 0u32;
        for &raw in raw_values {
            bit_buf = (bit_buf << nbits) | raw as u64;
            bit_count += nbits as u32;
            while bit_count >= 8 {
                let shift = bit_count - 8;
                bits.push(((bit_buf >> shift) & 0xFF) as u8);
                bit_count -= 8;
            }
        }
        if bit_count > 0 {
            bits.push(((bit_buf << (8 - bit_count)) & 0xFF) as u8);
        }
        let section7_full = wrap_section(7, &bits);

        let mut body = Vec::new();
        body.extend_from_slice(&section3_full);
        body.extend_from_slice(&section4_full);
        body.extend_from_slice(&section5_full);
        body.extend_from_slice(&section7_full);

        let total_len = SECTION0_LEN + body.len() + 4;
        let mut message = Vec::new();
        message.extend_from_slice(b"GRIB");
        message.extend_from_slice(&[0u8, 0u8]);
        message.push(0); // discipline
        message.push(2); // edition
        message.extend_from_slice(&(total_len as u64).to_be_bytes());
        message.extend_from_slice(&body);
        message.extend_from_slice(END_MARKER);
        assert_eq!(message.len(), total_len);
        message
    }

    fn wrap_section(number: u8, content: &[u8]) -> Vec<u8> {
        let len = 5 + content.len();
        let mut out = Vec::with_capacity(len);
        out.extend_from_slice(&(len as u32).to_be_bytes());
        out.push(number);
        out.extend_from_slice(content);
        out
    }

    #[test]
    fn decodes_single_field_three_cells_300k() {
        // reference=300.0, no scaling, 0 bits -> constant field.
        let fixture = build_fixture(0, 0, 3, 1, 90_000_000, 0, 250_000, 250_000, 300.0, 0, 0, 0, &[]);
        let messages = decode_messages(&fixture).unwrap();
        assert_eq!(messages.len(), 1);
        let field = &messages[0];
        assert_eq!(field.grid.nx, 3);
        assert_eq!(field.grid.ny, 1);
        assert_eq!(field.values, vec![300.0, 300.0, 300.0]);
    }

    #[test]
    fn decodes_packed_values_with_scale_factors() {
        // reference=0, dec_scale=1 (divide by 10), 8-bit packed raw values.
        let fixture = build_fixture(1, 8, 2, 1, 0, 0, 1, 1, 0.0, 0, 1, 8, &[850, 900]);
        let messages = decode_messages(&fixture).unwrap();
        let field = find_field(&messages, 1, 8).unwrap();
        assert_eq!(field.values, vec![85.0, 90.0]);
    }
}
