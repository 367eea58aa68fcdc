//! # Vision Sensor Datagrams
//!
//! The vision sensor streams one UDP datagram per processed camera frame, listing every AprilTag
//! it detected in that frame. The layout is:
//!
//! | Offset | Size     | Content                           |
//! |--------|----------|-----------------------------------|
//! | 0      | 4        | Magic `APRI`                      |
//! | 4      | 4        | Magic `LTAG`                      |
//! | 8      | 4        | Version `00 01 00 02`             |
//! | 12     | 4        | Number of tags (`i32`)            |
//! | 16     | 8        | Reserved                          |
//! | 24     | 84 * N   | Tag records                       |
//!
//! Each tag record holds `id`, `hamming_error` and `num_code_bits` as `i32`, followed by the
//! center (2 `f32`), the four corners (8 `f32`) and the homography (9 `f32`).

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

use super::MalformedPacket;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// First magic number, `APRI`.
pub const MAGIC_A: [u8; 4] = [0x41, 0x50, 0x52, 0x49];

/// Second magic number, `LTAG`.
pub const MAGIC_B: [u8; 4] = [0x4C, 0x54, 0x41, 0x47];

/// The only supported datagram version.
pub const VERSION: [u8; 4] = [0x00, 0x01, 0x00, 0x02];

/// Length of the datagram header, which is also the minimum datagram length.
pub const HEADER_LEN: usize = 24;

/// Length of a single tag record.
pub const TAG_RECORD_LEN: usize = 84;

const MAGIC_B_OFFSET: usize = 4;
const VERSION_OFFSET: usize = 8;
const NUM_TAGS_OFFSET: usize = 12;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A single tag detected by the vision sensor.
///
/// Coordinates are in image pixels. Observations are produced fresh by each decode and never
/// modified afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TagObservation {
    pub id: i32,
    pub hamming_error: i32,
    pub num_code_bits: i32,

    /// Center of the tag as `[x, y]`
    pub center: [f64; 2],

    /// Corners of the tag in detection order, each as `[x, y]`
    pub corners: [[f64; 2]; 4],

    /// Row-major homography from tag to image coordinates
    pub homography: [f64; 9],
}

/// The tags carried by one structurally valid datagram.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagDecode {
    pub tags: Vec<TagObservation>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TagObservation {
    /// The apparent size of the tag.
    ///
    /// This is the largest `|x|` difference between consecutive corners, wrapping from the last
    /// corner back to the first.
    pub fn vertical_extent(&self) -> f64 {
        (0..4)
            .map(|i| (self.corners[i][0] - self.corners[(i + 1) % 4][0]).abs())
            .fold(0.0, f64::max)
    }

    /// Read a record from the cursor, which must hold at least `TAG_RECORD_LEN` more bytes.
    fn read_from(cursor: &mut Cursor<&[u8]>) -> std::io::Result<Self> {
        let id = cursor.read_i32::<BigEndian>()?;
        let hamming_error = cursor.read_i32::<BigEndian>()?;
        let num_code_bits = cursor.read_i32::<BigEndian>()?;

        let mut center = [0f64; 2];
        for c in center.iter_mut() {
            *c = cursor.read_f32::<BigEndian>()? as f64;
        }

        let mut corners = [[0f64; 2]; 4];
        for corner in corners.iter_mut() {
            for c in corner.iter_mut() {
                *c = cursor.read_f32::<BigEndian>()? as f64;
            }
        }

        let mut homography = [0f64; 9];
        for h in homography.iter_mut() {
            *h = cursor.read_f32::<BigEndian>()? as f64;
        }

        Ok(Self {
            id,
            hamming_error,
            num_code_bits,
            center,
            corners,
            homography,
        })
    }

    /// Append this observation's record to the buffer.
    fn write_to(&self, buf: &mut Vec<u8>) -> std::io::Result<()> {
        buf.write_i32::<BigEndian>(self.id)?;
        buf.write_i32::<BigEndian>(self.hamming_error)?;
        buf.write_i32::<BigEndian>(self.num_code_bits)?;

        let coords = self
            .center
            .iter()
            .chain(self.corners.iter().flatten())
            .chain(self.homography.iter());
        for c in coords {
            buf.write_f32::<BigEndian>(*c as f32)?;
        }

        Ok(())
    }

    fn is_finite(&self) -> bool {
        self.center
            .iter()
            .chain(self.corners.iter().flatten())
            .all(|c| c.is_finite())
    }
}

impl TagDecode {
    /// Number of tags in the datagram.
    pub fn num_tags(&self) -> usize {
        self.tags.len()
    }

    /// `true` if the datagram carried no tags.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Mean vertical image position of the tag centers, or `None` if there are no tags.
    ///
    /// The mean is truncated toward zero and clamped into `u32`. A mean which truncates to zero
    /// is reported as `1`, since zero means "no tag" everywhere downstream.
    pub fn mean_center_y(&self) -> Option<u32> {
        if self.tags.is_empty() {
            return None;
        }

        let mean = self.tags.iter().map(|t| t.center[1]).sum::<f64>() / self.tags.len() as f64;
        let y = mean.max(0.0).min(std::u32::MAX as f64) as u32;

        Some(y.max(1))
    }

    /// Mean vertical extent of the tags, or `None` if there are no tags.
    pub fn mean_size(&self) -> Option<f64> {
        if self.tags.is_empty() {
            return None;
        }

        Some(self.tags.iter().map(|t| t.vertical_extent()).sum::<f64>() / self.tags.len() as f64)
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Decode a tag datagram.
///
/// The whole datagram is validated before anything is returned, so a `MalformedPacket` error
/// means nothing from the datagram may be used.
pub fn decode_tag_datagram(buf: &[u8]) -> Result<TagDecode, MalformedPacket> {
    if buf.len() < HEADER_LEN {
        return Err(MalformedPacket::TooShort {
            len: buf.len(),
            min: HEADER_LEN,
        });
    }

    if buf[0..MAGIC_B_OFFSET] != MAGIC_A {
        return Err(MalformedPacket::BadMagic { offset: 0 });
    }
    if buf[MAGIC_B_OFFSET..VERSION_OFFSET] != MAGIC_B {
        return Err(MalformedPacket::BadMagic {
            offset: MAGIC_B_OFFSET,
        });
    }
    if buf[VERSION_OFFSET..NUM_TAGS_OFFSET] != VERSION {
        let mut version = [0u8; 4];
        version.copy_from_slice(&buf[VERSION_OFFSET..NUM_TAGS_OFFSET]);
        return Err(MalformedPacket::BadVersion(version));
    }

    let raw_num_tags = BigEndian::read_i32(&buf[NUM_TAGS_OFFSET..NUM_TAGS_OFFSET + 4]);
    if raw_num_tags < 0 {
        return Err(MalformedPacket::BadTagCount(raw_num_tags));
    }
    let num_tags = raw_num_tags as usize;

    let required = num_tags
        .checked_mul(TAG_RECORD_LEN)
        .and_then(|n| n.checked_add(HEADER_LEN))
        .ok_or(MalformedPacket::BadTagCount(raw_num_tags))?;
    if buf.len() < required {
        return Err(MalformedPacket::Truncated {
            num_tags,
            len: buf.len(),
        });
    }

    let mut cursor = Cursor::new(buf);
    cursor.set_position(HEADER_LEN as u64);

    let mut tags = Vec::with_capacity(num_tags);
    for i in 0..num_tags {
        let tag = TagObservation::read_from(&mut cursor).map_err(|_| MalformedPacket::Truncated {
            num_tags,
            len: buf.len(),
        })?;

        if !tag.is_finite() {
            return Err(MalformedPacket::NonFinite(i));
        }

        tags.push(tag);
    }

    Ok(TagDecode { tags })
}

/// Encode a tag datagram.
///
/// This is the inverse of [`decode_tag_datagram`], used by simulated vision sensors and in tests.
pub fn encode_tag_datagram(tags: &[TagObservation]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + tags.len() * TAG_RECORD_LEN);

    buf.extend_from_slice(&MAGIC_A);
    buf.extend_from_slice(&MAGIC_B);
    buf.extend_from_slice(&VERSION);

    let mut count = [0u8; 4];
    BigEndian::write_i32(&mut count, tags.len() as i32);
    buf.extend_from_slice(&count);
    buf.resize(HEADER_LEN, 0);

    for tag in tags {
        // Writing into a Vec cannot fail
        tag.write_to(&mut buf).ok();
    }

    buf
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
