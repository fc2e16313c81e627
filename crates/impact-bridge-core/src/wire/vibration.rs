//! Vibration sensor notification decoding
//!
//! A notification carries zero or more back-to-back sub-frames. Each sub-frame
//! starts with a two-byte marker and holds little-endian signed 16-bit x/y/z
//! readings at fixed offsets. The offsets and the count-to-physical scale were
//! revised during field calibration, so they live in [`VibrationFrameLayout`]
//! rather than in literals.

use serde::{Deserialize, Serialize};

/// Sub-frame layout and scale for a vibration sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VibrationFrameLayout {
    /// Two-byte marker at the start of every sub-frame
    pub marker: [u8; 2],
    /// Sub-frame length in bytes
    pub frame_len: usize,
    /// Byte offset of the x reading within a sub-frame
    pub x_offset: usize,
    /// Byte offset of the y reading within a sub-frame
    pub y_offset: usize,
    /// Byte offset of the z reading within a sub-frame
    pub z_offset: usize,
    /// Physical units per raw count
    pub scale: f64,
    /// Nominal sensor rate; spaces the sub-frames of one notification.
    /// Zero stamps every sub-frame with the arrival time.
    pub sample_rate_hz: f64,
}

impl Default for VibrationFrameLayout {
    fn default() -> Self {
        Self {
            marker: [0x55, 0x61],
            frame_len: 32,
            x_offset: 14,
            y_offset: 16,
            z_offset: 26,
            scale: 0.000902,
            sample_rate_hz: 50.0,
        }
    }
}

impl VibrationFrameLayout {
    /// Bytes a matched sub-frame must provide before its axes can be read
    fn readable_len(&self) -> usize {
        [self.x_offset, self.y_offset, self.z_offset]
            .into_iter()
            .max()
            .unwrap_or(0)
            + 2
    }

    /// Milliseconds between consecutive sub-frames, zero when unspaced
    pub fn sample_period_ms(&self) -> f64 {
        if self.sample_rate_hz > 0.0 {
            1000.0 / self.sample_rate_hz
        } else {
            0.0
        }
    }

    /// Whether all axis offsets fit inside the sub-frame
    pub fn is_consistent(&self) -> bool {
        self.frame_len >= 2 && self.readable_len() <= self.frame_len
    }

    /// Build one sub-frame carrying the given raw readings
    ///
    /// Bytes not covered by the marker or an axis are zero. Used by
    /// simulators and test fixtures.
    pub fn encode_subframe(&self, raw: [i16; 3]) -> Vec<u8> {
        let mut frame = vec![0u8; self.frame_len.max(self.readable_len())];
        frame[0] = self.marker[0];
        frame[1] = self.marker[1];
        for (offset, value) in [self.x_offset, self.y_offset, self.z_offset]
            .into_iter()
            .zip(raw)
        {
            frame[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
        }
        frame
    }
}

/// One decoded x/y/z reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VibrationSample {
    /// Byte offset of the sub-frame within the notification
    pub offset: usize,
    /// Raw x/y/z counts
    pub raw: [i16; 3],
    /// Physical units per raw count, copied from the layout
    pub scale: f64,
}

impl VibrationSample {
    /// Readings converted to physical units
    pub fn scaled(&self) -> [f64; 3] {
        self.raw.map(|v| v as f64 * self.scale)
    }
}

fn le_i16(bytes: &[u8], offset: usize) -> i16 {
    i16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

/// Decode every sub-frame in a vibration notification
///
/// Scans byte by byte for the marker. A matched marker with enough trailing
/// bytes yields one sample and the scan jumps a whole sub-frame ahead; a
/// matched marker without enough trailing bytes ends the scan. A payload with
/// no marker decodes to an empty list.
///
/// # Example
/// ```
/// use impact_bridge_core::wire::vibration::{decode_vibration_notification, VibrationFrameLayout};
///
/// let layout = VibrationFrameLayout::default();
/// let payload = layout.encode_subframe([100, -200, 300]);
/// let samples = decode_vibration_notification(&payload, &layout);
/// assert_eq!(samples.len(), 1);
/// assert_eq!(samples[0].raw, [100, -200, 300]);
/// ```
pub fn decode_vibration_notification(
    bytes: &[u8],
    layout: &VibrationFrameLayout,
) -> Vec<VibrationSample> {
    let mut samples = Vec::new();
    let required = layout.frame_len.max(layout.readable_len());
    let step = layout.frame_len.max(1);
    let mut i = 0;

    while i + 1 < bytes.len() {
        if bytes[i] != layout.marker[0] || bytes[i + 1] != layout.marker[1] {
            i += 1;
            continue;
        }
        if i + required > bytes.len() {
            tracing::trace!(offset = i, len = bytes.len(), "truncated_subframe");
            break;
        }

        samples.push(VibrationSample {
            offset: i,
            raw: [
                le_i16(bytes, i + layout.x_offset),
                le_i16(bytes, i + layout.y_offset),
                le_i16(bytes, i + layout.z_offset),
            ],
            scale: layout.scale,
        });
        i += step;
    }

    samples
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_single_subframe() {
        let layout = VibrationFrameLayout::default();
        let payload = layout.encode_subframe([1234, -5678, 32767]);
        assert_eq!(payload.len(), 32);

        let samples = decode_vibration_notification(&payload, &layout);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].raw, [1234, -5678, 32767]);
        assert_eq!(samples[0].offset, 0);
    }

    #[test]
    fn test_scaled_values() {
        let layout = VibrationFrameLayout {
            scale: 0.5,
            ..Default::default()
        };
        let payload = layout.encode_subframe([10, -20, 0]);
        let samples = decode_vibration_notification(&payload, &layout);
        let scaled = samples[0].scaled();

        assert_relative_eq!(scaled[0], 5.0);
        assert_relative_eq!(scaled[1], -10.0);
        assert_relative_eq!(scaled[2], 0.0);
    }

    #[test]
    fn test_concatenated_subframes() {
        let layout = VibrationFrameLayout::default();
        let mut payload = layout.encode_subframe([500, 500, 500]);
        payload.extend(layout.encode_subframe([-500, -500, -500]));

        let samples = decode_vibration_notification(&payload, &layout);
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].offset, 32);
        assert_eq!(samples[1].raw, [-500, -500, -500]);
    }

    #[test]
    fn test_no_marker_is_empty() {
        let layout = VibrationFrameLayout::default();
        assert!(decode_vibration_notification(&[0u8; 64], &layout).is_empty());
        assert!(decode_vibration_notification(&[], &layout).is_empty());
        assert!(decode_vibration_notification(&[0x55], &layout).is_empty());
    }

    #[test]
    fn test_truncated_subframe_halts_scan() {
        let layout = VibrationFrameLayout::default();
        let mut payload = layout.encode_subframe([1, 2, 3]);
        // Second marker with only 10 trailing bytes
        payload.extend_from_slice(&[0x55, 0x61]);
        payload.extend_from_slice(&[0u8; 8]);

        let samples = decode_vibration_notification(&payload, &layout);
        assert_eq!(samples.len(), 1);
    }

    #[test]
    fn test_leading_garbage_skipped() {
        let layout = VibrationFrameLayout::default();
        let mut payload = vec![0x00, 0x55, 0x00, 0x61];
        payload.extend(layout.encode_subframe([7, 8, 9]));

        let samples = decode_vibration_notification(&payload, &layout);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].offset, 4);
        assert_eq!(samples[0].raw, [7, 8, 9]);
    }

    #[test]
    fn test_custom_layout() {
        let layout = VibrationFrameLayout {
            marker: [0xAA, 0xBB],
            frame_len: 8,
            x_offset: 2,
            y_offset: 4,
            z_offset: 6,
            scale: 1.0,
            sample_rate_hz: 100.0,
        };
        assert!(layout.is_consistent());

        let mut payload = layout.encode_subframe([-1, 0, 1]);
        payload.extend(layout.encode_subframe([i16::MIN, i16::MAX, 42]));
        let samples = decode_vibration_notification(&payload, &layout);

        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].raw, [i16::MIN, i16::MAX, 42]);
    }

    #[test]
    fn test_inconsistent_layout_detected() {
        let layout = VibrationFrameLayout {
            frame_len: 20,
            ..Default::default()
        };
        assert!(!layout.is_consistent());
    }

    #[test]
    fn test_sample_period() {
        let layout = VibrationFrameLayout::default();
        assert_relative_eq!(layout.sample_period_ms(), 20.0);

        let unspaced = VibrationFrameLayout {
            sample_rate_hz: 0.0,
            ..Default::default()
        };
        assert_eq!(unspaced.sample_period_ms(), 0.0);
    }
}
