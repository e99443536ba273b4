//! Acquired depth frames.

/// One acquired frame.
///
/// `data` holds `height * width` values in row-major order, or is empty when
/// the device sent no distance map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub data: Vec<u16>,
    pub height: u32,
    pub width: u32,
    /// Device frame number.
    pub sequence: u32,
    /// Device time of day in milliseconds.
    pub timestamp_ms: u64,
}

impl Frame {
    pub fn new(data: Vec<u16>, height: u32, width: u32, sequence: u32, timestamp_ms: u64) -> Self {
        debug_assert!(data.is_empty() || data.len() == height as usize * width as usize);
        Self {
            data,
            height,
            width,
            sequence,
            timestamp_ms,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns `(height, width)`.
    pub fn size(&self) -> (u32, u32) {
        (self.height, self.width)
    }

    /// Width over height, or 0 for a frame without rows.
    pub fn aspect(&self) -> f32 {
        if self.height == 0 {
            return 0.0;
        }
        self.width as f32 / self.height as f32
    }

    /// Value at column `x`, row `y`.
    pub fn pixel(&self, x: u32, y: u32) -> Option<u16> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.data
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    /// Smallest and largest non-zero value. Zero marks an invalid pixel.
    pub fn valid_range(&self) -> Option<(u16, u16)> {
        self.data
            .iter()
            .copied()
            .filter(|&v| v != 0)
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_access() {
        let frame = Frame::new(vec![1, 2, 3, 4, 5, 6], 2, 3, 7, 1000);
        assert_eq!(frame.size(), (2, 3));
        assert_eq!(frame.pixel(0, 0), Some(1));
        assert_eq!(frame.pixel(2, 1), Some(6));
        assert_eq!(frame.pixel(3, 0), None);
        assert_eq!(frame.pixel(0, 2), None);
    }

    #[test]
    fn test_aspect() {
        assert_eq!(Frame::default().aspect(), 0.0);
        let frame = Frame::new(vec![0; 176 * 144], 144, 176, 0, 0);
        assert!((frame.aspect() - 176.0 / 144.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_valid_range_ignores_zero() {
        let frame = Frame::new(vec![0, 500, 0, 1200], 2, 2, 0, 0);
        assert_eq!(frame.valid_range(), Some((500, 1200)));
        assert_eq!(Frame::new(vec![0; 4], 2, 2, 0, 0).valid_range(), None);
    }
}
