/// One macroblock's motion estimate as reported by the H.264 encoder.
///
/// The encoder emits signed 8-bit components; they are widened here so
/// synthetic frames and the magnitude math never wrap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MotionVector {
    pub x: i16,
    pub y: i16,
    /// Sum of absolute differences for the block (unused by the estimator).
    pub sad: u16,
}

impl MotionVector {
    pub fn new(x: i16, y: i16) -> Self {
        Self { x, y, sad: 0 }
    }

    /// Euclidean length of the vector, clamped to the 8-bit range.
    pub fn magnitude(&self) -> u8 {
        magnitude(self.x as i32, self.y as i32)
    }
}

/// `sqrt(x² + y²)` clamped to `[0, 255]` and truncated to an integer.
pub fn magnitude(x: i32, y: i32) -> u8 {
    let (x, y) = (x as f64, y as f64);
    (x * x + y * y).sqrt().clamp(0.0, 255.0) as u8
}

/// Shape of the per-frame vector grid for a given capture resolution.
///
/// Inline vectors cover 16x16 macroblocks and carry one extra column per row.
/// Binary wire format, per frame, row-major:
///   rows * cols records of
///   [0]    x    (i8)
///   [1]    y    (i8)
///   [2..4] sad  (u16 little-endian)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorLayout {
    pub cols: usize,
    pub rows: usize,
}

pub const VECTOR_RECORD_SIZE: usize = 4;
const MACROBLOCK_SIZE: usize = 16;

impl VectorLayout {
    pub fn new(cols: usize, rows: usize) -> Self {
        Self { cols, rows }
    }

    pub fn for_resolution(width: u32, height: u32) -> Self {
        let cols = (width as usize).div_ceil(MACROBLOCK_SIZE) + 1;
        let rows = (height as usize).div_ceil(MACROBLOCK_SIZE);
        Self { cols, rows }
    }

    pub fn len(&self) -> usize {
        self.cols * self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size in bytes of one encoded frame.
    pub fn frame_bytes(&self) -> usize {
        self.len() * VECTOR_RECORD_SIZE
    }
}

/// A full grid of motion vectors for one encoded video frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MotionVectorFrame {
    layout: VectorLayout,
    vectors: Vec<MotionVector>,
}

impl MotionVectorFrame {
    /// Build a frame from row-major vectors. The vector count must match the layout.
    pub fn new(layout: VectorLayout, vectors: Vec<MotionVector>) -> Result<Self, FrameError> {
        if vectors.len() != layout.len() {
            return Err(FrameError::Shape {
                cols: layout.cols,
                rows: layout.rows,
                got: vectors.len(),
            });
        }
        Ok(Self { layout, vectors })
    }

    /// Frame where every macroblock carries the same vector.
    pub fn filled(layout: VectorLayout, vector: MotionVector) -> Self {
        Self {
            layout,
            vectors: vec![vector; layout.len()],
        }
    }

    /// Decode one frame from the encoder's inline vector stream.
    pub fn decode(data: &[u8], layout: VectorLayout) -> Result<Self, FrameError> {
        let expected = layout.frame_bytes();
        if data.len() != expected {
            return Err(FrameError::Truncated {
                got: data.len(),
                expected,
            });
        }
        let vectors = data
            .chunks_exact(VECTOR_RECORD_SIZE)
            .map(|r| MotionVector {
                x: r[0] as i8 as i16,
                y: r[1] as i8 as i16,
                sad: u16::from_le_bytes([r[2], r[3]]),
            })
            .collect();
        Ok(Self { layout, vectors })
    }

    pub fn layout(&self) -> VectorLayout {
        self.layout
    }

    pub fn vectors(&self) -> &[MotionVector] {
        &self.vectors
    }

    pub fn get(&self, col: usize, row: usize) -> Option<&MotionVector> {
        if col >= self.layout.cols || row >= self.layout.rows {
            return None;
        }
        self.vectors.get(row * self.layout.cols + col)
    }

    pub fn get_mut(&mut self, col: usize, row: usize) -> Option<&mut MotionVector> {
        if col >= self.layout.cols || row >= self.layout.rows {
            return None;
        }
        self.vectors.get_mut(row * self.layout.cols + col)
    }

    pub fn magnitudes(&self) -> impl Iterator<Item = u8> + '_ {
        self.vectors.iter().map(MotionVector::magnitude)
    }

    /// Number of macroblocks whose magnitude is strictly greater than `threshold`.
    pub fn count_above(&self, threshold: u8) -> usize {
        self.magnitudes().filter(|&m| m > threshold).count()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("vector frame has {got} entries, expected {cols}x{rows}")]
    Shape { cols: usize, rows: usize, got: usize },
    #[error("vector frame truncated: got {got} bytes, expected {expected}")]
    Truncated { got: usize, expected: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magnitude_basic() {
        assert_eq!(magnitude(0, 0), 0);
        assert_eq!(magnitude(3, 4), 5);
        assert_eq!(magnitude(-3, -4), 5);
        assert_eq!(MotionVector::new(60, 80).magnitude(), 100);
    }

    #[test]
    fn magnitude_clamps_extremes() {
        assert_eq!(magnitude(1000, 1000), 255);
        assert_eq!(magnitude(-1000, 1000), 255);
        assert_eq!(magnitude(i32::MIN, i32::MAX), 255);
        assert_eq!(MotionVector::new(i16::MIN, i16::MIN).magnitude(), 255);
    }

    #[test]
    fn magnitude_truncates() {
        // sqrt(2) = 1.41...
        assert_eq!(magnitude(1, 1), 1);
        // sqrt(8100 + 1) = 90.005...
        assert_eq!(magnitude(90, 1), 90);
    }

    #[test]
    fn layout_for_resolution() {
        let layout = VectorLayout::for_resolution(1920, 1080);
        assert_eq!(layout, VectorLayout::new(121, 68));
        assert_eq!(layout.frame_bytes(), 121 * 68 * 4);

        let layout = VectorLayout::for_resolution(640, 480);
        assert_eq!(layout, VectorLayout::new(41, 30));
    }

    #[test]
    fn decode_signed_components() {
        let layout = VectorLayout::new(2, 1);
        let data = [0xFF, 0x05, 0x10, 0x00, 0x80, 0x7F, 0x00, 0x01];
        let frame = MotionVectorFrame::decode(&data, layout).unwrap();
        assert_eq!(frame.get(0, 0), Some(&MotionVector { x: -1, y: 5, sad: 16 }));
        assert_eq!(frame.get(1, 0), Some(&MotionVector { x: -128, y: 127, sad: 256 }));
        assert!(frame.get(2, 0).is_none());
    }

    #[test]
    fn decode_rejects_partial_frame() {
        let layout = VectorLayout::new(2, 2);
        let err = MotionVectorFrame::decode(&[0u8; 12], layout).unwrap_err();
        assert!(matches!(err, FrameError::Truncated { got: 12, expected: 16 }));
    }

    #[test]
    fn new_rejects_shape_mismatch() {
        let layout = VectorLayout::new(3, 3);
        let err = MotionVectorFrame::new(layout, vec![MotionVector::default(); 8]).unwrap_err();
        assert!(matches!(err, FrameError::Shape { cols: 3, rows: 3, got: 8 }));
    }

    #[test]
    fn count_above_is_strict() {
        let layout = VectorLayout::new(4, 4);
        let mut frame = MotionVectorFrame::filled(layout, MotionVector::default());
        *frame.get_mut(0, 0).unwrap() = MotionVector::new(80, 0);
        *frame.get_mut(1, 0).unwrap() = MotionVector::new(81, 0);
        *frame.get_mut(3, 3).unwrap() = MotionVector::new(0, -100);
        assert_eq!(frame.count_above(80), 2);
        assert_eq!(frame.count_above(0), 3);
    }
}
