//! TRANSFORM message type
//!
//! Carries a 4x4 homogeneous transformation matrix. Only the upper 3x4
//! portion is transmitted (12 floats, column-major), the last row is
//! implicitly [0, 0, 0, 1].

use crate::error::{IgtlError, Result};
use crate::protocol::message::Message;
use bytes::{Buf, BufMut};

const TRANSFORM_SIZE: usize = 48;

/// TRANSFORM message body
#[derive(Debug, Clone, PartialEq)]
pub struct TransformMessage {
    /// 4x4 homogeneous transformation matrix (rotation + translation)
    pub matrix: [[f32; 4]; 4],
}

impl TransformMessage {
    /// Identity transformation
    pub fn identity() -> Self {
        let mut matrix = [[0.0f32; 4]; 4];
        for (i, row) in matrix.iter_mut().enumerate() {
            row[i] = 1.0;
        }
        TransformMessage { matrix }
    }

    /// Pure translation
    pub fn translation(x: f32, y: f32, z: f32) -> Self {
        let mut msg = Self::identity();
        msg.matrix[0][3] = x;
        msg.matrix[1][3] = y;
        msg.matrix[2][3] = z;
        msg
    }
}

impl Message for TransformMessage {
    fn message_type() -> &'static str {
        "TRANSFORM"
    }

    fn encode_content(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(TRANSFORM_SIZE);
        // Column-major: R11 R21 R31, R12 R22 R32, R13 R23 R33, TX TY TZ
        for col in 0..4 {
            for row in 0..3 {
                buf.put_f32(self.matrix[row][col]);
            }
        }
        Ok(buf)
    }

    fn decode_content(data: &[u8]) -> Result<Self> {
        if data.len() != TRANSFORM_SIZE {
            return Err(IgtlError::InvalidSize {
                expected: TRANSFORM_SIZE,
                actual: data.len(),
            });
        }

        let mut cursor = std::io::Cursor::new(data);
        let mut matrix = [[0.0f32; 4]; 4];
        for col in 0..4 {
            for row in matrix.iter_mut().take(3) {
                row[col] = cursor.get_f32();
            }
        }
        matrix[3] = [0.0, 0.0, 0.0, 1.0];

        Ok(TransformMessage { matrix })
    }
}
