//! Fixed-point matrix math for the model format.
//!
//! Rotation/scale matrices on disc are 3x3 int16 with 4096 = 1.0 (the GTE
//! fixed-point convention). The engine applies them as `v' = M * v` with
//! each storage triple `m[3i..3i+3]` forming matrix row `i`.

use binrw::binrw;
use cgmath::{InnerSpace, Quaternion};

/// One unit in the disc's fixed-point encoding.
pub const FIXED_ONE: f32 = 4096.0;

/// A 3x3 fixed-point matrix exactly as stored on disc.
#[binrw]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[br(little)]
pub struct FixedMatrix {
    pub m: [i16; 9],
}

impl FixedMatrix {
    pub const IDENTITY: FixedMatrix = FixedMatrix {
        m: [4096, 0, 0, 0, 4096, 0, 0, 0, 4096],
    };

    pub fn to_f32(self) -> FMatrix3 {
        let mut m = [0.0f32; 9];
        for (dst, src) in m.iter_mut().zip(self.m.iter()) {
            *dst = f32::from(*src) / FIXED_ONE;
        }
        FMatrix3 { m }
    }
}

/// A 3x3 float matrix in the same row layout as [`FixedMatrix`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FMatrix3 {
    pub m: [f32; 9],
}

impl FMatrix3 {
    pub const IDENTITY: FMatrix3 = FMatrix3 {
        m: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
    };

    /// Splits `self` into a per-axis scale and a normalized rotation matrix
    /// so that `self ≈ diag(scale) * rotation`.
    ///
    /// Scale is the Euclidean norm of each row triple; a zero-length row
    /// falls back to 1.0 so the rotation stays finite.
    pub fn decompose(self) -> ([f32; 3], FMatrix3) {
        let mut scale = [0.0f32; 3];
        let mut rotation = self;
        for i in 0..3 {
            let row = &self.m[3 * i..3 * i + 3];
            let len = (row[0] * row[0] + row[1] * row[1] + row[2] * row[2]).sqrt();
            scale[i] = if len == 0.0 { 1.0 } else { len };
            for j in 0..3 {
                rotation.m[3 * i + j] /= scale[i];
            }
        }
        (scale, rotation)
    }
}

/// Converts a rotation matrix to a quaternion with the trace-branch method
/// from euclideanspace.com, keeping the source engine's sign conventions
/// (the element pairs are swapped relative to the textbook row-major form).
pub fn matrix_to_quaternion(mat: &FMatrix3) -> Quaternion<f32> {
    let m = &mat.m;
    let trace = m[0] + m[4] + m[8];
    let q = if trace > 0.0 {
        let s = (trace + 1.0).sqrt() * 2.0;
        Quaternion::new(
            0.25 * s,
            (m[5] - m[7]) / s,
            (m[6] - m[2]) / s,
            (m[1] - m[3]) / s,
        )
    } else if m[0] > m[4] && m[0] > m[8] {
        let s = (1.0 + m[0] - m[4] - m[8]).sqrt() * 2.0;
        Quaternion::new(
            (m[5] - m[7]) / s,
            0.25 * s,
            (m[3] + m[1]) / s,
            (m[6] + m[2]) / s,
        )
    } else if m[4] > m[8] {
        let s = (1.0 + m[4] - m[0] - m[8]).sqrt() * 2.0;
        Quaternion::new(
            (m[6] - m[2]) / s,
            (m[3] + m[1]) / s,
            0.25 * s,
            (m[7] + m[5]) / s,
        )
    } else {
        let s = (1.0 + m[8] - m[0] - m[4]).sqrt() * 2.0;
        Quaternion::new(
            (m[1] - m[3]) / s,
            (m[6] + m[2]) / s,
            (m[7] + m[5]) / s,
            0.25 * s,
        )
    };
    q.normalize()
}

/// Inverse of [`matrix_to_quaternion`] under the same convention.
pub fn quaternion_to_matrix(q: Quaternion<f32>) -> FMatrix3 {
    let (w, x, y, z) = (q.s, q.v.x, q.v.y, q.v.z);
    FMatrix3 {
        m: [
            1.0 - 2.0 * (y * y + z * z),
            2.0 * (x * y + w * z),
            2.0 * (x * z - w * y),
            2.0 * (x * y - w * z),
            1.0 - 2.0 * (x * x + z * z),
            2.0 * (y * z + w * x),
            2.0 * (x * z + w * y),
            2.0 * (y * z - w * x),
            1.0 - 2.0 * (x * x + y * y),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f32 = 1e-4;

    fn assert_matrix_close(a: &FMatrix3, b: &FMatrix3) {
        for i in 0..9 {
            assert!(
                (a.m[i] - b.m[i]).abs() < TOL,
                "element {}: {} vs {}\n{:?}\n{:?}",
                i,
                a.m[i],
                b.m[i],
                a,
                b
            );
        }
    }

    fn rot_x(deg: f32) -> FMatrix3 {
        let (s, c) = deg.to_radians().sin_cos();
        FMatrix3 {
            m: [1.0, 0.0, 0.0, 0.0, c, -s, 0.0, s, c],
        }
    }

    fn rot_y(deg: f32) -> FMatrix3 {
        let (s, c) = deg.to_radians().sin_cos();
        FMatrix3 {
            m: [c, 0.0, s, 0.0, 1.0, 0.0, -s, 0.0, c],
        }
    }

    fn rot_z(deg: f32) -> FMatrix3 {
        let (s, c) = deg.to_radians().sin_cos();
        FMatrix3 {
            m: [c, -s, 0.0, s, c, 0.0, 0.0, 0.0, 1.0],
        }
    }

    #[test]
    fn fixed_identity_converts_to_float_identity() {
        assert_matrix_close(&FixedMatrix::IDENTITY.to_f32(), &FMatrix3::IDENTITY);
    }

    #[test]
    fn quaternion_roundtrip_trace_branch() {
        // Small rotation: positive trace.
        let r = rot_z(10.0);
        let q = matrix_to_quaternion(&r);
        assert_matrix_close(&quaternion_to_matrix(q), &r);
    }

    #[test]
    fn quaternion_roundtrip_dominant_m00() {
        // ~180 degrees about X: m[0] is the largest diagonal element.
        let r = rot_x(179.0);
        assert!(r.m[0] + r.m[4] + r.m[8] <= 0.0);
        assert!(r.m[0] > r.m[4] && r.m[0] > r.m[8]);
        let q = matrix_to_quaternion(&r);
        assert_matrix_close(&quaternion_to_matrix(q), &r);
    }

    #[test]
    fn quaternion_roundtrip_dominant_m11() {
        let r = rot_y(179.0);
        assert!(r.m[0] + r.m[4] + r.m[8] <= 0.0);
        assert!(r.m[4] > r.m[0] && r.m[4] > r.m[8]);
        let q = matrix_to_quaternion(&r);
        assert_matrix_close(&quaternion_to_matrix(q), &r);
    }

    #[test]
    fn quaternion_roundtrip_dominant_m22() {
        let r = rot_z(179.0);
        assert!(r.m[0] + r.m[4] + r.m[8] <= 0.0);
        assert!(r.m[8] >= r.m[0] && r.m[8] >= r.m[4]);
        let q = matrix_to_quaternion(&r);
        assert_matrix_close(&quaternion_to_matrix(q), &r);
    }

    #[test]
    fn quaternion_roundtrip_composed_rotation() {
        // A rotation with no zero elements, still det = 1.
        let a = rot_z(33.0);
        let b = rot_x(-47.0);
        let mut m = [0.0f32; 9];
        for i in 0..3 {
            for j in 0..3 {
                for k in 0..3 {
                    m[3 * i + j] += a.m[3 * i + k] * b.m[3 * k + j];
                }
            }
        }
        let r = FMatrix3 { m };
        let q = matrix_to_quaternion(&r);
        assert_matrix_close(&quaternion_to_matrix(q), &r);
    }

    #[test]
    fn decompose_identity() {
        let (scale, rot) = FMatrix3::IDENTITY.decompose();
        assert_eq!(scale, [1.0, 1.0, 1.0]);
        assert_matrix_close(&rot, &FMatrix3::IDENTITY);
    }

    #[test]
    fn decompose_recovers_nonuniform_scale() {
        let r = rot_z(30.0);
        let scale_in = [2.0f32, 0.5, 1.25];
        let mut m = r;
        for i in 0..3 {
            for j in 0..3 {
                m.m[3 * i + j] *= scale_in[i];
            }
        }
        let (scale, rot) = m.decompose();
        for i in 0..3 {
            assert!((scale[i] - scale_in[i]).abs() < TOL);
        }
        assert_matrix_close(&rot, &r);
        // Rows of the recovered rotation are orthonormal.
        for i in 0..3 {
            let row = &rot.m[3 * i..3 * i + 3];
            let len = (row[0] * row[0] + row[1] * row[1] + row[2] * row[2]).sqrt();
            assert!((len - 1.0).abs() < TOL);
        }
    }

    #[test]
    fn decompose_zero_row_falls_back_to_unit_scale() {
        let m = FMatrix3 {
            m: [0.0, 0.0, 0.0, 0.0, 3.0, 0.0, 0.0, 0.0, 3.0],
        };
        let (scale, _) = m.decompose();
        assert_eq!(scale[0], 1.0);
        assert!((scale[1] - 3.0).abs() < TOL);
    }
}
