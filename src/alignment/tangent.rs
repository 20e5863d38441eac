use nalgebra::{Matrix3x2, Vector3};

/// Above this |v̂·up| the up axis is too close to `v` to serve as reference.
const PARALLEL_THRESHOLD: f64 = 0.9;

/// Orthonormal basis (as columns) of the plane orthogonal to `v`.
///
/// Returns `None` for a zero or non-finite vector; any other magnitude works.
pub fn tangent_basis(v: &Vector3<f64>) -> Option<Matrix3x2<f64>> {
    if !v.iter().all(|x| x.is_finite()) {
        return None;
    }
    // Rescale first so tiny vectors do not underflow in the norm
    let max = v.amax();
    if max == 0.0 {
        return None;
    }
    let a = (v / max).normalize();

    let up = Vector3::z();
    let reference = if a.dot(&up).abs() > PARALLEL_THRESHOLD {
        Vector3::x()
    } else {
        up
    };

    let b1 = (reference - a * a.dot(&reference)).normalize();
    let b2 = a.cross(&b1).normalize();
    Some(Matrix3x2::from_columns(&[b1, b2]))
}
