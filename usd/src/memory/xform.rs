//! Transform operator evaluation.
//!
//! Matrices use the column-vector convention: a point is transformed as
//! `M * p`. An op order `[translate, rotateXYZ, scale]` therefore evaluates
//! to `T * R * S`, so the scale is applied first.

use nalgebra::{Matrix4, Quaternion, Rotation3, UnitQuaternion, Unit, Vector3};

use crate::memory::compose::ComposedPrim;
use crate::memory::layer::Value;
use crate::oracle::TimeCode;

use super::sample;

/// Op-order token that discards all parent transforms.
pub const RESET_XFORM_STACK: &str = "!resetXformStack!";
const INVERT_PREFIX: &str = "!invert!";
const OP_ORDER: &str = "xformOpOrder";

/// Evaluated local transform of a prim.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalTransform {
    pub matrix: Matrix4<f64>,
    /// The prim ignores its ancestors' transforms.
    pub resets_stack: bool,
}

/// Evaluates the ops listed in `xformOpOrder` at `time`.
///
/// Ops that are listed but unauthored or of an unknown kind are skipped.
pub fn local_transform(prim: &ComposedPrim, time: TimeCode) -> LocalTransform {
    let mut result = LocalTransform {
        matrix: Matrix4::identity(),
        resets_stack: false,
    };
    let Some(order) = prim
        .attribute(OP_ORDER)
        .and_then(|a| sample(&a.spec, time))
        .and_then(Value::as_array)
    else {
        return result;
    };

    for op in order.iter().filter_map(Value::as_str) {
        if op == RESET_XFORM_STACK {
            result.matrix = Matrix4::identity();
            result.resets_stack = true;
            continue;
        }
        let (name, invert) = match op.strip_prefix(INVERT_PREFIX) {
            Some(name) => (name, true),
            None => (op, false),
        };
        let Some(kind) = name.strip_prefix("xformOp:").map(|rest| rest.split(':').next().unwrap_or(rest))
        else {
            log::warn!("{}: '{op}' is not a transform op", prim.path);
            continue;
        };
        let Some(value) = prim.attribute(name).and_then(|a| sample(&a.spec, time)) else {
            log::debug!("{}: op {name} has no value", prim.path);
            continue;
        };
        let Some(mut m) = op_matrix(kind, value) else {
            log::warn!("{}: cannot evaluate op {name}", prim.path);
            continue;
        };
        if invert {
            m = m.try_inverse().unwrap_or_else(Matrix4::identity);
        }
        result.matrix *= m;
    }
    result
}

/// Matrix of a single op of the given kind (`translate`, `rotateXYZ`, ...).
pub fn op_matrix(kind: &str, value: &Value) -> Option<Matrix4<f64>> {
    let vec3 = || value.as_tuple::<3>().map(Vector3::from);
    match kind {
        "translate" => Some(Matrix4::new_translation(&vec3()?)),
        "scale" => Some(Matrix4::new_nonuniform_scaling(&vec3()?)),
        "rotateX" => Some(axis_rotation(Vector3::x_axis(), value.as_f64()?)),
        "rotateY" => Some(axis_rotation(Vector3::y_axis(), value.as_f64()?)),
        "rotateZ" => Some(axis_rotation(Vector3::z_axis(), value.as_f64()?)),
        "orient" => Some(quaternion_matrix(value.as_tuple::<4>()?)),
        "transform" => {
            let rows = value.as_matrix_rows()?;
            // authored row-vector layout; translation sits in the last row
            Some(Matrix4::from_fn(|r, c| rows[c][r]))
        }
        _ => {
            let axes = kind.strip_prefix("rotate")?;
            if axes.len() != 3 {
                return None;
            }
            let angles = value.as_tuple::<3>()?;
            let mut m = Matrix4::identity();
            for (axis, angle) in axes.chars().zip(angles) {
                let axis = match axis {
                    'X' => Vector3::x_axis(),
                    'Y' => Vector3::y_axis(),
                    'Z' => Vector3::z_axis(),
                    _ => return None,
                };
                // first listed axis applies first
                m = axis_rotation(axis, angle) * m;
            }
            Some(m)
        }
    }
}

fn axis_rotation(axis: Unit<Vector3<f64>>, degrees: f64) -> Matrix4<f64> {
    Rotation3::from_axis_angle(&axis, degrees.to_radians()).to_homogeneous()
}

/// Rotation matrix of an authored `(w, x, y, z)` quaternion.
pub fn quaternion_matrix([w, x, y, z]: [f64; 4]) -> Matrix4<f64> {
    UnitQuaternion::from_quaternion(Quaternion::new(w, x, y, z)).to_homogeneous()
}

/// Transform of one point-instancer instance: `T * R * S`.
pub fn instance_matrix(
    position: [f32; 3],
    orientation: Option<[f64; 4]>,
    scale: Option<[f32; 3]>,
) -> Matrix4<f64> {
    let to_f64 = |v: [f32; 3]| Vector3::new(v[0] as f64, v[1] as f64, v[2] as f64);
    let mut m = Matrix4::new_translation(&to_f64(position));
    if let Some(q) = orientation {
        m *= quaternion_matrix(q);
    }
    if let Some(s) = scale {
        m *= Matrix4::new_nonuniform_scaling(&to_f64(s));
    }
    m
}

#[cfg(test)]
mod tests {
    use nalgebra::{Point3, Vector4};

    use super::*;
    use crate::memory::compose::compose;
    use crate::memory::usda::parse_layer;

    fn assert_close(a: &Matrix4<f64>, b: &Matrix4<f64>) {
        assert!((a - b).abs().max() < 1e-9, "{a} != {b}");
    }

    fn local(body: &str) -> LocalTransform {
        let text = format!("#usda 1.0\ndef Xform \"X\"\n{{\n{body}\n}}\n");
        let stage = compose(parse_layer(&text).unwrap(), None, None).unwrap();
        local_transform(&stage.prims[0], TimeCode::Default)
    }

    #[test]
    fn translate_rotate_scale_order() {
        let t = local(
            r#"
    double3 xformOp:translate = (10, 0, 0)
    float3 xformOp:rotateXYZ = (0, 0, 90)
    float3 xformOp:scale = (2, 2, 2)
    uniform token[] xformOpOrder = ["xformOp:translate", "xformOp:rotateXYZ", "xformOp:scale"]
"#,
        );
        assert!(!t.resets_stack);
        let p = t.matrix.transform_point(&Point3::new(1.0, 0.0, 0.0));
        // scaled to (2,0,0), rotated to (0,2,0), translated to (10,2,0)
        assert!((p - Point3::new(10.0, 2.0, 0.0)).norm() < 1e-9);
    }

    #[test]
    fn unlisted_ops_are_ignored() {
        let t = local("    double3 xformOp:translate = (1, 2, 3)");
        assert_eq!(t.matrix, Matrix4::identity());
    }

    #[test]
    fn reset_and_invert() {
        let t = local(
            r#"
    double3 xformOp:translate:pivot = (0, 5, 0)
    uniform token[] xformOpOrder = ["!resetXformStack!", "xformOp:translate:pivot", "!invert!xformOp:translate:pivot"]
"#,
        );
        assert!(t.resets_stack);
        assert_close(&t.matrix, &Matrix4::identity());
    }

    #[test]
    fn transform_op_is_row_major() {
        let t = local(
            r#"
    matrix4d xformOp:transform = ( (1, 0, 0, 0), (0, 1, 0, 0), (0, 0, 1, 0), (4, 5, 6, 1) )
    uniform token[] xformOpOrder = ["xformOp:transform"]
"#,
        );
        assert_eq!(t.matrix.column(3).into_owned(), Vector4::new(4.0, 5.0, 6.0, 1.0));
    }

    #[test]
    fn euler_orders_compose_first_axis_first() {
        let xyz = op_matrix("rotateXYZ", &Value::Tuple(vec![Value::Int(90), Value::Int(90), Value::Int(0)])).unwrap();
        let expected = axis_rotation(Vector3::y_axis(), 90.0) * axis_rotation(Vector3::x_axis(), 90.0);
        assert_close(&xyz, &expected);
        assert!(op_matrix("rotateXQ", &Value::Tuple(vec![Value::Int(0); 3])).is_none());
    }

    #[test]
    fn instance_matrix_is_trs() {
        let half_turn_z = [0.0, 0.0, 0.0, 1.0];
        let m = instance_matrix([1.0, 0.0, 0.0], Some(half_turn_z), Some([2.0, 2.0, 2.0]));
        let p = m.transform_point(&Point3::new(1.0, 0.0, 0.0));
        assert!((p - Point3::new(-1.0, 0.0, 0.0)).norm() < 1e-9);
    }
}
