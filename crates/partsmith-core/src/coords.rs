use std::fmt;
use std::ops::Mul;

use nalgebra::{Matrix3, Matrix4, Point3, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{AssemblyError, Result};

/// Relative tolerance used by frame equality and construction checks.
pub const DEFAULT_TOLERANCE: f64 = 1e-9;

/// An orthonormal, right-handed coordinate frame.
///
/// A frame maps coordinates expressed in its own (local) space into the
/// space of its parent. `x_dir` and `normal` are stored, `y_dir` is always
/// derived as `normal × x_dir`, so the frame can never be left-handed.
///
/// Equality is tolerance based (see [`DEFAULT_TOLERANCE`]), not bitwise.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(try_from = "FrameRepr", into = "FrameRepr")]
pub struct CoordSystem {
    origin: Point3<f64>,
    x_dir: Vector3<f64>,
    normal: Vector3<f64>,
}

impl Default for CoordSystem {
    fn default() -> Self {
        Self::identity()
    }
}

impl CoordSystem {
    /// Build a frame from an origin and two directions.
    ///
    /// `normal` is normalised first; the part of `x_dir` along `normal` is
    /// then removed (twice, for near-parallel input) and the remainder
    /// normalised. The result is orthogonal to within [`DEFAULT_TOLERANCE`].
    /// Fails if either direction is zero or non-finite, or if the two are
    /// parallel to within that tolerance.
    pub fn new(origin: Point3<f64>, x_dir: Vector3<f64>, normal: Vector3<f64>) -> Result<Self> {
        if !origin.coords.iter().all(|v| v.is_finite()) {
            return Err(AssemblyError::InvalidFrame(format!(
                "origin {:?} is not finite",
                origin.coords.as_slice()
            )));
        }

        let normal = unit(normal, "normal")?;
        let x_len = checked_norm(&x_dir, "x_dir")?;
        let x_perp = x_dir - normal * x_dir.dot(&normal);
        let perp_len = x_perp.norm();
        if perp_len <= DEFAULT_TOLERANCE * x_len {
            return Err(AssemblyError::InvalidFrame(format!(
                "x_dir {:?} is parallel to normal {:?}",
                x_dir.as_slice(),
                normal.as_slice()
            )));
        }

        // a nearly parallel x_dir leaves cancellation error along normal;
        // a second projection of the unit vector removes it
        let x_once = x_perp / perp_len;
        let x_dir = unit(x_once - normal * x_once.dot(&normal), "x_dir")?;
        if x_dir.dot(&normal).abs() > DEFAULT_TOLERANCE {
            return Err(AssemblyError::InvalidFrame(format!(
                "x_dir {:?} cannot be made orthogonal to normal {:?}",
                x_dir.as_slice(),
                normal.as_slice()
            )));
        }

        Ok(Self { origin, x_dir, normal })
    }

    /// Array-based constructor, handy for literals.
    pub fn from_arrays(origin: [f64; 3], x_dir: [f64; 3], normal: [f64; 3]) -> Result<Self> {
        Self::new(
            Point3::from(origin),
            Vector3::from(x_dir),
            Vector3::from(normal),
        )
    }

    /// The canonical frame: origin at zero, x along +X, normal along +Z.
    pub fn identity() -> Self {
        Self {
            origin: Point3::origin(),
            x_dir: Vector3::x(),
            normal: Vector3::z(),
        }
    }

    /// A pure translation of the canonical frame.
    pub fn translation(x: f64, y: f64, z: f64) -> Self {
        Self {
            origin: Point3::new(x, y, z),
            ..Self::identity()
        }
    }

    /// Build a frame from a homogeneous local→world matrix.
    ///
    /// Column 0 gives `x_dir`, column 2 gives `normal`, column 3 the origin.
    /// Any scale or shear in the matrix is discarded by re-orthonormalising.
    pub fn from_matrix(m: &Matrix4<f64>) -> Result<Self> {
        Self::new(
            Point3::new(m[(0, 3)], m[(1, 3)], m[(2, 3)]),
            Vector3::new(m[(0, 0)], m[(1, 0)], m[(2, 0)]),
            Vector3::new(m[(0, 2)], m[(1, 2)], m[(2, 2)]),
        )
    }

    pub fn origin(&self) -> Point3<f64> {
        self.origin
    }

    pub fn x_dir(&self) -> Vector3<f64> {
        self.x_dir
    }

    pub fn y_dir(&self) -> Vector3<f64> {
        self.normal.cross(&self.x_dir)
    }

    /// The frame's "up" axis (local Z).
    pub fn normal(&self) -> Vector3<f64> {
        self.normal
    }

    /// Rotation part as a matrix whose columns are the x, y and normal axes.
    pub fn rotation(&self) -> Matrix3<f64> {
        Matrix3::from_columns(&[self.x_dir, self.y_dir(), self.normal])
    }

    /// Express `other` in this frame's space, then map it into this frame's
    /// parent space. Associative, not commutative.
    pub fn compose(&self, other: &CoordSystem) -> CoordSystem {
        let rot = self.rotation();
        CoordSystem {
            origin: self.origin + rot * other.origin.coords,
            x_dir: rot * other.x_dir,
            normal: rot * other.normal,
        }
    }

    /// The frame `B` such that `self.compose(&B)` is the identity.
    pub fn invert(&self) -> CoordSystem {
        let rot_t = self.rotation().transpose();
        CoordSystem {
            origin: Point3::from(-(rot_t * self.origin.coords)),
            x_dir: rot_t.column(0).into_owned(),
            normal: rot_t.column(2).into_owned(),
        }
    }

    /// Map a point from local to parent space (rotation + translation).
    pub fn transform_point(&self, p: &Point3<f64>) -> Point3<f64> {
        self.origin + self.rotation() * p.coords
    }

    /// Map a direction from local to parent space (rotation only).
    pub fn transform_vector(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.rotation() * v
    }

    /// Homogeneous local→world matrix.
    pub fn local_to_world(&self) -> Matrix4<f64> {
        let mut m = self.rotation().to_homogeneous();
        m[(0, 3)] = self.origin.x;
        m[(1, 3)] = self.origin.y;
        m[(2, 3)] = self.origin.z;
        m
    }

    /// Homogeneous world→local matrix.
    pub fn world_to_local(&self) -> Matrix4<f64> {
        self.invert().local_to_world()
    }

    /// Component-wise comparison of origin and both stored axes, each within
    /// `tolerance` relative to the larger magnitude (never tighter than
    /// absolute `tolerance`).
    pub fn approx_eq(&self, other: &CoordSystem, tolerance: f64) -> bool {
        let close = |a: f64, b: f64| (a - b).abs() <= tolerance * a.abs().max(b.abs()).max(1.0);
        let pairs = self
            .origin
            .coords
            .iter()
            .zip(other.origin.coords.iter())
            .chain(self.x_dir.iter().zip(other.x_dir.iter()))
            .chain(self.normal.iter().zip(other.normal.iter()));
        pairs.into_iter().all(|(a, b)| close(*a, *b))
    }

    pub fn is_identity(&self) -> bool {
        self.approx_eq(&Self::identity(), DEFAULT_TOLERANCE)
    }
}

fn checked_norm(v: &Vector3<f64>, what: &str) -> Result<f64> {
    let len = v.norm();
    if !len.is_finite() || len <= f64::EPSILON {
        return Err(AssemblyError::InvalidFrame(format!(
            "{} {:?} has no usable direction",
            what,
            v.as_slice()
        )));
    }
    Ok(len)
}

fn unit(v: Vector3<f64>, what: &str) -> Result<Vector3<f64>> {
    let len = checked_norm(&v, what)?;
    Ok(v / len)
}

impl PartialEq for CoordSystem {
    fn eq(&self, other: &Self) -> bool {
        self.approx_eq(other, DEFAULT_TOLERANCE)
    }
}

impl Mul for CoordSystem {
    type Output = CoordSystem;

    fn mul(self, rhs: CoordSystem) -> CoordSystem {
        self.compose(&rhs)
    }
}

impl Mul<Point3<f64>> for CoordSystem {
    type Output = Point3<f64>;

    fn mul(self, rhs: Point3<f64>) -> Point3<f64> {
        self.transform_point(&rhs)
    }
}

impl fmt::Display for CoordSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CoordSystem(origin=({}, {}, {}), x_dir=({}, {}, {}), normal=({}, {}, {}))",
            self.origin.x,
            self.origin.y,
            self.origin.z,
            self.x_dir.x,
            self.x_dir.y,
            self.x_dir.z,
            self.normal.x,
            self.normal.y,
            self.normal.z,
        )
    }
}

// ── Serde representation ──────────────────────────────────────────────

/// Wire shape of a frame; deserialising goes through [`CoordSystem::new`]
/// so a stored frame can never break the orthonormal invariant.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FrameRepr {
    origin: [f64; 3],
    x_dir: [f64; 3],
    normal: [f64; 3],
}

impl TryFrom<FrameRepr> for CoordSystem {
    type Error = AssemblyError;

    fn try_from(repr: FrameRepr) -> Result<Self> {
        CoordSystem::from_arrays(repr.origin, repr.x_dir, repr.normal)
    }
}

impl From<CoordSystem> for FrameRepr {
    fn from(cs: CoordSystem) -> Self {
        Self {
            origin: cs.origin.coords.into(),
            x_dir: cs.x_dir.into(),
            normal: cs.normal.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn frame(origin: [f64; 3], x_dir: [f64; 3], normal: [f64; 3]) -> CoordSystem {
        CoordSystem::from_arrays(origin, x_dir, normal).unwrap()
    }

    fn samples() -> Vec<CoordSystem> {
        vec![
            CoordSystem::identity(),
            CoordSystem::translation(1.0, -2.0, 3.5),
            frame([0.319872, -0.424248, -0.813118], [0.301597, 0.844131, -0.443263], [0.518197, -0.535377, -0.666966]),
            frame([-0.965988, 0.438111, 0.447495], [-0.903357, 0.322463, -0.282777], [0.0176109, -0.630881, -0.77568]),
            frame([0.997758, -0.429350, 0.469693], [-0.949669, 0.304061, -0.0753356], [-0.265922, -0.655403, 0.706917]),
            frame([120.0, 45.0, -8.0], [0.0, 1.0, 0.0], [1.0, 0.0, 0.0]),
        ]
    }

    #[test]
    fn test_construction_normalizes() {
        let cs = frame([0.0, 0.0, 0.0], [2.0, 0.0, 0.5], [0.0, 0.0, 4.0]);
        assert_relative_eq!(cs.x_dir(), Vector3::x(), epsilon = 1e-12);
        assert_relative_eq!(cs.normal(), Vector3::z(), epsilon = 1e-12);
        assert_relative_eq!(cs.y_dir(), Vector3::y(), epsilon = 1e-12);
        assert_relative_eq!(cs.x_dir().dot(&cs.normal()), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_parallel_directions_rejected() {
        let err = CoordSystem::from_arrays([0.0; 3], [1.0, 0.0, 0.0], [2.0, 0.0, 0.0]).unwrap_err();
        assert!(matches!(err, AssemblyError::InvalidFrame(_)));

        let err = CoordSystem::from_arrays([0.0; 3], [0.0, 0.0, -1.0], [0.0, 0.0, 1.0]).unwrap_err();
        assert!(matches!(err, AssemblyError::InvalidFrame(_)));
    }

    #[test]
    fn test_near_parallel_x_dir_is_orthogonal() {
        let n = Vector3::new(0.3, -0.7, 0.648).normalize();
        let perp = n.cross(&Vector3::x()).normalize();
        for k in [2e-9, 5e-9, 1e-7, 1e-3] {
            let cs = CoordSystem::new(Point3::origin(), n + perp * k, n).unwrap();
            assert!(cs.x_dir().dot(&cs.normal()).abs() <= 1e-9, "k = {}", k);
            assert_relative_eq!(cs.x_dir().norm(), 1.0, epsilon = 1e-12);
            assert_relative_eq!(cs.x_dir(), perp, epsilon = 1e-6);
        }
        assert!(CoordSystem::new(Point3::origin(), n + perp * 1e-12, n).is_err());
    }

    #[test]
    fn test_zero_and_nan_rejected() {
        assert!(CoordSystem::from_arrays([0.0; 3], [0.0; 3], [0.0, 0.0, 1.0]).is_err());
        assert!(CoordSystem::from_arrays([0.0; 3], [1.0, 0.0, 0.0], [0.0; 3]).is_err());
        assert!(CoordSystem::from_arrays([f64::NAN, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]).is_err());
    }

    #[test]
    fn test_compose_known_values() {
        let a = frame([0.319872, -0.424248, -0.813118], [0.301597, 0.844131, -0.443263], [0.518197, -0.535377, -0.666966]);
        let b = frame([-0.965988, 0.438111, 0.447495], [-0.903357, 0.322463, -0.282777], [0.0176109, -0.630881, -0.77568]);
        let expected = frame(
            [0.6110520112439473, -1.4667419254474168, -0.42101284070314754],
            [-0.16091098866905712, -0.6019554630954405, 0.7821491380645386],
            [-0.901549677957146, 0.41213999099584614, 0.13171486627298448],
        );
        assert_eq!(a.compose(&b), expected);
        assert_eq!(a * b, expected);
    }

    #[test]
    fn test_compose_associative() {
        let frames = samples();
        for a in &frames {
            for b in &frames {
                for c in &frames {
                    let left = a.compose(b).compose(c);
                    let right = a.compose(&b.compose(c));
                    assert!(left.approx_eq(&right, 1e-9), "{} vs {}", left, right);
                }
            }
        }
    }

    #[test]
    fn test_identity_law() {
        let id = CoordSystem::identity();
        for a in samples() {
            assert_eq!(a.compose(&id), a);
            assert_eq!(id.compose(&a), a);
        }
    }

    #[test]
    fn test_invert() {
        for a in samples() {
            assert!(a.compose(&a.invert()).is_identity());
            assert!(a.invert().compose(&a).is_identity());
        }
    }

    #[test]
    fn test_translation_only_compose() {
        let a = CoordSystem::translation(1.0, 2.0, 3.0);
        let b = CoordSystem::translation(1.0, 1.0, 1.0);
        assert_eq!(a.compose(&b), CoordSystem::translation(2.0, 3.0, 4.0));
        assert_eq!(a.invert(), CoordSystem::translation(-1.0, -2.0, -3.0));
    }

    #[test]
    fn test_transform_point_and_vector() {
        // quarter turn about Z, shifted by (10, 0, 0)
        let cs = frame([10.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]);
        let p = cs.transform_point(&Point3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(p, Point3::new(10.0, 1.0, 0.0), epsilon = 1e-12);

        let v = cs.transform_vector(&Vector3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(v, Vector3::new(0.0, 1.0, 0.0), epsilon = 1e-12);

        assert_relative_eq!(cs * Point3::new(0.0, 2.0, 5.0), Point3::new(8.0, 0.0, 5.0), epsilon = 1e-12);
    }

    #[test]
    fn test_world_to_local_matrix() {
        let cs = frame([-0.029, -0.222, 0.432], [0.556, -0.719, 0.417], [0.779, 0.275, -0.564]);
        let m = cs.world_to_local();
        let expected = [
            [0.55584, -0.719063, 0.417122, -0.323709],
            [-0.290761, -0.638252, -0.712806, 0.157808],
            [0.778781, 0.274923, -0.563842, 0.327197],
            [0.0, 0.0, 0.0, 1.0],
        ];
        for (r, row) in expected.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                assert_relative_eq!(m[(r, c)], *value, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_local_to_world_matrix() {
        let cs = frame([-0.03, 0.256, -0.246], [-0.018, -0.857, 0.514], [-0.868, 0.268, 0.417]);
        let m = cs.local_to_world();
        let expected = [
            [-0.0177607, 0.49559, -0.868375, -0.03],
            [-0.857519, 0.439062, 0.268116, 0.256],
            [0.514146, 0.74941, 0.41718, -0.246],
            [0.0, 0.0, 0.0, 1.0],
        ];
        for (r, row) in expected.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                assert_relative_eq!(m[(r, c)], *value, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_from_matrix_roundtrip() {
        for a in samples() {
            assert_eq!(CoordSystem::from_matrix(&a.local_to_world()).unwrap(), a);
        }
        assert_eq!(CoordSystem::from_matrix(&Matrix4::identity()).unwrap(), CoordSystem::identity());
    }

    #[test]
    fn test_serde_validates() {
        let cs = CoordSystem::translation(1.0, 2.0, 3.0);
        let json = serde_json::to_string(&cs).unwrap();
        let back: CoordSystem = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cs);

        let bad = r#"{"origin":[0,0,0],"x_dir":[0,0,1],"normal":[0,0,1]}"#;
        assert!(serde_json::from_str::<CoordSystem>(bad).is_err());
    }
}
