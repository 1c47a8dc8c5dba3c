use super::*;
use nalgebra::{matrix, point, vector, Matrix3};

#[test]
fn affine_inverse_roundtrip_point_and_vector() {
    let a = Affine3::new(
        matrix![0.0, -2.0, 0.0; 2.0, 0.0, 0.0; 0.0, 0.0, 2.0],
        vector![1.0, -3.0, 0.5],
    );
    let inv = a.inverse().expect("invertible");
    let p = point![0.3, 0.7, -1.1];
    let back = inv.apply_point(&a.apply_point(&p));
    assert!((back - p).norm() < 1e-12);
    let v = vector![1.0, 2.0, 3.0];
    let vb = inv.apply_vector(&a.apply_vector(&v));
    assert!((vb - v).norm() < 1e-12);
}

#[test]
fn singular_affine_has_no_inverse() {
    let a = Affine3::linear(Matrix3::zeros());
    assert!(!a.is_invertible());
    assert!(a.inverse().is_none());
}

#[test]
fn compose_applies_right_operand_first() {
    let t = Affine3::translation(vector![1.0, 0.0, 0.0]);
    let s = Affine3::linear(Matrix3::identity() * 2.0);
    let p = point![1.0, 1.0, 1.0];
    // s ∘ t: translate then scale.
    let q = s.compose(&t).apply_point(&p);
    assert!((q - point![4.0, 2.0, 2.0]).norm() < 1e-12);
    let r = (t * s).apply_point(&p);
    assert!((r - point![3.0, 2.0, 2.0]).norm() < 1e-12);
}

#[test]
fn about_keeps_pivot_fixed() {
    let pivot = point![1.0, 2.0, 3.0];
    let rot = Affine3::rotation_xyz(vector![0.3, -0.2, 1.1]);
    let a = Affine3::about(&pivot, rot * 1.5, vector![0.0, 0.0, 0.0]);
    assert!((a.apply_point(&pivot) - pivot).norm() < 1e-12);
}

#[test]
fn rotation_xyz_applies_z_first() {
    let r = Affine3::rotation_xyz(vector![std::f64::consts::FRAC_PI_2, 0.0, std::f64::consts::FRAC_PI_2]);
    // z-rotation sends x to y, then x-rotation sends y to z.
    let v = r * vector![1.0, 0.0, 0.0];
    assert!((v - vector![0.0, 0.0, 1.0]).norm() < 1e-12);
}

#[test]
fn row_major_layout_is_bit_exact() {
    let a = Affine3::new(
        Affine3::rotation_xyz(vector![0.1, 0.2, 0.3]) * 0.75,
        vector![1.0 / 3.0, -2.0 / 7.0, 1e-17],
    );
    let rows = a.to_row_major();
    assert_eq!(rows[12..], [0.0, 0.0, 0.0, 1.0]);
    assert_eq!(rows[3], a.t.x);
    let b = Affine3::from_row_major(&rows).unwrap();
    assert_eq!(a, b);
}

#[test]
fn projective_row_is_rejected() {
    let mut rows = Affine3::identity().to_row_major();
    rows[12] = 0.5;
    assert!(Affine3::from_row_major(&rows).is_none());
}

#[test]
fn bbox_empty_and_union() {
    let mut b = Aabb3::empty();
    assert!(b.is_empty());
    assert!(b.centroid().is_none());
    assert_eq!(b.extent(), vector![0.0, 0.0, 0.0]);
    b.union_point(&point![0.0, 0.0, 0.0]);
    b.union_point(&point![10.0, -2.0, 4.0]);
    assert!(!b.is_empty());
    assert_eq!(b.centroid().unwrap(), point![5.0, -1.0, 2.0]);
    assert!(b.contains(&point![1.0, -1.0, 1.0]));
    assert!(!b.contains(&point![11.0, 0.0, 0.0]));
}
