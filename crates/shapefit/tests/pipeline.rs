//! End-to-end alignment pass: correspondences, slots, one Gauss-Newton
//! step assembled from symbolic coordinates, value update, index rebuild.

use nalgebra::{Matrix3, Point3, Vector3};
use shapefit::prelude::*;

fn grid() -> Vec<Point3<f64>> {
    let mut pts = Vec::new();
    for i in 0..3 {
        for j in 0..3 {
            for k in 0..3 {
                pts.push(Point3::new(i as f64, j as f64, k as f64));
            }
        }
    }
    pts
}

#[test]
fn one_pass_recovers_translation() {
    let pts = grid();
    let mut rec = Reconstruction::new();
    let (a, fa) = rec
        .add_shape_with_features(
            Shape::new().with_name("reference"),
            pts.iter().map(|p| Feature::new(*p)),
        )
        .unwrap();
    let (b, fb) = rec
        .add_shape_with_features(
            Shape::new().with_name("moving"),
            pts.iter().map(|p| Feature::new(*p)),
        )
        .unwrap();
    let offset = Vector3::new(0.3, -0.2, 0.1);
    rec.shape_mut(b)
        .unwrap()
        .set_transformation(Affine3::translation(offset));
    rec.shape_mut(a).unwrap().set_inertia(None);
    let inf = f64::INFINITY;
    rec.shape_mut(b)
        .unwrap()
        .set_inertia(Some(&[0.0, 0.0, 0.0, inf, inf, inf, inf, inf, inf]));

    // Grid spacing 1 and |offset| < 0.4: exactly one partner within 0.5.
    let query = FeatureQuery::new().with_max_distance(0.5);
    let pairs: Vec<(FeatureId, FeatureId)> = fb
        .iter()
        .filter_map(|&f| {
            rec.find_closest_feature_matching(a, f, &query)
                .unwrap()
                .map(|g| (f, g))
        })
        .collect();
    assert_eq!(pairs.len(), pts.len());
    for (i, (f, g)) in pairs.iter().enumerate() {
        assert_eq!((*f, *g), (fb[i], fa[i]));
    }

    let n = rec.update_variable_index();
    assert_eq!(n, 3);
    let mut x = rec.initial_variable_values(n).unwrap();

    let mut jtj = Matrix3::<f64>::zeros();
    let mut jtr = Vector3::<f64>::zeros();
    for (f, g) in &pairs {
        let e = rec.compute_feature_coordinates(*f).unwrap();
        let target = rec.feature(*g).unwrap().position;
        for k in 0..3 {
            let r = e[k].eval(&x) - target[k];
            let j = Vector3::from_fn(|v, _| e[k].derivative(v).eval(&x));
            jtj += j * j.transpose();
            jtr += j * r;
        }
    }
    let step = jtj.lu().solve(&(-jtr)).unwrap();
    for (xi, s) in x.iter_mut().zip(step.iter()) {
        *xi += s;
    }
    assert!((Vector3::new(x[0], x[1], x[2]) + offset).norm() < 1e-9);

    rec.update_variable_values(&x).unwrap();
    let t = rec.shape(b).unwrap().transformation(TransformKind::Current);
    assert!(t.max_abs_diff(&Affine3::identity()) < 1e-9);

    // The rebuilt index sees the aligned positions.
    for (f, g) in &pairs {
        let p = rec.feature(*f).unwrap().position;
        let world = rec.shape(b).unwrap().transform_point(&p);
        assert_eq!(
            rec.find_closest_feature(a, &world, None, Some(1e-6)).unwrap(),
            Some(*g)
        );
    }
}

#[test]
fn lock_scenario_over_three_shapes() {
    let mut rec = Reconstruction::new();
    let ids: Vec<ShapeId> = (0..3).map(|_| rec.add_shape(Shape::new())).collect();
    for id in &ids {
        rec.shape_mut(*id).unwrap().set_inertia(None);
    }
    assert_eq!(rec.update_variable_index(), 0);
    for id in &ids {
        assert_eq!(rec.shape(*id).unwrap().n_variables(), 9);
    }
    rec.shape_mut(ids[2]).unwrap().set_inertia(Some(&[1.0; 9]));
    assert_eq!(rec.update_variable_index(), 9);
    // Same inputs, same slots.
    let before: Vec<_> = Dof::ALL
        .iter()
        .map(|d| rec.shape(ids[2]).unwrap().variable_index(*d))
        .collect();
    rec.update_variable_index();
    let after: Vec<_> = Dof::ALL
        .iter()
        .map(|d| rec.shape(ids[2]).unwrap().variable_index(*d))
        .collect();
    assert_eq!(before, after);
}
