use super::*;
use crate::error::FormatError;
use crate::shape::{Dof, TransformKind};
use nalgebra::{point, vector, Matrix3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn cloud(rng: &mut StdRng, center: Point3<f64>, n: usize) -> Vec<Feature> {
    (0..n)
        .map(|_| {
            Feature::new(center + vector![
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0)
            ])
        })
        .collect()
}

/// Root → child → grandchild, each with a few features.
fn three_level(rng: &mut StdRng) -> (Reconstruction, [ShapeId; 3]) {
    let mut rec = Reconstruction::new();
    let (r, _) = rec
        .add_shape_with_features(Shape::new().with_name("root"), cloud(rng, point![0.0, 0.0, 0.0], 4))
        .unwrap();
    let (c, _) = rec
        .add_shape_with_features(Shape::new().with_name("child"), cloud(rng, point![3.0, 0.0, 0.0], 4))
        .unwrap();
    let (g, _) = rec
        .add_shape_with_features(Shape::new().with_name("grandchild"), cloud(rng, point![5.0, 1.0, 0.0], 4))
        .unwrap();
    rec.insert_child(r, c).unwrap();
    rec.insert_child(c, g).unwrap();
    (rec, [r, c, g])
}

#[test]
fn chain_follows_primary_parents() {
    let mut rng = StdRng::seed_from_u64(1);
    let (mut rec, [r, c, g]) = three_level(&mut rng);
    assert_eq!(rec.transform_chain(g).unwrap(), vec![c, r]);
    assert!(rec.transform_chain(r).unwrap().is_empty());
    // A second parent does not change the chain.
    let extra = rec.add_shape(Shape::new());
    rec.insert_child(extra, g).unwrap();
    assert_eq!(rec.transform_chain(g).unwrap(), vec![c, r]);
}

#[test]
fn cyclic_chain_is_reported() {
    let mut rec = Reconstruction::new();
    let a = rec.add_shape(Shape::new());
    let b = rec.add_shape(Shape::new());
    rec.insert_child(a, b).unwrap();
    rec.insert_child(b, a).unwrap();
    assert_eq!(rec.transform_chain(a), Err(VariableError::CyclicChain(a)));
    let n = rec.update_variable_index();
    let x = rec.initial_variable_values(n).unwrap();
    assert!(matches!(
        rec.update_variable_values(&x),
        Err(VariableError::CyclicChain(_))
    ));
}

#[test]
fn parent_motion_carries_locked_child() {
    let mut rng = StdRng::seed_from_u64(2);
    let (mut rec, [r, c, g]) = three_level(&mut rng);
    rec.shape_mut(c).unwrap().set_inertia(None);
    rec.shape_mut(g).unwrap().set_inertia(None);
    let n = rec.update_variable_index();
    assert_eq!(n, 9);
    let mut x = rec.initial_variable_values(n).unwrap();
    x[rec.shape(r).unwrap().variable_index(Dof::Tx).unwrap()] = 1.5;
    rec.update_variable_values(&x).unwrap();
    for id in [r, c, g] {
        let t = rec.shape(id).unwrap().transformation(TransformKind::Current);
        assert!((t.t - vector![1.5, 0.0, 0.0]).norm() < 1e-12);
        assert!((t.m - Matrix3::identity()).amax() < 1e-12);
    }
}

#[test]
fn hierarchical_symbolic_matches_concrete() {
    let mut rng = StdRng::seed_from_u64(3);
    for _ in 0..10 {
        let (mut rec, [_, c, g]) = three_level(&mut rng);
        rec.shape_mut(g).unwrap().set_inertia(None);
        rec.shape_mut(c)
            .unwrap()
            .set_transformation(Affine3::new(
                Affine3::rotation_xyz(vector![0.2, -0.1, 0.4]),
                vector![0.0, 1.0, 0.0],
            ));
        let n = rec.update_variable_index();
        assert_eq!(n, 18);
        let x: Vec<f64> = (0..n)
            .map(|i| match i % 9 {
                0..=2 => rng.gen_range(-1.0..1.0),
                3..=5 => rng.gen_range(-0.6..0.6),
                _ => rng.gen_range(0.7..1.3),
            })
            .collect();

        let samples: Vec<FeatureId> = rec.shape(g).unwrap().features().to_vec();
        let exprs: Vec<_> = samples
            .iter()
            .map(|f| rec.compute_feature_coordinates(*f).unwrap())
            .collect();
        rec.update_variable_values(&x).unwrap();
        for (f, e) in samples.iter().zip(&exprs) {
            let p = rec.feature(*f).unwrap().position;
            let world = rec.shape(g).unwrap().transform_point(&p);
            for k in 0..3 {
                assert!(
                    (e[k].eval(&x) - world[k]).abs() < 1e-9,
                    "coordinate {k}: {} vs {}",
                    e[k].eval(&x),
                    world[k]
                );
            }
            let compiled = e[0].compile();
            let mut stack = Vec::new();
            let via_vm = crate::expr::VM::execute(&compiled, &x, &mut stack);
            assert!((via_vm - world[0]).abs() < 1e-9);
        }
    }
}

#[test]
fn update_does_not_depend_on_shape_order() {
    let build = |child_first: bool| {
        let mut rec = Reconstruction::new();
        let feats = |c: Point3<f64>| [Feature::new(c), Feature::new(c + vector![1.0, 0.0, 0.0])];
        let (p, c) = if child_first {
            let (c, _) = rec.add_shape_with_features(Shape::new(), feats(point![4.0, 0.0, 0.0])).unwrap();
            let (p, _) = rec.add_shape_with_features(Shape::new(), feats(point![0.0, 0.0, 0.0])).unwrap();
            (p, c)
        } else {
            let (p, _) = rec.add_shape_with_features(Shape::new(), feats(point![0.0, 0.0, 0.0])).unwrap();
            let (c, _) = rec.add_shape_with_features(Shape::new(), feats(point![4.0, 0.0, 0.0])).unwrap();
            (p, c)
        };
        rec.insert_child(p, c).unwrap();
        let n = rec.update_variable_index();
        let mut x = rec.initial_variable_values(n).unwrap();
        let ps = rec.shape(p).unwrap();
        x[ps.variable_index(Dof::Rz).unwrap()] = 0.3;
        x[ps.variable_index(Dof::Ty).unwrap()] = 0.5;
        let cs = rec.shape(c).unwrap();
        x[cs.variable_index(Dof::Sx).unwrap()] = 1.2;
        rec.update_variable_values(&x).unwrap();
        rec.shape(c)
            .unwrap()
            .transform_point(&point![4.0, 0.0, 0.0])
    };
    assert!((build(true) - build(false)).norm() < 1e-12);
}

#[test]
fn sequences_assign_positions_once() {
    let mut rec = Reconstruction::new();
    let seq = rec.add_sequence(Some("walk"));
    let a = rec.add_shape(Shape::new());
    let b = rec.add_shape(Shape::new());
    rec.add_shape_to_sequence(seq, a).unwrap();
    rec.add_shape_to_sequence(seq, b).unwrap();
    assert_eq!(rec.sequence(seq).unwrap().shapes(), &[a, b]);
    assert_eq!(rec.shape(b).unwrap().sequence(), Some(seq));
    assert_eq!(rec.shape(b).unwrap().sequence_index(), Some(1));
    assert_eq!(
        rec.add_shape_to_sequence(seq, a),
        Err(ShapeError::AlreadyInSequence(a))
    );
    assert_eq!(
        rec.add_shape_to_sequence(SequenceId(7), a),
        Err(ShapeError::UnknownSequence(SequenceId(7)))
    );
}

#[test]
fn unknown_ids_are_errors() {
    let mut rec = Reconstruction::new();
    let a = rec.add_shape(Shape::new());
    assert_eq!(rec.insert_child(a, ShapeId(9)), Err(ShapeError::UnknownShape(ShapeId(9))));
    assert_eq!(
        rec.insert_feature(a, FeatureId(0)),
        Err(ShapeError::UnknownFeature(FeatureId(0)))
    );
    assert_eq!(
        rec.add_match(Match::new(FeatureId(0), FeatureId(1))),
        Err(ShapeError::UnknownFeature(FeatureId(0)))
    );
    let loose = rec.add_feature(Feature::new(point![0.0, 0.0, 0.0]));
    assert_eq!(
        rec.compute_feature_coordinates(loose),
        Err(VariableError::Shape(ShapeError::UnownedFeature(loose)))
    );
}

#[test]
fn validate_detects_one_sided_links() {
    let mut rng = StdRng::seed_from_u64(4);
    let (mut rec, [r, _, g]) = three_level(&mut rng);
    rec.validate().unwrap();
    rec.shapes[r.0].children.push(g);
    assert!(matches!(rec.validate(), Err(ShapeError::AsymmetricLink(_))));
}

#[test]
fn detach_shape_unlinks_every_side() {
    let mut rec = sample_graph();
    let (r, c, g) = (ShapeId(0), ShapeId(1), ShapeId(2));
    let owned = rec.shape(c).unwrap().features().to_vec();
    assert!(rec.shape(c).unwrap().n_matches() > 0);

    rec.detach_shape(c).unwrap();
    rec.validate().unwrap();

    let s = rec.shape(c).unwrap();
    assert!(s.parents().is_empty() && s.children().is_empty());
    assert_eq!(s.n_features(), 0);
    assert_eq!(s.n_matches(), 0);
    assert_eq!((s.sequence(), s.sequence_index()), (None, None));
    assert!(rec.shape(r).unwrap().children().is_empty());
    assert!(rec.shape(g).unwrap().parents().is_empty());
    assert!(owned.iter().all(|f| rec.feature(*f).unwrap().shape().is_none()));
    // The other endpoint keeps its match.
    assert_eq!(rec.shape(r).unwrap().n_matches(), 1);

    let seq = rec.shape(g).unwrap().sequence().unwrap();
    assert_eq!(rec.sequence(seq).unwrap().shapes(), &[g]);
    assert_eq!(rec.shape(g).unwrap().sequence_index(), Some(0));
    assert_eq!(rec.transform_chain(g).unwrap(), Vec::<ShapeId>::new());

    // Freed features can move to another shape.
    rec.insert_feature(r, owned[0]).unwrap();
    rec.validate().unwrap();
}

fn sample_graph() -> Reconstruction {
    let mut rng = StdRng::seed_from_u64(8);
    let (mut rec, [r, c, g]) = three_level(&mut rng);
    let fr = rec.shape(r).unwrap().features().to_vec();
    let fc = rec.shape(c).unwrap().features().to_vec();
    {
        let f = rec.feature_mut(fr[0]).unwrap();
        f.normal = vector![0.0, 0.0, 1.0];
        f.descriptor = vec![0.1, 1.0 / 3.0, -2.5];
        f.boundary = true;
        f.distinction = 0.7;
        f.salience = 0.2;
        f.radius = 0.05;
    }
    rec.shape_mut(r).unwrap().update_feature_properties();
    let m = rec.add_match(Match::new(fr[0], fc[1]).with_affinity(0.75)).unwrap();
    rec.insert_match(r, m, 0).unwrap();
    rec.insert_match(c, m, 0).unwrap();
    rec.add_feature(Feature::new(point![9.0, 9.0, 9.0]));
    let seq = rec.add_sequence(Some("take 1"));
    rec.add_sequence(None);
    rec.add_shape_to_sequence(seq, c).unwrap();
    rec.add_shape_to_sequence(seq, g).unwrap();
    let shape = rec.shape_mut(g).unwrap();
    shape.set_inertia(Some(&[f64::INFINITY, 2.0]));
    shape.perturb_transformation(0.3, 0.1, &mut rng);
    rec.origin(c).unwrap();
    rec
}

#[test]
fn graph_ascii_roundtrip_is_byte_stable() {
    let rec = sample_graph();
    let mut first = Vec::new();
    rec.write_ascii(&mut first).unwrap();
    let back = Reconstruction::read_ascii(first.as_slice()).unwrap();
    assert_eq!(back.features(), rec.features());
    assert_eq!(back.matches(), rec.matches());
    assert_eq!(back.sequences(), rec.sequences());
    let mut second = Vec::new();
    back.write_ascii(&mut second).unwrap();
    assert_eq!(first, second);
}

#[test]
fn graph_binary_and_ascii_carry_same_content() {
    let rec = sample_graph();
    let mut bin = Vec::new();
    rec.write_binary(&mut bin).unwrap();
    let from_bin = Reconstruction::read_binary(&mut bin.as_slice()).unwrap();

    let mut ascii = Vec::new();
    from_bin.write_ascii(&mut ascii).unwrap();
    let from_ascii = Reconstruction::read_ascii(ascii.as_slice()).unwrap();
    let mut bin2 = Vec::new();
    from_ascii.write_binary(&mut bin2).unwrap();
    assert_eq!(bin, bin2);
}

#[test]
fn loaded_graph_answers_queries() {
    let rec = sample_graph();
    let mut bin = Vec::new();
    rec.write_binary(&mut bin).unwrap();
    let mut back = Reconstruction::read_binary(&mut bin.as_slice()).unwrap();
    let mut orig = sample_graph();
    let q = point![3.0, 0.2, 0.1];
    for s in 0..3 {
        assert_eq!(
            back.find_closest_feature(ShapeId(s), &q, None, None).unwrap(),
            orig.find_closest_feature(ShapeId(s), &q, None, None).unwrap()
        );
    }
}

#[test]
fn load_rejects_inconsistent_links() {
    let mut rec = sample_graph();
    rec.features[0].shape = None;
    let mut out = Vec::new();
    rec.write_ascii(&mut out).unwrap();
    assert!(matches!(
        Reconstruction::read_ascii(out.as_slice()),
        Err(FormatError::Link(_))
    ));
}

#[test]
fn save_and_load_detect_encoding() {
    let dir = tempfile::tempdir().unwrap();
    let rec = sample_graph();
    for (name, enc) in [("g.txt", Encoding::Ascii), ("g.bin", Encoding::Binary)] {
        let path = dir.path().join(name);
        rec.save(&path, enc).unwrap();
        let (back, detected) = Reconstruction::load(&path).unwrap();
        assert_eq!(detected, enc);
        assert_eq!(back.shapes().len(), rec.shapes().len());
        assert_eq!(back.features(), rec.features());
    }
}
