//! JSON summary of a reconstruction for `inspect`.

use anyhow::Result;
use serde::Serialize;

use shapefit::reconstruction::Encoding;
use shapefit::{Dof, Reconstruction, ShapeId};

use crate::provenance::GraphCounts;

#[derive(Debug, Serialize)]
pub struct GraphSummary {
    pub encoding: &'static str,
    pub counts: GraphCounts,
    /// Slots a solve over this graph would use.
    pub free_variables: usize,
    pub shapes: Vec<ShapeSummary>,
}

#[derive(Debug, Serialize)]
pub struct ShapeSummary {
    pub id: usize,
    pub name: Option<String>,
    /// `(sequence, position)` when the shape belongs to one.
    pub sequence: Option<(usize, usize)>,
    pub parents: Vec<usize>,
    pub children: Vec<usize>,
    pub features: usize,
    pub matches: usize,
    pub free_dofs: Vec<String>,
    pub bbox: Option<[[f64; 3]; 2]>,
    pub centroid: [f64; 3],
    pub average_feature_radius: f64,
}

pub fn encoding_name(encoding: Encoding) -> &'static str {
    match encoding {
        Encoding::Ascii => "ascii",
        Encoding::Binary => "binary",
    }
}

pub fn summarize(rec: &mut Reconstruction, encoding: Encoding) -> Result<GraphSummary> {
    let mut shapes = Vec::with_capacity(rec.shapes().len());
    for i in 0..rec.shapes().len() {
        let id = ShapeId(i);
        let bbox = rec.bbox(id)?;
        let centroid = rec.centroid(id)?;
        let radius = rec.average_feature_radius(id)?;
        let s = rec.shape(id)?;
        shapes.push(ShapeSummary {
            id: i,
            name: s.name().map(str::to_owned),
            sequence: s.sequence().zip(s.sequence_index()).map(|(q, k)| (q.0, k)),
            parents: s.parents().iter().map(|p| p.0).collect(),
            children: s.children().iter().map(|c| c.0).collect(),
            features: s.n_features(),
            matches: s.n_matches(),
            free_dofs: Dof::ALL
                .iter()
                .filter(|d| !s.is_locked(**d))
                .map(|d| format!("{d:?}"))
                .collect(),
            bbox: (!bbox.is_empty()).then(|| {
                [
                    [bbox.min.x, bbox.min.y, bbox.min.z],
                    [bbox.max.x, bbox.max.y, bbox.max.z],
                ]
            }),
            centroid: [centroid.x, centroid.y, centroid.z],
            average_feature_radius: radius,
        });
    }
    Ok(GraphSummary {
        encoding: encoding_name(encoding),
        counts: GraphCounts::of(rec),
        free_variables: shapes.iter().map(|s| s.free_dofs.len()).sum(),
        shapes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use shapefit::prelude::*;

    #[test]
    fn summary_lists_links_and_free_dofs() {
        let mut rec = Reconstruction::new();
        let (a, _) = rec
            .add_shape_with_features(
                Shape::new().with_name("a"),
                [
                    Feature::new(Point3::new(0.0, 0.0, 0.0)).with_radius(1.0),
                    Feature::new(Point3::new(2.0, 0.0, 0.0)).with_radius(3.0),
                ],
            )
            .unwrap();
        let b = rec.add_shape(Shape::new());
        rec.insert_child(a, b).unwrap();
        rec.shape_mut(b).unwrap().set_inertia(None);

        let summary = summarize(&mut rec, Encoding::Ascii).unwrap();
        assert_eq!(summary.encoding, "ascii");
        assert_eq!(summary.free_variables, 9);
        assert_eq!(summary.shapes[0].children, vec![1]);
        assert_eq!(summary.shapes[1].parents, vec![0]);
        assert_eq!(summary.shapes[0].centroid, [1.0, 0.0, 0.0]);
        assert_eq!(summary.shapes[0].average_feature_radius, 2.0);
        assert!(summary.shapes[1].bbox.is_none());
        assert!(summary.shapes[1].free_dofs.is_empty());

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["shapes"][0]["name"], "a");
        assert_eq!(json["counts"]["features"], 2);
    }
}
