//! Per-view packaging of detector output.

use log::debug;
use ndarray::{s, Array1, Array2, Array3};
use panofeat_camera::CameraInfo;
use panofeat_detect::DetectionGroup;

use crate::{calculate_angles, FeatureError, Result};

/// A mask pixel belongs to the object iff its raw value is above this.
pub const MASK_THRESHOLD: f32 = 0.5;

/// What the policy sees for one panorama view.
///
/// Every per-object array has `num_objects` rows, in detector order.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectFeatureRecord {
    /// `K×D` region embeddings.
    pub box_features: Array2<f32>,
    /// `K×2` `(horizontal, vertical)` angles of each box center, degrees.
    pub roi_angles: Array2<f32>,
    /// `K×4` pixel boxes `[x1, y1, x2, y2]`.
    pub boxes: Array2<f32>,
    /// `K×H×W` binarized masks.
    pub masks: Array3<bool>,
    pub class_probs: Array1<f32>,
    pub class_labels: Array1<i64>,
    pub camera_info: CameraInfo,
    pub num_objects: usize,
}

impl ObjectFeatureRecord {
    /// `K×2` box-center bearings relative to the panorama: heading-wrapped
    /// yaw in `[0, 360)` and pitch offset by the camera horizon.
    pub fn panorama_angles(&self) -> Array2<f32> {
        let mut out = Array2::<f32>::zeros((self.num_objects, 2));
        for (mut row, angles) in out.rows_mut().into_iter().zip(self.roi_angles.rows()) {
            let (h, v) = self.camera_info.to_panorama_angles(angles[0], angles[1]);
            row[0] = h;
            row[1] = v;
        }
        out
    }
}

fn validate(view: usize, group: &DetectionGroup) -> Result<usize> {
    let expected = group.num_detections();
    if group.boxes.ncols() != 4 {
        return Err(FeatureError::BoxColumns { view, actual: group.boxes.ncols() });
    }
    for (field, actual) in group.leading_lengths() {
        if actual != expected {
            return Err(FeatureError::DetectionShape { view, field, expected, actual });
        }
    }
    Ok(expected)
}

/// Build the record for one view, keeping at most `cap` objects.
///
/// Truncation keeps the first `cap` detections in the order the detector
/// emitted them. No re-ranking by score happens here, so the kept set is
/// only the top-scoring one if the detector already sorts by confidence.
pub fn assemble_view(
    camera_info: &CameraInfo,
    group: &DetectionGroup,
    cap: usize,
) -> Result<ObjectFeatureRecord> {
    let view = camera_info.view_index;
    let detected = validate(view, group)?;
    let kept = detected.min(cap);

    let boxes = group.boxes.slice(s![..kept, ..]).to_owned();

    let mut roi_angles = Array2::<f32>::zeros((kept, 2));
    if kept > 0 {
        // floor division keeps centers on the pixel grid
        let cx = (&boxes.column(0) + &boxes.column(2)).mapv(|v| (v / 2.0).floor());
        let cy = (&boxes.column(1) + &boxes.column(3)).mapv(|v| (v / 2.0).floor());
        let (h_angles, v_angles) = calculate_angles(
            cx.view(),
            cy.view(),
            camera_info.h_view_angle,
            camera_info.v_view_angle,
            camera_info.width,
            camera_info.height,
        )?;
        roi_angles.column_mut(0).assign(&h_angles);
        roi_angles.column_mut(1).assign(&v_angles);
    }

    debug!("view {}: kept {}/{} objects (cap {})", view, kept, detected, cap);

    Ok(ObjectFeatureRecord {
        box_features: group.features.slice(s![..kept, ..]).to_owned(),
        roi_angles,
        boxes,
        masks: group
            .masks
            .slice(s![..kept, .., ..])
            .mapv(|v| v > MASK_THRESHOLD),
        class_probs: group.scores.slice(s![..kept]).to_owned(),
        class_labels: group.labels.slice(s![..kept]).to_owned(),
        camera_info: *camera_info,
        num_objects: kept,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn info() -> CameraInfo {
        CameraInfo {
            view_index: 0,
            h_view_angle: 90.0,
            v_view_angle: 90.0,
            width: 300,
            height: 300,
            heading: 0.0,
            horizon: 0.0,
        }
    }

    fn group(boxes: Array2<f32>) -> DetectionGroup {
        let n = boxes.nrows();
        DetectionGroup {
            boxes,
            scores: Array1::from_iter((0..n).map(|i| 1.0 - i as f32 * 0.1)),
            labels: Array1::from_iter(0..n as i64),
            masks: Array3::from_elem((n, 2, 2), 0.6),
            features: Array2::from_shape_fn((n, 3), |(i, j)| (i * 10 + j) as f32),
        }
    }

    #[test]
    fn centers_use_floor_division() {
        let g = group(array![[1.0, 1.0, 2.0, 2.0]]);
        let mut i = info();
        // 4 px wide with 4° fov → 1° per pixel, center at 2
        i.width = 4;
        i.height = 4;
        i.h_view_angle = 4.0;
        i.v_view_angle = 4.0;
        let rec = assemble_view(&i, &g, 10).unwrap();
        // center (1, 1) → one pixel left/up of center; (1.5, 1.5) would give -0.5
        assert_eq!(rec.roi_angles.row(0).to_vec(), vec![-1.0, -1.0]);
    }

    #[test]
    fn mask_threshold_is_strict() {
        let mut g = group(array![[0.0, 0.0, 10.0, 10.0]]);
        g.masks = Array3::from_shape_vec((1, 2, 2), vec![0.5, 0.500_001, 0.0, 1.0]).unwrap();
        let rec = assemble_view(&info(), &g, 1).unwrap();
        assert_eq!(
            rec.masks.iter().copied().collect::<Vec<_>>(),
            vec![false, true, false, true]
        );
    }

    #[test]
    fn zero_cap_keeps_nothing() {
        let g = group(array![[0.0, 0.0, 10.0, 10.0], [5.0, 5.0, 20.0, 20.0]]);
        let rec = assemble_view(&info(), &g, 0).unwrap();
        assert_eq!(rec.num_objects, 0);
        assert_eq!(rec.roi_angles.shape(), &[0, 2]);
        assert_eq!(rec.masks.shape(), &[0, 2, 2]);
    }

    #[test]
    fn panorama_angles_follow_view_heading() {
        let g = group(array![[0.0, 0.0, 10.0, 10.0], [290.0, 140.0, 300.0, 160.0]]);
        let mut i = info();
        i.heading = 330.0;
        i.horizon = 30.0;
        let rec = assemble_view(&i, &g, 10).unwrap();
        let pano = rec.panorama_angles();
        assert_eq!(pano.shape(), &[2, 2]);
        assert_eq!(pano[(0, 0)], 330.0 + rec.roi_angles[(0, 0)]);
        // right edge of a view facing 330 wraps past 0
        assert_eq!(pano[(1, 0)], (330.0 + rec.roi_angles[(1, 0)]).rem_euclid(360.0));
        assert!(pano[(1, 0)] > 0.0 && pano[(1, 0)] < 45.0);
        assert_eq!(pano[(1, 1)], 30.0);
    }

    #[test]
    fn bad_box_width_is_rejected() {
        let mut g = group(array![[0.0, 0.0, 10.0, 10.0]]);
        g.boxes = array![[0.0, 0.0, 10.0]];
        assert!(matches!(
            assemble_view(&info(), &g, 3),
            Err(FeatureError::BoxColumns { actual: 3, .. })
        ));
    }
}
