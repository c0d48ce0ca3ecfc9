//! Capture → load → detect → assemble, once per call.

use std::sync::Arc;
use std::time::Instant;

use log::debug;
use panofeat_camera::{create_panorama, Environment, Panorama, PanoramaConfig};
use panofeat_detect::{postprocess, DetectError, RegionDetector};
use panofeat_preprocess::{Device, ImageLoader};

use crate::{assemble_view, FeatureError, ObjectFeatureRecord, PanoramicBoxes, Result};

/// Owns one worker's view of the perception pipeline.
///
/// The detector is shared (`Arc`) and treated as read-only; everything else
/// is per-extractor configuration fixed at construction.
pub struct FeatureExtractor {
    loader: ImageLoader,
    detector: Arc<dyn RegionDetector>,
    panoramic_boxes: PanoramicBoxes,
    device: Device,
    panorama: PanoramaConfig,
}

impl FeatureExtractor {
    /// Fails if the detector is not bound to `device`, or if the cap table
    /// does not cover every panorama view.
    pub fn new(
        loader: ImageLoader,
        detector: Arc<dyn RegionDetector>,
        panoramic_boxes: PanoramicBoxes,
        device: Device,
        panorama: PanoramaConfig,
    ) -> Result<Self> {
        if detector.device() != device {
            return Err(DetectError::DeviceUnavailable {
                requested: device,
                reason: format!("detector is bound to {}", detector.device()),
            }
            .into());
        }
        if panoramic_boxes.len() < panorama.num_views {
            return Err(FeatureError::CapTable {
                caps: panoramic_boxes.len(),
                views: panorama.num_views,
            });
        }
        Ok(Self { loader, detector, panoramic_boxes, device, panorama })
    }

    pub fn panorama_config(&self) -> &PanoramaConfig {
        &self.panorama
    }

    /// Capture a panorama from `env` and return one record per view, in
    /// panorama order. The agent is left facing the last captured view.
    pub fn get_visual_features<E: Environment>(
        &self,
        env: &mut E,
    ) -> Result<Vec<ObjectFeatureRecord>> {
        let panorama = create_panorama(env, 0, &self.panorama)?;
        self.extract(&panorama)
    }

    /// [`get_visual_features`](Self::get_visual_features), then rotate the
    /// agent back to where it started.
    pub fn get_visual_features_and_restore<E: Environment>(
        &self,
        env: &mut E,
    ) -> Result<Vec<ObjectFeatureRecord>> {
        let panorama = create_panorama(env, 0, &self.panorama)?;
        let records = self.extract(&panorama);
        panorama.restore_orientation(env)?;
        records
    }

    /// Run detection and per-view assembly on an already captured panorama.
    ///
    /// Records carry boxes in each view's own pixels, whatever frame size
    /// the loader scaled to.
    pub fn extract(&self, panorama: &Panorama) -> Result<Vec<ObjectFeatureRecord>> {
        let started = Instant::now();
        let batch = self.loader.load(&panorama.images)?.to_device(self.device);
        let mut groups = self.detector.detect(&batch)?;
        if groups.len() != panorama.len() {
            return Err(FeatureError::GroupCount {
                groups: groups.len(),
                views: panorama.len(),
            });
        }
        // boxes back onto the simulator frame the angles are measured in
        postprocess(&mut groups, &batch);

        let records = panorama
            .camera_infos
            .iter()
            .zip(&groups)
            .enumerate()
            .map(|(position, (info, group))| {
                let cap = self
                    .panoramic_boxes
                    .cap(position)
                    .ok_or(FeatureError::CapTable {
                        caps: self.panoramic_boxes.len(),
                        views: panorama.len(),
                    })?;
                assemble_view(info, group, cap)
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(
            "extracted {} objects over {} views in {:.2?}",
            records.iter().map(|r| r.num_objects).sum::<usize>(),
            records.len(),
            started.elapsed()
        );
        Ok(records)
    }
}
