use crate::{
    core::{EntityId, Plug},
    error::{ShotkitError, ShotkitResult},
    scene::{APERTURE_H, APERTURE_V, EntityKind, FOCAL_LENGTH, FormulaKind, NEAR_CLIP, Scene},
};

pub const INCH_TO_MM: f64 = 25.4;

/// Keeps the guide just in front of the near plane so it never z-fights it.
pub const NEAR_CLIP_EPSILON: f64 = 1.0e-4;

/// Live formula graph binding a guide surface's depth and scale to a camera's
/// optics.
///
/// A unit plane parented to the camera and pushed to the near clip plane must
/// scale by `(near_clip × aperture_mm) / focal_length` per axis to exactly
/// fill the field of view; the graph maintains that relation through any
/// change to aperture, near clip or focal length.
///
/// At most one graph exists per camera: `ensure` is a memoized factory that
/// returns the existing node set when present.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ScaleSyncGraph {
    pub camera: EntityId,
    pub aperture_mm: EntityId,
    pub near_offset: EntityId,
    pub base_scale: EntityId,
    pub focal_divide: EntityId,
}

impl ScaleSyncGraph {
    #[tracing::instrument(skip(scene))]
    pub fn ensure(scene: &mut Scene, camera: EntityId) -> ShotkitResult<Self> {
        if !matches!(scene.entity(camera)?.kind, EntityKind::Camera { .. }) {
            return Err(ShotkitError::scene(format!(
                "entity '{}' is not a camera",
                scene.name(camera)?
            )));
        }
        let cam_name = scene.name(camera)?.to_string();
        let names = [
            format!("{cam_name}_aperture_mm"),
            format!("{cam_name}_near_offset"),
            format!("{cam_name}_base_scale"),
            format!("{cam_name}_focal_divide"),
        ];

        let found: Vec<Option<EntityId>> = names.iter().map(|n| scene.find(n)).collect();
        if let [Some(aperture_mm), Some(near_offset), Some(base_scale), Some(focal_divide)] =
            found[..]
        {
            tracing::debug!(camera = %cam_name, "reusing existing scale sync graph");
            return Ok(Self {
                camera,
                aperture_mm,
                near_offset,
                base_scale,
                focal_divide,
            });
        }
        if found.iter().any(Option::is_some) {
            return Err(ShotkitError::scene(format!(
                "partial scale sync graph for camera '{cam_name}'"
            )));
        }

        let near_offset = scene.add_formula(&names[1], FormulaKind::Add)?;
        scene.connect(
            &Plug::new(camera, NEAR_CLIP),
            &Plug::new(near_offset, "in1_x"),
        )?;
        scene.set_attr(&Plug::new(near_offset, "in2_x"), NEAR_CLIP_EPSILON)?;

        // film back inches -> mm on x/y; the z channel doubles as the depth
        // negate, pushing the guide to just in front of the near plane
        let aperture_mm = scene.add_formula(&names[0], FormulaKind::Mul)?;
        scene.connect(
            &Plug::new(camera, APERTURE_H),
            &Plug::new(aperture_mm, "in1_x"),
        )?;
        scene.connect(
            &Plug::new(camera, APERTURE_V),
            &Plug::new(aperture_mm, "in1_y"),
        )?;
        scene.set_attr(&Plug::new(aperture_mm, "in2_x"), INCH_TO_MM)?;
        scene.set_attr(&Plug::new(aperture_mm, "in2_y"), INCH_TO_MM)?;
        scene.connect(
            &Plug::new(near_offset, "out_x"),
            &Plug::new(aperture_mm, "in1_z"),
        )?;
        scene.set_attr(&Plug::new(aperture_mm, "in2_z"), -1.0)?;

        let base_scale = scene.add_formula(&names[2], FormulaKind::Mul)?;
        scene.connect(
            &Plug::new(camera, NEAR_CLIP),
            &Plug::new(base_scale, "in1_x"),
        )?;
        scene.connect(
            &Plug::new(camera, NEAR_CLIP),
            &Plug::new(base_scale, "in1_y"),
        )?;
        scene.connect(
            &Plug::new(aperture_mm, "out_x"),
            &Plug::new(base_scale, "in2_x"),
        )?;
        scene.connect(
            &Plug::new(aperture_mm, "out_y"),
            &Plug::new(base_scale, "in2_y"),
        )?;

        let focal_divide = scene.add_formula(&names[3], FormulaKind::Div)?;
        scene.connect(
            &Plug::new(base_scale, "out_x"),
            &Plug::new(focal_divide, "in1_x"),
        )?;
        scene.connect(
            &Plug::new(base_scale, "out_y"),
            &Plug::new(focal_divide, "in1_y"),
        )?;
        scene.connect(
            &Plug::new(camera, FOCAL_LENGTH),
            &Plug::new(focal_divide, "in2_x"),
        )?;
        scene.connect(
            &Plug::new(camera, FOCAL_LENGTH),
            &Plug::new(focal_divide, "in2_y"),
        )?;

        Ok(Self {
            camera,
            aperture_mm,
            near_offset,
            base_scale,
            focal_divide,
        })
    }

    /// Drives `surface`'s depth and planar scale from the graph. Re-attaching
    /// the same surface is a no-op; a surface driven from elsewhere is an
    /// error.
    pub fn attach(&self, scene: &mut Scene, surface: EntityId) -> ShotkitResult<()> {
        let links = [
            (Plug::new(self.aperture_mm, "out_z"), "translate_z"),
            (Plug::new(self.focal_divide, "out_x"), "scale_x"),
            (Plug::new(self.focal_divide, "out_y"), "scale_y"),
        ];
        for (src, attr) in links {
            let dst = Plug::new(surface, attr);
            if scene.input_connection(&dst).is_some_and(|c| c.src == src) {
                continue;
            }
            scene.connect(&src, &dst)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn rig() -> (Scene, EntityId, EntityId) {
        let mut scene = Scene::new();
        let cam = scene.add_camera("shot_cam", false).unwrap();
        let plane = scene.add_transform("guide_plane").unwrap();
        (scene, cam, plane)
    }

    #[test]
    fn ensure_is_idempotent_per_camera() {
        let (mut scene, cam, _) = rig();
        let first = ScaleSyncGraph::ensure(&mut scene, cam).unwrap();
        let count = scene.entities().count();
        let second = ScaleSyncGraph::ensure(&mut scene, cam).unwrap();
        assert_eq!(first, second);
        assert_eq!(scene.entities().count(), count);
    }

    #[test]
    fn pinhole_relation_holds() {
        let (mut scene, cam, plane) = rig();
        scene.set_attr(&Plug::new(cam, NEAR_CLIP), 1.0).unwrap();
        scene.set_attr(&Plug::new(cam, FOCAL_LENGTH), 35.0).unwrap();

        let graph = ScaleSyncGraph::ensure(&mut scene, cam).unwrap();
        graph.attach(&mut scene, plane).unwrap();

        let expected = (1.0 * 1.417 * INCH_TO_MM) / 35.0;
        assert_relative_eq!(
            scene.attr(&Plug::new(plane, "scale_x")).unwrap(),
            expected,
            epsilon = 1e-9
        );
        assert_relative_eq!(
            scene.attr(&Plug::new(plane, "translate_z")).unwrap(),
            -(1.0 + NEAR_CLIP_EPSILON),
            epsilon = 1e-12
        );
    }

    #[test]
    fn optics_changes_propagate_to_surface() {
        let (mut scene, cam, plane) = rig();
        let graph = ScaleSyncGraph::ensure(&mut scene, cam).unwrap();
        graph.attach(&mut scene, plane).unwrap();

        let before = scene.attr(&Plug::new(plane, "scale_x")).unwrap();
        scene.set_attr(&Plug::new(cam, FOCAL_LENGTH), 70.0).unwrap();
        let after = scene.attr(&Plug::new(plane, "scale_x")).unwrap();
        assert_relative_eq!(after, before / 2.0, epsilon = 1e-9);

        scene.set_attr(&Plug::new(cam, NEAR_CLIP), 0.2).unwrap();
        assert_relative_eq!(
            scene.attr(&Plug::new(plane, "translate_z")).unwrap(),
            -(0.2 + NEAR_CLIP_EPSILON),
            epsilon = 1e-12
        );
    }

    #[test]
    fn attach_twice_is_a_no_op() {
        let (mut scene, cam, plane) = rig();
        let graph = ScaleSyncGraph::ensure(&mut scene, cam).unwrap();
        graph.attach(&mut scene, plane).unwrap();
        graph.attach(&mut scene, plane).unwrap();
        assert!(
            scene
                .input_connection(&Plug::new(plane, "scale_x"))
                .is_some()
        );
    }

    #[test]
    fn non_camera_is_rejected() {
        let mut scene = Scene::new();
        let grp = scene.add_transform("grp").unwrap();
        assert!(ScaleSyncGraph::ensure(&mut scene, grp).is_err());
    }
}
