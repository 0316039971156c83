use std::collections::BTreeSet;

use glam::DVec3;

use crate::{
    core::EntityId,
    error::{ShotkitError, ShotkitResult},
    scale_sync::ScaleSyncGraph,
    scene::{EntityKind, Scene},
};

/// Root group collecting every guide rig in the scene.
pub const GUIDE_ROOT: &str = "camera_guides";

/// A host viewport showing one camera, with its isolation display state.
#[derive(Clone, Debug)]
pub struct Panel {
    pub name: String,
    pub camera: EntityId,
    pub isolate: IsolateState,
}

impl Panel {
    pub fn new(name: impl Into<String>, camera: EntityId) -> Self {
        Self {
            name: name.into(),
            camera,
            isolate: IsolateState::default(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct IsolateState {
    pub enabled: bool,
    pub members: BTreeSet<EntityId>,
}

/// Idempotently creates the guide root and the per-camera guide group; the
/// group is pinned to the camera's frame on creation.
pub fn ensure_rig_groups(
    scene: &mut Scene,
    camera: EntityId,
) -> ShotkitResult<(EntityId, EntityId)> {
    let root = match scene.find(GUIDE_ROOT) {
        Some(id) => id,
        None => scene.add_transform(GUIDE_ROOT)?,
    };

    let cam_name = scene.name(camera)?.to_string();
    let grp_name = format!("{cam_name}_guides");
    let cam_grp = match scene.find(&grp_name) {
        Some(id) => id,
        None => {
            let id = scene.add_transform(&grp_name)?;
            scene.set_parent(id, root)?;
            let world = scene.world_matrix(camera)?;
            scene.set_world_transform(id, world)?;
            id
        }
    };
    Ok((root, cam_grp))
}

/// Isolates the panel on mesh surfaces plus the given guide group.
pub(crate) fn show_isolated(scene: &Scene, panel: &mut Panel, guide: EntityId) {
    let mut members: BTreeSet<EntityId> = scene.mesh_transforms().into_iter().collect();
    members.insert(guide);
    panel.isolate = IsolateState {
        enabled: true,
        members,
    };
}

/// Repeat-invocation toggle; returns whether isolation is now on.
pub(crate) fn toggle_isolated(scene: &Scene, panel: &mut Panel, guide: EntityId) -> bool {
    if panel.isolate.enabled {
        panel.isolate = IsolateState::default();
        false
    } else {
        show_isolated(scene, panel, guide);
        true
    }
}

/// Builds the rule-of-thirds framing guide: four unit-frame lines kept in
/// sync with the camera optics. Invoking it again toggles the guide instead
/// of rebuilding it.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThirdsGuideBuilder;

impl ThirdsGuideBuilder {
    #[tracing::instrument(skip(scene, panel))]
    pub fn build(
        &self,
        scene: &mut Scene,
        camera: EntityId,
        panel: Option<&mut Panel>,
    ) -> ShotkitResult<EntityId> {
        if !matches!(scene.entity(camera)?.kind, EntityKind::Camera { .. }) {
            return Err(ShotkitError::precondition(format!(
                "entity '{}' is not a camera",
                scene.name(camera)?
            )));
        }
        let cam_name = scene.name(camera)?.to_string();
        let (_root, cam_grp) = ensure_rig_groups(scene, camera)?;

        let grp_name = format!("{cam_name}_thirds");
        if let Some(existing) = scene.find(&grp_name) {
            let shown = match panel {
                Some(panel) => toggle_isolated(scene, panel, existing),
                None => !scene.entity(existing)?.visible,
            };
            scene.set_visible(existing, shown)?;
            return Ok(existing);
        }

        let thirds_grp = scene.add_transform(&grp_name)?;
        scene.set_parent(thirds_grp, cam_grp)?;

        let lines = [
            ("top", DVec3::new(-0.5, 0.25, 0.0), DVec3::new(0.5, 0.25, 0.0)),
            (
                "bottom",
                DVec3::new(-0.5, -0.25, 0.0),
                DVec3::new(0.5, -0.25, 0.0),
            ),
            (
                "left",
                DVec3::new(-0.25, 0.5, 0.0),
                DVec3::new(-0.25, -0.5, 0.0),
            ),
            (
                "right",
                DVec3::new(0.25, 0.5, 0.0),
                DVec3::new(0.25, -0.5, 0.0),
            ),
        ];
        for (side, a, b) in lines {
            let crv = scene.add_curve(&format!("{cam_name}_{side}_line"), vec![a, b])?;
            scene.set_parent(crv, thirds_grp)?;
        }

        let world = scene.world_matrix(camera)?;
        scene.set_world_transform(thirds_grp, world)?;
        scene.freeze_transform(thirds_grp)?;

        let graph = ScaleSyncGraph::ensure(scene, camera)?;
        graph.attach(scene, thirds_grp)?;

        if let Some(panel) = panel {
            show_isolated(scene, panel, thirds_grp);
        } else {
            tracing::warn!(camera = %cam_name, "no panel shows this camera, skipping isolation");
        }
        Ok(thirds_grp)
    }
}
