use crate::{
    anim::Keyframe,
    core::{EntityId, Plug},
    error::{ShotkitError, ShotkitResult},
    guides::{GUIDE_ROOT, Panel, ThirdsGuideBuilder},
    remap::{CurveRemap, RemapReport},
    scene::{EntityKind, FOCAL_LENGTH, NEAR_CLIP, Scene},
    spiral::SpiralCurveBuilder,
};

/// One slider unit is 1/100 of a scene unit of near clip, both directions.
pub const NEAR_SLIDER_SCALE: f64 = 100.0;

pub fn near_to_slider(near: f64) -> i64 {
    (near * NEAR_SLIDER_SCALE).round() as i64
}

pub fn near_from_slider(units: i64) -> f64 {
    units as f64 / NEAR_SLIDER_SCALE
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextEvent {
    TimeChanged,
    SelectionChanged,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type Observer = Box<dyn FnMut(ContextEvent, &Scene)>;

struct Subscription {
    id: SubscriptionId,
    event: ContextEvent,
    observer: Observer,
}

/// Snapshot of the resolved camera, what a panel header would display.
#[derive(Clone, Debug, PartialEq)]
pub struct ActiveCamera {
    pub camera: EntityId,
    pub name: String,
    pub focal: f64,
    pub near: f64,
    pub panel: Option<String>,
}

/// Owns the scene and the toolkit's interactive state: panels, the resolved
/// camera, and observer registrations. All engine invocations go through
/// here; there is no module-level state anywhere in the crate.
pub struct ToolContext {
    pub scene: Scene,
    panels: Vec<Panel>,
    subscriptions: Vec<Subscription>,
    next_subscription: u64,
    auto_refresh: bool,
    active: Option<ActiveCamera>,
}

impl ToolContext {
    pub fn new(scene: Scene) -> Self {
        Self {
            scene,
            panels: Vec::new(),
            subscriptions: Vec::new(),
            next_subscription: 1,
            auto_refresh: false,
            active: None,
        }
    }

    pub fn into_scene(self) -> Scene {
        self.scene
    }

    // ---- panels ------------------------------------------------------------

    pub fn add_panel(&mut self, name: impl Into<String>, camera: EntityId) -> usize {
        self.panels.push(Panel::new(name, camera));
        self.panels.len() - 1
    }

    pub fn panels(&self) -> &[Panel] {
        &self.panels
    }

    fn panel_index_for(&self, camera: EntityId) -> Option<usize> {
        self.panels.iter().position(|p| p.camera == camera)
    }

    // ---- camera resolution -------------------------------------------------

    /// Resolves the camera to operate on: the selection first, then the
    /// sequencer's current shot, then the first non-startup camera.
    pub fn resolve_camera(&self) -> ShotkitResult<EntityId> {
        for &id in &self.scene.selection.entities {
            if let Some(cam) = self.scene.camera_descendant(id) {
                return Ok(cam);
            }
        }
        if let Some(shot) = self.scene.shot_camera
            && let Some(cam) = self.scene.camera_descendant(shot)
        {
            return Ok(cam);
        }
        self.scene
            .cameras()
            .into_iter()
            .find(|&cam| !self.scene.is_startup_camera(cam))
            .ok_or_else(|| ShotkitError::resolution("no camera in the scene to resolve"))
    }

    /// Re-resolves the active camera and caches its parameter snapshot.
    pub fn refresh(&mut self) -> ShotkitResult<ActiveCamera> {
        let camera = self.resolve_camera()?;
        let name = self.scene.name(camera)?.to_string();
        let focal = self.scene.attr(&Plug::new(camera, FOCAL_LENGTH))?;
        let near = self.scene.attr(&Plug::new(camera, NEAR_CLIP))?;
        let panel = self
            .panel_index_for(camera)
            .map(|i| self.panels[i].name.clone());
        if panel.is_none() {
            tracing::warn!(camera = %name, "no panel shows this camera; add one and refresh");
        }
        let snapshot = ActiveCamera {
            camera,
            name,
            focal,
            near,
            panel,
        };
        self.active = Some(snapshot.clone());
        Ok(snapshot)
    }

    pub fn active(&self) -> Option<&ActiveCamera> {
        self.active.as_ref()
    }

    // ---- observers ---------------------------------------------------------

    pub fn subscribe(&mut self, event: ContextEvent, observer: Observer) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscriptions.push(Subscription {
            id,
            event,
            observer,
        });
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.id != id);
        self.subscriptions.len() != before
    }

    /// Keeps the active-camera snapshot current on time/selection changes,
    /// the explicit replacement for ambient host callbacks.
    pub fn set_auto_refresh(&mut self, on: bool) {
        self.auto_refresh = on;
    }

    fn emit(&mut self, event: ContextEvent) {
        let scene = &self.scene;
        for sub in &mut self.subscriptions {
            if sub.event == event {
                (sub.observer)(event, scene);
            }
        }
    }

    pub fn set_time(&mut self, time: f64) {
        self.scene.current_time = time;
        self.emit(ContextEvent::TimeChanged);
        if self.auto_refresh {
            let _ = self.refresh();
        }
    }

    pub fn set_selection(&mut self, entities: Vec<EntityId>) {
        self.scene.select(entities);
        self.emit(ContextEvent::SelectionChanged);
        if self.auto_refresh {
            let _ = self.refresh();
        }
    }

    // ---- camera parameters -------------------------------------------------

    /// Writes through to the driving plug when the parameter is driven by a
    /// transform rig, otherwise to the parameter itself.
    fn write_parameter(&mut self, plug: Plug, value: f64) -> ShotkitResult<()> {
        let mut target = plug;
        if let Some(src) = self.scene.input_connection(&target).map(|c| c.src.clone())
            && matches!(self.scene.entity(src.entity)?.kind, EntityKind::Transform)
        {
            target = src;
        }
        self.scene.set_attr(&target, value)
    }

    pub fn set_focal(&mut self, camera: EntityId, value: f64) -> ShotkitResult<()> {
        self.write_parameter(Plug::new(camera, FOCAL_LENGTH), value)
    }

    pub fn set_near(&mut self, camera: EntityId, value: f64) -> ShotkitResult<()> {
        self.write_parameter(Plug::new(camera, NEAR_CLIP), value)
    }

    /// Keys the camera's current focal value at the current time.
    pub fn key_focal(&mut self, camera: EntityId) -> ShotkitResult<()> {
        let plug = Plug::new(camera, FOCAL_LENGTH);
        let value = self.scene.attr(&plug)?;
        let time = self.scene.current_time;
        self.scene.set_key(&plug, Keyframe::auto(time, value))
    }

    // ---- engines -----------------------------------------------------------

    pub fn build_spiral(
        &mut self,
        iterations: usize,
        points_per_section: usize,
    ) -> ShotkitResult<EntityId> {
        let camera = self.resolve_camera()?;
        let builder = SpiralCurveBuilder {
            iterations,
            points_per_section,
        };
        match self.panel_index_for(camera) {
            Some(i) => builder.build(&mut self.scene, camera, Some(&mut self.panels[i])),
            None => builder.build(&mut self.scene, camera, None),
        }
    }

    pub fn build_thirds(&mut self) -> ShotkitResult<EntityId> {
        let camera = self.resolve_camera()?;
        match self.panel_index_for(camera) {
            Some(i) => ThirdsGuideBuilder.build(&mut self.scene, camera, Some(&mut self.panels[i])),
            None => ThirdsGuideBuilder.build(&mut self.scene, camera, None),
        }
    }

    pub fn remap_focal(&mut self, time_offset: i64) -> ShotkitResult<RemapReport> {
        CurveRemap { time_offset }.run(&mut self.scene)
    }

    /// Tears down the toolkit's scene footprint and observer registrations.
    pub fn close(&mut self) -> ShotkitResult<()> {
        if let Some(root) = self.scene.find(GUIDE_ROOT) {
            self.scene.delete_entity(root)?;
        }
        self.subscriptions.clear();
        self.active = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{cell::RefCell, rc::Rc};

    fn context_with_cameras() -> (ToolContext, EntityId, EntityId) {
        let mut scene = Scene::new();
        let persp = scene.add_camera("persp", true).unwrap();
        let shot = scene.add_camera("shot_cam", false).unwrap();
        let ctx = ToolContext::new(scene);
        (ctx, persp, shot)
    }

    #[test]
    fn resolution_prefers_selection_then_shot_then_fallback() {
        let (mut ctx, persp, shot) = context_with_cameras();

        // fallback skips startup cameras
        assert_eq!(ctx.resolve_camera().unwrap(), shot);

        ctx.scene.shot_camera = Some(persp);
        assert_eq!(ctx.resolve_camera().unwrap(), persp);

        let rig = ctx.scene.add_transform("crane").unwrap();
        let rig_cam = ctx.scene.add_camera("crane_cam", false).unwrap();
        ctx.scene.set_parent(rig_cam, rig).unwrap();
        ctx.set_selection(vec![rig]);
        assert_eq!(ctx.resolve_camera().unwrap(), rig_cam);
    }

    #[test]
    fn resolution_fails_without_any_usable_camera() {
        let mut scene = Scene::new();
        scene.add_camera("persp", true).unwrap();
        let ctx = ToolContext::new(scene);
        assert!(matches!(
            ctx.resolve_camera(),
            Err(ShotkitError::Resolution(_))
        ));
    }

    #[test]
    fn refresh_snapshots_focal_near_and_panel() {
        let (mut ctx, _persp, shot) = context_with_cameras();
        ctx.add_panel("shot_panel", shot);
        ctx.set_focal(shot, 50.0).unwrap();

        let active = ctx.refresh().unwrap();
        assert_eq!(active.camera, shot);
        assert_eq!(active.focal, 50.0);
        assert_eq!(active.panel.as_deref(), Some("shot_panel"));
    }

    #[test]
    fn near_slider_units_round_trip() {
        assert_eq!(near_to_slider(0.1), 10);
        assert_eq!(near_to_slider(12.34), 1234);
        assert_eq!(near_from_slider(1234), 12.34);
    }

    #[test]
    fn observers_fire_until_unsubscribed() {
        let (mut ctx, _, _) = context_with_cameras();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let sink = Rc::clone(&seen);
        let id = ctx.subscribe(
            ContextEvent::TimeChanged,
            Box::new(move |_, scene| sink.borrow_mut().push(scene.current_time)),
        );

        ctx.set_time(10.0);
        ctx.set_selection(vec![]); // different event, not observed
        ctx.set_time(20.0);
        assert_eq!(*seen.borrow(), vec![10.0, 20.0]);

        assert!(ctx.unsubscribe(id));
        assert!(!ctx.unsubscribe(id));
        ctx.set_time(30.0);
        assert_eq!(seen.borrow().len(), 2);
    }

    #[test]
    fn parameter_writes_follow_the_driver() {
        let (mut ctx, _, shot) = context_with_cameras();
        let rig = ctx.scene.add_transform("focus_rig").unwrap();
        ctx.scene
            .connect(
                &Plug::new(rig, "translate_x"),
                &Plug::new(shot, FOCAL_LENGTH),
            )
            .unwrap();

        ctx.set_focal(shot, 85.0).unwrap();
        assert_eq!(
            ctx.scene.attr(&Plug::new(rig, "translate_x")).unwrap(),
            85.0
        );
        assert_eq!(
            ctx.scene.attr(&Plug::new(shot, FOCAL_LENGTH)).unwrap(),
            85.0
        );
    }

    #[test]
    fn key_focal_keys_the_current_value_at_current_time() {
        let (mut ctx, _, shot) = context_with_cameras();
        ctx.set_focal(shot, 40.0).unwrap();
        ctx.set_time(17.0);
        ctx.key_focal(shot).unwrap();

        let plug = Plug::new(shot, FOCAL_LENGTH);
        let curve = ctx.scene.curve(&plug).unwrap().unwrap();
        let key = curve.key_at(17.0).unwrap();
        assert_eq!(key.value, 40.0);
    }

    #[test]
    fn close_tears_down_the_guide_rig() {
        let (mut ctx, _, shot) = context_with_cameras();
        ctx.set_selection(vec![shot]);
        ctx.build_thirds().unwrap();
        assert!(ctx.scene.find(GUIDE_ROOT).is_some());

        ctx.close().unwrap();
        assert!(ctx.scene.find(GUIDE_ROOT).is_none());
    }
}
