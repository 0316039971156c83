use std::collections::{BTreeMap, BTreeSet};

use glam::{DMat4, DQuat, DVec3, EulerRot};

use crate::{
    anim::{AnimCurve, Keyframe, TangentMode},
    core::{EntityId, Plug, TimeRange},
    error::{ShotkitError, ShotkitResult},
};

pub const FOCAL_LENGTH: &str = "focal_length";
pub const NEAR_CLIP: &str = "near_clip";
pub const APERTURE_H: &str = "aperture_h";
pub const APERTURE_V: &str = "aperture_v";

const TRANSFORM_ATTRS: [(&str, f64); 9] = [
    ("translate_x", 0.0),
    ("translate_y", 0.0),
    ("translate_z", 0.0),
    ("rotate_x", 0.0),
    ("rotate_y", 0.0),
    ("rotate_z", 0.0),
    ("scale_x", 1.0),
    ("scale_y", 1.0),
    ("scale_z", 1.0),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FormulaKind {
    Mul,
    Div,
    Add,
}

impl FormulaKind {
    fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            Self::Mul => a * b,
            Self::Div => {
                if b.abs() < f64::EPSILON {
                    tracing::warn!("formula division by zero, emitting 0.0");
                    0.0
                } else {
                    a / b
                }
            }
            Self::Add => a + b,
        }
    }

    fn neutral_rhs(self) -> f64 {
        match self {
            Self::Mul | Self::Div => 1.0,
            Self::Add => 0.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum EntityKind {
    Transform,
    Camera { startup: bool },
    CurveShape { points: Vec<DVec3> },
    Mesh,
    Formula(FormulaKind),
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Attribute {
    pub value: f64,
    pub bounds: Option<(f64, f64)>,
    pub keyable: bool,
    pub curve: Option<AnimCurve>,
}

#[derive(Clone, Copy, Debug)]
pub struct AttrSpec {
    pub default: f64,
    pub bounds: Option<(f64, f64)>,
    pub keyable: bool,
}

impl AttrSpec {
    pub fn keyable(default: f64) -> Self {
        Self {
            default,
            bounds: None,
            keyable: true,
        }
    }

    pub fn bounded(default: f64, min: f64, max: f64) -> Self {
        Self {
            default,
            bounds: Some((min, max)),
            keyable: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub name: String,
    pub kind: EntityKind,
    pub parent: Option<EntityId>,
    pub visible: bool,
    attrs: BTreeMap<String, Attribute>,
}

impl Entity {
    pub fn attr(&self, name: &str) -> Option<&Attribute> {
        self.attrs.get(name)
    }
}

/// Pointwise scalar map usable as a live expression between two plugs.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ScalarExpr {
    /// `dst = tan(src / divisor)`.
    Tan { divisor: f64 },
}

impl ScalarExpr {
    pub fn apply(self, x: f64) -> f64 {
        match self {
            Self::Tan { divisor } => (x / divisor).tan(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Connection {
    pub src: Plug,
    pub dst: Plug,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ExprBinding {
    pub src: Plug,
    pub dst: Plug,
    pub expr: ScalarExpr,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct KeySelection {
    pub plug: Plug,
    pub times: Vec<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Selection {
    pub entities: Vec<EntityId>,
    pub keys: Option<KeySelection>,
}

/// In-memory scene graph: the single shared, exclusively-mutated resource.
///
/// Attribute writes propagate synchronously through connections, formula
/// nodes and expression bindings (push); `sample_plug` resolves a plug at an
/// arbitrary time through the same edges (pull), which is what baking uses.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Scene {
    entities: Vec<Entity>,
    connections: Vec<Connection>,
    bindings: Vec<ExprBinding>,
    pub selection: Selection,
    pub playback: TimeRange,
    pub current_time: f64,
    /// Camera of the sequencer's current shot, when one is active.
    pub shot_camera: Option<EntityId>,
    next_id: u64,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    pub fn new() -> Self {
        Self {
            entities: Vec::new(),
            connections: Vec::new(),
            bindings: Vec::new(),
            selection: Selection::default(),
            playback: TimeRange {
                min: 1.0,
                max: 120.0,
            },
            current_time: 1.0,
            shot_camera: None,
            next_id: 1,
        }
    }

    // ---- entities ----------------------------------------------------------

    fn add_entity(&mut self, name: &str, kind: EntityKind) -> ShotkitResult<EntityId> {
        if self.find(name).is_some() {
            return Err(ShotkitError::scene(format!(
                "entity name '{name}' already exists"
            )));
        }
        let id = EntityId(self.next_id);
        self.next_id += 1;

        let mut attrs = BTreeMap::new();
        if !matches!(kind, EntityKind::Formula(_)) {
            for (attr, default) in TRANSFORM_ATTRS {
                attrs.insert(
                    attr.to_string(),
                    Attribute {
                        value: default,
                        bounds: None,
                        keyable: true,
                        curve: None,
                    },
                );
            }
        }

        self.entities.push(Entity {
            id,
            name: name.to_string(),
            kind,
            parent: None,
            visible: true,
            attrs,
        });
        Ok(id)
    }

    pub fn add_transform(&mut self, name: &str) -> ShotkitResult<EntityId> {
        self.add_entity(name, EntityKind::Transform)
    }

    pub fn add_camera(&mut self, name: &str, startup: bool) -> ShotkitResult<EntityId> {
        let id = self.add_entity(name, EntityKind::Camera { startup })?;
        self.add_attr(id, FOCAL_LENGTH, AttrSpec::keyable(35.0))?;
        self.add_attr(id, NEAR_CLIP, AttrSpec::keyable(0.1))?;
        self.add_attr(id, APERTURE_H, AttrSpec::keyable(1.417))?;
        self.add_attr(id, APERTURE_V, AttrSpec::keyable(0.945))?;
        Ok(id)
    }

    pub fn add_curve(&mut self, name: &str, points: Vec<DVec3>) -> ShotkitResult<EntityId> {
        self.add_entity(name, EntityKind::CurveShape { points })
    }

    pub fn add_mesh(&mut self, name: &str) -> ShotkitResult<EntityId> {
        self.add_entity(name, EntityKind::Mesh)
    }

    pub fn add_formula(&mut self, name: &str, kind: FormulaKind) -> ShotkitResult<EntityId> {
        let id = self.add_entity(name, EntityKind::Formula(kind))?;
        for axis in ["x", "y", "z"] {
            self.add_attr(id, &format!("in1_{axis}"), AttrSpec::keyable(0.0))?;
            self.add_attr(
                id,
                &format!("in2_{axis}"),
                AttrSpec::keyable(kind.neutral_rhs()),
            )?;
            self.add_attr(id, &format!("out_{axis}"), AttrSpec::keyable(0.0))?;
        }
        let mut visited = BTreeSet::new();
        self.recompute_formula(id, &mut visited);
        Ok(id)
    }

    pub fn entity(&self, id: EntityId) -> ShotkitResult<&Entity> {
        self.entities
            .iter()
            .find(|e| e.id == id)
            .ok_or_else(|| ShotkitError::scene(format!("unknown entity {}", id.0)))
    }

    fn entity_mut(&mut self, id: EntityId) -> ShotkitResult<&mut Entity> {
        self.entities
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| ShotkitError::scene(format!("unknown entity {}", id.0)))
    }

    pub fn find(&self, name: &str) -> Option<EntityId> {
        self.entities.iter().find(|e| e.name == name).map(|e| e.id)
    }

    pub fn name(&self, id: EntityId) -> ShotkitResult<&str> {
        Ok(self.entity(id)?.name.as_str())
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter()
    }

    pub fn children(&self, id: EntityId) -> Vec<EntityId> {
        self.entities
            .iter()
            .filter(|e| e.parent == Some(id))
            .map(|e| e.id)
            .collect()
    }

    pub fn set_parent(&mut self, child: EntityId, parent: EntityId) -> ShotkitResult<()> {
        if child == parent {
            return Err(ShotkitError::scene("entity cannot parent itself"));
        }
        self.entity(parent)?;
        // reparenting under a descendant would orphan the subtree
        let mut walk = Some(parent);
        while let Some(p) = walk {
            if p == child {
                return Err(ShotkitError::scene("parenting would create a cycle"));
            }
            walk = self.entity(p)?.parent;
        }
        self.entity_mut(child)?.parent = Some(parent);
        Ok(())
    }

    pub fn set_visible(&mut self, id: EntityId, visible: bool) -> ShotkitResult<()> {
        self.entity_mut(id)?.visible = visible;
        Ok(())
    }

    /// Deletes an entity and its whole subtree, along with any connections,
    /// bindings and selections that touch it.
    pub fn delete_entity(&mut self, id: EntityId) -> ShotkitResult<()> {
        self.entity(id)?;
        let mut doomed = vec![id];
        let mut i = 0;
        while i < doomed.len() {
            doomed.extend(self.children(doomed[i]));
            i += 1;
        }
        let doomed: BTreeSet<EntityId> = doomed.into_iter().collect();

        self.entities.retain(|e| !doomed.contains(&e.id));
        self.connections
            .retain(|c| !doomed.contains(&c.src.entity) && !doomed.contains(&c.dst.entity));
        self.bindings
            .retain(|b| !doomed.contains(&b.src.entity) && !doomed.contains(&b.dst.entity));
        self.selection.entities.retain(|e| !doomed.contains(e));
        if let Some(keys) = &self.selection.keys
            && doomed.contains(&keys.plug.entity)
        {
            self.selection.keys = None;
        }
        Ok(())
    }

    // ---- attributes --------------------------------------------------------

    pub fn add_attr(&mut self, id: EntityId, name: &str, spec: AttrSpec) -> ShotkitResult<()> {
        let entity = self.entity_mut(id)?;
        if entity.attrs.contains_key(name) {
            return Err(ShotkitError::scene(format!(
                "attribute '{}.{name}' already exists",
                entity.name
            )));
        }
        entity.attrs.insert(
            name.to_string(),
            Attribute {
                value: clamp_to(spec.default, spec.bounds),
                bounds: spec.bounds,
                keyable: spec.keyable,
                curve: None,
            },
        );
        Ok(())
    }

    /// Removes an attribute together with its curve and any edges through it.
    pub fn remove_attr(&mut self, id: EntityId, name: &str) -> ShotkitResult<()> {
        let entity = self.entity_mut(id)?;
        if entity.attrs.remove(name).is_none() {
            return Err(ShotkitError::scene(format!(
                "unknown attribute '{}.{name}'",
                entity.name
            )));
        }
        let plug = Plug::new(id, name);
        self.connections.retain(|c| c.src != plug && c.dst != plug);
        self.bindings.retain(|b| b.src != plug && b.dst != plug);
        if self.selection.keys.as_ref().is_some_and(|k| k.plug == plug) {
            self.selection.keys = None;
        }
        Ok(())
    }

    pub fn has_attr(&self, plug: &Plug) -> bool {
        self.entity(plug.entity)
            .is_ok_and(|e| e.attrs.contains_key(&plug.attr))
    }

    fn attribute(&self, plug: &Plug) -> ShotkitResult<&Attribute> {
        self.entity(plug.entity)?
            .attrs
            .get(&plug.attr)
            .ok_or_else(|| ShotkitError::scene(format!("unknown attribute '{plug}'")))
    }

    fn attribute_mut(&mut self, plug: &Plug) -> ShotkitResult<&mut Attribute> {
        let id = plug.entity;
        let entity = self.entity_mut(id)?;
        let name = entity.name.clone();
        entity
            .attrs
            .get_mut(&plug.attr)
            .ok_or_else(|| ShotkitError::scene(format!("unknown attribute '{name}.{}'", plug.attr)))
    }

    pub fn attr(&self, plug: &Plug) -> ShotkitResult<f64> {
        Ok(self.attribute(plug)?.value)
    }

    /// Writes a value (clamped to the attribute's domain) and pushes it
    /// through the dependency graph.
    pub fn set_attr(&mut self, plug: &Plug, value: f64) -> ShotkitResult<()> {
        let attr = self.attribute_mut(plug)?;
        attr.value = clamp_to(value, attr.bounds);
        let mut visited = BTreeSet::new();
        self.propagate_from(plug, &mut visited);
        Ok(())
    }

    fn write_raw(&mut self, plug: &Plug, value: f64) {
        if let Ok(attr) = self.attribute_mut(plug) {
            attr.value = clamp_to(value, attr.bounds);
        }
    }

    fn propagate_from(&mut self, plug: &Plug, visited: &mut BTreeSet<Plug>) {
        if !visited.insert(plug.clone()) {
            return; // cycle guard
        }

        if plug.attr.starts_with("in1_") || plug.attr.starts_with("in2_") {
            self.recompute_formula(plug.entity, visited);
        }

        let value = match self.attr(plug) {
            Ok(v) => v,
            Err(_) => return,
        };

        let conn_dsts: Vec<Plug> = self
            .connections
            .iter()
            .filter(|c| c.src == *plug)
            .map(|c| c.dst.clone())
            .collect();
        for dst in conn_dsts {
            self.write_raw(&dst, value);
            self.propagate_from(&dst, visited);
        }

        let bound: Vec<(Plug, ScalarExpr)> = self
            .bindings
            .iter()
            .filter(|b| b.src == *plug)
            .map(|b| (b.dst.clone(), b.expr))
            .collect();
        for (dst, expr) in bound {
            self.write_raw(&dst, expr.apply(value));
            self.propagate_from(&dst, visited);
        }
    }

    fn recompute_formula(&mut self, id: EntityId, visited: &mut BTreeSet<Plug>) {
        let Ok(entity) = self.entity(id) else { return };
        let EntityKind::Formula(kind) = &entity.kind else {
            return;
        };
        let kind = *kind;
        let mut outs = Vec::with_capacity(3);
        for axis in ["x", "y", "z"] {
            let a = entity
                .attr(&format!("in1_{axis}"))
                .map(|a| a.value)
                .unwrap_or(0.0);
            let b = entity
                .attr(&format!("in2_{axis}"))
                .map(|a| a.value)
                .unwrap_or(kind.neutral_rhs());
            outs.push((Plug::new(id, format!("out_{axis}")), kind.apply(a, b)));
        }
        for (out, value) in outs {
            self.write_raw(&out, value);
            self.propagate_from(&out, visited);
        }
    }

    // ---- keyframes ---------------------------------------------------------

    pub fn curve(&self, plug: &Plug) -> ShotkitResult<Option<&AnimCurve>> {
        Ok(self.attribute(plug)?.curve.as_ref())
    }

    fn curve_mut(&mut self, plug: &Plug) -> ShotkitResult<&mut AnimCurve> {
        let attr = self.attribute_mut(plug)?;
        Ok(attr.curve.get_or_insert_with(AnimCurve::new))
    }

    pub fn set_key(&mut self, plug: &Plug, key: Keyframe) -> ShotkitResult<()> {
        let attr = self.attribute(plug)?;
        if !attr.keyable {
            return Err(ShotkitError::scene(format!(
                "attribute '{plug}' is not keyable"
            )));
        }
        let clamped = Keyframe {
            value: clamp_to(key.value, attr.bounds),
            ..key
        };
        self.curve_mut(plug)?.set_key(clamped)
    }

    pub fn cut_keys(&mut self, plug: &Plug) -> ShotkitResult<()> {
        if let Some(curve) = &mut self.attribute_mut(plug)?.curve {
            curve.cut_all();
        }
        Ok(())
    }

    pub fn insert_key(&mut self, plug: &Plug, time: f64) -> ShotkitResult<()> {
        self.curve_mut(plug)?.insert_key_preserving(time)
    }

    pub fn retime_key(&mut self, plug: &Plug, from: f64, to: f64) -> ShotkitResult<()> {
        self.curve_mut(plug)?.retime_key(from, to)
    }

    pub fn set_curve_tangents(&mut self, plug: &Plug, mode: TangentMode) -> ShotkitResult<()> {
        if let Some(curve) = &mut self.attribute_mut(plug)?.curve {
            curve.set_all_tangents(mode);
        }
        Ok(())
    }

    pub fn replace_keys(&mut self, plug: &Plug, keys: Vec<Keyframe>) -> ShotkitResult<()> {
        self.curve_mut(plug)?.replace_all(keys)
    }

    pub fn keys_in(&self, plug: &Plug, min: f64, max: f64) -> ShotkitResult<Vec<Keyframe>> {
        Ok(self
            .attribute(plug)?
            .curve
            .as_ref()
            .map(|c| c.keys_in(min, max))
            .unwrap_or_default())
    }

    // ---- connections and bindings ------------------------------------------

    fn require_free_input(&self, dst: &Plug) -> ShotkitResult<()> {
        if self.input_connection(dst).is_some() || self.binding_for(dst).is_some() {
            return Err(ShotkitError::scene(format!(
                "plug '{dst}' already has an incoming link"
            )));
        }
        Ok(())
    }

    /// Live attr→attr link; the destination is synced immediately and on
    /// every upstream change afterwards.
    pub fn connect(&mut self, src: &Plug, dst: &Plug) -> ShotkitResult<()> {
        self.attribute(src)?;
        self.attribute(dst)?;
        self.require_free_input(dst)?;
        self.connections.push(Connection {
            src: src.clone(),
            dst: dst.clone(),
        });
        let value = self.attr(src)?;
        self.write_raw(dst, value);
        let mut visited = BTreeSet::new();
        visited.insert(src.clone());
        self.propagate_from(dst, &mut visited);
        Ok(())
    }

    pub fn disconnect(&mut self, dst: &Plug) {
        self.connections.retain(|c| c.dst != *dst);
    }

    pub fn input_connection(&self, dst: &Plug) -> Option<&Connection> {
        self.connections.iter().find(|c| c.dst == *dst)
    }

    pub fn bind_expr(&mut self, dst: &Plug, src: &Plug, expr: ScalarExpr) -> ShotkitResult<()> {
        self.attribute(src)?;
        self.attribute(dst)?;
        self.require_free_input(dst)?;
        self.bindings.push(ExprBinding {
            src: src.clone(),
            dst: dst.clone(),
            expr,
        });
        let value = expr.apply(self.attr(src)?);
        self.write_raw(dst, value);
        let mut visited = BTreeSet::new();
        visited.insert(src.clone());
        self.propagate_from(dst, &mut visited);
        Ok(())
    }

    pub fn unbind(&mut self, dst: &Plug) {
        self.bindings.retain(|b| b.dst != *dst);
    }

    pub fn binding_for(&self, dst: &Plug) -> Option<&ExprBinding> {
        self.bindings.iter().find(|b| b.dst == *dst)
    }

    // ---- sampling and baking ----------------------------------------------

    /// Resolves a plug's value at `time`, pulling through bindings,
    /// connections, formula nodes and animation curves.
    pub fn sample_plug(&self, plug: &Plug, time: f64) -> ShotkitResult<f64> {
        let mut visited = BTreeSet::new();
        self.sample_inner(plug, time, &mut visited)
    }

    fn sample_inner(
        &self,
        plug: &Plug,
        time: f64,
        visited: &mut BTreeSet<Plug>,
    ) -> ShotkitResult<f64> {
        if !visited.insert(plug.clone()) {
            return Err(ShotkitError::scene(format!(
                "dependency cycle through '{plug}'"
            )));
        }

        if let Some(binding) = self.binding_for(plug) {
            let upstream = self.sample_inner(&binding.src.clone(), time, visited)?;
            return Ok(binding.expr.apply(upstream));
        }
        if let Some(conn) = self.input_connection(plug) {
            return self.sample_inner(&conn.src.clone(), time, visited);
        }

        let entity = self.entity(plug.entity)?;
        if let EntityKind::Formula(kind) = &entity.kind
            && let Some(axis) = plug.attr.strip_prefix("out_")
        {
            let kind = *kind;
            let a =
                self.sample_inner(&Plug::new(plug.entity, format!("in1_{axis}")), time, visited)?;
            let b =
                self.sample_inner(&Plug::new(plug.entity, format!("in2_{axis}")), time, visited)?;
            return Ok(kind.apply(a, b));
        }

        let attr = self.attribute(plug)?;
        if let Some(curve) = &attr.curve
            && let Some(v) = curve.eval(time)
        {
            return Ok(clamp_to(v, attr.bounds));
        }
        Ok(attr.value)
    }

    /// Materializes a live-driven plug as ordinary keys over `[min, max]` at
    /// one-frame steps (the end of the range is always sampled), then removes
    /// the live input. Keys outside the range are untouched.
    #[tracing::instrument(skip(self))]
    pub fn bake_plug(&mut self, plug: &Plug, min: f64, max: f64) -> ShotkitResult<usize> {
        if min > max {
            return Err(ShotkitError::scene("bake range min must be <= max"));
        }
        let times = frame_times(min, max);
        let mut baked = Vec::with_capacity(times.len());
        for &t in &times {
            baked.push((t, self.sample_plug(plug, t)?));
        }

        let attr = self.attribute(plug)?;
        let mut keys: Vec<Keyframe> = attr
            .curve
            .as_ref()
            .map(|c| {
                c.keys()
                    .iter()
                    .copied()
                    .filter(|k| k.time < min || k.time > max)
                    .collect()
            })
            .unwrap_or_default();
        for (t, v) in &baked {
            keys.push(Keyframe::auto(*t, *v));
        }
        keys.sort_by(|a, b| a.time.total_cmp(&b.time));

        self.replace_keys(plug, keys)?;
        self.unbind(plug);
        self.disconnect(plug);
        Ok(baked.len())
    }

    // ---- transforms --------------------------------------------------------

    fn transform_attr(&self, id: EntityId, name: &str) -> f64 {
        self.attr(&Plug::new(id, name)).unwrap_or(0.0)
    }

    pub fn local_matrix(&self, id: EntityId) -> ShotkitResult<DMat4> {
        let entity = self.entity(id)?;
        if matches!(entity.kind, EntityKind::Formula(_)) {
            return Ok(DMat4::IDENTITY);
        }
        let t = DVec3::new(
            self.transform_attr(id, "translate_x"),
            self.transform_attr(id, "translate_y"),
            self.transform_attr(id, "translate_z"),
        );
        let r = DQuat::from_euler(
            EulerRot::XYZ,
            self.transform_attr(id, "rotate_x").to_radians(),
            self.transform_attr(id, "rotate_y").to_radians(),
            self.transform_attr(id, "rotate_z").to_radians(),
        );
        let s = DVec3::new(
            self.transform_attr(id, "scale_x"),
            self.transform_attr(id, "scale_y"),
            self.transform_attr(id, "scale_z"),
        );
        Ok(DMat4::from_scale_rotation_translation(s, r, t))
    }

    pub fn world_matrix(&self, id: EntityId) -> ShotkitResult<DMat4> {
        let local = self.local_matrix(id)?;
        match self.entity(id)?.parent {
            Some(parent) => Ok(self.world_matrix(parent)? * local),
            None => Ok(local),
        }
    }

    fn write_trs(&mut self, id: EntityId, m: DMat4) {
        let (s, r, t) = m.to_scale_rotation_translation();
        let (rx, ry, rz) = r.to_euler(EulerRot::XYZ);
        for (attr, v) in [
            ("translate_x", t.x),
            ("translate_y", t.y),
            ("translate_z", t.z),
            ("rotate_x", rx.to_degrees()),
            ("rotate_y", ry.to_degrees()),
            ("rotate_z", rz.to_degrees()),
            ("scale_x", s.x),
            ("scale_y", s.y),
            ("scale_z", s.z),
        ] {
            self.write_raw(&Plug::new(id, attr), v);
        }
    }

    /// Places `id` at the given world matrix by rewriting its local TRS.
    pub fn set_world_transform(&mut self, id: EntityId, world: DMat4) -> ShotkitResult<()> {
        let parent_world = match self.entity(id)?.parent {
            Some(parent) => self.world_matrix(parent)?,
            None => DMat4::IDENTITY,
        };
        self.write_trs(id, parent_world.inverse() * world);
        Ok(())
    }

    /// Folds the entity's local transform into its children (and its own
    /// curve points, if any), then resets the local transform to identity.
    pub fn freeze_transform(&mut self, id: EntityId) -> ShotkitResult<()> {
        let local = self.local_matrix(id)?;
        for child in self.children(id) {
            let child_local = self.local_matrix(child)?;
            self.write_trs(child, local * child_local);
        }
        if let EntityKind::CurveShape { points } = &mut self.entity_mut(id)?.kind {
            for p in points.iter_mut() {
                *p = local.transform_point3(*p);
            }
        }
        self.write_trs(id, DMat4::IDENTITY);
        Ok(())
    }

    // ---- queries -----------------------------------------------------------

    pub fn cameras(&self) -> Vec<EntityId> {
        self.entities
            .iter()
            .filter(|e| matches!(e.kind, EntityKind::Camera { .. }))
            .map(|e| e.id)
            .collect()
    }

    /// Resolves `id` to a camera: itself, or the first camera among its
    /// descendants.
    pub fn camera_descendant(&self, id: EntityId) -> Option<EntityId> {
        let entity = self.entity(id).ok()?;
        if matches!(entity.kind, EntityKind::Camera { .. }) {
            return Some(id);
        }
        for child in self.children(id) {
            if let Some(cam) = self.camera_descendant(child) {
                return Some(cam);
            }
        }
        None
    }

    pub fn is_startup_camera(&self, id: EntityId) -> bool {
        matches!(
            self.entity(id).map(|e| &e.kind),
            Ok(EntityKind::Camera { startup: true })
        )
    }

    /// Transform parents of every mesh shape in the scene, for isolation.
    pub fn mesh_transforms(&self) -> Vec<EntityId> {
        self.entities
            .iter()
            .filter(|e| matches!(e.kind, EntityKind::Mesh))
            .filter_map(|e| e.parent)
            .collect()
    }

    pub fn select(&mut self, entities: Vec<EntityId>) {
        self.selection.entities = entities;
        self.selection.keys = None;
    }

    pub fn select_keys(&mut self, plug: Plug, times: Vec<f64>) {
        self.selection.keys = Some(KeySelection { plug, times });
    }
}

fn clamp_to(value: f64, bounds: Option<(f64, f64)>) -> f64 {
    match bounds {
        Some((min, max)) => value.clamp(min, max),
        None => value,
    }
}

/// Whole-frame sample times covering `[min, max]`, end inclusive.
pub(crate) fn frame_times(min: f64, max: f64) -> Vec<f64> {
    let mut times = Vec::new();
    let mut t = min;
    while t < max - crate::anim::TIME_EPSILON {
        times.push(t);
        t += 1.0;
    }
    times.push(max);
    times
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn scene_with_camera() -> (Scene, EntityId) {
        let mut scene = Scene::new();
        let cam = scene.add_camera("shot_cam", false).unwrap();
        (scene, cam)
    }

    #[test]
    fn bounded_attr_clamps_on_write_and_key() {
        let (mut scene, cam) = scene_with_camera();
        scene
            .add_attr(cam, "alpha", AttrSpec::bounded(100.0, 80.0, 157.0))
            .unwrap();
        let plug = Plug::new(cam, "alpha");

        scene.set_attr(&plug, 500.0).unwrap();
        assert_eq!(scene.attr(&plug).unwrap(), 157.0);

        scene.set_key(&plug, Keyframe::auto(1.0, 10.0)).unwrap();
        assert_eq!(scene.curve(&plug).unwrap().unwrap().keys()[0].value, 80.0);

        scene.cut_keys(&plug).unwrap();
        assert!(scene.curve(&plug).unwrap().unwrap().is_empty());
    }

    #[test]
    fn connect_syncs_and_propagates() {
        let (mut scene, cam) = scene_with_camera();
        let grp = scene.add_transform("grp").unwrap();
        let src = Plug::new(cam, FOCAL_LENGTH);
        let dst = Plug::new(grp, "scale_x");

        scene.connect(&src, &dst).unwrap();
        assert_eq!(scene.attr(&dst).unwrap(), 35.0);

        scene.set_attr(&src, 50.0).unwrap();
        assert_eq!(scene.attr(&dst).unwrap(), 50.0);

        // one incoming link per plug
        assert!(scene.connect(&src, &dst).is_err());
    }

    #[test]
    fn formula_chain_recomputes_live() {
        let mut scene = Scene::new();
        let cam = scene.add_camera("cam", false).unwrap();
        let mul = scene.add_formula("mm", FormulaKind::Mul).unwrap();

        scene
            .connect(&Plug::new(cam, APERTURE_H), &Plug::new(mul, "in1_x"))
            .unwrap();
        scene.set_attr(&Plug::new(mul, "in2_x"), 25.4).unwrap();
        assert_relative_eq!(
            scene.attr(&Plug::new(mul, "out_x")).unwrap(),
            1.417 * 25.4,
            epsilon = 1e-9
        );

        scene.set_attr(&Plug::new(cam, APERTURE_H), 2.0).unwrap();
        assert_relative_eq!(
            scene.attr(&Plug::new(mul, "out_x")).unwrap(),
            50.8,
            epsilon = 1e-9
        );
    }

    #[test]
    fn division_by_zero_emits_zero() {
        let mut scene = Scene::new();
        let div = scene.add_formula("d", FormulaKind::Div).unwrap();
        scene.set_attr(&Plug::new(div, "in1_x"), 10.0).unwrap();
        scene.set_attr(&Plug::new(div, "in2_x"), 0.0).unwrap();
        assert_eq!(scene.attr(&Plug::new(div, "out_x")).unwrap(), 0.0);
    }

    #[test]
    fn sample_pulls_through_binding_and_curve() {
        let (mut scene, cam) = scene_with_camera();
        scene
            .add_attr(cam, "alpha", AttrSpec::bounded(100.0, 80.0, 157.0))
            .unwrap();
        let alpha = Plug::new(cam, "alpha");
        let focal = Plug::new(cam, FOCAL_LENGTH);

        scene.set_key(&alpha, Keyframe::auto(1.0, 150.0)).unwrap();
        scene.set_key(&alpha, Keyframe::auto(10.0, 155.0)).unwrap();
        scene
            .bind_expr(&focal, &alpha, ScalarExpr::Tan { divisor: 100.0 })
            .unwrap();

        let v = scene.sample_plug(&focal, 1.0).unwrap();
        assert_relative_eq!(v, (1.5_f64).tan(), epsilon = 1e-9);
    }

    #[test]
    fn bake_materializes_keys_and_drops_binding() {
        let (mut scene, cam) = scene_with_camera();
        scene
            .add_attr(cam, "alpha", AttrSpec::bounded(100.0, 80.0, 157.0))
            .unwrap();
        let alpha = Plug::new(cam, "alpha");
        let focal = Plug::new(cam, FOCAL_LENGTH);

        scene.set_key(&alpha, Keyframe::auto(1.0, 150.0)).unwrap();
        scene.set_key(&alpha, Keyframe::auto(5.0, 155.0)).unwrap();
        scene
            .bind_expr(&focal, &alpha, ScalarExpr::Tan { divisor: 100.0 })
            .unwrap();

        let baked = scene.bake_plug(&focal, 1.0, 5.0).unwrap();
        assert_eq!(baked, 5);
        assert!(scene.binding_for(&focal).is_none());
        let curve = scene.curve(&focal).unwrap().unwrap();
        assert_eq!(curve.len(), 5);
        assert_relative_eq!(curve.eval(5.0).unwrap(), (1.55_f64).tan(), epsilon = 1e-9);
    }

    #[test]
    fn world_matrix_composes_parent_chain() {
        let mut scene = Scene::new();
        let a = scene.add_transform("a").unwrap();
        let b = scene.add_transform("b").unwrap();
        scene.set_parent(b, a).unwrap();
        scene.set_attr(&Plug::new(a, "translate_x"), 2.0).unwrap();
        scene.set_attr(&Plug::new(b, "translate_x"), 3.0).unwrap();

        let w = scene.world_matrix(b).unwrap();
        assert_relative_eq!(w.w_axis.x, 5.0, epsilon = 1e-12);
    }

    #[test]
    fn freeze_folds_transform_into_curve_points() {
        let mut scene = Scene::new();
        let crv = scene
            .add_curve("c", vec![DVec3::new(1.0, 0.0, 0.0)])
            .unwrap();
        scene.set_attr(&Plug::new(crv, "translate_x"), 4.0).unwrap();
        scene.freeze_transform(crv).unwrap();

        let entity = scene.entity(crv).unwrap();
        let EntityKind::CurveShape { points } = &entity.kind else {
            panic!("curve kind");
        };
        assert_relative_eq!(points[0].x, 5.0, epsilon = 1e-12);
        assert_eq!(scene.attr(&Plug::new(crv, "translate_x")).unwrap(), 0.0);
    }

    #[test]
    fn parenting_cycles_are_rejected() {
        let mut scene = Scene::new();
        let a = scene.add_transform("a").unwrap();
        let b = scene.add_transform("b").unwrap();
        scene.set_parent(b, a).unwrap();
        assert!(scene.set_parent(a, b).is_err());
        assert!(scene.set_parent(a, a).is_err());
    }

    #[test]
    fn delete_entity_removes_subtree_and_edges() {
        let mut scene = Scene::new();
        let cam = scene.add_camera("cam", false).unwrap();
        let grp = scene.add_transform("grp").unwrap();
        let crv = scene.add_curve("crv", Vec::new()).unwrap();
        scene.set_parent(crv, grp).unwrap();
        scene
            .connect(&Plug::new(cam, FOCAL_LENGTH), &Plug::new(crv, "scale_x"))
            .unwrap();

        scene.delete_entity(grp).unwrap();
        assert!(scene.entity(crv).is_err());
        assert!(
            scene
                .input_connection(&Plug::new(crv, "scale_x"))
                .is_none()
        );
    }
}
