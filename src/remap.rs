use crate::{
    anim::{Keyframe, TangentMode},
    core::{EntityId, Plug},
    error::{ShotkitError, ShotkitResult},
    scene::{AttrSpec, ScalarExpr, Scene, frame_times},
};

/// Synthetic parameter hosting the alpha mapping curve during a remap.
pub const ALPHA_ATTR: &str = "focal_alpha";

/// Value domain of the alpha parameter, in `100·atan` units; writes outside
/// it clamp.
pub const ALPHA_DOMAIN: (f64, f64) = (80.0, 157.0);

const ALPHA_SCALE: f64 = 100.0;

/// Focal value -> alpha domain. Near-bijective with [`from_alpha`] for any
/// finite input.
pub fn to_alpha(value: f64) -> f64 {
    ALPHA_SCALE * value.atan()
}

/// Inverse of [`to_alpha`].
pub fn from_alpha(alpha: f64) -> f64 {
    (alpha / ALPHA_SCALE).tan()
}

#[derive(Clone, Debug, PartialEq)]
pub struct RemapReport {
    pub plug: Plug,
    pub camera: EntityId,
    /// Window that was rebaked, `[time(K0), time(K2)]`.
    pub window: (f64, f64),
    pub baked_keys: usize,
    pub preserved_keys: usize,
}

/// Time-warps the selected 3-key window of a camera's focal curve.
///
/// The three selected key values move through the alpha domain
/// (`100·atan(v)`), are re-authored with the middle sample pushed
/// `time_offset` frames late and then retimed onto the window's end, and the
/// focal parameter is baked back through the inverse map. Keys outside the
/// window come out bit-identical.
///
/// All fallible work happens against the synthetic alpha parameter before the
/// focal curve is touched; the focal curve is rewritten in one commit, and
/// the alpha parameter never outlives the call.
#[derive(Clone, Copy, Debug)]
pub struct CurveRemap {
    /// Frame offset for the warped middle sample, >= 1.
    pub time_offset: i64,
}

impl CurveRemap {
    #[tracing::instrument(skip(scene))]
    pub fn run(&self, scene: &mut Scene) -> ShotkitResult<RemapReport> {
        // everything up to the alpha authoring is fail-fast and mutation-free
        if self.time_offset < 1 {
            return Err(ShotkitError::precondition("time offset must be >= 1"));
        }

        let Some(selection) = scene.selection.keys.clone() else {
            return Err(ShotkitError::selection(
                "select keys on a focal curve in the curve editor",
            ));
        };
        let plug = selection.plug;
        let Some(camera) = scene.camera_descendant(plug.entity) else {
            return Err(ShotkitError::selection(format!(
                "'{plug}' does not resolve to a camera"
            )));
        };

        let mut times = selection.times;
        times.sort_by(f64::total_cmp);
        times.dedup_by(|a, b| (*a - *b).abs() <= crate::anim::TIME_EPSILON);
        if times.len() != 3 {
            return Err(ShotkitError::precondition(
                "select exactly 3 keys on the focal curve",
            ));
        }
        let (t0, t1, t2) = (times[0], times[1], times[2]);

        let curve = scene
            .curve(&plug)?
            .ok_or_else(|| ShotkitError::selection(format!("'{plug}' has no animation")))?
            .clone();
        let mut values = [0.0; 3];
        for (v, t) in values.iter_mut().zip(&times) {
            *v = curve
                .key_at(*t)
                .ok_or_else(|| {
                    ShotkitError::selection(format!("selected time {t} is not keyed on '{plug}'"))
                })?
                .value;
        }

        let playback = scene.playback;
        if !playback.contains(t0) || !playback.contains(t2) {
            tracing::warn!(
                window = ?(t0, t2),
                playback = ?(playback.min, playback.max),
                "selected window extends beyond the playback range"
            );
        }

        // boundary keys to restore verbatim after the bake
        let preserved: Vec<Keyframe> = curve
            .keys()
            .iter()
            .copied()
            .filter(|k| {
                k.time < t0 - crate::anim::TIME_EPSILON || k.time > t2 + crate::anim::TIME_EPSILON
            })
            .collect();
        let preserved_keys = preserved.len();
        tracing::debug!(preserved_keys, "captured boundary keys");

        let (a0, a2) = (to_alpha(values[0]), to_alpha(values[2]));

        let alpha = Plug::new(camera, ALPHA_ATTR);
        if scene.has_attr(&alpha) {
            return Err(ShotkitError::scene(format!(
                "synthetic parameter '{ALPHA_ATTR}' already exists on the camera"
            )));
        }
        scene.add_attr(
            camera,
            ALPHA_ATTR,
            AttrSpec::bounded(a0, ALPHA_DOMAIN.0, ALPHA_DOMAIN.1),
        )?;

        let staged = self.warp_window(scene, &plug, &alpha, t0, t1, t2, a0, a2);

        // the synthetic parameter and its binding never outlive the call
        scene.unbind(&plug);
        scene.remove_attr(camera, ALPHA_ATTR)?;
        let baked = staged?;

        // single commit: warped window plus untouched boundary keys
        let mut keys = preserved;
        for (t, v) in &baked {
            keys.push(Keyframe::auto(*t, *v));
        }
        keys.sort_by(|a, b| a.time.total_cmp(&b.time));
        scene.replace_keys(&plug, keys)?;
        scene.set_curve_tangents(&plug, TangentMode::Auto)?;

        Ok(RemapReport {
            plug,
            camera,
            window: (t0, t2),
            baked_keys: baked.len(),
            preserved_keys,
        })
    }

    /// Authors the alpha mapping curve, binds the focal parameter to its
    /// inverse map, and samples the warped window frame by frame.
    fn warp_window(
        &self,
        scene: &mut Scene,
        plug: &Plug,
        alpha: &Plug,
        t0: f64,
        t1: f64,
        t2: f64,
        a0: f64,
        a2: f64,
    ) -> ShotkitResult<Vec<(f64, f64)>> {
        let warped = t1 + self.time_offset as f64;
        scene.set_key(alpha, Keyframe::auto(t0, a0))?;
        scene.set_key(alpha, Keyframe::auto(warped, a2))?;
        scene.insert_key(alpha, t1)?;
        // re-time the end sample onto the window's end key
        scene.retime_key(alpha, warped, t2)?;
        scene.set_curve_tangents(alpha, TangentMode::Auto)?;

        scene.bind_expr(
            plug,
            alpha,
            ScalarExpr::Tan {
                divisor: ALPHA_SCALE,
            },
        )?;

        let mut baked = Vec::new();
        for t in frame_times(t0, t2) {
            baked.push((t, scene.sample_plug(plug, t)?));
        }
        Ok(baked)
    }
}
