use glam::DVec3;
use kurbo::{Point, Vec2};

use crate::{
    core::{EntityId, GOLDEN_RATIO, Plug},
    error::{ShotkitError, ShotkitResult},
    guides::{self, Panel},
    scale_sync::ScaleSyncGraph,
    scene::{EntityKind, Scene},
};

/// One quarter-arc of the spiral: sweep from `start` to `end` around
/// `center`. Successive triples are contiguous (`end` of one is `start` of
/// the next).
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SpiralTriple {
    pub start: Point,
    pub center: Point,
    pub end: Point,
}

/// Lazy, infinite source of golden-ratio quarter-arc triples.
///
/// The arc offset starts at 1.0 and divides by the ratio after every yield,
/// so `offset_i = ratio^-i`. The sequence only restarts through an explicit
/// [`reset`](Self::reset).
#[derive(Clone, Debug)]
pub struct SpiralPointGenerator {
    ratio: f64,
    current: Point,
    offset: f64,
    cycle: u8,
}

impl SpiralPointGenerator {
    pub fn new() -> Self {
        Self::with_ratio(GOLDEN_RATIO)
    }

    pub fn with_ratio(ratio: f64) -> Self {
        Self {
            ratio,
            current: Point::ORIGIN,
            offset: 1.0,
            cycle: 0,
        }
    }

    pub fn reset(&mut self) {
        self.current = Point::ORIGIN;
        self.offset = 1.0;
        self.cycle = 0;
    }

    /// Current arc offset, for inspection; strictly decreasing toward 0.
    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn next_triple(&mut self) -> SpiralTriple {
        let xdir = if self.cycle < 2 { 1.0 } else { -1.0 };
        let ydir = if self.cycle == 0 || self.cycle == 3 {
            1.0
        } else {
            -1.0
        };
        let end = self.current + Vec2::new(xdir * self.offset, ydir * self.offset);
        // the centre sits on the corner shared with the previous arc
        let center = if self.cycle % 2 == 1 {
            Point::new(self.current.x, end.y)
        } else {
            Point::new(end.x, self.current.y)
        };

        let triple = SpiralTriple {
            start: self.current,
            center,
            end,
        };
        self.current = end;
        self.offset /= self.ratio;
        self.cycle = (self.cycle + 1) % 4;
        triple
    }
}

impl Default for SpiralPointGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl Iterator for SpiralPointGenerator {
    type Item = SpiralTriple;

    fn next(&mut self) -> Option<SpiralTriple> {
        Some(self.next_triple())
    }
}

/// A realized quarter arc: a triple plus radius and sample count, consumed
/// by stitching.
#[derive(Clone, Copy, Debug)]
pub struct ArcSegment {
    pub triple: SpiralTriple,
    pub radius: f64,
    pub sections: usize,
}

impl ArcSegment {
    pub fn from_triple(triple: SpiralTriple, sections: usize) -> Self {
        let radius = (triple.start - triple.center).hypot();
        Self {
            triple,
            radius,
            sections,
        }
    }

    fn sweep(&self) -> f64 {
        let v0 = self.triple.start - self.triple.center;
        let v1 = self.triple.end - self.triple.center;
        let mut sweep = v1.atan2() - v0.atan2();
        if sweep > std::f64::consts::PI {
            sweep -= std::f64::consts::TAU;
        }
        if sweep <= -std::f64::consts::PI {
            sweep += std::f64::consts::TAU;
        }
        sweep
    }

    pub fn arc_length(&self) -> f64 {
        self.radius * self.sweep().abs()
    }

    /// `sections + 1` points along the arc; the first and last are the exact
    /// triple endpoints so adjoining segments share knots bit-for-bit.
    pub fn sample(&self) -> Vec<Point> {
        let a0 = (self.triple.start - self.triple.center).atan2();
        let sweep = self.sweep();
        let mut points = Vec::with_capacity(self.sections + 1);
        points.push(self.triple.start);
        for k in 1..self.sections {
            let a = a0 + sweep * (k as f64 / self.sections as f64);
            points.push(self.triple.center + self.radius * Vec2::new(a.cos(), a.sin()));
        }
        points.push(self.triple.end);
        points
    }
}

/// Stitches segment samples into one knot sequence, dropping the duplicate
/// joint point at every seam.
pub fn stitch_segments(segments: &[ArcSegment]) -> Vec<Point> {
    let mut knots = Vec::new();
    for (i, segment) in segments.iter().enumerate() {
        let samples = segment.sample();
        let skip = usize::from(i > 0);
        knots.extend(samples.into_iter().skip(skip));
    }
    knots
}

/// Builds a golden-ratio spiral guide curve in a camera's local frame and
/// wires it to the camera's scale sync graph.
#[derive(Clone, Copy, Debug)]
pub struct SpiralCurveBuilder {
    /// Number of quarter arcs.
    pub iterations: usize,
    /// Samples per quarter arc.
    pub points_per_section: usize,
}

impl SpiralCurveBuilder {
    #[tracing::instrument(skip(scene, panel))]
    pub fn build(
        &self,
        scene: &mut Scene,
        camera: EntityId,
        panel: Option<&mut Panel>,
    ) -> ShotkitResult<EntityId> {
        if self.iterations == 0 {
            return Err(ShotkitError::precondition("iterations must be > 0"));
        }
        if self.points_per_section == 0 {
            return Err(ShotkitError::precondition("points_per_section must be > 0"));
        }
        if !matches!(scene.entity(camera)?.kind, EntityKind::Camera { .. }) {
            return Err(ShotkitError::precondition(format!(
                "entity '{}' is not a camera",
                scene.name(camera)?
            )));
        }

        let cam_name = scene.name(camera)?.to_string();
        let (_root, cam_grp) = guides::ensure_rig_groups(scene, camera)?;

        let grp_name = format!("{cam_name}_spiral");
        let crv_name = format!("{cam_name}_spiral_curve");
        if scene.find(&grp_name).is_some() {
            // already built for this camera
            return scene.find(&crv_name).ok_or_else(|| {
                ShotkitError::scene(format!("spiral group '{grp_name}' exists without its curve"))
            });
        }

        let mut generator = SpiralPointGenerator::new();
        let segments: Vec<ArcSegment> = (0..self.iterations)
            .map(|_| ArcSegment::from_triple(generator.next_triple(), self.points_per_section))
            .collect();
        let knots = stitch_segments(&segments);
        // the planar spiral lies in the camera's image plane
        let points: Vec<DVec3> = knots.iter().map(|p| DVec3::new(p.x, 0.0, p.y)).collect();

        let spiral_grp = scene.add_transform(&grp_name)?;
        scene.set_parent(spiral_grp, cam_grp)?;
        let curve = scene.add_curve(&crv_name, points)?;
        scene.set_parent(curve, spiral_grp)?;

        // pin the group to the camera frame, bake that in, then centre the
        // spiral on the unit guide frame
        let world = scene.world_matrix(camera)?;
        scene.set_world_transform(spiral_grp, world)?;
        scene.freeze_transform(spiral_grp)?;
        scene.set_attr(&Plug::new(spiral_grp, "rotate_x"), -90.0)?;
        scene.set_attr(&Plug::new(curve, "translate_x"), -0.5)?;
        scene.set_attr(&Plug::new(curve, "translate_z"), -0.5)?;

        let graph = ScaleSyncGraph::ensure(scene, camera)?;
        graph.attach(scene, curve)?;

        if let Some(panel) = panel {
            guides::show_isolated(scene, panel, spiral_grp);
        } else {
            tracing::warn!(camera = %cam_name, "no panel shows this camera, skipping isolation");
        }
        Ok(curve)
    }
}
