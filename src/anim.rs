use crate::error::{ShotkitError, ShotkitResult};

/// Two key times closer than this are the same key.
pub const TIME_EPSILON: f64 = 1e-6;

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TangentMode {
    /// Host-computed slope balancing both neighbours, flattened at extrema.
    Auto,
    Flat,
    Linear,
}

#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Keyframe {
    pub time: f64,
    pub value: f64,
    pub tan_in: TangentMode,
    pub tan_out: TangentMode,
}

impl Keyframe {
    pub fn auto(time: f64, value: f64) -> Self {
        Self {
            time,
            value,
            tan_in: TangentMode::Auto,
            tan_out: TangentMode::Auto,
        }
    }
}

/// Ordered keyframe sequence for one scalar parameter.
///
/// Key times are strictly increasing (unique); every mutation preserves the
/// invariant or fails without touching the curve.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AnimCurve {
    keys: Vec<Keyframe>,
}

impl AnimCurve {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs(pairs: &[(f64, f64)]) -> ShotkitResult<Self> {
        let mut curve = Self::new();
        for &(t, v) in pairs {
            curve.set_key(Keyframe::auto(t, v))?;
        }
        Ok(curve)
    }

    pub fn keys(&self) -> &[Keyframe] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn validate(&self) -> ShotkitResult<()> {
        if self
            .keys
            .iter()
            .any(|k| !k.time.is_finite() || !k.value.is_finite())
        {
            return Err(ShotkitError::scene("curve keys must be finite"));
        }
        if !self
            .keys
            .windows(2)
            .all(|w| w[1].time - w[0].time > TIME_EPSILON)
        {
            return Err(ShotkitError::scene(
                "curve key times must be strictly increasing",
            ));
        }
        Ok(())
    }

    fn index_at(&self, time: f64) -> Option<usize> {
        self.keys
            .iter()
            .position(|k| (k.time - time).abs() <= TIME_EPSILON)
    }

    pub fn key_at(&self, time: f64) -> Option<Keyframe> {
        self.index_at(time).map(|i| self.keys[i])
    }

    /// Sets a key, replacing any existing key at the same time.
    pub fn set_key(&mut self, key: Keyframe) -> ShotkitResult<()> {
        if !key.time.is_finite() || !key.value.is_finite() {
            return Err(ShotkitError::scene("curve keys must be finite"));
        }
        if let Some(i) = self.index_at(key.time) {
            self.keys[i] = Keyframe {
                time: self.keys[i].time,
                ..key
            };
            return Ok(());
        }
        let i = self.keys.partition_point(|k| k.time < key.time);
        self.keys.insert(i, key);
        Ok(())
    }

    /// Inserts a key at `time` whose value is the curve's current value there,
    /// so the sampled shape is preserved up to tangent recomputation.
    pub fn insert_key_preserving(&mut self, time: f64) -> ShotkitResult<()> {
        if self.index_at(time).is_some() {
            return Ok(());
        }
        let value = self
            .eval(time)
            .ok_or_else(|| ShotkitError::scene("cannot insert into an empty curve"))?;
        self.set_key(Keyframe::auto(time, value))
    }

    /// Moves the key at `from` to `to`, keeping its value and tangent modes.
    pub fn retime_key(&mut self, from: f64, to: f64) -> ShotkitResult<()> {
        let i = self
            .index_at(from)
            .ok_or_else(|| ShotkitError::scene(format!("no key at time {from} to retime")))?;
        if (from - to).abs() <= TIME_EPSILON {
            return Ok(());
        }
        if self.index_at(to).is_some() {
            return Err(ShotkitError::scene(format!(
                "retime target {to} is already keyed"
            )));
        }
        let mut key = self.keys.remove(i);
        key.time = to;
        self.set_key(key)
    }

    pub fn cut_all(&mut self) {
        self.keys.clear();
    }

    /// Keys with `min <= time <= max`, in time order.
    pub fn keys_in(&self, min: f64, max: f64) -> Vec<Keyframe> {
        self.keys
            .iter()
            .copied()
            .filter(|k| min <= k.time && k.time <= max)
            .collect()
    }

    pub fn replace_all(&mut self, keys: Vec<Keyframe>) -> ShotkitResult<()> {
        let staged = Self { keys };
        staged.validate()?;
        *self = staged;
        Ok(())
    }

    pub fn set_all_tangents(&mut self, mode: TangentMode) {
        for k in &mut self.keys {
            k.tan_in = mode;
            k.tan_out = mode;
        }
    }

    /// Samples the curve at `time`; `None` when the curve has no keys.
    ///
    /// Hermite interpolation between keys; values clamp to the end keys
    /// outside the keyed range.
    pub fn eval(&self, time: f64) -> Option<f64> {
        if self.keys.is_empty() {
            return None;
        }
        if let Some(i) = self.index_at(time) {
            return Some(self.keys[i].value);
        }
        let first = self.keys[0];
        let last = self.keys[self.keys.len() - 1];
        if time <= first.time {
            return Some(first.value);
        }
        if time >= last.time {
            return Some(last.value);
        }

        let hi = self.keys.partition_point(|k| k.time < time);
        let (a, b) = (self.keys[hi - 1], self.keys[hi]);
        let dt = b.time - a.time;
        let t = (time - a.time) / dt;

        let m0 = self.slope(hi - 1, a.tan_out, Side::Out);
        let m1 = self.slope(hi, b.tan_in, Side::In);

        let t2 = t * t;
        let t3 = t2 * t;
        let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
        let h10 = t3 - 2.0 * t2 + t;
        let h01 = -2.0 * t3 + 3.0 * t2;
        let h11 = t3 - t2;
        Some(h00 * a.value + h10 * dt * m0 + h01 * b.value + h11 * dt * m1)
    }

    fn secant(&self, i: usize, j: usize) -> f64 {
        let (a, b) = (self.keys[i], self.keys[j]);
        (b.value - a.value) / (b.time - a.time)
    }

    fn slope(&self, i: usize, mode: TangentMode, side: Side) -> f64 {
        match mode {
            TangentMode::Flat => 0.0,
            TangentMode::Linear => match side {
                Side::In if i > 0 => self.secant(i - 1, i),
                Side::Out if i + 1 < self.keys.len() => self.secant(i, i + 1),
                _ => 0.0,
            },
            TangentMode::Auto => {
                if i == 0 || i + 1 >= self.keys.len() {
                    return 0.0; // flat endpoints
                }
                let before = self.secant(i - 1, i);
                let after = self.secant(i, i + 1);
                if before * after <= 0.0 {
                    return 0.0; // local extremum, no overshoot
                }
                self.secant(i - 1, i + 1)
            }
        }
    }
}

#[derive(Clone, Copy)]
enum Side {
    In,
    Out,
}
