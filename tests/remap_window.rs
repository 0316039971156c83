use approx::assert_relative_eq;
use shotkit::{
    CurveRemap, Keyframe, Plug, Scene, ShotkitError, TimeRange,
    scene::FOCAL_LENGTH,
};

/// Focal curve with keys at [5, 10, 20, 30, 40] and values [1, 24, 35, 50, 2]
/// on a camera, playback range [1, 100].
fn focal_scene() -> (Scene, Plug) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let mut scene = Scene::new();
    scene.playback = TimeRange::new(1.0, 100.0).unwrap();
    let cam = scene.add_camera("shot_cam", false).unwrap();
    let plug = Plug::new(cam, FOCAL_LENGTH);
    for (t, v) in [(5.0, 1.0), (10.0, 24.0), (20.0, 35.0), (30.0, 50.0), (40.0, 2.0)] {
        scene.set_key(&plug, Keyframe::auto(t, v)).unwrap();
    }
    (scene, plug)
}

#[test]
fn boundary_keys_survive_bit_identical() {
    let (mut scene, plug) = focal_scene();
    scene.select_keys(plug.clone(), vec![10.0, 20.0, 30.0]);

    let report = CurveRemap { time_offset: 5 }.run(&mut scene).unwrap();
    assert_eq!(report.window, (10.0, 30.0));
    assert_eq!(report.preserved_keys, 2);

    let curve = scene.curve(&plug).unwrap().unwrap();
    let head = curve.key_at(5.0).unwrap();
    let tail = curve.key_at(40.0).unwrap();
    assert_eq!(head.value, 1.0);
    assert_eq!(tail.value, 2.0);

    // baked frame per frame over the window, boundary keys on top
    assert_eq!(curve.len(), 21 + 2);
    let times: Vec<f64> = curve.keys().iter().map(|k| k.time).collect();
    assert!(times.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn window_is_warped_through_the_alpha_domain() {
    let (mut scene, plug) = focal_scene();
    scene.select_keys(plug.clone(), vec![10.0, 20.0, 30.0]);

    CurveRemap { time_offset: 5 }.run(&mut scene).unwrap();
    let curve = scene.curve(&plug).unwrap().unwrap();

    // start value survives in place
    assert_relative_eq!(curve.key_at(10.0).unwrap().value, 24.0, epsilon = 1e-9);
    // the end value authored at 20+5 lands on the window's end key
    assert_relative_eq!(curve.key_at(30.0).unwrap().value, 50.0, epsilon = 1e-9);

    // the warp keeps the window monotone for a monotone selection
    let mut prev = f64::NEG_INFINITY;
    for k in curve.keys_in(10.0, 30.0) {
        assert!(k.value >= prev - 1e-9, "window dips at {}: {}", k.time, k.value);
        prev = k.value;
    }
}

#[test]
fn rejected_selection_leaves_the_scene_untouched() {
    let (mut scene, plug) = focal_scene();

    for bad in [
        vec![10.0, 20.0],
        vec![5.0, 10.0, 20.0, 30.0],
    ] {
        scene.select_keys(plug.clone(), bad);
        let before = serde_json::to_string(&scene).unwrap();
        let err = CurveRemap { time_offset: 5 }.run(&mut scene).unwrap_err();
        assert!(matches!(err, ShotkitError::Precondition(_)));
        assert_eq!(serde_json::to_string(&scene).unwrap(), before);
    }
}

#[test]
fn non_camera_curves_are_rejected_untouched() {
    let mut scene = Scene::new();
    let prop = scene.add_transform("prop").unwrap();
    let plug = Plug::new(prop, "translate_y");
    for t in [1.0, 2.0, 3.0] {
        scene.set_key(&plug, Keyframe::auto(t, t * 2.0)).unwrap();
    }
    scene.select_keys(plug.clone(), vec![1.0, 2.0, 3.0]);

    let before = serde_json::to_string(&scene).unwrap();
    let err = CurveRemap { time_offset: 2 }.run(&mut scene).unwrap_err();
    assert!(matches!(err, ShotkitError::Selection(_)));
    assert_eq!(serde_json::to_string(&scene).unwrap(), before);
}

#[test]
fn remap_resolves_cameras_through_their_transform() {
    let mut scene = Scene::new();
    scene.playback = TimeRange::new(1.0, 100.0).unwrap();
    let rig = scene.add_transform("crane").unwrap();
    let cam = scene.add_camera("crane_cam", false).unwrap();
    scene.set_parent(cam, rig).unwrap();

    // focal-equivalent parameter animated on the transform
    let plug = Plug::new(rig, "translate_z");
    for (t, v) in [(10.0, 24.0), (20.0, 35.0), (30.0, 50.0)] {
        scene.set_key(&plug, Keyframe::auto(t, v)).unwrap();
    }
    scene.select_keys(plug.clone(), vec![10.0, 20.0, 30.0]);

    let report = CurveRemap { time_offset: 5 }.run(&mut scene).unwrap();
    assert_eq!(report.camera, cam);
    assert_relative_eq!(
        scene.curve(&plug).unwrap().unwrap().key_at(30.0).unwrap().value,
        50.0,
        epsilon = 1e-9
    );
}
