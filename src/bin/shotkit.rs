use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
};

use anyhow::Context as _;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "shotkit", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Time-warp the selected 3-key focal window (uses the key selection
    /// stored in the scene).
    Remap(RemapArgs),
    /// Build a golden-ratio spiral guide for the resolved camera.
    Spiral(SpiralArgs),
    /// Build (or toggle) the thirds framing guide for the resolved camera.
    Thirds(ThirdsArgs),
}

#[derive(Parser, Debug)]
struct RemapArgs {
    /// Input scene JSON.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Output scene JSON.
    #[arg(long)]
    out: PathBuf,

    /// Frame offset for the warped middle sample (>= 1).
    #[arg(long)]
    offset: i64,
}

#[derive(Parser, Debug)]
struct SpiralArgs {
    /// Input scene JSON.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Output scene JSON.
    #[arg(long)]
    out: PathBuf,

    /// Number of quarter arcs.
    #[arg(long, default_value_t = 15)]
    iterations: usize,

    /// Samples per quarter arc.
    #[arg(long, default_value_t = 16)]
    points_per_section: usize,

    /// Camera name; the scene selection decides when omitted.
    #[arg(long)]
    camera: Option<String>,
}

#[derive(Parser, Debug)]
struct ThirdsArgs {
    /// Input scene JSON.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Output scene JSON.
    #[arg(long)]
    out: PathBuf,

    /// Camera name; the scene selection decides when omitted.
    #[arg(long)]
    camera: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Command::Remap(args) => cmd_remap(args),
        Command::Spiral(args) => cmd_spiral(args),
        Command::Thirds(args) => cmd_thirds(args),
    }
}

fn read_scene(path: &Path) -> anyhow::Result<shotkit::Scene> {
    let f = File::open(path).with_context(|| format!("open scene '{}'", path.display()))?;
    let r = BufReader::new(f);
    let scene: shotkit::Scene = serde_json::from_reader(r).with_context(|| "parse scene JSON")?;
    Ok(scene)
}

fn write_scene(path: &Path, scene: &shotkit::Scene) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }
    let f = File::create(path).with_context(|| format!("write scene '{}'", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(f), scene)
        .with_context(|| "serialize scene JSON")?;
    Ok(())
}

fn select_camera(ctx: &mut shotkit::ToolContext, name: Option<&str>) -> anyhow::Result<()> {
    if let Some(name) = name {
        let id = ctx
            .scene
            .find(name)
            .with_context(|| format!("no entity named '{name}' in the scene"))?;
        ctx.set_selection(vec![id]);
    }
    Ok(())
}

fn cmd_remap(args: RemapArgs) -> anyhow::Result<()> {
    let scene = read_scene(&args.in_path)?;
    let mut ctx = shotkit::ToolContext::new(scene);

    let report = ctx.remap_focal(args.offset)?;
    eprintln!(
        "remapped '{}': {} keys baked over [{}, {}], {} boundary keys kept",
        report.plug, report.baked_keys, report.window.0, report.window.1, report.preserved_keys
    );

    write_scene(&args.out, &ctx.into_scene())?;
    eprintln!("wrote {}", args.out.display());
    Ok(())
}

fn cmd_spiral(args: SpiralArgs) -> anyhow::Result<()> {
    let scene = read_scene(&args.in_path)?;
    let mut ctx = shotkit::ToolContext::new(scene);
    select_camera(&mut ctx, args.camera.as_deref())?;

    let curve = ctx.build_spiral(args.iterations, args.points_per_section)?;
    eprintln!("built spiral guide '{}'", ctx.scene.name(curve)?);

    write_scene(&args.out, &ctx.into_scene())?;
    eprintln!("wrote {}", args.out.display());
    Ok(())
}

fn cmd_thirds(args: ThirdsArgs) -> anyhow::Result<()> {
    let scene = read_scene(&args.in_path)?;
    let mut ctx = shotkit::ToolContext::new(scene);
    select_camera(&mut ctx, args.camera.as_deref())?;

    let grp = ctx.build_thirds()?;
    eprintln!("thirds guide '{}'", ctx.scene.name(grp)?);

    write_scene(&args.out, &ctx.into_scene())?;
    eprintln!("wrote {}", args.out.display());
    Ok(())
}
