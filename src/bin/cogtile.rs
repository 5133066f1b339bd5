use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};

use cogtile::{
    BandFetcher, BandWindow, CogtileResult, RenderEngine, SampleBuffer, Scene, SceneEvent,
    TileEvent, TileSourceAdapter,
};

#[derive(Parser, Debug)]
#[command(name = "cogtile", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Report which rendering backend this build selects at startup.
    Probe,
    /// Render one tile of a scene as a PNG.
    Tile(TileArgs),
}

#[derive(Parser, Debug)]
struct TileArgs {
    /// Scene JSON (band sources are image paths, resolved as-is).
    #[arg(long)]
    scene: PathBuf,

    /// Tile coordinates.
    #[arg(short, default_value_t = 0)]
    z: u32,
    #[arg(short, default_value_t = 0)]
    x: u32,
    #[arg(short, default_value_t = 0)]
    y: u32,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,

    /// Backend to use.
    #[arg(long, value_enum, default_value_t = BackendChoice::Auto)]
    backend: BackendChoice,

    /// Print load lifecycle events to stderr.
    #[arg(long)]
    events: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BackendChoice {
    /// GPU when available (and built in), CPU otherwise.
    Auto,
    Cpu,
}

/// Reads band windows straight from image files. Locators are paths; the
/// tile coordinates are ignored because each file already is the window.
struct FileFetcher;

impl BandFetcher for FileFetcher {
    async fn fetch_window(
        &self,
        locator: &str,
        _z: u32,
        _x: u32,
        _y: u32,
    ) -> CogtileResult<BandWindow> {
        let img = image::open(locator)
            .map_err(|e| cogtile::CogtileError::decode(format!("open '{locator}': {e}")))?;
        let (width, height) = (img.width(), img.height());
        let window = match img {
            image::DynamicImage::ImageLuma8(band) => {
                BandWindow::new(width, height, SampleBuffer::U8(band.into_raw()))
            }
            image::DynamicImage::ImageLuma16(band) => {
                BandWindow::new(width, height, SampleBuffer::U16(band.into_raw()))
            }
            // Interleaved RGB sources for `is_rgb` scenes.
            image::DynamicImage::ImageRgb8(rgb) => {
                BandWindow::new(width, height, SampleBuffer::U8(rgb.into_raw()))
            }
            other => {
                return Err(cogtile::CogtileError::decode(format!(
                    "'{locator}': unsupported color type {:?}",
                    other.color()
                )));
            }
        };
        Ok(window)
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Command::Probe => cmd_probe(),
        Command::Tile(args) => cmd_tile(args),
    }
}

fn cmd_probe() -> anyhow::Result<()> {
    let engine = RenderEngine::new();
    println!("{:?}", engine.backend_kind());
    Ok(())
}

fn cmd_tile(args: TileArgs) -> anyhow::Result<()> {
    let scene_json =
        std::fs::read_to_string(&args.scene).with_context(|| {
            format!("read scene '{}'", args.scene.display())
        })?;
    let scene: Scene = serde_json::from_str(&scene_json).with_context(|| "parse scene JSON")?;
    let scene_id = scene.id.clone();

    let engine = match args.backend {
        BackendChoice::Auto => RenderEngine::new(),
        BackendChoice::Cpu => RenderEngine::cpu_only(),
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("build runtime")?;
    let (events_tx, mut events_rx) = tokio::sync::mpsc::unbounded_channel();
    let adapter = TileSourceAdapter::new(FileFetcher, engine, events_tx);
    adapter.apply_scene_event(SceneEvent::Added(scene))?;

    let tile = runtime.block_on(adapter.request_tile(&scene_id, args.z, args.x, args.y))?;

    if args.events {
        while let Ok(event) = events_rx.try_recv() {
            match event {
                TileEvent::LoadStart { key } => {
                    eprintln!("loadstart {}/{}/{}/{}", key.scene_id, key.z, key.x, key.y)
                }
                TileEvent::LoadEnd { key } => {
                    eprintln!("loadend   {}/{}/{}/{}", key.scene_id, key.z, key.x, key.y)
                }
                TileEvent::LoadError { key, message } => eprintln!(
                    "loaderror {}/{}/{}/{}: {message}",
                    key.scene_id, key.z, key.x, key.y
                ),
            }
        }
    }

    if let Some(parent) = args.out.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }
    image::save_buffer_with_format(
        &args.out,
        &tile.data,
        tile.width,
        tile.height,
        image::ColorType::Rgba8,
        image::ImageFormat::Png,
    )
    .with_context(|| format!("write png '{}'", args.out.display()))?;

    eprintln!("wrote {}", args.out.display());
    Ok(())
}
