use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use image::Rgba;
use log::{info, warn};
use simplelog::{Config, LevelFilter, WriteLogger};

use inkpane::ink::{
    Document, JsonSceneProvider, PageRenderContext, PageRenderer, ScreenRect, SizeTracker,
    Viewport, composite,
};
use inkpane::panic_handler::initialize_panic_handler;
use inkpane::settings::{self, Settings};

const PAPER: Rgba<u8> = Rgba([255, 255, 255, 255]);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Parser, Debug)]
#[command(version, about = "Render handwritten ink pages to PNG", long_about = None)]
struct Cli {
    /// Where to write the log
    #[arg(long, global = true, default_value = "inkpane.log")]
    log_file: PathBuf,

    /// Log at debug level regardless of settings
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Settings file to use instead of the one in the config directory
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render the visible part of a page into a PNG
    Render {
        /// Document directory
        document: PathBuf,
        /// Page id (the JSON file name without extension)
        page: String,
        #[arg(long, short)]
        output: PathBuf,
        /// User zoom on top of fit-to-width
        #[arg(long, default_value_t = 1.0)]
        zoom: f64,
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        pan_x: f64,
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        pan_y: f64,
        #[arg(long, default_value_t = 1000)]
        width: u32,
        #[arg(long, default_value_t = 800)]
        height: u32,
        /// Fixed tile dispatch order
        #[arg(long)]
        seed: Option<u64>,
        /// Give up waiting for tiles after this many seconds
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },
    /// Print a page's ink extent and frame layout
    Info {
        document: PathBuf,
        page: String,
        /// Viewport width used for the fit zoom
        #[arg(long, default_value_t = 1000)]
        width: u32,
    },
}

fn main() -> Result<()> {
    initialize_panic_handler();
    let cli = Cli::parse();

    match &cli.config {
        Some(path) => settings::load_settings_from_path(path),
        None => settings::load_settings(),
    }
    let settings = settings::get_settings();

    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        settings.log_level_filter()
    };
    WriteLogger::init(
        level,
        Config::default(),
        File::create(&cli.log_file)
            .with_context(|| format!("Failed to create log file {:?}", cli.log_file))?,
    )?;
    info!("Starting inkpane");

    let result = match cli.command {
        Command::Render {
            document,
            page,
            output,
            zoom,
            pan_x,
            pan_y,
            width,
            height,
            seed,
            timeout,
        } => render(
            &settings,
            &document,
            &page,
            RenderArgs {
                output,
                zoom,
                pan: (pan_x, pan_y),
                size: (width, height),
                seed,
                timeout: Duration::from_secs(timeout),
            },
        ),
        Command::Info {
            document,
            page,
            width,
        } => print_info(&settings, &document, &page, width),
    };

    info!("Shutting down inkpane");
    result
}

struct RenderArgs {
    output: PathBuf,
    zoom: f64,
    pan: (f64, f64),
    size: (u32, u32),
    seed: Option<u64>,
    timeout: Duration,
}

fn open_document(path: &Path) -> Result<Document> {
    let root = path
        .canonicalize()
        .with_context(|| format!("Document directory {path:?} not found"))?;
    let id = root
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| root.display().to_string());
    Ok(Document::new(id, root))
}

fn wait_for_page(page: &PageRenderContext, deadline: Instant) -> Result<()> {
    while page.is_loading() {
        if Instant::now() >= deadline {
            bail!("Timed out loading page {}", page.page_id());
        }
        std::thread::sleep(POLL_INTERVAL);
    }
    if let Some(reason) = page.error() {
        bail!("Page {} cannot be shown: {reason}", page.page_id());
    }
    Ok(())
}

fn render(settings: &Settings, document: &Path, page_id: &str, args: RenderArgs) -> Result<()> {
    let mut config = settings.render_config();
    if args.seed.is_some() {
        config.shuffle_seed = args.seed;
    }

    let renderer = PageRenderer::new(Arc::new(JsonSceneProvider::new()), config);
    let document = open_document(document)?;
    let deadline = Instant::now() + args.timeout;

    let mut page = renderer.open_page(&document, page_id);
    wait_for_page(&page, deadline)?;

    let (width, height) = args.size;
    let viewport = Viewport::new(
        ScreenRect::new(0.0, 0.0, f64::from(width), f64::from(height)),
        args.pan,
    );

    let mut zoom = settings.zoom_state();
    let fit = page.fit_zoom(f64::from(width)).unwrap_or(1.0);
    zoom.set_base_zoom(fit);
    zoom.set_user_zoom(args.zoom, Instant::now());
    info!(
        "Rendering {}/{page_id} at zoom {:.3} into {width}x{height}",
        document.id,
        zoom.zoom()
    );

    let tiles = loop {
        let now = Instant::now();
        let tiles = page.visible_tiles_at(&viewport, &zoom, now);
        if zoom.is_settled(now) && !page.is_rendering() {
            break tiles;
        }
        if now >= deadline {
            warn!("Gave up waiting for tiles; writing what is ready");
            break tiles;
        }
        std::thread::sleep(POLL_INTERVAL);
    };

    let pending = tiles.iter().filter(|t| !t.is_final()).count();
    if pending > 0 {
        warn!("{pending} of {} tiles are placeholders", tiles.len());
    }

    let image = composite(&tiles, &viewport.screen, PAPER);
    image
        .save(&args.output)
        .with_context(|| format!("Failed to write {:?}", args.output))?;
    page.close();

    println!(
        "Wrote {:?} ({} tiles, {pending} placeholders)",
        args.output,
        tiles.len()
    );
    Ok(())
}

fn print_info(settings: &Settings, document: &Path, page_id: &str, width: u32) -> Result<()> {
    let renderer = PageRenderer::new(Arc::new(JsonSceneProvider::new()), settings.render_config());
    let document = open_document(document)?;

    let mut page = renderer.open_page(&document, page_id);
    wait_for_page(&page, Instant::now() + Duration::from_secs(30))?;

    let (Some(layout), Some(bbox)) = (page.layout(), page.bounding_box()) else {
        bail!("Page {page_id} has no layout");
    };
    let (first, last) =
        SizeTracker::from_layers([bbox]).frame_span(layout.frame_width, layout.frame_height);
    let fit = page.fit_zoom(f64::from(width)).unwrap_or(1.0);

    println!("page:        {}/{page_id}", document.id);
    println!(
        "frame size:  {:.1} x {:.1}",
        layout.frame_width, layout.frame_height
    );
    println!(
        "ink box:     top {:.1} left {:.1} bottom {:.1} right {:.1}",
        bbox.top, bbox.left, bbox.bottom, bbox.right
    );
    println!(
        "frames:      ({}, {}) to ({}, {})",
        first.x, first.y, last.x, last.y
    );
    println!("fit zoom:    {fit:.4} for width {width}");

    page.close();
    Ok(())
}
