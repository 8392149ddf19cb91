use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use directories::ProjectDirs;
use docview_core::{
    Bitmap, Command, DocumentSource, FileStateStore, MemoryStateStore, MemorySurfaceFactory,
    OutlineItem, PageNumber, PixelRect, Rotation, StateStore, ViewMode, ViewerConfig,
    ViewerEvent, ZoomControl,
};
use docview_render::{PdfiumProvider, Viewer};
use serde::Serialize;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

const HIGHLIGHT_COLOR: [u8; 3] = [255, 214, 10];
const HIGHLIGHT_ALPHA: f32 = 0.4;

#[derive(Debug, Parser)]
#[command(
    name = "docview",
    version,
    about = "Inspect, search and rasterize PDF documents"
)]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Do not read or write the saved view state
    #[arg(long, global = true)]
    no_state: bool,

    #[command(subcommand)]
    command: Subcommands,
}

#[derive(Debug, Subcommand)]
enum Subcommands {
    /// Print page count and metadata
    Info(DocumentArgs),
    /// Print the table of contents
    Outline(DocumentArgs),
    /// Find every occurrence of a query
    Search {
        #[command(flatten)]
        document: DocumentArgs,
        query: String,
    },
    /// Render one page to a PNG file
    Render {
        #[command(flatten)]
        document: DocumentArgs,
        /// Page to render (1-based)
        #[arg(short, long, default_value_t = 1)]
        page: PageNumber,
        /// Zoom factor, 0.5 to 3.0
        #[arg(short, long)]
        scale: Option<f32>,
        /// Clockwise quarter turns
        #[arg(short, long, default_value_t = 0)]
        rotate: u8,
        /// Highlight matches of this query on the page
        #[arg(long)]
        highlight: Option<String>,
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[derive(Debug, Args)]
struct DocumentArgs {
    /// Path or file:// URL of the document
    source: String,
    /// Emit JSON instead of text
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct InfoReport<'a> {
    source: String,
    pages: usize,
    version: &'a str,
    title: Option<&'a str>,
    author: Option<&'a str>,
    keywords: &'a [String],
}

#[derive(Serialize)]
struct OutlineRow<'a> {
    title: &'a str,
    page: PageNumber,
    depth: usize,
}

#[derive(Serialize)]
struct MatchRow<'a> {
    page: PageNumber,
    text: &'a str,
    before: &'a str,
    after: &'a str,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let project_dirs = ProjectDirs::from("org", "docview", "docview")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;

    let config = load_config(cli.config.as_deref())?;
    let store: Arc<dyn StateStore> = if cli.no_state {
        Arc::new(MemoryStateStore::new())
    } else {
        Arc::new(FileStateStore::new(
            project_dirs.data_local_dir().join("state"),
        )?)
    };

    let provider = Arc::new(PdfiumProvider::from_config(&config)?);
    let surfaces = Arc::new(MemorySurfaceFactory::new());
    let mut viewer = Viewer::new(config, provider, Arc::clone(&surfaces) as _).with_state_store(store);

    match cli.command {
        Subcommands::Info(args) => {
            open(&mut viewer, &args.source).await?;
            print_info(&viewer, &args)?;
        }
        Subcommands::Outline(args) => {
            open(&mut viewer, &args.source).await?;
            print_outline(&viewer.outline_items(), args.json)?;
        }
        Subcommands::Search { document, query } => {
            open(&mut viewer, &document.source).await?;
            viewer.search(&query).await?;
            log_search_progress(&viewer);
            print_matches(&viewer, document.json)?;
        }
        Subcommands::Render {
            document,
            page,
            scale,
            rotate,
            highlight,
            output,
        } => {
            open(&mut viewer, &document.source).await?;
            let options = RenderOptions {
                page,
                scale,
                rotate,
                highlight,
            };
            let bitmap = render_page(&mut viewer, &surfaces, &options).await?;
            write_png(&bitmap, &output)?;
            info!(page, path = %output.display(), "page written");
        }
    }

    viewer.close()?;
    Ok(())
}

struct RenderOptions {
    page: PageNumber,
    scale: Option<f32>,
    rotate: u8,
    highlight: Option<String>,
}

async fn render_page(
    viewer: &mut Viewer,
    surfaces: &MemorySurfaceFactory,
    options: &RenderOptions,
) -> Result<Bitmap> {
    let page = options.page;
    let pages = viewer.page_count();
    if page == 0 || page > pages {
        bail!("page {page} is out of range (document has {pages} pages)");
    }
    let rotation = Rotation::from_degrees(i32::from(options.rotate % 4) * 90)
        .ok_or_else(|| anyhow!("invalid rotation {}", options.rotate))?;

    viewer
        .apply(Command::SetViewMode {
            mode: ViewMode::Single,
        })
        .await?;
    viewer.apply(Command::GotoPage { page }).await?;
    viewer
        .apply(Command::SetZoom {
            scale: options.scale.unwrap_or(1.0),
            control: ZoomControl::Viewer,
        })
        .await?;
    viewer.apply(Command::SetRotation { rotation }).await?;
    viewer.apply(Command::RetryPage { page }).await?;

    let mut bitmap = surfaces
        .surface(page)
        .snapshot()
        .ok_or_else(|| anyhow!("page {page} was not rendered"))?;
    if let Some(query) = &options.highlight {
        let found = viewer.search(query).await?;
        debug!(found, "highlighting matches");
        apply_highlights(
            &mut bitmap,
            &viewer.highlights(page),
            viewer.config().device_pixel_ratio,
        );
    }
    Ok(bitmap)
}

fn load_config(explicit: Option<&Path>) -> Result<ViewerConfig> {
    match explicit {
        Some(path) => {
            if !path.exists() {
                bail!("config file {:?} does not exist", path);
            }
            ViewerConfig::load(path)
        }
        None => match ViewerConfig::default_path() {
            Some(path) => ViewerConfig::load(&path),
            None => Ok(ViewerConfig::default()),
        },
    }
}

fn parse_source(raw: &str) -> DocumentSource {
    if raw.contains("://") {
        DocumentSource::Url(raw.to_string())
    } else {
        DocumentSource::Path(PathBuf::from(raw))
    }
}

async fn open(viewer: &mut Viewer, raw: &str) -> Result<()> {
    let source = parse_source(raw);
    viewer
        .open(source)
        .await
        .with_context(|| format!("failed to open {raw}"))
}

fn print_info(viewer: &Viewer, args: &DocumentArgs) -> Result<()> {
    let document = viewer
        .document()
        .ok_or_else(|| anyhow!("no document is open"))?;
    let info = document.info();
    let report = InfoReport {
        source: args.source.clone(),
        pages: info.page_count,
        version: &info.version,
        title: info.metadata.title.as_deref(),
        author: info.metadata.author.as_deref(),
        keywords: &info.metadata.keywords,
    };
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    println!("source:   {}", report.source);
    println!("pages:    {}", report.pages);
    println!("title:    {}", report.title.unwrap_or("-"));
    println!("author:   {}", report.author.unwrap_or("-"));
    if !report.keywords.is_empty() {
        println!("keywords: {}", report.keywords.join(", "));
    }
    Ok(())
}

fn print_outline(items: &[OutlineItem], json: bool) -> Result<()> {
    if json {
        let rows: Vec<_> = items
            .iter()
            .map(|item| OutlineRow {
                title: &item.title,
                page: item.page,
                depth: item.depth,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    if items.is_empty() {
        println!("(no outline)");
    }
    for item in items {
        println!("{}", format_outline_line(item));
    }
    Ok(())
}

fn format_outline_line(item: &OutlineItem) -> String {
    format!("{}{}  ....  {}", "  ".repeat(item.depth), item.title, item.page)
}

fn print_matches(viewer: &Viewer, json: bool) -> Result<()> {
    let matches = viewer
        .search_results()
        .map(|results| results.matches())
        .unwrap_or_default();
    if json {
        let rows: Vec<_> = matches
            .iter()
            .map(|found| MatchRow {
                page: found.page,
                text: &found.match_text,
                before: &found.context_before,
                after: &found.context_after,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    for found in matches {
        println!(
            "page {}: {}[{}]{}",
            found.page, found.context_before, found.match_text, found.context_after
        );
    }
    println!("{} match(es)", matches.len());
    Ok(())
}

fn log_search_progress(viewer: &Viewer) {
    for event in viewer.events().drain() {
        match event {
            ViewerEvent::SearchProgress {
                matches_so_far,
                pages_scanned,
            } => debug!(matches_so_far, pages_scanned, "search progress"),
            ViewerEvent::RenderError { page, message } => {
                warn!(page, %message, "page failed to render")
            }
            _ => {}
        }
    }
}

fn apply_highlights(bitmap: &mut Bitmap, rects: &[PixelRect], device_pixel_ratio: f32) {
    let to_device = |value: f32| (value * device_pixel_ratio).max(0.0);
    for rect in rects {
        let x0 = (to_device(rect.left).floor() as u32).min(bitmap.width);
        let y0 = (to_device(rect.top).floor() as u32).min(bitmap.height);
        let x1 = (to_device(rect.left + rect.width).ceil() as u32).min(bitmap.width);
        let y1 = (to_device(rect.top + rect.height).ceil() as u32).min(bitmap.height);
        bitmap.fill_rect(x0, y0, x1, y1, HIGHLIGHT_COLOR, HIGHLIGHT_ALPHA);
    }
}

fn write_png(bitmap: &Bitmap, output: &Path) -> Result<()> {
    let image = image::RgbaImage::from_raw(bitmap.width, bitmap.height, bitmap.pixels.clone())
        .ok_or_else(|| anyhow!("bitmap buffer does not match its dimensions"))?;
    image
        .save_with_format(output, image::ImageFormat::Png)
        .with_context(|| format!("failed to write {:?}", output))
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "docview.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);
    let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    use docview_core::testing::{FakeDocument, FakeProvider};

    #[test]
    fn sources_with_a_scheme_are_urls() {
        assert_eq!(
            parse_source("file:///tmp/a.pdf"),
            DocumentSource::Url("file:///tmp/a.pdf".into())
        );
        assert_eq!(
            parse_source("docs/a.pdf"),
            DocumentSource::Path(PathBuf::from("docs/a.pdf"))
        );
    }

    #[test]
    fn outline_lines_are_indented_by_depth() {
        let item = OutlineItem {
            title: "Results".into(),
            page: 7,
            depth: 2,
        };
        assert_eq!(format_outline_line(&item), "    Results  ....  7");
    }

    fn is_white(bitmap: &Bitmap, x: u32, y: u32) -> bool {
        let idx = ((y * bitmap.width + x) * 4) as usize;
        bitmap.pixels[idx..idx + 3] == [255, 255, 255]
    }

    #[test]
    fn highlights_tint_only_the_match_area() {
        let mut bitmap = Bitmap::new(10, 10);
        apply_highlights(&mut bitmap, &[PixelRect::new(2.0, 2.0, 3.0, 3.0)], 1.0);

        assert!(is_white(&bitmap, 0, 0));
        assert!(!is_white(&bitmap, 3, 3));
        assert!(is_white(&bitmap, 6, 6));
    }

    #[test]
    fn highlights_follow_the_device_pixel_ratio() {
        let mut bitmap = Bitmap::new(20, 20);
        apply_highlights(
            &mut bitmap,
            &[
                PixelRect::new(2.0, 2.0, 3.0, 3.0),
                PixelRect::new(8.0, 8.0, 5.0, 5.0),
            ],
            2.0,
        );

        assert!(is_white(&bitmap, 3, 3));
        assert!(!is_white(&bitmap, 4, 4));
        assert!(!is_white(&bitmap, 9, 9));
        assert!(is_white(&bitmap, 10, 10));
        // The second rect runs past the edge and is clipped.
        assert!(!is_white(&bitmap, 19, 19));
    }

    #[tokio::test]
    async fn render_output_does_not_depend_on_earlier_runs() {
        let source = DocumentSource::Path(PathBuf::from("/srv/docs/report.pdf"));
        let store = Arc::new(MemoryStateStore::new());
        let options = RenderOptions {
            page: 2,
            scale: None,
            rotate: 1,
            highlight: None,
        };

        let mut rendered = Vec::new();
        for _ in 0..2 {
            let provider =
                Arc::new(FakeProvider::new().with_document(&source, FakeDocument::builder(3)));
            let surfaces = Arc::new(MemorySurfaceFactory::new());
            let mut viewer = Viewer::new(ViewerConfig::default(), provider, surfaces.clone())
                .with_state_store(store.clone());
            viewer.open(source.clone()).await.unwrap();

            let bitmap = render_page(&mut viewer, &surfaces, &options).await.unwrap();
            assert_eq!(viewer.rotation(), Some(Rotation::Deg90));
            assert_eq!(viewer.scale(), Some(1.0));
            rendered.push(bitmap);
            viewer.close().unwrap();
        }
        assert_eq!(rendered[0], rendered[1]);
        assert!(rendered[0].width > rendered[0].height);
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(Some(&dir.path().join("absent.toml"))).is_err());

        let path = dir.path().join("config.toml");
        fs::write(&path, "cache_capacity = 3\n").unwrap();
        assert_eq!(load_config(Some(&path)).unwrap().cache_capacity, 3);
    }
}
