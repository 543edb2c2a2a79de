use anyhow::{Context, Result};
use clap::Parser;
use ledwall::config::PanelConfig;
use ledwall::transport::{DEFAULT_PANEL_PORT, NullTransport, Transport, UdpTransport};
use ledwall::wall::{PanelWall, SendPolicy};
use log::{error, info, warn};
use rand::seq::SliceRandom;
use simplelog::{Config, LevelFilter, WriteLogger};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use walkdir::WalkDir;

#[derive(Parser, Debug)]
#[command(
    name = "ledwall",
    version,
    about = "Drive a wall of LED panels from a directory of images"
)]
struct Args {
    /// Directory of images and animations to cycle through
    media_dir: PathBuf,

    /// Panel inventory file
    #[arg(short, long, default_value = "panels.json")]
    config: PathBuf,

    /// Network interface the wall is wired to
    #[arg(short, long, default_value = "enp1s0")]
    interface: String,

    /// UDP port the panels listen on
    #[arg(long, default_value_t = DEFAULT_PANEL_PORT)]
    port: u16,

    /// Seconds each source stays up: hold time for stills, minimum play
    /// time for animations
    #[arg(short, long, default_value_t = 5.0)]
    duration: f32,

    /// Resolve and render everything but send nothing
    #[arg(long)]
    dry_run: bool,

    /// Stop a frame at the first failing panel instead of continuing
    #[arg(long)]
    abort_on_send_error: bool,

    /// Skip the serial-number identify pass at startup
    #[arg(long)]
    skip_identify: bool,

    /// Play the directory once and exit
    #[arg(long)]
    once: bool,

    /// Log file path
    #[arg(long, default_value = "ledwall.log")]
    log_file: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    WriteLogger::init(
        LevelFilter::Debug,
        Config::default(),
        File::create(&args.log_file)
            .with_context(|| format!("Failed to create log file {:?}", args.log_file))?,
    )?;

    info!("Starting ledwall");

    let config = PanelConfig::load(&args.config)?;
    let tile = config.tile_size();
    info!(
        "Driving a {}x{} wall of {}x{} pixel tiles",
        config.cols(),
        config.rows(),
        tile.width,
        tile.height
    );

    let result = if args.dry_run {
        info!("Dry run: nothing will be sent to the panels");
        run(build_wall(config, NullTransport, &args), &args)
    } else {
        let transport = UdpTransport::new(&args.interface, args.port)?;
        run(build_wall(config, transport, &args), &args)
    };

    if let Err(err) = &result {
        error!("ledwall stopped: {err:?}");
    }
    result
}

fn build_wall<T: Transport>(config: PanelConfig, transport: T, args: &Args) -> PanelWall<T> {
    let mut wall = PanelWall::new(config, transport);
    if args.abort_on_send_error {
        wall.set_send_policy(SendPolicy::AbortFrame);
    }
    wall
}

fn run<T: Transport>(wall: PanelWall<T>, args: &Args) -> Result<()> {
    let duration = Duration::from_secs_f32(args.duration);

    wall.reset_all()?;
    if !args.skip_identify {
        wall.show_serials()?;
        thread::sleep(duration);
    }

    loop {
        wall.reset_all()?;

        let mut files = discover_media(&args.media_dir)?;
        if files.is_empty() {
            warn!("No image files in {:?}", args.media_dir);
            if args.once {
                break;
            }
            thread::sleep(duration);
            continue;
        }
        files.shuffle(&mut rand::thread_rng());

        for file in &files {
            info!("Showing {file:?}");
            if let Err(e) = wall.show_source(file, duration) {
                error!("Skipping {file:?}: {e:#}");
            }
        }

        if args.once {
            break;
        }
    }
    Ok(())
}

fn discover_media(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let is_image = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                matches!(
                    ext.to_lowercase().as_str(),
                    "png" | "jpg" | "jpeg" | "gif" | "webp"
                )
            })
            .unwrap_or(false);
        if is_image {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"x").unwrap();
    }

    #[test]
    fn test_discover_media_filters_and_recurses() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "a.png");
        touch(dir.path(), "b.GIF");
        touch(dir.path(), "notes.txt");
        touch(dir.path(), ".DS_Store");
        let nested = dir.path().join("more");
        fs::create_dir(&nested).unwrap();
        touch(&nested, "c.jpeg");

        let mut names: Vec<String> = discover_media(dir.path())
            .unwrap()
            .into_iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["a.png", "b.GIF", "c.jpeg"]);
    }

    #[test]
    fn test_discover_media_empty_dir() {
        let dir = TempDir::new().unwrap();
        assert!(discover_media(dir.path()).unwrap().is_empty());
    }
}
