use std::path::PathBuf;

use clap::Parser;
use harvester::{
    capture::{CaptureOptions, Capturer},
    types::CaptureTarget,
    utils::{default_out_dir, summary_line, DEFAULT_START_URL},
};
use log::debug;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Saves the images a web page loads", long_about = None)]
struct Args {
    /// Page to load
    url: Option<String>,
    /// Directory the images are written to, defaults to efendi-images next to the binary
    out_dir: Option<PathBuf>,
    /// Number of scroll steps after the page has loaded
    #[arg(short = 's', long, default_value_t = 20)]
    scrolls: u32,
    /// Delay in milliseconds between two scroll steps
    #[arg(long, default_value_t = 400)]
    scroll_delay: u64,
    /// Maximum number of elements hovered per selector
    #[arg(long, default_value_t = 5)]
    hover_limit: usize,
    /// Viewport width
    #[arg(long, default_value_t = 1440)]
    width: u32,
    /// Viewport height
    #[arg(long, default_value_t = 1200)]
    height: u32,
    /// Maximum time the browser will wait for an event before timing out
    #[arg(short = 't', long, default_value_t = 45)]
    timeout: u64,
    /// Number of concurrent file writers
    #[arg(short = 'w', long, default_value_t = 4)]
    workers: usize,
    /// Disable the chrome sandbox (also disabled when IN_DOCKER is set)
    #[arg(long)]
    no_sandbox: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();
    debug!("Starting harvester with {:#?}", &args);

    let url = args.url.unwrap_or_else(|| DEFAULT_START_URL.into());
    let out_dir = args.out_dir.unwrap_or_else(default_out_dir);
    let target = CaptureTarget::new(&url, out_dir)?;

    let mut builder = CaptureOptions::default_builder();
    builder
        .scroll_count(args.scrolls)
        .scroll_delay_ms(args.scroll_delay)
        .hover_limit(args.hover_limit)
        .viewport_width(args.width)
        .viewport_height(args.height)
        .browser_timeout(args.timeout)
        .save_workers(args.workers);
    if args.no_sandbox {
        builder.sandbox(false);
    }
    let options = builder.build()?;

    let capturer = Capturer::new(options);
    capturer.register_signals()?;

    let saved = capturer.capture(&target).await?;

    println!("{}", summary_line(saved.len(), target.out_dir()));
    Ok(())
}
