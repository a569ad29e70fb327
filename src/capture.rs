use std::{
    collections::HashSet,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{anyhow, Context};
use signal_hook::consts::{SIGINT, SIGTERM};
use tokio::{fs, task};

use crate::{
    browser_controller::{BrowserController, BrowserSession},
    collector::{spawn_save_workers, ResponseCollector},
    types::CaptureTarget,
    utils::DESKTOP_USER_AGENT,
};

#[derive(Builder, Debug, Clone)]
#[builder(setter(into))]
pub struct CaptureOptions {
    // desktop UA so sites don't serve the reduced mobile asset set
    #[builder(default = "DESKTOP_USER_AGENT.into()")]
    pub user_agent: String,
    #[builder(default = "1440")]
    pub viewport_width: u32,
    #[builder(default = "1200")]
    pub viewport_height: u32,
    // number of scroll-to-bottom steps after load
    #[builder(default = "20")]
    pub scroll_count: u32,
    #[builder(default = "400")]
    pub scroll_delay_ms: u64,
    // pause before and after the hover pass, in milliseconds
    #[builder(default = "1000")]
    pub settle_delay_ms: u64,
    #[builder(default = "self.default_hover_selectors()")]
    pub hover_selectors: Vec<String>,
    // hovered elements per selector
    #[builder(default = "5")]
    pub hover_limit: usize,
    // browser timeout in seconds
    #[builder(default = "45")]
    pub browser_timeout: u64,
    #[builder(default = "2")]
    pub idle_max_inflight: usize,
    #[builder(default = "500")]
    pub idle_quiet_ms: u64,
    // seconds to wait for the network to go quiet after load
    #[builder(default = "30")]
    pub idle_timeout: u64,
    #[builder(default = "4")]
    pub save_workers: usize,
    // per resource save timeout in seconds
    #[builder(default = "30")]
    pub resource_timeout: u64,
    #[builder(default = "self.default_sandbox()")]
    pub sandbox: bool,
}

impl CaptureOptions {
    pub fn default_builder() -> CaptureOptionsBuilder {
        CaptureOptionsBuilder::default()
    }
}

impl CaptureOptionsBuilder {
    fn default_hover_selectors(&self) -> Vec<String> {
        vec!["a".into(), "button".into(), "[role=\"button\"]".into()]
    }
    fn default_sandbox(&self) -> bool {
        // warning: the sandbox only gets disabled inside docker
        std::env::var("IN_DOCKER").is_err()
    }
}

pub struct Capturer {
    options: CaptureOptions,
    should_terminate: Arc<AtomicBool>,
}

impl Capturer {
    pub fn new(options: CaptureOptions) -> Self {
        Capturer {
            options,
            should_terminate: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cuts the scroll and hover passes short on SIGINT/SIGTERM. The browser is
    /// still torn down and whatever was saved is returned.
    pub fn register_signals(&self) -> anyhow::Result<()> {
        signal_hook::flag::register(SIGTERM, Arc::clone(&self.should_terminate))?;
        signal_hook::flag::register(SIGINT, Arc::clone(&self.should_terminate))?;
        Ok(())
    }

    pub async fn capture(&self, target: &CaptureTarget) -> anyhow::Result<HashSet<PathBuf>> {
        self.capture_with(target, BrowserController::new).await
    }

    /// Runs the pipeline against the session built by `launch`. The session is
    /// dropped before this returns, on success and on failure.
    pub async fn capture_with<S, L>(
        &self,
        target: &CaptureTarget,
        launch: L,
    ) -> anyhow::Result<HashSet<PathBuf>>
    where
        S: BrowserSession,
        L: FnOnce(&CaptureOptions) -> anyhow::Result<S> + Send + 'static,
    {
        let out_dir = target.out_dir().clone();
        fs::create_dir_all(&out_dir)
            .await
            .context(format!("could not create output directory {:?}", out_dir))?;

        info!(
            "capturing images of {} into {:?} ({} scrolls, {} save workers)",
            target.start_url(),
            out_dir,
            self.options.scroll_count,
            self.options.save_workers
        );

        let (collector, rx) = ResponseCollector::new();
        let workers = spawn_save_workers(
            rx,
            out_dir.clone(),
            self.options.save_workers,
            Duration::from_secs(self.options.resource_timeout),
        );

        let options = self.options.clone();
        let url = target.start_url().to_string();
        let should_terminate = self.should_terminate.clone();
        let session_collector = collector.clone();
        let browsed = task::spawn_blocking(move || {
            let session = launch(&options)?;
            drive_session(&session, session_collector, &url, &options, &should_terminate)
        })
        .await;

        collector.close();
        let report = workers.await.context("save workers stopped unexpectedly")?;

        let browsed = match browsed {
            Ok(r) => r,
            Err(e) => Err(anyhow!("browser thread failed: {}", e)),
        };
        if let Err(e) = browsed {
            error!("capture of {} failed: {:#}", target.start_url(), e);
            return Err(e);
        }

        info!(
            "capture of {} completed, {} responses seen, {} images saved, {} failed",
            target.start_url(),
            collector.seen_count(),
            report.saved.len(),
            report.failed
        );
        Ok(report.saved)
    }
}

fn drive_session<S: BrowserSession>(
    session: &S,
    collector: ResponseCollector,
    url: &str,
    options: &CaptureOptions,
    should_terminate: &AtomicBool,
) -> anyhow::Result<()> {
    // listener goes in first so no early response is missed
    session
        .attach_collector(collector)
        .context("could not attach response listener")?;
    session.navigate(url)?;

    scroll_page(session, options, should_terminate);

    if let Err(e) = hover_pass(session, options, should_terminate) {
        debug!("interaction pass on {} failed: {:#}", url, e);
    }
    Ok(())
}

fn scroll_page<S: BrowserSession>(session: &S, options: &CaptureOptions, should_terminate: &AtomicBool) {
    debug!("scrolling....");
    for i in 0..options.scroll_count {
        if should_terminate.load(Ordering::Relaxed) {
            warn!("termination requested, stopping after {} scrolls", i);
            return;
        }
        if let Err(e) = session.scroll_viewport() {
            warn!("scroll {} failed, skipping the rest: {:#}", i, e);
            return;
        }
        std::thread::sleep(Duration::from_millis(options.scroll_delay_ms));
    }
    debug!("scrolling ended");
}

fn hover_pass<S: BrowserSession>(
    session: &S,
    options: &CaptureOptions,
    should_terminate: &AtomicBool,
) -> anyhow::Result<()> {
    let settle = Duration::from_millis(options.settle_delay_ms);
    std::thread::sleep(settle);
    for selector in options.hover_selectors.iter() {
        if should_terminate.load(Ordering::Relaxed) {
            return Ok(());
        }
        let hovered = session.hover_elements(selector, options.hover_limit)?;
        debug!("hovered {} elements matching {}", hovered, selector);
    }
    std::thread::sleep(settle);
    Ok(())
}
