use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use headless_chrome::protocol::cdp::types::Event;
use headless_chrome::protocol::cdp::Network::events::ResponseReceivedEventParams;
use headless_chrome::protocol::cdp::Network::GetResponseBodyReturnObject;
use headless_chrome::Tab;
use headless_chrome::{browser::default_executable, Browser, LaunchOptions};
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Pid, PidExt, ProcessExt, System, SystemExt};

use crate::capture::CaptureOptions;
use crate::collector::ResponseCollector;
use crate::network_idle::NetworkIdle;
use crate::types::ResourceError;

const RESPONSE_HANDLER_NAME: &str = "harvester";
const SCROLL_SCRIPT: &str = "window.scrollBy(0, window.innerHeight)";

/// What the capture pipeline needs from a browser tab.
pub trait BrowserSession {
    /// Routes every network response of the tab to `collector`. Must be called before `navigate`.
    fn attach_collector(&self, collector: ResponseCollector) -> Result<()>;
    /// Loads `url` and waits for the page and, best effort, for the network to go quiet.
    fn navigate(&self, url: &str) -> Result<()>;
    fn scroll_viewport(&self) -> Result<()>;
    /// Hovers up to `limit` elements matching `selector`, returns how many were hovered.
    fn hover_elements(&self, selector: &str, limit: usize) -> Result<usize>;
}

pub struct BrowserController {
    browser: Browser,
    tab: Arc<Tab>,
    idle: Arc<NetworkIdle>,
    idle_quiet: Duration,
    idle_timeout: Duration,
}

impl BrowserController {
    pub fn new(options: &CaptureOptions) -> Result<Self> {
        let path = default_executable()
            .map_err(|e| anyhow!(e))
            .context("could not find a chrome binary")?;
        let launch_options = LaunchOptions::default_builder()
            .path(Some(path))
            .window_size(Some((options.viewport_width, options.viewport_height)))
            .idle_browser_timeout(Duration::from_secs(options.browser_timeout))
            .sandbox(options.sandbox)
            .args(vec![OsStr::new("--disable-gpu")])
            .build()
            .map_err(|e| anyhow!("invalid launch options: {}", e))?;
        let browser = Browser::new(launch_options).context("browser launching error")?;

        // new incognito window (no context)
        let tab = {
            let ctx = browser
                .new_context()
                .context("could not create incognito context")?;
            ctx.new_tab().context("could not create new tab")?
        };
        tab.set_default_timeout(Duration::from_secs(options.browser_timeout));
        tab.set_user_agent(&options.user_agent, None, None)
            .context("could not set user agent")?;

        let idle = Arc::new(NetworkIdle::new(options.idle_max_inflight));
        let tracker = idle.clone();
        tab.add_event_listener(Arc::new(move |event: &Event| match event {
            Event::NetworkRequestWillBeSent(e) => tracker.request_started(&e.params.request_id),
            Event::NetworkLoadingFinished(e) => tracker.request_finished(&e.params.request_id),
            Event::NetworkLoadingFailed(e) => tracker.request_finished(&e.params.request_id),
            _ => {}
        }))
        .context("could not listen to network events")?;

        debug!(
            "browser launched with pid {:?}, viewport {}x{}",
            browser.get_process_id(),
            options.viewport_width,
            options.viewport_height
        );

        Ok(BrowserController {
            browser,
            tab,
            idle,
            idle_quiet: Duration::from_millis(options.idle_quiet_ms),
            idle_timeout: Duration::from_secs(options.idle_timeout),
        })
    }

    pub fn kill(&self) -> bool {
        let pid = match self.browser.get_process_id() {
            Some(pid) => pid,
            None => return false,
        };
        let mut s = System::new();
        s.refresh_processes();
        if let Some(process) = s.process(Pid::from_u32(pid)) {
            debug!("killing process with id {}", pid);
            process.kill();
            return true;
        }
        false
    }
}

impl BrowserSession for BrowserController {
    fn attach_collector(&self, collector: ResponseCollector) -> Result<()> {
        self.tab
            .register_response_handling(
                RESPONSE_HANDLER_NAME,
                Box::new(
                    move |params: ResponseReceivedEventParams,
                          fetch_body: &dyn Fn() -> Result<GetResponseBodyReturnObject>| {
                        let url = params.response.url.clone();
                        let content_type = content_type_header(params.response.headers.0.as_ref());
                        let observation = collector.observe(&url, content_type.as_deref(), || {
                            let body = fetch_body()
                                .map_err(|e| ResourceError::BodyUnavailable(e.to_string()))?;
                            decode_body(body.body, body.base_64_encoded)
                        });
                        trace!("{:?} {}", observation, url);
                    },
                ),
            )
            .context("could not register response handler")?;
        Ok(())
    }

    fn navigate(&self, url: &str) -> Result<()> {
        self.tab
            .navigate_to(url)
            .context(format!("could not navigate to {}", url))?
            .wait_until_navigated()
            .context(format!("navigation to {} did not complete", url))?;

        if !self.idle.wait_for_idle(self.idle_quiet, self.idle_timeout) {
            warn!(
                "network of {} still busy after {:?} ({} in flight), continuing",
                url,
                self.idle_timeout,
                self.idle.inflight()
            );
        }
        Ok(())
    }

    fn scroll_viewport(&self) -> Result<()> {
        self.tab
            .evaluate(SCROLL_SCRIPT, false)
            .context("scrolling failed")?;
        Ok(())
    }

    fn hover_elements(&self, selector: &str, limit: usize) -> Result<usize> {
        // no match is reported as an error by the tab, treat it as nothing to hover
        let elements = match self.tab.find_elements(selector) {
            Ok(elems) => elems,
            Err(e) => {
                debug!("no elements for {}: {}", selector, e);
                return Ok(0);
            }
        };

        let mut hovered = 0;
        for element in elements.iter().take(limit) {
            match element.move_mouse_over() {
                Ok(_) => hovered += 1,
                Err(e) => debug!("could not hover {} element: {}", selector, e),
            }
        }
        Ok(hovered)
    }
}

impl Drop for BrowserController {
    fn drop(&mut self) {
        debug!("killing browser process...");
        self.kill();
    }
}

/// Looks up the content-type header, whatever its casing.
pub fn content_type_header(headers: Option<&serde_json::Value>) -> Option<String> {
    headers?
        .as_object()?
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
        .and_then(|(_, v)| v.as_str())
        .map(String::from)
}

pub fn decode_body(body: String, base_64_encoded: bool) -> Result<Vec<u8>, ResourceError> {
    if base_64_encoded {
        STANDARD
            .decode(body)
            .map_err(|e| ResourceError::Decode(e.to_string()))
    } else {
        Ok(body.into_bytes())
    }
}
