use std::path::PathBuf;

use regex::Regex;
use url::Url;

pub const DEFAULT_START_URL: &str = "https://efendi.qrmenus.uz/";
pub const DEFAULT_OUT_DIR_NAME: &str = "efendi-images";
pub const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36";

pub const IMAGE_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "gif", "webp", "svg", "ico"];

lazy_static! {
    static ref IMAGE_CONTENT_TYPE: Regex =
        Regex::new(r"(?i)image/(png|jpe?g|gif|webp|svg|ico)").unwrap();
}

pub fn is_image_content_type(content_type: &str) -> bool {
    IMAGE_CONTENT_TYPE.is_match(content_type)
}

/// Checks the path of `url` for a known image extension, ignoring query and fragment.
pub fn has_image_extension(url: &str) -> bool {
    let path = match Url::parse(url) {
        Ok(u) => u.path().to_string(),
        // not a full url, strip what would be the query/fragment by hand
        Err(_) => url.split(['?', '#']).next().unwrap_or_default().to_string(),
    };
    let path = path.to_ascii_lowercase();
    IMAGE_EXTENSIONS
        .iter()
        .any(|ext| path.ends_with(&format!(".{}", ext)))
}

pub fn is_image_response(url: &str, content_type: Option<&str>) -> bool {
    content_type.map(is_image_content_type).unwrap_or(false) || has_image_extension(url)
}

/// Basename of the url path, or a timestamp based name when the path has none.
pub fn file_name_from_url(url: &str) -> String {
    let base = Url::parse(url).ok().and_then(|u| {
        u.path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last().map(String::from))
    });
    match base {
        Some(name) => name,
        None => fallback_file_name(),
    }
}

pub fn fallback_file_name() -> String {
    format!("image-{}", get_unix_millis())
}

pub fn get_unix_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// `efendi-images` next to the running executable.
pub fn default_out_dir() -> PathBuf {
    match std::env::current_exe() {
        Ok(exe) => match exe.parent() {
            Some(dir) => dir.join(DEFAULT_OUT_DIR_NAME),
            None => PathBuf::from(DEFAULT_OUT_DIR_NAME),
        },
        Err(_) => PathBuf::from(DEFAULT_OUT_DIR_NAME),
    }
}

pub fn summary_line(count: usize, out_dir: &std::path::Path) -> String {
    format!("Saved {} images to {}", count, out_dir.display())
}
