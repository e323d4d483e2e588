//! Gateway configuration loaded from environment variables.

use std::path::PathBuf;

/// Default backend address when `COMFY_URL` is unset.
pub const DEFAULT_COMFY_URL: &str = "http://127.0.0.1:8188";

/// How the poll loop decides that a submitted prompt has finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollMode {
    /// Query `/history/{prompt_id}` and inspect `status.status_str`.
    History,
    /// Watch `/queue` until the prompt leaves it, then read `/history`.
    Queue,
}

impl PollMode {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "queue" => PollMode::Queue,
            _ => PollMode::History,
        }
    }

    /// Attempt cap used when `GATEWAY_POLL_MAX_ATTEMPTS` is unset.
    pub fn default_max_attempts(self) -> u32 {
        match self {
            PollMode::History => 60,
            PollMode::Queue => 120,
        }
    }
}

/// Shape of the image URL handed back to the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageUrlMode {
    /// Absolute backend `/view?...` URL.
    Direct,
    /// Relative `/api/image?...` URL served by this gateway.
    Proxy,
}

impl ImageUrlMode {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "proxy" => ImageUrlMode::Proxy,
            _ => ImageUrlMode::Direct,
        }
    }
}

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// Image backend base URL, without trailing slash.
    pub comfy_url: String,
    /// Whether `COMFY_URL` was explicitly set.
    pub comfy_url_configured: bool,
    /// Shared secret for the admin API. Admin access is refused while unset.
    pub admin_password: Option<String>,
    /// Site tag written into records and used to filter admin listings.
    pub site: String,
    /// Local data directory.
    pub data_dir: PathBuf,
    /// Preferred data directory shared between sites, used when it exists.
    pub shared_data_dir: Option<PathBuf>,
    /// The other site's data directory, read-only.
    pub peer_data_dir: Option<PathBuf>,
    /// Template workflow document.
    pub workflow_path: PathBuf,
    /// Alternate template selected by the `censored` request flag.
    pub censored_workflow_path: Option<PathBuf>,
    pub poll_mode: PollMode,
    pub poll_interval_secs: u64,
    pub poll_max_attempts: u32,
    /// Base URL that receives queue-tracking notifications.
    pub queue_tracker_url: Option<String>,
    pub image_url_mode: ImageUrlMode,
    /// Maximum accepted upload size in bytes.
    pub max_upload_bytes: usize,
    /// Static admin dashboard assets served at `/admin`.
    pub dashboard_dir: Option<PathBuf>,
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        let comfy_url_raw = env_opt("COMFY_URL");
        let comfy_url_configured = comfy_url_raw.is_some();
        let comfy_url = comfy_url_raw
            .unwrap_or_else(|| DEFAULT_COMFY_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let admin_password = env_opt("ADMIN_PASSWORD");
        let site = env_opt("GATEWAY_SITE").unwrap_or_else(|| "deeplab".to_string());
        let data_dir = env_opt("GATEWAY_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data"));
        let shared_data_dir = env_opt("GATEWAY_SHARED_DATA_DIR").map(PathBuf::from);
        let peer_data_dir = env_opt("GATEWAY_PEER_DATA_DIR").map(PathBuf::from);
        let workflow_path = env_opt("GATEWAY_WORKFLOW_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./proavatar_workflow.json"));
        let censored_workflow_path = env_opt("GATEWAY_CENSORED_WORKFLOW_PATH").map(PathBuf::from);
        let poll_mode = env_opt("GATEWAY_POLL_MODE")
            .map(|s| PollMode::parse(&s))
            .unwrap_or(PollMode::History);
        let poll_interval_secs = env_parse("GATEWAY_POLL_INTERVAL_SECS").unwrap_or(5);
        let poll_max_attempts =
            env_parse("GATEWAY_POLL_MAX_ATTEMPTS").unwrap_or_else(|| poll_mode.default_max_attempts());
        let queue_tracker_url =
            env_opt("GATEWAY_QUEUE_TRACKER_URL").map(|s| s.trim_end_matches('/').to_string());
        let image_url_mode = env_opt("GATEWAY_IMAGE_URL_MODE")
            .map(|s| ImageUrlMode::parse(&s))
            .unwrap_or(ImageUrlMode::Direct);
        let max_upload_bytes = env_parse("GATEWAY_MAX_UPLOAD_BYTES").unwrap_or(10 * 1024 * 1024);
        let dashboard_dir = env_opt("GATEWAY_DASHBOARD_DIR").map(PathBuf::from);

        if admin_password.is_none() {
            tracing::warn!("ADMIN_PASSWORD not set -- admin API will reject every request");
        }
        if !comfy_url_configured {
            tracing::warn!("COMFY_URL not set -- using {DEFAULT_COMFY_URL}");
        }

        Self {
            comfy_url,
            comfy_url_configured,
            admin_password,
            site,
            data_dir,
            shared_data_dir,
            peer_data_dir,
            workflow_path,
            censored_workflow_path,
            poll_mode,
            poll_interval_secs,
            poll_max_attempts,
            queue_tracker_url,
            image_url_mode,
            max_upload_bytes,
            dashboard_dir,
        }
    }

    /// Configuration for tests and embedding: local paths, no secrets, fast polling.
    pub fn local(data_dir: impl Into<PathBuf>, comfy_url: impl Into<String>) -> Self {
        let data_dir = data_dir.into();
        Self {
            comfy_url: comfy_url.into().trim_end_matches('/').to_string(),
            comfy_url_configured: true,
            admin_password: None,
            site: "deeplab".to_string(),
            workflow_path: data_dir.join("proavatar_workflow.json"),
            data_dir,
            shared_data_dir: None,
            peer_data_dir: None,
            censored_workflow_path: None,
            poll_mode: PollMode::History,
            poll_interval_secs: 0,
            poll_max_attempts: 3,
            queue_tracker_url: None,
            image_url_mode: ImageUrlMode::Direct,
            max_upload_bytes: 10 * 1024 * 1024,
            dashboard_dir: None,
        }
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env_opt(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Invalid {key} value {raw:?}, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_mode_parsing_defaults_to_history() {
        assert_eq!(PollMode::parse("queue"), PollMode::Queue);
        assert_eq!(PollMode::parse(" QUEUE "), PollMode::Queue);
        assert_eq!(PollMode::parse("history"), PollMode::History);
        assert_eq!(PollMode::parse("bogus"), PollMode::History);
        assert_eq!(PollMode::Queue.default_max_attempts(), 120);
        assert_eq!(PollMode::History.default_max_attempts(), 60);
    }

    #[test]
    fn local_config_trims_trailing_slash() {
        let cfg = GatewayConfig::local("/tmp/x", "http://backend:8188/");
        assert_eq!(cfg.comfy_url, "http://backend:8188");
        assert_eq!(cfg.image_url_mode, ImageUrlMode::Direct);
        assert!(cfg.workflow_path.ends_with("proavatar_workflow.json"));
    }
}
