//! API client configuration: token, endpoint, version and per-call delay.

use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://api.vk.com/method/";
pub const DEFAULT_API_VERSION: &str = "5.131";
/// 3 requests per second platform limit.
pub const DEFAULT_REQUEST_INTERVAL: Duration = Duration::from_millis(400);
/// `lp_version` passed to `messages.getLongPollServer`.
pub const DEFAULT_LP_VERSION: u32 = 3;

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub token: String,
    /// Method endpoint prefix; the method name is appended verbatim.
    pub api_url: String,
    pub version: String,
    pub lang: Option<String>,
    pub https: bool,
    /// Set for group accounts; required by `groups.getLongPollServer`.
    pub group_id: Option<i64>,
    /// Delay applied after every call, successful or not.
    pub request_interval: Duration,
    pub lp_version: u32,
    pub need_pts: bool,
}

impl ApiConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            api_url: DEFAULT_API_URL.to_string(),
            version: DEFAULT_API_VERSION.to_string(),
            lang: None,
            https: false,
            group_id: None,
            request_interval: DEFAULT_REQUEST_INTERVAL,
            lp_version: DEFAULT_LP_VERSION,
            need_pts: false,
        }
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        let mut url = url.into();
        if !url.ends_with('/') {
            url.push('/');
        }
        self.api_url = url;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_lang(mut self, lang: Option<String>) -> Self {
        self.lang = lang.filter(|l| !l.is_empty());
        self
    }

    pub fn with_group_id(mut self, group_id: Option<i64>) -> Self {
        self.group_id = group_id;
        self
    }

    pub fn with_request_interval(mut self, interval: Duration) -> Self {
        self.request_interval = interval;
        self
    }
}
