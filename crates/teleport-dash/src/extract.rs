//! Parsing of `tctl` text output.
//!
//! `tctl` prints human-oriented text, not a stable format. Everything that
//! depends on its shape lives here.

use std::sync::LazyLock;

use regex::Regex;

/// Local port the Teleport proxy is forwarded to.
pub const FORWARDED_PORT: u16 = 8080;

static JOIN_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-f0-9]{32}").expect("valid join token regex"));

static INVITE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https://\S+/web/invite/\S+").expect("valid invite url regex")
});

static MINIKUBE_ORIGIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https://minikube:\d+").expect("valid minikube origin regex"));

/// First 32-character lowercase hex token in `output`.
#[must_use]
pub fn join_token(output: &str) -> Option<&str> {
    JOIN_TOKEN.find(output).map(|m| m.as_str())
}

/// First invite link in `output`, unmodified.
#[must_use]
pub fn invite_url(output: &str) -> Option<&str> {
    INVITE_URL.find(output).map(|m| m.as_str())
}

/// Rewrites invite links so they point at the port-forwarded proxy.
#[derive(Debug, Clone)]
pub struct InviteRewriter {
    host: String,
    host_origin: Regex,
}

impl InviteRewriter {
    /// Rewriter targeting `https://{host}:8080`.
    #[must_use]
    pub fn new(host: &str) -> Self {
        let host_origin = Regex::new(&format!(r"https://{}:\d+", regex::escape(host)))
            .expect("escaped host always forms a valid regex");
        Self {
            host: host.to_string(),
            host_origin,
        }
    }

    /// The origin every invite link is rewritten to.
    #[must_use]
    pub fn origin(&self) -> String {
        format!("https://{}:{FORWARDED_PORT}", self.host)
    }

    /// Rewrite proxy placeholders and ports in `text`. Idempotent.
    #[must_use]
    pub fn rewrite(&self, text: &str) -> String {
        let origin = self.origin();
        let text = text
            .replace("<proxyhost>", &self.host)
            .replace(":3080", &format!(":{FORWARDED_PORT}"));
        let text = self.host_origin.replace_all(&text, origin.as_str());
        MINIKUBE_ORIGIN
            .replace_all(&text, origin.as_str())
            .into_owned()
    }

    /// Extract the invite link from `output` and rewrite it.
    #[must_use]
    pub fn extract(&self, output: &str) -> Option<String> {
        invite_url(output).map(|url| self.rewrite(url))
    }
}
