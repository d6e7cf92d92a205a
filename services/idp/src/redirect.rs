//! Post-action redirect ("next URL") policy
//!
//! Login, logout, and confirmation flows end by sending the user
//! somewhere. The destination comes from, in priority order: the
//! session's one-time `next` slot, the `next` request parameter, the
//! Referer header (when the caller opts in), and finally the configured
//! default. The parameter path is filtered so the service can't be used
//! as an open redirector: an absolute or protocol-relative URL pointing
//! at a different host is discarded unless the caller explicitly allows
//! external targets.

use url::Url;

use crate::session::{SESSION_NEXT, Session};

/// Caller knobs for [`next_url`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NextUrlOptions {
    /// Fall back to the Referer header before the default location.
    pub referrer_fallback: bool,
    /// Permit `next` parameters pointing at other hosts. Off for every
    /// flow that handles untrusted input.
    pub allow_external: bool,
}

/// Compute the post-action redirect target.
///
/// The session's `next` value is consumed (read-once) no matter which
/// branch produces the result. The safety filter applies only to the
/// request-parameter candidate; the session slot is written by this
/// service and the Referer fallback mirrors what the browser already
/// chose to reveal.
pub fn next_url(
    session: &Session,
    candidate: Option<&str>,
    request_host: Option<&str>,
    referrer: Option<&str>,
    default_next: &str,
    options: NextUrlOptions,
) -> String {
    if let Some(stored) = session.take(SESSION_NEXT) {
        if let Some(stored) = stored.as_str() {
            if !stored.is_empty() {
                return stored.to_owned();
            }
        }
    }

    let mut candidate = candidate.unwrap_or("").to_owned();
    if !options.allow_external && is_external(&candidate, request_host) {
        candidate.clear();
    }
    if !candidate.is_empty() {
        return candidate;
    }

    if options.referrer_fallback {
        if let Some(referrer) = referrer {
            if !referrer.is_empty() {
                return referrer.to_owned();
            }
        }
    }

    default_next.to_owned()
}

/// Whether `candidate` is an absolute or protocol-relative URL whose
/// host differs from the request host. Relative paths are never
/// external; an unparseable absolute URL is treated as external.
fn is_external(candidate: &str, request_host: Option<&str>) -> bool {
    let absolute = candidate.starts_with("http:")
        || candidate.starts_with("https:")
        || candidate.starts_with("//");
    if !absolute {
        return false;
    }

    let candidate_host = if let Some(rest) = candidate.strip_prefix("//") {
        host_of(&format!("http://{rest}"))
    } else {
        host_of(candidate)
    };
    let request_host = request_host.and_then(|host| host_of(&format!("http://{host}")));

    candidate_host != request_host || candidate_host.is_none()
}

/// Hostname of a URL, lowercased, without the port.
fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()?
        .host_str()
        .map(|host| host.to_ascii_lowercase())
}
