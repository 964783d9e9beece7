use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use http::header::{CONTENT_LENGTH, HeaderName, HeaderValue, RETRY_AFTER};
use http::{HeaderMap, Uri};

use crate::error::Error;

const MAX_ERROR_BODY_LEN: usize = 2048;

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Key-wise merge; entries from `overrides` replace same-named entries.
pub(crate) fn merge_headers(base: &HeaderMap, overrides: &HeaderMap) -> HeaderMap {
    let mut merged = base.clone();
    for (name, value) in overrides {
        merged.insert(name.clone(), value.clone());
    }
    merged
}

/// Joins a prefix and a relative path with exactly one separator between
/// them, whether or not the prefix carries a trailing slash.
pub(crate) fn join_prefix_path(prefix: &str, path: &str) -> String {
    let base = prefix.trim_end_matches('/');
    let relative = path.trim_start_matches('/');
    match (base.is_empty(), relative.is_empty()) {
        (true, true) => String::new(),
        (true, false) => relative.to_owned(),
        (false, true) => base.to_owned(),
        (false, false) => format!("{base}/{relative}"),
    }
}

fn absolute_http_url(path: &str) -> Option<Result<Uri, Error>> {
    let uri = path.parse::<Uri>().ok()?;
    uri.host()?;
    let Some(scheme) = uri.scheme_str() else {
        return Some(Err(Error::InvalidUrl {
            url: path.to_owned(),
        }));
    };
    if scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https") {
        Some(Ok(uri))
    } else {
        Some(Err(Error::InvalidUrl {
            url: path.to_owned(),
        }))
    }
}

/// Resolves the target resource against an optional prefix.
///
/// An absolute `http(s)` URL bypasses the prefix. A relative path starting
/// with `/` while a prefix is in effect is rejected as an ambiguous join.
pub(crate) fn resolve_url(prefix: Option<&str>, path: &str) -> Result<(String, Uri), Error> {
    if let Some(absolute) = absolute_http_url(path) {
        let uri = absolute?;
        return Ok((path.to_owned(), uri));
    }

    let url_text = match prefix {
        Some(prefix) if !prefix.is_empty() => {
            if path.starts_with('/') {
                return Err(Error::Validation {
                    message: format!(
                        "path {path:?} must not start with '/' when a prefix url is set"
                    ),
                });
            }
            join_prefix_path(prefix, path)
        }
        _ => {
            return Err(Error::InvalidUrl {
                url: path.to_owned(),
            });
        }
    };
    let uri = url_text.parse().map_err(|_| Error::InvalidUrl {
        url: url_text.clone(),
    })?;
    Ok((url_text, uri))
}

pub(crate) fn validate_prefix_url(prefix: &str) -> Result<(), Error> {
    let invalid = || Error::InvalidUrl {
        url: prefix.to_owned(),
    };

    let normalized = prefix.trim();
    if normalized.len() != prefix.len() || normalized.is_empty() {
        return Err(invalid());
    }

    let parsed = url::Url::parse(normalized).map_err(|_| invalid())?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid());
    }
    if parsed.host_str().is_none() {
        return Err(invalid());
    }
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(invalid());
    }
    if parsed.query().is_some() || parsed.fragment().is_some() {
        return Err(invalid());
    }

    Ok(())
}

/// Query and userinfo stripped; used for tracing only. Errors carry the
/// requested URL verbatim.
pub(crate) fn redact_url_for_logs(url_text: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(url_text) else {
        return url_text.split('?').next().unwrap_or(url_text).to_owned();
    };

    let _ = parsed.set_username("");
    let _ = parsed.set_password(None);
    parsed.set_query(None);
    parsed.set_fragment(None);
    parsed.to_string()
}

pub(crate) fn parse_header_name(name: &str) -> Result<HeaderName, Error> {
    name.parse().map_err(|source| Error::InvalidHeaderName {
        name: name.to_owned(),
        source,
    })
}

pub(crate) fn parse_header_value(name: &str, value: &str) -> Result<HeaderValue, Error> {
    value.parse().map_err(|source| Error::InvalidHeaderValue {
        name: name.to_owned(),
        source,
    })
}

pub(crate) fn parse_retry_after(headers: &HeaderMap, now: SystemTime) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?;
    let raw_value = value.to_str().ok()?.trim();
    if let Ok(seconds) = raw_value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let date = httpdate::parse_http_date(raw_value).ok()?;
    match date.duration_since(now) {
        Ok(duration) => Some(duration),
        Err(_) => Some(Duration::ZERO),
    }
}

pub(crate) fn parse_content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

pub(crate) fn truncate_body(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.chars().count() <= MAX_ERROR_BODY_LEN {
        return text.into_owned();
    }

    let truncated: String = text.chars().take(MAX_ERROR_BODY_LEN).collect();
    format!("{truncated}...(truncated)")
}
