//! Header storage and name interning
//!
//! Incoming header names are matched against a precomputed lowercase
//! lookup table so the common ones resolve to a shared `&'static str`
//! with no allocation. Unknown names are kept by their literal spelling.
//! The same module owns the small-integer decimal cache used on the
//! `Content-Length` hot path.

use std::borrow::Cow;

use hashbrown::HashMap;
use once_cell::sync::Lazy;
use smallvec::SmallVec;

/// Canonical `Content-Length` spelling.
pub const CONTENT_LENGTH: &str = "Content-Length";
/// Canonical `Content-Type` spelling.
pub const CONTENT_TYPE: &str = "Content-Type";
/// Canonical `Transfer-Encoding` spelling.
pub const TRANSFER_ENCODING: &str = "Transfer-Encoding";
/// Canonical `Host` spelling.
pub const HOST: &str = "Host";
/// Canonical `Connection` spelling.
pub const CONNECTION: &str = "Connection";

/// A header name: a shared canonical spelling or an owned literal one.
pub type HeaderName = Cow<'static, str>;

/// Lowercase name -> canonical spelling, for the headers worth interning.
const KNOWN_NAMES: &[(&str, &str)] = &[
    ("accept", "Accept"),
    ("accept-encoding", "Accept-Encoding"),
    ("accept-language", "Accept-Language"),
    ("authorization", "Authorization"),
    ("cache-control", "Cache-Control"),
    ("connection", CONNECTION),
    ("content-encoding", "Content-Encoding"),
    ("content-length", CONTENT_LENGTH),
    ("content-type", CONTENT_TYPE),
    ("cookie", "Cookie"),
    ("date", "Date"),
    ("expect", "Expect"),
    ("host", HOST),
    ("if-modified-since", "If-Modified-Since"),
    ("if-none-match", "If-None-Match"),
    ("location", "Location"),
    ("origin", "Origin"),
    ("referer", "Referer"),
    ("server", "Server"),
    ("set-cookie", "Set-Cookie"),
    ("transfer-encoding", TRANSFER_ENCODING),
    ("upgrade", "Upgrade"),
    ("user-agent", "User-Agent"),
];

static CANONICAL: Lazy<HashMap<&'static str, &'static str>> =
    Lazy::new(|| KNOWN_NAMES.iter().copied().collect());

/// Resolve a parsed header name to its canonical form.
///
/// Known names come back borrowed; unknown names are retained by their
/// literal spelling.
#[must_use]
pub fn canonical_name(name: &str) -> HeaderName {
    let mut lower: SmallVec<[u8; 32]> = SmallVec::with_capacity(name.len());
    lower.extend(name.bytes().map(|b| b.to_ascii_lowercase()));
    std::str::from_utf8(&lower)
        .ok()
        .and_then(|key| CANONICAL.get(key))
        .map_or_else(|| Cow::Owned(name.to_owned()), |c| Cow::Borrowed(*c))
}

const DECIMAL_CACHE_SIZE: usize = 1024;

static DECIMAL: Lazy<Vec<String>> =
    Lazy::new(|| (0..DECIMAL_CACHE_SIZE).map(|n| n.to_string()).collect());

/// Decimal rendering of `n`, served from a precomputed table for small
/// values so the content-length path does not format per message.
#[must_use]
pub fn decimal(n: usize) -> Cow<'static, str> {
    if n < DECIMAL_CACHE_SIZE {
        Cow::Borrowed(DECIMAL[n].as_str())
    } else {
        Cow::Owned(n.to_string())
    }
}

/// Ordered multimap of header lines.
///
/// Insertion order is preserved and duplicates are allowed; lookups are
/// ASCII case-insensitive. Most messages fit the inline capacity.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: SmallVec<[(HeaderName, String); 8]>,
}

impl Headers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one header line.
    pub fn insert(&mut self, name: impl Into<HeaderName>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First value under `name`, matched case-insensitively.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether any line under `name` exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Remove every line under `name`, returning the first removed value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let mut first = None;
        self.entries.retain(|(n, v)| {
            if n.eq_ignore_ascii_case(name) {
                if first.is_none() {
                    first = Some(std::mem::take(v));
                }
                false
            } else {
                true
            }
        });
        first
    }

    /// Number of header lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Header lines in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_ref(), v.as_str()))
    }
}
