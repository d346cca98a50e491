//! HTTP codec limits
//!
//! Bounds enforced while parsing a message. All three limits exist to
//! protect the server from a hostile or broken peer: a giant declared
//! body, an endless header section, or an unbounded header count.

/// Default body size limit (512 KiB)
pub const DEFAULT_BODY_LIMIT: usize = 512 * 1024;

/// Default header section limit (8 KiB)
///
/// Covers the start line and every header line up to the blank-line
/// terminator.
pub const DEFAULT_HEADER_LIMIT: usize = 8 * 1024;

/// Default maximum number of header lines per message
pub const DEFAULT_MAX_HEADER_COUNT: usize = 64;

/// Parsing limits for one HTTP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpConfig {
    /// Largest `Content-Length` accepted before the decode fails.
    ///
    /// The check runs when the headers complete, before any body byte is
    /// buffered.
    pub body_limit: usize,
    /// Largest header section (start line included) in bytes.
    pub header_limit: usize,
    /// Most header lines accepted per message.
    pub max_header_count: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            body_limit: DEFAULT_BODY_LIMIT,
            header_limit: DEFAULT_HEADER_LIMIT,
            max_header_count: DEFAULT_MAX_HEADER_COUNT,
        }
    }
}

impl HttpConfig {
    /// Override the body size limit.
    #[must_use]
    pub const fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    /// Override the header section limit.
    #[must_use]
    pub const fn with_header_limit(mut self, limit: usize) -> Self {
        self.header_limit = limit;
        self
    }

    /// Override the header count limit.
    #[must_use]
    pub const fn with_max_header_count(mut self, count: usize) -> Self {
        self.max_header_count = count;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_overrides() {
        let config = HttpConfig::default();
        assert_eq!(config.body_limit, DEFAULT_BODY_LIMIT);
        assert_eq!(config.header_limit, DEFAULT_HEADER_LIMIT);

        let tight = HttpConfig::default()
            .with_body_limit(16)
            .with_header_limit(128)
            .with_max_header_count(4);
        assert_eq!(tight.body_limit, 16);
        assert_eq!(tight.header_limit, 128);
        assert_eq!(tight.max_header_count, 4);
    }
}
