use super::format::ImageFormat;

/// Picks the best image encoding a client can display
///
/// Preference order is AVIF, then WebP, then JPEG. Negotiation is pure: no
/// I/O, and the same headers always produce the same answer.
pub struct FormatNegotiator;

impl FormatNegotiator {
    /// Negotiates from an `Accept` header
    ///
    /// A format is accepted only when its media type is listed explicitly
    /// with a non-zero quality; wildcards such as `image/*` do not count.
    ///
    /// # Examples
    ///
    /// ```
    /// use imgedge::{FormatNegotiator, ImageFormat};
    ///
    /// assert_eq!(FormatNegotiator::negotiate("image/avif,image/webp,*/*"), ImageFormat::Avif);
    /// assert_eq!(FormatNegotiator::negotiate("image/webp,*/*"), ImageFormat::Webp);
    /// assert_eq!(FormatNegotiator::negotiate(""), ImageFormat::Jpeg);
    /// ```
    pub fn negotiate(accept: &str) -> ImageFormat {
        let accepts = |media_type: &str| {
            media_ranges(accept).any(|(range, q)| range == media_type && q > 0.0)
        };

        if accepts("image/avif") {
            ImageFormat::Avif
        } else if accepts("image/webp") {
            ImageFormat::Webp
        } else {
            ImageFormat::Jpeg
        }
    }

    /// Negotiates from a `User-Agent` when the `Accept` header says nothing
    ///
    /// Chromium-family browsers from version 90, Firefox from 92 and Safari
    /// from 16 decode AVIF. Older releases of those browsers get WebP;
    /// anything unrecognized gets JPEG.
    pub fn negotiate_user_agent(user_agent: &str) -> ImageFormat {
        let ua = user_agent.to_ascii_lowercase();

        let chromium = ["edg/", "opr/", "chrome/"]
            .iter()
            .find_map(|marker| version_after(&ua, marker));
        let firefox = version_after(&ua, "firefox/");
        let safari = if ua.contains("safari/") && chromium.is_none() {
            Some(version_after(&ua, "version/").unwrap_or(0))
        } else {
            None
        };

        match (chromium, firefox, safari) {
            (Some(v), _, _) if v >= 90 => ImageFormat::Avif,
            (_, Some(v), _) if v >= 92 => ImageFormat::Avif,
            (_, _, Some(v)) if v >= 16 => ImageFormat::Avif,
            (Some(_), _, _) | (_, Some(_), _) | (_, _, Some(_)) => ImageFormat::Webp,
            _ => ImageFormat::Jpeg,
        }
    }

    /// Negotiates for a request, preferring `Accept` over `User-Agent`
    ///
    /// The `User-Agent` is consulted only when `Accept` is missing or lists
    /// no concrete image media type.
    pub fn negotiate_request(accept: Option<&str>, user_agent: Option<&str>) -> ImageFormat {
        match (accept, user_agent) {
            (Some(accept), _) if mentions_image_type(accept) => Self::negotiate(accept),
            (_, Some(ua)) => Self::negotiate_user_agent(ua),
            _ => ImageFormat::Jpeg,
        }
    }
}

/// Iterates `(media-range, q)` pairs of an `Accept` header
fn media_ranges(accept: &str) -> impl Iterator<Item = (String, f32)> + '_ {
    accept.split(',').filter_map(|entry| {
        let mut parts = entry.split(';');
        let range = parts.next()?.trim().to_ascii_lowercase();
        if range.is_empty() {
            return None;
        }
        let q = parts
            .filter_map(|p| p.trim().strip_prefix("q="))
            .find_map(|v| v.trim().parse::<f32>().ok())
            .unwrap_or(1.0);
        Some((range, q))
    })
}

fn mentions_image_type(accept: &str) -> bool {
    media_ranges(accept).any(|(range, _)| range.starts_with("image/") && range != "image/*")
}

/// Reads the major version number that follows `marker`
fn version_after(ua: &str, marker: &str) -> Option<u32> {
    let start = ua.find(marker)? + marker.len();
    let digits: String = ua[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}
