use crate::UrlError;
use url::Url;

/// Computes the canonical path of an image URL
///
/// The canonical path is the identity of an image inside the cache: the URL
/// path without its leading slash, with duplicate slashes collapsed and any
/// responsive-size suffix (`-300x200`) removed from the file name. The query
/// string and fragment never take part.
///
/// # Errors
///
/// * `InvalidScheme` - the URL is not HTTP(S)
/// * `Malformed` - the URL has no path to identify an image by
/// * `UnsupportedImage` - the URL points at an SVG
///
/// # Examples
///
/// ```
/// use imgedge::url::canonical_path;
/// use url::Url;
///
/// let url = Url::parse("https://example.com/wp-content/uploads/photo-300x200.jpg?v=2").unwrap();
/// assert_eq!(canonical_path(&url).unwrap(), "wp-content/uploads/photo.jpg");
/// ```
pub fn canonical_path(url: &Url) -> Result<String, UrlError> {
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(url.scheme().to_string()));
    }
    if url.host_str().is_none() {
        return Err(UrlError::MissingDomain);
    }

    let segments: Vec<&str> = url
        .path()
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();

    if segments.is_empty() {
        return Err(UrlError::Malformed(format!("no image path in {}", url)));
    }
    if segments.iter().any(|s| *s == "..") {
        return Err(UrlError::Malformed(format!("dot segments in {}", url)));
    }

    let joined = segments.join("/");
    if joined.to_ascii_lowercase().ends_with(".svg") {
        return Err(UrlError::UnsupportedImage(format!("SVG image {}", url)));
    }

    Ok(strip_dimension_suffix(&joined))
}

/// Strips a trailing `-<width>x<height>` suffix from a path's file name
///
/// Only applies when the file has an extension, so `photo-300x200.jpg`
/// becomes `photo.jpg` while `photo-300x200` stays untouched.
pub fn strip_dimension_suffix(path: &str) -> String {
    let (dir, file) = match path.rfind('/') {
        Some(i) => path.split_at(i + 1),
        None => ("", path),
    };

    let (stem, ext) = match file.rfind('.') {
        Some(i) if i > 0 && i + 1 < file.len() => file.split_at(i),
        _ => return path.to_string(),
    };

    match stem.rfind('-') {
        Some(i) if i > 0 && is_dimension(&stem[i + 1..]) => {
            format!("{}{}{}", dir, &stem[..i], ext)
        }
        _ => path.to_string(),
    }
}

/// Matches `<digits>x<digits>`
fn is_dimension(s: &str) -> bool {
    match s.split_once('x') {
        Some((w, h)) => {
            !w.is_empty()
                && !h.is_empty()
                && w.bytes().all(|b| b.is_ascii_digit())
                && h.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}
