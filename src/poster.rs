use url::Url;

use crate::models::Trailer;

const PLACEHOLDER_HOSTS: &[&str] =
    &["via.placeholder.com", "placeholder.com", "placehold.it", "placehold.co", "dummyimage.com"];

/// A poster reference is usable when it is an absolute http(s) URL that does
/// not point at a known placeholder service or placeholder asset.
pub fn is_valid_poster(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url.trim()) else {
        return false;
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return false;
    }
    let Some(host) = parsed.host_str() else {
        return false;
    };
    let host = host.to_ascii_lowercase();
    if PLACEHOLDER_HOSTS.iter().any(|p| host == *p || host.ends_with(&format!(".{p}"))) {
        return false;
    }
    !parsed.path().to_ascii_lowercase().contains("placeholder")
}

/// Generated stand-in image showing the title.
pub fn fallback_poster(title: &str) -> String {
    let label = if title.trim().is_empty() { "No Poster" } else { title.trim() };
    let label = label
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;");
    let svg = format!(
        concat!(
            r##"<svg xmlns="http://www.w3.org/2000/svg" width="300" height="450">"##,
            r##"<rect width="100%" height="100%" fill="#1f2937"/>"##,
            r##"<text x="50%" y="50%" text-anchor="middle" dy=".3em" fill="#9ca3af" "##,
            r##"font-family="Arial, sans-serif" font-size="14">{}</text></svg>"##
        ),
        label
    );
    format!("data:image/svg+xml;charset=utf-8,{}", urlencoding::encode(&svg))
}

/// The poster to display: the stored reference if valid, else the fallback.
pub fn display_poster(url: &str, title: &str) -> String {
    if is_valid_poster(url) { url.trim().to_string() } else { fallback_poster(title) }
}

/// Enforce the poster invariant on a trailer read from or written to the
/// backend.
pub fn sanitize(mut trailer: Trailer) -> Trailer {
    trailer.poster_url = display_poster(&trailer.poster_url, &trailer.title);
    trailer
}
