use once_cell::sync::Lazy;
use regex::Regex;

static IMG_SRC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<img\b[^>]*?\ssrc\s*=\s*["']([^"'>]+)["']"#).expect("valid img regex")
});

// <p-->, <div -->, ...
static MALFORMED_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<([a-zA-Z][a-zA-Z0-9]*)\s*--+>").expect("valid malformed tag regex")
});

// <img src="x"-->, <br class="y"-->, ...
static MALFORMED_VOID_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<(img|br|hr|input|meta|link)\s+([^>]*?)--+>")
        .expect("valid malformed void tag regex")
});

/// The `src` of the first `<img>` tag in an HTML fragment.
pub fn first_image_src(html: &str) -> Option<&str> {
    IMG_SRC
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Repair malformed tags some feeds emit (`<p-->`, `<img ...-->`) and trim.
pub fn clean_html(html: &str) -> String {
    if html.is_empty() {
        return String::new();
    }

    let html = MALFORMED_TAG.replace_all(html, "<$1>");
    let html = MALFORMED_VOID_TAG.replace_all(&html, "<$1 $2>");
    html.trim().to_string()
}
