//! Embedded static assets (out-of-scope "embedded static asset server" per
//! the core's component boundary, but the HTTP route table still needs to
//! serve them).

use rust_embed::RustEmbed;

#[derive(RustEmbed)]
#[folder = "assets/"]
pub struct Assets;

/// `{{name}}` substitution, the same tiny template engine used for window
/// titles in `webtty-core::engine::render_title`, reused here so the index
/// page and manifest can be templated without pulling in a templating crate
/// dependency.
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (name, value) in vars {
        out = out.replace(&format!("{{{{{name}}}}}"), value);
    }
    out
}

pub fn index_html(title: &str) -> String {
    let template = std::str::from_utf8(
        &Assets::get("index.html")
            .expect("index.html embedded")
            .data,
    )
    .expect("index.html is utf8")
    .to_string();
    render_template(&template, &[("title", title)])
}

pub fn manifest_webmanifest(title: &str) -> String {
    let template = std::str::from_utf8(
        &Assets::get("manifest.webmanifest")
            .expect("manifest.webmanifest embedded")
            .data,
    )
    .expect("manifest.webmanifest is utf8")
    .to_string();
    render_template(&template, &[("title", title)])
}
