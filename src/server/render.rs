//! HTML pages for the web form

use crate::proxy::models::ProxyAddress;

/// Landing page with the candidate textarea
pub fn form_page() -> String {
    page(
        "Proxy checker",
        r#"<h1>Proxy checker</h1>
<form method="post" action="/check">
  <p>One IP:PORT per line.</p>
  <textarea name="proxies" rows="20" cols="40" placeholder="127.0.0.1:8080"></textarea>
  <br>
  <button type="submit">Check</button>
</form>"#,
    )
}

/// Table of live proxies
pub fn proxies_table<'a>(proxies: impl IntoIterator<Item = &'a ProxyAddress>) -> String {
    let rows: String = proxies
        .into_iter()
        .map(|proxy| format!("    <tr><td>{}</td></tr>\n", escape(&proxy.to_string())))
        .collect();

    let body = if rows.is_empty() {
        "<p>No live proxies found.</p>".to_string()
    } else {
        format!("<table>\n  <thead><tr><th>Proxy</th></tr></thead>\n  <tbody>\n{rows}  </tbody>\n</table>")
    };

    page("Live proxies", &format!("<h1>Live proxies</h1>\n{body}\n<p><a href=\"/\">Check more</a></p>"))
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n</head>\n<body>\n{}\n</body>\n</html>\n",
        escape(title),
        body
    )
}

/// Escape text for an HTML element body
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
