use archviz_contracts::location::Location;

use crate::datauri;

pub const SVG_MIME: &str = "image/svg+xml";

pub fn placeholder_data_uri(location: &Location) -> String {
    datauri::encode(SVG_MIME, placeholder_svg(location).as_bytes())
}

pub fn placeholder_svg(location: &Location) -> String {
    let address = if location.address.is_empty() {
        "Unknown location".to_string()
    } else {
        escape_xml(&location.address)
    };
    format!(
        concat!(
            r##"<svg xmlns="http://www.w3.org/2000/svg" width="512" height="512" "##,
            r##"viewBox="0 0 512 512">"##,
            r##"<rect width="512" height="512" fill="#d9dee6"/>"##,
            r##"<text x="256" y="240" font-family="sans-serif" font-size="20" "##,
            r##"text-anchor="middle" fill="#2e3440">{lat:.6}, {lng:.6}</text>"##,
            r##"<text x="256" y="276" font-family="sans-serif" font-size="16" "##,
            r##"text-anchor="middle" fill="#4c566a">{address}</text>"##,
            "</svg>"
        ),
        lat = location.lat,
        lng = location.lng,
        address = address,
    )
}

fn escape_xml(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}
