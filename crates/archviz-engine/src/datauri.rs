use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

pub const PNG_MIME: &str = "image/png";

pub fn encode(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", BASE64.encode(bytes))
}

pub fn png_from_base64(b64: &str) -> String {
    format!("data:{PNG_MIME};base64,{}", b64.trim())
}

pub fn is_data_uri(value: &str) -> bool {
    value.starts_with("data:")
}

pub fn decode(uri: &str) -> Result<(String, Vec<u8>)> {
    let Some(rest) = uri.strip_prefix("data:") else {
        bail!("not a data URI");
    };
    let Some((header, payload)) = rest.split_once(',') else {
        bail!("data URI has no payload separator");
    };
    let Some(mime) = header.strip_suffix(";base64") else {
        bail!("only base64 data URIs are supported");
    };
    let bytes = BASE64
        .decode(payload.trim().as_bytes())
        .context("data URI base64 decode failed")?;
    let mime = if mime.is_empty() { "text/plain" } else { mime };
    Ok((mime.to_string(), bytes))
}

pub fn extension_for_mime(mime: &str) -> &'static str {
    let lowered = mime.to_ascii_lowercase();
    if lowered.contains("jpeg") || lowered.contains("jpg") {
        return "jpg";
    }
    if lowered.contains("webp") {
        return "webp";
    }
    if lowered.contains("svg") {
        return "svg";
    }
    if lowered.contains("gif") {
        return "gif";
    }
    "png"
}
