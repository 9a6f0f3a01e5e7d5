use std::path::Path;

use anyhow::{bail, Context, Result};
use archviz_contracts::manifest::Manifest;
use reqwest::blocking::Client as HttpClient;

use crate::backend::truncate_text;

pub fn load_manifest(source: &str, http: &HttpClient) -> Result<Manifest> {
    let source = source.trim();
    if source.is_empty() {
        bail!("manifest source is empty");
    }
    if is_remote(source) {
        let response = http
            .get(source)
            .send()
            .with_context(|| format!("failed fetching manifest {source}"))?;
        let status = response.status();
        let body = response
            .text()
            .with_context(|| format!("failed reading manifest body from {source}"))?;
        if !status.is_success() {
            bail!(
                "manifest fetch failed ({}): {}",
                status.as_u16(),
                truncate_text(body.trim(), 256)
            );
        }
        return Manifest::from_json(&body)
            .with_context(|| format!("manifest at {source} is invalid"));
    }
    Manifest::from_path(Path::new(source))
}

fn is_remote(source: &str) -> bool {
    let lowered = source.to_ascii_lowercase();
    lowered.starts_with("http://") || lowered.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::Duration;

    use reqwest::blocking::Client as HttpClient;
    use tempfile::tempdir;

    use super::{is_remote, load_manifest};

    #[test]
    fn loads_local_file() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let path = temp.path().join("prompts.json");
        fs::write(
            &path,
            r#"{"version":2,"hologram_generator":{"model":"m","prompt_template":"${address}"}}"#,
        )?;
        let manifest = load_manifest(&path.to_string_lossy(), &HttpClient::new())?;
        assert_eq!(manifest.keys().collect::<Vec<_>>(), vec!["hologram_generator"]);
        Ok(())
    }

    #[test]
    fn missing_file_and_unreachable_url_are_errors() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let http = HttpClient::builder()
            .timeout(Duration::from_millis(500))
            .build()?;
        assert!(load_manifest(&temp.path().join("nope.json").to_string_lossy(), &http).is_err());
        assert!(load_manifest("http://127.0.0.1:9/prompts.json", &http).is_err());
        assert!(load_manifest("  ", &http).is_err());
        Ok(())
    }

    #[test]
    fn scheme_detection_is_case_insensitive() {
        assert!(is_remote("HTTPS://cdn.example.com/prompts.json"));
        assert!(!is_remote("./prompts.json"));
    }
}
