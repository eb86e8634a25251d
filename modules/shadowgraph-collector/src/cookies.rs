use std::path::Path;

use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use serde::Deserialize;

use crate::error::{CollectError, Result};

/// One entry of the externally captured cookie bundle. The capture tool's
/// format carries more fields; only these matter for session restore.
#[derive(Debug, Deserialize)]
struct CookieRecord {
    name: String,
    value: String,
    #[serde(default)]
    domain: Option<String>,
    #[serde(default)]
    path: Option<String>,
}

/// Load a cookie bundle (JSON array) into CDP cookie params.
pub fn load_bundle(path: &Path) -> Result<Vec<CookieParam>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| CollectError::Cookies(format!("reading {}: {e}", path.display())))?;
    let records: Vec<CookieRecord> = serde_json::from_str(&raw)
        .map_err(|e| CollectError::Cookies(format!("parsing {}: {e}", path.display())))?;

    records
        .into_iter()
        .map(|r| {
            let mut builder = CookieParam::builder().name(r.name).value(r.value);
            if let Some(domain) = r.domain {
                builder = builder.domain(domain);
            }
            if let Some(path) = r.path {
                builder = builder.path(path);
            }
            builder.build().map_err(CollectError::Cookies)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_bundle() {
        let dir = std::env::temp_dir();
        let path = dir.join("shadowgraph-test-cookies.json");
        std::fs::write(
            &path,
            r#"[{"name": "auth_token", "value": "abc", "domain": ".x.com", "path": "/"}]"#,
        )
        .unwrap();

        let cookies = load_bundle(&path).unwrap();
        assert_eq!(cookies.len(), 1);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn rejects_malformed_bundle() {
        let dir = std::env::temp_dir();
        let path = dir.join("shadowgraph-test-cookies-bad.json");
        std::fs::write(&path, "{not a list}").unwrap();
        assert!(load_bundle(&path).is_err());
        std::fs::remove_file(&path).ok();
    }
}
