//! W3C WebDriver client over HTTP.

use crate::driver::{ElementId, WebDriver, WebDriverFactory};
use crate::step::Locator;
use anyhow::{anyhow, bail, Context, Result};
use reqwest::blocking::{Client, RequestBuilder};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Key under which W3C responses carry an element reference.
pub const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

pub const DEFAULT_URL: &str = "http://localhost:4444";

/// Browser session on a remote WebDriver server.
#[derive(Debug)]
pub struct RemoteWebDriver {
    http: Client,
    session_url: String,
}

impl RemoteWebDriver {
    /// Open a new session on the server at `url`.
    pub fn connect(http: Client, url: &Url, capabilities: Value) -> Result<Self> {
        let base = url.as_str().trim_end_matches('/');
        let body = json!({ "capabilities": { "alwaysMatch": capabilities } });
        let value = send(http.post(format!("{base}/session")).json(&body))
            .context("Failed to create WebDriver session")?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("session response has no sessionId: {}", value))?;
        info!("Opened WebDriver session {}", session_id);
        Ok(Self {
            http,
            session_url: format!("{base}/session/{session_id}"),
        })
    }

    fn get(&self, path: &str) -> Result<Value> {
        send(self.http.get(format!("{}{}", self.session_url, path)))
    }

    fn post(&self, path: &str, body: Value) -> Result<Value> {
        send(self.http.post(format!("{}{}", self.session_url, path)).json(&body))
    }

    fn get_string(&self, path: &str) -> Result<String> {
        let value = self.get(path)?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("expected a string from {}, got {}", path, value))
    }
}

/// Send `request` and unwrap the W3C `value` envelope.
fn send(request: RequestBuilder) -> Result<Value> {
    let response = request.send().context("WebDriver request failed")?;
    let status = response.status();
    let body: Value = response
        .json()
        .with_context(|| format!("Invalid WebDriver response (status {status})"))?;
    let value = body.get("value").cloned().unwrap_or(Value::Null);
    if !status.is_success() {
        let error = value.get("error").and_then(Value::as_str).unwrap_or("unknown error");
        let message = value.get("message").and_then(Value::as_str).unwrap_or("");
        bail!("WebDriver error {} ({}): {}", status.as_u16(), error, message);
    }
    Ok(value)
}

/// W3C location strategy and selector for `locator`.
pub fn strategy(locator: &Locator) -> Result<(&'static str, String)> {
    let value = locator.value.clone();
    Ok(match locator.kind.as_str() {
        "css" | "css selector" => ("css selector", value),
        "xpath" => ("xpath", value),
        "link" | "link text" | "linkText" => ("link text", value),
        "partial link text" | "partialLinkText" => ("partial link text", value),
        "tag name" | "tagName" => ("tag name", value),
        "id" => ("css selector", format!("[id=\"{}\"]", escape(&value))),
        "name" => ("css selector", format!("[name=\"{}\"]", escape(&value))),
        other => bail!("unsupported locator type '{}'", other),
    })
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

impl WebDriver for RemoteWebDriver {
    fn navigate(&self, url: &str) -> Result<()> {
        debug!("navigate {}", url);
        self.post("/url", json!({ "url": url }))?;
        Ok(())
    }

    fn current_url(&self) -> Result<String> {
        self.get_string("/url")
    }

    fn title(&self) -> Result<String> {
        self.get_string("/title")
    }

    fn page_source(&self) -> Result<String> {
        self.get_string("/source")
    }

    fn find_elements(&self, locator: &Locator) -> Result<Vec<ElementId>> {
        let (using, value) = strategy(locator)?;
        let found = self.post("/elements", json!({ "using": using, "value": value }))?;
        let Value::Array(elements) = found else {
            bail!("expected an element list for {}, got {}", locator, found);
        };
        elements
            .iter()
            .map(|element| {
                element
                    .get(ELEMENT_KEY)
                    .and_then(Value::as_str)
                    .map(|id| ElementId(id.to_string()))
                    .ok_or_else(|| anyhow!("malformed element reference: {}", element))
            })
            .collect()
    }

    fn click(&self, element: &ElementId) -> Result<()> {
        self.post(&format!("/element/{}/click", element.0), json!({}))?;
        Ok(())
    }

    fn clear(&self, element: &ElementId) -> Result<()> {
        self.post(&format!("/element/{}/clear", element.0), json!({}))?;
        Ok(())
    }

    fn send_keys(&self, element: &ElementId, text: &str) -> Result<()> {
        self.post(&format!("/element/{}/value", element.0), json!({ "text": text }))?;
        Ok(())
    }

    fn element_text(&self, element: &ElementId) -> Result<String> {
        self.get_string(&format!("/element/{}/text", element.0))
    }

    fn quit(&self) -> Result<()> {
        send(self.http.delete(&self.session_url))?;
        info!("Closed WebDriver session {}", self.session_url);
        Ok(())
    }
}

/// Opens [`RemoteWebDriver`] sessions.
///
/// Reads `url`, `browser`, `timeoutMs` and `capabilities` (a JSON object
/// merged into the requested capabilities) from the driver configuration.
#[derive(Debug, Default)]
pub struct RemoteWebDriverFactory;

impl RemoteWebDriverFactory {
    fn capabilities(config: &BTreeMap<String, String>) -> Result<Value> {
        let mut capabilities = Map::new();
        let browser = config.get("browser").map(String::as_str).unwrap_or("chrome");
        capabilities.insert("browserName".to_string(), Value::String(browser.to_string()));
        if let Some(extra) = config.get("capabilities") {
            let extra: Map<String, Value> =
                serde_json::from_str(extra).context("Invalid capabilities JSON")?;
            capabilities.extend(extra);
        }
        Ok(Value::Object(capabilities))
    }
}

impl WebDriverFactory for RemoteWebDriverFactory {
    fn make(&self, config: &BTreeMap<String, String>) -> Result<Arc<dyn WebDriver>> {
        let raw_url = config.get("url").map(String::as_str).unwrap_or(DEFAULT_URL);
        let url = Url::parse(raw_url).with_context(|| format!("Invalid WebDriver url '{raw_url}'"))?;
        let timeout = match config.get("timeoutMs") {
            Some(ms) => Duration::from_millis(ms.trim().parse().context("Invalid timeoutMs")?),
            None => Duration::from_secs(60),
        };
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        let driver = RemoteWebDriver::connect(http, &url, Self::capabilities(config)?)?;
        Ok(Arc::new(driver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locator_strategies() {
        assert_eq!(
            strategy(&Locator::css("#a")).unwrap(),
            ("css selector", "#a".to_string())
        );
        assert_eq!(
            strategy(&Locator::new("id", "user")).unwrap(),
            ("css selector", "[id=\"user\"]".to_string())
        );
        assert_eq!(
            strategy(&Locator::new("name", "q\"x")).unwrap(),
            ("css selector", "[name=\"q\\\"x\"]".to_string())
        );
        assert_eq!(
            strategy(&Locator::new("link text", "Home")).unwrap().0,
            "link text"
        );
        assert!(strategy(&Locator::new("image", "x.png")).is_err());
    }

    #[test]
    fn test_capabilities_merge_extra_json() {
        let mut config = BTreeMap::new();
        config.insert("browser".to_string(), "firefox".to_string());
        config.insert(
            "capabilities".to_string(),
            r#"{"acceptInsecureCerts": true}"#.to_string(),
        );
        let caps = RemoteWebDriverFactory::capabilities(&config).unwrap();
        assert_eq!(caps, json!({"browserName": "firefox", "acceptInsecureCerts": true}));
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        let mut config = BTreeMap::new();
        config.insert("url".to_string(), "not a url".to_string());
        let err = RemoteWebDriverFactory.make(&config).unwrap_err();
        assert!(err.to_string().contains("Invalid WebDriver url"));
    }
}
