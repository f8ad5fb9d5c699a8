//! W3C WebDriver client (chromedriver and compatible endpoints).

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, trace, warn};

use crate::{BrowserContext, BrowserError, Selector};

/// Key under which WebDriver returns element references.
pub const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

#[derive(Debug, Clone)]
pub struct WebDriverConfig {
    pub endpoint: String,
    pub headless: bool,
    /// Chrome profile directory; authentication cookies persist here.
    pub profile_dir: Option<PathBuf>,
    pub page_load_timeout: Duration,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
}

impl WebDriverConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            headless: false,
            profile_dir: None,
            page_load_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(250),
            request_timeout: Duration::from_secs(90),
        }
    }

    fn capabilities(&self) -> Value {
        let mut args = vec!["--window-size=1366,900".to_string()];
        if self.headless {
            args.push("--headless=new".to_string());
        }
        if let Some(dir) = &self.profile_dir {
            args.push(format!("--user-data-dir={}", dir.display()));
        }
        json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "timeouts": { "pageLoad": self.page_load_timeout.as_millis() as u64 },
                    "goog:chromeOptions": { "args": args }
                }
            }
        })
    }
}

pub struct WebDriverSession {
    http: reqwest::Client,
    session_url: String,
    session_id: String,
    poll_interval: Duration,
}

impl WebDriverSession {
    pub async fn start(config: &WebDriverConfig) -> Result<Self, BrowserError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        let url = format!("{}/session", config.endpoint);
        let value = send(&http, Method::POST, &url, Some(config.capabilities())).await?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| BrowserError::InvalidResponse("new session has no sessionId".into()))?
            .to_string();

        info!(
            endpoint = %config.endpoint,
            session = %session_id,
            headless = config.headless,
            "webdriver session started"
        );
        Ok(Self {
            http,
            session_url: format!("{}/session/{}", config.endpoint, session_id),
            session_id,
            poll_interval: config.poll_interval,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Ends the browser session.
    pub async fn close(self) -> Result<(), BrowserError> {
        send(&self.http, Method::DELETE, &self.session_url, None).await?;
        info!(session = %self.session_id, "webdriver session closed");
        Ok(())
    }

    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, BrowserError> {
        let url = format!("{}/{}", self.session_url, path);
        send(&self.http, method, &url, body).await
    }

    async fn find_all(&self, selector: &Selector) -> Result<Vec<String>, BrowserError> {
        let (using, value) = selector.locator();
        let found = self
            .command(Method::POST, "elements", Some(json!({ "using": using, "value": value })))
            .await?;
        let elements = found
            .as_array()
            .ok_or_else(|| BrowserError::InvalidResponse("elements is not an array".into()))?;
        elements.iter().map(element_id).collect()
    }

    async fn find_one(&self, selector: &Selector) -> Result<String, BrowserError> {
        let (using, value) = selector.locator();
        let found = self
            .command(Method::POST, "element", Some(json!({ "using": using, "value": value })))
            .await
            .map_err(|err| match err {
                BrowserError::WebDriver { error, .. } if error == "no such element" => {
                    BrowserError::NoSuchElement(selector.to_string())
                }
                other => other,
            })?;
        element_id(&found)
    }
}

fn element_id(value: &Value) -> Result<String, BrowserError> {
    value
        .get(ELEMENT_KEY)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| BrowserError::InvalidResponse(format!("not an element reference: {value}")))
}

async fn send(
    http: &reqwest::Client,
    method: Method,
    url: &str,
    body: Option<Value>,
) -> Result<Value, BrowserError> {
    trace!(%method, url, "webdriver request");
    let mut request = http.request(method, url);
    if let Some(body) = body {
        request = request.json(&body);
    }
    let response = request.send().await?;
    let status = response.status();
    let mut payload: Value = response.json().await?;
    let value = payload
        .get_mut("value")
        .map(Value::take)
        .ok_or_else(|| BrowserError::InvalidResponse(format!("{status} response without value")))?;

    if status.is_success() {
        return Ok(value);
    }
    match value.get("error").and_then(Value::as_str) {
        Some(error) => Err(BrowserError::WebDriver {
            error: error.to_string(),
            message: value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }),
        None => Err(BrowserError::Http(format!("webdriver returned {status}"))),
    }
}

#[async_trait]
impl BrowserContext for WebDriverSession {
    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        debug!(url, "navigating");
        self.command(Method::POST, "url", Some(json!({ "url": url })))
            .await?;
        Ok(())
    }

    async fn wait_for_element(&self, selector: &Selector, timeout: Duration) -> Result<(), BrowserError> {
        let started = Instant::now();
        loop {
            if !self.find_all(selector).await?.is_empty() {
                debug!(%selector, waited = ?started.elapsed(), "element present");
                return Ok(());
            }
            if started.elapsed() >= timeout {
                return Err(BrowserError::Timeout {
                    what: selector.to_string(),
                    waited: timeout,
                });
            }
            sleep(self.poll_interval).await;
        }
    }

    async fn read_texts(&self, selector: &Selector) -> Result<Vec<String>, BrowserError> {
        let mut texts = Vec::new();
        for id in self.find_all(selector).await? {
            match self
                .command(Method::GET, &format!("element/{id}/text"), None)
                .await
            {
                Ok(Value::String(text)) => texts.push(text),
                Ok(other) => warn!(%selector, value = %other, "element text is not a string"),
                // The page may re-render between lookup and read.
                Err(BrowserError::WebDriver { error, .. }) if error == "stale element reference" => {
                    debug!(%selector, "skipping stale element");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(texts)
    }

    async fn fill_field(&self, selector: &Selector, value: &str) -> Result<(), BrowserError> {
        let id = self.find_one(selector).await?;
        self.command(
            Method::POST,
            &format!("element/{id}/value"),
            Some(json!({ "text": value })),
        )
        .await?;
        Ok(())
    }

    async fn click(&self, selector: &Selector) -> Result<(), BrowserError> {
        let id = self.find_one(selector).await?;
        self.command(Method::POST, &format!("element/{id}/click"), Some(json!({})))
            .await?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        match self.command(Method::GET, "url", None).await? {
            Value::String(url) => Ok(url),
            other => Err(BrowserError::InvalidResponse(format!("url is not a string: {other}"))),
        }
    }

    async fn execute_script(&self, script: &str) -> Result<Value, BrowserError> {
        self.command(
            Method::POST,
            "execute/sync",
            Some(json!({ "script": script, "args": [] })),
        )
        .await
    }
}
