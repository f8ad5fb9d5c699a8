//! Browser context seam and its WebDriver-backed implementation.

mod error;
mod webdriver;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

pub use error::BrowserError;
pub use webdriver::{WebDriverConfig, WebDriverSession, ELEMENT_KEY};

/// Element locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Id(String),
    Tag(String),
    XPath(String),
    Css(String),
}

impl Selector {
    pub fn id(id: impl Into<String>) -> Self {
        Selector::Id(id.into())
    }

    pub fn tag(tag: impl Into<String>) -> Self {
        Selector::Tag(tag.into())
    }

    pub fn xpath(xpath: impl Into<String>) -> Self {
        Selector::XPath(xpath.into())
    }

    pub fn css(css: impl Into<String>) -> Self {
        Selector::Css(css.into())
    }

    /// W3C locator strategy and value.
    pub fn locator(&self) -> (&'static str, String) {
        match self {
            Selector::Id(id) => ("css selector", format!("[id=\"{}\"]", id.replace('"', "\\\""))),
            Selector::Tag(tag) => ("tag name", tag.clone()),
            Selector::XPath(xpath) => ("xpath", xpath.clone()),
            Selector::Css(css) => ("css selector", css.clone()),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Id(id) => write!(f, "#{id}"),
            Selector::Tag(tag) => write!(f, "<{tag}>"),
            Selector::XPath(xpath) => write!(f, "xpath {xpath}"),
            Selector::Css(css) => write!(f, "css {css}"),
        }
    }
}

/// A live, authenticated-or-not page the monitor drives.
#[async_trait]
pub trait BrowserContext: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), BrowserError>;

    /// Waits until at least one element matches, or fails with
    /// [`BrowserError::Timeout`].
    async fn wait_for_element(&self, selector: &Selector, timeout: Duration)
        -> Result<(), BrowserError>;

    /// Visible text of every matching element, in document order.
    async fn read_texts(&self, selector: &Selector) -> Result<Vec<String>, BrowserError>;

    async fn fill_field(&self, selector: &Selector, value: &str) -> Result<(), BrowserError>;

    async fn click(&self, selector: &Selector) -> Result<(), BrowserError>;

    async fn current_url(&self) -> Result<String, BrowserError>;

    async fn execute_script(&self, script: &str) -> Result<Value, BrowserError>;
}
