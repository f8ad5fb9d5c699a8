use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::*;

const TARGET: &str = "https://shop.example/collections/macbooks?filter.v.availability=1";
const LOGIN_URL: &str = "https://shop.example/account/login";

struct Storefront {
    signed_in: bool,
    renders: bool,
    has_login_form: bool,
    valid: (String, String),
    url: String,
    texts: Vec<String>,
    filled: HashMap<String, String>,
    submits: usize,
}

/// In-memory stand-in for the storefront behind a browser context.
struct FakeBrowser(Mutex<Storefront>);

impl FakeBrowser {
    fn new(signed_in: bool) -> Self {
        Self(Mutex::new(Storefront {
            signed_in,
            renders: true,
            has_login_form: true,
            valid: ("me@example.com".into(), "hunter2".into()),
            url: String::new(),
            texts: Vec::new(),
            filled: HashMap::new(),
            submits: 0,
        }))
    }

    fn with<R>(&self, f: impl FnOnce(&mut Storefront) -> R) -> R {
        f(&mut self.0.lock().unwrap())
    }
}

impl Storefront {
    fn load_target(&mut self) {
        self.url = TARGET.to_string();
        self.texts = if self.signed_in {
            vec!["Refurbished MacBooks".into(), "Free shipping".into()]
        } else {
            vec!["Refurbished MacBooks".into(), DEFAULT_SENTINEL.into()]
        };
    }
}

fn timeout(selector: &Selector) -> BrowserError {
    BrowserError::Timeout {
        what: selector.to_string(),
        waited: Duration::from_millis(1),
    }
}

#[async_trait]
impl BrowserContext for FakeBrowser {
    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        self.with(|s| {
            if url == TARGET {
                s.load_target();
            } else {
                s.url = url.to_string();
                s.texts.clear();
            }
        });
        Ok(())
    }

    async fn wait_for_element(&self, selector: &Selector, _timeout: Duration) -> Result<(), BrowserError> {
        self.with(|s| {
            let present = match selector {
                Selector::Tag(tag) if tag == "p" => s.renders,
                Selector::Id(id) if id == "customer-email" => s.has_login_form && !s.signed_in,
                _ => false,
            };
            if present {
                Ok(())
            } else {
                Err(timeout(selector))
            }
        })
    }

    async fn read_texts(&self, _selector: &Selector) -> Result<Vec<String>, BrowserError> {
        Ok(self.with(|s| s.texts.clone()))
    }

    async fn fill_field(&self, selector: &Selector, value: &str) -> Result<(), BrowserError> {
        self.with(|s| {
            if !s.has_login_form {
                return Err(BrowserError::NoSuchElement(selector.to_string()));
            }
            s.filled.insert(selector.to_string(), value.to_string());
            Ok(())
        })
    }

    async fn click(&self, selector: &Selector) -> Result<(), BrowserError> {
        self.with(|s| {
            if !s.has_login_form {
                return Err(BrowserError::NoSuchElement(selector.to_string()));
            }
            s.submits += 1;
            let email = s.filled.get("#customer-email").cloned().unwrap_or_default();
            let password = s.filled.get("#customer-password").cloned().unwrap_or_default();
            if (email, password) == s.valid {
                s.signed_in = true;
                s.load_target();
            } else {
                s.url = LOGIN_URL.to_string();
            }
            Ok(())
        })
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        Ok(self.with(|s| s.url.clone()))
    }

    async fn execute_script(&self, _script: &str) -> Result<Value, BrowserError> {
        Ok(json!(null))
    }
}

fn fast_timeouts() -> SessionTimeouts {
    SessionTimeouts {
        render: Duration::from_millis(20),
        login_redirect: Duration::from_millis(30),
        pre_submit: Duration::ZERO,
        settle: Duration::ZERO,
        poll: Duration::from_millis(5),
    }
}

fn validator(password: &str) -> SessionValidator {
    let credentials = Credentials::new("me@example.com", password).unwrap();
    SessionValidator::new(LoginPage::new(TARGET), credentials).with_timeouts(fast_timeouts())
}

#[tokio::test]
async fn signed_in_context_needs_no_login() {
    let browser = FakeBrowser::new(true);
    let mut validator = validator("hunter2");

    let state = validator.ensure_authenticated(&browser).await.unwrap();
    assert_eq!(state, SessionState::Authenticated);
    assert_eq!(validator.state(), SessionState::Authenticated);
    assert_eq!(validator.login_attempts(), 0);
    assert_eq!(browser.with(|s| s.submits), 0);
}

#[tokio::test]
async fn sentinel_anywhere_means_signed_out() {
    let page = LoginPage::new(TARGET);
    let cases: [(Vec<String>, SessionState); 4] = [
        (vec![DEFAULT_SENTINEL.into()], SessionState::Unauthenticated),
        (
            vec!["a".into(), "b".into(), format!("Notice: {DEFAULT_SENTINEL} Thanks.")],
            SessionState::Unauthenticated,
        ),
        (
            vec![DEFAULT_SENTINEL.to_string(), "footer".into()],
            SessionState::Unauthenticated,
        ),
        (
            vec!["This content is protected.".into(), "Please log in".into()],
            SessionState::Authenticated,
        ),
    ];

    for (texts, expected) in cases {
        let browser = FakeBrowser::new(true);
        browser.with(|s| s.texts = texts.clone());
        let state = classify_page(&browser, &page, Duration::from_millis(5))
            .await
            .unwrap();
        assert_eq!(state, expected, "{texts:?}");
    }
}

#[tokio::test]
async fn unrendered_page_counts_as_signed_out() {
    let browser = FakeBrowser::new(true);
    browser.with(|s| s.renders = false);
    let mut validator = validator("hunter2");

    assert_eq!(
        validator.classify(&browser).await.unwrap(),
        SessionState::Unauthenticated
    );
}

#[tokio::test]
async fn login_wall_triggers_single_login() {
    let browser = FakeBrowser::new(false);
    let mut validator = validator("hunter2");

    let state = validator.ensure_authenticated(&browser).await.unwrap();
    assert_eq!(state, SessionState::Authenticated);
    assert_eq!(validator.login_attempts(), 1);
    browser.with(|s| {
        assert_eq!(s.submits, 1);
        assert_eq!(s.filled["#customer-email"], "me@example.com");
        assert_eq!(s.filled["#customer-password"], "hunter2");
    });
}

#[tokio::test]
async fn rejected_login_is_not_retried() {
    let browser = FakeBrowser::new(false);
    let mut validator = validator("wrong-password");

    let state = validator.ensure_authenticated(&browser).await.unwrap();
    assert_eq!(state, SessionState::Unauthenticated);
    assert_eq!(validator.state(), SessionState::Unauthenticated);
    assert_eq!(validator.login_attempts(), 1);
    assert_eq!(browser.with(|s| s.submits), 1);
}

#[tokio::test]
async fn missing_login_form_is_structural() {
    let browser = FakeBrowser::new(false);
    browser.with(|s| s.has_login_form = false);
    let mut validator = validator("hunter2");

    let err = validator
        .ensure_authenticated(&browser)
        .await
        .expect_err("form is gone");
    assert!(
        matches!(err, SessionError::LoginFormMissing(ref field) if field == "#customer-email"),
        "{err}"
    );
}
