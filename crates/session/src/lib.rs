//! Decides whether the browser context is signed in to the storefront and
//! signs it in when it is not.

mod credentials;

use std::time::Duration;

use browser::{BrowserContext, BrowserError, Selector};
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

pub use credentials::Credentials;

pub const DEFAULT_SENTINEL: &str =
    "This content is protected. Please log in with your customer account to continue.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Unknown,
    Authenticated,
    Unauthenticated,
    LoggingIn,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("missing credential: {0}")]
    MissingCredentials(&'static str),

    /// The login form no longer has the expected structure.
    #[error("login form element not found: {0}")]
    LoginFormMissing(String),

    #[error(transparent)]
    Browser(#[from] BrowserError),
}

/// Structure of the storefront pages the validator inspects.
#[derive(Debug, Clone)]
pub struct LoginPage {
    pub target_url: String,
    /// Text shown only to signed-out visitors.
    pub sentinel: String,
    pub content: Selector,
    pub email_field: Selector,
    pub password_field: Selector,
    pub submit_button: Selector,
}

impl LoginPage {
    pub fn new(target_url: impl Into<String>) -> Self {
        Self {
            target_url: target_url.into(),
            sentinel: DEFAULT_SENTINEL.to_string(),
            content: Selector::tag("p"),
            email_field: Selector::id("customer-email"),
            password_field: Selector::id("customer-password"),
            submit_button: Selector::xpath("//button[@class='btn btn--primary w-full']"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionTimeouts {
    pub render: Duration,
    pub login_redirect: Duration,
    pub pre_submit: Duration,
    pub settle: Duration,
    pub poll: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            render: Duration::from_secs(25),
            login_redirect: Duration::from_secs(25),
            pre_submit: Duration::from_secs(1),
            settle: Duration::from_secs(5),
            poll: Duration::from_millis(250),
        }
    }
}

pub struct SessionValidator {
    page: LoginPage,
    credentials: Credentials,
    timeouts: SessionTimeouts,
    state: SessionState,
    login_attempts: u32,
}

impl SessionValidator {
    pub fn new(page: LoginPage, credentials: Credentials) -> Self {
        Self {
            page,
            credentials,
            timeouts: SessionTimeouts::default(),
            state: SessionState::Unknown,
            login_attempts: 0,
        }
    }

    pub fn with_timeouts(mut self, timeouts: SessionTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn login_attempts(&self) -> u32 {
        self.login_attempts
    }

    fn transition(&mut self, to: SessionState) {
        if self.state != to {
            info!(from = ?self.state, to = ?to, "session state changed");
            self.state = to;
        }
    }

    /// Inspects the current page without navigating.
    pub async fn classify(&mut self, ctx: &dyn BrowserContext) -> Result<SessionState, SessionError> {
        let state = classify_page(ctx, &self.page, self.timeouts.render).await?;
        self.transition(state);
        Ok(state)
    }

    /// Loads the target page and signs in if needed. At most one login
    /// attempt is made; a failed attempt yields `Unauthenticated`.
    pub async fn ensure_authenticated(
        &mut self,
        ctx: &dyn BrowserContext,
    ) -> Result<SessionState, SessionError> {
        ctx.navigate(&self.page.target_url).await?;
        if self.classify(ctx).await? == SessionState::Authenticated {
            return Ok(SessionState::Authenticated);
        }

        self.transition(SessionState::LoggingIn);
        self.login_attempts += 1;
        if !self.login(ctx).await? {
            self.transition(SessionState::Unauthenticated);
            return Ok(SessionState::Unauthenticated);
        }
        self.classify(ctx).await
    }

    /// Submits the credentials. Returns whether the site redirected back to
    /// the target page within the bounded wait.
    async fn login(&self, ctx: &dyn BrowserContext) -> Result<bool, SessionError> {
        info!(url = %self.page.target_url, "not signed in, attempting login");
        let page = &self.page;

        ctx.wait_for_element(&page.email_field, self.timeouts.render)
            .await
            .map_err(|err| structural(err, &page.email_field))?;
        ctx.fill_field(&page.email_field, self.credentials.identity())
            .await
            .map_err(|err| structural(err, &page.email_field))?;
        ctx.fill_field(&page.password_field, self.credentials.secret())
            .await
            .map_err(|err| structural(err, &page.password_field))?;

        sleep(self.timeouts.pre_submit).await;
        ctx.click(&page.submit_button)
            .await
            .map_err(|err| structural(err, &page.submit_button))?;

        if !self.wait_for_target(ctx).await? {
            warn!(
                waited = ?self.timeouts.login_redirect,
                "login did not complete, check credentials or connection"
            );
            return Ok(false);
        }
        sleep(self.timeouts.settle).await;
        info!("login completed");
        Ok(true)
    }

    async fn wait_for_target(&self, ctx: &dyn BrowserContext) -> Result<bool, SessionError> {
        let started = Instant::now();
        loop {
            let url = ctx.current_url().await?;
            if url == self.page.target_url {
                return Ok(true);
            }
            if started.elapsed() >= self.timeouts.login_redirect {
                debug!(%url, "still away from target page");
                return Ok(false);
            }
            sleep(self.timeouts.poll).await;
        }
    }
}

fn structural(err: BrowserError, selector: &Selector) -> SessionError {
    match err {
        BrowserError::Timeout { .. } | BrowserError::NoSuchElement(_) => {
            SessionError::LoginFormMissing(selector.to_string())
        }
        other => SessionError::Browser(other),
    }
}

/// Classifies the page currently loaded in `ctx` by looking for the
/// sentinel phrase among its text blocks.
pub async fn classify_page(
    ctx: &dyn BrowserContext,
    page: &LoginPage,
    render_timeout: Duration,
) -> Result<SessionState, SessionError> {
    match ctx.wait_for_element(&page.content, render_timeout).await {
        Ok(()) => {}
        Err(err) if err.is_timeout() => {
            warn!(selector = %page.content, "page content did not render");
            return Ok(SessionState::Unauthenticated);
        }
        Err(err) => return Err(err.into()),
    }

    let texts = ctx.read_texts(&page.content).await?;
    if texts.iter().any(|t| t.contains(&page.sentinel)) {
        debug!(blocks = texts.len(), "login wall detected");
        Ok(SessionState::Unauthenticated)
    } else {
        Ok(SessionState::Authenticated)
    }
}

#[cfg(test)]
mod tests;
