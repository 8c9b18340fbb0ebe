//! Page loading and session recovery against the remote portal.
//!
//! The capture worker only ever sees the [`PageLoader`] trait, so the
//! embedded-browser collaborator the GUI uses can be swapped in for the
//! plain HTTP implementation here.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use tracing::{debug, info, warn};

use crate::config::LoginSettings;

/// Asynchronous source of rendered page text.
#[async_trait]
pub trait PageLoader: Send + Sync {
    /// Fetch a page and return its visible text, or `None` when the rendered
    /// body is empty.
    async fn load_visible_text(&self, url: &str) -> anyhow::Result<Option<String>>;

    /// Re-submit credentials after the session expired. Idempotent: when the
    /// login page no longer offers a password form (already signed in, or no
    /// credentials configured) this is a logged no-op returning `false`.
    async fn refresh_session(&self) -> anyhow::Result<bool>;
}

/// HTTP page loader with a cookie jar carrying the portal session.
pub struct HttpPageLoader {
    client: Client,
    login: LoginSettings,
}

impl HttpPageLoader {
    pub fn new(user_agent: &str, timeout: Duration, login: LoginSettings) -> Self {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .build()
            .expect("Failed to create HTTP client");

        Self { client, login }
    }
}

#[async_trait]
impl PageLoader for HttpPageLoader {
    async fn load_visible_text(&self, url: &str) -> anyhow::Result<Option<String>> {
        let response = self.client.get(url).send().await?;
        let body = response.text().await?;
        let text = html_to_text(&body);
        if text.is_empty() {
            Ok(None)
        } else {
            Ok(Some(text))
        }
    }

    async fn refresh_session(&self) -> anyhow::Result<bool> {
        if self.login.username.is_empty() || self.login.password.is_empty() {
            warn!("session expired but no credentials are configured");
            return Ok(false);
        }

        let response = self.client.get(&self.login.login_url).send().await?;
        let page_url = response.url().clone();
        let body = response.text().await?;

        let Some(form) = parse_login_form(&body, &self.login.username, &self.login.password)
        else {
            debug!("no password form at {}, session presumed active", page_url);
            return Ok(false);
        };

        let target = match form.action.as_deref() {
            Some(action) if !action.is_empty() => page_url.join(action)?,
            _ => page_url.clone(),
        };
        let response = self.client.post(target).form(&form.fields).send().await?;
        if response.status().is_success() {
            info!("re-submitted credentials at {}", page_url);
            Ok(true)
        } else {
            warn!("login submission returned {}", response.status());
            Ok(false)
        }
    }
}

/// Flatten an HTML document to whitespace-normalized visible text.
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let body = Selector::parse("body").expect("valid selector");
    let text: String = match document.select(&body).next() {
        Some(element) => element.text().collect::<Vec<_>>().join(" "),
        None => document.root_element().text().collect::<Vec<_>>().join(" "),
    };
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

struct LoginForm {
    action: Option<String>,
    fields: Vec<(String, String)>,
}

/// Find the first form carrying a password input and fill it: first text
/// input gets the username, first password input gets the password, hidden
/// inputs (CSRF tokens and the like) keep their values.
fn parse_login_form(html: &str, username: &str, password: &str) -> Option<LoginForm> {
    let document = Html::parse_document(html);
    let form_selector = Selector::parse("form").expect("valid selector");
    let input_selector = Selector::parse("input").expect("valid selector");

    for form in document.select(&form_selector) {
        let mut fields = Vec::new();
        let mut filled_username = false;
        let mut filled_password = false;

        for input in form.select(&input_selector) {
            let Some(name) = input.value().attr("name") else {
                continue;
            };
            let kind = input.value().attr("type").unwrap_or("text");
            let value = if kind == "password" && !filled_password {
                filled_password = true;
                password.to_string()
            } else if kind == "text" && !filled_username {
                filled_username = true;
                username.to_string()
            } else {
                input.value().attr("value").unwrap_or("").to_string()
            };
            fields.push((name.to_string(), value));
        }

        if filled_password {
            return Some(LoginForm {
                action: form.value().attr("action").map(str::to_string),
                fields,
            });
        }
    }
    None
}
