//! WebDriver backend for [`BrowserDriver`] built on thirtyfour
//!
//! Talks to a W3C WebDriver endpoint (geckodriver or chromedriver). Element
//! lookups go through thirtyfour element queries so each command waits up to
//! the configured element timeout for its target.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use thirtyfour::prelude::*;
use thirtyfour::ChromiumLikeCapabilities;
use tracing::{debug, info, warn};

use crate::config::{Browser, DriverConfig};
use crate::driver::{BrowserDriver, DriverFactory, Locator, WindowHandle};
use crate::error::{E2eError, E2eResult};

/// Opens a fresh WebDriver session per scenario
#[derive(Debug, Clone, Default)]
pub struct WebDriverFactory;

#[async_trait]
impl DriverFactory for WebDriverFactory {
    async fn connect(&self, config: &DriverConfig) -> E2eResult<Box<dyn BrowserDriver>> {
        let session = WebDriverSession::connect(config).await?;
        Ok(Box::new(session))
    }
}

/// One live browser session
pub struct WebDriverSession {
    driver: WebDriver,
    config: DriverConfig,
    closed: AtomicBool,
}

impl WebDriverSession {
    pub async fn connect(config: &DriverConfig) -> E2eResult<Self> {
        info!(
            "Opening {} session via {}",
            config.browser.as_str(),
            config.webdriver_url
        );

        let unavailable = |e: WebDriverError| E2eError::DriverUnavailable {
            url: config.webdriver_url.clone(),
            reason: e.to_string(),
        };

        let driver = match config.browser {
            Browser::Firefox => {
                let mut caps = DesiredCapabilities::firefox();
                if config.headless {
                    caps.set_headless().map_err(unavailable)?;
                }
                WebDriver::new(config.webdriver_url.as_str(), caps)
                    .await
                    .map_err(unavailable)?
            }
            Browser::Chrome => {
                let mut caps = DesiredCapabilities::chrome();
                if config.headless {
                    caps.set_headless().map_err(unavailable)?;
                }
                WebDriver::new(config.webdriver_url.as_str(), caps)
                    .await
                    .map_err(unavailable)?
            }
        };

        if let Err(e) = driver
            .set_window_rect(
                0,
                0,
                config.window_width.into(),
                config.window_height.into(),
            )
            .await
        {
            warn!("Could not resize browser window: {}", e);
        }

        Ok(Self {
            driver,
            config: config.clone(),
            closed: AtomicBool::new(false),
        })
    }

    async fn find(&self, xpath: &str, what: &str) -> E2eResult<WebElement> {
        self.driver
            .query(By::XPath(xpath))
            .wait(self.config.element_timeout(), self.config.element_poll())
            .desc(what)
            .first()
            .await
            .map_err(|e| not_found(what, e))
    }

    async fn find_css(&self, css: &str, what: &str) -> E2eResult<WebElement> {
        self.driver
            .query(By::Css(css))
            .wait(self.config.element_timeout(), self.config.element_poll())
            .desc(what)
            .first()
            .await
            .map_err(|e| not_found(what, e))
    }

    async fn set_checkbox(&self, label: &str, checked: bool) -> E2eResult<()> {
        let what = format!("checkbox '{}'", label);
        let input = self.find(&checkbox_xpath(label), &what).await?;

        let selected = input
            .is_selected()
            .await
            .map_err(|e| driver_error("is_selected", e))?;
        if selected == checked {
            return Ok(());
        }

        // Styled checkboxes are often hidden behind their label
        if let Err(e) = input.click().await {
            debug!("Direct click on {} failed ({}), clicking its label", what, e);
            let label_el = self.find(&label_xpath(label), &what).await?;
            label_el
                .click()
                .await
                .map_err(|e| driver_error("click label", e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl BrowserDriver for WebDriverSession {
    async fn navigate(&self, url: &str) -> E2eResult<()> {
        debug!("goto {}", url);
        self.driver
            .goto(url)
            .await
            .map_err(|e| driver_error("goto", e))
    }

    async fn fill_field(&self, field: &str, text: &str) -> E2eResult<()> {
        let what = format!("field '{}'", field);
        let input = self.find(&field_xpath(field), &what).await?;
        input.clear().await.map_err(|e| driver_error("clear", e))?;
        input
            .send_keys(text)
            .await
            .map_err(|e| driver_error("send_keys", e))
    }

    async fn check(&self, label: &str) -> E2eResult<()> {
        self.set_checkbox(label, true).await
    }

    async fn uncheck(&self, label: &str) -> E2eResult<()> {
        self.set_checkbox(label, false).await
    }

    async fn click(&self, target: &Locator) -> E2eResult<()> {
        let what = target.to_string();
        let element = match target {
            Locator::Css(css) => self.find_css(css, &what).await?,
            Locator::Button(name) => self.find(&button_xpath(name), &what).await?,
            Locator::MenuItem { menu, text } => {
                let menu_el = self.find_css(menu, &what).await?;
                menu_el
                    .query(By::XPath(menu_item_xpath(text).as_str()))
                    .wait(self.config.element_timeout(), self.config.element_poll())
                    .desc(&what)
                    .first()
                    .await
                    .map_err(|e| not_found(&what, e))?
            }
        };

        element
            .wait_until()
            .clickable()
            .await
            .map_err(|e| not_found(&format!("clickable {}", what), e))?;
        element
            .click()
            .await
            .map_err(|e| driver_error("click", e))
    }

    async fn evaluate_script(
        &self,
        script: &str,
        args: Vec<serde_json::Value>,
    ) -> E2eResult<serde_json::Value> {
        let ret = self
            .driver
            .execute(script, args)
            .await
            .map_err(|e| driver_error("execute", e))?;
        Ok(ret.json().clone())
    }

    async fn window_handles(&self) -> E2eResult<Vec<WindowHandle>> {
        let handles = self
            .driver
            .windows()
            .await
            .map_err(|e| driver_error("windows", e))?;
        Ok(handles
            .into_iter()
            .map(|h| WindowHandle::new(h.to_string()))
            .collect())
    }

    async fn current_window(&self) -> E2eResult<WindowHandle> {
        let handle = self
            .driver
            .window()
            .await
            .map_err(|e| driver_error("window", e))?;
        Ok(WindowHandle::new(handle.to_string()))
    }

    async fn switch_to_window(&self, handle: &WindowHandle) -> E2eResult<()> {
        let target = thirtyfour::WindowHandle::from(handle.as_str().to_string());
        self.driver
            .switch_to_window(target)
            .await
            .map_err(|e| driver_error("switch_to_window", e))
    }

    async fn page_contains(&self, text: &str) -> E2eResult<bool> {
        let body = self
            .driver
            .find(By::Tag("body"))
            .await
            .map_err(|e| not_found("page body", e))?;
        let content = body.text().await.map_err(|e| driver_error("text", e))?;
        Ok(content.contains(text))
    }

    async fn has_element(&self, css: &str) -> E2eResult<bool> {
        let found = self
            .driver
            .find_all(By::Css(css))
            .await
            .map_err(|e| driver_error("find_all", e))?;
        Ok(!found.is_empty())
    }

    async fn screenshot(&self, path: &Path) -> E2eResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.driver
            .screenshot(path)
            .await
            .map_err(|e| driver_error("screenshot", e))
    }

    async fn quit(&self) -> E2eResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!("Closing browser session");
        self.driver
            .clone()
            .quit()
            .await
            .map_err(|e| driver_error("quit", e))
    }
}

fn not_found(what: &str, e: WebDriverError) -> E2eError {
    match driver_error(what, e) {
        E2eError::WebDriver(reason) => E2eError::ElementNotFound {
            what: what.to_string(),
            reason,
        },
        other => other,
    }
}

/// Map a backend error, singling out the ones that mean the browser is gone
fn driver_error(context: &str, e: WebDriverError) -> E2eError {
    let message = e.to_string();
    if is_session_loss(&message) {
        E2eError::SessionLost(format!("{}: {}", context, message))
    } else {
        E2eError::WebDriver(format!("{}: {}", context, message))
    }
}

fn is_session_loss(message: &str) -> bool {
    let lower = message.to_lowercase();
    [
        "invalid session id",
        "session deleted",
        "session not created",
        "connection refused",
        "error sending request",
        "broken pipe",
    ]
    .iter()
    .any(|needle| lower.contains(needle))
}

/// Quote a string as an XPath 1.0 literal
pub(crate) fn xpath_literal(s: &str) -> String {
    if !s.contains('\'') {
        format!("'{}'", s)
    } else if !s.contains('"') {
        format!("\"{}\"", s)
    } else {
        let parts: Vec<String> = s.split('\'').map(|p| format!("'{}'", p)).collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}

fn label_xpath(label: &str) -> String {
    format!("//label[contains(normalize-space(.), {})]", xpath_literal(label))
}

/// Checkbox nested in its label, or referenced by the label's `for`
pub(crate) fn checkbox_xpath(label: &str) -> String {
    let lit = xpath_literal(label);
    format!(
        "//label[contains(normalize-space(.), {lit})]//input[@type='checkbox'] \
         | //input[@type='checkbox'][@id=//label[contains(normalize-space(.), {lit})]/@for]"
    )
}

/// Text input or textarea by id, name or label
pub(crate) fn field_xpath(field: &str) -> String {
    let lit = xpath_literal(field);
    format!(
        "//textarea[@id={lit} or @name={lit}] \
         | //input[@id={lit} or @name={lit}] \
         | //*[self::textarea or self::input][@id=//label[normalize-space(.)={lit}]/@for]"
    )
}

/// Button by id, name, value or visible text
pub(crate) fn button_xpath(name: &str) -> String {
    let lit = xpath_literal(name);
    format!(
        "//button[@id={lit} or @name={lit} or @value={lit} or normalize-space(.)={lit}] \
         | //input[@type='submit' or @type='button'][@id={lit} or @name={lit} or @value={lit}]"
    )
}

/// List item (relative to a menu element) whose text contains `text`, ignoring case
pub(crate) fn menu_item_xpath(text: &str) -> String {
    const UPPER: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    const LOWER: &str = "abcdefghijklmnopqrstuvwxyz";
    format!(
        ".//li[contains(translate(normalize-space(.), '{UPPER}', '{LOWER}'), {})]",
        xpath_literal(&text.to_lowercase())
    )
}
