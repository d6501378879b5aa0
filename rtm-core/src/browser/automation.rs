use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ChromiumSection;

use super::error::{BrowserError, BrowserResult};

/// Launches one headless Chromium instance per extraction run and routes its
/// downloads into the configured directory.
#[derive(Debug)]
pub struct BrowserLauncher {
    chromium: ChromiumSection,
    download_dir: PathBuf,
}

impl BrowserLauncher {
    pub fn new(chromium: ChromiumSection, download_dir: PathBuf) -> Self {
        Self {
            chromium,
            download_dir,
        }
    }

    pub async fn launch(&self) -> BrowserResult<BrowserSession> {
        std::fs::create_dir_all(&self.download_dir)?;
        let config = self.build_chromium_config()?;
        info!(
            headless = self.chromium.headless,
            download_dir = %self.download_dir.display(),
            "launching chromium instance"
        );

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|err| BrowserError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "chromium handler reported error");
                }
            }
        });

        let page = browser
            .new_page(CreateTargetParams::new("about:blank"))
            .await?;
        let download_path = self.download_dir.to_string_lossy().to_string();
        page.execute(
            SetDownloadBehaviorParams::builder()
                .behavior(SetDownloadBehaviorBehavior::Allow)
                .download_path(download_path)
                .build()
                .map_err(BrowserError::Configuration)?,
        )
        .await?;

        Ok(BrowserSession {
            browser,
            page,
            handler_task: Some(handler_task),
        })
    }

    fn build_chromium_config(&self) -> BrowserResult<ChromiumConfig> {
        let [width, height] = self.chromium.window;
        let mut builder = ChromiumConfig::builder();
        if let Some(path) = &self.chromium.executable_path {
            builder = builder.chrome_executable(path);
        }
        if !self.chromium.headless {
            builder = builder.with_head();
        }
        if !self.chromium.sandbox {
            builder = builder.no_sandbox();
        }

        let mut args = vec![
            format!("--window-size={width},{height}"),
            "--disable-dev-shm-usage".to_string(),
            "--disable-extensions".to_string(),
            "--ignore-certificate-errors".to_string(),
        ];
        if self.chromium.disable_gpu {
            args.push("--disable-gpu".to_string());
        }
        builder = builder.args(args);

        builder.build().map_err(BrowserError::Configuration)
    }
}

/// One live browser session; the scoped resource released on every exit path
/// by `shutdown`.
#[derive(Debug)]
pub struct BrowserSession {
    browser: Browser,
    page: Page,
    handler_task: Option<JoinHandle<()>>,
}

impl BrowserSession {
    pub fn page(&self) -> &Page {
        &self.page
    }

    pub async fn shutdown(mut self) {
        if let Err(err) = self.browser.close().await {
            warn!(error = %err, "failed to close browser gracefully");
        }
        if let Some(handle) = self.handler_task.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "browser handler join error");
            }
        }
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if let Some(handle) = &self.handler_task {
            if !handle.is_finished() {
                warn!("BrowserSession dropped without explicit shutdown");
            }
        }
    }
}

/// Seam between the extraction state machine and the driven browser. The live
/// implementation wraps a chromiumoxide page; tests script a fake.
#[async_trait(?Send)]
pub trait ExtractionSession {
    async fn goto(&mut self, url: &str) -> BrowserResult<()>;
    async fn title(&mut self) -> BrowserResult<String>;
    /// Fill the first matching element of an ordered locator list. Returns
    /// false when none of the locators currently match.
    async fn fill_first(&mut self, selectors: &[String], text: &str) -> BrowserResult<bool>;
    async fn click_first(&mut self, selectors: &[String]) -> BrowserResult<bool>;
    async fn element_present(&mut self, selectors: &[String]) -> BrowserResult<bool>;
    async fn save_snapshot(&mut self, path: &Path) -> BrowserResult<()>;
}

#[async_trait(?Send)]
impl ExtractionSession for BrowserSession {
    async fn goto(&mut self, url: &str) -> BrowserResult<()> {
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(BrowserError::Configuration)?;
        self.page.goto(params).await?;
        self.page.wait_for_navigation().await?;
        Ok(())
    }

    async fn title(&mut self) -> BrowserResult<String> {
        Ok(self.page.get_title().await?.unwrap_or_default())
    }

    async fn fill_first(&mut self, selectors: &[String], text: &str) -> BrowserResult<bool> {
        for selector in selectors {
            if let Ok(element) = self.page.find_element(selector.clone()).await {
                element.click().await?;
                element.type_str(text).await?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn click_first(&mut self, selectors: &[String]) -> BrowserResult<bool> {
        for selector in selectors {
            if let Ok(element) = self.page.find_element(selector.clone()).await {
                element.click().await?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn element_present(&mut self, selectors: &[String]) -> BrowserResult<bool> {
        for selector in selectors {
            if self.page.find_element(selector.clone()).await.is_ok() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn save_snapshot(&mut self, path: &Path) -> BrowserResult<()> {
        let params = ScreenshotParams::builder().build();
        let bytes = self
            .page
            .screenshot(params)
            .await
            .map_err(|err| BrowserError::Snapshot(err.to_string()))?;
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }
}
