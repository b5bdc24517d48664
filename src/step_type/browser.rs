//! Page actions.

use super::StepType;
use crate::test_run::TestRun;
use anyhow::{anyhow, Result};

/// Opens `url`.
#[derive(Debug, Clone, Copy)]
pub struct Get;

impl StepType for Get {
    fn name(&self) -> &str {
        "get"
    }

    fn run(&self, run: &mut TestRun) -> Result<bool> {
        let url = run.string("url")?;
        run.driver()?.navigate(&url)?;
        Ok(true)
    }
}

/// Clicks the first element matching `locator`.
#[derive(Debug, Clone, Copy)]
pub struct ClickElement;

impl StepType for ClickElement {
    fn name(&self) -> &str {
        "clickElement"
    }

    fn run(&self, run: &mut TestRun) -> Result<bool> {
        let locator = run.locator("locator")?;
        let driver = run.driver()?;
        let element = driver
            .find_elements(&locator)?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no element found for {locator}"))?;
        driver.click(&element)?;
        Ok(true)
    }
}

/// Replaces the content of the element at `locator` with `text`.
#[derive(Debug, Clone, Copy)]
pub struct SetElementText;

impl StepType for SetElementText {
    fn name(&self) -> &str {
        "setElementText"
    }

    fn run(&self, run: &mut TestRun) -> Result<bool> {
        let locator = run.locator("locator")?;
        let text = run.string("text")?;
        let driver = run.driver()?;
        let element = driver
            .find_elements(&locator)?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no element found for {locator}"))?;
        driver.clear(&element)?;
        driver.send_keys(&element, &text)?;
        Ok(true)
    }
}

/// Types `text` into the element at `locator` without clearing it.
#[derive(Debug, Clone, Copy)]
pub struct SendKeysToElement;

impl StepType for SendKeysToElement {
    fn name(&self) -> &str {
        "sendKeysToElement"
    }

    fn run(&self, run: &mut TestRun) -> Result<bool> {
        let locator = run.locator("locator")?;
        let text = run.string("text")?;
        let driver = run.driver()?;
        let element = driver
            .find_elements(&locator)?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no element found for {locator}"))?;
        driver.send_keys(&element, &text)?;
        Ok(true)
    }
}
