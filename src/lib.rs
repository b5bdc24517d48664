//! Data-driven browser automation test interpreter.
//!
//! Scripts are sequences of steps run against a browser driver. A test
//! case can be fed rows from a data source, chained to other cases that
//! take over its browser session and variables, and instrumented with
//! aspects running before, after or on failure of selected steps.

pub mod aspect;
mod chain;
pub mod config;
pub mod context;
pub mod data_source;
pub mod driver;
pub mod error;
pub mod expression;
pub mod input_data;
pub mod listener;
pub mod parser;
pub mod pointcut;
pub mod report;
pub mod runner;
pub mod status;
pub mod step;
pub mod step_type;
pub mod test_case;
pub mod test_run;
pub mod webdriver;

#[cfg(test)]
mod testing;

pub use aspect::{Advice, AdviceKind, Aspect, FnInterceptor, Interceptor, StepInterceptor};
pub use config::{ScriptConfigManager, Settings};
pub use context::Context;
pub use data_source::{DataSource, DataSourceLoader, DataSourceRegistry};
pub use driver::{BrowserSession, ElementId, WebDriver, WebDriverFactory};
pub use error::RunError;
pub use input_data::InputData;
pub use listener::{RecordingListener, TestRunListener};
pub use parser::{JsonScriptParser, ScriptParser};
pub use pointcut::{MatchMethod, Pointcut};
pub use report::{ReportFormat, ReportListener, TestReport};
pub use runner::{DefaultTestRunner, TestRunner};
pub use status::{StopSignal, TestRunStatus};
pub use step::{Locator, Step};
pub use step_type::{StepType, StepTypeRegistry};
pub use test_case::{ScriptFile, TestCase, TestCaseChains};
pub use test_run::{TestRun, TestRunBuilder};
pub use webdriver::{RemoteWebDriver, RemoteWebDriverFactory};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
