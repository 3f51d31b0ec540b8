//! Rule-driven scraping engine.
//!
//! A [`SiteRule`] is a declarative program for one source site: how to reach
//! a page (static fetch, headless browser or a multi-step API workflow) and
//! what to pull out of it (a tree of [`FieldRule`]s). The orchestrator
//! normalizes the input URL/ID into a parameter context, runs the chosen
//! strategy and hands the document to the extraction engine.

mod browser;
mod context;
mod extract;
mod json_path;
mod orchestrator;
mod rule;
mod template;

pub use browser::{BrowserAdapter, BrowserError, PageRenderer};
pub use context::{ContextValue, ScrapeContext};
pub use extract::{extract_fields, extract_from_context};
pub use orchestrator::{ScrapeError, Scraper};
pub use rule::{
    ApiRequest, ApiStep, ApiWorkflow, EntryRule, FieldKind, FieldRule, FilterMode, ResponseKind,
    SiteRule, Strategy, WaitConfig,
};
