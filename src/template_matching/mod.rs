/// Template matching module for locating reference images in screenshots
///
/// This module provides:
/// - A directory-backed template cache that reloads atomically
/// - Region-bounded correlation with full-frame fallback
/// - Offset correction back to full-capture coordinates
pub mod matcher;
pub mod store;
pub mod types;


pub use matcher::{CorrelationMethod, DEFAULT_THRESHOLD, Matcher, RegionMatcher, correlation_surface};
pub use store::{TemplateError, TemplateStore};
pub use types::{MatchRequest, MatchResult, Region, Template};
