//! LED sink abstraction.
//!
//! This module defines the LedSink trait that the ranging loop pushes
//! colours to, and simple sinks for running without pixel hardware.

use crate::error::Result;
use crate::ranging::color::Rgb;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Which sink the application drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedKind {
    /// Log every colour change
    #[default]
    Log,
    /// Discard colours
    None,
}

/// Trait for pixel outputs
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedSink: Send + Sync {
    /// Set one pixel
    async fn set_color(&self, pixel: usize, color: Rgb) -> Result<()>;
}

/// Create the sink selected in configuration
pub fn from_kind(kind: LedKind) -> std::sync::Arc<dyn LedSink> {
    match kind {
        LedKind::Log => std::sync::Arc::new(LoggingLed::default()),
        LedKind::None => std::sync::Arc::new(NoOpLed),
    }
}

/// No-op sink for testing or when no pixels are attached
pub struct NoOpLed;

#[async_trait]
impl LedSink for NoOpLed {
    async fn set_color(&self, _pixel: usize, _color: Rgb) -> Result<()> {
        Ok(())
    }
}

/// Logging sink that traces colour changes instead of lighting pixels
#[derive(Default)]
pub struct LoggingLed {
    last: std::sync::Mutex<std::collections::HashMap<usize, Rgb>>,
}

#[async_trait]
impl LedSink for LoggingLed {
    async fn set_color(&self, pixel: usize, color: Rgb) -> Result<()> {
        let mut last = self
            .last
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if last.insert(pixel, color) != Some(color) {
            tracing::debug!(
                pixel,
                "pixel -> #{:02x}{:02x}{:02x}",
                color.r,
                color.g,
                color.b
            );
        }
        Ok(())
    }
}
