//! Attribution credits for overlay imagery.
//!
//! Imagery providers usually require an attribution string to be shown while
//! their data is visible. Credits are created through the external
//! [`CreditSystem`] boundary; this crate only carries the resulting handles
//! on tiles and providers, it never renders them.

use std::sync::Arc;

/// An attribution credit handle.
///
/// Cheap to clone; two handles created from the same `create_credit` call
/// compare equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credit {
    text: Arc<str>,
    show_on_screen: bool,
}

impl Credit {
    /// Creates a credit handle. Normally called by a [`CreditSystem`]
    /// implementation rather than directly.
    pub fn new(text: impl Into<Arc<str>>, show_on_screen: bool) -> Self {
        Self {
            text: text.into(),
            show_on_screen,
        }
    }

    /// The attribution text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Whether the credit must be shown on screen (as opposed to in a
    /// collapsible attribution list).
    pub fn show_on_screen(&self) -> bool {
        self.show_on_screen
    }
}

/// External credit registry boundary.
///
/// Implementations typically deduplicate identical credit text and track
/// which credits are referenced by currently-visible tiles.
pub trait CreditSystem: Send + Sync {
    /// Creates (or looks up) a credit for the given attribution text.
    fn create_credit(&self, text: &str, show_on_screen: bool) -> Credit;
}
