//! Presentation seam
//!
//! The UI that lists records lives outside this crate. The controller only
//! drives it through [`PresentationSurface`] and hears about user dismissal
//! through a [`PresentationHandle`].

use anyhow::Result;
use tokio::sync::mpsc;

pub trait PresentationSurface: Send + Sync {
    fn show(&self) -> Result<()>;
    fn hide(&self) -> Result<()>;
}

/// Used until the host app attaches a real surface
#[derive(Debug, Default)]
pub struct NoopSurface;

impl PresentationSurface for NoopSurface {
    fn show(&self) -> Result<()> {
        Ok(())
    }

    fn hide(&self) -> Result<()> {
        Ok(())
    }
}

/// Reports from the surface back to the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentationEvent {
    /// The user closed the surface on their own
    Dismissed,
}

/// Given to the surface so it can report dismissal without holding the controller
#[derive(Debug, Clone)]
pub struct PresentationHandle {
    tx: mpsc::UnboundedSender<PresentationEvent>,
}

impl PresentationHandle {
    pub(crate) fn new(tx: mpsc::UnboundedSender<PresentationEvent>) -> Self {
        Self { tx }
    }

    pub fn notify_dismissed(&self) {
        if self.tx.send(PresentationEvent::Dismissed).is_err() {
            tracing::debug!("Dismissal reported after controller was dropped");
        }
    }
}

/// Controller state changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Started,
    Stopped,
    Enabled,
    Disabled,
    Presented,
    Hidden,
}
