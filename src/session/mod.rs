//! Session lifecycle and the presentation seam

mod controller;
mod presentation;

pub use controller::{SessionController, Transition};
pub use presentation::{
    NoopSurface, PresentationEvent, PresentationHandle, PresentationSurface, SessionEvent,
};
