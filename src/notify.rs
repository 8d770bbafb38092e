//! Release lifecycle notifications.
//!
//! Notifiers observe a run but never influence it: errors they return are
//! logged by the pipeline and otherwise dropped.

use log::{debug, warn};
use thiserror::Error;

use crate::config::Image;
use crate::step::Step;

#[derive(Error, Debug)]
pub enum Error {
    #[error("notification transport: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("notification rejected: {0}")]
    Rejected(String),
}

pub type Result = std::result::Result<(), Error>;

pub trait Notifier {
    fn name(&self) -> &str;

    /// Whether this notifier has what it needs to deliver messages.
    fn is_configured(&self) -> bool;

    fn on_release_started(&mut self, steps: &[Step]) -> Result;
    fn on_release_completed(&mut self, steps: &[Step], error: Option<&crate::Error>) -> Result;
    fn on_image_building(&mut self, image: &Image) -> Result;
    fn on_image_built(&mut self, image: &Image, output: &str, error: Option<&crate::Error>)
        -> Result;
    fn on_image_pushing(&mut self, image: &Image) -> Result;
    fn on_image_pushed(&mut self, image: &Image, output: &str, error: Option<&crate::Error>)
        -> Result;
    fn on_configuration_validated(&mut self, error: Option<&crate::Error>) -> Result;
    fn on_deploying(&mut self) -> Result;
    fn on_deployed(&mut self, output: &str, error: Option<&crate::Error>) -> Result;
}

/// Accepts every event and does nothing with it.
#[derive(Debug, Default, Clone, Copy)]
pub struct Discarding;

impl Notifier for Discarding {
    fn name(&self) -> &str {
        "discarding"
    }

    fn is_configured(&self) -> bool {
        true
    }

    fn on_release_started(&mut self, _steps: &[Step]) -> Result {
        Ok(())
    }

    fn on_release_completed(&mut self, _steps: &[Step], _error: Option<&crate::Error>) -> Result {
        Ok(())
    }

    fn on_image_building(&mut self, _image: &Image) -> Result {
        Ok(())
    }

    fn on_image_built(&mut self, _image: &Image, _output: &str, _error: Option<&crate::Error>) -> Result {
        Ok(())
    }

    fn on_image_pushing(&mut self, _image: &Image) -> Result {
        Ok(())
    }

    fn on_image_pushed(&mut self, _image: &Image, _output: &str, _error: Option<&crate::Error>) -> Result {
        Ok(())
    }

    fn on_configuration_validated(&mut self, _error: Option<&crate::Error>) -> Result {
        Ok(())
    }

    fn on_deploying(&mut self) -> Result {
        Ok(())
    }

    fn on_deployed(&mut self, _output: &str, _error: Option<&crate::Error>) -> Result {
        Ok(())
    }
}

/// First configured candidate, in the order given. Falls back to [`Discarding`].
pub fn select(candidates: Vec<Box<dyn Notifier>>) -> Box<dyn Notifier> {
    for candidate in candidates {
        if candidate.is_configured() {
            debug!("Using {} notifier", candidate.name());
            return candidate;
        }
        debug!("Notifier {} is not configured", candidate.name());
    }
    Box::new(Discarding)
}

/// Like [`select`], but candidates that could not be set up are logged and
/// skipped instead of failing the release.
pub fn select_available(
    candidates: Vec<std::result::Result<Box<dyn Notifier>, Error>>,
) -> Box<dyn Notifier> {
    let available = candidates
        .into_iter()
        .filter_map(|candidate| match candidate {
            Ok(notifier) => Some(notifier),
            Err(err) => {
                warn!("Notifier unavailable: {err}");
                None
            }
        })
        .collect();
    select(available)
}
