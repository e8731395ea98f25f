//! Command handlers for display surfaces.
//!
//! Handlers return `Result<_, String>` so errors can be shown to the user
//! as-is.

use std::sync::Arc;

use serde::Serialize;

use crate::channel::LinkSubscription;
use crate::manager::LinkManager;

#[derive(Debug, Serialize)]
pub struct LinkResponse {
    pub url: String,
    /// Set when a saved link was unreadable and has been replaced.
    pub notice: Option<String>,
}

#[derive(Clone)]
pub struct LinkCommands {
    manager: Arc<LinkManager>,
}

impl LinkCommands {
    pub fn new(manager: Arc<LinkManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &LinkManager {
        &self.manager
    }

    /// Link for a surface that is starting up; creates one if needed.
    pub fn get_or_create_link(&self) -> Result<LinkResponse, String> {
        let ensured = self.manager.ensure_link()?;
        let notice = ensured.discarded.as_ref().map(|err| {
            let kept = ensured
                .preserved_at
                .as_ref()
                .map(|p| format!(" The old file was kept at {}.", p.display()))
                .unwrap_or_default();
            format!("The saved link could not be read ({err}), so a new one was generated.{kept}")
        });
        Ok(LinkResponse {
            url: ensured.url.as_str().to_owned(),
            notice,
        })
    }

    pub fn regenerate_link(&self) -> Result<String, String> {
        let url = self.manager.generate_new_link()?;
        Ok(url.as_str().to_owned())
    }

    pub fn set_manual_link(&self, push_id: &str, audience: &str) -> Result<(), String> {
        self.manager.set_manual_link(push_id, audience)?;
        Ok(())
    }

    pub fn current_link(&self) -> Option<String> {
        self.manager.current_link().map(|url| url.as_str().to_owned())
    }

    /// Event surface: one event per successful change.
    pub fn on_link_changed(&self) -> LinkSubscription {
        self.manager.subscribe()
    }
}
