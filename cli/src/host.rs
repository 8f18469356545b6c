//! Headless editor host: registrations are tracked, messages go to the log and stderr.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use tether_extension::{EditorHost, Feature, RegistrationContext};
use tether_types::Registration;

#[derive(Debug, Default)]
pub struct LoggingHost {
    active: Arc<Mutex<Vec<Feature>>>,
    contexts: Mutex<BTreeMap<String, bool>>,
}

impl LoggingHost {
    /// Features currently registered, in registration order.
    pub fn active_features(&self) -> Vec<Feature> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn context(&self, key: &str) -> Option<bool> {
        self.contexts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
    }
}

impl EditorHost for LoggingHost {
    fn register(
        &self,
        feature: Feature,
        context: &RegistrationContext,
    ) -> anyhow::Result<Registration> {
        tracing::info!(%feature, selectors = ?context.selectors, "Registered feature");
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(feature);

        let active = Arc::clone(&self.active);
        Ok(Registration::from_fn(move || {
            let mut active = active.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(pos) = active.iter().position(|f| *f == feature) {
                active.remove(pos);
            }
            tracing::debug!(%feature, "Unregistered feature");
            Ok(())
        }))
    }

    fn show_error(&self, message: &str) {
        tracing::error!("{message}");
        eprintln!("error: {message}");
    }

    fn show_warning(&self, message: &str) {
        tracing::warn!("{message}");
        eprintln!("warning: {message}");
    }

    fn set_context(&self, key: &str, value: bool) {
        tracing::debug!(key, value, "Context updated");
        self.contexts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
    }
}
