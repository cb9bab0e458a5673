//! Model selection
//!
//! Maps a task class onto a concrete model name. Each class carries a
//! preference list in fallback order; when the preferred model is not in
//! the backend's available set the selector walks the list and logs the
//! fallback, ending at the configured default model.

use crate::config::ModelPreferences;
use crate::inference::TaskClass;

/// Resolves task classes to model names with a published fallback order
#[derive(Debug, Clone)]
pub struct ModelSelector {
    preferences: ModelPreferences,
    default_model: String,
}

impl ModelSelector {
    pub fn new(preferences: ModelPreferences, default_model: impl Into<String>) -> Self {
        Self {
            preferences,
            default_model: default_model.into(),
        }
    }

    /// Preference list for a task class, in fallback order
    pub fn preferences_for(&self, class: TaskClass) -> &[String] {
        match class {
            TaskClass::Code => &self.preferences.code,
            TaskClass::Reasoning => &self.preferences.reasoning,
            TaskClass::Conversation => &self.preferences.conversation,
            TaskClass::General => &self.preferences.general,
        }
    }

    /// Resolve a task class to a model name
    ///
    /// `available` is the backend's reported tag list. `None` means the
    /// list could not be fetched; the preferred model is used unchecked
    /// and any problem surfaces on the actual request.
    pub fn resolve(&self, class: TaskClass, available: Option<&[String]>) -> String {
        let prefs = self.preferences_for(class);

        let Some(available) = available else {
            return prefs
                .first()
                .cloned()
                .unwrap_or_else(|| self.default_model.clone());
        };

        for (i, model) in prefs.iter().enumerate() {
            if available.iter().any(|m| m == model) {
                if i > 0 {
                    tracing::warn!(
                        class = %class,
                        preferred = %prefs[0],
                        selected = %model,
                        "preferred model unavailable, falling back"
                    );
                }
                return model.clone();
            }
        }

        tracing::warn!(
            class = %class,
            default = %self.default_model,
            "no preferred model available, using default"
        );
        self.default_model.clone()
    }
}
