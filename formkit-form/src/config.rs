//! Form behavior settings loaded with figment
//!
//! Sources, later ones overriding earlier ones:
//! 1. Built-in defaults
//! 2. `formkit.toml`, `formkit.yaml`, `formkit.json` in the given directory
//! 3. `FORMKIT_*` environment variables (e.g. `FORMKIT_RESET_AFTER_SAVE=false`)

use std::path::Path;

use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormSettings {
    /// Realign the view model with the source after a successful save.
    pub reset_after_save: bool,
    /// Clear the source node before a load starts.
    pub clear_before_load: bool,
    /// Show a field's validation error once the field is touched, before
    /// the first save attempt.
    pub reveal_errors_on_touch: bool,
}

impl Default for FormSettings {
    fn default() -> Self {
        Self {
            reset_after_save: true,
            clear_before_load: true,
            reveal_errors_on_touch: true,
        }
    }
}

impl FormSettings {
    /// The layered figment for `dir`. Missing files are skipped.
    pub fn figment(dir: impl AsRef<Path>) -> Figment {
        let dir = dir.as_ref();
        Figment::new()
            .merge(Serialized::defaults(FormSettings::default()))
            .merge(Toml::file(dir.join("formkit.toml")))
            .merge(Yaml::file(dir.join("formkit.yaml")))
            .merge(Json::file(dir.join("formkit.json")))
            .merge(Env::prefixed("FORMKIT_"))
    }

    /// Load settings from files in `dir` and the environment.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let settings = Self::from_figment(&Self::figment(dir))?;
        debug!(?settings, "loaded form settings");
        Ok(settings)
    }

    pub fn from_figment(figment: &Figment) -> Result<Self> {
        Ok(figment.extract()?)
    }
}
