use crate::error::{ControlError, Result};
use crate::ptz_client::PtzDevice;
use crate::types::Preset;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

/// Client-side view of the presets stored on one camera.
///
/// The camera is the source of truth: every [`reload`](Self::reload) replaces
/// the whole list. The only local state is the set of hidden preset names,
/// which the camera never sees and the settings file carries across runs.
#[derive(Debug, Default)]
pub struct PresetStore {
    presets: Vec<Preset>,
    hidden: BTreeSet<String>,
    conflicts: Vec<String>,
}

impl PresetStore {
    pub fn new(hidden_names: impl IntoIterator<Item = String>) -> Self {
        Self {
            presets: Vec::new(),
            hidden: hidden_names.into_iter().collect(),
            conflicts: Vec::new(),
        }
    }

    /// Replace the list with a fresh one from `device`.
    ///
    /// On failure the previous list is left untouched and the error returned.
    pub async fn reload(&mut self, device: &dyn PtzDevice) -> Result<&[Preset]> {
        let fetched = device.preset_list().await?;

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for preset in &fetched {
            *counts.entry(preset.name.as_str()).or_default() += 1;
        }

        let conflicts: Vec<String> = self
            .hidden
            .iter()
            .filter(|name| counts.get(name.as_str()).copied().unwrap_or(0) > 1)
            .cloned()
            .collect();
        for name in &conflicts {
            warn!(preset = %name, "hidden preset name matches several presets, flag not applied");
        }

        // Names that no longer exist on the camera are dropped
        self.hidden.retain(|name| counts.contains_key(name.as_str()));

        self.presets = fetched
            .into_iter()
            .map(|mut preset| {
                preset.hidden =
                    self.hidden.contains(&preset.name) && !conflicts.contains(&preset.name);
                preset
            })
            .collect();
        self.conflicts = conflicts;

        debug!(count = self.presets.len(), "presets reloaded");
        Ok(&self.presets)
    }

    /// Presets in device order, hidden ones included
    pub fn presets(&self) -> &[Preset] {
        &self.presets
    }

    pub fn visible(&self) -> impl Iterator<Item = &Preset> {
        self.presets.iter().filter(|p| !p.hidden)
    }

    pub fn get(&self, index: usize) -> Option<&Preset> {
        self.presets.get(index)
    }

    pub fn find(&self, token: &str) -> Option<&Preset> {
        self.presets.iter().find(|p| p.token == token)
    }

    /// Hidden names that matched more than one preset on the last reload
    pub fn conflicts(&self) -> &[String] {
        &self.conflicts
    }

    /// Hidden names to hand back to the settings file
    pub fn hidden_names(&self) -> Vec<String> {
        self.hidden.iter().cloned().collect()
    }

    pub async fn goto(&self, device: &dyn PtzDevice, token: &str) -> Result<()> {
        device.preset_goto(token).await
    }

    /// Recall by position in the list, the way a row of preset buttons does
    pub async fn goto_index(&self, device: &dyn PtzDevice, index: usize) -> Result<()> {
        let token = self
            .get(index)
            .map(|p| p.token.clone())
            .ok_or_else(|| ControlError::PresetNotFound(format!("#{index}")))?;
        device.preset_goto(&token).await
    }

    /// Save the current position as a new preset and reload. Returns its token.
    pub async fn add(&mut self, device: &dyn PtzDevice, name: &str) -> Result<String> {
        let token = device.preset_add(name, "").await?;
        self.reload(device).await?;
        Ok(token)
    }

    /// Overwrite preset `token` with the current position and `name`, then reload.
    pub async fn update(&mut self, device: &dyn PtzDevice, token: &str, name: &str) -> Result<()> {
        let hidden = self
            .find(token)
            .map(|p| self.hidden.contains(&p.name))
            .unwrap_or(false);
        device.preset_add(name, token).await?;
        if hidden {
            // A hidden preset stays hidden under its new name
            self.hidden.insert(name.to_string());
        }
        self.reload(device).await?;
        Ok(())
    }

    pub async fn remove(&mut self, device: &dyn PtzDevice, token: &str) -> Result<()> {
        device.preset_remove(token).await?;
        self.reload(device).await?;
        Ok(())
    }

    /// Flip the client-only visibility flag of preset `token`.
    pub fn set_hidden(&mut self, token: &str, hidden: bool) -> Result<()> {
        let name = self
            .find(token)
            .map(|p| p.name.clone())
            .ok_or_else(|| ControlError::PresetNotFound(token.to_string()))?;

        if self.presets.iter().filter(|p| p.name == name).count() > 1 {
            return Err(ControlError::DuplicatePresetName(name));
        }

        if hidden {
            self.hidden.insert(name.clone());
        } else {
            self.hidden.remove(&name);
        }
        for preset in self.presets.iter_mut().filter(|p| p.name == name) {
            preset.hidden = hidden;
        }
        Ok(())
    }
}
