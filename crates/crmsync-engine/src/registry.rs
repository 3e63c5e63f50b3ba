use crate::config::ConfigError;
use crate::config::schema::{CrmConfig, FieldKind};
use crmsync_common::locator::{Locator, Substitutions};
use std::collections::BTreeMap;

/// Logical names of the CRM controls the orchestrator drives.
pub mod names {
    pub const USERNAME_FIELD: &str = "username_field";
    pub const PASSWORD_FIELD: &str = "password_field";
    pub const LOGIN_BUTTON: &str = "login_button";
    pub const CRM_MODULE: &str = "crm_module";
    pub const LISTING: &str = "listing";
    pub const SEARCH_FIELD: &str = "search_field";
    pub const SEARCH_BUTTON: &str = "search_button";
    pub const RECORD_ROW: &str = "record_row";
    pub const EDIT_BUTTON: &str = "edit_button";
    pub const SAVE_BUTTON: &str = "save_button";
    pub const CLOSE_BUTTON: &str = "close_button";
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMapping {
    pub locator: Locator,
    pub kind: FieldKind,
}

/// Read-only lookup of control and field locators.
#[derive(Debug, Clone, Default)]
pub struct LocatorRegistry {
    locators: BTreeMap<String, Locator>,
    fields: BTreeMap<String, FieldMapping>,
}

impl LocatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &CrmConfig) -> Result<Self, ConfigError> {
        let mut fields = BTreeMap::new();
        for (name, spec) in &config.fields {
            let locator = Locator::new(spec.strategy, spec.value.clone()).map_err(|source| {
                ConfigError::FieldLocator {
                    field: name.clone(),
                    source,
                }
            })?;
            fields.insert(
                name.clone(),
                FieldMapping {
                    locator,
                    kind: spec.field_type,
                },
            );
        }

        Ok(Self {
            locators: config.locators.clone(),
            fields,
        })
    }

    pub fn with_locator(mut self, name: impl Into<String>, locator: Locator) -> Self {
        self.locators.insert(name.into(), locator);
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, locator: Locator) -> Self {
        self.fields.insert(
            name.into(),
            FieldMapping {
                locator,
                kind: FieldKind::Text,
            },
        );
        self
    }

    pub fn locator(&self, name: &str) -> Result<&Locator, ConfigError> {
        self.locators
            .get(name)
            .ok_or_else(|| ConfigError::NotConfigured(name.to_string()))
    }

    pub fn has_locator(&self, name: &str) -> bool {
        self.locators.contains_key(name)
    }

    pub fn field(&self, name: &str) -> Result<&FieldMapping, ConfigError> {
        self.fields
            .get(name)
            .ok_or_else(|| ConfigError::FieldNotConfigured(name.to_string()))
    }

    /// Look up a control and substitute its placeholders.
    pub fn resolve(&self, name: &str, substitutions: &Substitutions) -> Result<Locator, ConfigError> {
        Ok(self.locator(name)?.render(substitutions)?)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}
