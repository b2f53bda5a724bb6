//! Runtime-mutable settings, persisted in the settings table. Values are
//! parsed once at the boundary into typed fields; comma-separated lists
//! never leak past this module.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use base64::Engine;
use kapowarr_model::Event;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::db::SettingsRepository;
use crate::error::{KapowarrError, Result};
use crate::events::EventBus;
use crate::naming;

/// The typed settings of the service.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SettingsValues {
    /// The API key clients must present.
    pub api_key: String,
    /// Salted hash of the login password; `None` disables the login.
    #[serde(skip_serializing)]
    pub auth_password_hash: Option<String>,
    #[serde(skip_serializing)]
    pub auth_password_salt: Option<String>,
    pub comicvine_api_key: Option<String>,
    /// Scratch folder downloads land in before import. Disjoint from
    /// every root folder.
    pub download_folder: PathBuf,
    pub create_empty_volume_folders: bool,
    pub delete_empty_folders: bool,
    pub unmonitor_deleted_issues: bool,
    pub rename_downloaded_files: bool,
    pub volume_folder_naming: String,
    pub file_naming: String,
    pub file_naming_special_version: String,
    pub file_naming_vai: String,
    /// Naming for issue files whose issue data is incomplete.
    pub file_naming_empty: String,
    pub volume_padding: usize,
    pub issue_padding: usize,
    pub convert: bool,
    pub extract_issue_ranges: bool,
    /// Ordered preference of file formats, most desired first.
    pub format_preference: Vec<String>,
    /// Seconds a download may stall before it is failed; 0 disables.
    pub failing_download_timeout: u64,
    pub flaresolverr_base_url: Option<String>,
    pub enable_getcomics: bool,
}

impl Default for SettingsValues {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            auth_password_hash: None,
            auth_password_salt: None,
            comicvine_api_key: None,
            download_folder: PathBuf::from("downloads"),
            create_empty_volume_folders: true,
            delete_empty_folders: false,
            unmonitor_deleted_issues: false,
            rename_downloaded_files: true,
            volume_folder_naming:
                "{series_name}/Volume {volume_number} ({year})".to_string(),
            file_naming:
                "{series_name} ({year}) Volume {volume_number} Issue {issue_number}"
                    .to_string(),
            file_naming_special_version:
                "{series_name} ({year}) Volume {volume_number} {special_version}"
                    .to_string(),
            file_naming_vai:
                "{series_name} ({year}) Volume {volume_number}".to_string(),
            file_naming_empty:
                "{series_name} ({year}) Volume {volume_number} Issue {issue_number}"
                    .to_string(),
            volume_padding: 1,
            issue_padding: 3,
            convert: false,
            extract_issue_ranges: false,
            format_preference: vec![],
            failing_download_timeout: 0,
            flaresolverr_base_url: None,
            enable_getcomics: true,
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(KapowarrError::InvalidSettingValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_comma_list(value: &str) -> Vec<String> {
    if value.is_empty() {
        vec![]
    } else {
        value.split(',').map(|v| v.trim().to_string()).collect()
    }
}

fn render_comma_list(values: &[String]) -> String {
    values.join(",")
}

/// Handle to the settings. Reads are served from an in-process cache;
/// writes validate, persist and broadcast `SettingsUpdated`.
#[derive(Debug, Clone)]
pub struct Settings {
    repository: SettingsRepository,
    bus: EventBus,
    values: Arc<RwLock<SettingsValues>>,
}

impl Settings {
    pub async fn load(
        repository: SettingsRepository,
        bus: EventBus,
    ) -> Result<Self> {
        let mut values = SettingsValues::default();
        for (key, value) in repository.fetch_all().await? {
            if key == "api_key" {
                // Only settable through generate_api_key, but loaded
                // like any other value.
                values.api_key = value;
                continue;
            }
            // Unknown keys from older versions are ignored on load.
            let _ = apply_value(&mut values, &key, &value);
        }

        let settings = Self {
            repository,
            bus,
            values: Arc::new(RwLock::new(values)),
        };

        if settings.get().api_key.is_empty() {
            settings.generate_api_key().await?;
        }

        Ok(settings)
    }

    /// A snapshot of the current values.
    pub fn get(&self) -> SettingsValues {
        self.values.read().unwrap().clone()
    }

    /// Update one setting from its string form, validating it first.
    pub async fn update_key(&self, key: &str, value: &str) -> Result<()> {
        {
            let mut values = self.values.write().unwrap();
            apply_value(&mut values, key, value)?;
        }
        self.repository.set(key, value).await?;
        info!("Updated setting {key}");
        self.bus.emit(Event::SettingsUpdated);
        Ok(())
    }

    /// Generate and persist a fresh API key.
    pub async fn generate_api_key(&self) -> Result<String> {
        let mut bytes = [0u8; 16];
        rand::rng().fill_bytes(&mut bytes);
        let api_key =
            base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes);

        self.values.write().unwrap().api_key = api_key.clone();
        self.repository.set("api_key", &api_key).await?;
        self.bus.emit(Event::SettingsUpdated);
        Ok(api_key)
    }

    /// Set the login password; an empty password disables the login.
    pub async fn set_auth_password(&self, password: &str) -> Result<()> {
        if password.is_empty() {
            {
                let mut values = self.values.write().unwrap();
                values.auth_password_hash = None;
                values.auth_password_salt = None;
            }
            self.repository.set("auth_password_hash", "").await?;
            self.repository.set("auth_password_salt", "").await?;
            return Ok(());
        }

        let mut salt = [0u8; 16];
        rand::rng().fill_bytes(&mut salt);
        let salt_b64 =
            base64::engine::general_purpose::STANDARD.encode(salt);
        let hash = hash_password(&salt_b64, password);

        {
            let mut values = self.values.write().unwrap();
            values.auth_password_hash = Some(hash.clone());
            values.auth_password_salt = Some(salt_b64.clone());
        }
        self.repository.set("auth_password_hash", &hash).await?;
        self.repository.set("auth_password_salt", &salt_b64).await?;
        Ok(())
    }

    /// Check a login attempt against the stored password hash.
    pub fn check_password(&self, password: &str) -> bool {
        let values = self.values.read().unwrap();
        match (&values.auth_password_hash, &values.auth_password_salt) {
            (Some(hash), Some(salt)) => hash_password(salt, password) == *hash,
            // No password set: everyone may log in.
            _ => true,
        }
    }
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .encode(hasher.finalize())
}

fn apply_value(
    values: &mut SettingsValues,
    key: &str,
    value: &str,
) -> Result<()> {
    match key {
        "api_key" => {
            return Err(KapowarrError::InvalidSettingModification(
                key.to_string(),
            ));
        }
        "auth_password_hash" => {
            values.auth_password_hash =
                (!value.is_empty()).then(|| value.to_string());
        }
        "auth_password_salt" => {
            values.auth_password_salt =
                (!value.is_empty()).then(|| value.to_string());
        }
        "comicvine_api_key" => {
            values.comicvine_api_key =
                (!value.is_empty()).then(|| value.to_string());
        }
        "download_folder" => {
            values.download_folder = PathBuf::from(value);
        }
        "create_empty_volume_folders" => {
            values.create_empty_volume_folders = parse_bool(key, value)?;
        }
        "delete_empty_folders" => {
            values.delete_empty_folders = parse_bool(key, value)?;
        }
        "unmonitor_deleted_issues" => {
            values.unmonitor_deleted_issues = parse_bool(key, value)?;
        }
        "rename_downloaded_files" => {
            values.rename_downloaded_files = parse_bool(key, value)?;
        }
        "volume_folder_naming" => {
            naming::validate_folder_format(value)?;
            values.volume_folder_naming = value.to_string();
        }
        "file_naming" => {
            naming::validate_file_format(value, true)?;
            values.file_naming = value.to_string();
        }
        "file_naming_special_version" => {
            naming::validate_file_format(value, false)?;
            values.file_naming_special_version = value.to_string();
        }
        "file_naming_vai" => {
            naming::validate_file_format(value, false)?;
            values.file_naming_vai = value.to_string();
        }
        "file_naming_empty" => {
            naming::validate_file_format(value, true)?;
            values.file_naming_empty = value.to_string();
        }
        "volume_padding" => {
            values.volume_padding = value.parse().map_err(|_| {
                KapowarrError::InvalidSettingValue {
                    key: key.to_string(),
                    value: value.to_string(),
                }
            })?;
        }
        "issue_padding" => {
            values.issue_padding = value.parse().map_err(|_| {
                KapowarrError::InvalidSettingValue {
                    key: key.to_string(),
                    value: value.to_string(),
                }
            })?;
        }
        "convert" => values.convert = parse_bool(key, value)?,
        "extract_issue_ranges" => {
            values.extract_issue_ranges = parse_bool(key, value)?;
        }
        "format_preference" => {
            let formats = parse_comma_list(value);
            for format in &formats {
                if !crate::conversion::is_known_format(format) {
                    return Err(KapowarrError::InvalidSettingValue {
                        key: key.to_string(),
                        value: value.to_string(),
                    });
                }
            }
            values.format_preference = formats;
        }
        "failing_download_timeout" => {
            values.failing_download_timeout =
                value.parse().map_err(|_| {
                    KapowarrError::InvalidSettingValue {
                        key: key.to_string(),
                        value: value.to_string(),
                    }
                })?;
        }
        "flaresolverr_base_url" => {
            values.flaresolverr_base_url =
                (!value.is_empty()).then(|| value.to_string());
        }
        "enable_getcomics" => {
            values.enable_getcomics = parse_bool(key, value)?;
        }
        _ => {
            return Err(KapowarrError::InvalidSettingKey(key.to_string()));
        }
    }
    Ok(())
}

/// Render the current values back to their string forms, for the API.
pub fn render_setting(values: &SettingsValues, key: &str) -> Option<String> {
    match key {
        "format_preference" => {
            Some(render_comma_list(&values.format_preference))
        }
        "download_folder" => {
            Some(values.download_folder.to_string_lossy().to_string())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comma_list_round_trip() {
        let parsed = parse_comma_list("cbz,zip, cbr");
        assert_eq!(parsed, vec!["cbz", "zip", "cbr"]);
        assert_eq!(
            render_comma_list(&parsed),
            "cbz,zip,cbr"
        );
        assert!(parse_comma_list("").is_empty());
    }

    #[test]
    fn test_apply_bool() {
        let mut values = SettingsValues::default();
        apply_value(&mut values, "convert", "true").unwrap();
        assert!(values.convert);
        assert!(apply_value(&mut values, "convert", "maybe").is_err());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let mut values = SettingsValues::default();
        let result = apply_value(&mut values, "does_not_exist", "1");
        assert!(matches!(
            result,
            Err(KapowarrError::InvalidSettingKey(_))
        ));
    }

    #[test]
    fn test_api_key_not_directly_settable() {
        let mut values = SettingsValues::default();
        let result = apply_value(&mut values, "api_key", "abc");
        assert!(matches!(
            result,
            Err(KapowarrError::InvalidSettingModification(_))
        ));
    }

    #[test]
    fn test_password_hashing() {
        let hash = hash_password("salt", "hunter2");
        assert_eq!(hash, hash_password("salt", "hunter2"));
        assert_ne!(hash, hash_password("other", "hunter2"));
        assert_ne!(hash, hash_password("salt", "hunter3"));
    }
}
