use super::{default_global_config_path, ConfigError, Settings, ValidationOptions};

pub fn load_settings() -> Result<Settings, ConfigError> {
    let path = default_global_config_path()?;
    let settings = Settings::from_path(&path)?;
    settings.validate(ValidationOptions::default())?;
    Ok(settings)
}
