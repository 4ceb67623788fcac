pub mod loader;
pub mod schema;

pub use loader::{DataLoadError, Format, load_settings, load_settings_from_dir};
pub use schema::SettingsData;
