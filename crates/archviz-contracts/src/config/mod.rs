mod settings;
mod sources;

pub use settings::{
    normalize_api_base, validate_size, StudioSettings, API_BASE_KEYS, API_KEY_KEYS,
    DEFAULT_API_BASE, DEFAULT_IMAGE_SIZE, MAPS_API_KEY_KEYS, SETTING_GROUPS,
};
pub use sources::{
    parse_dotenv, ConfigChain, ConfigHit, ConfigSource, DotenvSource, EnvSource, MapSource,
};
