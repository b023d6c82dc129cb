mod settings;
mod store;
mod validate;

pub use settings::{
    redact_credential, Configuration, GenerationMode, ImageSize, Quality, Style,
    DEFAULT_API_VERSION, DEFAULT_DEPLOYMENT,
};
pub use store::{
    ConfigStore, InjectedSecrets, CONFIG_KEY, ENV_CREDENTIAL, ENV_DEPLOYMENT, ENV_ENDPOINT,
};
pub use validate::{endpoint_matches, validate, ValidationError, MAX_IMAGES, MIN_IMAGES};
