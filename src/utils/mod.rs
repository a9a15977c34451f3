pub mod error;
pub mod random;

pub use error::{validate_port, DeployError, Result};
pub use random::{new_client_id, new_obfuscation_path, DEFAULT_PATH_LENGTH, MIN_PATH_LENGTH};
