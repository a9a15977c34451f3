pub mod config;
pub mod deploy;
pub mod endpoint;
pub mod registry;
pub mod render;
pub mod session;
pub mod settings;
pub mod subscription;
pub mod system;
pub mod utils;

pub use config::Config;
pub use deploy::{DeployReport, Deployer};
pub use endpoint::{EndpointOptions, ProxyEndpointConfig};
pub use registry::{ServiceKind, ServiceRegistry};
pub use session::Session;
pub use settings::Settings;
pub use subscription::{Subscription, SubscriptionNode};
pub use utils::DeployError;
