pub mod connection_profile_service;
pub mod service_profile_service;
pub mod settings_service;
pub mod subscriber_secret_service;

pub use connection_profile_service::*;
pub use service_profile_service::*;
pub use settings_service::*;
pub use subscriber_secret_service::*;
