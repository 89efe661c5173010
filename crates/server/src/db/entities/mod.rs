pub mod connection_profile;
pub mod service_profile;
pub mod setting;
pub mod subscriber_secret;

pub mod prelude {
    pub use super::connection_profile::Entity as ConnectionProfile;
    pub use super::service_profile::Entity as ServiceProfile;
    pub use super::setting::Entity as Setting;
    pub use super::subscriber_secret::Entity as SubscriberSecret;
}
