pub mod connection_routes;
pub mod secret_routes;
pub mod service_profile_routes;
pub mod sync_routes;

pub use connection_routes::create_connections_router;
pub use secret_routes::create_secrets_router;
pub use service_profile_routes::create_service_profiles_router;
pub use sync_routes::create_sync_router;
