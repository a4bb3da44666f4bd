mod component_repository;
mod plugin_version_repository;
mod version_repository;

pub use component_repository::PostgresComponentRepository;
pub use plugin_version_repository::PostgresPluginVersionRepository;
pub use version_repository::PostgresVersionRepository;
