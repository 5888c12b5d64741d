// Sprig - a micro-framework built from a service container, service providers
// and a prioritized event pipeline
//
// Applications register providers and routes on an `Application`, attach
// before/after/finish/error listeners, and let the HTTP kernel turn requests
// into responses.

// Re-export core functionality
pub use sprig_core::*;

// Re-export optional crates
#[cfg(feature = "config")]
pub use sprig_config;

#[cfg(feature = "testing")]
pub use sprig_testing;

// Prelude for common imports
pub mod prelude {
    pub use sprig_core::prelude::*;

    #[cfg(feature = "config")]
    pub use sprig_config::{AppConfig, ConfigServiceProvider};

    #[cfg(feature = "testing")]
    pub use sprig_testing::{TestClient, TestRequestBuilder, TestResponse};
}
