pub use pull_request::{default_repository, pull_request, pull_request_in, DEFAULT_SERVER};
pub use registry::{webhook, InMemoryRegistry, RegistryCall, StaticProbe};

mod pull_request;
mod registry;
