//! # Builder Testing Utils
//!
//! Shared test doubles for the build service workspace.
//!
//! - **Mock Repositories**: in-memory version, component and plugin-version stores
//! - **Mock Broker / KV / Slug storage**: in-memory collaborators with inspection helpers
//! - **Container & Registry doubles**: recording container runtime, scripted registry API
//! - **Scripted commands**: a `CommandRunner` that answers git/svn/docker invocations from a script
//! - **Test Data Builders**: tasks, build requests and version records with sensible defaults
//!
//! ```toml
//! [dev-dependencies]
//! builder-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod containers;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use containers::*;
pub use helpers::*;
pub use mocks::*;
