//! Global setup and teardown for contract test suites that run against an Aztec sandbox.
//!
//! [`setup`] installs the signal handlers, checks the installed CLI version and brings a sandbox
//! up, [`teardown`] stops it again. Test files reach the PXE endpoint through [`pxe_url`] or
//! [`connect_pxe`].

pub mod config;
pub mod error;
pub mod logging;
pub mod setup;

pub use config::{
    BASE_PXE_PORT, BASE_PXE_URL_ENV, DEFAULT_BASE_PXE_URL, HarnessConfig, pxe_url, pxe_url_from,
};
pub use error::HarnessError;
pub use logging::init_tracing;
pub use setup::{connect, connect_pxe, setup, setup_with, teardown};
