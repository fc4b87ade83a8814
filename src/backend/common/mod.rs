pub(crate) mod constants;
#[cfg(feature = "desktop")]
pub(crate) mod dtos;
pub mod errors;
pub mod settings;
