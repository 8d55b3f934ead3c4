pub mod config;
pub mod form;
pub mod prompt_loader;
