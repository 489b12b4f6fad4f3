pub mod ports {
    pub mod bar_source;
}
pub mod config;
pub mod engine;
pub mod error;
pub mod report;
