pub mod scanner;

pub use scanner::{ScannerConfig, ScannerConfigSource};
