pub mod settings;

pub use settings::{BlockConfig, Config, ParityConfig, RegisterMapConfig, ServerConfig};
