pub mod cli;
pub mod parser;
pub mod types;

pub use cli::Cli;
pub use types::{AuthRealm, BindSpec, Config, Interpreter};
