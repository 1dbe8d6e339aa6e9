pub mod ids;
pub mod config;
pub mod work;
pub mod model;
pub mod evaluation;
pub mod prompt;
pub mod dataset;

pub use ids::*;
pub use config::*;
pub use work::*;
pub use model::*;
pub use evaluation::*;
pub use prompt::*;
pub use dataset::*;
