pub mod domain;
pub mod error;
pub mod events;
pub mod traits;

pub use domain::*;
pub use error::*;
pub use events::*;
pub use traits::*;
