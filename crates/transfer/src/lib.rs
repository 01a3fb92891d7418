pub mod error;
pub mod executor;
pub mod factory;
pub mod progress;
pub mod resume;
pub mod source;
pub mod spec;

pub use error::*;
pub use executor::*;
pub use factory::*;
pub use progress::*;
pub use resume::*;
pub use source::*;
pub use spec::*;
