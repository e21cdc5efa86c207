pub mod batch;
pub mod executor;
pub mod identity;
pub mod kernel;
pub mod profiling;
pub mod worker;

pub use batch::*;
pub use executor::*;
pub use identity::*;
pub use kernel::*;
pub use profiling::*;
pub use worker::*;
