pub mod api;
pub mod error;
pub mod ids;
pub mod payload;
pub mod time;
pub mod value;

pub use api::*;
pub use error::{ErrorBody, SensaError, SensaResult};
pub use ids::*;
pub use payload::*;
pub use time::*;
pub use value::*;
