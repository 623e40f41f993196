pub mod error;

pub use error::{DetectError, ErrorKind};
