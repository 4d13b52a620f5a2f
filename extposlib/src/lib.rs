//! Extpos Shared Library (extposlib)
//!
//! This library contains definitions shared between the relay process
//! (extpos) and the detector simulator (extpossim).

pub mod types;
pub mod detection;
pub mod zmtp;
pub mod crtp;
pub mod caller;
pub mod error;

pub use types::*;
pub use detection::*;
pub use zmtp::*;
pub use crtp::*;
pub use caller::*;
pub use error::*;
