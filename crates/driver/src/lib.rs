//! Round-buffering drivers that turn a [`DklsCore`] black box into a
//! DKLS23 keygen, key rotation or signing run over the relay wire
//! protocol.

mod core;
mod driver;
mod error;
mod hash;
mod keygen;
mod sign;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use crate::core::{DklsCore, DklsCoreFactory, DklsOutbound, KeyshareOutput};
pub use driver::{DriverMessage, DriverSignal, Driver, MessageBody, RoundHandler};
pub use error::{Error, Result};
pub use keygen::{KeygenContext, KeygenDriver, KeygenHandler};
pub use sign::{SignDriver, SignHandler};
