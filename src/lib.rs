//! Asynchronous distributed key generation (ADKG): a BFT, no-trusted-dealer threshold key
//! generation protocol producing one shared public key and each party's scalar share of the
//! secret behind it, tolerant of up to `t` Byzantine parties out of `n >= 3t+1`.

pub mod aba;
pub mod acs;
pub mod acss;
pub mod codec;
pub mod commit;
pub mod driver;
pub mod error;
pub mod group;
pub mod keyderive;
pub mod matrix;
pub mod party;
pub mod poly;
pub mod rbc;
pub mod sigma;
pub mod transport;
pub mod wire;

pub use driver::{run_adkg, AdkgHandle};
pub use error::AdkgError;
pub use keyderive::KeyDerivationOutput;
pub use party::{Params, PartyId, Roster};
