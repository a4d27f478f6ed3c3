pub mod account;
pub mod enums;
pub mod mpc;
pub mod profile;
pub mod proof;
pub mod session;
pub mod user;

pub use account::*;
pub use enums::*;
pub use mpc::*;
pub use profile::*;
pub use proof::*;
pub use session::*;
pub use user::*;
