pub mod chrony;
pub mod configuration;
pub mod context;
pub mod pps;
pub mod session;
pub mod shm;
pub mod timestamp;

#[macro_use]
extern crate bitflags;

#[macro_use]
extern crate nix;

#[cfg(test)]
#[macro_use]
extern crate assert_approx_eq;

use shm::ShmUpdate;
use tokio::sync::broadcast;

pub type ShmReceiver = broadcast::Receiver<ShmUpdate>;
pub type ShmSender = broadcast::Sender<ShmUpdate>;
