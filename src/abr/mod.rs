//! # Adaptive bitrate
//!
//! [`AbrController`] picks the level of the next main fragment from a
//! bandwidth estimate ([`EwmaBandwidthEstimator`]) and the buffer ahead of
//! the playhead. While a main fragment loads, [`watch_fragment_load`] runs
//! the controller's abandon rules on a timer and aborts a load that would
//! stall playback, switching down for the retry.

pub mod controller;
pub mod ewma;
pub mod monitor;

pub use controller::{AbrContext, AbrController, MediaSnapshot};
pub use ewma::{Ewma, EwmaBandwidthEstimator};
pub use monitor::watch_fragment_load;
