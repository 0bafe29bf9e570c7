use crate::configuration::PpsConfig;
use crate::session::SourceType;

use serde::Deserialize;

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct DeviceConfig {
    pub name: String,
    pub device: String,
    /// Overrides the source type guessed from the device path.
    pub source: Option<SourceType>,
    pub pps: Option<PpsConfig>,
    /// Defaults to true.  Turn off to watch a device without feeding the
    /// time daemons.
    pub ship_to_ntpd: Option<bool>,
}
