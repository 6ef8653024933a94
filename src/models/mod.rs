mod site;
mod visit;

pub use site::Site;
pub use visit::{Beacon, DeviceType, NormalizedVisit, UtmParams};
