mod clock;
pub mod compress;
mod delivery;
mod link;
mod login;

pub use clock::{Clock, ManualClock, SystemClock};
pub use delivery::{
    BatchId, DeliveryReport, DeliveryResult, DeliveryScheduler, PeerDelivery, fragment_message,
    prepare_payload,
};
pub use link::{AdminOracle, PeerId, PeerLink};
pub use login::{BufferedItem, DEFAULT_BUFFERED_CHANNELS, LoginBuffer};
