//! Repository layer for data access

pub mod campaigns;
pub mod contacts;
pub mod shipping_records;

// Re-export concrete repository implementations with simple names
pub use campaigns::DbCampaignRepository as CampaignRepository;
pub use contacts::DbContactDirectory as ContactRepository;
pub use shipping_records::DbShippingLedger as ShippingRecordRepository;

// Re-export repository traits
pub use campaigns::CampaignStore;
pub use contacts::ContactDirectory;
pub use shipping_records::{Reservation, ShippingLedger};
