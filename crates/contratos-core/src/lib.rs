pub mod models;
pub mod status;
pub mod terms;

pub use models::{Contract, ContractMessage, Notification, User, WorldIdLink};
pub use status::{ContractStatus, TransitionError};
pub use terms::{
    APPROVAL_WINDOW_HOURS, LINKING_CODE_LEN, is_valid_linking_code, random_linking_code,
    service_fee,
};
