mod delivery_service;

pub use delivery_service::{
    DeliveryPolicy, DeliveryService, DeliveryServiceDependencies, SendMessageRequest,
};
