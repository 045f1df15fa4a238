pub(crate) mod data_types;
pub(crate) mod device;
pub(crate) mod events;
pub(crate) mod peers;
pub(crate) mod publish;
pub(crate) mod signaling;
pub(crate) mod subscribe;
pub(crate) mod transport;
