//! WhatsApp channel through a WhatsApp-compatible HTTP gateway.
//!
//! The gateway provisions named instances and pairs them with a phone by QR code. [`client`]
//! wraps the HTTP surface, [`protocol`] normalizes its loosely-typed bodies, and [`session`]
//! drives one instance through its lifecycle.

pub mod client;
pub mod protocol;
pub mod session;

pub use client::{GatewayClient, GatewayError, GatewayResponse};
pub use protocol::{decode_qr_image, normalize_instance_name, ConnectStatus, ConnectionState};
pub use session::{
    LifecycleState, SessionError, SessionStatus, SessionTiming, WhatsAppSession,
};
